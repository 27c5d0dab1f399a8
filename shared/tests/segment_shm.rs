use std::{
    sync::atomic::{AtomicBool, Ordering},
    thread,
};

use prost::Message;
use shared::{
    events::{SessionChange, SessionSnapshot},
    segment::{ReadError, SegmentView},
    shm::{self, ShmError, ShmSegment, PRIVATE_KEY},
};

#[test]
fn private_segment_round_trips_a_snapshot() {
    let seg = ShmSegment::create_or_attach(PRIVATE_KEY, 4096).expect("shmget");
    seg.mark_for_removal().expect("IPC_RMID");
    let view = seg.view().unwrap();
    view.initialize();

    let snap = SessionSnapshot {
        change: SessionChange::Opened as i32,
        socket_id: 0xdead_beef,
        comm: "nginx".into(),
        remote_addr: vec![10, 0, 0, 1],
        remote_port: 443,
        active_sessions: 1,
        ..Default::default()
    };
    assert_eq!(view.write(&snap.encode_to_vec()).unwrap(), 1);

    let (generation, payload) = seg.reader().unwrap().read_consistent(4).unwrap();
    assert_eq!(generation, 1);
    let back = SessionSnapshot::decode(&*payload).unwrap();
    assert_eq!(back.change_kind(), SessionChange::Opened);
    assert_eq!(back.comm, "nginx");
    assert_eq!(back.remote_port, 443);
}

#[test]
fn dropping_the_segment_detaches_it() {
    let seg = ShmSegment::create_or_attach(PRIVATE_KEY, 4096).expect("shmget");
    let id = seg.id();
    assert_eq!(shm::attach_count(id).unwrap(), 1);

    drop(seg);
    assert_eq!(shm::attach_count(id).unwrap(), 0);
    shm::remove(id).unwrap();
}

#[test]
fn read_only_attach_refuses_a_writable_view() {
    let owner = ShmSegment::create_or_attach(PRIVATE_KEY, 4096).expect("shmget");
    owner.mark_for_removal().expect("IPC_RMID");
    owner.view().unwrap().initialize();

    let ro = ShmSegment::attach_id(owner.id(), owner.size(), true).expect("shmat");
    assert!(ro.is_read_only());
    assert!(matches!(ro.view(), Err(ShmError::ReadOnly { .. })));
    assert_eq!(ro.reader().unwrap().read_consistent(1), Err(ReadError::Empty));
}

#[test]
fn reader_never_accepts_a_mixed_payload() {
    // 64-byte payloads filled with one repeated byte: any accepted copy that
    // mixes two writes would contain two different values.
    let mut backing = vec![0u64; 64];
    let view = SegmentView::from_words(&mut backing).unwrap();
    view.initialize();
    view.write(&[0u8; 64]).unwrap();
    let reader = view.reader();

    let stop = AtomicBool::new(false);
    let (accepted, torn) = thread::scope(|s| {
        s.spawn(|| {
            let mut n: u8 = 0;
            while !stop.load(Ordering::Relaxed) {
                n = n.wrapping_add(1);
                view.write(&[n; 64]).unwrap();
            }
        });

        let mut accepted = 0;
        let mut torn = 0;
        let mut buf = Vec::new();
        for _ in 0..50_000 {
            match reader.read_into(&mut buf) {
                Ok(_) => {
                    accepted += 1;
                    assert_eq!(buf.len(), 64);
                    assert!(buf.iter().all(|&b| b == buf[0]), "mixed payload {buf:?}");
                }
                Err(ReadError::Torn) => torn += 1,
                Err(e) => panic!("unexpected read error {e}"),
            }
        }
        stop.store(true, Ordering::Relaxed);
        (accepted, torn)
    });

    assert!(accepted > 0, "reader starved ({torn} torn reads)");
}
