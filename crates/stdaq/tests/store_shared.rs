// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com
//
// Two handles on the same segments, as a producer and a consumer process
// would hold them.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_panics_doc)]

use std::thread;
use std::time::Duration;
use stdaq::{NotifySubscriber, Notifier, RingStore, StoreError};

fn unique(tag: &str) -> String {
    format!("stdaq-shared-{tag}-{}-{}", std::process::id(), fastrand::u32(..))
}

#[test]
fn test_writes_visible_through_second_handle() {
    let name = unique("ring");
    let mut writer = RingStore::create_split(&name, 8, 256, 4).unwrap();
    let reader = RingStore::open(&name, 8, 256, 4).unwrap();

    writer.write_split(6, &6u64.to_le_bytes(), &[0xEE; 200]).unwrap();

    let slot = reader.slot(6);
    assert_eq!(slot.meta(), &6u64.to_le_bytes());
    assert!(slot.data()[..200].iter().all(|&b| b == 0xEE));
    // Same slot as id 2
    assert_eq!(reader.slot(2).meta(), &6u64.to_le_bytes());

    drop(reader);
    writer.destroy().unwrap();
}

#[test]
fn test_open_rejects_other_geometry() {
    let name = unique("geom");
    let store = RingStore::create_split(&name, 8, 256, 4).unwrap();

    assert!(matches!(
        RingStore::open(&name, 8, 256, 8),
        Err(StoreError::SizeMismatch { .. })
    ));
    assert!(matches!(
        RingStore::open(&unique("absent"), 8, 256, 4),
        Err(StoreError::NotFound(_))
    ));

    store.destroy().unwrap();
}

#[test]
fn test_subscriber_wakes_on_send_from_other_thread() {
    let name = unique("notify");
    let mut notifier = Notifier::create(&name, 64).unwrap();
    let mut subscriber = NotifySubscriber::attach(&name, 64).unwrap();

    let consumer = thread::spawn(move || {
        let mut ids = Vec::new();
        while ids.len() < 3 {
            if let Some(id) = subscriber.recv_timeout(Duration::from_secs(5)) {
                ids.push(id);
            } else {
                break;
            }
        }
        ids
    });

    thread::sleep(Duration::from_millis(20));
    for id in [100, 101, 102] {
        notifier.send(id);
    }

    assert_eq!(consumer.join().unwrap(), vec![100, 101, 102]);
    notifier.destroy().unwrap();
}

#[test]
fn test_store_and_notifier_handoff() {
    let store_name = unique("handoff");
    let notify = format!("{store_name}-notify");
    let mut store = RingStore::create_split(&store_name, 8, 64, 16).unwrap();
    let mut notifier = Notifier::create(&notify, 16).unwrap();

    let reader = RingStore::open(&store_name, 8, 64, 16).unwrap();
    let mut subscriber = NotifySubscriber::attach(&notify, 16).unwrap();

    let consumer = thread::spawn(move || {
        let mut seen = Vec::new();
        while seen.len() < 10 {
            let Some(id) = subscriber.recv_timeout(Duration::from_secs(5)) else {
                break;
            };
            let slot = reader.slot(id);
            let stored = u64::from_le_bytes(slot.meta().try_into().unwrap());
            assert_eq!(stored, id);
            assert!(slot.data().iter().all(|&b| b == id as u8));
            seen.push(id);
        }
        seen
    });

    // Pace the writer so the consumer never falls a full ring behind
    for id in 0..10u64 {
        store.write_split(id, &id.to_le_bytes(), &[id as u8; 64]).unwrap();
        notifier.send(id);
        thread::sleep(Duration::from_millis(2));
    }

    assert_eq!(consumer.join().unwrap(), (0..10).collect::<Vec<_>>());
    notifier.destroy().unwrap();
    store.destroy().unwrap();
}
