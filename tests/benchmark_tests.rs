//! Performance benchmarks for the hot paths of replication

use client::interpolation::Smoothing;
use client::leaderboard::leaderboard;
use client::mirror::ClientMirror;
use server::outbox::Outbox;
use server::store::VariableStore;
use shared::{encode_frame, player_key, Field, FieldValue, Packet, PlayerRecord, Vec3};
use std::sync::Arc;
use std::time::Instant;

/// Benchmarks store updates fanned out to a full server of subscribers
#[test]
fn benchmark_store_update_fanout() {
    let mut store = VariableStore::new();
    let outboxes: Vec<Arc<Outbox>> = (1..=8)
        .map(|id| {
            let outbox = Arc::new(Outbox::new(256));
            store.subscribe(id, Arc::clone(&outbox));
            outbox
        })
        .collect();

    for id in 1..=8 {
        store.create(&player_key(id), PlayerRecord::new(id)).unwrap();
    }

    let iterations = 10_000;
    let start = Instant::now();

    for i in 0..iterations {
        let key = player_key(i % 8 + 1);
        let position = Vec3::new(i as f32, 0.0, 0.0);
        store
            .update(&key, Field::Position, FieldValue::Vector(position))
            .unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Store updates: {} iterations to {} subscribers in {:?} ({:.2} μs/iter)",
        iterations,
        outboxes.len(),
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Coalescing keeps every outbox at one pending update per key
    for outbox in &outboxes {
        assert!(outbox.len() <= 16);
    }
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks frame encoding of a full record update
#[test]
fn benchmark_frame_encoding() {
    let packet = Packet::Updated {
        key: player_key(1),
        record: PlayerRecord::new(1),
    };

    let iterations = 100_000;
    let start = Instant::now();
    let mut bytes = 0;

    for _ in 0..iterations {
        bytes += encode_frame(&packet).unwrap().len();
    }

    let duration = start.elapsed();
    println!(
        "Frame encoding: {} iterations in {:?} ({:.2} ns/iter, {} bytes/frame)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64,
        bytes / iterations
    );

    assert!(bytes / iterations < 512);
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks interpolation of a busy mirror
#[test]
fn benchmark_interpolation_ticks() {
    let mut mirror = ClientMirror::new();
    mirror.apply(Packet::AssignId { client_id: 1 }, &mut ());

    for id in 1..=64 {
        let mut record = PlayerRecord::new(id);
        record.position = Vec3::new(id as f32 * 10.0, 0.0, 0.0);
        mirror.apply(
            Packet::Updated {
                key: player_key(id),
                record,
            },
            &mut (),
        );
    }

    let smoothing = Smoothing::time_scaled();
    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        mirror.interpolate(&smoothing, 1.0 / 60.0, &mut ());
    }

    let duration = start.elapsed();
    println!(
        "Interpolation: {} ticks over {} cars in {:?} ({:.2} μs/tick)",
        iterations,
        mirror.len(),
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 2000);
}

/// Benchmarks leaderboard construction every frame
#[test]
fn benchmark_leaderboard() {
    let records: Vec<PlayerRecord> = (1..=64)
        .map(|id| {
            let mut record = PlayerRecord::new(id);
            record.highscore = ((id * 37) % 101) as f64;
            record
        })
        .collect();
    let local = PlayerRecord::new(0);

    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let rows = leaderboard(&records, Some(&local));
        assert_eq!(rows.len(), 5);
    }

    let duration = start.elapsed();
    println!(
        "Leaderboard: {} builds in {:?} ({:.2} μs/build)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 2000);
}
