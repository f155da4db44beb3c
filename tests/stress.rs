//! Stress tests for Fieldlink decoders
//!
//! Run with: cargo test --release stress -- --ignored

use fieldlink::*;
use std::time::Instant;

fn beacon_frame(i: u32) -> Vec<u8> {
    let mut f = vec![0xAA];
    f.extend_from_slice(&(1_550_000_000 + i).to_be_bytes());
    f.extend_from_slice(&(22_000_000 + i % 1_000_000).to_be_bytes());
    f.extend_from_slice(&(113_000_000 + i % 1_000_000).to_be_bytes());
    f.push((i % 60) as u8);
    f.extend_from_slice(&((i % 360) as u16).to_be_bytes());
    f.extend_from_slice(&((i % 500) as u16).to_be_bytes());
    f.push(0x02);
    f.push(7);
    f.extend_from_slice(&((i % 10_000) as u16).to_be_bytes());
    f.extend_from_slice(&i.to_be_bytes());
    f.push((i % 100) as u8);
    f.push(0x00);
    f
}

fn humidity_frame(samples: u16) -> Vec<u8> {
    // constant streams compress to [literal, run, run, ...]
    fn stream(value: u8, count: u16) -> Vec<u8> {
        let mut s = vec![value];
        let mut left = count - 1;
        while left > 0 {
            let n = left.min(15);
            s.push(0xA0 | n as u8);
            left -= n;
        }
        s
    }
    let ti = stream(21, samples);
    let td = stream(5, samples);
    let hum = stream(55, samples);
    let ele = stream(90, samples);

    let mut f = vec![0xFF, 0x02];
    f.extend_from_slice(&samples.to_be_bytes());
    f.extend_from_slice(&1_556_108_000u32.to_be_bytes());
    f.push(ti.len() as u8);
    f.push(td.len() as u8);
    f.extend_from_slice(&ti);
    f.extend_from_slice(&td);
    f.push(hum.len() as u8);
    f.extend_from_slice(&hum);
    f.push(ele.len() as u8);
    f.extend_from_slice(&ele);
    f
}

#[test]
#[ignore] // Run manually with --ignored
fn stress_test_beacon_decoding() {
    let decoder = Decoder::new();
    let frames: Vec<_> = (0..10_000).map(beacon_frame).collect();

    let iterations = 1_000_000;
    let start = Instant::now();

    for i in 0..iterations {
        let frame = &frames[i % frames.len()];
        let record = decoder.decode(ProtocolKind::LocationBeacon, frame).unwrap();
        assert_eq!(record.kind(), ProtocolKind::LocationBeacon);
    }

    let elapsed = start.elapsed();
    let rate = iterations as f64 / elapsed.as_secs_f64();

    println!("Decoded {} beacons in {:?}", iterations, elapsed);
    println!("Rate: {:.0} frames/second", rate);

    assert!(
        rate > 200_000.0,
        "Should decode at least 200k beacons/s, got {:.0}",
        rate
    );
}

#[test]
#[ignore]
fn stress_test_humidity_expansion() {
    let frame = humidity_frame(240);
    let iterations = 100_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let samples = humidity::decode(&frame).unwrap();
        assert_eq!(samples.len(), 240);
    }

    let elapsed = start.elapsed();
    let rate = iterations as f64 / elapsed.as_secs_f64();

    println!("Expanded {} multi-sample frames in {:?}", iterations, elapsed);
    println!("Rate: {:.0} frames/second", rate);

    assert!(
        rate > 10_000.0,
        "Should expand at least 10k frames/s, got {:.0}",
        rate
    );
}

#[test]
#[ignore]
fn stress_test_detail_assembly() {
    let device: DeviceEui = "0004a30b001c0530".parse().unwrap();
    let frames: Vec<_> = (0..1_000).map(beacon_frame).collect();

    let iterations = 200_000;
    let start = Instant::now();

    for i in 0..iterations {
        let beacon = LocationBeacon::decode(&frames[i % frames.len()]).unwrap();
        let state = DeviceState::from_beacon(device, &beacon, chrono::Utc::now());
        let json = state.detail_json().unwrap();
        assert!(json.contains("\"step_count\""));
    }

    let elapsed = start.elapsed();
    let rate = iterations as f64 / elapsed.as_secs_f64();

    println!("Assembled {} detail blobs in {:?}", iterations, elapsed);
    println!("Rate: {:.0} blobs/second", rate);
}

#[test]
#[ignore]
fn stress_test_concurrent_decoding() {
    use std::sync::Arc;
    use std::thread;

    let decoder = Arc::new(Decoder::new());
    let num_threads = 8;
    let per_thread = 100_000u32;

    let start = Instant::now();
    let handles: Vec<_> = (0..num_threads)
        .map(|t| {
            let decoder = Arc::clone(&decoder);
            thread::spawn(move || {
                for i in 0..per_thread {
                    let frame = beacon_frame(t * per_thread + i);
                    decoder
                        .decode(ProtocolKind::LocationBeacon, &frame)
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let elapsed = start.elapsed();
    let total = num_threads * per_thread;
    println!("Decoded {} beacons on {} threads in {:?}", total, num_threads, elapsed);
}
