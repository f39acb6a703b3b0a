use std::{hint::black_box, time::Duration};

use criterion::{criterion_group, criterion_main, Criterion};

use taskbus::{Bus, BusConfig, WaitTimeout};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Bench {
    Ping,
    Idle,
}

fn bench_persistent_round_trip(c: &mut Criterion) {
    let bus: Bus<Bench> = Bus::init(BusConfig::default()).unwrap();
    let id = bus.subscriber_create(Bench::Ping).unwrap();
    c.bench_function("publish_wait_until", |b| {
        b.iter(|| {
            bus.publish(Bench::Ping, None).unwrap();
            let msg = bus.wait_until(id, Duration::from_secs(1)).unwrap();
            black_box(msg.id());
        })
    });
    bus.shutdown();
}

fn bench_no_wait_timeout(c: &mut Criterion) {
    let bus: Bus<Bench> = Bus::init(BusConfig::default()).unwrap();
    c.bench_function("wait_any_no_wait", |b| {
        b.iter(|| {
            let res = bus.wait_any(black_box(&[Bench::Idle, Bench::Ping]), WaitTimeout::NoWait);
            black_box(res.is_err());
        })
    });
    bus.shutdown();
}

criterion_group!(benches, bench_persistent_round_trip, bench_no_wait_timeout);
criterion_main!(benches);
