#![allow(dead_code)]

use std::{
    thread,
    time::{Duration, Instant},
};

use taskbus::{Bus, BusConfig};

/// Виды сообщений, общие для интеграционных тестов.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Sensor,
    Alarm,
    Tick,
    Report,
}

pub fn started_bus() -> Bus<Topic> {
    Bus::init(BusConfig::default()).unwrap()
}

/// Ждёт, пока условие станет истинным, не дольше `limit`.
pub fn eventually<F>(
    limit: Duration,
    mut cond: F,
) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + limit;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(2));
    }
}

/// Ждёт, пока диспетчер разберёт очередь и все сообщения будут освобождены.
pub fn quiesce(bus: &Bus<Topic>) -> bool {
    eventually(Duration::from_secs(2), || {
        let stats = bus.stats();
        stats.pending == 0 && stats.live_messages == 0
    })
}
