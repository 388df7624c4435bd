// Dispatch statistics: command throughput, failures, in-flight commands, session churn.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;

struct StatsSample {
    at: Instant,
    commands: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub commands_dispatched: u64,
    pub commands_failed: u64,
    pub commands_in_flight: u32,
    /// Commands completed per second since the previous snapshot.
    pub commands_per_sec: f64,
    pub sessions_created: u64,
    pub sessions_destroyed: u64,
    pub live_sessions: usize,
}

pub struct StatsCollector {
    commands_dispatched: AtomicU64,
    commands_failed: AtomicU64,
    in_flight: AtomicU32,
    sessions_created: AtomicU64,
    sessions_destroyed: AtomicU64,
    last_sample: Mutex<StatsSample>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            commands_dispatched: AtomicU64::new(0),
            commands_failed: AtomicU64::new(0),
            in_flight: AtomicU32::new(0),
            sessions_created: AtomicU64::new(0),
            sessions_destroyed: AtomicU64::new(0),
            last_sample: Mutex::new(StatsSample {
                at: Instant::now(),
                commands: 0,
            }),
        }
    }

    pub fn command_started(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finished command, successful or not.
    pub fn command_finished(&self, ok: bool) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        self.commands_dispatched.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.commands_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn session_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_destroyed(&self) {
        self.sessions_destroyed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, live_sessions: usize) -> StatsSnapshot {
        let now = Instant::now();
        let commands = self.commands_dispatched.load(Ordering::Relaxed);

        let commands_per_sec = {
            let mut sample = self.last_sample.lock();
            let elapsed = now.duration_since(sample.at).as_secs_f64();
            let rate = if elapsed > 0.1 {
                (commands - sample.commands) as f64 / elapsed
            } else {
                0.0
            };
            sample.at = now;
            sample.commands = commands;
            rate
        };

        StatsSnapshot {
            commands_dispatched: commands,
            commands_failed: self.commands_failed.load(Ordering::Relaxed),
            commands_in_flight: self.in_flight.load(Ordering::Relaxed),
            commands_per_sec,
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            sessions_destroyed: self.sessions_destroyed.load(Ordering::Relaxed),
            live_sessions,
        }
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}
