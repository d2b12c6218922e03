// src/connection/keepalive.rs

//! Keepalive timing for a session: the periodic PING timer and round-trip
//! measurement.

use std::time::Duration;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

/// Fires once per `period`, starting one full period after it is created.
#[derive(Debug)]
pub struct Keepalive {
    interval: Interval,
}

impl Keepalive {
    pub fn start(period: Duration) -> Self {
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    pub async fn tick(&mut self) {
        self.interval.tick().await;
    }
}

/// Measures the time between a server PING and the client's PONG.
#[derive(Debug, Default)]
pub struct RoundTrip {
    sent_at: Option<Instant>,
    last: Option<Duration>,
}

impl RoundTrip {
    /// Starts (or restarts) the clock.
    pub fn start(&mut self) {
        self.sent_at = Some(Instant::now());
    }

    /// Stops the clock and returns the elapsed time at microsecond resolution.
    /// Returns `None` if no PING was outstanding.
    pub fn stop(&mut self) -> Option<Duration> {
        let sent_at = self.sent_at.take()?;
        let micros = u64::try_from(sent_at.elapsed().as_micros()).unwrap_or(u64::MAX);
        let rtt = Duration::from_micros(micros);
        self.last = Some(rtt);
        Some(rtt)
    }

    /// The last measured round trip in whole milliseconds.
    pub fn millis(&self) -> Option<u64> {
        self.last
            .map(|rtt| u64::try_from(rtt.as_millis()).unwrap_or(u64::MAX))
    }
}
