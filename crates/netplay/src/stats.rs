//! Session throughput statistics.
//!
//! Counts loop ticks and packets per window (one second by default). At the
//! end of each window the counts become a [`StatsReport`], logged at
//! `info` under the `netplay::stats` target, and the window resets. A
//! running average of packets sent per second is kept across windows.

use std::time::Duration;

use tokio::time::Instant;

/// Throughput over one completed window.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsReport {
    /// How long the window actually lasted.
    pub window: Duration,
    /// Session loop iterations per second ("network fps").
    pub ticks_per_sec: f64,
    pub sent_per_sec: f64,
    pub received_per_sec: f64,
    /// Mean of `sent_per_sec` over every window so far, this one included.
    pub average_sent_per_sec: f64,
}

/// Rolling counters for one session.
#[derive(Debug, Clone)]
pub struct SessionStats {
    window: Duration,
    log_reports: bool,
    window_start: Option<Instant>,
    ticks: u64,
    sent: u64,
    received: u64,
    total_sent: u64,
    total_received: u64,
    windows: u64,
    average_sent_per_sec: f64,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl SessionStats {
    /// Stats reporting every `window`. A zero window is bumped to 1 ms.
    pub fn new(window: Duration) -> Self {
        Self {
            window: window.max(Duration::from_millis(1)),
            log_reports: true,
            window_start: None,
            ticks: 0,
            sent: 0,
            received: 0,
            total_sent: 0,
            total_received: 0,
            windows: 0,
            average_sent_per_sec: 0.0,
        }
    }

    /// Turns the per-window log line on or off. Reports are still returned.
    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.log_reports = enabled;
        self
    }

    pub fn record_sent(&mut self) {
        self.sent += 1;
        self.total_sent += 1;
    }

    pub fn record_received(&mut self) {
        self.received += 1;
        self.total_received += 1;
    }

    /// Counts one loop iteration at `now`.
    ///
    /// The first call opens the window. Returns a report once `now` is a
    /// full window past the window start, then starts a new window.
    pub fn on_tick(&mut self, now: Instant) -> Option<StatsReport> {
        let start = *self.window_start.get_or_insert(now);
        self.ticks += 1;

        let elapsed = now.saturating_duration_since(start);
        if elapsed < self.window {
            return None;
        }

        let secs = elapsed.as_secs_f64();
        let sent_per_sec = self.sent as f64 / secs;
        self.windows += 1;
        self.average_sent_per_sec +=
            (sent_per_sec - self.average_sent_per_sec) / self.windows as f64;

        let report = StatsReport {
            window: elapsed,
            ticks_per_sec: self.ticks as f64 / secs,
            sent_per_sec,
            received_per_sec: self.received as f64 / secs,
            average_sent_per_sec: self.average_sent_per_sec,
        };
        if self.log_reports {
            tracing::info!(
                target: "netplay::stats",
                fps = report.ticks_per_sec.round() as u64,
                sent = self.sent,
                received = self.received,
                average_sent = format!("{:.1}", report.average_sent_per_sec),
                "network stats"
            );
        }

        self.window_start = Some(now);
        self.ticks = 0;
        self.sent = 0;
        self.received = 0;
        Some(report)
    }

    pub fn total_sent(&self) -> u64 {
        self.total_sent
    }

    pub fn total_received(&self) -> u64 {
        self.total_received
    }

    /// Packets sent in the window so far.
    pub fn window_sent(&self) -> u64 {
        self.sent
    }

    pub fn average_sent_per_sec(&self) -> f64 {
        self.average_sent_per_sec
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_on_tick_reports_once_per_window() {
        let mut stats = SessionStats::new(Duration::from_secs(1)).with_logging(false);
        let t0 = Instant::now();

        assert!(stats.on_tick(t0).is_none());
        for _ in 0..10 {
            stats.record_sent();
        }
        stats.record_received();
        assert!(stats.on_tick(t0 + Duration::from_millis(500)).is_none());

        let report = stats.on_tick(t0 + Duration::from_secs(1)).unwrap();
        assert_eq!(report.window, Duration::from_secs(1));
        assert_eq!(report.ticks_per_sec, 3.0);
        assert_eq!(report.sent_per_sec, 10.0);
        assert_eq!(report.received_per_sec, 1.0);
        assert_eq!(report.average_sent_per_sec, 10.0);
    }

    #[test]
    fn test_on_tick_resets_window_and_keeps_totals() {
        let mut stats = SessionStats::new(Duration::from_secs(1)).with_logging(false);
        let t0 = Instant::now();
        stats.on_tick(t0);
        stats.record_sent();
        stats.on_tick(t0 + Duration::from_secs(1)).unwrap();

        assert_eq!(stats.window_sent(), 0);
        assert_eq!(stats.total_sent(), 1);
        assert!(stats.on_tick(t0 + Duration::from_millis(1500)).is_none());
    }

    #[test]
    fn test_running_average_spans_windows() {
        let mut stats = SessionStats::new(Duration::from_secs(1)).with_logging(false);
        let t0 = Instant::now();
        stats.on_tick(t0);

        for _ in 0..4 {
            stats.record_sent();
        }
        stats.on_tick(t0 + Duration::from_secs(1)).unwrap();

        for _ in 0..8 {
            stats.record_sent();
        }
        let report = stats.on_tick(t0 + Duration::from_secs(2)).unwrap();
        assert_eq!(report.sent_per_sec, 8.0);
        assert_eq!(report.average_sent_per_sec, 6.0);
    }

    #[test]
    fn test_zero_window_is_bumped() {
        let mut stats = SessionStats::new(Duration::ZERO).with_logging(false);
        let t0 = Instant::now();
        assert!(stats.on_tick(t0).is_none());
        assert!(stats.on_tick(t0 + Duration::from_millis(1)).is_some());
    }
}
