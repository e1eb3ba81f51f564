//! Per-connection counters, latency aggregates, and periodic status
//! reporting. One [`Statistics`] lives per connection; it is reset to a
//! fresh window every time it emits a report.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::logger::{Logger, Severity};

const LOG_TARGET: &str = "msgsock::stats";

/// A snapshot emitted once per reporting window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Report {
    pub shorts: u64,
    pub crc_errs: u64,
    pub dt_errs: u64,
    pub seq_errs: u64,
    pub min_latency_ms: f64,
    pub max_latency_ms: f64,
    pub avg_latency_ms: f64,
    pub stddev_latency_ms: f64,
    pub recvd: u64,
    pub recv_rate: f64,
    pub send_errs: u64,
    pub send_timeouts: u64,
    pub sent: u64,
    pub send_rate: f64,
    pub elapsed: Duration,
}

impl Report {
    /// Escalates to error severity on any non-zero error counter, or a max
    /// latency exceeding `1000 * socket_timeout` seconds (the threshold is
    /// carried over unit-for-unit from the original logger; see DESIGN.md).
    fn severity(&self, socket_timeout: Duration) -> Severity {
        let any_errs = self.shorts > 0
            || self.crc_errs > 0
            || self.dt_errs > 0
            || self.seq_errs > 0
            || self.send_errs > 0
            || self.send_timeouts > 0;
        let threshold = 1000.0 * socket_timeout.as_secs_f64();
        if any_errs || self.max_latency_ms > threshold {
            Severity::Error
        } else {
            Severity::Debug
        }
    }

    /// Render the two-section `recv[...] send[...]` status line.
    pub fn format_line(&self, name: &str) -> String {
        format!(
            "status \"{name}\" recv[{} {} {} {} | {} {} {} {} | {} {}] send[{} {} | {} {}]",
            self.shorts,
            self.crc_errs,
            self.dt_errs,
            self.seq_errs,
            self.min_latency_ms as i64,
            self.max_latency_ms as i64,
            self.avg_latency_ms as i64,
            self.stddev_latency_ms as i64,
            self.recvd,
            self.recv_rate as i64,
            self.send_errs,
            self.send_timeouts,
            self.sent,
            self.send_rate as i64,
        )
    }
}

struct Window {
    shorts: u64,
    crc_errs: u64,
    dt_errs: u64,
    seq_errs: u64,
    send_errs: u64,
    send_timeouts: u64,
    recvd: u64,
    sent: u64,
    min_latency_ms: f64,
    max_latency_ms: f64,
    sum_latency_ms: f64,
    sum2_latency_ms: f64,
    recv_seq: Option<u32>,
    window_start: Instant,
}

impl Window {
    fn new() -> Self {
        Self {
            shorts: 0,
            crc_errs: 0,
            dt_errs: 0,
            seq_errs: 0,
            send_errs: 0,
            send_timeouts: 0,
            recvd: 0,
            sent: 0,
            min_latency_ms: f64::INFINITY,
            max_latency_ms: 0.0,
            sum_latency_ms: 0.0,
            sum2_latency_ms: 0.0,
            recv_seq: None,
            window_start: Instant::now(),
        }
    }

    fn report(&self, elapsed: Duration) -> Report {
        let elapsed_secs = elapsed.as_secs_f64().max(f64::MIN_POSITIVE);
        let min = if self.min_latency_ms.is_finite() { self.min_latency_ms } else { 0.0 };
        let avg = if self.recvd > 0 { self.sum_latency_ms / self.recvd as f64 } else { 0.0 };
        let stddev = if self.recvd > 0 {
            (self.sum2_latency_ms / self.recvd as f64 - avg * avg).max(0.0).sqrt()
        } else {
            0.0
        };
        Report {
            shorts: self.shorts,
            crc_errs: self.crc_errs,
            dt_errs: self.dt_errs,
            seq_errs: self.seq_errs,
            min_latency_ms: min,
            max_latency_ms: self.max_latency_ms,
            avg_latency_ms: avg,
            stddev_latency_ms: stddev,
            recvd: self.recvd,
            recv_rate: self.recvd as f64 / elapsed_secs,
            send_errs: self.send_errs,
            send_timeouts: self.send_timeouts,
            sent: self.sent,
            send_rate: self.sent as f64 / elapsed_secs,
            elapsed,
        }
    }
}

/// Thread-safe per-connection counters and latency aggregates.
pub struct Statistics {
    name: Mutex<String>,
    window: Mutex<Window>,
    status_interval: Duration,
    socket_timeout: Duration,
}

impl Statistics {
    pub fn new(name: impl Into<String>, status_interval: Duration, socket_timeout: Duration) -> Self {
        Self {
            name: Mutex::new(name.into()),
            window: Mutex::new(Window::new()),
            status_interval,
            socket_timeout,
        }
    }

    pub fn rename(&self, name: &str) {
        *self.name.lock().unwrap() = name.to_string();
    }

    /// Rename and start a fresh counting window, discarding whatever was
    /// folded in so far. Used once the handshake frame has been consumed,
    /// so the handshake itself never counts toward the connection's
    /// reported receive statistics.
    pub fn reset(&self, name: &str) {
        *self.name.lock().unwrap() = name.to_string();
        *self.window.lock().unwrap() = Window::new();
    }

    pub fn on_short(&self, logger: &dyn Logger) {
        self.window.lock().unwrap().shorts += 1;
        self.maybe_report(logger);
    }

    pub fn on_crc_err(&self, logger: &dyn Logger) {
        self.window.lock().unwrap().crc_errs += 1;
        self.maybe_report(logger);
    }

    pub fn on_dt_err(&self, logger: &dyn Logger) {
        self.window.lock().unwrap().dt_errs += 1;
        self.maybe_report(logger);
    }

    pub fn on_send_err(&self, logger: &dyn Logger) {
        self.window.lock().unwrap().send_errs += 1;
        self.maybe_report(logger);
    }

    pub fn on_send_timeout(&self, logger: &dyn Logger) {
        self.window.lock().unwrap().send_timeouts += 1;
        self.maybe_report(logger);
    }

    pub fn on_send_ok(&self, logger: &dyn Logger) {
        self.window.lock().unwrap().sent += 1;
        self.maybe_report(logger);
    }

    /// Checks sequence continuity and folds in a receive latency. The first
    /// valid inbound frame seeds `recv_seq` unconditionally; continuity is
    /// only checked from the second frame onward (see DESIGN.md).
    pub fn on_recv_ok(&self, seq: u32, latency_ms: f64, logger: &dyn Logger) {
        let mut w = self.window.lock().unwrap();
        if let Some(expected) = w.recv_seq {
            if seq != expected {
                w.seq_errs += 1;
            }
        }
        w.recv_seq = Some(seq.wrapping_add(1));

        w.recvd += 1;
        w.min_latency_ms = w.min_latency_ms.min(latency_ms);
        w.max_latency_ms = w.max_latency_ms.max(latency_ms);
        w.sum_latency_ms += latency_ms;
        w.sum2_latency_ms += latency_ms * latency_ms;
        drop(w);
        self.maybe_report(logger);
    }

    fn maybe_report(&self, logger: &dyn Logger) {
        let mut w = self.window.lock().unwrap();
        let elapsed = w.window_start.elapsed();
        if elapsed < self.status_interval {
            return;
        }
        let report = w.report(elapsed);
        *w = Window::new();
        drop(w);

        let name = self.name.lock().unwrap().clone();
        let severity = report.severity(self.socket_timeout);
        logger.log(severity, LOG_TARGET, &report.format_line(&name));
    }

    /// Force an immediate report regardless of the elapsed window, used by
    /// tests and by `Connection::shutdown` to flush a final status line.
    #[cfg(test)]
    pub fn force_report(&self, logger: &dyn Logger) -> Report {
        let mut w = self.window.lock().unwrap();
        let elapsed = w.window_start.elapsed();
        let report = w.report(elapsed);
        *w = Window::new();
        drop(w);
        let name = self.name.lock().unwrap().clone();
        let severity = report.severity(self.socket_timeout);
        logger.log(severity, LOG_TARGET, &report.format_line(&name));
        report
    }
}
