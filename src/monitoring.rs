//! Ambient Prometheus counters, independent of the scrape exporter itself.
//! Grounded in `original_source/rctmon/monitoring.py`'s `MON_*` definitions.

use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

pub struct Monitoring {
    pub registry: Registry,
    pub bytes_received: IntCounter,
    pub bytes_sent: IntCounter,
    pub frames_received: IntCounter,
    pub frames_sent: IntCounter,
    pub frames_lost: IntCounterVec,
    pub decode_errors: IntCounterVec,
    pub device_up: IntGauge,
    pub influx_points_written: IntCounter,
}

impl Monitoring {
    fn new() -> Self {
        let registry = Registry::new();

        let bytes_received = IntCounter::new("rctmon_bytes_received_total", "Bytes received from the inverter").unwrap();
        let bytes_sent = IntCounter::new("rctmon_bytes_sent_total", "Bytes sent to the inverter").unwrap();
        let frames_received = IntCounter::new("rctmon_frames_received_total", "Frames successfully decoded").unwrap();
        let frames_sent = IntCounter::new("rctmon_frames_sent_total", "Request frames sent").unwrap();
        let frames_lost = IntCounterVec::new(
            Opts::new("rctmon_frames_lost_total", "Requests that never received a response"),
            &["kind"],
        )
        .unwrap();
        let decode_errors = IntCounterVec::new(
            Opts::new("rctmon_decode_errors_total", "Frames rejected by the decoder"),
            &["kind"],
        )
        .unwrap();
        let device_up = IntGauge::new("rctmon_device_up", "1 while the TCP connection to the inverter is established").unwrap();
        let influx_points_written =
            IntCounter::new("rctmon_influx_points_written_total", "Points handed to the InfluxDB client").unwrap();

        registry.register(Box::new(bytes_received.clone())).unwrap();
        registry.register(Box::new(bytes_sent.clone())).unwrap();
        registry.register(Box::new(frames_received.clone())).unwrap();
        registry.register(Box::new(frames_sent.clone())).unwrap();
        registry.register(Box::new(frames_lost.clone())).unwrap();
        registry.register(Box::new(decode_errors.clone())).unwrap();
        registry.register(Box::new(device_up.clone())).unwrap();
        registry.register(Box::new(influx_points_written.clone())).unwrap();

        Self {
            registry,
            bytes_received,
            bytes_sent,
            frames_received,
            frames_sent,
            frames_lost,
            decode_errors,
            device_up,
            influx_points_written,
        }
    }

    pub fn record_decode_error(&self, kind: &str) {
        self.decode_errors.with_label_values(&[kind]).inc();
    }

    pub fn record_loss(&self, kind: &str, count: u64) {
        if count > 0 {
            self.frames_lost.with_label_values(&[kind]).inc_by(count);
        }
    }
}

/// Process-wide monitoring state. A single registry is shared by the scrape
/// exporter and by the decoder/scheduler/connection loop, matching the
/// module-level `MON_*` globals in `monitoring.py`.
pub static MONITORING: Lazy<Monitoring> = Lazy::new(Monitoring::new);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        assert_eq!(MONITORING.frames_received.get(), 0);
    }

    #[test]
    fn loss_counter_is_labeled_by_kind() {
        MONITORING.record_loss("normal", 2);
        MONITORING.record_loss("inventory", 1);
        assert_eq!(MONITORING.frames_lost.with_label_values(&["normal"]).get(), 2);
        assert_eq!(MONITORING.frames_lost.with_label_values(&["inventory"]).get(), 1);
    }
}
