//! InfluxDB push exporter: collects readings every 5 seconds, flushes every
//! 5 seconds, best-effort. Grounded in `original_source/rctmon/influx.py`'s
//! `InfluxDB` wrapper (`add_points`/`flush`).

use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use influxdb2::models::DataPoint;
use influxdb2::Client;
use secrecy::ExposeSecret;
use tracing::{error, warn};

use crate::config::InfluxDbConfig;
use crate::device_manager::RawPointSink;
use crate::monitoring::MONITORING;
use crate::readings::Readings;
use crate::value::Value;

pub const COLLECT_INTERVAL: Duration = Duration::from_secs(5);
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(5);

pub struct InfluxExporter {
    client: Client,
    bucket: String,
    buffer: Mutex<Vec<DataPoint>>,
}

impl InfluxExporter {
    pub fn new(config: &InfluxDbConfig) -> Option<Self> {
        if !config.enable {
            return None;
        }
        let (url, token, org, bucket) = match (&config.url, &config.token, &config.org, &config.bucket) {
            (Some(url), Some(token), Some(org), Some(bucket)) => (url, token, org, bucket),
            _ => {
                warn!("influxdb.enable is true but url/token/org/bucket are incomplete, disabling exporter");
                return None;
            }
        };
        let client = Client::new(url, org, token.expose_secret());
        Some(Self { client, bucket: bucket.clone(), buffer: Mutex::new(Vec::new()) })
    }

    /// Builds data points from the current snapshot and stages them for the
    /// next flush. Mirrors `collect()` building one measurement point set per
    /// tick; unlike the original, the points-written counter is always
    /// exposed (see DESIGN.md's OQ-5 decision).
    pub fn collect(&self, readings: &Readings) {
        let mut points = Vec::new();
        let inverter = readings.serial_number.as_deref().unwrap_or("unknown");

        macro_rules! field {
            ($measurement:expr, $field:expr, $opt:expr) => {
                if let Some(v) = $opt {
                    if let Ok(p) = DataPoint::builder($measurement).tag("inverter", inverter).field($field, v as f64).build() {
                        points.push(p);
                    }
                }
            };
        }

        field!("temperature", "heatsink", readings.temperature_heatsink);
        field!("temperature", "heatsink_batt", readings.temperature_heatsink_batt);
        field!("temperature", "core", readings.temperature_core);
        field!("household", "load_total", readings.household.load_total);
        field!("grid", "power_total", readings.grid.power_total);
        field!("grid", "frequency", readings.grid.frequency);
        field!("battery", "soc", readings.battery.soc);
        field!("battery", "voltage", readings.battery.voltage);
        field!("battery", "power", readings.battery.battery_power);

        if points.is_empty() {
            return;
        }
        let mut buffer = self.buffer.lock().expect("influx buffer lock poisoned");
        MONITORING.influx_points_written.inc_by(points.len() as u64);
        buffer.extend(points);
    }

    /// Pushes one raw decoded value into the same buffer flushed by
    /// [`Self::flush`]. Mirrors `device_manager.py::_influx_raw`: measurement
    /// `raw_data`, tagged by inverter/oid/name, with a field named by the
    /// value's own type rather than a single shared field.
    fn push_raw_point(&self, inverter: &str, oid: u32, name: &str, value: &Value) {
        let builder = DataPoint::builder("raw_data")
            .tag("inverter", inverter)
            .tag("oid", format!("{oid:#X}"))
            .tag("name", name);
        let built = match value {
            Value::Bool(v) => builder.field("value_bool", *v).build(),
            Value::Float(v) => builder.field("value_float", *v as f64).build(),
            Value::String(v) => builder.field("value_string", v.clone()).build(),
            Value::U8(v) => builder.field("value_int", *v as i64).build(),
            Value::I8(v) => builder.field("value_int", *v as i64).build(),
            Value::U16(v) => builder.field("value_int", *v as i64).build(),
            Value::I16(v) => builder.field("value_int", *v as i64).build(),
            Value::U32(v) => builder.field("value_int", *v as i64).build(),
            Value::I32(v) => builder.field("value_int", *v as i64).build(),
        };
        match built {
            Ok(point) => {
                let mut buffer = self.buffer.lock().expect("influx buffer lock poisoned");
                MONITORING.influx_points_written.inc();
                buffer.push(point);
            }
            Err(e) => warn!(error = %e, oid = format!("{oid:#X}"), "failed to build raw influx point"),
        }
    }

    /// Pushes any buffered points. Losing a flush (network error) drops the
    /// batch rather than retrying, per spec.md §4.7's "best-effort, lossy".
    pub async fn flush(&self) {
        let batch = {
            let mut buffer = self.buffer.lock().expect("influx buffer lock poisoned");
            std::mem::take(&mut *buffer)
        };
        if batch.is_empty() {
            return;
        }
        if let Err(e) = self.client.write(&self.bucket, futures::stream::iter(batch)).await {
            error!(error = %e, "influxdb flush failed, batch dropped");
        }
    }
}

impl RawPointSink for InfluxExporter {
    fn push_raw(&self, inverter: &str, oid: u32, name: &str, value: &Value) {
        self.push_raw_point(inverter, oid, name, value);
    }
}

/// Runs the periodic collect+flush loop on a dedicated thread with its own
/// tokio runtime, independent of the connection loop's tick rate.
pub fn spawn(exporter: Arc<InfluxExporter>, readings: Arc<RwLock<Readings>>) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("rctmon-influx".into())
        .spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().expect("failed to build influx runtime");
            rt.block_on(async move {
                let mut last_collect = Instant::now();
                let mut last_flush = Instant::now();
                loop {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    let now = Instant::now();
                    if now.duration_since(last_collect) >= COLLECT_INTERVAL {
                        let snapshot = readings.read().expect("readings lock poisoned").clone();
                        exporter.collect(&snapshot);
                        last_collect = now;
                    }
                    if now.duration_since(last_flush) >= FLUSH_INTERVAL {
                        exporter.flush().await;
                        last_flush = now;
                    }
                }
            });
        })
        .expect("failed to spawn influx exporter thread")
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::Secret;

    fn test_exporter() -> InfluxExporter {
        let config = InfluxDbConfig {
            enable: true,
            url: Some("http://localhost:8086".to_string()),
            token: Some(Secret::new("test-token".to_string())),
            org: Some("test-org".to_string()),
            bucket: Some("test-bucket".to_string()),
        };
        InfluxExporter::new(&config).expect("config is complete")
    }

    #[test]
    fn push_raw_buffers_one_point_per_call() {
        let exporter = test_exporter();
        exporter.push_raw("SN123", 0xABCD, "battery.soc", &Value::Float(42.5));
        exporter.push_raw("SN123", 0xABCE, "prim_sm.state", &Value::U32(3));
        assert_eq!(exporter.buffer.lock().unwrap().len(), 2);
    }

    #[test]
    fn push_raw_accepts_every_value_variant() {
        let exporter = test_exporter();
        exporter.push_raw("SN123", 1, "a", &Value::Bool(true));
        exporter.push_raw("SN123", 2, "b", &Value::String("hi".to_string()));
        exporter.push_raw("SN123", 3, "c", &Value::I32(-7));
        assert_eq!(exporter.buffer.lock().unwrap().len(), 3);
    }
}
