//! MQTT push exporter: publishes each metric under a topic built from its
//! family name and labels. Grounded in `original_source/rctmon/mqtt.py`'s
//! `flush()`: `base_topic = metric.name.replace("_", "/")`, then one path
//! segment `"{label}_{value}"` per kept label appended with `/`. The
//! original skips a label named `inverter` from the topic path (it is
//! already implied by the client's configured prefix); that intent is
//! preserved here even though the original's `ignored_labels` tuple was
//! written as a bare string and so iterated per-character instead of
//! comparing to the whole label name (see DESIGN.md).

use std::sync::{Arc, RwLock};
use std::time::Duration;

use rumqttc::{AsyncClient, MqttOptions, QoS};
use tracing::{error, info};

use crate::config::MqttConfig;
use crate::exporters::metric_points;
use crate::readings::Readings;

const IGNORED_LABEL: &str = "inverter";

/// Builds the MQTT topic for one metric point: `<prefix>/<metric-tail>/
/// <label>_<value>/...`, per spec.md §4.7. The family name's underscores
/// become path segments (`battery_soc` → `battery/soc`), and each kept
/// label is rendered as a single `key_value` segment, skipping `inverter`
/// (it is already implied by the configured prefix).
fn topic_for(prefix: &str, family: &str, labels: &[(&'static str, String)]) -> String {
    let mut parts = vec![prefix.to_string()];
    parts.extend(family.split('_').map(str::to_string));
    for (key, value) in labels {
        if *key == IGNORED_LABEL {
            continue;
        }
        parts.push(format!("{key}_{value}"));
    }
    parts.join("/")
}

pub struct MqttExporter {
    client: AsyncClient,
    topic_prefix: String,
    retain: bool,
}

impl MqttExporter {
    pub fn new(config: &MqttConfig) -> Option<(Self, rumqttc::EventLoop)> {
        if !config.enable {
            return None;
        }
        let host = config.mqtt_host.as_deref()?;
        let mut options = MqttOptions::new(config.client_name.clone(), host, config.mqtt_port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(user), Some(pass)) = (&config.auth_user, &config.auth_pass) {
            use secrecy::ExposeSecret;
            options.set_credentials(user.clone(), pass.expose_secret().clone());
        }
        let (client, eventloop) = AsyncClient::new(options, 10);
        Some((Self { client, topic_prefix: config.topic_prefix.clone(), retain: config.mqtt_retain }, eventloop))
    }

    pub async fn publish_snapshot(&self, readings: &Readings) {
        for point in metric_points(readings) {
            let topic = topic_for(&self.topic_prefix, &point.family, &point.labels);
            if let Err(e) = self.client.publish(topic, QoS::AtMostOnce, self.retain, point.value).await {
                error!(error = %e, "mqtt publish failed");
            }
        }
    }
}

/// Drives the connection event loop and periodic publish on a dedicated
/// thread, decoupled from the connection loop's own tick rate.
pub fn spawn(exporter: Arc<MqttExporter>, mut eventloop: rumqttc::EventLoop, readings: Arc<RwLock<Readings>>, flush_interval: Duration) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("rctmon-mqtt".into())
        .spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().expect("failed to build mqtt runtime");
            rt.block_on(async move {
                let exporter_for_poll = Arc::clone(&exporter);
                tokio::spawn(async move {
                    loop {
                        if eventloop.poll().await.is_err() {
                            break;
                        }
                    }
                    drop(exporter_for_poll);
                });

                loop {
                    tokio::time::sleep(flush_interval).await;
                    let snapshot = readings.read().expect("readings lock poisoned").clone();
                    exporter.publish_snapshot(&snapshot).await;
                }
            });
            info!("mqtt exporter stopped");
        })
        .expect("failed to spawn mqtt exporter thread")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverter_label_is_skipped_from_topic() {
        let labels = [("inverter", "SN123".to_string()), ("index", "0".to_string())];
        let topic = topic_for("rctmon", "battery_soc", &labels);
        assert_eq!(topic, "rctmon/battery/soc/index_0");
    }

    #[test]
    fn topic_with_no_extra_labels_is_just_prefix_and_split_family() {
        let labels = [("inverter", "SN123".to_string())];
        let topic = topic_for("rctmon", "grid_frequency", &labels);
        assert_eq!(topic, "rctmon/grid/frequency");
    }
}
