//! Entry point: loads configuration, wires up the exporters and runs the
//! connection loop until asked to stop. Grounded in
//! `original_source/rctmon/cli.py` for the flag surface and
//! `original_source/rctmon/logging.py` for the logging setup.

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{App, Arg};
use tracing::{error, info};

use rctmon::config::RctMonConfig;
use rctmon::daemon::Daemon;
use rctmon::exporters::{influx::InfluxExporter, mqtt::MqttExporter, scrape};

fn init_logging(debug: bool, frame_debug: bool) {
    use tracing_subscriber::EnvFilter;

    let default_directive = if frame_debug {
        "rctmon=debug,rctmon::frame=trace"
    } else if debug {
        "rctmon=debug"
    } else {
        "rctmon=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run(config_path: &str, debug: bool, frame_debug: bool) -> anyhow::Result<()> {
    init_logging(debug, frame_debug);

    let config = RctMonConfig::load(config_path)?;
    info!(path = config_path, "configuration loaded");

    let stop = Arc::new(AtomicBool::new(false));
    let stop_for_signal = Arc::clone(&stop);
    signal_hook::flag::register(signal_hook::consts::SIGTERM, stop_for_signal)?;

    let mut daemon = Daemon::new(config.device, stop)?;
    let readings = daemon.readings();

    if config.prometheus.enable {
        info!(
            address = %config.prometheus.bind_address,
            port = config.prometheus.bind_port,
            "prometheus endpoint starting"
        );
        scrape::spawn(&config.prometheus.bind_address, config.prometheus.bind_port, Arc::clone(&readings))?;
    }

    if let Some(influx) = InfluxExporter::new(&config.influxdb) {
        info!("influxdb push exporter enabled");
        let influx = Arc::new(influx);
        daemon.set_raw_sink(Arc::clone(&influx) as Arc<dyn rctmon::device_manager::RawPointSink>);
        rctmon::exporters::influx::spawn(influx, Arc::clone(&readings));
    }

    if let Some((mqtt, eventloop)) = MqttExporter::new(&config.mqtt) {
        info!(host = ?config.mqtt.mqtt_host, "mqtt push exporter enabled");
        let flush_interval = std::time::Duration::from_secs(config.mqtt.flush_interval_seconds);
        rctmon::exporters::mqtt::spawn(Arc::new(mqtt), eventloop, Arc::clone(&readings), flush_interval);
    }

    daemon.run();
    info!("graceful shutdown complete");
    Ok(())
}

fn main() -> ExitCode {
    let matches = App::new("rctmon")
        .about("TCP monitoring daemon for RCT Power inverters")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .takes_value(true)
                .default_value("/etc/rctmon.yml")
                .help("Configuration file"),
        )
        .arg(Arg::with_name("debug").short("d").long("debug").help("Enable debug output"))
        .arg(
            Arg::with_name("frame-debug")
                .long("frame-debug")
                .help("Enable frame debugging (requires --debug)"),
        )
        .get_matches();

    let config_path = matches.value_of("config").unwrap_or("/etc/rctmon.yml");
    let debug = matches.is_present("debug");
    let frame_debug = matches.is_present("frame-debug");

    match run(config_path, debug, frame_debug) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal error");
            ExitCode::FAILURE
        }
    }
}
