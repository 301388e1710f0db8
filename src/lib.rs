//! # rctmon
//!
//! A TCP monitoring daemon for RCT Power inverters: polls a device's binary
//! object protocol over a persistent connection, tracks managed-frame
//! schedules and loss, and exposes the resulting readings to Prometheus,
//! InfluxDB and MQTT.
//!
//! ## Architecture
//!
//! - [`frame`] - wire framing and CRC-checked decode/encode of the device's
//!   binary object protocol
//! - [`registry`] - static table of known object ids, their data types and
//!   decoding rules
//! - [`value`] - typed decoded values and the raw-byte-to-value conversions
//! - [`managed_frame`] - per-object polling schedule, eligibility and loss
//!   detection
//! - [`device_manager`] - owns the managed-frame table, dispatches decoded
//!   frames to setters and drives dynamic enrollment (generators, battery
//!   modules, power switch)
//! - [`setters`] - decoded-value to [`readings::Readings`] field assignment
//! - [`readings`] - the shared snapshot of the device's current state
//! - [`config`] - YAML configuration schema and loader
//! - [`monitoring`] - Prometheus counters and gauges describing the daemon
//!   itself
//! - [`exporters`] - Prometheus scrape endpoint, InfluxDB push and MQTT push
//! - [`daemon`] - the connection loop: connect/reconnect, scheduling tick,
//!   non-blocking I/O and decoder resync

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod config;
pub mod daemon;
pub mod device_manager;
pub mod exporters;
pub mod frame;
pub mod managed_frame;
pub mod monitoring;
pub mod readings;
pub mod registry;
pub mod setters;
pub mod value;

pub use config::RctMonConfig;
pub use daemon::Daemon;
pub use readings::Readings;
