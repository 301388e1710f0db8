//! Connection loop: owns the TCP socket, drives the scheduler, feeds
//! received bytes to the decoder and applies its resync heuristics.
//! Grounded in `original_source/rctmon/daemon.py`'s `Daemon` class
//! (`run`/`_socket_connect`/`_socket_disconnect`/`_handle_socket_read`/
//! `_handle_socket_writable`/`_handle_received_data`).

use std::io::{self, Read, Write};
use std::net::ToSocketAddrs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, info, warn};

use crate::config::DeviceConfig;
use crate::device_manager::DeviceManager;
use crate::frame::{Command, FrameError, ReceiveFrame};
use crate::monitoring::MONITORING;
use crate::readings::Readings;
use crate::registry;
use crate::value::DataType;

const CONNECT_RETRY_INTERVAL: Duration = Duration::from_secs(60);
const IDLE_TIMEOUT: Duration = Duration::from_secs(180);
const SCHEDULER_TICK: Duration = Duration::from_secs(1);
const READY_CHECK_BOUND: Duration = Duration::from_secs(1);
const SOCKET_TOKEN: Token = Token(0);
const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Disconnected,
    Connecting,
    Connected,
}

/// What a partially-consumed frame's resync check decided to do, per
/// spec.md §4.1's five recovery heuristics.
enum Resync {
    /// Keep accumulating this frame, nothing looked wrong yet.
    Continue,
    /// Drop the frame; the caller's reported `consumed_bytes` stands.
    Abort,
    /// Drop the frame and force the external buffer to advance by 2 bytes
    /// regardless of how much the decoder itself reported consuming.
    AbortSkip2,
}

fn is_fixed_width_numeric(dt: DataType) -> bool {
    matches!(dt, DataType::U8 | DataType::I8 | DataType::U16 | DataType::I16 | DataType::U32 | DataType::I32 | DataType::Float)
}

/// Applies spec.md §4.1's recovery heuristics to a frame that `consume()`
/// left in a non-`Complete` state. Checked after every chunk, mirroring
/// `daemon.py::_handle_received_data`'s post-`consume()` filter.
fn check_resync(frame: &ReceiveFrame) -> Resync {
    if frame.command == Command::NONE {
        return Resync::Continue;
    }
    if frame.command.is_plant() {
        warn!(target: "rctmon::frame", command = format!("{:#04X}", frame.command.0), "received plant command, not supported, aborting frame");
        return Resync::Abort;
    }
    if !frame.command.is_response_like() {
        warn!(target: "rctmon::frame", command = format!("{:#04X}", frame.command.0), "received non-response command, aborting frame");
        return Resync::Abort;
    }
    if frame.id == 0 {
        return Resync::Continue;
    }
    let Some(info) = registry::get_by_id(frame.id) else {
        warn!(target: "rctmon::frame", oid = format!("{:#X}", frame.id), "incomplete frame has unknown oid, aborting frame");
        return Resync::Abort;
    };
    if is_fixed_width_numeric(info.data_type) {
        if frame.frame_length > 30 || frame.consumed_bytes > 30 {
            warn!(target: "rctmon::frame", length = frame.frame_length, "numeric frame suspiciously long, aborting and skipping 2 bytes");
            return Resync::AbortSkip2;
        }
    } else if info.data_type == DataType::String && !frame.command.is_long() && frame.frame_length > 251 {
        warn!(target: "rctmon::frame", length = frame.frame_length, "string frame suspiciously long, aborting and skipping 2 bytes");
        return Resync::AbortSkip2;
    }
    Resync::Continue
}

/// Owns the socket, the managed-frame table (via [`DeviceManager`]) and the
/// send/receive buffers; drives the 1-second tick described in spec.md §4.3.
pub struct Daemon {
    device: DeviceConfig,
    state: ConnState,
    poll: Poll,
    stream: Option<TcpStream>,
    send_buf: Vec<u8>,
    recv_buf: Vec<u8>,
    current_frame: Option<ReceiveFrame>,
    device_manager: DeviceManager,
    readings: Arc<RwLock<Readings>>,
    last_connect_attempt: Option<Instant>,
    last_data_received: Instant,
    last_scheduler_tick: Option<Instant>,
    stop: Arc<AtomicBool>,
}

impl Daemon {
    pub fn new(device: DeviceConfig, stop: Arc<AtomicBool>) -> io::Result<Self> {
        Ok(Self {
            device,
            state: ConnState::Disconnected,
            poll: Poll::new()?,
            stream: None,
            send_buf: Vec::new(),
            recv_buf: Vec::new(),
            current_frame: None,
            device_manager: DeviceManager::new(),
            readings: Arc::new(RwLock::new(Readings::new())),
            last_connect_attempt: None,
            last_data_received: Instant::now(),
            stop,
            last_scheduler_tick: None,
        })
    }

    /// Shared handle exporters read from. Never written to outside this loop.
    pub fn readings(&self) -> Arc<RwLock<Readings>> {
        Arc::clone(&self.readings)
    }

    /// Wires the per-frame raw telemetry feed into the device manager, if an
    /// InfluxDB exporter is configured. Mirrors `daemon.py` passing its
    /// `influx` instance down into `DeviceManager`'s constructor.
    pub fn set_raw_sink(&mut self, sink: Arc<dyn crate::device_manager::RawPointSink>) {
        self.device_manager.set_raw_sink(sink);
    }

    fn connect(&mut self) {
        self.last_connect_attempt = Some(Instant::now());
        let addr = match (self.device.host.as_str(), self.device.port).to_socket_addrs().ok().and_then(|mut a| a.next()) {
            Some(addr) => addr,
            None => {
                warn!(target: "rctmon::socket", host = %self.device.host, "failed to resolve device address");
                return;
            }
        };
        debug!(target: "rctmon::socket", %addr, "connecting");
        match TcpStream::connect(addr) {
            Ok(mut stream) => {
                if self.poll.registry().register(&mut stream, SOCKET_TOKEN, Interest::READABLE | Interest::WRITABLE).is_err() {
                    warn!(target: "rctmon::socket", "failed to register socket with poller");
                    return;
                }
                self.stream = Some(stream);
                self.state = ConnState::Connecting;
            }
            Err(e) => warn!(target: "rctmon::socket", error = %e, "connect failed"),
        }
    }

    fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = self.poll.registry().deregister(&mut stream);
        }
        self.send_buf.clear();
        self.recv_buf.clear();
        self.current_frame = None;
        self.state = ConnState::Disconnected;
        self.device_manager.reset();
        if let Ok(mut r) = self.readings.write() {
            *r = Readings::new();
        }
        MONITORING.device_up.set(0);
        info!(target: "rctmon::socket", "disconnected");
    }

    /// Runs until the stop flag is set. Returns after closing the socket.
    pub fn run(&mut self) {
        info!(target: "rctmon::daemon", "starting main loop");
        let mut events = Events::with_capacity(8);

        while !self.stop.load(Ordering::Relaxed) {
            let now = Instant::now();
            match self.state {
                ConnState::Disconnected => {
                    MONITORING.device_up.set(0);
                    let due = match self.last_connect_attempt {
                        None => true,
                        Some(t) => now.saturating_duration_since(t) >= CONNECT_RETRY_INTERVAL,
                    };
                    if due {
                        self.connect();
                    }
                    std::thread::sleep(Duration::from_secs(1));
                    continue;
                }
                ConnState::Connecting => {
                    if let Err(e) = self.poll.poll(&mut events, Some(READY_CHECK_BOUND)) {
                        warn!(target: "rctmon::socket", error = %e, "poll failed while connecting");
                        continue;
                    }
                    for event in events.iter() {
                        if event.token() != SOCKET_TOKEN {
                            continue;
                        }
                        let err = self.stream.as_ref().and_then(|s| s.take_error().ok()).flatten();
                        if event.is_error() || err.is_some() {
                            warn!(target: "rctmon::socket", "connect failed");
                            self.disconnect();
                        } else if event.is_writable() {
                            self.state = ConnState::Connected;
                            self.last_data_received = Instant::now();
                            MONITORING.device_up.set(1);
                            info!(target: "rctmon::socket", "connection established");
                        }
                    }
                    continue;
                }
                ConnState::Connected => {}
            }

            if now.saturating_duration_since(self.last_data_received) >= IDLE_TIMEOUT {
                warn!(target: "rctmon::socket", "no data received for 180 seconds, disconnecting");
                self.disconnect();
                continue;
            }

            let due = match self.last_scheduler_tick {
                None => true,
                Some(t) => now.saturating_duration_since(t) >= SCHEDULER_TICK,
            };
            if due {
                self.last_scheduler_tick = Some(now);
                let (payload, outcome) = self.device_manager.payloads(now);
                self.send_buf.extend_from_slice(&payload);
                MONITORING.frames_sent.inc_by(outcome.frames_sent);
                MONITORING.record_loss("normal", outcome.normal_losses);
                MONITORING.record_loss("inventory", outcome.inventory_losses);
            }

            if self.poll.poll(&mut events, Some(READY_CHECK_BOUND)).is_err() {
                continue;
            }

            let mut should_disconnect = false;
            for event in events.iter() {
                if event.token() != SOCKET_TOKEN {
                    continue;
                }
                if event.is_error() {
                    warn!(target: "rctmon::socket", "socket exception from poll, disconnecting");
                    should_disconnect = true;
                    break;
                }
                if event.is_readable() && !self.handle_readable() {
                    should_disconnect = true;
                    break;
                }
                if event.is_writable() {
                    self.handle_writable();
                }
            }
            if should_disconnect {
                self.disconnect();
                continue;
            }

            if !self.recv_buf.is_empty() {
                self.last_data_received = Instant::now();
                self.handle_received_data(Instant::now());
            }

            // Publish the freshest snapshot for the scrape/push adapters.
            if let Ok(mut shared) = self.readings.write() {
                *shared = self.device_manager.readings.clone();
            }
        }

        info!(target: "rctmon::daemon", "stop requested, shutting down");
        self.disconnect();
    }

    /// Returns `false` if the connection should be torn down (peer closed
    /// or a hard socket error occurred), matching `_handle_socket_read`.
    fn handle_readable(&mut self) -> bool {
        let Some(stream) = self.stream.as_mut() else { return false };
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => {
                    warn!(target: "rctmon::socket", "socket disconnected (empty recv)");
                    return false;
                }
                Ok(n) => {
                    MONITORING.bytes_received.inc_by(n as u64);
                    self.recv_buf.extend_from_slice(&buf[..n]);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return true,
                Err(e) => {
                    warn!(target: "rctmon::socket", error = %e, "socket read error");
                    return false;
                }
            }
        }
    }

    fn handle_writable(&mut self) {
        if self.send_buf.is_empty() {
            return;
        }
        let Some(stream) = self.stream.as_mut() else { return };
        match stream.write(&self.send_buf) {
            Ok(0) => warn!(target: "rctmon::socket", "socket disconnected (no data sent)"),
            Ok(n) => {
                MONITORING.bytes_sent.inc_by(n as u64);
                self.send_buf.drain(..n);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => warn!(target: "rctmon::socket", error = %e, "socket write error"),
        }
    }

    /// Drains `self.recv_buf` into complete frames, applying the decoder's
    /// error classification and resync heuristics, per spec.md §4.1 and §7.
    fn handle_received_data(&mut self, now: Instant) {
        while !self.recv_buf.is_empty() {
            let frame = self.current_frame.get_or_insert_with(ReceiveFrame::new);
            let consumed = match frame.consume(&self.recv_buf) {
                Ok(n) => n,
                Err(e) => {
                    warn!(target: "rctmon::frame", kind = e.kind(), "frame decode error, dropping");
                    MONITORING.record_decode_error(e.kind());
                    let n = e.consumed_bytes();
                    self.current_frame = None;
                    self.recv_buf.drain(..n.min(self.recv_buf.len()));
                    continue;
                }
            };

            let frame_ref = self.current_frame.as_ref().expect("just inserted");
            if frame_ref.complete() {
                MONITORING.frames_received.inc();
                let frame = self.current_frame.take().expect("checked complete");
                self.device_manager.on_frame(&frame, now);
                self.recv_buf.drain(..consumed);
                continue;
            }

            let consumed = match check_resync(frame_ref) {
                Resync::Continue => consumed,
                Resync::Abort => {
                    self.current_frame = None;
                    consumed
                }
                Resync::AbortSkip2 => {
                    self.current_frame = None;
                    2
                }
            };
            if consumed == 0 {
                // Nothing decoded and nothing to skip: the frame is waiting
                // on more bytes than `recv_buf` currently holds.
                break;
            }
            self.recv_buf.drain(..consumed.min(self.recv_buf.len()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Command as FrameCommand;

    fn crc16(body: &[u8]) -> u16 {
        use crc::{Crc, CRC_16_IBM_3740};
        Crc::<u16>::new(&CRC_16_IBM_3740).checksum(body)
    }

    fn valid_response_frame(id: u32, data: &[u8]) -> Vec<u8> {
        let mut body = vec![FrameCommand::RESPONSE.0];
        let len = (4 + data.len()) as u16;
        body.extend_from_slice(&len.to_be_bytes());
        body.extend_from_slice(&id.to_be_bytes());
        body.extend_from_slice(data);
        let crc = crc16(&body);
        let mut framed = vec![crate::frame::START];
        for &b in &body {
            if b == crate::frame::START || b == crate::frame::ESCAPE {
                framed.push(crate::frame::ESCAPE);
                framed.push(b ^ 0x20);
            } else {
                framed.push(b);
            }
        }
        for &b in &crc.to_be_bytes() {
            if b == crate::frame::START || b == crate::frame::ESCAPE {
                framed.push(crate::frame::ESCAPE);
                framed.push(b ^ 0x20);
            } else {
                framed.push(b);
            }
        }
        framed
    }

    #[test]
    fn resync_skips_two_bytes_on_oversized_numeric_frame() {
        let numeric_oid = registry::get_by_name("prim_sm.state").unwrap().id;
        let mut body = vec![FrameCommand::RESPONSE.0];
        body.extend_from_slice(&500u16.to_be_bytes()); // declared length far beyond 30
        body.extend_from_slice(&numeric_oid.to_be_bytes());
        let mut framed = vec![crate::frame::START];
        framed.extend_from_slice(&body);
        let mut frame = ReceiveFrame::new();
        let _ = frame.consume(&framed);
        assert!(!frame.complete());
        assert!(matches!(check_resync(&frame), Resync::AbortSkip2));
    }

    #[test]
    fn resync_aborts_plant_command() {
        let mut framed = vec![crate::frame::START, FrameCommand::PLANT_READ.0];
        framed.extend_from_slice(&4u16.to_be_bytes());
        let mut frame = ReceiveFrame::new();
        let _ = frame.consume(&framed);
        assert!(matches!(check_resync(&frame), Resync::Abort));
    }

    #[test]
    fn handle_received_data_decodes_frame_end_to_end() {
        let stop = Arc::new(AtomicBool::new(false));
        let mut daemon = Daemon::new(DeviceConfig { host: "127.0.0.1".into(), port: 8899 }, stop).unwrap();
        let oid = registry::get_by_name("android_description").unwrap().id;
        let framed = valid_response_frame(oid, b"RCT-Power-Storage\0");
        daemon.recv_buf.extend_from_slice(&framed);
        daemon.handle_received_data(Instant::now());
        assert_eq!(daemon.device_manager.name.as_deref(), Some("RCT-Power-Storage"));
        assert!(daemon.recv_buf.is_empty());
    }

    #[test]
    fn handle_received_data_recovers_after_corrupted_frame() {
        let stop = Arc::new(AtomicBool::new(false));
        let mut daemon = Daemon::new(DeviceConfig { host: "127.0.0.1".into(), port: 8899 }, stop).unwrap();
        let oid = registry::get_by_name("android_description").unwrap().id;

        let good = valid_response_frame(oid, b"RCT-Power-Storage\0");
        let numeric_oid = registry::get_by_name("prim_sm.state").unwrap().id;
        let mut corrupt_body = vec![FrameCommand::RESPONSE.0];
        corrupt_body.extend_from_slice(&500u16.to_be_bytes());
        corrupt_body.extend_from_slice(&numeric_oid.to_be_bytes());
        let mut corrupt = vec![crate::frame::START];
        corrupt.extend_from_slice(&corrupt_body);

        let second = valid_response_frame(registry::get_by_name("inverter_sn").unwrap().id, b"SN-123\0");

        let mut all = Vec::new();
        all.extend_from_slice(&good);
        all.extend_from_slice(&corrupt);
        all.extend_from_slice(&second);

        daemon.recv_buf.extend_from_slice(&all);
        daemon.handle_received_data(Instant::now());
        assert!(daemon.recv_buf.is_empty(), "decoder must not hang on corrupt input");
        assert_eq!(daemon.device_manager.name.as_deref(), Some("RCT-Power-Storage"));
    }
}
