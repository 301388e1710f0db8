//! Device manager: inventory-driven dispatcher tying the managed-frame
//! table, the object registry and the readings model together. Grounded in
//! `original_source/rctmon/device_manager.py` and
//! `original_source/rctmon/battery_manager.py`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::frame::ReceiveFrame;
use crate::managed_frame::{FrameTable, SchedulerOutcome};
use crate::readings::{BatteryModule, Readings};
use crate::registry;
use crate::setters::{self, Generator, Phase, Setter};
use crate::value::Value;

/// Narrow interface for the per-frame high-resolution telemetry feed into
/// InfluxDB, mirroring `device_manager.py::_influx_raw`: every value decoded
/// off the wire, not just the curated periodic collector's fields, is
/// pushed tagged by its object id and name. Kept as a trait so the core
/// dispatcher doesn't depend on the `influxdb2` exporter directly — only
/// whichever exporter is wired in via [`DeviceManager::set_raw_sink`] needs
/// to know about InfluxDB specifically.
pub trait RawPointSink: Send + Sync {
    fn push_raw(&self, inverter: &str, oid: u32, name: &str, value: &Value);
}

/// Fixed mapping from battery module stack index to its serial and
/// cycle-count object names, mirroring `BAT_IDS_MODULE_SN`/`BAT_IDS_CYCLES`
/// in `battery_manager.py`. Kept as data (not logic) since duplicating the
/// literal index↔id pairing is a wire-format fact, not a design choice.
const BATTERY_MODULE_SN_NAMES: [&str; 7] = [
    "battery.module_sn[0]",
    "battery.module_sn[1]",
    "battery.module_sn[2]",
    "battery.module_sn[3]",
    "battery.module_sn[4]",
    "battery.module_sn[5]",
    "battery.module_sn[6]",
];
const BATTERY_STACK_CYCLES_NAMES: [&str; 7] = [
    "battery.stack_cycles[0]",
    "battery.stack_cycles[1]",
    "battery.stack_cycles[2]",
    "battery.stack_cycles[3]",
    "battery.stack_cycles[4]",
    "battery.stack_cycles[5]",
    "battery.stack_cycles[6]",
];

/// Handlers that only write a single leaf go through [`Setter`]. Handlers
/// that may also enroll further managed frames get their own variant and are
/// special-cased in [`DeviceManager::on_frame`], per spec.md §4.4.
#[derive(Debug, Clone, Copy)]
enum Callback {
    Setter(Setter),
    AndroidDescription,
    GeneratorEnabled(Generator),
    PowerSwitchAvailable,
    BatteryType,
    BatteryModuleSn(usize),
}

pub struct DeviceManager {
    frames: FrameTable,
    callbacks: HashMap<u32, Callback>,
    pub readings: Readings,
    pub name: Option<String>,
    have_name: bool,
    have_battery: Option<bool>,
    raw_sink: Option<Arc<dyn RawPointSink>>,
}

impl DeviceManager {
    pub fn new() -> Self {
        let mut dm = Self {
            frames: FrameTable::new(),
            callbacks: HashMap::new(),
            readings: Readings::new(),
            name: None,
            have_name: false,
            have_battery: None,
            raw_sink: None,
        };
        // Bootstrap: the device description is requested with interval 0
        // (inventory) and is never cleared on disconnect so rediscovery can
        // restart cleanly, per spec.md §3 Lifecycle.
        dm.add_one("android_description", Duration::ZERO, false, true, Callback::AndroidDescription);
        dm
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Wires in the high-resolution per-frame telemetry feed, mirroring
    /// `device_manager.py`'s `self._influx = influx` constructor argument.
    /// Left unset, `on_frame` simply skips the raw push (matching the
    /// original's own `if self._influx is not None` guard).
    pub fn set_raw_sink(&mut self, sink: Arc<dyn RawPointSink>) {
        self.raw_sink = Some(sink);
    }

    fn add_one(&mut self, name: &str, interval: Duration, tracked_as_inventory: bool, is_inventory: bool, cb: Callback) {
        match registry::get_by_name(name) {
            Some(oinfo) => {
                self.frames.enroll(oinfo, interval, tracked_as_inventory, is_inventory);
                self.callbacks.insert(oinfo.id, cb);
            }
            None => warn!(target: "rctmon::registry", name, "failed to enroll: not found in registry"),
        }
    }

    fn add_simple(&mut self, names: &[(&str, Setter)], interval: Duration) {
        for (name, setter) in names {
            self.add_one(name, interval, true, false, Callback::Setter(*setter));
        }
    }

    /// Scheduler tick: builds the batched request payload for this second.
    pub fn payloads(&mut self, now: Instant) -> (Vec<u8>, SchedulerOutcome) {
        self.frames.payloads(now)
    }

    /// Resets to the bootstrap state: only the description frame remains,
    /// the readings snapshot is cleared. Called on disconnect.
    pub fn reset(&mut self) {
        self.frames.clear_inventory();
        self.readings = Readings::new();
        self.name = None;
        self.have_name = false;
        self.have_battery = None;
        // keep only the bootstrap callback
        let boot_id = registry::get_by_name("android_description").map(|o| o.id);
        self.callbacks.retain(|id, _| Some(*id) == boot_id);
    }

    /// Dispatches a fully decoded frame: marks arrival and invokes the
    /// registered handler, per spec.md §4.4.
    pub fn on_frame(&mut self, frame: &ReceiveFrame, now: Instant) {
        if !self.frames.contains(frame.id) {
            warn!(target: "rctmon::dispatch", oid = format!("{:#X}", frame.id), "unexpected object id, dropping");
            return;
        }
        let value = match frame.decode() {
            Some(Ok(v)) => v,
            Some(Err(e)) => {
                warn!(target: "rctmon::dispatch", oid = format!("{:#X}", frame.id), error = %e, "payload decode error");
                crate::monitoring::MONITORING.record_decode_error("payload");
                return;
            }
            None => {
                warn!(target: "rctmon::dispatch", oid = format!("{:#X}", frame.id), "id has no registry entry");
                return;
            }
        };
        self.frames.mark_arrival(frame.id, now);

        // Per-frame raw telemetry push, matching `on_frame`'s
        // `if self.have_name: self._influx_raw(frame.id, value)` placed
        // before dispatch to the registered handler.
        if self.have_name {
            if let (Some(sink), Some(inverter)) = (&self.raw_sink, &self.name) {
                match registry::get_by_id(frame.id) {
                    Some(oinfo) => sink.push_raw(inverter, frame.id, oinfo.name, &value),
                    None => warn!(target: "rctmon::dispatch", oid = format!("{:#X}", frame.id), "raw push: id has no registry entry"),
                }
            }
        }

        let cb = self.callbacks.get(&frame.id).copied();
        match cb {
            None => warn!(target: "rctmon::dispatch", oid = format!("{:#X}", frame.id), "no handler registered"),
            Some(Callback::Setter(setter)) => {
                if let Err(e) = setters::apply(&mut self.readings, setter, &value) {
                    warn!(target: "rctmon::dispatch", oid = format!("{:#X}", frame.id), error = %e, "handler type mismatch");
                }
            }
            Some(Callback::AndroidDescription) => self.handle_android_description(value),
            Some(Callback::GeneratorEnabled(g)) => self.handle_generator_enabled(g, value),
            Some(Callback::PowerSwitchAvailable) => self.handle_power_switch_available(value),
            Some(Callback::BatteryType) => self.handle_battery_type(value),
            Some(Callback::BatteryModuleSn(idx)) => self.handle_battery_module_sn(idx, value),
        }
    }

    fn set_name(&mut self, name: &str) {
        let trimmed = name.trim();
        self.name = Some(if trimmed.is_empty() { "UNKNOWN".to_string() } else { trimmed.to_string() });
        self.have_name = true;
    }

    fn handle_android_description(&mut self, value: Value) {
        let Ok(name) = value.as_str() else {
            warn!(target: "rctmon::dispatch", "android_description had unexpected type");
            return;
        };
        if self.have_name {
            let name = name.to_string();
            if self.name.as_deref() != Some(name.trim()) {
                warn!(target: "rctmon::dispatch", "android_description changed after bootstrap");
            }
            return;
        }
        self.set_name(name);

        self.add_one("inverter_sn", Duration::ZERO, true, true, Callback::Setter(Setter::InverterSerial));
        self.add_one("svnversion", Duration::ZERO, true, true, Callback::Setter(Setter::Svnversion));
        self.add_one("parameter_file", Duration::ZERO, true, true, Callback::Setter(Setter::ParameterFile));
        self.add_one(
            "dc_conv.dc_conv_struct[0].enabled",
            Duration::ZERO,
            true,
            true,
            Callback::GeneratorEnabled(Generator::A),
        );
        self.add_one(
            "dc_conv.dc_conv_struct[1].enabled",
            Duration::ZERO,
            true,
            true,
            Callback::GeneratorEnabled(Generator::B),
        );
        self.add_one("rb485.available", Duration::ZERO, true, true, Callback::PowerSwitchAvailable);
        self.add_one("power_mng.battery_type", Duration::ZERO, true, true, Callback::BatteryType);

        self.add_simple(
            &[
                ("g_sync.p_ac_load_sum_lp", Setter::HouseholdLoadTotal),
                ("g_sync.p_ac_load[0]", Setter::HouseholdLoad(Phase::L1)),
                ("g_sync.p_ac_load[1]", Setter::HouseholdLoad(Phase::L2)),
                ("g_sync.p_ac_load[2]", Setter::HouseholdLoad(Phase::L3)),
            ],
            Duration::from_secs(10),
        );
        self.add_simple(
            &[
                ("g_sync.p_ac_grid_sum_lp", Setter::GridPowerTotal),
                ("g_sync.p_ac_sc[0]", Setter::GridPower(Phase::L1)),
                ("g_sync.p_ac_sc[1]", Setter::GridPower(Phase::L2)),
                ("g_sync.p_ac_sc[2]", Setter::GridPower(Phase::L3)),
                ("g_sync.u_l_rms[0]", Setter::GridVoltage(Phase::L1)),
                ("g_sync.u_l_rms[1]", Setter::GridVoltage(Phase::L2)),
                ("g_sync.u_l_rms[2]", Setter::GridVoltage(Phase::L3)),
                ("g_sync.u_ptp_rms[0]", Setter::GridPhaseToPhaseVoltage(1)),
                ("g_sync.u_ptp_rms[1]", Setter::GridPhaseToPhaseVoltage(2)),
                ("g_sync.u_ptp_rms[2]", Setter::GridPhaseToPhaseVoltage(3)),
                ("grid_pll[0].f", Setter::GridFrequency),
            ],
            Duration::from_secs(10),
        );
        self.add_simple(
            &[
                ("db.temp1", Setter::TempHeatsink),
                ("db.temp2", Setter::TempHeatsinkBatt),
                ("db.core_temp", Setter::TempCore),
            ],
            Duration::from_secs(60),
        );
        self.add_simple(
            &[
                ("prim_sm.state", Setter::InverterStatus),
                ("prim_sm.island_flag", Setter::InverterGridSeparated),
                ("fault[0].flt", Setter::Fault(0)),
                ("fault[1].flt", Setter::Fault(1)),
                ("fault[2].flt", Setter::Fault(2)),
                ("fault[3].flt", Setter::Fault(3)),
                ("iso_struct.Riso", Setter::InsulationTotal),
                ("iso_struct.Rp", Setter::InsulationPositive),
                ("iso_struct.Rn", Setter::InsulationNegative),
            ],
            Duration::from_secs(10),
        );
        self.add_simple(
            &[
                ("energy.e_ac_total", Setter::EnergyAcSum),
                ("energy.e_grid_feed_total", Setter::EnergyGridFeedSum),
                ("energy.e_grid_load_total", Setter::EnergyGridLoadSum),
                ("energy.e_load_total", Setter::EnergyHouseholdSum),
            ],
            Duration::from_secs(300),
        );
    }

    fn handle_generator_enabled(&mut self, g: Generator, value: Value) {
        let Ok(enabled) = value.as_bool() else {
            warn!(target: "rctmon::dispatch", "generator-enabled flag had unexpected type");
            return;
        };
        match g {
            Generator::A => self.readings.have_generator_a = Some(enabled),
            Generator::B => self.readings.have_generator_b = Some(enabled),
        }
        if !enabled {
            return;
        }
        let (idx_voltage, idx_power, idx_target, idx_step, idx_energy) = match g {
            Generator::A => (
                "g_sync.u_sg_avg[0]",
                "dc_conv.dc_conv_struct[0].p_dc_lp",
                "dc_conv.dc_conv_struct[0].u_target",
                "dc_conv.dc_conv_struct[0].mpp.mpp_step",
                "energy.e_dc_total[0]",
            ),
            Generator::B => (
                "g_sync.u_sg_avg[1]",
                "dc_conv.dc_conv_struct[1].p_dc_lp",
                "dc_conv.dc_conv_struct[1].u_target",
                "dc_conv.dc_conv_struct[1].mpp.mpp_step",
                "energy.e_dc_total[1]",
            ),
        };
        self.add_simple(&[(idx_voltage, Setter::GenVoltage(g))], Duration::from_secs(10));
        self.add_simple(&[(idx_power, Setter::GenPower(g))], Duration::from_secs(10));
        self.add_simple(&[(idx_target, Setter::GenMppTargetVoltage(g))], Duration::from_secs(120));
        self.add_simple(&[(idx_step, Setter::GenMppSearchStep(g))], Duration::from_secs(120));
        self.add_simple(&[(idx_energy, Setter::EnergySolarGenSum(g))], Duration::from_secs(300));
    }

    fn handle_power_switch_available(&mut self, value: Value) {
        let Ok(available) = value.as_bool() else {
            warn!(target: "rctmon::dispatch", "rb485.available had unexpected type");
            return;
        };
        self.readings.power_switch_available = Some(available);
        if !available {
            return;
        }
        self.add_one(
            "rb485.version_main",
            Duration::ZERO,
            true,
            true,
            Callback::Setter(Setter::PsSoftwareVersion),
        );
        self.add_one(
            "rb485.version_boot",
            Duration::ZERO,
            true,
            true,
            Callback::Setter(Setter::PsBootloaderVersion),
        );
        self.add_simple(
            &[
                ("rb485.u_l_grid[0]", Setter::PsGridVoltage(Phase::L1)),
                ("rb485.u_l_grid[1]", Setter::PsGridVoltage(Phase::L2)),
                ("rb485.u_l_grid[2]", Setter::PsGridVoltage(Phase::L3)),
                ("rb485.f_grid[0]", Setter::PsGridFrequency(Phase::L1)),
                ("rb485.f_grid[1]", Setter::PsGridFrequency(Phase::L2)),
                ("rb485.f_grid[2]", Setter::PsGridFrequency(Phase::L3)),
                ("rb485.f_wr[0]", Setter::PsPowerStorageFrequency(Phase::L1)),
                ("rb485.f_wr[1]", Setter::PsPowerStorageFrequency(Phase::L2)),
                ("rb485.f_wr[2]", Setter::PsPowerStorageFrequency(Phase::L3)),
            ],
            Duration::from_secs(10),
        );
    }

    fn handle_battery_type(&mut self, value: Value) {
        let Ok(battery_type) = value.as_i32() else {
            warn!(target: "rctmon::dispatch", "power_mng.battery_type had unexpected type");
            return;
        };
        if battery_type <= 0 {
            self.have_battery = Some(false);
            return;
        }
        self.have_battery = Some(true);

        self.add_one("battery.bms_sn", Duration::ZERO, true, true, Callback::Setter(Setter::BatteryBmsSn));
        for (idx, name) in BATTERY_MODULE_SN_NAMES.iter().enumerate() {
            self.add_one(name, Duration::ZERO, true, true, Callback::BatteryModuleSn(idx));
        }

        self.add_simple(
            &[
                ("power_mng.soc_min", Setter::BatterySocMin),
                ("power_mng.soc_min_island", Setter::BatterySocMin),
                ("power_mng.soc_max", Setter::BatterySocMin),
                ("battery.soh", Setter::BatterySoh),
            ],
            Duration::from_secs(300),
        );
        self.add_simple(
            &[
                ("battery.soc", Setter::BatterySoc),
                ("battery.soc_target", Setter::BatterySocTarget),
                ("adc.u_acc", Setter::BatteryBatteryVoltage),
                ("battery.temperature", Setter::BatteryTemperature),
                ("acc_conv.i_acc_lp_fast", Setter::BatteryCurrent),
                ("battery.bat_status", Setter::BatteryBatStatus),
                ("battery.bat_impedance.impedance_fine", Setter::BatteryImpedanceFine),
                ("battery.discharged_amp_hours", Setter::BatteryDischargedAmpHours),
                ("battery.stored_energy", Setter::BatteryStoredEnergy),
                ("battery.used_energy", Setter::BatteryUsedEnergy),
                ("battery.efficiency", Setter::BatteryEfficiency),
                ("battery.cycles", Setter::BatteryCycles),
            ],
            Duration::from_secs(60),
        );
        self.add_simple(
            &[
                ("g_sync.p_acc_lp", Setter::BatteryBatteryPower),
                ("battery.voltage", Setter::BatteryVoltage),
                ("power_mng.u_acc_mix_lp", Setter::BatteryBatteryVoltage),
                ("power_mng.battery_power", Setter::BatteryBatteryPower),
                ("battery.current", Setter::BatteryCurrent),
                ("battery.status", Setter::BatteryStatus),
                ("battery.status2", Setter::BatteryStatus2),
                ("power_mng.state", Setter::BatteryBatteryState),
            ],
            Duration::from_secs(10),
        );
    }

    fn handle_battery_module_sn(&mut self, idx: usize, value: Value) {
        let Ok(serial) = value.as_str() else {
            warn!(target: "rctmon::dispatch", "battery module serial had unexpected type");
            return;
        };
        if serial.is_empty() {
            return;
        }
        if self.readings.batteries.contains_key(&idx) {
            warn!(target: "rctmon::dispatch", module = idx, "attempt to add existing battery module ignored");
            return;
        }
        self.readings.batteries.insert(idx, BatteryModule { index: idx, serial: serial.to_string(), cycle_count: None });
        self.add_one(
            BATTERY_STACK_CYCLES_NAMES[idx],
            Duration::from_secs(300),
            true,
            false,
            Callback::Setter(Setter::BatteryStackCycles(idx)),
        );
    }
}

impl Default for DeviceManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Command;

    fn frame_for(id: u32, data: Vec<u8>) -> ReceiveFrame {
        let mut f = ReceiveFrame::new();
        f.command = Command::RESPONSE;
        f.id = id;
        f.data = data;
        f
    }

    #[test]
    fn bootstrap_enrolls_four_cohorts_plus_fixed_inventory() {
        let mut dm = DeviceManager::new();
        let oid = registry::get_by_name("android_description").unwrap().id;
        let frame = frame_for(oid, b"RCT-Power-Storage\0".to_vec());
        dm.on_frame(&frame, Instant::now());
        assert_eq!(dm.name.as_deref(), Some("RCT-Power-Storage"));
        assert!(dm.frame_count() > 20);
    }

    #[test]
    fn empty_description_yields_unknown_name() {
        let mut dm = DeviceManager::new();
        let oid = registry::get_by_name("android_description").unwrap().id;
        let frame = frame_for(oid, b"   \0".to_vec());
        dm.on_frame(&frame, Instant::now());
        assert_eq!(dm.name.as_deref(), Some("UNKNOWN"));
    }

    #[test]
    fn generator_a_enrolls_its_cadences() {
        let mut dm = DeviceManager::new();
        let boot_oid = registry::get_by_name("android_description").unwrap().id;
        dm.on_frame(&frame_for(boot_oid, b"X\0".to_vec()), Instant::now());

        let enable_oid = registry::get_by_name("dc_conv.dc_conv_struct[0].enabled").unwrap().id;
        dm.on_frame(&frame_for(enable_oid, vec![1]), Instant::now());

        assert!(dm.frames.contains(registry::get_by_name("g_sync.u_sg_avg[0]").unwrap().id));
        assert!(dm.frames.contains(registry::get_by_name("dc_conv.dc_conv_struct[0].mpp.mpp_step").unwrap().id));
        assert!(dm.frames.contains(registry::get_by_name("energy.e_dc_total[0]").unwrap().id));
    }

    #[test]
    fn battery_module_map_skips_empty_serials() {
        let mut dm = DeviceManager::new();
        let boot_oid = registry::get_by_name("android_description").unwrap().id;
        dm.on_frame(&frame_for(boot_oid, b"X\0".to_vec()), Instant::now());
        let bt_oid = registry::get_by_name("power_mng.battery_type").unwrap().id;
        dm.on_frame(&frame_for(bt_oid, vec![3]), Instant::now());

        let sn0 = registry::get_by_name("battery.module_sn[0]").unwrap().id;
        let sn1 = registry::get_by_name("battery.module_sn[1]").unwrap().id;
        let sn2 = registry::get_by_name("battery.module_sn[2]").unwrap().id;
        dm.on_frame(&frame_for(sn0, b"ABC123\0".to_vec()), Instant::now());
        dm.on_frame(&frame_for(sn1, b"\0".to_vec()), Instant::now());
        dm.on_frame(&frame_for(sn2, b"DEF456\0".to_vec()), Instant::now());

        assert_eq!(dm.readings.batteries.get(&0).unwrap().serial, "ABC123");
        assert!(dm.readings.batteries.get(&1).is_none());
        assert_eq!(dm.readings.batteries.get(&2).unwrap().serial, "DEF456");
        assert!(dm.frames.contains(registry::get_by_name("battery.stack_cycles[0]").unwrap().id));
        assert!(dm.frames.contains(registry::get_by_name("battery.stack_cycles[2]").unwrap().id));
    }

    #[test]
    fn raw_sink_receives_frames_only_after_name_is_known() {
        use std::sync::Mutex;

        struct RecordingSink {
            calls: Mutex<Vec<(String, u32, String)>>,
        }
        impl RawPointSink for RecordingSink {
            fn push_raw(&self, inverter: &str, oid: u32, name: &str, _value: &Value) {
                self.calls.lock().unwrap().push((inverter.to_string(), oid, name.to_string()));
            }
        }

        let sink = Arc::new(RecordingSink { calls: Mutex::new(Vec::new()) });
        let mut dm = DeviceManager::new();
        dm.set_raw_sink(Arc::clone(&sink) as Arc<dyn RawPointSink>);

        let boot_oid = registry::get_by_name("android_description").unwrap().id;
        // Before the name is known, the bootstrap frame itself must not be
        // pushed (have_name flips only inside this same call).
        dm.on_frame(&frame_for(boot_oid, b"RCT-Power-Storage\0".to_vec()), Instant::now());
        assert!(sink.calls.lock().unwrap().is_empty());

        let sn_oid = registry::get_by_name("inverter_sn").unwrap().id;
        dm.on_frame(&frame_for(sn_oid, b"SN-123\0".to_vec()), Instant::now());
        let calls = sink.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], ("RCT-Power-Storage".to_string(), sn_oid, "inverter_sn".to_string()));
    }

    #[test]
    fn reset_clears_everything_but_bootstrap() {
        let mut dm = DeviceManager::new();
        let boot_oid = registry::get_by_name("android_description").unwrap().id;
        dm.on_frame(&frame_for(boot_oid, b"X\0".to_vec()), Instant::now());
        assert!(dm.frame_count() > 1);
        dm.reset();
        assert_eq!(dm.frame_count(), 1);
        assert!(dm.name.is_none());
    }
}
