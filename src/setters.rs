//! Precomputed object-id → setter table, replacing the original's chained
//! if/elif dispatch (`device_manager.py::_cb_*`, `battery_manager.py::_cb_*`)
//! with a flat lookup plus a typed store, per spec.md §9's REDESIGN FLAG.

use crate::readings::Readings;
use crate::value::{TypeMismatch, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    L1,
    L2,
    L3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generator {
    A,
    B,
}

/// A leaf setter: applying one just type-checks the value and stores it.
/// Variants that also trigger dynamic enrollment (the device description,
/// generator-enabled flags, power-switch availability, battery type, and
/// per-module serials) are handled by [`crate::device_manager::DeviceManager`]
/// directly rather than through this table, since they need access to the
/// frame table, not just the readings model.
#[derive(Debug, Clone, Copy)]
pub enum Setter {
    InverterSerial,
    Svnversion,
    ParameterFile,

    PsSoftwareVersion,
    PsBootloaderVersion,
    PsGridVoltage(Phase),
    PsGridFrequency(Phase),
    PsPowerStorageFrequency(Phase),

    HouseholdLoadTotal,
    HouseholdLoad(Phase),

    GridPowerTotal,
    GridPower(Phase),
    GridVoltage(Phase),
    GridPhaseToPhaseVoltage(u8),
    GridFrequency,

    TempHeatsink,
    TempHeatsinkBatt,
    TempCore,

    InverterStatus,
    InverterGridSeparated,
    Fault(u8),
    InsulationTotal,
    InsulationPositive,
    InsulationNegative,

    EnergyAcSum,
    EnergyHouseholdSum,
    EnergyGridFeedSum,
    EnergyGridLoadSum,
    EnergySolarGenSum(Generator),

    GenVoltage(Generator),
    GenPower(Generator),
    GenMppTargetVoltage(Generator),
    GenMppSearchStep(Generator),

    BatterySoh,
    BatterySoc,
    BatterySocTarget,
    BatteryTemperature,
    BatteryBatStatus,
    BatteryStatus,
    BatteryStatus2,
    BatteryImpedanceFine,
    BatteryDischargedAmpHours,
    BatteryStoredEnergy,
    BatteryUsedEnergy,
    BatteryEfficiency,
    BatteryVoltage,
    BatteryCurrent,
    BatterySocMin,
    BatteryBatteryVoltage,
    BatteryBatteryPower,
    BatteryBatteryState,
    BatteryCycles,
    BatteryBmsSn,
    BatteryStackCycles(usize),
}

fn phase_set(target_l1: &mut Option<f32>, target_l2: &mut Option<f32>, target_l3: &mut Option<f32>, phase: Phase, v: f32) {
    match phase {
        Phase::L1 => *target_l1 = Some(v),
        Phase::L2 => *target_l2 = Some(v),
        Phase::L3 => *target_l3 = Some(v),
    }
}

/// Applies a decoded value to the readings model according to `setter`.
/// Mirrors the `ensure_type` + assignment pairs in the original's `_cb_*`
/// methods: a type mismatch is reported but never panics or corrupts state.
pub fn apply(readings: &mut Readings, setter: Setter, value: &Value) -> Result<(), TypeMismatch> {
    use Setter::*;
    match setter {
        InverterSerial => readings.serial_number = Some(value.as_str()?.to_string()),
        Svnversion => readings.control_software_version = Some(value.as_str()?.to_string()),
        ParameterFile => readings.parameter_file = Some(value.as_str()?.to_string()),

        PsSoftwareVersion => readings.power_switch_readings.software_version = Some(value.as_i32()? as u32),
        PsBootloaderVersion => readings.power_switch_readings.bootloader_version = Some(value.as_i32()? as u32),
        PsGridVoltage(p) => {
            let v = value.as_f32()?;
            let ps = &mut readings.power_switch_readings;
            phase_set(&mut ps.grid_voltage_l1, &mut ps.grid_voltage_l2, &mut ps.grid_voltage_l3, p, v);
        }
        PsGridFrequency(p) => {
            let v = value.as_f32()?;
            let ps = &mut readings.power_switch_readings;
            phase_set(&mut ps.grid_frequency_l1, &mut ps.grid_frequency_l2, &mut ps.grid_frequency_l3, p, v);
        }
        PsPowerStorageFrequency(p) => {
            let v = value.as_f32()?;
            let ps = &mut readings.power_switch_readings;
            phase_set(
                &mut ps.power_storage_frequency_l1,
                &mut ps.power_storage_frequency_l2,
                &mut ps.power_storage_frequency_l3,
                p,
                v,
            );
        }

        HouseholdLoadTotal => readings.household.load_total = Some(value.as_f32()?),
        HouseholdLoad(p) => {
            let v = value.as_f32()?;
            let h = &mut readings.household;
            phase_set(&mut h.load_l1, &mut h.load_l2, &mut h.load_l3, p, v);
        }

        GridPowerTotal => readings.grid.power_total = Some(value.as_f32()?),
        GridPower(p) => {
            let v = value.as_f32()?;
            let g = &mut readings.grid;
            phase_set(&mut g.power_l1, &mut g.power_l2, &mut g.power_l3, p, v);
        }
        GridVoltage(p) => {
            let v = value.as_f32()?;
            let g = &mut readings.grid;
            phase_set(&mut g.voltage_l1, &mut g.voltage_l2, &mut g.voltage_l3, p, v);
        }
        GridPhaseToPhaseVoltage(idx) => {
            let v = value.as_f32()?;
            match idx {
                1 => readings.grid.phase_to_phase_voltage_1 = Some(v),
                2 => readings.grid.phase_to_phase_voltage_2 = Some(v),
                _ => readings.grid.phase_to_phase_voltage_3 = Some(v),
            }
        }
        GridFrequency => readings.grid.frequency = Some(value.as_f32()?),

        TempHeatsink => readings.temperature_heatsink = Some(value.as_f32()?),
        TempHeatsinkBatt => readings.temperature_heatsink_batt = Some(value.as_f32()?),
        TempCore => readings.temperature_core = Some(value.as_f32()?),

        InverterStatus => readings.inverter_status = Some(value.as_i32()? as u32),
        InverterGridSeparated => readings.inverter_grid_separated = Some(value.as_i32()? as u32),
        Fault(idx) => {
            let v = Some(value.as_i32()? as u32);
            match idx {
                0 => readings.fault0 = v,
                1 => readings.fault1 = v,
                2 => readings.fault2 = v,
                _ => readings.fault3 = v,
            }
        }
        InsulationTotal => readings.inverter_insulation_total = Some(value.as_f32()?),
        InsulationPositive => readings.inverter_insulation_positive = Some(value.as_f32()?),
        InsulationNegative => readings.inverter_insulation_negative = Some(value.as_f32()?),

        EnergyAcSum => readings.energy.ac_sum = Some(value.as_f32()?),
        EnergyHouseholdSum => readings.energy.household_sum = Some(value.as_f32()?),
        EnergyGridFeedSum => readings.energy.grid_feed_sum = Some(value.as_f32()?),
        EnergyGridLoadSum => readings.energy.grid_load_sum = Some(value.as_f32()?),
        EnergySolarGenSum(g) => {
            let v = Some(value.as_f32()?);
            match g {
                Generator::A => readings.energy.solar_generator_a_sum = v,
                Generator::B => readings.energy.solar_generator_b_sum = v,
            }
        }

        GenVoltage(g) => {
            let v = Some(value.as_f32()?);
            gen_mut(readings, g).voltage = v;
        }
        GenPower(g) => {
            let v = Some(value.as_f32()?);
            gen_mut(readings, g).power = v;
        }
        GenMppTargetVoltage(g) => {
            let v = Some(value.as_f32()?);
            gen_mut(readings, g).mpp_target_voltage = v;
        }
        GenMppSearchStep(g) => {
            let v = Some(value.as_f32()?);
            gen_mut(readings, g).mpp_search_step = v;
        }

        BatterySoh => readings.battery.soh = Some(value.as_f32()?),
        BatterySoc => readings.battery.soc = Some(value.as_f32()?),
        BatterySocTarget => readings.battery.soc_target = Some(value.as_f32()?),
        BatteryTemperature => readings.battery.temperature = Some(value.as_f32()?),
        BatteryBatStatus => readings.battery.bat_status = Some(value.as_i32()? as u32),
        BatteryStatus => readings.battery.status = Some(value.as_i32()? as u32),
        BatteryStatus2 => readings.battery.status2 = Some(value.as_i32()? as u32),
        BatteryImpedanceFine => readings.battery.impedance_fine = Some(value.as_f32()?),
        BatteryDischargedAmpHours => readings.battery.discharged_amp_hours = Some(value.as_f32()?),
        BatteryStoredEnergy => readings.battery.stored_energy = Some(value.as_f32()?),
        BatteryUsedEnergy => readings.battery.used_energy = Some(value.as_f32()?),
        BatteryEfficiency => readings.battery.efficiency = Some(value.as_f32()?),
        BatteryVoltage => readings.battery.voltage = Some(value.as_f32()?),
        BatteryCurrent => readings.battery.current = Some(value.as_f32()?),
        BatterySocMin => readings.battery.soc_min = Some(value.as_f32()?),
        BatteryBatteryVoltage => readings.battery.battery_voltage = Some(value.as_f32()?),
        BatteryBatteryPower => readings.battery.battery_power = Some(value.as_f32()?),
        BatteryBatteryState => readings.battery.battery_state = Some(value.as_i32()? as u32),
        BatteryCycles => readings.battery.cycles = Some(value.as_i32()? as u32),
        BatteryBmsSn => readings.battery.bms_sn = Some(value.as_str()?.to_string()),
        BatteryStackCycles(idx) => {
            let cycles = value.as_i32()? as u32;
            if let Some(module) = readings.batteries.get_mut(&idx) {
                module.cycle_count = Some(cycles);
            }
        }
    }
    Ok(())
}

fn gen_mut(readings: &mut Readings, g: Generator) -> &mut crate::readings::SolarGeneratorReadings {
    match g {
        Generator::A => &mut readings.solar_generator_a,
        Generator::B => &mut readings.solar_generator_b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_setter_writes_correct_slot() {
        let mut r = Readings::new();
        apply(&mut r, Setter::GridVoltage(Phase::L2), &Value::Float(231.0)).unwrap();
        assert_eq!(r.grid.voltage_l2, Some(231.0));
        assert_eq!(r.grid.voltage_l1, None);
    }

    #[test]
    fn type_mismatch_does_not_write() {
        let mut r = Readings::new();
        let err = apply(&mut r, Setter::GridVoltage(Phase::L1), &Value::String("x".into()));
        assert!(err.is_err());
        assert_eq!(r.grid.voltage_l1, None);
    }

    #[test]
    fn generator_setter_targets_correct_generator() {
        let mut r = Readings::new();
        apply(&mut r, Setter::GenVoltage(Generator::B), &Value::Float(12.0)).unwrap();
        assert_eq!(r.solar_generator_b.voltage, Some(12.0));
        assert_eq!(r.solar_generator_a.voltage, None);
    }
}
