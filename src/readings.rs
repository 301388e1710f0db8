//! The readings model: a hierarchical "bag of optionals" snapshot of device
//! state. Grounded in `original_source/rctmon/models.py`.

#[derive(Debug, Clone, Default)]
pub struct SolarGeneratorReadings {
    pub voltage: Option<f32>,
    pub power: Option<f32>,
    pub mpp_target_voltage: Option<f32>,
    pub mpp_search_step: Option<f32>,
}

#[derive(Debug, Clone, Default)]
pub struct PowerSwitchReadings {
    pub software_version: Option<u32>,
    pub bootloader_version: Option<u32>,
    pub grid_voltage_l1: Option<f32>,
    pub grid_voltage_l2: Option<f32>,
    pub grid_voltage_l3: Option<f32>,
    pub grid_frequency_l1: Option<f32>,
    pub grid_frequency_l2: Option<f32>,
    pub grid_frequency_l3: Option<f32>,
    pub power_storage_frequency_l1: Option<f32>,
    pub power_storage_frequency_l2: Option<f32>,
    pub power_storage_frequency_l3: Option<f32>,
}

#[derive(Debug, Clone, Default)]
pub struct HouseholdReadings {
    pub load_total: Option<f32>,
    pub load_l1: Option<f32>,
    pub load_l2: Option<f32>,
    pub load_l3: Option<f32>,
}

#[derive(Debug, Clone, Default)]
pub struct GridReadings {
    pub power_total: Option<f32>,
    pub power_l1: Option<f32>,
    pub power_l2: Option<f32>,
    pub power_l3: Option<f32>,
    pub voltage_l1: Option<f32>,
    pub voltage_l2: Option<f32>,
    pub voltage_l3: Option<f32>,
    pub phase_to_phase_voltage_1: Option<f32>,
    pub phase_to_phase_voltage_2: Option<f32>,
    pub phase_to_phase_voltage_3: Option<f32>,
    pub frequency: Option<f32>,
}

#[derive(Debug, Clone, Default)]
pub struct EnergyReadings {
    pub ac_sum: Option<f32>,
    pub household_sum: Option<f32>,
    pub grid_load_sum: Option<f32>,
    pub grid_feed_sum: Option<f32>,
    pub solar_generator_a_sum: Option<f32>,
    pub solar_generator_b_sum: Option<f32>,
}

/// Single entry in the battery stack's sparse module map.
#[derive(Debug, Clone)]
pub struct BatteryModule {
    pub index: usize,
    pub serial: String,
    pub cycle_count: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct BatteryReadings {
    pub bms_sn: Option<String>,
    pub soc_min: Option<f32>,
    pub battery_voltage: Option<f32>,
    pub battery_power: Option<f32>,
    pub battery_state: Option<u32>,
    pub soc: Option<f32>,
    pub soh: Option<f32>,
    pub soc_target: Option<f32>,
    pub temperature: Option<f32>,
    pub bat_status: Option<u32>,
    pub impedance_fine: Option<f32>,
    pub discharged_amp_hours: Option<f32>,
    pub stored_energy: Option<f32>,
    pub used_energy: Option<f32>,
    pub efficiency: Option<f32>,
    pub voltage: Option<f32>,
    pub current: Option<f32>,
    pub cycles: Option<u32>,
    pub status: Option<u32>,
    pub status2: Option<u32>,
}

/// Top-level readings snapshot. One writer (the dispatcher), many readers
/// (exporters). See SPEC_FULL.md §6 for the concurrency contract: the whole
/// snapshot is guarded by a single `RwLock` in [`crate::daemon`] rather than
/// per-leaf locks, so every reader always observes a consistent generation
/// of the struct (a strictly stronger guarantee than spec's "never torn").
/// Readers clone the snapshot out from under the lock immediately rather
/// than holding it while they render or serialize, so the writer is never
/// blocked for longer than a single struct clone.
#[derive(Debug, Clone, Default)]
pub struct Readings {
    pub temperature_heatsink: Option<f32>,
    pub temperature_heatsink_batt: Option<f32>,
    pub temperature_core: Option<f32>,

    pub serial_number: Option<String>,
    pub parameter_file: Option<String>,
    pub control_software_version: Option<String>,

    pub have_generator_a: Option<bool>,
    pub solar_generator_a: SolarGeneratorReadings,
    pub have_generator_b: Option<bool>,
    pub solar_generator_b: SolarGeneratorReadings,

    pub inverter_status: Option<u32>,
    pub inverter_grid_separated: Option<u32>,
    pub inverter_insulation_total: Option<f32>,
    pub inverter_insulation_negative: Option<f32>,
    pub inverter_insulation_positive: Option<f32>,

    pub fault0: Option<u32>,
    pub fault1: Option<u32>,
    pub fault2: Option<u32>,
    pub fault3: Option<u32>,

    pub household: HouseholdReadings,
    pub grid: GridReadings,
    pub energy: EnergyReadings,

    pub power_switch_available: Option<bool>,
    pub power_switch_readings: PowerSwitchReadings,

    pub battery: BatteryReadings,
    pub batteries: std::collections::BTreeMap<usize, BatteryModule>,
}

impl Readings {
    pub fn new() -> Self {
        Self::default()
    }
}
