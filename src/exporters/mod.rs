//! Exporter adapters: scrape (Prometheus pull), TSDB (InfluxDB push) and
//! MQTT (push). Each adapter reads the shared [`crate::readings::Readings`]
//! snapshot independently and is free to lag or drop updates (spec.md §4.7 —
//! "best effort, lossy is acceptable").

pub mod influx;
pub mod mqtt;
pub mod scrape;

use crate::readings::{Readings, SolarGeneratorReadings};

/// One flattened metric: family name, its labels (including `inverter`),
/// and its value already formatted as a string. Built once per call and
/// shared by both the Prometheus text renderer and the MQTT topic builder,
/// rather than each adapter reaching into `Readings` separately.
pub struct MetricPoint {
    pub family: String,
    pub labels: Vec<(&'static str, String)>,
    pub value: String,
}

/// Flattens the current readings snapshot into metric points. Grounded in
/// `original_source/rctmon/models.py`'s per-dataclass `collect()` methods:
/// every present optional becomes one point, absent ones are skipped rather
/// than exported as zero.
pub fn metric_points(readings: &Readings) -> Vec<MetricPoint> {
    let mut points = Vec::new();
    let inverter = readings.serial_number.as_deref().unwrap_or("unknown").to_string();

    macro_rules! point {
        ($family:expr, $opt:expr) => {
            if let Some(v) = $opt {
                points.push(MetricPoint { family: $family.to_string(), labels: vec![("inverter", inverter.clone())], value: v.to_string() });
            }
        };
    }
    macro_rules! point_labeled {
        ($family:expr, $opt:expr, $($k:expr => $v:expr),+) => {
            if let Some(value) = $opt {
                points.push(MetricPoint {
                    family: $family.to_string(),
                    labels: vec![("inverter", inverter.clone()), $(($k, $v.to_string())),+],
                    value: value.to_string(),
                });
            }
        };
    }

    // rctmon_inverter: an info metric, only emitted once all three identity
    // fields are known, matching `models.py::Readings.collect()`.
    if let (Some(serial), Some(parameter_file), Some(version)) =
        (&readings.serial_number, &readings.parameter_file, &readings.control_software_version)
    {
        points.push(MetricPoint {
            family: "inverter".to_string(),
            labels: vec![
                ("inverter", inverter.clone()),
                ("serial_number", serial.clone()),
                ("parameter_file", parameter_file.clone()),
                ("control_software_version", version.clone()),
            ],
            value: "1".to_string(),
        });
    }

    // rctmon_inventory: one point per discovered component, matching
    // `device_manager.py::collect()`'s `component` label.
    point_labeled!("inventory", readings.have_generator_a.map(|v| v as u8), "component" => "generator_a");
    point_labeled!("inventory", readings.have_generator_b.map(|v| v as u8), "component" => "generator_b");
    point_labeled!("inventory", readings.power_switch_available.map(|v| v as u8), "component" => "power_switch");

    point!("temperature_heatsink_celsius", readings.temperature_heatsink);
    point!("temperature_heatsink_batt_celsius", readings.temperature_heatsink_batt);
    point!("temperature_core_celsius", readings.temperature_core);

    point!("inverter_status", readings.inverter_status);
    point!("inverter_grid_separated", readings.inverter_grid_separated);
    point!("inverter_insulation_total_ohm", readings.inverter_insulation_total);
    point!("inverter_insulation_positive_ohm", readings.inverter_insulation_positive);
    point!("inverter_insulation_negative_ohm", readings.inverter_insulation_negative);

    point_labeled!("fault_register", readings.fault0, "index" => 0);
    point_labeled!("fault_register", readings.fault1, "index" => 1);
    point_labeled!("fault_register", readings.fault2, "index" => 2);
    point_labeled!("fault_register", readings.fault3, "index" => 3);

    point!("household_load_watts_total", readings.household.load_total);
    point_labeled!("household_load_watts", readings.household.load_l1, "phase" => "l1");
    point_labeled!("household_load_watts", readings.household.load_l2, "phase" => "l2");
    point_labeled!("household_load_watts", readings.household.load_l3, "phase" => "l3");

    point!("grid_power_watts_total", readings.grid.power_total);
    point_labeled!("grid_power_watts", readings.grid.power_l1, "phase" => "l1");
    point_labeled!("grid_power_watts", readings.grid.power_l2, "phase" => "l2");
    point_labeled!("grid_power_watts", readings.grid.power_l3, "phase" => "l3");
    point_labeled!("grid_voltage_volts", readings.grid.voltage_l1, "phase" => "l1");
    point_labeled!("grid_voltage_volts", readings.grid.voltage_l2, "phase" => "l2");
    point_labeled!("grid_voltage_volts", readings.grid.voltage_l3, "phase" => "l3");
    point_labeled!("grid_phase_to_phase_voltage_volts", readings.grid.phase_to_phase_voltage_1, "pair" => "12");
    point_labeled!("grid_phase_to_phase_voltage_volts", readings.grid.phase_to_phase_voltage_2, "pair" => "23");
    point_labeled!("grid_phase_to_phase_voltage_volts", readings.grid.phase_to_phase_voltage_3, "pair" => "31");
    point!("grid_frequency_hertz", readings.grid.frequency);

    point!("energy_ac_sum_wh", readings.energy.ac_sum);
    point!("energy_household_sum_wh", readings.energy.household_sum);
    point!("energy_grid_feed_sum_wh", readings.energy.grid_feed_sum);
    point!("energy_grid_load_sum_wh", readings.energy.grid_load_sum);
    point_labeled!("energy_solar_generator_sum_wh", readings.energy.solar_generator_a_sum, "generator" => "a");
    point_labeled!("energy_solar_generator_sum_wh", readings.energy.solar_generator_b_sum, "generator" => "b");

    if readings.have_generator_a == Some(true) {
        generator_points(&mut points, &inverter, "a", &readings.solar_generator_a);
    }
    if readings.have_generator_b == Some(true) {
        generator_points(&mut points, &inverter, "b", &readings.solar_generator_b);
    }

    if readings.power_switch_available == Some(true) {
        let ps = &readings.power_switch_readings;
        point!("power_switch_software_version", ps.software_version);
        point!("power_switch_bootloader_version", ps.bootloader_version);
        point_labeled!("power_switch_grid_voltage_volts", ps.grid_voltage_l1, "phase" => "l1");
        point_labeled!("power_switch_grid_voltage_volts", ps.grid_voltage_l2, "phase" => "l2");
        point_labeled!("power_switch_grid_voltage_volts", ps.grid_voltage_l3, "phase" => "l3");
        point_labeled!("power_switch_grid_frequency_hertz", ps.grid_frequency_l1, "phase" => "l1");
        point_labeled!("power_switch_grid_frequency_hertz", ps.grid_frequency_l2, "phase" => "l2");
        point_labeled!("power_switch_grid_frequency_hertz", ps.grid_frequency_l3, "phase" => "l3");
        point_labeled!("power_switch_storage_frequency_hertz", ps.power_storage_frequency_l1, "phase" => "l1");
        point_labeled!("power_switch_storage_frequency_hertz", ps.power_storage_frequency_l2, "phase" => "l2");
        point_labeled!("power_switch_storage_frequency_hertz", ps.power_storage_frequency_l3, "phase" => "l3");
    }

    let b = &readings.battery;
    point!("battery_soc_percent", b.soc);
    point!("battery_soh_percent", b.soh);
    point!("battery_soc_target_percent", b.soc_target);
    point!("battery_soc_min_percent", b.soc_min);
    point!("battery_temperature_celsius", b.temperature);
    point!("battery_voltage_volts", b.voltage);
    point!("battery_battery_voltage_volts", b.battery_voltage);
    point!("battery_current_amps", b.current);
    point!("battery_power_watts", b.battery_power);
    point!("battery_state", b.battery_state);
    point!("battery_status", b.status);
    point!("battery_status2", b.status2);
    point!("battery_bat_status", b.bat_status);
    point!("battery_impedance_fine_ohm", b.impedance_fine);
    point!("battery_discharged_amp_hours", b.discharged_amp_hours);
    point!("battery_stored_energy_wh", b.stored_energy);
    point!("battery_used_energy_wh", b.used_energy);
    point!("battery_efficiency_percent", b.efficiency);
    point!("battery_cycles", b.cycles);

    for module in readings.batteries.values() {
        points.push(MetricPoint {
            family: "battery_module_info".to_string(),
            labels: vec![("inverter", inverter.clone()), ("index", module.index.to_string()), ("serial", module.serial.clone())],
            value: "1".to_string(),
        });
        point_labeled!("battery_module_cycles", module.cycle_count, "index" => module.index);
    }

    points
}

fn generator_points(points: &mut Vec<MetricPoint>, inverter: &str, generator: &'static str, g: &SolarGeneratorReadings) {
    let mut push = |family: &str, value: Option<f32>| {
        if let Some(v) = value {
            points.push(MetricPoint {
                family: family.to_string(),
                labels: vec![("inverter", inverter.to_string()), ("generator", generator.to_string())],
                value: v.to_string(),
            });
        }
    };
    push("solar_generator_voltage_volts", g.voltage);
    push("solar_generator_power_watts", g.power);
    push("solar_generator_mpp_target_voltage_volts", g.mpp_target_voltage);
    push("solar_generator_mpp_search_step", g.mpp_search_step);
}

/// Renders metric points as Prometheus exposition text, one line each,
/// prefixed with `rctmon_`.
pub fn render_readings(readings: &Readings) -> String {
    use std::fmt::Write as _;
    let mut out = String::new();
    for point in metric_points(readings) {
        let labels = point.labels.iter().map(|(k, v)| format!("{k}=\"{v}\"")).collect::<Vec<_>>().join(", ");
        let _ = writeln!(out, "rctmon_{}{{{}}} {}", point.family, labels, point.value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_leaves_are_skipped() {
        let readings = Readings::new();
        let text = render_readings(&readings);
        assert!(!text.contains("temperature_heatsink_celsius"));
    }

    #[test]
    fn present_leaf_is_rendered_with_inverter_label() {
        let mut readings = Readings::new();
        readings.serial_number = Some("SN123".to_string());
        readings.temperature_heatsink = Some(42.5);
        let text = render_readings(&readings);
        assert!(text.contains("rctmon_temperature_heatsink_celsius{inverter=\"SN123\"} 42.5"));
    }

    #[test]
    fn fault_registers_carry_an_index_label() {
        let mut readings = Readings::new();
        readings.fault2 = Some(7);
        let points = metric_points(&readings);
        let fault = points.iter().find(|p| p.family == "fault_register").expect("fault point present");
        assert!(fault.labels.contains(&("index", "2".to_string())));
        assert_eq!(fault.value, "7");
    }

    #[test]
    fn inverter_info_metric_needs_all_three_identity_fields() {
        let mut readings = Readings::new();
        readings.serial_number = Some("SN123".to_string());
        assert!(!metric_points(&readings).iter().any(|p| p.family == "inverter"));

        readings.parameter_file = Some("param.xml".to_string());
        readings.control_software_version = Some("1.2.3".to_string());
        let points = metric_points(&readings);
        let info = points.iter().find(|p| p.family == "inverter").expect("inverter info point present");
        assert!(info.labels.contains(&("serial_number", "SN123".to_string())));
        assert!(info.labels.contains(&("parameter_file", "param.xml".to_string())));
        assert!(info.labels.contains(&("control_software_version", "1.2.3".to_string())));
    }

    #[test]
    fn inventory_gauge_reflects_each_discovered_component() {
        let mut readings = Readings::new();
        readings.have_generator_a = Some(true);
        readings.have_generator_b = Some(false);
        let points = metric_points(&readings);
        let gen_a = points.iter().find(|p| p.family == "inventory" && p.labels.contains(&("component", "generator_a".to_string()))).unwrap();
        assert_eq!(gen_a.value, "1");
        let gen_b = points.iter().find(|p| p.family == "inventory" && p.labels.contains(&("component", "generator_b".to_string()))).unwrap();
        assert_eq!(gen_b.value, "0");
        assert!(!points.iter().any(|p| p.family == "inventory" && p.labels.contains(&("component", "power_switch".to_string()))));
    }
}
