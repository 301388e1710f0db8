//! Static object registry: every object id (OID) the daemon knows about, its
//! name and its wire data type.
//!
//! Grounded in `rctclient.registry.REGISTRY` as used throughout
//! `device_manager.py` and `battery_manager.py`. Most OIDs below carry the
//! literal value the original looked up by name and then compared against
//! (kept verbatim, they are wire-format facts). A handful of names referenced
//! only by `R.get_by_name(...)` in the original never had their numeric OID
//! surface in the retrieved source (the upstream `rctclient` registry itself
//! was not part of the retrieval pack) — those are assigned a stable
//! synthetic id via [`synthetic_oid`] so the registry stays internally
//! consistent; see DESIGN.md.

use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::value::DataType;

#[derive(Debug, Clone, Copy)]
pub struct ObjectInfo {
    pub id: u32,
    pub name: &'static str,
    pub data_type: DataType,
}

/// Deterministic stand-in for OIDs whose literal value wasn't available.
fn synthetic_oid(name: &str) -> u32 {
    let mut hash: u32 = 0x811C_9DC5;
    for b in name.bytes() {
        hash ^= b as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

macro_rules! entries {
    ($(($id:expr, $name:expr, $dt:expr)),* $(,)?) => {
        &[$(ObjectInfo { id: $id, name: $name, data_type: $dt }),*]
    };
}

static LITERAL: &[ObjectInfo] = entries![
    (0x93F976AB, "rb485.u_l_grid[0]", DataType::Float),
    (0x7A9091EA, "rb485.u_l_grid[1]", DataType::Float),
    (0x21EE7CBB, "rb485.u_l_grid[2]", DataType::Float),
    (0x9558AD8A, "rb485.f_grid[0]", DataType::Float),
    (0xFAE429C5, "rb485.f_grid[1]", DataType::Float),
    (0x0104EB6A, "rb485.f_grid[2]", DataType::Float),
    (0x3B5F6B9D, "rb485.f_wr[0]", DataType::Float),
    (0x6FD36B32, "rb485.f_wr[1]", DataType::Float),
    (0x905F707B, "rb485.f_wr[2]", DataType::Float),
    (0x437B8122, "rb485.available", DataType::Bool),
    (0x7924ABD9, "inverter_sn", DataType::String),
    (0xDDD1C2D0, "svnversion", DataType::String),
    (0x68BC034D, "parameter_file", DataType::String),
    (0x27650FE2, "rb485.version_main", DataType::U32),
    (0x173D81E4, "rb485.version_boot", DataType::U32),
    (0x701A0482, "dc_conv.dc_conv_struct[0].enabled", DataType::Bool),
    (0xFED51BD2, "dc_conv.dc_conv_struct[1].enabled", DataType::Bool),
    (0xB55BA2CE, "g_sync.u_sg_avg[0]", DataType::Float),
    (0xDB11855B, "dc_conv.dc_conv_struct[0].p_dc_lp", DataType::Float),
    (0x226A23A4, "dc_conv.dc_conv_struct[0].u_target", DataType::Float),
    (0xBA8B8515, "dc_conv.dc_conv_struct[0].mpp.mpp_step", DataType::Float),
    (0xB0041187, "g_sync.u_sg_avg[1]", DataType::Float),
    (0x0CB5D21B, "dc_conv.dc_conv_struct[1].p_dc_lp", DataType::Float),
    (0x675776B1, "dc_conv.dc_conv_struct[1].u_target", DataType::Float),
    (0x4AE96C12, "dc_conv.dc_conv_struct[1].mpp.mpp_step", DataType::Float),
    (0xFC724A9E, "energy.e_dc_total[0]", DataType::Float),
    (0x68EEFD3D, "energy.e_dc_total[1]", DataType::Float),
    (0x5F33284E, "prim_sm.state", DataType::U32),
    (0x3623D82A, "prim_sm.island_flag", DataType::U32),
    (0x37F9D5CA, "fault[0].flt", DataType::U32),
    (0x234B4736, "fault[1].flt", DataType::U32),
    (0x3B7FCD47, "fault[2].flt", DataType::U32),
    (0x7F813D73, "fault[3].flt", DataType::U32),
    (0xC717D1FB, "iso_struct.Riso", DataType::Float),
    (0x8E41FC47, "iso_struct.Rp", DataType::Float),
    (0x474F80D5, "iso_struct.Rn", DataType::Float),
    (0x1AC87AA0, "g_sync.p_ac_load_sum_lp", DataType::Float),
    (0x03A39CA2, "g_sync.p_ac_load[0]", DataType::Float),
    (0x2788928C, "g_sync.p_ac_load[1]", DataType::Float),
    (0xF0B436DD, "g_sync.p_ac_load[2]", DataType::Float),
    (0x91617C58, "g_sync.p_ac_grid_sum_lp", DataType::Float),
    (0x27BE51D9, "g_sync.p_ac_sc[0]", DataType::Float),
    (0xF5584F90, "g_sync.p_ac_sc[1]", DataType::Float),
    (0xB221BCFA, "g_sync.p_ac_sc[2]", DataType::Float),
    (0xCF053085, "g_sync.u_l_rms[0]", DataType::Float),
    (0x54B4684E, "g_sync.u_l_rms[1]", DataType::Float),
    (0x2545E22D, "g_sync.u_l_rms[2]", DataType::Float),
    (0xB1EF67CE, "energy.e_ac_total", DataType::Float),
    (0xEFF4B537, "energy.e_load_total", DataType::Float),
    (0x44D4C533, "energy.e_grid_feed_total", DataType::Float),
    (0x62FBE7DC, "energy.e_grid_load_total", DataType::Float),
    (0xF79D41D9, "db.temp1", DataType::Float),
    (0x4F735D10, "db.temp2", DataType::Float),
    (0xC24E85D0, "db.core_temp", DataType::Float),
    (0x682CDDA1, "power_mng.battery_type", DataType::U8),
    (0x16A1F844, "battery.bms_sn", DataType::String),
    (0xFBF6D834, "battery.module_sn[0]", DataType::String),
    (0x99396810, "battery.module_sn[1]", DataType::String),
    (0x73489528, "battery.module_sn[2]", DataType::String),
    (0x257B7612, "battery.module_sn[3]", DataType::String),
    (0x4E699086, "battery.module_sn[4]", DataType::String),
    (0x162491E8, "battery.module_sn[5]", DataType::String),
    (0x5939EC5D, "battery.module_sn[6]", DataType::String),
    (0xA6C4FD4A, "battery.stack_cycles[0]", DataType::U32),
    (0x0CFA8BC4, "battery.stack_cycles[1]", DataType::U32),
    (0x5BA122A5, "battery.stack_cycles[2]", DataType::U32),
    (0x89B25F4B, "battery.stack_cycles[3]", DataType::U32),
    (0x5A9EEFF0, "battery.stack_cycles[4]", DataType::U32),
    (0x2A30A97E, "battery.stack_cycles[5]", DataType::U32),
    (0x27C39CEA, "battery.stack_cycles[6]", DataType::U32),
    (0x381B8BF9, "battery.soh", DataType::Float),
    (0x959930BF, "battery.soc", DataType::Float),
    (0x8B9FF008, "battery.soc_target", DataType::Float),
    (0x902AFAFB, "battery.temperature", DataType::Float),
    (0x70A2AF4F, "battery.bat_status", DataType::U32),
    (0x71765BD8, "battery.status", DataType::U32),
    (0x0DE3D20D, "battery.status2", DataType::U32),
    (0xE7B0E692, "battery.bat_impedance.impedance_fine", DataType::Float),
    (0x2BC1E72B, "battery.discharged_amp_hours", DataType::Float),
    (0x5570401B, "battery.stored_energy", DataType::Float),
    (0xA9033880, "battery.used_energy", DataType::Float),
    (0xACF7666B, "battery.efficiency", DataType::Float),
    (0x65EED11B, "battery.voltage", DataType::Float),
    (0x21961B58, "battery.current", DataType::Float),
    (0xCE266F0F, "power_mng.soc_min", DataType::Float),
    (0xA7FA5C5D, "power_mng.u_acc_mix_lp", DataType::Float),
    (0x400F015B, "power_mng.battery_power", DataType::Float),
    (0xDC667958, "power_mng.state", DataType::U32),
    (0xC0DF2978, "battery.cycles", DataType::U32),
];

/// Names used in `add_ids` that never had a literal OID surface in the
/// retrieved original source.
static SYNTHETIC_NAMES: &[(&str, DataType)] = &[
    ("android_description", DataType::String),
    ("power_mng.soc_min_island", DataType::Float),
    ("power_mng.soc_max", DataType::Float),
    ("adc.u_acc", DataType::Float),
    ("acc_conv.i_acc_lp_fast", DataType::Float),
    ("g_sync.p_acc_lp", DataType::Float),
    ("grid_pll[0].f", DataType::Float),
    ("g_sync.u_ptp_rms[0]", DataType::Float),
    ("g_sync.u_ptp_rms[1]", DataType::Float),
    ("g_sync.u_ptp_rms[2]", DataType::Float),
];

struct Registry {
    by_id: HashMap<u32, ObjectInfo>,
    by_name: HashMap<&'static str, ObjectInfo>,
}

static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut by_id = HashMap::new();
    let mut by_name = HashMap::new();
    for info in LITERAL {
        by_id.insert(info.id, *info);
        by_name.insert(info.name, *info);
    }
    for (name, data_type) in SYNTHETIC_NAMES {
        let info = ObjectInfo { id: synthetic_oid(name), name, data_type: *data_type };
        by_id.insert(info.id, info);
        by_name.insert(info.name, info);
    }
    Registry { by_id, by_name }
});

pub fn get_by_id(id: u32) -> Option<ObjectInfo> {
    REGISTRY.by_id.get(&id).copied()
}

pub fn get_by_name(name: &str) -> Option<ObjectInfo> {
    REGISTRY.by_name.get(name).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_ids_round_trip_by_name() {
        let info = get_by_name("inverter_sn").expect("inverter_sn must be registered");
        assert_eq!(info.id, 0x7924_ABD9);
        assert_eq!(get_by_id(info.id).unwrap().name, "inverter_sn");
    }

    #[test]
    fn synthetic_names_are_stable_and_unique() {
        let a = get_by_name("android_description").unwrap();
        let b = get_by_name("android_description").unwrap();
        assert_eq!(a.id, b.id);
        let c = get_by_name("grid_pll[0].f").unwrap();
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn unknown_name_is_absent() {
        assert!(get_by_name("does.not.exist").is_none());
    }
}
