//! Reply shapes for both channels
//!
//! Each record lists the fields it contributes to a snapshot. Units follow the
//! device: power in W, energy counters in kWh, capacity in Wh.

use serde::Deserialize;

use crate::flatten::{Container, FieldValue, FlatMap, Flatten, IntoField};
use crate::flatten_record;

/// Register-based reply (primary channel)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PrimaryReply {
    pub battery: BatteryStatus,
    pub power: PowerReadings,
    pub info: DeviceInfo,
}

flatten_record!(PrimaryReply {} nested { battery, power, info });

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BatteryStatus {
    pub soc: Option<f64>,                  // %
    pub state: Option<u16>,                // device state code
    pub state_text: Option<String>,
    pub error_code: Option<u16>,
    pub total_charged_energy: Option<f64>, // kWh
    pub number_modules: Option<u16>,
    pub installed_capacity: Option<f64>, // Wh
}

flatten_record!(BatteryStatus {
    soc,
    state,
    state_text,
    error_code,
    total_charged_energy,
    number_modules,
    installed_capacity,
});

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PowerReadings {
    pub grid_power: Option<f64>,      // W (positive = to grid, negative = from grid)
    pub to_grid_power: Option<f64>,   // W
    pub from_grid_power: Option<f64>, // W
    pub active_power: Option<f64>,    // W (positive = charging, negative = discharging)
    pub apparent_power: Option<f64>,  // VA, sign as reported
    pub charge_power: Option<f64>,    // W
    pub discharge_power: Option<f64>, // W
}

flatten_record!(PowerReadings {
    grid_power,
    to_grid_power,
    from_grid_power,
    active_power,
    apparent_power,
    charge_power,
    discharge_power,
});

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeviceInfo {
    pub software_version_ems: Option<String>,
    pub software_version_ens: Option<String>,
    pub software_version_inverter: Option<String>,
    pub serial: Option<String>,
    pub table_version: Option<u16>,
}

flatten_record!(DeviceInfo {
    software_version_ems,
    software_version_ens,
    software_version_inverter,
    serial,
    table_version,
});

/// Descriptive HTTP/XML reply (secondary channel)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SecondaryReply {
    pub ems: EmsData,
    pub energy: EnergyData,
    pub info: InfoData,
    pub service: ServiceData,
}

flatten_record!(SecondaryReply {} nested { ems, energy, info, service });

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EmsData {
    pub p_ems_max: Option<f64>,     // W
    pub p_ems_maxdisc: Option<f64>, // W
    pub online_status: Option<String>,
    pub inverter: Option<InverterData>,
    pub grid_monitor: Option<GridMonitorData>,
}

flatten_record!(EmsData { p_ems_max, p_ems_maxdisc, online_status } nested { inverter, grid_monitor });

/// Inverter block reported inside the EMS data
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InverterData {
    pub nominal_power: Option<f64>,  // W
    pub fan_speed: Option<f64>,      // %
    pub frequency_grid: Option<f64>, // Hz
    pub u_verbund_l1: Option<f64>,   // V
    pub u_verbund_l2: Option<f64>,
    pub u_verbund_l3: Option<f64>,
    pub i_verbund_l1: Option<f64>, // A
    pub i_verbund_l2: Option<f64>,
    pub i_verbund_l3: Option<f64>,
    pub temp_l1: Option<f64>, // °C
    pub temp_l2: Option<f64>,
    pub temp_l3: Option<f64>,
    pub temp_board: Option<f64>,
}

flatten_record!(InverterData {
    nominal_power,
    fan_speed,
    frequency_grid,
    u_verbund_l1,
    u_verbund_l2,
    u_verbund_l3,
    i_verbund_l1,
    i_verbund_l2,
    i_verbund_l3,
    temp_l1,
    temp_l2,
    temp_l3,
    temp_board,
});

/// Grid monitor block: island-side voltages and currents
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GridMonitorData {
    pub u_insel_l1: Option<f64>, // V
    pub u_insel_l2: Option<f64>,
    pub u_insel_l3: Option<f64>,
    pub i_insel_l1: Option<f64>, // A
    pub i_insel_l2: Option<f64>,
    pub i_insel_l3: Option<f64>,
}

flatten_record!(GridMonitorData {
    u_insel_l1,
    u_insel_l2,
    u_insel_l3,
    i_insel_l1,
    i_insel_l2,
    i_insel_l3,
});

/// Charge cycle count, reported either plain or as a one-element list
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ChargeCycles {
    Count(f64),
    List(Vec<f64>),
}

impl IntoField for ChargeCycles {
    fn to_field(&self) -> Option<FieldValue> {
        match self {
            ChargeCycles::Count(count) => Some(FieldValue::Number(*count)),
            ChargeCycles::List(counts) => counts.first().copied().map(FieldValue::Number),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EnergyData {
    pub total_grid_ac_dc: Option<f64>,     // kWh drawn from grid
    pub total_grid_dc_ac: Option<f64>,     // kWh fed to grid
    pub total_inverter_ac_dc: Option<f64>, // kWh charged
    pub total_inverter_dc_ac: Option<f64>, // kWh discharged
    pub total_charge_cycles: Option<ChargeCycles>,
}

flatten_record!(EnergyData {
    total_grid_ac_dc,
    total_grid_dc_ac,
    total_inverter_ac_dc,
    total_inverter_dc_ac,
    total_charge_cycles,
});

/// Descriptive information; unknown properties arrive as a generic container.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InfoData {
    pub device_description: Option<String>,
    pub properties: Container,
}

impl Flatten for InfoData {
    fn flatten_into(&self, out: &mut FlatMap) {
        self.properties.flatten_into(out);
        crate::flatten::insert_field(out, "device_description", &self.device_description);
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServiceData {
    pub hours_until_filter_maintenance: Option<f64>,
    pub status_fan: Option<FieldValue>,
    pub status_main: Option<FieldValue>,
}

flatten_record!(ServiceData {
    hours_until_filter_maintenance,
    status_fan,
    status_main,
});
