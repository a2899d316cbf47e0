//! Static catalog of every observable quantity
//!
//! Adding a sensor means adding a row here. The polling, integration and
//! derived-metrics components look quantities up by kind and channel; the sinks
//! read unit, precision and category for presentation.

use std::fmt;

use serde::Serialize;

/// Independent fetch path to the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Register-based protocol, fast and small
    Primary,
    /// Descriptive HTTP/XML endpoint, slower and richer
    Secondary,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Primary => "primary",
            Channel::Secondary => "secondary",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    /// Published as read from a snapshot
    Raw,
    /// Power field accumulated into energy over time
    Integrated,
    /// Computed from one or both snapshots
    Derived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Monotonicity {
    None,
    NonDecreasing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Unit {
    #[serde(rename = "%")]
    Percent,
    #[serde(rename = "W")]
    Watt,
    #[serde(rename = "VA")]
    VoltAmpere,
    #[serde(rename = "Wh")]
    WattHour,
    #[serde(rename = "kWh")]
    KiloWattHour,
    #[serde(rename = "V")]
    Volt,
    #[serde(rename = "A")]
    Ampere,
    #[serde(rename = "Hz")]
    Hertz,
    #[serde(rename = "°C")]
    Celsius,
    #[serde(rename = "h")]
    Hours,
    #[serde(rename = "min")]
    Minutes,
}

impl Unit {
    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::Percent => "%",
            Unit::Watt => "W",
            Unit::VoltAmpere => "VA",
            Unit::WattHour => "Wh",
            Unit::KiloWattHour => "kWh",
            Unit::Volt => "V",
            Unit::Ampere => "A",
            Unit::Hertz => "Hz",
            Unit::Celsius => "°C",
            Unit::Hours => "h",
            Unit::Minutes => "min",
        }
    }
}

/// Display category used by sinks to group quantities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Battery,
    Power,
    Energy,
    EnergyStorage,
    Voltage,
    Current,
    Frequency,
    Temperature,
    Duration,
    Ratio,
    Diagnostic,
}

/// Presentation transform applied to a raw reading before publication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    None,
    Absolute,
    StateText,
    ErrorText,
}

/// Immutable description of one observable quantity
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QuantityDescriptor {
    pub key: &'static str,
    pub source_field: &'static str,
    pub channel: Channel,
    pub unit: Option<Unit>,
    pub display_precision: Option<u8>,
    pub kind: Kind,
    pub monotonicity: Monotonicity,
    pub category: Category,
    pub transform: Transform,
}

impl QuantityDescriptor {
    const fn raw(key: &'static str, source_field: &'static str, channel: Channel) -> Self {
        Self {
            key,
            source_field,
            channel,
            unit: None,
            display_precision: None,
            kind: Kind::Raw,
            monotonicity: Monotonicity::None,
            category: Category::Diagnostic,
            transform: Transform::None,
        }
    }

    const fn primary(key: &'static str, source_field: &'static str) -> Self {
        Self::raw(key, source_field, Channel::Primary)
    }

    const fn secondary(key: &'static str, source_field: &'static str) -> Self {
        Self::raw(key, source_field, Channel::Secondary)
    }

    const fn integrated(key: &'static str, source_field: &'static str) -> Self {
        Self {
            kind: Kind::Integrated,
            monotonicity: Monotonicity::NonDecreasing,
            ..Self::primary(key, source_field)
        }
        .unit(Unit::KiloWattHour, Category::Energy)
        .precision(3)
    }

    const fn derived(key: &'static str, channel: Channel) -> Self {
        Self {
            kind: Kind::Derived,
            ..Self::raw(key, key, channel)
        }
    }

    /// Derived daily total of a cumulative counter field
    const fn daily(key: &'static str, counter_field: &'static str) -> Self {
        Self {
            kind: Kind::Derived,
            monotonicity: Monotonicity::NonDecreasing,
            ..Self::raw(key, counter_field, Channel::Secondary)
        }
    }

    const fn unit(self, unit: Unit, category: Category) -> Self {
        Self {
            unit: Some(unit),
            category,
            ..self
        }
    }

    const fn precision(self, digits: u8) -> Self {
        Self {
            display_precision: Some(digits),
            ..self
        }
    }

    const fn counter(self) -> Self {
        Self {
            monotonicity: Monotonicity::NonDecreasing,
            ..self
        }
    }

    const fn transform(self, transform: Transform) -> Self {
        Self { transform, ..self }
    }
}

pub const DAILY_NET_GRID_IMPORT: &str = "dailyNetGridImport";
pub const DAILY_NET_GRID_EXPORT: &str = "dailyNetGridExport";
pub const BATTERY_EFFICIENCY: &str = "batteryEfficiency";
pub const SELF_SUFFICIENCY_RATE: &str = "selfSufficiencyRate";
pub const SELF_CONSUMPTION_RATE: &str = "selfConsumptionRate";
pub const AVAILABLE_ENERGY: &str = "availableEnergy";
pub const TIME_TO_EMPTY: &str = "timeToEmpty";
pub const TIME_TO_FULL: &str = "timeToFull";
pub const TOTAL_POWER_FLOW: &str = "totalPowerFlow";

/// Snapshot field names read by the derived metrics
pub mod fields {
    pub const SOC: &str = "soc";
    pub const INSTALLED_CAPACITY: &str = "installed_capacity";
    pub const CHARGE_POWER: &str = "charge_power";
    pub const DISCHARGE_POWER: &str = "discharge_power";
    /// Cumulative energy drawn from the grid (kWh)
    pub const TOTAL_GRID_IMPORT: &str = "total_grid_ac_dc";
    /// Cumulative energy fed into the grid (kWh)
    pub const TOTAL_GRID_EXPORT: &str = "total_grid_dc_ac";
    /// Cumulative energy charged into the battery (kWh)
    pub const TOTAL_BATTERY_CHARGED: &str = "total_inverter_ac_dc";
    /// Cumulative energy discharged from the battery (kWh)
    pub const TOTAL_BATTERY_DISCHARGED: &str = "total_inverter_dc_ac";
}

use Category as C;
use Channel::{Primary, Secondary};
use QuantityDescriptor as Q;
use Unit as U;

pub static CATALOG: &[QuantityDescriptor] = &[
    // Primary channel: battery state
    Q::primary("stateOfCharge", "soc").unit(U::Percent, C::Battery),
    Q::primary("state", "state"),
    Q::primary("stateText", "state_text"),
    Q::primary("errorCode", "error_code"),
    Q::primary("errorText", "error_code").transform(Transform::ErrorText),
    Q::primary("stateTextDerived", "state").transform(Transform::StateText),
    // Primary channel: power
    Q::primary("gridPower", "grid_power").unit(U::Watt, C::Power),
    Q::primary("gridPowerToGrid", "to_grid_power").unit(U::Watt, C::Power),
    Q::primary("gridPowerFromGrid", "from_grid_power").unit(U::Watt, C::Power),
    Q::primary("powerActive", "active_power").unit(U::Watt, C::Power),
    Q::primary("powerApparent", "apparent_power")
        .unit(U::VoltAmpere, C::Power)
        .transform(Transform::Absolute),
    Q::primary("powerCharge", "charge_power").unit(U::Watt, C::Power),
    Q::primary("powerDischarge", "discharge_power").unit(U::Watt, C::Power),
    Q::primary("powerChargeTotal", "total_charged_energy")
        .unit(U::KiloWattHour, C::Energy)
        .counter(),
    // Primary channel: device
    Q::primary("software_version_ems", "software_version_ems"),
    Q::primary("software_version_ens", "software_version_ens"),
    Q::primary("software_version_inverter", "software_version_inverter"),
    Q::primary("number_modules", "number_modules"),
    Q::primary("installed_capacity", "installed_capacity").unit(U::WattHour, C::EnergyStorage),
    Q::primary("serial", "serial"),
    Q::primary("table_version", "table_version"),
    // Secondary channel: energy counters
    Q::secondary("cycleCounter", "total_charge_cycles").counter(),
    Q::secondary("gridPowerToTotal", "total_grid_dc_ac")
        .unit(U::KiloWattHour, C::Energy)
        .counter(),
    Q::secondary("gridPowerFromTotal", "total_grid_ac_dc")
        .unit(U::KiloWattHour, C::Energy)
        .counter(),
    Q::secondary("inverterDischarged", "total_inverter_dc_ac")
        .unit(U::KiloWattHour, C::Energy)
        .counter(),
    Q::secondary("inverterCharged", "total_inverter_ac_dc")
        .unit(U::KiloWattHour, C::Energy)
        .counter(),
    // Secondary channel: service
    Q::secondary("maintenanceFilterDueIn", "hours_until_filter_maintenance")
        .unit(U::Hours, C::Duration),
    Q::secondary("fan", "status_fan"),
    Q::secondary("main", "status_main"),
    // Secondary channel: inverter
    Q::secondary("nominalPower", "nominal_power").unit(U::Watt, C::Power),
    Q::secondary("fanSpeed", "fan_speed").unit(U::Percent, C::Ratio),
    Q::secondary("frequencyGrid", "frequency_grid")
        .unit(U::Hertz, C::Frequency)
        .precision(2),
    Q::secondary("onlineStatus", "online_status"),
    Q::secondary("voltageL1", "u_verbund_l1").unit(U::Volt, C::Voltage).precision(1),
    Q::secondary("voltageL2", "u_verbund_l2").unit(U::Volt, C::Voltage).precision(1),
    Q::secondary("voltageL3", "u_verbund_l3").unit(U::Volt, C::Voltage).precision(1),
    Q::secondary("currentL1", "i_verbund_l1").unit(U::Ampere, C::Current).precision(2),
    Q::secondary("currentL2", "i_verbund_l2").unit(U::Ampere, C::Current).precision(2),
    Q::secondary("currentL3", "i_verbund_l3").unit(U::Ampere, C::Current).precision(2),
    Q::secondary("tempL1", "temp_l1").unit(U::Celsius, C::Temperature),
    Q::secondary("tempL2", "temp_l2").unit(U::Celsius, C::Temperature),
    Q::secondary("tempL3", "temp_l3").unit(U::Celsius, C::Temperature),
    Q::secondary("tempBoard", "temp_board").unit(U::Celsius, C::Temperature),
    // Secondary channel: grid monitor (island operation)
    Q::secondary("voltageIslandL1", "u_insel_l1").unit(U::Volt, C::Voltage),
    Q::secondary("voltageIslandL2", "u_insel_l2").unit(U::Volt, C::Voltage),
    Q::secondary("voltageIslandL3", "u_insel_l3").unit(U::Volt, C::Voltage),
    Q::secondary("currentIslandL1", "i_insel_l1").unit(U::Ampere, C::Current),
    Q::secondary("currentIslandL2", "i_insel_l2").unit(U::Ampere, C::Current),
    Q::secondary("currentIslandL3", "i_insel_l3").unit(U::Ampere, C::Current),
    // Secondary channel: EMS
    Q::secondary("deviceDescription", "device_description"),
    Q::secondary("pEmsMax", "p_ems_max").unit(U::Watt, C::Power),
    Q::secondary("pEmsMaxDisc", "p_ems_maxdisc").unit(U::Watt, C::Power),
    // Integrated energy from primary power readings
    Q::integrated("energyToGrid", "to_grid_power"),
    Q::integrated("energyFromGrid", "from_grid_power"),
    Q::integrated("energyCharged", "charge_power"),
    Q::integrated("energyDischarged", "discharge_power"),
    // Derived metrics
    Q::daily(DAILY_NET_GRID_IMPORT, fields::TOTAL_GRID_IMPORT)
        .unit(U::KiloWattHour, C::Energy)
        .precision(2),
    Q::daily(DAILY_NET_GRID_EXPORT, fields::TOTAL_GRID_EXPORT)
        .unit(U::KiloWattHour, C::Energy)
        .precision(2),
    Q::derived(BATTERY_EFFICIENCY, Secondary)
        .unit(U::Percent, C::Ratio)
        .precision(1),
    Q::derived(SELF_SUFFICIENCY_RATE, Secondary)
        .unit(U::Percent, C::Ratio)
        .precision(1),
    Q::derived(SELF_CONSUMPTION_RATE, Secondary)
        .unit(U::Percent, C::Ratio)
        .precision(1),
    Q::derived(AVAILABLE_ENERGY, Primary)
        .unit(U::WattHour, C::EnergyStorage)
        .precision(0),
    Q::derived(TIME_TO_EMPTY, Primary)
        .unit(U::Minutes, C::Duration)
        .precision(0),
    Q::derived(TIME_TO_FULL, Primary)
        .unit(U::Minutes, C::Duration)
        .precision(0),
    Q::derived(TOTAL_POWER_FLOW, Primary)
        .unit(U::Watt, C::Power)
        .precision(0),
];

/// Looks a descriptor up by key.
pub fn find(key: &str) -> Option<&'static QuantityDescriptor> {
    CATALOG.iter().find(|d| d.key == key)
}

/// All descriptors of one kind, in catalog order.
pub fn of_kind(kind: Kind) -> impl Iterator<Item = &'static QuantityDescriptor> {
    CATALOG.iter().filter(move |d| d.kind == kind)
}

/// Derived daily totals; `source_field` names the cumulative counter.
pub fn daily_totals() -> impl Iterator<Item = &'static QuantityDescriptor> {
    of_kind(Kind::Derived).filter(|d| d.monotonicity == Monotonicity::NonDecreasing)
}

/// Raw descriptors sourced from one channel.
pub fn raw_for(channel: Channel) -> impl Iterator<Item = &'static QuantityDescriptor> {
    of_kind(Kind::Raw).filter(move |d| d.channel == channel)
}

const STATE_TEXTS: &[(i64, &str)] = &[
    (0, "Busy"),
    (1, "Run"),
    (2, "Charge"),
    (3, "Discharge"),
    (4, "Standby"),
    (5, "Error"),
    (6, "Passive (Service)"),
    (7, "Islanding"),
    (8, "Grid Outage"),
    (9, "Self Test"),
    (10, "Update"),
    (11, "Maintenance"),
];

const ERROR_TEXTS: &[(i64, &str)] = &[
    (0, "No Error"),
    (1, "General Error"),
    (2, "Battery Error"),
    (3, "Inverter Error"),
    (4, "Grid Error"),
    (5, "Communication Error"),
    (6, "Temperature Error"),
    (7, "Overcurrent"),
    (8, "Overvoltage"),
    (9, "Undervoltage"),
    (10, "Overtemperature"),
    (11, "Undertemperature"),
    (12, "Isolation Error"),
    (13, "Cell Imbalance"),
    (14, "BMS Error"),
    (15, "EMS Error"),
    (16, "ENS Error"),
    (17, "Fan Error"),
    (18, "Fuse Error"),
    (19, "Relay Error"),
    (20, "Sensor Error"),
    (255, "Unknown Error"),
];

/// Rounds to a fixed number of decimal places.
pub fn round(value: f64, decimals: i32) -> f64 {
    let multiplier = 10_f64.powi(decimals);
    (value * multiplier).round() / multiplier
}

fn lookup(table: &[(i64, &'static str)], code: i64) -> Option<&'static str> {
    table.iter().find(|(c, _)| *c == code).map(|(_, text)| *text)
}

/// Human-readable text for a device state code.
pub fn state_text(code: i64) -> String {
    lookup(STATE_TEXTS, code)
        .map(str::to_string)
        .unwrap_or_else(|| format!("Unknown State ({})", code))
}

/// Human-readable text for a device error code.
pub fn error_text(code: i64) -> String {
    lookup(ERROR_TEXTS, code)
        .map(str::to_string)
        .unwrap_or_else(|| format!("Unknown Error ({})", code))
}
