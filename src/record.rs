//! Module that contains the record types sampled and published by this node.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq)]
/// Calibrated values from one sampling pass.
///
/// A reading is only constructed through [`Reading::new`], which derives the fahrenheit value
/// and clamps the soil percentage, so a reading always satisfies those invariants.
pub struct Reading
{
    humidity_pct: f64,
    temp_c: f64,
    temp_f: f64,
    soil_raw: i32,
    soil_pct: u8,
    light_lux: i32,
    timestamp_sec: i64,
}

impl Reading {
    pub fn new(humidity_pct: f64, temp_c: f64, soil_raw: i32, soil_pct: u8, light_lux: i32, timestamp_sec: i64) -> Self {
        Reading {
            humidity_pct,
            temp_c,
            temp_f: celsius_to_fahrenheit(temp_c),
            soil_raw,
            soil_pct: soil_pct.min(100),
            light_lux,
            timestamp_sec,
        }
    }

    /// Relative humidity in percent.
    pub fn humidity_pct(&self) -> f64 { self.humidity_pct }
    /// Temperature in celsius.
    pub fn temp_c(&self) -> f64 { self.temp_c }
    /// Temperature in fahrenheit.
    pub fn temp_f(&self) -> f64 { self.temp_f }
    /// Averaged raw analog value of the soil probe.
    pub fn soil_raw(&self) -> i32 { self.soil_raw }
    /// Soil moisture in percent, always within `0..=100`.
    pub fn soil_pct(&self) -> u8 { self.soil_pct }
    /// Illuminance in lx.
    pub fn light_lux(&self) -> i32 { self.light_lux }
    /// Unix timestamp in seconds the reading was taken.
    pub fn timestamp_sec(&self) -> i64 { self.timestamp_sec }

    pub fn soil_condition(&self) -> SoilCondition {
        SoilCondition::from_pct(self.soil_pct)
    }
}

pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 1.8 + 32.0
}

pub fn fahrenheit_to_celsius(fahrenheit: f64) -> f64 {
    (fahrenheit - 32.0) * (5.0 / 9.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Coarse classification of the soil moisture.
pub enum SoilCondition {
    Dry,
    Moderate,
    Wet,
}

impl SoilCondition {
    pub fn from_pct(pct: u8) -> Self {
        if pct >= 70 {
            SoilCondition::Wet
        } else if pct <= 30 {
            SoilCondition::Dry
        } else {
            SoilCondition::Moderate
        }
    }
}

impl std::fmt::Display for SoilCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SoilCondition::Dry => "Dry",
            SoilCondition::Moderate => "Moderate",
            SoilCondition::Wet => "Wet",
        };
        f.write_str(name)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
/// Struct representing the telemetry object written to the datastore.
///
/// The same value is written to the latest snapshot and appended to the history.
pub struct Record
{
    /// Relative humidity value.
    pub hum: f64,
    /// Temperature value in fahrenheit.
    pub temp: f64,
    /// Soil moisture in percent.
    pub soil: u8,
    /// Illuminance value in lx.
    pub light: i32,
    /// Unix timestamp in seconds.
    pub ts: i64,
}
