//! Module for acquiring and calibrating the local sensor values.
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::Clock;
use crate::record::Reading;

#[derive(Debug, Error, PartialEq)]
pub enum SensorError {
    /// Humidity or temperature was not a number.
    #[error("invalid climate reading: humidity {humidity}, temperature {temperature}")]
    InvalidReading { humidity: f64, temperature: f64 },
    /// The analog channel could not be read at all.
    #[error("analog channel {channel} unavailable: {reason}")]
    AnalogUnavailable { channel: u8, reason: String },
}

/// Capabilities of the sensor hardware consumed by the [`SensorSampler`].
///
/// Climate reads report failures as NaN, the way the usual DHT drivers do.
pub trait SensorBackend {
    /// Relative humidity in percent.
    fn read_humidity(&mut self) -> f64;
    /// Temperature in celsius.
    fn read_temperature(&mut self) -> f64;
    /// Raw value of an analog input channel.
    fn read_analog(&mut self, channel: u8) -> Result<i32, SensorError>;
}

/// Source of the illuminance value.
pub trait LightSource {
    fn read_lux(&mut self) -> i32;
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
/// Calibration of the capacitive soil probe.
pub struct SoilCalibration
{
    /// Raw reading of the probe in dry air, mapped to 0%.
    #[serde(default = "default_dry_raw")]
    pub dry_raw: i32,
    /// Raw reading of the probe submerged in water, mapped to 100%.
    #[serde(default = "default_wet_raw")]
    pub wet_raw: i32,
    /// Number of raw reads averaged per sample.
    #[serde(default = "default_sample_count")]
    pub sample_count: u32,
    /// Delay between two raw reads in milliseconds.
    #[serde(default = "default_inter_sample_delay_ms")]
    pub inter_sample_delay_ms: u64,
    /// Analog channel the probe is wired to.
    #[serde(default)]
    pub channel: u8,
}

fn default_dry_raw() -> i32 { 2700 }
fn default_wet_raw() -> i32 { 1000 }
fn default_sample_count() -> u32 { 10 }
fn default_inter_sample_delay_ms() -> u64 { 10 }

impl Default for SoilCalibration {
    fn default() -> Self {
        SoilCalibration {
            dry_raw: default_dry_raw(),
            wet_raw: default_wet_raw(),
            sample_count: default_sample_count(),
            inter_sample_delay_ms: default_inter_sample_delay_ms(),
            channel: 0,
        }
    }
}

/// Maps a raw soil value linearly from `[wet_raw, dry_raw]` onto `[100, 0]` percent.
///
/// The division truncates, which is a floor for every value inside the calibrated interval,
/// and the result is clamped to `0..=100`.
pub fn soil_to_pct(raw: i32, calibration: &SoilCalibration) -> u8 {
    let dry = i64::from(calibration.dry_raw);
    let wet = i64::from(calibration.wet_raw);
    if dry == wet {
        return 0;
    }
    let mapped = (i64::from(raw) - dry) * 100 / (wet - dry);
    mapped.max(0).min(100) as u8
}

/// Reads the sensors and turns the raw values into a [`Reading`].
pub struct SensorSampler {
    backend: Box<dyn SensorBackend>,
    light: Box<dyn LightSource>,
    calibration: SoilCalibration,
}

impl SensorSampler {
    pub fn new(backend: Box<dyn SensorBackend>, light: Box<dyn LightSource>, calibration: SoilCalibration) -> Self {
        SensorSampler { backend, light, calibration }
    }

    /// Takes one full sample.
    ///
    /// # Errors
    ///
    /// * `InvalidReading` - humidity or temperature is not a finite number. The soil probe is not
    ///     read in that case.
    ///
    /// * `AnalogUnavailable` - the soil channel could not be read.
    ///
    pub fn sample(&mut self, clock: &dyn Clock) -> Result<Reading, SensorError> {
        let humidity = self.backend.read_humidity();
        let temperature = self.backend.read_temperature();
        if !humidity.is_finite() || !temperature.is_finite() {
            return Err(SensorError::InvalidReading { humidity, temperature });
        }

        let soil_raw = self.soil_average(clock)?;
        let soil_pct = soil_to_pct(soil_raw, &self.calibration);
        let light_lux = self.light.read_lux();

        log::trace!(target: "gianode::sensor", "Raw soil average {} mapped to {}%", soil_raw, soil_pct);

        Ok(Reading::new(humidity, temperature, soil_raw, soil_pct, light_lux, clock.utc_now().timestamp()))
    }

    fn soil_average(&mut self, clock: &dyn Clock) -> Result<i32, SensorError> {
        let count = self.calibration.sample_count.max(1);
        let delay = Duration::from_millis(self.calibration.inter_sample_delay_ms);
        let mut sum: i64 = 0;
        for index in 0..count {
            if index > 0 {
                clock.sleep(delay);
            }
            sum += i64::from(self.backend.read_analog(self.calibration.channel)?);
        }
        Ok((sum / i64::from(count)) as i32)
    }
}
