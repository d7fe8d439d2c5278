//! Concrete sensor backends and the placeholder light source.
use std::convert::TryFrom;
use std::fs;
use std::path::{Path, PathBuf};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::sensor::{LightSource, SensorBackend, SensorError};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "backend", rename_all = "snake_case")]
/// Selects the hardware the node reads from.
pub enum SensorBackendParameters
{
    /// Linux industrial I/O devices, e.g. the `dht11` driver and an ADS1x15 ADC.
    Iio {
        /// Sysfs directory of the humidity/temperature device.
        climate_device: PathBuf,
        /// Sysfs directory of the analog-to-digital converter.
        adc_device: PathBuf,
    },
    /// Fixed values with a little noise, for bench runs without hardware.
    Simulated {
        humidity_pct: f64,
        temperature_c: f64,
        soil_raw: i32,
    },
}

impl SensorBackendParameters {
    pub fn build(&self) -> Box<dyn SensorBackend> {
        match self {
            SensorBackendParameters::Iio { climate_device, adc_device } => {
                Box::new(IioSensors::new(climate_device.clone(), adc_device.clone()))
            }
            SensorBackendParameters::Simulated { humidity_pct, temperature_c, soil_raw } => {
                Box::new(SimulatedSensors::new(*humidity_pct, *temperature_c, *soil_raw))
            }
        }
    }
}

/// Reads sensors exposed through the Linux IIO sysfs interface.
pub struct IioSensors {
    climate_device: PathBuf,
    adc_device: PathBuf,
}

impl IioSensors {
    pub fn new(climate_device: PathBuf, adc_device: PathBuf) -> Self {
        IioSensors { climate_device, adc_device }
    }

    /// Reads an attribute reported in milli-units. Any failure maps to NaN.
    fn read_milli(&self, attribute: &str) -> f64 {
        match read_attribute(&self.climate_device.join(attribute)) {
            Ok(value) => value as f64 / 1000.0,
            Err(err) => {
                log::debug!(target: "gianode::sensor", "Could not read \'{}\': \'{}\'", attribute, err);
                f64::NAN
            }
        }
    }
}

fn read_attribute(path: &Path) -> Result<i64, String> {
    let content = fs::read_to_string(path).map_err(|err| err.to_string())?;
    content.trim().parse::<i64>().map_err(|err| err.to_string())
}

impl SensorBackend for IioSensors {
    fn read_humidity(&mut self) -> f64 {
        self.read_milli("in_humidityrelative_input")
    }

    fn read_temperature(&mut self) -> f64 {
        self.read_milli("in_temp_input")
    }

    fn read_analog(&mut self, channel: u8) -> Result<i32, SensorError> {
        let path = self.adc_device.join(format!("in_voltage{}_raw", channel));
        let value = read_attribute(&path).map_err(|reason| SensorError::AnalogUnavailable { channel, reason })?;
        i32::try_from(value).map_err(|_| SensorError::AnalogUnavailable { channel, reason: format!("value {} out of range", value) })
    }
}

/// Returns configured values with small random noise.
pub struct SimulatedSensors {
    humidity_pct: f64,
    temperature_c: f64,
    soil_raw: i32,
}

impl SimulatedSensors {
    pub fn new(humidity_pct: f64, temperature_c: f64, soil_raw: i32) -> Self {
        SimulatedSensors { humidity_pct, temperature_c, soil_raw }
    }
}

impl SensorBackend for SimulatedSensors {
    fn read_humidity(&mut self) -> f64 {
        self.humidity_pct + rand::thread_rng().gen_range(-1.0..=1.0)
    }

    fn read_temperature(&mut self) -> f64 {
        self.temperature_c + rand::thread_rng().gen_range(-0.3..=0.3)
    }

    fn read_analog(&mut self, _channel: u8) -> Result<i32, SensorError> {
        Ok(self.soil_raw + rand::thread_rng().gen_range(-20..=20))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
/// Band of the placeholder illuminance value.
pub struct LightParameters
{
    #[serde(default = "default_baseline_lux")]
    pub baseline_lux: i32,
    #[serde(default = "default_jitter_lux")]
    pub jitter_lux: i32,
}

fn default_baseline_lux() -> i32 { 300 }
fn default_jitter_lux() -> i32 { 50 }

impl Default for LightParameters {
    fn default() -> Self {
        LightParameters { baseline_lux: default_baseline_lux(), jitter_lux: default_jitter_lux() }
    }
}

/// Stand-in for a missing light sensor: a random value around a baseline.
pub struct PlaceholderLight {
    params: LightParameters,
}

impl PlaceholderLight {
    pub fn new(params: LightParameters) -> Self {
        PlaceholderLight { params }
    }
}

impl LightSource for PlaceholderLight {
    fn read_lux(&mut self) -> i32 {
        let jitter = self.params.jitter_lux.abs();
        let low = self.params.baseline_lux - jitter;
        let high = self.params.baseline_lux + jitter;
        rand::thread_rng().gen_range(low..=high).max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn iio_reads_milli_units() {
        let climate = tempfile::tempdir().unwrap();
        let adc = tempfile::tempdir().unwrap();
        write(climate.path(), "in_humidityrelative_input", "53200\n");
        write(climate.path(), "in_temp_input", "24700\n");
        write(adc.path(), "in_voltage2_raw", "1850\n");

        let mut sensors = IioSensors::new(climate.path().to_path_buf(), adc.path().to_path_buf());

        assert!((sensors.read_humidity() - 53.2).abs() < 1e-9);
        assert!((sensors.read_temperature() - 24.7).abs() < 1e-9);
        assert_eq!(sensors.read_analog(2), Ok(1850));
    }

    #[test]
    fn iio_failures() {
        let climate = tempfile::tempdir().unwrap();
        let adc = tempfile::tempdir().unwrap();
        write(climate.path(), "in_temp_input", "garbage");

        let mut sensors = IioSensors::new(climate.path().to_path_buf(), adc.path().to_path_buf());

        assert!(sensors.read_humidity().is_nan());
        assert!(sensors.read_temperature().is_nan());
        match sensors.read_analog(0) {
            Err(SensorError::AnalogUnavailable { channel, .. }) => assert_eq!(channel, 0),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn out_of_range_analog_value_is_rejected() {
        let climate = tempfile::tempdir().unwrap();
        let adc = tempfile::tempdir().unwrap();
        write(adc.path(), "in_voltage1_raw", "4294967296\n");

        let mut sensors = IioSensors::new(climate.path().to_path_buf(), adc.path().to_path_buf());

        match sensors.read_analog(1) {
            Err(SensorError::AnalogUnavailable { channel, reason }) => {
                assert_eq!(channel, 1);
                assert!(reason.contains("4294967296"));
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn placeholder_light_stays_in_band() {
        let mut light = PlaceholderLight::new(LightParameters { baseline_lux: 300, jitter_lux: 50 });
        for _ in 0..200 {
            let lux = light.read_lux();
            assert!(lux >= 250 && lux <= 350, "lux {} out of band", lux);
        }
    }

    #[test]
    fn placeholder_light_never_negative() {
        let mut light = PlaceholderLight::new(LightParameters { baseline_lux: 10, jitter_lux: 40 });
        for _ in 0..200 {
            assert!(light.read_lux() >= 0);
        }
    }

    #[test]
    fn backend_parameters_from_yaml() {
        let params: SensorBackendParameters = serde_yaml::from_str(
            "backend: simulated\nhumidity_pct: 50.0\ntemperature_c: 21.5\nsoil_raw: 1900\n",
        ).unwrap();
        assert_eq!(params, SensorBackendParameters::Simulated { humidity_pct: 50.0, temperature_c: 21.5, soil_raw: 1900 });

        let mut backend = params.build();
        let soil = backend.read_analog(0).unwrap();
        assert!(soil >= 1880 && soil <= 1920);
        assert!(backend.read_humidity().is_finite());
    }
}
