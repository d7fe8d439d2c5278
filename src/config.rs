//! Module for loading and validating the node configuration.
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::AuthParameters;
use crate::backend::{LightParameters, SensorBackendParameters};
use crate::firebase::FirebaseParameters;
use crate::path::PathSegment;
use crate::scheduler::SamplingParameters;
use crate::sensor::SoilCalibration;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read the configuration file \'{path}\': {source}")]
    Io { path: String, source: std::io::Error },
    #[error("cannot deserialize the configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
/// Wireless network the node joins. Association is handled by the operating system.
pub struct NetworkParameters
{
    pub ssid: String,
    pub psk: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Configuration {
    #[serde(default)]
    pub network: Option<NetworkParameters>,
    pub firebase: FirebaseParameters,
    #[serde(default)]
    pub sampling: SamplingParameters,
    #[serde(default)]
    pub soil: SoilCalibration,
    #[serde(default)]
    pub light: LightParameters,
    #[serde(default)]
    pub auth: AuthParameters,
    pub sensors: SensorBackendParameters,
}

impl Configuration {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let io_error = |source| ConfigError::Io { path: path.display().to_string(), source };

        let mut configuration_file = File::open(path).map_err(io_error)?;
        let mut configuration_string = String::new();
        configuration_file.read_to_string(&mut configuration_string).map_err(io_error)?;

        Configuration::from_yaml(&configuration_string)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let configuration = serde_yaml::from_str::<Configuration>(yaml)?;
        configuration.validate()?;
        Ok(configuration)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.soil.dry_raw == self.soil.wet_raw {
            return Err(ConfigError::Invalid(format!("soil dry_raw and wet_raw are both {}", self.soil.dry_raw)));
        }
        if self.soil.sample_count == 0 {
            return Err(ConfigError::Invalid(String::from("soil sample_count must be at least 1")));
        }
        if self.sampling.interval_ms == 0 {
            return Err(ConfigError::Invalid(String::from("sampling interval_ms must be positive")));
        }
        if self.firebase.api_key.trim().is_empty() {
            return Err(ConfigError::Invalid(String::from("firebase api_key is empty")));
        }
        PathSegment::new(&self.auth.fallback_identity)
            .map_err(|err| ConfigError::Invalid(format!("fallback_identity: {}", err)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::PathBuf;

    use super::*;

    const MINIMAL: &str = "
firebase:
  api_key: AIzaTest
  database_url: https://garden-default-rtdb.firebaseio.com
sensors:
  backend: iio
  climate_device: /sys/bus/iio/devices/iio:device0
  adc_device: /sys/bus/iio/devices/iio:device1
";

    #[test]
    fn minimal_configuration_uses_defaults() {
        let configuration = Configuration::from_yaml(MINIMAL).unwrap();

        assert_eq!(configuration.network, None);
        assert_eq!(configuration.sampling, SamplingParameters::default());
        assert_eq!(configuration.soil, SoilCalibration::default());
        assert_eq!(configuration.soil.dry_raw, 2700);
        assert_eq!(configuration.soil.wet_raw, 1000);
        assert_eq!(configuration.soil.sample_count, 10);
        assert_eq!(configuration.auth.bootstrap_timeout_ms, 10_000);
        assert_eq!(configuration.auth.fallback_identity, "fallback");
        assert_eq!(configuration.light, LightParameters::default());
        assert_eq!(configuration.sensors, SensorBackendParameters::Iio {
            climate_device: PathBuf::from("/sys/bus/iio/devices/iio:device0"),
            adc_device: PathBuf::from("/sys/bus/iio/devices/iio:device1"),
        });
    }

    #[test]
    fn full_configuration() {
        let yaml = "
network:
  ssid: greenhouse
  psk: hunter22
firebase:
  api_key: AIzaTest
  database_url: https://garden-default-rtdb.firebaseio.com
  request_timeout_ms: 4000
  tls_params:
    ca_path: /etc/gianode/ca.pem
sampling:
  interval_ms: 30000
soil:
  dry_raw: 3000
  wet_raw: 1200
  sample_count: 4
  inter_sample_delay_ms: 25
  channel: 3
auth:
  bootstrap_timeout_ms: 5000
  fallback_identity: shared
sensors:
  backend: simulated
  humidity_pct: 50.0
  temperature_c: 21.0
  soil_raw: 2000
";
        let configuration = Configuration::from_yaml(yaml).unwrap();

        assert_eq!(configuration.network.unwrap().ssid, "greenhouse");
        assert_eq!(configuration.firebase.request_timeout_ms, 4000);
        assert_eq!(configuration.sampling.interval_ms, 30_000);
        assert_eq!(configuration.sampling.poll_resolution_ms, 100);
        assert_eq!(configuration.soil.channel, 3);
        assert_eq!(configuration.soil.inter_sample_delay_ms, 25);
        assert_eq!(configuration.auth.bootstrap_timeout_ms, 5000);
        assert_eq!(configuration.auth.bootstrap_poll_ms, 500);
        assert_eq!(configuration.auth.fallback_identity, "shared");
        assert_eq!(configuration.firebase.tls_params.unwrap().ca_path, "/etc/gianode/ca.pem");
    }

    #[test]
    fn rejects_degenerate_calibration() {
        let yaml = format!("{}soil:\n  dry_raw: 1500\n  wet_raw: 1500\n", MINIMAL);
        match Configuration::from_yaml(&yaml) {
            Err(ConfigError::Invalid(reason)) => assert!(reason.contains("1500")),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn rejects_zero_interval_and_samples() {
        let yaml = format!("{}sampling:\n  interval_ms: 0\n", MINIMAL);
        assert!(matches!(Configuration::from_yaml(&yaml), Err(ConfigError::Invalid(_))));

        let yaml = format!("{}soil:\n  sample_count: 0\n", MINIMAL);
        assert!(matches!(Configuration::from_yaml(&yaml), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_invalid_fallback_identity() {
        let yaml = format!("{}auth:\n  fallback_identity: \"nodes/shared\"\n", MINIMAL);
        assert!(matches!(Configuration::from_yaml(&yaml), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_missing_sections() {
        assert!(matches!(Configuration::from_yaml("sampling:\n  interval_ms: 10\n"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn reads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let configuration = Configuration::from_file(file.path()).unwrap();
        assert_eq!(configuration.firebase.api_key, "AIzaTest");

        match Configuration::from_file("/nonexistent/gianode.yml") {
            Err(ConfigError::Io { path, .. }) => assert_eq!(path, "/nonexistent/gianode.yml"),
            other => panic!("unexpected result {:?}", other),
        }
    }
}
