//! Assembles the datastore record from a reading.
use crate::record::{Reading, Record};

/// Builds the record published to both the latest snapshot and the history.
pub fn build(reading: &Reading) -> Record {
    Record {
        hum: reading.humidity_pct(),
        temp: reading.temp_f(),
        soil: reading.soil_pct(),
        light: reading.light_lux(),
        ts: reading.timestamp_sec(),
    }
}
