// VO2 Mini: Error Types

use thiserror::Error;

use crate::events::{Fault, SensorKind};

/// A reading rejected at the sensor boundary.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum SensorError {
    #[error("{sensor:?} reading is not a number")]
    NotANumber { sensor: SensorKind },
    #[error("{sensor:?} reading {value} exceeds limit {limit}")]
    Saturated {
        sensor: SensorKind,
        value: f32,
        limit: f32,
    },
    #[error("{sensor:?} sensor has no data")]
    Unavailable { sensor: SensorKind },
}

impl SensorError {
    pub fn sensor(&self) -> SensorKind {
        match *self {
            Self::NotANumber { sensor }
            | Self::Saturated { sensor, .. }
            | Self::Unavailable { sensor } => sensor,
        }
    }
}

impl From<SensorError> for Fault {
    fn from(err: SensorError) -> Self {
        match err {
            SensorError::Saturated { sensor, .. } => Fault::SensorSaturation(sensor),
            SensorError::NotANumber { sensor } | SensorError::Unavailable { sensor } => {
                Fault::SensorFault(sensor)
            }
        }
    }
}

/// Reject NaN/inf readings.
pub fn finite(sensor: SensorKind, value: f32) -> Result<f32, SensorError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(SensorError::NotANumber { sensor })
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings record could not be encoded or decoded: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("stored settings schema {found} does not match {expected}")]
    SchemaMismatch { found: u32, expected: u32 },
    #[error("settings storage failed: {0}")]
    Storage(String),
}
