// VO2 Mini: System Events & Data Types

use serde::Serialize;

use crate::engine::{BreathRecord, CycleReport};

// ---------------------------------------------------------------------------
// Sensor data (one decoded reading set per loop tick)
// ---------------------------------------------------------------------------

/// SCD30 measurement triple.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Co2Reading {
    pub ppm: f32,
    pub temp_c: f32,
    pub humidity_pct: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SensorSample {
    pub timestamp_ms: u64,
    pub pressure_pa: f32,
    pub o2_pct: f32,
    /// `None` while the SCD30 has no fresh measurement.
    pub co2: Option<Co2Reading>,
}

// ---------------------------------------------------------------------------
// Fault signal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SensorKind {
    Pressure,
    Oxygen,
    Co2,
}

/// Conditions raised for display. None of them stop the measurement loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Fault {
    /// Non-numeric or missing reading.
    SensorFault(SensorKind),
    /// Reading beyond the sensor's calibrated range.
    SensorSaturation(SensorKind),
    /// Initial O2 baseline below the plausible floor.
    CalibrationLow,
    /// Initial CO2 baseline above the plausible ceiling.
    CalibrationHigh,
    /// Zero-duration breath, or a cycle with no mean ventilation.
    DivisionDegenerate,
}

impl Fault {
    /// Banner text for the screen.
    pub fn warning(&self) -> &'static str {
        match self {
            Self::SensorFault(SensorKind::Pressure) => "VENTURI ERROR!",
            Self::SensorFault(SensorKind::Oxygen) => "O2 ERROR!",
            Self::SensorFault(SensorKind::Co2) => "CO2 ERROR!",
            Self::SensorSaturation(SensorKind::Co2) => "CO2 LIMIT!",
            Self::SensorSaturation(_) => "SENSOR LIMIT!",
            Self::CalibrationLow => "INITIAL O2% LOW!",
            Self::CalibrationHigh => "INITIAL CO2 HIGH!",
            Self::DivisionDegenerate => "NO VENTILATION",
        }
    }
}

// ---------------------------------------------------------------------------
// UI Events: everything the screen reacts to
// ---------------------------------------------------------------------------
#[derive(Debug, Clone)]
pub enum UiEvent {
    /// A gas-exchange cycle completed.
    CycleCompleted(Box<CycleReport>),
    /// A breath closed without a cycle being rendered yet.
    BreathCompleted(BreathRecord),
    Fault(Fault),
    /// Battery voltage changed (volts).
    UpdateBattery(f32),
    ButtonSingleClick,
    ButtonDoubleClick,
    ButtonLongPress,
}
