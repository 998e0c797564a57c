// VO2 Mini: Gas Exchange
//
// O2/CO2 baselines and the per-breath VO2, VCO2, RQ and energy computation.

use serde::Serialize;

use crate::config::*;
use crate::engine::density::AirDensityParams;
use crate::error::{finite, SensorError};
use crate::events::{Co2Reading, Fault, SensorKind};

// ---------------------------------------------------------------------------
// Baselines
// ---------------------------------------------------------------------------

/// Ambient-air reference concentrations plus the latest readings.
///
/// The galvanic O2 cell drifts upwards, so the O2 baseline follows any
/// reading above it and depletion can never go negative.
#[derive(Debug, Clone)]
pub struct GasBaselines {
    initial_o2_pct: f32,
    last_o2_pct: f32,
    initial_co2_ppm: f32,
    last_co2: Option<Co2Reading>,
    o2_min_pct: f32,
    o2_fallback_pct: f32,
    co2_max_ppm: f32,
    co2_limit_ppm: f32,
    demo: bool,
}

impl GasBaselines {
    pub fn new(cfg: &EngineConfig, demo: bool) -> Self {
        Self {
            initial_o2_pct: cfg.o2_baseline_fallback_pct,
            last_o2_pct: cfg.o2_baseline_fallback_pct,
            initial_co2_ppm: 0.0,
            last_co2: None,
            o2_min_pct: cfg.o2_baseline_min_pct,
            o2_fallback_pct: cfg.o2_baseline_fallback_pct,
            co2_max_ppm: cfg.co2_baseline_max_ppm,
            co2_limit_ppm: cfg.co2_limit_ppm,
            demo,
        }
    }

    pub fn initial_o2_pct(&self) -> f32 {
        self.initial_o2_pct
    }

    pub fn last_o2_pct(&self) -> f32 {
        self.last_o2_pct
    }

    pub fn initial_co2_ppm(&self) -> f32 {
        self.initial_co2_ppm
    }

    pub fn last_co2(&self) -> Option<Co2Reading> {
        self.last_co2
    }

    /// Take a power-on O2 reading as the baseline. `CalibrationLow` means the
    /// cell has not settled; the boot prompt keeps calling this until the
    /// user continues, then calls [`Self::finish_o2_calibration`].
    pub fn calibrate_o2(&mut self, reading_pct: f32) -> Option<Fault> {
        self.initial_o2_pct = reading_pct;
        self.last_o2_pct = reading_pct;
        if reading_pct >= self.o2_min_pct {
            None
        } else {
            Some(Fault::CalibrationLow)
        }
    }

    pub fn finish_o2_calibration(&mut self) -> f32 {
        if !(self.initial_o2_pct >= self.o2_min_pct) {
            log::warn!(
                "Initial O2 {:.2}% implausible, using {:.2}%",
                self.initial_o2_pct,
                self.o2_fallback_pct
            );
            self.initial_o2_pct = self.o2_fallback_pct;
            self.last_o2_pct = self.o2_fallback_pct;
        }
        self.initial_o2_pct
    }

    /// Same as [`Self::calibrate_o2`] for CO2; too much CO2 in the room
    /// raises `CalibrationHigh`.
    pub fn calibrate_co2(&mut self, reading_ppm: f32) -> Option<Fault> {
        self.initial_co2_ppm = reading_ppm;
        if reading_ppm <= self.co2_max_ppm {
            None
        } else {
            Some(Fault::CalibrationHigh)
        }
    }

    pub fn finish_co2_calibration(&mut self) -> f32 {
        if !(self.initial_co2_ppm <= self.co2_max_ppm) {
            self.initial_co2_ppm = self.co2_max_ppm;
        }
        self.initial_co2_ppm
    }

    /// Record an O2 reading, raising the baseline on upward drift.
    pub fn observe_o2(&mut self, reading_pct: f32) -> Result<f32, SensorError> {
        let reading = finite(SensorKind::Oxygen, reading_pct)?;
        self.last_o2_pct = reading;
        if reading > self.initial_o2_pct {
            self.initial_o2_pct = reading;
        }
        if self.demo {
            self.last_o2_pct = self.initial_o2_pct - DEMO_O2_DEPLETION_PCT;
        }
        Ok(self.last_o2_pct)
    }

    /// Record a CO2 measurement. A saturated reading is still kept; the
    /// error only raises the banner.
    pub fn observe_co2(&mut self, reading: Co2Reading) -> Result<Co2Reading, SensorError> {
        finite(SensorKind::Co2, reading.ppm)?;
        finite(SensorKind::Co2, reading.temp_c)?;

        let mut reading = reading;
        let raw_ppm = reading.ppm;
        if self.demo {
            reading.ppm = DEMO_CO2_PPM;
        }
        if self.initial_co2_ppm == 0.0 {
            self.initial_co2_ppm = reading.ppm;
        }
        self.last_co2 = Some(reading);

        if raw_ppm >= self.co2_limit_ppm {
            return Err(SensorError::Saturated {
                sensor: SensorKind::Co2,
                value: raw_ppm,
                limit: self.co2_limit_ppm,
            });
        }
        Ok(reading)
    }

    /// O2 depletion in percentage points, never negative.
    pub fn consumed_o2_pct(&self) -> f32 {
        (self.initial_o2_pct - self.last_o2_pct).max(0.0)
    }

    /// CO2 rise above the baseline in percentage points, if CO2 is known.
    pub fn co2_percent_delta(&self) -> Option<f32> {
        self.last_co2
            .map(|c| ((c.ppm - self.initial_co2_ppm) / 10_000.0).max(0.0))
    }
}

// ---------------------------------------------------------------------------
// Per-cycle computation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct GasExchangeSnapshot {
    pub vo2_total_ml_per_min: f32,
    pub vo2_per_kg: f32,
    pub vco2_total_ml_per_min: f32,
    pub vco2_per_kg: f32,
    pub respiratory_quotient: f32,
    pub cal_per_min: f32,
    pub cal_per_hour: f32,
    pub cal_per_day: f32,
    pub cumulative_calories: f32,
    pub personal_best_vo2_per_kg: f32,
    pub personal_best_cal_per_day: f32,
}

/// Everything one cycle reads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleInputs {
    pub last_o2_pct: f32,
    pub initial_o2_pct: f32,
    /// CO2 rise in percentage points; `None` when CO2 is off or unread.
    pub co2_percent_delta: Option<f32>,
    pub ventilation_mean_lpm: f32,
    pub density: AirDensityParams,
    pub weight_kg: f32,
    pub elapsed_since_last_cycle_ms: u64,
}

/// CO2/O2 molar ratio. Anything undefined or outside `[0, RQ_MAX]` reads 0.
pub fn respiratory_quotient(vco2_ml_per_min: f32, vo2_ml_per_min: f32) -> f32 {
    let rq = (vco2_ml_per_min * MOLAR_MASS_CO2) / (vo2_ml_per_min * MOLAR_MASS_O2);
    if (0.0..=RQ_MAX).contains(&rq) {
        rq
    } else {
        0.0
    }
}

fn per_kg(value: f32, weight_kg: f32) -> f32 {
    if weight_kg > 0.0 {
        value / weight_kg
    } else {
        0.0
    }
}

/// Owns the accumulating parts of the snapshot (calorie integral and
/// personal bests).
#[derive(Debug, Default)]
pub struct GasExchangeCalculator {
    snapshot: GasExchangeSnapshot,
}

impl GasExchangeCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> &GasExchangeSnapshot {
        &self.snapshot
    }

    pub fn compute_cycle(&mut self, inputs: &CycleInputs) -> GasExchangeSnapshot {
        let ratio = inputs.density.btps_to_stpd();
        let ve = inputs.ventilation_mean_lpm;

        let consumed_o2 = (inputs.initial_o2_pct - inputs.last_o2_pct).max(0.0);
        let vo2 = (ve * ratio * consumed_o2).max(0.0);
        let vco2 = inputs
            .co2_percent_delta
            .map(|delta| (ve * ratio * delta.max(0.0) * 10.0).max(0.0))
            .unwrap_or(0.0);

        let s = &mut self.snapshot;
        s.vo2_total_ml_per_min = vo2;
        s.vo2_per_kg = per_kg(vo2, inputs.weight_kg);
        s.vco2_total_ml_per_min = vco2;
        s.vco2_per_kg = per_kg(vco2, inputs.weight_kg);
        s.respiratory_quotient = respiratory_quotient(vco2, vo2);

        s.cal_per_min = vo2 / 1000.0 * KCAL_PER_LITRE_O2;
        s.cal_per_hour = s.cal_per_min * 60.0;
        s.cal_per_day = s.cal_per_min * 1440.0;
        let burned = s.cal_per_min * inputs.elapsed_since_last_cycle_ms as f32 / 60_000.0;
        if burned.is_finite() && burned > 0.0 {
            s.cumulative_calories += burned;
        }

        if s.vo2_per_kg > s.personal_best_vo2_per_kg {
            s.personal_best_vo2_per_kg = s.vo2_per_kg;
        }
        if s.cal_per_day > s.personal_best_cal_per_day {
            s.personal_best_cal_per_day = s.cal_per_day;
        }

        *s
    }
}
