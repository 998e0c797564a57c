// VO2 Mini: Measurement Engine
//
// Owns the flow integrator, the ventilation state machine, the gas baselines
// and the gas-exchange accumulator. One `tick` per main-loop iteration:
//
//   sample ─► FlowIntegrator ─► VentilationStateMachine ─┬─► (breath)
//                  ▲                                     │
//                  └──── AirDensityParams ◄── cycle ◄────┘
//
// Nothing here touches hardware; sinks receive the returned reports.

pub mod density;
pub mod flow;
pub mod gas_exchange;
pub mod ventilation;

use serde::Serialize;

pub use density::AirDensityParams;
pub use flow::{FlowIntegrator, FlowState, FlowUpdate, Venturi};
pub use gas_exchange::{
    respiratory_quotient, CycleInputs, GasBaselines, GasExchangeCalculator, GasExchangeSnapshot,
};
pub use ventilation::{next_phase, BreathRecord, RunningMean, VentilationPhase, VentilationStateMachine};

use crate::config::*;
use crate::events::{Co2Reading, Fault, SensorSample};
use crate::settings::Settings;

/// One completed gas-exchange cycle: the breath that triggered it and the
/// quantities derived from it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub at_ms: u64,
    /// Session time at the cycle.
    pub elapsed_ms: u64,
    pub breath: BreathRecord,
    pub snapshot: GasExchangeSnapshot,
    pub density: AirDensityParams,
    pub o2_pct: f32,
    pub initial_o2_pct: f32,
    pub consumed_o2_pct: f32,
    pub co2: Option<Co2Reading>,
    pub initial_co2_ppm: f32,
    /// Display volume from the free-running integral (L).
    pub expiratory_volume_l: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub phase: VentilationPhase,
    pub breath: Option<BreathRecord>,
    pub cycle: Option<CycleReport>,
    pub faults: Vec<Fault>,
}

pub struct MetabolicEngine {
    cfg: EngineConfig,
    weight_kg: f32,
    co2_enabled: bool,
    flow: FlowIntegrator,
    ventilation: VentilationStateMachine,
    gas: GasBaselines,
    calc: GasExchangeCalculator,
    density: AirDensityParams,
    started_at_ms: u64,
    last_tick_ms: Option<u64>,
    last_cycle_ms: u64,
}

impl MetabolicEngine {
    pub fn new(cfg: EngineConfig, settings: &Settings, demo: bool, now_ms: u64) -> Self {
        Self {
            flow: FlowIntegrator::new(&cfg, settings.flow_correction_factor),
            ventilation: VentilationStateMachine::new(
                cfg.pressure_threshold_pa,
                cfg.min_breath_volume_ml,
                now_ms,
            ),
            gas: GasBaselines::new(&cfg, demo),
            calc: GasExchangeCalculator::new(),
            density: AirDensityParams::default(),
            weight_kg: settings.subject_weight_kg,
            co2_enabled: settings.co2_enabled,
            cfg,
            started_at_ms: now_ms,
            last_tick_ms: None,
            last_cycle_ms: now_ms,
        }
    }

    /// Pick up edited settings (weight, correction factor, CO2 on/off).
    pub fn apply_settings(&mut self, settings: &Settings) {
        self.weight_kg = settings.subject_weight_kg;
        self.co2_enabled = settings.co2_enabled;
        self.flow.set_correction(settings.flow_correction_factor);
    }

    /// Baselines, exposed for the power-on calibration prompts.
    pub fn gas_mut(&mut self) -> &mut GasBaselines {
        &mut self.gas
    }

    pub fn gas(&self) -> &GasBaselines {
        &self.gas
    }

    pub fn flow(&self) -> &FlowState {
        self.flow.state()
    }

    pub fn phase(&self) -> VentilationPhase {
        self.ventilation.phase()
    }

    pub fn density(&self) -> &AirDensityParams {
        &self.density
    }

    pub fn snapshot(&self) -> &GasExchangeSnapshot {
        self.calc.snapshot()
    }

    pub fn expiratory_volume_l(&self) -> f32 {
        self.flow.expiratory_volume_l()
    }

    pub fn started_at_ms(&self) -> u64 {
        self.started_at_ms
    }

    pub fn tick(&mut self, sample: &SensorSample) -> TickReport {
        let now = sample.timestamp_ms;
        let elapsed = self
            .last_tick_ms
            .map_or(0, |last| now.saturating_sub(last));
        self.last_tick_ms = Some(now);

        let mut faults = Vec::new();

        let update = self
            .flow
            .update(sample.pressure_pa, elapsed, self.density.rho_ambient);
        faults.extend(update.fault);

        let state = *self.flow.state();
        let transition = self
            .ventilation
            .step(state.smoothed_pressure_pa, state.breath_volume_ml, now);
        if transition.breath.is_some() {
            self.flow.take_breath_volume();
        }
        if transition.degenerate {
            faults.push(Fault::DivisionDegenerate);
        }

        if matches!(
            transition.phase,
            VentilationPhase::Inspiration | VentilationPhase::ExpirationDone
        ) {
            self.ingest_gas(sample, &mut faults);
        }

        let cycle = transition.breath.map(|breath| self.run_cycle(now, breath));
        // Zero mean ventilation leaves VO2 at 0 and RQ undefined.
        if cycle.is_some()
            && !transition.degenerate
            && self.ventilation.ventilation_mean() <= 0.0
        {
            faults.push(Fault::DivisionDegenerate);
        }

        for fault in &faults {
            log::warn!("{}", fault.warning());
        }

        TickReport {
            phase: self.ventilation.phase(),
            breath: transition.breath,
            cycle,
            faults,
        }
    }

    fn ingest_gas(&mut self, sample: &SensorSample, faults: &mut Vec<Fault>) {
        if let Err(err) = self.gas.observe_o2(sample.o2_pct) {
            faults.push(err.into());
        }
        if !self.co2_enabled {
            return;
        }
        if let Some(reading) = sample.co2 {
            if let Err(err) = self.gas.observe_co2(reading) {
                faults.push(err.into());
            }
        }
    }

    /// Consume `ExpirationDone`: refresh densities, compute the cycle and
    /// return to `Inspiration`.
    fn run_cycle(&mut self, now: u64, breath: BreathRecord) -> CycleReport {
        let temp_c = self
            .gas
            .last_co2()
            .map_or(DEFAULT_AIR_TEMPERATURE_C, |c| c.temp_c);
        self.density = AirDensityParams::recompute(self.cfg.ambient_pressure_pa, temp_c);

        let elapsed = now.saturating_sub(self.last_cycle_ms);
        self.last_cycle_ms = now;

        let inputs = CycleInputs {
            last_o2_pct: self.gas.last_o2_pct(),
            initial_o2_pct: self.gas.initial_o2_pct(),
            co2_percent_delta: if self.co2_enabled {
                self.gas.co2_percent_delta()
            } else {
                None
            },
            ventilation_mean_lpm: self.ventilation.ventilation_mean(),
            density: self.density,
            weight_kg: self.weight_kg,
            elapsed_since_last_cycle_ms: elapsed,
        };
        let snapshot = self.calc.compute_cycle(&inputs);
        self.ventilation.acknowledge();

        log::info!(
            "Cycle: VO2 {:.1} ml/min ({:.2}/kg), VCO2 {:.1} ml/min, RQ {:.2}, {:.1} kcal",
            snapshot.vo2_total_ml_per_min,
            snapshot.vo2_per_kg,
            snapshot.vco2_total_ml_per_min,
            snapshot.respiratory_quotient,
            snapshot.cumulative_calories
        );

        CycleReport {
            at_ms: now,
            elapsed_ms: now.saturating_sub(self.started_at_ms),
            breath,
            snapshot,
            density: self.density,
            o2_pct: self.gas.last_o2_pct(),
            initial_o2_pct: self.gas.initial_o2_pct(),
            consumed_o2_pct: self.gas.consumed_o2_pct(),
            co2: if self.co2_enabled { self.gas.last_co2() } else { None },
            initial_co2_ppm: self.gas.initial_co2_ppm(),
            expiratory_volume_l: self.flow.expiratory_volume_l(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::SensorKind;

    const STEP_MS: u64 = 20;

    fn sample(t: u64, pressure: f32) -> SensorSample {
        SensorSample {
            timestamp_ms: t,
            pressure_pa: pressure,
            o2_pct: 16.9,
            co2: Some(Co2Reading {
                ppm: 35_000.0,
                temp_c: 15.0,
                humidity_pct: 60.0,
            }),
        }
    }

    /// Tick from `from` to `to` (exclusive) at a fixed pressure.
    fn run(
        engine: &mut MetabolicEngine,
        from: u64,
        to: u64,
        pressure: f32,
        reports: &mut Vec<TickReport>,
    ) {
        let mut t = from;
        while t < to {
            reports.push(engine.tick(&sample(t, pressure)));
            t += STEP_MS;
        }
    }

    fn engine(co2_enabled: bool) -> MetabolicEngine {
        let settings = Settings {
            co2_enabled,
            ..Settings::default()
        };
        let mut engine = MetabolicEngine::new(EngineConfig::default(), &settings, false, 0);
        engine.gas_mut().calibrate_o2(20.9);
        engine.gas_mut().finish_o2_calibration();
        engine.gas_mut().calibrate_co2(400.0);
        engine.gas_mut().finish_co2_calibration();
        engine
    }

    #[test]
    fn one_excursion_makes_one_breath_timed_from_start() {
        let mut e = engine(true);
        let mut reports = Vec::new();
        run(&mut e, 0, 3000, 0.0, &mut reports);
        run(&mut e, 3000, 5000, 10.0, &mut reports);
        run(&mut e, 5000, 8000, 0.0, &mut reports);

        let breaths: Vec<_> = reports.iter().filter_map(|r| r.breath).collect();
        assert_eq!(breaths.len(), 1);
        let breath = breaths[0];
        assert_eq!(breath.duration_ms, breath.completed_at_ms);
        assert!(breath.duration_ms > 5000, "{}", breath.duration_ms);
        // ~1.17 L/s for 2 s.
        assert!((breath.expired_volume_l - 2.34).abs() < 0.1, "{}", breath.expired_volume_l);
        assert_eq!(reports.iter().filter(|r| r.cycle.is_some()).count(), 1);
    }

    #[test]
    fn breath_volume_is_zero_after_every_completion() {
        let mut e = engine(true);
        let mut t = 0;
        let mut completions = 0;
        for _ in 0..5 {
            for (duration, pressure) in [(1500, 12.0), (2000, 0.0)] {
                let end = t + duration;
                while t < end {
                    let report = e.tick(&sample(t, pressure));
                    let volume = e.flow().breath_volume_ml;
                    assert!(volume >= 0.0);
                    if report.breath.is_some() {
                        completions += 1;
                        assert_eq!(volume, 0.0);
                        assert_eq!(report.phase, VentilationPhase::Inspiration);
                    }
                    t += STEP_MS;
                }
            }
        }
        assert_eq!(completions, 5);
    }

    #[test]
    fn cycles_produce_bounded_monotone_results() {
        let mut e = engine(true);
        let mut reports = Vec::new();
        let mut t = 0;
        for _ in 0..8 {
            run(&mut e, t, t + 1500, 15.0, &mut reports);
            run(&mut e, t + 1500, t + 4000, 0.0, &mut reports);
            t += 4000;
        }
        let cycles: Vec<_> = reports.iter().filter_map(|r| r.cycle.as_ref()).collect();
        assert_eq!(cycles.len(), 8);

        let mut calories = 0.0;
        let mut best = 0.0;
        for c in &cycles {
            let s = &c.snapshot;
            assert!((0.0..=RQ_MAX).contains(&s.respiratory_quotient));
            assert!(s.cumulative_calories >= calories);
            assert!(s.personal_best_vo2_per_kg >= best);
            calories = s.cumulative_calories;
            best = s.personal_best_vo2_per_kg;
        }
        let last = cycles[cycles.len() - 1];
        assert!(last.snapshot.vo2_total_ml_per_min > 0.0);
        assert!(last.snapshot.vco2_total_ml_per_min > 0.0);
        assert!((last.consumed_o2_pct - 4.0).abs() < 1e-3);
        assert!(calories > 0.0);
    }

    #[test]
    fn co2_disabled_reports_no_vco2() {
        let mut e = engine(false);
        let mut reports = Vec::new();
        run(&mut e, 0, 1500, 15.0, &mut reports);
        run(&mut e, 1500, 4000, 0.0, &mut reports);
        let cycle = reports.iter().find_map(|r| r.cycle.as_ref()).unwrap();
        assert_eq!(cycle.snapshot.vco2_total_ml_per_min, 0.0);
        assert_eq!(cycle.snapshot.respiratory_quotient, 0.0);
        assert!(cycle.co2.is_none());
    }

    #[test]
    fn nan_pressure_is_flagged_and_the_loop_keeps_going() {
        let mut e = engine(true);
        let mut reports = Vec::new();
        run(&mut e, 0, 1000, 15.0, &mut reports);
        let report = e.tick(&sample(1000, f32::NAN));
        assert!(report
            .faults
            .contains(&Fault::SensorFault(SensorKind::Pressure)));
        assert_eq!(report.phase, VentilationPhase::Expiration);
        run(&mut e, 1020, 3000, 0.0, &mut reports);
        assert!(reports.iter().any(|r| r.cycle.is_some()));
        assert!(e.flow().cumulative_volume_ml.is_finite());
    }

    #[test]
    fn shallow_breath_after_a_long_rest_is_flagged() {
        let mut e = engine(true);
        let mut reports = Vec::new();
        // ~0.1 L over 20 s: VE well under 1 L/min, so the mean snaps to 0.
        run(&mut e, 0, 20_000, 0.0, &mut reports);
        run(&mut e, 20_000, 20_300, 1.0, &mut reports);
        run(&mut e, 20_300, 21_000, 0.0, &mut reports);

        let report = reports.iter().find(|r| r.cycle.is_some()).unwrap();
        assert_eq!(report.faults, vec![Fault::DivisionDegenerate]);
        let cycle = report.cycle.as_ref().unwrap();
        assert_eq!(cycle.snapshot.vo2_total_ml_per_min, 0.0);
        assert_eq!(cycle.snapshot.respiratory_quotient, 0.0);
    }

    #[test]
    fn density_follows_the_co2_sensor_temperature() {
        let mut e = engine(true);
        assert_eq!(*e.density(), AirDensityParams::default());
        let mut reports = Vec::new();
        run(&mut e, 0, 1500, 15.0, &mut reports);
        run(&mut e, 1500, 4000, 0.0, &mut reports);
        let expected = AirDensityParams::recompute(STANDARD_PRESSURE_PA, 15.0);
        assert_eq!(*e.density(), expected);
    }
}
