// VO2 Mini: Measurement Loop
//
// Single cooperative loop: sample the sensors, tick the engine, fan results
// out to the sinks. Housekeeping (battery, status log) runs every 30 s from
// the same loop.

use crate::config::*;
use crate::engine::{MetabolicEngine, TickReport, VentilationPhase};
use crate::events::Fault;
use crate::sensors::{read_sample, Clock, SensorAdapter};
use crate::telemetry::TelemetrySink;

pub struct MeasurementLoop<S, C> {
    sensors: S,
    clock: C,
    engine: MetabolicEngine,
    sinks: Vec<Box<dyn TelemetrySink>>,
    last_housekeeping_ms: u64,
    breaths: u32,
}

impl<S: SensorAdapter, C: Clock> MeasurementLoop<S, C> {
    pub fn new(sensors: S, clock: C, engine: MetabolicEngine) -> Self {
        let now = clock.now_ms();
        Self {
            sensors,
            clock,
            engine,
            sinks: Vec::new(),
            last_housekeeping_ms: now,
            breaths: 0,
        }
    }

    pub fn add_sink(&mut self, sink: Box<dyn TelemetrySink>) {
        self.sinks.push(sink);
    }

    pub fn engine(&self) -> &MetabolicEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut MetabolicEngine {
        &mut self.engine
    }

    pub fn breaths(&self) -> u32 {
        self.breaths
    }

    /// One scheduling tick.
    pub fn poll(&mut self) -> TickReport {
        let now = self.clock.now_ms();
        let sample = read_sample(&mut self.sensors, now);
        let report = self.engine.tick(&sample);

        // Faults go out last: a completed cycle clears the UI banner, and a
        // fault raised on the same tick has to outlive that.
        if let Some(breath) = &report.breath {
            self.breaths += 1;
            let session_ms = now.saturating_sub(self.engine.started_at_ms());
            for sink in self.sinks.iter_mut() {
                sink.on_breath(breath, session_ms);
            }
        }
        if let Some(cycle) = &report.cycle {
            for sink in self.sinks.iter_mut() {
                sink.on_cycle(cycle);
            }
        }
        for fault in &report.faults {
            for sink in self.sinks.iter_mut() {
                sink.on_fault(*fault);
            }
        }
        report
    }

    /// Pause the caller should take before the next poll. The venturi is
    /// idle between exhalations, so sampling slows down there.
    pub fn pause_ms(&self) -> u64 {
        match self.engine.phase() {
            VentilationPhase::Inspiration => INSPIRATION_PAUSE_MS,
            _ => 0,
        }
    }

    /// True once per `HOUSEKEEPING_INTERVAL_MS`. Logs a status line.
    pub fn housekeeping_due(&mut self) -> bool {
        let now = self.clock.now_ms();
        if now.saturating_sub(self.last_housekeeping_ms) < HOUSEKEEPING_INTERVAL_MS {
            return false;
        }
        self.last_housekeeping_ms = now;
        let s = self.engine.snapshot();
        log::info!(
            "Status: {} breaths, phase {:?}, VO2 {:.1} ml/min, {:.1} kcal",
            self.breaths,
            self.engine.phase(),
            s.vo2_total_ml_per_min,
            s.cumulative_calories
        );
        true
    }
}

/// Power-on baseline capture. `keep_waiting` is asked after every rejected
/// reading (it shows the prompt and waits); returning false accepts the
/// fallback. Returns the faults raised along the way.
pub fn calibrate_baselines<S, F>(
    engine: &mut MetabolicEngine,
    sensors: &mut S,
    co2_enabled: bool,
    mut keep_waiting: F,
) -> Vec<Fault>
where
    S: SensorAdapter + ?Sized,
    F: FnMut(Fault) -> bool,
{
    let mut raised = Vec::new();

    let gas = engine.gas_mut();
    while let Some(fault) = gas.calibrate_o2(sensors.read_o2_pct()) {
        raised.push(fault);
        if !keep_waiting(fault) {
            break;
        }
    }
    let o2 = gas.finish_o2_calibration();
    log::info!("O2 baseline {:.2} %", o2);

    if co2_enabled {
        if let Some(first) = sensors.read_co2() {
            let mut ppm = first.ppm;
            while let Some(fault) = gas.calibrate_co2(ppm) {
                raised.push(fault);
                if !keep_waiting(fault) {
                    break;
                }
                ppm = sensors.read_co2().map_or(ppm, |c| c.ppm);
            }
        }
        let co2 = gas.finish_co2_calibration();
        log::info!("CO2 baseline {:.0} ppm", co2);
    }
    raised
}
