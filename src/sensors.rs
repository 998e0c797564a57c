// VO2 Mini: Sensor & Clock Interfaces
//
// The engine sees decoded scalars only. Device builds bind these traits to
// the I2C drivers; host builds use the DEMO adapter or a scripted trace.

use std::cell::Cell;
use std::collections::VecDeque;
use std::time::Instant;

use crate::events::{Co2Reading, SensorSample};

pub trait SensorAdapter {
    /// Venturi differential pressure (Pa). NaN when the sensor misbehaves.
    fn read_pressure_pa(&mut self) -> f32;
    /// O2 volume fraction (%).
    fn read_o2_pct(&mut self) -> f32;
    /// `None` until the CO2 sensor has a fresh measurement.
    fn read_co2(&mut self) -> Option<Co2Reading>;
}

/// Monotonic millisecond timebase.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}

pub fn read_sample<S: SensorAdapter + ?Sized>(sensors: &mut S, now_ms: u64) -> SensorSample {
    SensorSample {
        timestamp_ms: now_ms,
        pressure_pa: sensors.read_pressure_pa(),
        o2_pct: sensors.read_o2_pct(),
        co2: sensors.read_co2(),
    }
}

/// Milliseconds since construction.
pub struct StdClock {
    start: Instant,
}

impl StdClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for StdClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// Manually advanced clock for simulation and tests.
#[derive(Debug, Default)]
pub struct SimClock {
    now: Cell<u64>,
}

impl SimClock {
    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }
}

impl Clock for SimClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }
}

// ---------------------------------------------------------------------------
// DEMO adapter
// ---------------------------------------------------------------------------

/// Synthetic subject for DEMO mode on a host: a regular breathing pattern on
/// the venturi and room air on the gas sensors. The engine's DEMO flag
/// replaces the gas readings with the fixed demo depletion.
pub struct DemoSensors<C: Clock> {
    clock: C,
    breath_period_ms: u64,
    exhale_ms: u64,
    peak_pressure_pa: f32,
    co2_interval_ms: u64,
    last_co2_ms: Option<u64>,
}

impl<C: Clock> DemoSensors<C> {
    /// 15 breaths/min, 1.6 s exhalations peaking at 12 Pa.
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            breath_period_ms: 4000,
            exhale_ms: 1600,
            peak_pressure_pa: 12.0,
            co2_interval_ms: 2000,
            last_co2_ms: None,
        }
    }
}

impl<C: Clock> SensorAdapter for DemoSensors<C> {
    fn read_pressure_pa(&mut self) -> f32 {
        let t = self.clock.now_ms() % self.breath_period_ms;
        if t >= self.exhale_ms {
            return 0.0;
        }
        let x = core::f32::consts::PI * t as f32 / self.exhale_ms as f32;
        self.peak_pressure_pa * x.sin() * x.sin()
    }

    fn read_o2_pct(&mut self) -> f32 {
        20.9
    }

    fn read_co2(&mut self) -> Option<Co2Reading> {
        let now = self.clock.now_ms();
        if let Some(last) = self.last_co2_ms {
            if now.saturating_sub(last) < self.co2_interval_ms {
                return None;
            }
        }
        self.last_co2_ms = Some(now);
        Some(Co2Reading {
            ppm: 420.0,
            temp_c: 24.0,
            humidity_pct: 45.0,
        })
    }
}

// ---------------------------------------------------------------------------
// Scripted adapter
// ---------------------------------------------------------------------------

/// Replays recorded readings in order; the last reading repeats once the
/// script runs out.
#[derive(Debug, Default)]
pub struct ScriptedSensors {
    pressure: VecDeque<f32>,
    o2: VecDeque<f32>,
    co2: VecDeque<Option<Co2Reading>>,
    last_pressure: f32,
    last_o2: f32,
}

impl ScriptedSensors {
    pub fn new() -> Self {
        Self {
            last_o2: 20.9,
            ..Self::default()
        }
    }

    pub fn push_pressure(&mut self, readings: impl IntoIterator<Item = f32>) -> &mut Self {
        self.pressure.extend(readings);
        self
    }

    pub fn push_o2(&mut self, readings: impl IntoIterator<Item = f32>) -> &mut Self {
        self.o2.extend(readings);
        self
    }

    pub fn push_co2(&mut self, readings: impl IntoIterator<Item = Option<Co2Reading>>) -> &mut Self {
        self.co2.extend(readings);
        self
    }
}

impl SensorAdapter for ScriptedSensors {
    fn read_pressure_pa(&mut self) -> f32 {
        if let Some(p) = self.pressure.pop_front() {
            self.last_pressure = p;
        }
        self.last_pressure
    }

    fn read_o2_pct(&mut self) -> f32 {
        if let Some(o2) = self.o2.pop_front() {
            self.last_o2 = o2;
        }
        self.last_o2
    }

    fn read_co2(&mut self) -> Option<Co2Reading> {
        self.co2.pop_front().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_trace_exhales_then_rests() {
        let clock = SimClock::default();
        let mut demo = DemoSensors::new(&clock);
        assert_eq!(demo.read_pressure_pa(), 0.0);
        clock.advance(800);
        assert!((demo.read_pressure_pa() - 12.0).abs() < 1e-3);
        clock.advance(1000);
        assert_eq!(demo.read_pressure_pa(), 0.0);
        clock.advance(2200);
        assert_eq!(demo.read_pressure_pa(), 0.0);
    }

    #[test]
    fn demo_co2_arrives_every_two_seconds() {
        let clock = SimClock::default();
        let mut demo = DemoSensors::new(&clock);
        assert!(demo.read_co2().is_some());
        clock.advance(1000);
        assert!(demo.read_co2().is_none());
        clock.advance(1000);
        assert!(demo.read_co2().is_some());
    }

    #[test]
    fn scripted_readings_repeat_the_last_value() {
        let mut s = ScriptedSensors::new();
        s.push_pressure([1.0, 2.0]).push_o2([18.0]);
        let a = read_sample(&mut s, 0);
        let b = read_sample(&mut s, 10);
        let c = read_sample(&mut s, 20);
        assert_eq!((a.pressure_pa, b.pressure_pa, c.pressure_pa), (1.0, 2.0, 2.0));
        assert_eq!(c.o2_pct, 18.0);
        assert!(c.co2.is_none());
        assert_eq!(c.timestamp_ms, 20);
    }
}
