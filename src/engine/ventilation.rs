// VO2 Mini: Ventilation State Machine
//
// Segments the filtered venturi pressure into breaths. The venturi only sees
// exhaled flow, so `Inspiration` means "not currently exhaling" rather than
// a measured inhalation.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VentilationPhase {
    /// Power-on, before the first exhalation.
    WaitingPressure,
    Inspiration,
    Expiration,
    /// A breath just closed; the scheduler owes a gas-exchange cycle.
    ExpirationDone,
}

/// Pure phase transition on a threshold crossing.
///
/// `armed` says whether the current exhalation has moved enough air to count
/// as a breath. Returns the next phase and whether a breath completed.
pub fn next_phase(
    phase: VentilationPhase,
    pressure_pa: f32,
    threshold_pa: f32,
    armed: bool,
) -> (VentilationPhase, bool) {
    use VentilationPhase::*;

    if pressure_pa >= threshold_pa {
        return (Expiration, false);
    }
    match phase {
        Expiration if armed => (ExpirationDone, true),
        other => (other, false),
    }
}

/// One completed exhalation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BreathRecord {
    pub completed_at_ms: u64,
    pub expired_volume_l: f32,
    /// Time since the previous completion.
    pub duration_ms: u64,
    /// VE, L/min
    pub ventilation_rate_lpm: f32,
    pub ventilation_rate_mean: f32,
    /// Breaths per minute.
    pub breath_freq: f32,
    pub breath_freq_mean: f32,
}

/// Exponentially weighted mean, 3/4 history and 1/4 new sample, snapped to
/// zero below 1.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RunningMean(f32);

impl RunningMean {
    pub fn push(&mut self, sample: f32) -> f32 {
        let mut next = self.0 * 3.0 / 4.0 + sample / 4.0;
        if !(next >= 1.0) {
            next = 0.0;
        }
        self.0 = next;
        next
    }

    pub fn value(&self) -> f32 {
        self.0
    }
}

pub struct VentilationStateMachine {
    phase: VentilationPhase,
    threshold_pa: f32,
    min_breath_volume_ml: f32,
    last_completion_ms: u64,
    ve_mean: RunningMean,
    freq_mean: RunningMean,
}

/// Outcome of one [`VentilationStateMachine::step`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub phase: VentilationPhase,
    pub breath: Option<BreathRecord>,
    /// The closed breath had zero duration; its rates were forced to 0.
    pub degenerate: bool,
}

impl VentilationStateMachine {
    pub fn new(threshold_pa: f32, min_breath_volume_ml: f32, started_at_ms: u64) -> Self {
        Self {
            phase: VentilationPhase::WaitingPressure,
            threshold_pa,
            min_breath_volume_ml,
            last_completion_ms: started_at_ms,
            ve_mean: RunningMean::default(),
            freq_mean: RunningMean::default(),
        }
    }

    pub fn phase(&self) -> VentilationPhase {
        self.phase
    }

    pub fn ventilation_mean(&self) -> f32 {
        self.ve_mean.value()
    }

    pub fn frequency_mean(&self) -> f32 {
        self.freq_mean.value()
    }

    /// Advance on the filtered pressure. `breath_volume_ml` is the flow
    /// integrator's running breath volume; the caller resets it when a
    /// record comes back.
    pub fn step(&mut self, pressure_pa: f32, breath_volume_ml: f32, now_ms: u64) -> Transition {
        let armed = breath_volume_ml > self.min_breath_volume_ml;
        let (phase, completed) = next_phase(self.phase, pressure_pa, self.threshold_pa, armed);
        if phase != self.phase {
            log::debug!("Ventilation {:?} -> {:?}", self.phase, phase);
        }
        self.phase = phase;

        if !completed {
            return Transition {
                phase,
                breath: None,
                degenerate: false,
            };
        }

        let (breath, degenerate) = self.close_breath(breath_volume_ml, now_ms);
        Transition {
            phase,
            breath: Some(breath),
            degenerate,
        }
    }

    /// Hand the pending `ExpirationDone` over to the scheduler.
    pub fn acknowledge(&mut self) {
        if self.phase == VentilationPhase::ExpirationDone {
            self.phase = VentilationPhase::Inspiration;
        }
    }

    fn close_breath(&mut self, volume_ml: f32, now_ms: u64) -> (BreathRecord, bool) {
        let duration_ms = now_ms.saturating_sub(self.last_completion_ms);
        self.last_completion_ms = now_ms;

        let degenerate = duration_ms == 0;
        let (ve, mut freq) = if degenerate {
            (0.0, 0.0)
        } else {
            let ms = duration_ms as f32;
            (volume_ml / ms * 60.0, 60_000.0 / ms)
        };
        if ve < 0.1 {
            freq = 0.0;
        }

        let record = BreathRecord {
            completed_at_ms: now_ms,
            expired_volume_l: volume_ml / 1000.0,
            duration_ms,
            ventilation_rate_lpm: ve,
            ventilation_rate_mean: self.ve_mean.push(ve),
            breath_freq: freq,
            breath_freq_mean: self.freq_mean.push(freq),
        };
        log::info!(
            "Breath: {:.3} L over {} ms, VE {:.1} L/min (mean {:.1}), {:.1}/min",
            record.expired_volume_l,
            record.duration_ms,
            record.ventilation_rate_lpm,
            record.ventilation_rate_mean,
            record.breath_freq
        );
        (record, degenerate)
    }
}

#[cfg(test)]
mod tests {
    use super::VentilationPhase::*;
    use super::*;

    const T: f32 = 0.2;

    #[test]
    fn rising_pressure_always_means_expiration() {
        for phase in [WaitingPressure, Inspiration, Expiration, ExpirationDone] {
            assert_eq!(next_phase(phase, 0.5, T, false), (Expiration, false));
        }
    }

    #[test]
    fn falling_pressure_closes_only_an_armed_expiration() {
        assert_eq!(next_phase(Expiration, 0.1, T, true), (ExpirationDone, true));
        assert_eq!(next_phase(Expiration, 0.1, T, false), (Expiration, false));
        assert_eq!(next_phase(Inspiration, 0.1, T, true), (Inspiration, false));
        assert_eq!(
            next_phase(WaitingPressure, 0.0, T, false),
            (WaitingPressure, false)
        );
    }

    #[test]
    fn running_mean_weights_and_snaps() {
        let mut m = RunningMean::default();
        assert_eq!(m.push(40.0), 10.0);
        assert_eq!(m.push(40.0), 17.5);
        let mut small = RunningMean::default();
        assert_eq!(small.push(3.0), 0.0);
        assert_eq!(small.push(f32::NAN), 0.0);
    }

    #[test]
    fn duration_runs_from_the_previous_completion() {
        let mut vsm = VentilationStateMachine::new(T, 50.0, 0);
        // Exhale from t=3000 to t=5000, 600 ml.
        assert!(vsm.step(5.0, 0.0, 3000).breath.is_none());
        assert!(vsm.step(5.0, 600.0, 5000).breath.is_none());
        let t = vsm.step(0.0, 600.0, 5000);
        let breath = t.breath.unwrap();
        assert_eq!(t.phase, ExpirationDone);
        assert_eq!(breath.duration_ms, 5000);
        assert!((breath.expired_volume_l - 0.6).abs() < 1e-6);
        // 600 ml over 5 s → 7.2 L/min, 12 breaths/min.
        assert!((breath.ventilation_rate_lpm - 7.2).abs() < 1e-4);
        assert!((breath.breath_freq - 12.0).abs() < 1e-4);
        assert!((breath.ventilation_rate_mean - 1.8).abs() < 1e-4);
        assert_eq!(breath.breath_freq_mean, 3.0);
    }

    #[test]
    fn small_dip_does_not_split_a_breath() {
        let mut vsm = VentilationStateMachine::new(T, 50.0, 0);
        vsm.step(5.0, 10.0, 100);
        let t = vsm.step(0.0, 30.0, 200);
        assert_eq!(t.phase, Expiration);
        assert!(t.breath.is_none());
        vsm.step(5.0, 400.0, 900);
        assert!(vsm.step(0.0, 400.0, 1000).breath.is_some());
    }

    #[test]
    fn zero_duration_breath_yields_zero_rates() {
        let mut vsm = VentilationStateMachine::new(T, 50.0, 0);
        vsm.step(5.0, 500.0, 2000);
        assert!(!vsm.step(0.0, 500.0, 2000).degenerate);
        vsm.acknowledge();
        vsm.step(5.0, 500.0, 2000);
        let t = vsm.step(0.0, 500.0, 2000);
        assert!(t.degenerate);
        let breath = t.breath.unwrap();
        assert_eq!(breath.duration_ms, 0);
        assert_eq!(breath.ventilation_rate_lpm, 0.0);
        assert_eq!(breath.breath_freq, 0.0);
        assert!(breath.ventilation_rate_mean.is_finite());
    }

    #[test]
    fn frequency_is_zero_for_negligible_ventilation() {
        let mut vsm = VentilationStateMachine::new(T, 0.0, 0);
        vsm.step(5.0, 1.0, 10);
        // 1 ml over 60 s is far under 0.1 L/min.
        let breath = vsm.step(0.0, 1.0, 60_000).breath.unwrap();
        assert!(breath.ventilation_rate_lpm < 0.1);
        assert_eq!(breath.breath_freq, 0.0);
    }

    #[test]
    fn acknowledge_moves_done_to_inspiration_only() {
        let mut vsm = VentilationStateMachine::new(T, 50.0, 0);
        vsm.acknowledge();
        assert_eq!(vsm.phase(), WaitingPressure);
        vsm.step(5.0, 100.0, 1000);
        vsm.step(0.0, 100.0, 1500);
        vsm.acknowledge();
        assert_eq!(vsm.phase(), Inspiration);
    }
}
