// VO2 Mini: Flow Integrator
//
// Turns the venturi's differential pressure into volumetric flow with the
// Bernoulli orifice equation and integrates it against wall-clock time, so
// the volume stays correct when the loop period jitters.

use serde::Serialize;

use crate::config::*;
use crate::error::{finite, SensorError};
use crate::events::{Fault, SensorKind};

/// Fixed inlet/throat geometry. `inlet_area > throat_area` is a build-time
/// invariant (see [`VenturiDiameter`]).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Venturi {
    pub inlet_area: f32,
    pub throat_area: f32,
}

impl Venturi {
    pub fn new(diameter: VenturiDiameter) -> Self {
        Self {
            inlet_area: VENTURI_AREA_INLET,
            throat_area: diameter.throat_area(),
        }
    }

    /// Mass flow in g/s for a pressure drop in Pa and density in kg/m³.
    pub fn mass_flow(&self, pressure_pa: f32, rho: f32) -> f32 {
        let denom = 1.0 / (self.throat_area * self.throat_area)
            - 1.0 / (self.inlet_area * self.inlet_area);
        1000.0 * (pressure_pa.abs() * 2.0 * rho / denom).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct FlowState {
    pub smoothed_pressure_pa: f32,
    /// g/s
    pub mass_flow: f32,
    /// L/s, equivalently ml/ms
    pub vol_flow: f32,
    /// Running integral since the last completed breath.
    pub breath_volume_ml: f32,
    /// Free-running integral, never reset.
    pub cumulative_volume_ml: f32,
}

/// Result of one integration step.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FlowUpdate {
    pub volume_delta_ml: f32,
    /// Filtered pressure is at or above the threshold.
    pub active: bool,
    pub fault: Option<Fault>,
}

pub struct FlowIntegrator {
    venturi: Venturi,
    threshold_pa: f32,
    ceiling_pa: f32,
    display_step_ml: f32,
    correction: f32,
    state: FlowState,
    display_mark_ml: f32,
    expiratory_volume_l: f32,
}

impl FlowIntegrator {
    pub fn new(cfg: &EngineConfig, correction: f32) -> Self {
        Self {
            venturi: Venturi::new(cfg.venturi),
            threshold_pa: cfg.pressure_threshold_pa,
            ceiling_pa: cfg.pressure_ceiling_pa,
            display_step_ml: cfg.display_volume_step_ml,
            correction,
            state: FlowState::default(),
            display_mark_ml: 0.0,
            expiratory_volume_l: 0.0,
        }
    }

    pub fn state(&self) -> &FlowState {
        &self.state
    }

    pub fn set_correction(&mut self, correction: f32) {
        self.correction = correction;
    }

    /// Last expiratory volume shown on screen (L). Advances in steps of at
    /// least `display_volume_step_ml` of cumulative flow.
    pub fn expiratory_volume_l(&self) -> f32 {
        self.expiratory_volume_l
    }

    /// Feed one raw pressure reading taken `elapsed_ms` after the previous one.
    pub fn update(&mut self, raw_pressure_pa: f32, elapsed_ms: u64, rho: f32) -> FlowUpdate {
        let mut fault = None;

        // A bad reading holds the filter at the last good pressure.
        let pressure = match finite(SensorKind::Pressure, raw_pressure_pa) {
            Ok(raw) => self.state.smoothed_pressure_pa / 2.0 + raw / 2.0,
            Err(err) => {
                fault = Some(Fault::from(err));
                self.state.smoothed_pressure_pa
            }
        };
        if let Err(err) = self.check_ceiling(pressure) {
            fault = fault.or(Some(Fault::from(err)));
        }
        let pressure = pressure.max(0.0);
        self.state.smoothed_pressure_pa = pressure;

        if pressure < self.threshold_pa {
            self.state.mass_flow = 0.0;
            self.state.vol_flow = 0.0;
            self.advance_display_volume();
            return FlowUpdate {
                volume_delta_ml: 0.0,
                active: false,
                fault,
            };
        }

        let rho = if rho > 0.0 { rho } else { RHO_AMBIENT_DEFAULT };
        self.state.mass_flow = self.venturi.mass_flow(pressure, rho);
        self.state.vol_flow = self.state.mass_flow / rho * self.correction;

        let delta = self.state.vol_flow * elapsed_ms as f32;
        self.state.breath_volume_ml += delta;
        self.state.cumulative_volume_ml += delta;

        FlowUpdate {
            volume_delta_ml: delta,
            active: true,
            fault,
        }
    }

    /// Close out the current breath: returns its volume and zeroes the
    /// running integral.
    pub fn take_breath_volume(&mut self) -> f32 {
        std::mem::take(&mut self.state.breath_volume_ml)
    }

    fn check_ceiling(&self, pressure: f32) -> Result<(), SensorError> {
        if pressure > self.ceiling_pa {
            Err(SensorError::Saturated {
                sensor: SensorKind::Pressure,
                value: pressure,
                limit: self.ceiling_pa,
            })
        } else {
            Ok(())
        }
    }

    fn advance_display_volume(&mut self) {
        let advanced = self.state.cumulative_volume_ml - self.display_mark_ml;
        if advanced > self.display_step_ml {
            self.expiratory_volume_l = advanced / 1000.0;
            self.display_mark_ml = self.state.cumulative_volume_ml;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn integrator() -> FlowIntegrator {
        FlowIntegrator::new(&EngineConfig::default(), 1.0)
    }

    /// Drive the filter to a steady pressure without integrating.
    fn settle(flow: &mut FlowIntegrator, pressure: f32) {
        for _ in 0..40 {
            flow.update(pressure, 0, RHO_AMBIENT_DEFAULT);
        }
    }

    #[test]
    fn bernoulli_flow_for_the_18mm_throat() {
        let v = Venturi::new(VenturiDiameter::Mm18);
        let mass = v.mass_flow(10.0, 1.225);
        assert!((mass - 1.4317).abs() < 2e-3, "mass flow {}", mass);
        assert!((mass / 1.225 - 1.1687).abs() < 2e-3);
    }

    #[test]
    fn filter_averages_with_the_previous_value() {
        let mut flow = integrator();
        flow.update(10.0, 0, RHO_AMBIENT_DEFAULT);
        assert_eq!(flow.state().smoothed_pressure_pa, 5.0);
        flow.update(10.0, 0, RHO_AMBIENT_DEFAULT);
        assert_eq!(flow.state().smoothed_pressure_pa, 7.5);
    }

    #[test]
    fn integration_is_time_weighted() {
        let mut flow = integrator();
        settle(&mut flow, 10.0);
        let short = flow.update(10.0, 10, RHO_AMBIENT_DEFAULT).volume_delta_ml;
        let long = flow.update(10.0, 30, RHO_AMBIENT_DEFAULT).volume_delta_ml;
        assert!((long - 3.0 * short).abs() < 1e-3, "{} vs {}", long, short);
        let state = flow.state();
        assert!((state.breath_volume_ml - (short + long)).abs() < 1e-3);
        assert_eq!(state.breath_volume_ml, state.cumulative_volume_ml);
    }

    #[test]
    fn correction_factor_scales_volume() {
        let mut plain = integrator();
        let mut corrected = FlowIntegrator::new(&EngineConfig::default(), 1.1);
        settle(&mut plain, 8.0);
        settle(&mut corrected, 8.0);
        let a = plain.update(8.0, 20, RHO_AMBIENT_DEFAULT).volume_delta_ml;
        let b = corrected.update(8.0, 20, RHO_AMBIENT_DEFAULT).volume_delta_ml;
        assert!((b - 1.1 * a).abs() < 1e-3);
    }

    #[test]
    fn below_threshold_nothing_accumulates() {
        let mut flow = integrator();
        let update = flow.update(0.3, 1000, RHO_AMBIENT_DEFAULT);
        // Filtered to 0.15 Pa, still under 0.2 Pa.
        assert!(!update.active);
        assert_eq!(update.volume_delta_ml, 0.0);
        assert_eq!(flow.state().breath_volume_ml, 0.0);
    }

    #[test]
    fn negative_pressure_clamps_to_zero() {
        let mut flow = integrator();
        let update = flow.update(-40.0, 100, RHO_AMBIENT_DEFAULT);
        assert_eq!(flow.state().smoothed_pressure_pa, 0.0);
        assert!(!update.active);
        assert!(update.fault.is_none());
    }

    #[test]
    fn nan_holds_last_good_pressure_and_flags() {
        let mut flow = integrator();
        settle(&mut flow, 10.0);
        let before = flow.state().smoothed_pressure_pa;
        let update = flow.update(f32::NAN, 10, RHO_AMBIENT_DEFAULT);
        assert_eq!(update.fault, Some(Fault::SensorFault(SensorKind::Pressure)));
        assert_eq!(flow.state().smoothed_pressure_pa, before);
        assert!(update.active);
        assert!(flow.state().breath_volume_ml.is_finite());
    }

    #[test]
    fn saturation_is_flagged_but_used() {
        let mut flow = integrator();
        settle(&mut flow, 300.0);
        let update = flow.update(300.0, 10, RHO_AMBIENT_DEFAULT);
        assert_eq!(
            update.fault,
            Some(Fault::SensorSaturation(SensorKind::Pressure))
        );
        assert!(update.volume_delta_ml > 0.0);
    }

    #[test]
    fn taking_the_breath_volume_leaves_cumulative_alone() {
        let mut flow = integrator();
        settle(&mut flow, 10.0);
        flow.update(10.0, 500, RHO_AMBIENT_DEFAULT);
        let taken = flow.take_breath_volume();
        assert!(taken > 0.0);
        assert_eq!(flow.state().breath_volume_ml, 0.0);
        assert_eq!(flow.state().cumulative_volume_ml, taken);
    }

    #[test]
    fn display_volume_moves_in_steps() {
        let mut flow = integrator();
        settle(&mut flow, 10.0);
        // ~1.17 ml/ms: 100 ms is ~117 ml, under the 200 ml step.
        flow.update(10.0, 100, RHO_AMBIENT_DEFAULT);
        settle(&mut flow, 0.0);
        assert_eq!(flow.expiratory_volume_l(), 0.0);

        settle(&mut flow, 10.0);
        flow.update(10.0, 200, RHO_AMBIENT_DEFAULT);
        settle(&mut flow, 0.0);
        let shown = flow.expiratory_volume_l();
        let total = flow.state().cumulative_volume_ml / 1000.0;
        assert!((shown - total).abs() < 1e-4, "{} vs {}", shown, total);
    }
}
