// VO2 Mini: Air Density Correction
//
// Ideal-gas densities for the ambient (ATP) and body (BTPS) conditions. The
// STPD reference is fixed.

use serde::Serialize;

use crate::config::*;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AirDensityParams {
    pub rho_ambient: f32,
    pub rho_stpd: f32,
    pub rho_btps: f32,
}

impl AirDensityParams {
    /// Densities from the ambient pressure and the SCD30's temperature.
    pub fn recompute(ambient_pressure_pa: f32, temp_c: f32) -> Self {
        Self {
            rho_ambient: ambient_pressure_pa / (temp_c + KELVIN_OFFSET) / GAS_CONSTANT_DRY_AIR,
            rho_stpd: RHO_STPD,
            rho_btps: ambient_pressure_pa
                / (BTPS_TEMPERATURE_C + KELVIN_OFFSET)
                / GAS_CONSTANT_BTPS,
        }
    }

    /// BTPS → STPD volume conversion factor.
    pub fn btps_to_stpd(&self) -> f32 {
        self.rho_btps / self.rho_stpd
    }
}

impl Default for AirDensityParams {
    fn default() -> Self {
        Self {
            rho_ambient: RHO_AMBIENT_DEFAULT,
            rho_stpd: RHO_STPD,
            rho_btps: RHO_BTPS_DEFAULT,
        }
    }
}
