// VO2 Mini: Hardware & System Configuration
// Target: LilyGO TTGO T-Display (ESP32, Xtensa)

use serde::{Deserialize, Serialize};

pub const FIRMWARE_VERSION: &str = "V2.3 2026/02/07";

// ---------------------------------------------------------------------------
// GPIO Pin Definitions (TTGO T-Display pinout)
// ---------------------------------------------------------------------------
pub const PIN_BUTTON_MINUS: i32 = 0;  // Left button (INPUT_PULLUP, active LOW)
pub const PIN_BUTTON_PLUS: i32 = 35;  // Right button (INPUT_PULLUP, active LOW)
pub const PIN_ADC_ENABLE: i32 = 14;   // Battery divider enable
pub const PIN_BATTERY_ADC: i32 = 34;  // Battery voltage (ADC1 channel 6)
pub const PIN_I2C_SDA: i32 = 21;
pub const PIN_I2C_SCL: i32 = 22;
pub const PIN_TFT_MOSI: i32 = 19;
pub const PIN_TFT_SCLK: i32 = 18;
pub const PIN_TFT_CS: i32 = 5;
pub const PIN_TFT_DC: i32 = 16;
pub const PIN_TFT_BACKLIGHT: i32 = 4;

// ---------------------------------------------------------------------------
// I2C Bus
// ---------------------------------------------------------------------------
pub const I2C_ADDR_OXYGEN: u8 = 0x73;   // DFRobot SEN0322, address jumper 3
pub const I2C_ADDR_SCD30: u8 = 0x61;    // Sensirion SCD30 CO2
pub const I2C_ADDR_D6FPH: u8 = 0x6C;    // Omron D6F-PH differential pressure
pub const I2C_TIMEOUT_TICKS: u32 = 1000; // FreeRTOS ticks

// ---------------------------------------------------------------------------
// Display (ST7789 240x135, landscape)
// ---------------------------------------------------------------------------
pub const SCREEN_WIDTH: u32 = 240;
pub const SCREEN_HEIGHT: u32 = 135;

// ---------------------------------------------------------------------------
// Timing (milliseconds)
// ---------------------------------------------------------------------------
pub const HOUSEKEEPING_INTERVAL_MS: u64 = 30_000;
pub const INSPIRATION_PAUSE_MS: u64 = 100;     // settle time while not exhaling
pub const SPLASH_DISPLAY_MS: u64 = 3000;
pub const SENSOR_STATUS_DISPLAY_MS: u64 = 2000;
pub const CALIBRATION_POLL_MS: u64 = 500;      // re-read while a baseline prompt is up
pub const CALIBRATION_RESULT_MS: u64 = 5000;   // show the accepted baseline
pub const WEIGHT_POLL_MS: u64 = 200;
pub const WEIGHT_EDIT_TIMEOUT_MS: u64 = 5000;
pub const DEBOUNCE_MS: u64 = 50;
pub const LONG_PRESS_MS: u64 = 3000;
pub const DOUBLE_CLICK_WINDOW_MS: u64 = 400;

// ---------------------------------------------------------------------------
// Venturi geometry (m²)
// ---------------------------------------------------------------------------
pub const VENTURI_AREA_INLET: f32 = 0.000531; // 26 mm bore

/// Printed-case constriction diameter. Must stay narrower than the 26 mm
/// inlet or the Bernoulli denominator loses its sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VenturiDiameter {
    Mm16,
    Mm18,
    Mm19,
    Mm20,
}

impl VenturiDiameter {
    pub fn throat_area(self) -> f32 {
        match self {
            Self::Mm16 => 0.000201,
            Self::Mm18 => 0.000254,
            Self::Mm19 => 0.000284,
            Self::Mm20 => 0.000314,
        }
    }
}

impl Default for VenturiDiameter {
    fn default() -> Self {
        Self::Mm18
    }
}

// ---------------------------------------------------------------------------
// Physical constants
// ---------------------------------------------------------------------------
pub const RHO_AMBIENT_DEFAULT: f32 = 1.225; // kg/m³, dry air at 15 °C, MSL
pub const RHO_STPD: f32 = 1.292;            // kg/m³, 0 °C, 1013.25 hPa, dry
pub const RHO_BTPS_DEFAULT: f32 = 1.123;    // kg/m³, 35 °C, 95 % RH
pub const GAS_CONSTANT_DRY_AIR: f32 = 287.058;
pub const GAS_CONSTANT_BTPS: f32 = 292.9;
pub const BTPS_TEMPERATURE_C: f32 = 35.0;
pub const KELVIN_OFFSET: f32 = 273.15;
pub const STANDARD_PRESSURE_PA: f32 = 101_325.0;
pub const DEFAULT_AIR_TEMPERATURE_C: f32 = 15.0;
pub const KCAL_PER_LITRE_O2: f32 = 4.86;
pub const MOLAR_MASS_CO2: f32 = 44.0;
pub const MOLAR_MASS_O2: f32 = 32.0;

// ---------------------------------------------------------------------------
// Thresholds & limits
// ---------------------------------------------------------------------------
pub const PRESSURE_THRESHOLD_PA: f32 = 0.2;
pub const PRESSURE_CEILING_PA: f32 = 266.0;   // D6F-PH0025 full scale
pub const MIN_BREATH_VOLUME_ML: f32 = 50.0;
pub const DISPLAY_VOLUME_STEP_ML: f32 = 200.0;
pub const CO2_LIMIT_PPM: f32 = 40_000.0;      // SCD30 full scale
pub const O2_BASELINE_MIN_PCT: f32 = 20.0;
pub const O2_BASELINE_FALLBACK_PCT: f32 = 20.9;
pub const CO2_BASELINE_MAX_PPM: f32 = 1000.0;
pub const RQ_MAX: f32 = 1.5;
pub const WEIGHT_MIN_KG: f32 = 20.0;
pub const WEIGHT_MAX_KG: f32 = 200.0;
pub const DEMO_O2_DEPLETION_PCT: f32 = 4.0;
pub const DEMO_CO2_PPM: f32 = 30_000.0;

// ---------------------------------------------------------------------------
// Battery (1:2 divider into ADC1, 12-bit)
// ---------------------------------------------------------------------------
pub const ADC_DEFAULT_VREF_MV: u32 = 1100;
pub const BATTERY_USB_V: f32 = 4.3;
pub const BATTERY_HALF_V: f32 = 3.9;
pub const BATTERY_CRITICAL_V: f32 = 3.7;

// ---------------------------------------------------------------------------
// Runtime engine tunables
// ---------------------------------------------------------------------------

/// Tunables read by the measurement engine. `Default` mirrors the constants
/// above; tests and the simulator override individual fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub pressure_threshold_pa: f32,
    pub pressure_ceiling_pa: f32,
    pub venturi: VenturiDiameter,
    pub min_breath_volume_ml: f32,
    pub display_volume_step_ml: f32,
    pub ambient_pressure_pa: f32,
    pub co2_limit_ppm: f32,
    pub o2_baseline_min_pct: f32,
    pub o2_baseline_fallback_pct: f32,
    pub co2_baseline_max_ppm: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pressure_threshold_pa: PRESSURE_THRESHOLD_PA,
            pressure_ceiling_pa: PRESSURE_CEILING_PA,
            venturi: VenturiDiameter::default(),
            min_breath_volume_ml: MIN_BREATH_VOLUME_ML,
            display_volume_step_ml: DISPLAY_VOLUME_STEP_ML,
            ambient_pressure_pa: STANDARD_PRESSURE_PA,
            co2_limit_ppm: CO2_LIMIT_PPM,
            o2_baseline_min_pct: O2_BASELINE_MIN_PCT,
            o2_baseline_fallback_pct: O2_BASELINE_FALLBACK_PCT,
            co2_baseline_max_ppm: CO2_BASELINE_MAX_PPM,
        }
    }
}
