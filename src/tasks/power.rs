// VO2 Mini: Battery Housekeeping
//
// Reads the battery divider on the housekeeping tick and classifies the
// voltage for the screen indicator.

use crate::config::*;

/// Divider-corrected battery voltage. The T-Display halves the cell voltage
/// before the ADC pin; `vref_mv` is the eFuse reference.
pub fn battery_voltage(raw: u16, vref_mv: u32) -> f32 {
    (raw as f32 / 4095.0) * 2.0 * 3.3 * (vref_mv as f32 / 1000.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryState {
    /// Above any cell voltage: running from USB.
    UsbPower,
    Full,
    Half,
    Critical,
}

impl BatteryState {
    pub fn from_voltage(volts: f32) -> Self {
        if volts >= BATTERY_USB_V {
            Self::UsbPower
        } else if volts < BATTERY_CRITICAL_V {
            Self::Critical
        } else if volts < BATTERY_HALF_V {
            Self::Half
        } else {
            Self::Full
        }
    }
}

#[cfg(target_os = "espidf")]
pub use adc::BatteryMonitor;

#[cfg(target_os = "espidf")]
mod adc {
    use crate::config::*;

    /// ADC1 one-shot reader on the battery pin (GPIO34, channel 6).
    pub struct BatteryMonitor {
        handle: esp_idf_sys::adc_oneshot_unit_handle_t,
        channel: esp_idf_sys::adc_channel_t,
    }

    impl BatteryMonitor {
        pub fn new() -> anyhow::Result<Self> {
            // Raw ESP-IDF calls, 11 dB attenuation (0–3.3 V range).
            unsafe {
                esp_idf_sys::esp!(esp_idf_sys::gpio_set_direction(
                    PIN_ADC_ENABLE,
                    esp_idf_sys::gpio_mode_t_GPIO_MODE_OUTPUT,
                ))?;
                esp_idf_sys::esp!(esp_idf_sys::gpio_set_level(PIN_ADC_ENABLE, 1))?;

                let mut handle: esp_idf_sys::adc_oneshot_unit_handle_t = core::ptr::null_mut();
                let unit_cfg = esp_idf_sys::adc_oneshot_unit_init_cfg_t {
                    unit_id: esp_idf_sys::adc_unit_t_ADC_UNIT_1,
                    ulp_mode: esp_idf_sys::adc_ulp_mode_t_ADC_ULP_MODE_DISABLE,
                    ..core::mem::zeroed()
                };
                esp_idf_sys::esp!(esp_idf_sys::adc_oneshot_new_unit(&unit_cfg, &mut handle))?;

                let chan_cfg = esp_idf_sys::adc_oneshot_chan_cfg_t {
                    atten: esp_idf_sys::adc_atten_t_ADC_ATTEN_DB_11,
                    bitwidth: esp_idf_sys::adc_bitwidth_t_ADC_BITWIDTH_12,
                };
                let channel = esp_idf_sys::adc_channel_t_ADC_CHANNEL_6; // GPIO34
                esp_idf_sys::esp!(esp_idf_sys::adc_oneshot_config_channel(
                    handle, channel, &chan_cfg
                ))?;

                Ok(Self { handle, channel })
            }
        }

        /// `None` when the conversion fails.
        pub fn read_voltage(&mut self) -> Option<f32> {
            let mut raw: i32 = 0;
            let ret = unsafe { esp_idf_sys::adc_oneshot_read(self.handle, self.channel, &mut raw) };
            if ret != esp_idf_sys::ESP_OK {
                log::warn!("Battery ADC read failed ({})", ret);
                return None;
            }
            Some(super::battery_voltage(
                raw.clamp(0, 4095) as u16,
                ADC_DEFAULT_VREF_MV,
            ))
        }
    }
}
