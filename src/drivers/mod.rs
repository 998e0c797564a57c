// VO2 Mini: I2C Sensor Drivers
//
// Register-level drivers over one shared I2C bus. Frame decoding is plain
// code so it can be checked off-target; bus access is device-only.

pub mod d6fph;
pub mod oxygen;
pub mod scd30;
#[cfg(target_os = "espidf")]
pub mod st7789;

#[cfg(target_os = "espidf")]
pub use bus::{lock, I2cSensors, SharedBus};

#[cfg(target_os = "espidf")]
mod bus {
    use std::sync::{Mutex, MutexGuard};

    use esp_idf_hal::i2c::I2cDriver;

    use super::{d6fph::D6fph, oxygen::OxygenSensor, scd30::Scd30};
    use crate::events::Co2Reading;
    use crate::sensors::SensorAdapter;

    /// Thread-safe handle to a shared I2C bus.
    pub type SharedBus = &'static Mutex<I2cDriver<'static>>;

    pub fn lock(bus: SharedBus) -> anyhow::Result<MutexGuard<'static, I2cDriver<'static>>> {
        bus.lock()
            .map_err(|_| anyhow::anyhow!("I2C bus mutex poisoned"))
    }

    /// The three analyser sensors behind the `SensorAdapter` seam. Bus errors
    /// become NaN / `None` so the engine raises the matching fault.
    pub struct I2cSensors {
        pressure: D6fph,
        oxygen: OxygenSensor,
        co2: Option<Scd30>,
    }

    impl I2cSensors {
        pub fn new(bus: SharedBus, co2_enabled: bool) -> Self {
            Self {
                pressure: D6fph::new(bus),
                oxygen: OxygenSensor::new(bus),
                co2: co2_enabled.then(|| Scd30::new(bus)),
            }
        }

        /// Bring every sensor up. Returns (pressure, oxygen, co2) readiness.
        pub fn init(&mut self) -> (bool, bool, bool) {
            let pressure = report("D6F-PH", self.pressure.init());
            let oxygen = report("O2", self.oxygen.init());
            let co2 = match self.co2.as_mut() {
                Some(scd30) => report("SCD30", scd30.init()),
                None => false,
            };
            (pressure, oxygen, co2)
        }
    }

    fn report(name: &str, result: anyhow::Result<()>) -> bool {
        match result {
            Ok(()) => true,
            Err(e) => {
                log::error!("{} init failed: {}", name, e);
                false
            }
        }
    }

    impl SensorAdapter for I2cSensors {
        fn read_pressure_pa(&mut self) -> f32 {
            self.pressure.read_pa().unwrap_or_else(|e| {
                log::warn!("D6F-PH read failed: {}", e);
                f32::NAN
            })
        }

        fn read_o2_pct(&mut self) -> f32 {
            self.oxygen.read_pct().unwrap_or_else(|e| {
                log::warn!("O2 read failed: {}", e);
                f32::NAN
            })
        }

        fn read_co2(&mut self) -> Option<Co2Reading> {
            let scd30 = self.co2.as_mut()?;
            match scd30.read() {
                Ok(reading) => reading,
                Err(e) => {
                    log::warn!("SCD30 read failed: {}", e);
                    None
                }
            }
        }
    }
}
