// DFRobot SEN0322 electrochemical O2 sensor.

/// Readings averaged per reported value.
pub const AVERAGE_WINDOW: usize = 10;

/// Factory calibration key stored in the sensor; 0 means uncalibrated.
pub fn key_from_register(value: u8) -> f32 {
    if value == 0 {
        20.9 / 120.0
    } else {
        value as f32 / 1000.0
    }
}

/// Three-byte data frame (integer, tenths, hundredths) scaled by the key.
pub fn oxygen_from_frame(key: f32, frame: [u8; 3]) -> f32 {
    key * (frame[0] as f32 + frame[1] as f32 / 10.0 + frame[2] as f32 / 100.0)
}

/// Rolling mean over the last `AVERAGE_WINDOW` readings.
#[derive(Debug, Default)]
pub struct RollingAverage {
    samples: [f32; AVERAGE_WINDOW],
    next: usize,
    filled: usize,
}

impl RollingAverage {
    pub fn push(&mut self, value: f32) -> f32 {
        self.samples[self.next] = value;
        self.next = (self.next + 1) % AVERAGE_WINDOW;
        self.filled = (self.filled + 1).min(AVERAGE_WINDOW);
        self.samples[..self.filled].iter().sum::<f32>() / self.filled as f32
    }
}

#[cfg(target_os = "espidf")]
pub use device::OxygenSensor;

#[cfg(target_os = "espidf")]
mod device {
    use super::{key_from_register, oxygen_from_frame, RollingAverage};
    use crate::config::*;
    use crate::drivers::{lock, SharedBus};

    const REG_KEY: u8 = 0x0A;
    const REG_DATA: u8 = 0x03;

    pub struct OxygenSensor {
        bus: SharedBus,
        key: f32,
        average: RollingAverage,
    }

    impl OxygenSensor {
        pub fn new(bus: SharedBus) -> Self {
            Self {
                bus,
                key: key_from_register(0),
                average: RollingAverage::default(),
            }
        }

        pub fn init(&mut self) -> anyhow::Result<()> {
            let mut bus = lock(self.bus)?;
            let mut key = [0u8; 1];
            bus.write_read(I2C_ADDR_OXYGEN, &[REG_KEY], &mut key, I2C_TIMEOUT_TICKS)?;
            self.key = key_from_register(key[0]);
            log::info!("O2 sensor initialised (key {:.4})", self.key);
            Ok(())
        }

        pub fn read_pct(&mut self) -> anyhow::Result<f32> {
            let mut frame = [0u8; 3];
            lock(self.bus)?.write_read(I2C_ADDR_OXYGEN, &[REG_DATA], &mut frame, I2C_TIMEOUT_TICKS)?;
            Ok(self.average.push(oxygen_from_frame(self.key, frame)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_decodes_with_the_stored_key() {
        let key = key_from_register(174);
        let o2 = oxygen_from_frame(key, [120, 1, 0]);
        assert!((o2 - 20.8974).abs() < 1e-3, "{}", o2);
        assert!((key_from_register(0) - 0.174_166).abs() < 1e-5);
    }

    #[test]
    fn average_covers_only_what_was_seen() {
        let mut avg = RollingAverage::default();
        assert_eq!(avg.push(20.0), 20.0);
        assert_eq!(avg.push(22.0), 21.0);
        for _ in 0..AVERAGE_WINDOW {
            avg.push(18.0);
        }
        assert_eq!(avg.push(18.0), 18.0);
    }
}
