// Omron D6F-PH0025 differential pressure sensor (±250 Pa).

const RANGE_PA: f32 = 250.0;

/// Counts to Pa: 1024 counts is -250 Pa, 61024 is +250 Pa.
pub fn pressure_from_raw(raw: u16) -> f32 {
    (raw as f32 - 1024.0) * (RANGE_PA * 2.0) / 60_000.0 - RANGE_PA
}

#[cfg(target_os = "espidf")]
pub use device::D6fph;

#[cfg(target_os = "espidf")]
mod device {
    use std::thread;
    use std::time::Duration;

    use crate::config::*;
    use crate::drivers::{lock, SharedBus};

    // Register-access sequences from the D6F-PH application note.
    const CMD_INIT: [u8; 2] = [0x0B, 0x00];
    const CMD_START: [u8; 5] = [0x00, 0xD0, 0x40, 0x18, 0x06];
    const CMD_SELECT_RESULT: [u8; 4] = [0x00, 0xD0, 0x51, 0x2C];
    const REG_RESULT: u8 = 0x07;
    const CONVERSION_MS: u64 = 33;

    pub struct D6fph {
        bus: SharedBus,
    }

    impl D6fph {
        pub fn new(bus: SharedBus) -> Self {
            Self { bus }
        }

        pub fn init(&self) -> anyhow::Result<()> {
            let mut bus = lock(self.bus)?;
            bus.write(I2C_ADDR_D6FPH, &CMD_INIT, I2C_TIMEOUT_TICKS)?;
            log::info!("D6F-PH initialised");
            Ok(())
        }

        /// One triggered conversion. Blocks for the conversion time.
        pub fn read_pa(&self) -> anyhow::Result<f32> {
            let mut bus = lock(self.bus)?;
            bus.write(I2C_ADDR_D6FPH, &CMD_START, I2C_TIMEOUT_TICKS)?;
            thread::sleep(Duration::from_millis(CONVERSION_MS));
            bus.write(I2C_ADDR_D6FPH, &CMD_SELECT_RESULT, I2C_TIMEOUT_TICKS)?;
            let mut raw = [0u8; 2];
            bus.write_read(I2C_ADDR_D6FPH, &[REG_RESULT], &mut raw, I2C_TIMEOUT_TICKS)?;
            Ok(super::pressure_from_raw(u16::from_be_bytes(raw)))
        }
    }
}
