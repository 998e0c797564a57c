// Sensirion SCD30 CO2 / temperature / humidity module.
//
// Every 16-bit word on the wire is followed by a CRC-8 (poly 0x31, init 0xFF).

use crate::error::SensorError;
use crate::events::{Co2Reading, SensorKind};

pub const CMD_CONTINUOUS_MEASUREMENT: u16 = 0x0010;
pub const CMD_MEASUREMENT_INTERVAL: u16 = 0x4600;
pub const CMD_AUTO_SELF_CALIBRATION: u16 = 0x5306;
pub const CMD_DATA_READY: u16 = 0x0202;
pub const CMD_READ_MEASUREMENT: u16 = 0x0300;

pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0xFFu8;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x31
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Command frame, with the argument word and its CRC when present.
pub fn command(cmd: u16, arg: Option<u16>) -> Vec<u8> {
    let mut frame = cmd.to_be_bytes().to_vec();
    if let Some(arg) = arg {
        let word = arg.to_be_bytes();
        frame.extend_from_slice(&word);
        frame.push(crc8(&word));
    }
    frame
}

/// One CRC-checked word from a 3-byte group.
pub fn word(group: &[u8]) -> Result<u16, SensorError> {
    match group {
        [hi, lo, crc] if crc8(&[*hi, *lo]) == *crc => Ok(u16::from_be_bytes([*hi, *lo])),
        _ => Err(SensorError::Unavailable {
            sensor: SensorKind::Co2,
        }),
    }
}

/// 18-byte measurement frame: CO2 ppm, temperature, humidity as big-endian
/// floats split over two words each.
pub fn decode_measurement(frame: &[u8; 18]) -> Result<Co2Reading, SensorError> {
    let mut values = [0f32; 3];
    for (value, chunk) in values.iter_mut().zip(frame.chunks_exact(6)) {
        let hi = word(&chunk[..3])?.to_be_bytes();
        let lo = word(&chunk[3..])?.to_be_bytes();
        *value = f32::from_be_bytes([hi[0], hi[1], lo[0], lo[1]]);
    }
    Ok(Co2Reading {
        ppm: values[0],
        temp_c: values[1],
        humidity_pct: values[2],
    })
}

#[cfg(target_os = "espidf")]
pub use device::Scd30;

#[cfg(target_os = "espidf")]
mod device {
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::config::*;
    use crate::drivers::{lock, SharedBus};

    /// Minimum gap between a command and the read that follows it.
    const COMMAND_GAP_MS: u64 = 3;

    pub struct Scd30 {
        bus: SharedBus,
    }

    impl Scd30 {
        pub fn new(bus: SharedBus) -> Self {
            Self { bus }
        }

        /// 2 s continuous measurements, self-calibration off (the analyser
        /// sees exhaled air, never a clean outdoor baseline).
        pub fn init(&mut self) -> anyhow::Result<()> {
            let mut bus = lock(self.bus)?;
            for frame in [
                command(CMD_MEASUREMENT_INTERVAL, Some(2)),
                command(CMD_AUTO_SELF_CALIBRATION, Some(0)),
                command(CMD_CONTINUOUS_MEASUREMENT, Some(0)),
            ] {
                bus.write(I2C_ADDR_SCD30, &frame, I2C_TIMEOUT_TICKS)?;
                thread::sleep(Duration::from_millis(COMMAND_GAP_MS));
            }
            log::info!("SCD30 initialised (2 s interval, ASC off)");
            Ok(())
        }

        /// `None` until a new measurement is ready.
        pub fn read(&mut self) -> anyhow::Result<Option<Co2Reading>> {
            let mut bus = lock(self.bus)?;

            bus.write(I2C_ADDR_SCD30, &command(CMD_DATA_READY, None), I2C_TIMEOUT_TICKS)?;
            thread::sleep(Duration::from_millis(COMMAND_GAP_MS));
            let mut ready = [0u8; 3];
            bus.read(I2C_ADDR_SCD30, &mut ready, I2C_TIMEOUT_TICKS)?;
            if word(&ready)? != 1 {
                return Ok(None);
            }

            bus.write(I2C_ADDR_SCD30, &command(CMD_READ_MEASUREMENT, None), I2C_TIMEOUT_TICKS)?;
            thread::sleep(Duration::from_millis(COMMAND_GAP_MS));
            let mut frame = [0u8; 18];
            bus.read(I2C_ADDR_SCD30, &mut frame, I2C_TIMEOUT_TICKS)?;
            Ok(Some(decode_measurement(&frame)?))
        }
    }
}
