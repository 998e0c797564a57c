// ST7789 135x240 TFT on the T-Display, driven in landscape over SPI.
//
// Frames are rendered into a `FrameBuffer` and pushed whole.

use std::thread;
use std::time::Duration;

use esp_idf_hal::gpio::{AnyOutputPin, Output, PinDriver};
use esp_idf_hal::spi::{SpiDeviceDriver, SpiDriver};

use crate::config::*;
use crate::display::FrameBuffer;

const SWRESET: u8 = 0x01;
const SLPOUT: u8 = 0x11;
const NORON: u8 = 0x13;
const INVON: u8 = 0x21;
const DISPON: u8 = 0x29;
const CASET: u8 = 0x2A;
const RASET: u8 = 0x2B;
const RAMWR: u8 = 0x2C;
const MADCTL: u8 = 0x36;
const COLMOD: u8 = 0x3A;

// Visible window inside the 240x320 controller RAM, landscape.
const X_OFFSET: u16 = 40;
const Y_OFFSET: u16 = 53;
const CHUNK: usize = 4000;

pub struct St7789 {
    spi: SpiDeviceDriver<'static, SpiDriver<'static>>,
    dc: PinDriver<'static, AnyOutputPin, Output>,
    backlight: PinDriver<'static, AnyOutputPin, Output>,
}

impl St7789 {
    pub fn new(
        spi: SpiDeviceDriver<'static, SpiDriver<'static>>,
        dc: PinDriver<'static, AnyOutputPin, Output>,
        backlight: PinDriver<'static, AnyOutputPin, Output>,
    ) -> Self {
        Self { spi, dc, backlight }
    }

    pub fn init(&mut self) -> anyhow::Result<()> {
        self.command(SWRESET, &[])?;
        thread::sleep(Duration::from_millis(150));
        self.command(SLPOUT, &[])?;
        thread::sleep(Duration::from_millis(10));
        self.command(COLMOD, &[0x55])?; // 16 bit/pixel
        self.command(MADCTL, &[0x60])?; // landscape, RGB
        self.command(INVON, &[])?;
        self.command(NORON, &[])?;
        self.command(DISPON, &[])?;
        self.backlight.set_high()?;
        log::info!("ST7789 initialised ({}x{})", SCREEN_WIDTH, SCREEN_HEIGHT);
        Ok(())
    }

    pub fn flush(&mut self, frame: &FrameBuffer) -> anyhow::Result<()> {
        let (x0, y0) = (X_OFFSET, Y_OFFSET);
        let x1 = x0 + SCREEN_WIDTH as u16 - 1;
        let y1 = y0 + SCREEN_HEIGHT as u16 - 1;
        self.command(CASET, &window(x0, x1))?;
        self.command(RASET, &window(y0, y1))?;
        self.command(RAMWR, &[])?;

        self.dc.set_high()?;
        for chunk in frame.to_be_bytes().chunks(CHUNK) {
            self.spi.write(chunk)?;
        }
        Ok(())
    }

    fn command(&mut self, cmd: u8, params: &[u8]) -> anyhow::Result<()> {
        self.dc.set_low()?;
        self.spi.write(&[cmd])?;
        if !params.is_empty() {
            self.dc.set_high()?;
            self.spi.write(params)?;
        }
        Ok(())
    }
}

fn window(start: u16, end: u16) -> [u8; 4] {
    let [s0, s1] = start.to_be_bytes();
    let [e0, e1] = end.to_be_bytes();
    [s0, s1, e0, e1]
}
