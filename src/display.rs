// VO2 Mini: Screen Rendering
//
// Draws the 240x135 T-Display screens with embedded-graphics. Every function
// takes any Rgb565 `DrawTarget`, so the panel driver and the in-memory
// `FrameBuffer` render identically.

use embedded_graphics::{
    mono_font::{
        ascii::{FONT_10X20, FONT_6X10},
        MonoTextStyle, MonoTextStyleBuilder,
    },
    pixelcolor::Rgb565,
    prelude::*,
    primitives::{PrimitiveStyle, Rectangle},
    text::{Alignment, Baseline, Text, TextStyleBuilder},
};

use crate::config::*;
use crate::tasks::power::BatteryState;

const LABEL_X: i32 = 5;
const VALUE_X: i32 = 110;
const ROW_PITCH: i32 = 25;

/// Values on the main screen.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MainView {
    pub elapsed_ms: u64,
    pub o2_pct: f32,
    pub vco2_ml_per_min: f32,
    pub rq: f32,
    pub volume_l: f32,
}

/// Values on the parameters screen.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ParametersView {
    pub temp_c: f32,
    pub pressure_hpa: f32,
    pub rho_kg_m3: f32,
    pub weight_kg: f32,
    pub correction: f32,
    pub initial_o2_pct: f32,
    /// Ambient pressure comes from a barometer rather than the standard day.
    pub pressure_measured: bool,
}

fn label_style() -> MonoTextStyle<'static, Rgb565> {
    MonoTextStyle::new(&FONT_10X20, Rgb565::CYAN)
}

fn value_style() -> MonoTextStyle<'static, Rgb565> {
    MonoTextStyle::new(&FONT_10X20, Rgb565::WHITE)
}

fn row<D>(target: &mut D, index: i32, label: &str, value: &str) -> Result<(), D::Error>
where
    D: DrawTarget<Color = Rgb565>,
{
    let y = 5 + index * ROW_PITCH;
    Text::with_baseline(label, Point::new(LABEL_X, y), label_style(), Baseline::Top).draw(target)?;
    Text::with_baseline(value, Point::new(VALUE_X, y), value_style(), Baseline::Top).draw(target)?;
    Ok(())
}

pub fn draw_main<D>(target: &mut D, view: &MainView) -> Result<(), D::Error>
where
    D: DrawTarget<Color = Rgb565>,
{
    target.clear(Rgb565::BLACK)?;
    row(target, 0, "Time", &crate::telemetry::format_elapsed(view.elapsed_ms))?;
    row(target, 1, "O2 %", &format!("{:.2}", view.o2_pct))?;
    row(target, 2, "VCO2", &format!("{:.0}", view.vco2_ml_per_min))?;
    row(target, 3, "RQ", &format!("{:.2}", view.rq))?;
    row(target, 4, "Vol L", &format!("{:.2}", view.volume_l))?;
    Ok(())
}

pub fn draw_parameters<D>(target: &mut D, view: &ParametersView) -> Result<(), D::Error>
where
    D: DrawTarget<Color = Rgb565>,
{
    target.clear(Rgb565::BLACK)?;
    let small = MonoTextStyle::new(&FONT_6X10, Rgb565::CYAN);
    let lines = [
        format!(
            "{:.1} C  {:.1} hPa{}",
            view.temp_c,
            view.pressure_hpa,
            if view.pressure_measured { "" } else { " std" }
        ),
        format!("{:.3} kg/m3", view.rho_kg_m3),
        format!("{:.1} kg", view.weight_kg),
        format!("cor {:.3}", view.correction),
        format!("inO2 {:.2} %", view.initial_o2_pct),
    ];
    Text::with_baseline("Parameters", Point::new(LABEL_X, 2), small, Baseline::Top).draw(target)?;
    for (i, line) in lines.iter().enumerate() {
        let y = 16 + i as i32 * 23;
        Text::with_baseline(line, Point::new(LABEL_X, y), value_style(), Baseline::Top)
            .draw(target)?;
    }
    Ok(())
}

/// Battery voltage in the top-right corner, coloured by state.
pub fn draw_battery<D>(target: &mut D, volts: f32) -> Result<(), D::Error>
where
    D: DrawTarget<Color = Rgb565>,
{
    let (fg, bg) = battery_colors(BatteryState::from_voltage(volts));
    let style = MonoTextStyleBuilder::new()
        .font(&FONT_6X10)
        .text_color(fg)
        .background_color(bg)
        .build();
    let text = format!("{:.2}V", volts);
    Text::with_alignment(
        &text,
        Point::new(SCREEN_WIDTH as i32 - 2, 10),
        style,
        Alignment::Right,
    )
    .draw(target)?;
    Ok(())
}

pub fn battery_colors(state: BatteryState) -> (Rgb565, Rgb565) {
    match state {
        BatteryState::UsbPower => (Rgb565::BLACK, Rgb565::WHITE),
        BatteryState::Full => (Rgb565::BLACK, Rgb565::GREEN),
        BatteryState::Half => (Rgb565::BLACK, Rgb565::YELLOW),
        BatteryState::Critical => (Rgb565::WHITE, Rgb565::RED),
    }
}

/// Red banner across the middle of the screen.
pub fn draw_warning<D>(target: &mut D, text: &str) -> Result<(), D::Error>
where
    D: DrawTarget<Color = Rgb565>,
{
    let band = Rectangle::new(Point::new(0, 50), Size::new(SCREEN_WIDTH, 34));
    band.into_styled(PrimitiveStyle::with_fill(Rgb565::RED))
        .draw(target)?;
    let style = MonoTextStyle::new(&FONT_10X20, Rgb565::WHITE);
    Text::with_alignment(
        text,
        Point::new(SCREEN_WIDTH as i32 / 2, 72),
        style,
        Alignment::Center,
    )
    .draw(target)?;
    Ok(())
}

/// Full-screen message: splash, calibration prompts, weight entry.
pub fn draw_message<D>(target: &mut D, lines: &[&str]) -> Result<(), D::Error>
where
    D: DrawTarget<Color = Rgb565>,
{
    target.clear(Rgb565::BLACK)?;
    let centered = TextStyleBuilder::new()
        .alignment(Alignment::Center)
        .baseline(Baseline::Top)
        .build();
    let top = (SCREEN_HEIGHT as i32 - lines.len() as i32 * ROW_PITCH) / 2;
    for (i, line) in lines.iter().enumerate() {
        Text::with_text_style(
            line,
            Point::new(SCREEN_WIDTH as i32 / 2, top + i as i32 * ROW_PITCH),
            value_style(),
            centered,
        )
        .draw(target)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Frame buffer
// ---------------------------------------------------------------------------

/// Full-screen Rgb565 buffer; flushed to the panel in one transfer.
pub struct FrameBuffer {
    pixels: Vec<Rgb565>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            pixels: vec![Rgb565::BLACK; (SCREEN_WIDTH * SCREEN_HEIGHT) as usize],
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgb565> {
        if x < SCREEN_WIDTH && y < SCREEN_HEIGHT {
            Some(self.pixels[(y * SCREEN_WIDTH + x) as usize])
        } else {
            None
        }
    }

    pub fn count(&self, color: Rgb565) -> usize {
        self.pixels.iter().filter(|&&p| p == color).count()
    }

    /// Row-major pixels, big-endian Rgb565 as the ST7789 expects.
    pub fn to_be_bytes(&self) -> Vec<u8> {
        self.pixels
            .iter()
            .flat_map(|p| p.into_storage().to_be_bytes())
            .collect()
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl OriginDimensions for FrameBuffer {
    fn size(&self) -> Size {
        Size::new(SCREEN_WIDTH, SCREEN_HEIGHT)
    }
}

impl DrawTarget for FrameBuffer {
    type Color = Rgb565;
    type Error = core::convert::Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            if point.x < 0 || point.y < 0 {
                continue;
            }
            let (x, y) = (point.x as u32, point.y as u32);
            if x < SCREEN_WIDTH && y < SCREEN_HEIGHT {
                self.pixels[(y * SCREEN_WIDTH + x) as usize] = color;
            }
        }
        Ok(())
    }
}
