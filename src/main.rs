// VO2 Mini: Firmware Entry Point
//
// Device boot sequence:
//   1. Hold the right button at power-on for DEMO mode.
//   2. Splash screen with the firmware version.
//   3. Load settings from NVS, bring up the I2C sensors, show their status.
//   4. Capture the O2 / CO2 baselines (prompting while they are implausible).
//   5. Run the measurement loop: engine tick, buttons, screen, and battery
//      housekeeping every 30 s.
//
// On a host the same binary runs a simulated DEMO session and prints the
// serial JSON telemetry to stdout.

#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    // Link esp-idf-sys runtime patches and initialise logging.
    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();
    log::info!("VO2 Mini {} starting", vo2mini::config::FIRMWARE_VERSION);

    device::run()
}

#[cfg(not(target_os = "espidf"))]
fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    host::run()
}

#[cfg(target_os = "espidf")]
mod device {
    use std::sync::{mpsc, Mutex};
    use std::thread;
    use std::time::Duration;

    use esp_idf_hal::gpio::{AnyIOPin, AnyInputPin, Input, InputPin, OutputPin, PinDriver};
    use esp_idf_hal::i2c::{I2cConfig, I2cDriver};
    use esp_idf_hal::prelude::*;
    use esp_idf_hal::spi::{config::Config as SpiConfig, SpiDeviceDriver, SpiDriver, SpiDriverConfig};
    use esp_idf_svc::nvs::EspDefaultNvsPartition;

    use vo2mini::config::*;
    use vo2mini::display::{self, FrameBuffer};
    use vo2mini::drivers::st7789::St7789;
    use vo2mini::drivers::{I2cSensors, SharedBus};
    use vo2mini::engine::MetabolicEngine;
    use vo2mini::events::UiEvent;
    use vo2mini::input::InputManager;
    use vo2mini::sensors::{Clock, StdClock};
    use vo2mini::settings::{self, NvsStore, Settings, WeightEdit, WeightEditor};
    use vo2mini::tasks::measurement::{calibrate_baselines, MeasurementLoop};
    use vo2mini::tasks::power::BatteryMonitor;
    use vo2mini::tasks::ui::{UiAction, UiState};
    use vo2mini::telemetry::{SerialJsonSink, UiEventSink};

    type Button = PinDriver<'static, AnyInputPin, Input>;

    /// Panel plus the frame it shows.
    struct Lcd {
        panel: St7789,
        frame: FrameBuffer,
    }

    impl Lcd {
        fn message(&mut self, lines: &[&str]) {
            if display::draw_message(&mut self.frame, lines).is_ok() {
                self.flush();
            }
        }

        fn flush(&mut self) {
            if let Err(e) = self.panel.flush(&self.frame) {
                log::warn!("Display flush failed: {}", e);
            }
        }
    }

    pub fn run() -> anyhow::Result<()> {
        let peripherals = Peripherals::take()?;
        let clock = StdClock::new();

        // ---- Buttons (active LOW) ---------------------------------------------
        let minus: Button = PinDriver::input(peripherals.pins.gpio0.downgrade_input())?;
        enable_pullup(PIN_BUTTON_MINUS);
        // GPIO35 is input-only; the board carries an external pull-up.
        let plus: Button = PinDriver::input(peripherals.pins.gpio35.downgrade_input())?;

        let demo = plus.is_low();
        if demo {
            log::info!("Right button held at boot, DEMO mode");
        }

        // ---- Display ------------------------------------------------------------
        let spi = SpiDriver::new(
            peripherals.spi2,
            peripherals.pins.gpio18, // SCLK
            peripherals.pins.gpio19, // MOSI
            Option::<AnyIOPin>::None,
            &SpiDriverConfig::new(),
        )?;
        let spi = SpiDeviceDriver::new(
            spi,
            Some(peripherals.pins.gpio5), // CS
            &SpiConfig::new().baudrate(26u32.MHz().into()),
        )?;
        let mut panel = St7789::new(
            spi,
            PinDriver::output(peripherals.pins.gpio16.downgrade_output())?, // DC
            PinDriver::output(peripherals.pins.gpio4.downgrade_output())?,  // backlight
        );
        panel.init()?;
        let mut lcd = Lcd {
            panel,
            frame: FrameBuffer::new(),
        };

        lcd.message(&["VO2 Mini", FIRMWARE_VERSION, if demo { "DEMO" } else { "" }]);
        thread::sleep(Duration::from_millis(SPLASH_DISPLAY_MS));

        // ---- Settings -------------------------------------------------------------
        let mut store = NvsStore::new(EspDefaultNvsPartition::take()?)?;
        let mut settings = settings::load(&mut store);
        log::info!(
            "Settings: weight {:.1} kg, correction {:.3}, CO2 {}",
            settings.subject_weight_kg,
            settings.flow_correction_factor,
            if settings.co2_enabled { "on" } else { "off" }
        );

        // ---- I2C sensors ------------------------------------------------------------
        let i2c = I2cDriver::new(
            peripherals.i2c0,
            peripherals.pins.gpio21, // SDA
            peripherals.pins.gpio22, // SCL
            &I2cConfig::new().baudrate(100u32.kHz().into()),
        )?;
        let bus: SharedBus = Box::leak(Box::new(Mutex::new(i2c)));
        let mut sensors = I2cSensors::new(bus, settings.co2_enabled);
        let (pressure_ok, o2_ok, co2_ok) = sensors.init();
        let status = [
            format!("Venturi {}", ok_text(pressure_ok)),
            format!("O2      {}", ok_text(o2_ok)),
            format!(
                "CO2     {}",
                if settings.co2_enabled { ok_text(co2_ok) } else { "off" }
            ),
        ];
        lcd.message(&[status[0].as_str(), status[1].as_str(), status[2].as_str()]);
        thread::sleep(Duration::from_millis(SENSOR_STATUS_DISPLAY_MS));

        // ---- Baselines ----------------------------------------------------------------
        let cfg = EngineConfig::default();
        let mut engine = MetabolicEngine::new(cfg, &settings, demo, clock.now_ms());
        calibrate_baselines(&mut engine, &mut sensors, settings.co2_enabled, |fault| {
            lcd.message(&[fault.warning(), "Left button", "to continue"]);
            thread::sleep(Duration::from_millis(CALIBRATION_POLL_MS));
            !minus.is_low()
        });
        let o2_line = format!("O2  {:.2} %", engine.gas().initial_o2_pct());
        let co2_line = format!("CO2 {:.0} ppm", engine.gas().initial_co2_ppm());
        lcd.message(&["Baseline", o2_line.as_str(), co2_line.as_str()]);
        thread::sleep(Duration::from_millis(CALIBRATION_RESULT_MS));

        // ---- Measurement loop ---------------------------------------------------------
        let (ui_tx, ui_rx) = mpsc::channel();
        let mut input = InputManager::new(ui_tx.clone(), clock.now_ms());
        let mut ui = UiState::new(settings, cfg.ambient_pressure_pa);

        let mut battery = match BatteryMonitor::new() {
            Ok(monitor) => Some(monitor),
            Err(e) => {
                log::warn!("Battery monitor unavailable: {}", e);
                None
            }
        };
        if let Some(volts) = battery.as_mut().and_then(|b| b.read_voltage()) {
            ui.handle(UiEvent::UpdateBattery(volts));
        }

        let mut measurement = MeasurementLoop::new(sensors, &clock, engine);
        measurement.add_sink(Box::new(SerialJsonSink::new(std::io::stdout())));
        measurement.add_sink(Box::new(UiEventSink::new(ui_tx)));
        log::info!("Boot complete, measuring");

        loop {
            measurement.poll();
            input.update(minus.is_low(), clock.now_ms());

            if ui.drain(&ui_rx) == UiAction::EditWeight {
                settings = edit_weight(&mut lcd, &minus, &plus, &clock, settings);
                if let Err(e) = settings::save(&mut store, &settings) {
                    log::error!("Settings save failed: {}", e);
                }
                measurement.engine_mut().apply_settings(&settings);
                ui.set_settings(settings);
            }

            if measurement.housekeeping_due() {
                if let Some(volts) = battery.as_mut().and_then(|b| b.read_voltage()) {
                    ui.handle(UiEvent::UpdateBattery(volts));
                }
            }

            if let Ok(true) = ui.render(&mut lcd.frame) {
                lcd.flush();
            }

            thread::sleep(Duration::from_millis(measurement.pause_ms().max(1)));
        }
    }

    /// Blocking weight entry; returns the settings with the new weight.
    fn edit_weight(
        lcd: &mut Lcd,
        minus: &Button,
        plus: &Button,
        clock: &StdClock,
        mut settings: Settings,
    ) -> Settings {
        let mut editor = WeightEditor::new(settings.subject_weight_kg, clock.now_ms());
        loop {
            let kg = match editor.poll(minus.is_low(), plus.is_low(), clock.now_ms()) {
                WeightEdit::Done(kg) => {
                    log::info!("Weight set to {:.1} kg", kg);
                    settings.subject_weight_kg = kg;
                    return settings;
                }
                WeightEdit::Changed(kg) | WeightEdit::Unchanged(kg) => kg,
            };
            let line = format!("{:.1} kg", kg);
            lcd.message(&["Weight", line.as_str()]);
            thread::sleep(Duration::from_millis(WEIGHT_POLL_MS));
        }
    }

    fn ok_text(ok: bool) -> &'static str {
        if ok {
            "OK"
        } else {
            "ERROR"
        }
    }

    /// GPIO0 needs the internal pull-up; set it via the raw API on the
    /// downgraded pin.
    fn enable_pullup(pin: i32) {
        unsafe {
            esp_idf_sys::gpio_set_pull_mode(pin, esp_idf_sys::gpio_pull_mode_t_GPIO_PULLUP_ONLY);
        }
    }
}

#[cfg(not(target_os = "espidf"))]
mod host {
    use std::sync::mpsc;

    use anyhow::Context;

    use vo2mini::config::*;
    use vo2mini::display::FrameBuffer;
    use vo2mini::engine::MetabolicEngine;
    use vo2mini::sensors::{Clock, DemoSensors, SimClock};
    use vo2mini::settings::{self, MemoryStore, Settings};
    use vo2mini::tasks::measurement::{calibrate_baselines, MeasurementLoop};
    use vo2mini::tasks::ui::UiState;
    use vo2mini::telemetry::{SerialJsonSink, UiEventSink};

    /// Pressure sensor conversion time, the loop's natural cadence.
    const SIM_TICK_MS: u64 = 33;
    const DEFAULT_SESSION_MIN: u64 = 2;

    /// `vo2mini [minutes]`: simulated DEMO session on the synthetic subject.
    pub fn run() -> anyhow::Result<()> {
        let minutes = match std::env::args().nth(1) {
            Some(arg) => arg
                .parse::<u64>()
                .with_context(|| format!("invalid session length {:?}", arg))?,
            None => DEFAULT_SESSION_MIN,
        };
        log::info!(
            "VO2 Mini {} DEMO simulation, {} min",
            FIRMWARE_VERSION,
            minutes
        );

        let settings = Settings {
            co2_enabled: true,
            ..settings::load(&mut MemoryStore::default())
        };
        let cfg = EngineConfig::default();
        let clock = SimClock::default();
        let mut sensors = DemoSensors::new(&clock);

        let mut engine = MetabolicEngine::new(cfg, &settings, true, clock.now_ms());
        for fault in calibrate_baselines(&mut engine, &mut sensors, settings.co2_enabled, |_| false) {
            log::warn!("Calibration: {}", fault.warning());
        }

        let (ui_tx, ui_rx) = mpsc::channel();
        let mut ui = UiState::new(settings, cfg.ambient_pressure_pa);
        let mut frame = FrameBuffer::new();

        let mut measurement = MeasurementLoop::new(sensors, &clock, engine);
        measurement.add_sink(Box::new(SerialJsonSink::new(std::io::stdout())));
        measurement.add_sink(Box::new(UiEventSink::new(ui_tx)));

        let end_ms = minutes * 60_000;
        let mut frames = 0u32;
        while clock.now_ms() < end_ms {
            measurement.poll();
            ui.drain(&ui_rx);
            if let Ok(true) = ui.render(&mut frame) {
                frames += 1;
            }
            measurement.housekeeping_due();
            clock.advance(SIM_TICK_MS + measurement.pause_ms());
        }

        let s = measurement.engine().snapshot();
        log::info!(
            "Session done: {} breaths, {} frames, VO2 best {:.2} ml/kg/min, {:.1} kcal",
            measurement.breaths(),
            frames,
            s.personal_best_vo2_per_kg,
            s.cumulative_calories
        );
        Ok(())
    }
}
