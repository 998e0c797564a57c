// VO2 Mini: UI Task
//
// Drains UI events from the measurement loop and the buttons, keeps the
// latest values, and redraws the active screen when something changed.
//
//   Main       ◄── single click ──►  Parameters
//   double click: back to Main      long press: weight entry

use std::sync::mpsc::Receiver;

use embedded_graphics::{pixelcolor::Rgb565, prelude::DrawTarget};

use crate::display::{self, MainView, ParametersView};
use crate::engine::CycleReport;
use crate::events::{Fault, UiEvent};
use crate::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Main,
    Parameters,
}

/// What the owner of the UI should do after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiAction {
    None,
    EditWeight,
}

pub struct UiState {
    screen: Screen,
    settings: Settings,
    ambient_pressure_pa: f32,
    latest: Option<Box<CycleReport>>,
    breath_volume_l: f32,
    warning: Option<Fault>,
    battery_v: Option<f32>,
    dirty: bool,
}

impl UiState {
    pub fn new(settings: Settings, ambient_pressure_pa: f32) -> Self {
        Self {
            screen: Screen::Main,
            settings,
            ambient_pressure_pa,
            latest: None,
            breath_volume_l: 0.0,
            warning: None,
            battery_v: None,
            dirty: true,
        }
    }

    pub fn screen(&self) -> Screen {
        self.screen
    }

    pub fn warning(&self) -> Option<Fault> {
        self.warning
    }

    pub fn set_settings(&mut self, settings: Settings) {
        self.settings = settings;
        self.dirty = true;
    }

    /// Drain all pending events (non-blocking). Returns the last non-trivial
    /// action requested.
    pub fn drain(&mut self, ui_rx: &Receiver<UiEvent>) -> UiAction {
        let mut action = UiAction::None;
        while let Ok(event) = ui_rx.try_recv() {
            if let UiAction::EditWeight = self.handle(event) {
                action = UiAction::EditWeight;
            }
        }
        action
    }

    pub fn handle(&mut self, event: UiEvent) -> UiAction {
        match event {
            UiEvent::CycleCompleted(report) => {
                self.latest = Some(report);
                // A completed cycle means the sensors are reading again.
                self.warning = None;
            }
            UiEvent::BreathCompleted(breath) => {
                self.breath_volume_l = breath.expired_volume_l;
            }
            UiEvent::Fault(fault) => {
                self.warning = Some(fault);
            }
            UiEvent::UpdateBattery(volts) => {
                self.battery_v = Some(volts);
            }
            UiEvent::ButtonSingleClick => {
                self.screen = match self.screen {
                    Screen::Main => Screen::Parameters,
                    Screen::Parameters => Screen::Main,
                };
            }
            UiEvent::ButtonDoubleClick => {
                self.screen = Screen::Main;
            }
            UiEvent::ButtonLongPress => {
                log::info!("Long press, entering weight entry");
                return UiAction::EditWeight;
            }
        }
        self.dirty = true;
        UiAction::None
    }

    pub fn main_view(&self) -> MainView {
        match &self.latest {
            Some(r) => MainView {
                elapsed_ms: r.elapsed_ms,
                o2_pct: r.o2_pct,
                vco2_ml_per_min: r.snapshot.vco2_total_ml_per_min,
                rq: r.snapshot.respiratory_quotient,
                volume_l: r.expiratory_volume_l,
            },
            None => MainView {
                volume_l: self.breath_volume_l,
                ..MainView::default()
            },
        }
    }

    pub fn parameters_view(&self) -> ParametersView {
        let (temp_c, rho, initial_o2) = match &self.latest {
            Some(r) => (
                r.co2.map_or(crate::config::DEFAULT_AIR_TEMPERATURE_C, |c| c.temp_c),
                r.density.rho_ambient,
                r.initial_o2_pct,
            ),
            None => (
                crate::config::DEFAULT_AIR_TEMPERATURE_C,
                crate::config::RHO_AMBIENT_DEFAULT,
                crate::config::O2_BASELINE_FALLBACK_PCT,
            ),
        };
        ParametersView {
            temp_c,
            pressure_hpa: self.ambient_pressure_pa / 100.0,
            rho_kg_m3: rho,
            weight_kg: self.settings.subject_weight_kg,
            correction: self.settings.flow_correction_factor,
            initial_o2_pct: initial_o2,
            pressure_measured: self.settings.pressure_enabled,
        }
    }

    /// Redraw if anything changed since the last render. Returns whether a
    /// frame was drawn.
    pub fn render<D>(&mut self, target: &mut D) -> Result<bool, D::Error>
    where
        D: DrawTarget<Color = Rgb565>,
    {
        if !self.dirty {
            return Ok(false);
        }
        match self.screen {
            Screen::Main => display::draw_main(target, &self.main_view())?,
            Screen::Parameters => display::draw_parameters(target, &self.parameters_view())?,
        }
        if let Some(volts) = self.battery_v {
            display::draw_battery(target, volts)?;
        }
        if let Some(fault) = self.warning {
            display::draw_warning(target, fault.warning())?;
        }
        self.dirty = false;
        Ok(true)
    }
}
