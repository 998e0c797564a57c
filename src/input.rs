// VO2 Mini: Button Input Manager
//
// Debounced button handler with single-click, double-click, and long-press
// detection. The caller samples the pin (active LOW on the T-Display) and
// passes the level in, so the same logic runs on device and in tests.

use std::sync::mpsc::Sender;

use crate::config::*;
use crate::events::UiEvent;

pub struct InputManager {
    ui_tx: Sender<UiEvent>,

    // Debounce state
    last_raw: bool,
    last_debounce_ms: u64,

    // Press tracking
    press_start_ms: Option<u64>,
    button_down: bool,

    // Double-click state machine
    waiting_for_second_click: bool,
    first_click_ms: u64,
}

impl InputManager {
    pub fn new(ui_tx: Sender<UiEvent>, now_ms: u64) -> Self {
        Self {
            ui_tx,
            last_raw: false,
            last_debounce_ms: now_ms,
            press_start_ms: None,
            button_down: false,
            waiting_for_second_click: false,
            first_click_ms: now_ms,
        }
    }

    pub fn is_down(&self) -> bool {
        self.button_down
    }

    /// Call every ~10 ms with the current (pressed = true) level.
    pub fn update(&mut self, pressed_raw: bool, now_ms: u64) {
        // ---- debounce filter ----
        if pressed_raw != self.last_raw {
            self.last_debounce_ms = now_ms;
        }
        self.last_raw = pressed_raw;

        if now_ms.saturating_sub(self.last_debounce_ms) < DEBOUNCE_MS {
            self.check_double_click_timeout(now_ms);
            return;
        }

        let pressed = pressed_raw;

        // ---- button pressed edge ----
        if pressed && !self.button_down {
            self.button_down = true;
            self.press_start_ms = Some(now_ms);
        }

        // ---- button released edge ----
        if !pressed && self.button_down {
            self.button_down = false;
            let hold_ms = self
                .press_start_ms
                .map_or(0, |t| now_ms.saturating_sub(t));

            if hold_ms >= LONG_PRESS_MS {
                self.send(UiEvent::ButtonLongPress);
                self.waiting_for_second_click = false;
            } else if self.waiting_for_second_click {
                self.send(UiEvent::ButtonDoubleClick);
                self.waiting_for_second_click = false;
            } else {
                // First short click, open the double-click window.
                self.waiting_for_second_click = true;
                self.first_click_ms = now_ms;
            }
        }

        self.check_double_click_timeout(now_ms);
    }

    /// If the double-click window expires, emit a single-click.
    fn check_double_click_timeout(&mut self, now_ms: u64) {
        if self.waiting_for_second_click
            && now_ms.saturating_sub(self.first_click_ms) > DOUBLE_CLICK_WINDOW_MS
        {
            self.send(UiEvent::ButtonSingleClick);
            self.waiting_for_second_click = false;
        }
    }

    fn send(&self, event: UiEvent) {
        if self.ui_tx.send(event).is_err() {
            log::debug!("UI channel closed, dropping button event");
        }
    }
}
