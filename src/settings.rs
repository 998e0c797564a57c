// VO2 Mini: Persisted Settings
//
// A flat record stored as one JSON blob. The engine only reads it; the boot
// sequence and the weight editor are the only writers.

use serde::{Deserialize, Serialize};

use crate::config::*;
use crate::error::SettingsError;

pub const SETTINGS_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub schema_version: u32,
    /// From the 3 L calibration syringe.
    pub flow_correction_factor: f32,
    pub subject_weight_kg: f32,
    pub co2_enabled: bool,
    /// Barometric sensor fitted.
    pub pressure_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema_version: SETTINGS_SCHEMA_VERSION,
            flow_correction_factor: 1.0,
            subject_weight_kg: 75.0,
            co2_enabled: false,
            pressure_enabled: false,
        }
    }
}

impl Settings {
    /// Pull out-of-range fields back into range.
    pub fn validated(mut self) -> Self {
        self.subject_weight_kg = clamp_weight(self.subject_weight_kg);
        if !(self.flow_correction_factor.is_finite() && self.flow_correction_factor > 0.0) {
            self.flow_correction_factor = 1.0;
        }
        self
    }

    pub fn encode(&self) -> Result<Vec<u8>, SettingsError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, SettingsError> {
        let settings: Settings = serde_json::from_slice(bytes)?;
        if settings.schema_version != SETTINGS_SCHEMA_VERSION {
            return Err(SettingsError::SchemaMismatch {
                found: settings.schema_version,
                expected: SETTINGS_SCHEMA_VERSION,
            });
        }
        Ok(settings)
    }
}

fn clamp_weight(kg: f32) -> f32 {
    if kg.is_nan() {
        return Settings::default().subject_weight_kg;
    }
    kg.clamp(WEIGHT_MIN_KG, WEIGHT_MAX_KG)
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

pub trait SettingsStore {
    fn read(&mut self) -> Result<Option<Vec<u8>>, SettingsError>;
    fn write(&mut self, bytes: &[u8]) -> Result<(), SettingsError>;
}

/// Load the stored record, falling back to defaults on anything unusable.
pub fn load(store: &mut dyn SettingsStore) -> Settings {
    let bytes = match store.read() {
        Ok(Some(bytes)) => bytes,
        Ok(None) => {
            log::info!("No stored settings, using defaults");
            return Settings::default();
        }
        Err(e) => {
            log::warn!("Settings read failed: {}", e);
            return Settings::default();
        }
    };
    match Settings::decode(&bytes) {
        Ok(settings) => settings.validated(),
        Err(e) => {
            log::warn!("Ignoring stored settings: {}", e);
            Settings::default()
        }
    }
}

/// Write the record if it differs from what is stored. Returns whether a
/// write happened.
pub fn save(store: &mut dyn SettingsStore, settings: &Settings) -> Result<bool, SettingsError> {
    let bytes = settings.encode()?;
    if store.read()?.as_deref() == Some(bytes.as_slice()) {
        return Ok(false);
    }
    store.write(&bytes)?;
    log::info!("Settings saved");
    Ok(true)
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    pub bytes: Option<Vec<u8>>,
    pub writes: usize,
}

impl SettingsStore for MemoryStore {
    fn read(&mut self) -> Result<Option<Vec<u8>>, SettingsError> {
        Ok(self.bytes.clone())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), SettingsError> {
        self.bytes = Some(bytes.to_vec());
        self.writes += 1;
        Ok(())
    }
}

#[cfg(target_os = "espidf")]
pub use nvs::NvsStore;

#[cfg(target_os = "espidf")]
mod nvs {
    use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};

    use super::SettingsStore;
    use crate::error::SettingsError;

    const NAMESPACE: &str = "vo2mini";
    const KEY: &str = "settings";

    pub struct NvsStore {
        nvs: EspNvs<NvsDefault>,
    }

    impl NvsStore {
        pub fn new(partition: EspDefaultNvsPartition) -> anyhow::Result<Self> {
            Ok(Self {
                nvs: EspNvs::new(partition, NAMESPACE, true)?,
            })
        }
    }

    impl SettingsStore for NvsStore {
        fn read(&mut self) -> Result<Option<Vec<u8>>, SettingsError> {
            let mut buf = [0u8; 256];
            self.nvs
                .get_raw(KEY, &mut buf)
                .map(|found| found.map(|b| b.to_vec()))
                .map_err(|e| SettingsError::Storage(e.to_string()))
        }

        fn write(&mut self, bytes: &[u8]) -> Result<(), SettingsError> {
            self.nvs
                .set_raw(KEY, bytes)
                .map(|_| ())
                .map_err(|e| SettingsError::Storage(e.to_string()))
        }
    }
}

// ---------------------------------------------------------------------------
// Weight entry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WeightEdit {
    Unchanged(f32),
    Changed(f32),
    /// No change for `WEIGHT_EDIT_TIMEOUT_MS`; editing is over.
    Done(f32),
}

/// Two-button weight entry, polled every `WEIGHT_POLL_MS`. A held button
/// steps 0.5 kg per poll and 2 kg per poll after 8 polls.
pub struct WeightEditor {
    weight_kg: f32,
    minus_held: u32,
    plus_held: u32,
    last_change_ms: u64,
}

impl WeightEditor {
    pub fn new(weight_kg: f32, now_ms: u64) -> Self {
        Self {
            weight_kg: clamp_weight(weight_kg),
            minus_held: 0,
            plus_held: 0,
            last_change_ms: now_ms,
        }
    }

    pub fn weight_kg(&self) -> f32 {
        self.weight_kg
    }

    pub fn poll(&mut self, minus_pressed: bool, plus_pressed: bool, now_ms: u64) -> WeightEdit {
        self.minus_held = if minus_pressed { self.minus_held + 1 } else { 0 };
        self.plus_held = if plus_pressed { self.plus_held + 1 } else { 0 };

        let delta = step(self.plus_held) - step(self.minus_held);
        if delta != 0.0 {
            self.weight_kg = clamp_weight(self.weight_kg + delta);
            self.last_change_ms = now_ms;
            return WeightEdit::Changed(self.weight_kg);
        }

        if now_ms.saturating_sub(self.last_change_ms) >= WEIGHT_EDIT_TIMEOUT_MS {
            WeightEdit::Done(self.weight_kg)
        } else {
            WeightEdit::Unchanged(self.weight_kg)
        }
    }
}

fn step(held_polls: u32) -> f32 {
    match held_polls {
        0 => 0.0,
        1..=8 => 0.5,
        _ => 2.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_record_loads_defaults() {
        let mut store = MemoryStore::default();
        assert_eq!(load(&mut store), Settings::default());
    }

    #[test]
    fn saved_record_loads_back() {
        let mut store = MemoryStore::default();
        let settings = Settings {
            flow_correction_factor: 1.07,
            subject_weight_kg: 62.5,
            co2_enabled: true,
            ..Settings::default()
        };
        assert!(save(&mut store, &settings).unwrap());
        assert_eq!(load(&mut store), settings);
    }

    #[test]
    fn unchanged_record_is_not_rewritten() {
        let mut store = MemoryStore::default();
        let settings = Settings::default();
        save(&mut store, &settings).unwrap();
        assert!(!save(&mut store, &settings).unwrap());
        assert_eq!(store.writes, 1);
    }

    #[test]
    fn other_schema_versions_are_ignored() {
        let mut store = MemoryStore::default();
        let old = Settings {
            schema_version: 0,
            subject_weight_kg: 90.0,
            ..Settings::default()
        };
        store.bytes = Some(serde_json::to_vec(&old).unwrap());
        assert_eq!(load(&mut store), Settings::default());
        assert!(matches!(
            Settings::decode(store.bytes.as_deref().unwrap()),
            Err(SettingsError::SchemaMismatch { found: 0, expected: 1 })
        ));
    }

    #[test]
    fn garbage_and_out_of_range_records_are_repaired() {
        let mut store = MemoryStore {
            bytes: Some(b"\xff\x00not json".to_vec()),
            writes: 0,
        };
        assert_eq!(load(&mut store), Settings::default());

        let wild = Settings {
            subject_weight_kg: 350.0,
            flow_correction_factor: -2.0,
            ..Settings::default()
        };
        store.bytes = Some(wild.encode().unwrap());
        let loaded = load(&mut store);
        assert_eq!(loaded.subject_weight_kg, WEIGHT_MAX_KG);
        assert_eq!(loaded.flow_correction_factor, 1.0);
    }

    #[test]
    fn held_button_accelerates() {
        let mut editor = WeightEditor::new(75.0, 0);
        let mut t = 0;
        for _ in 0..8 {
            t += WEIGHT_POLL_MS;
            editor.poll(false, true, t);
        }
        assert_eq!(editor.weight_kg(), 79.0);
        t += WEIGHT_POLL_MS;
        assert_eq!(editor.poll(false, true, t), WeightEdit::Changed(81.0));
    }

    #[test]
    fn weight_is_clamped() {
        let mut editor = WeightEditor::new(21.0, 0);
        for i in 1..=20 {
            editor.poll(true, false, i * WEIGHT_POLL_MS);
        }
        assert_eq!(editor.weight_kg(), WEIGHT_MIN_KG);
    }

    #[test]
    fn editing_ends_after_a_quiet_period() {
        let mut editor = WeightEditor::new(70.0, 0);
        assert_eq!(editor.poll(true, false, 200), WeightEdit::Changed(69.5));
        assert_eq!(editor.poll(false, false, 4000), WeightEdit::Unchanged(69.5));
        assert_eq!(editor.poll(false, false, 5200), WeightEdit::Done(69.5));
    }
}
