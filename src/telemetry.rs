// VO2 Mini: Telemetry Sinks
//
// Everything leaving the device after a breath: newline-delimited JSON on the
// serial console and float notifications on the BLE characteristics. Sinks
// never fail the measurement loop; write errors are logged and dropped.

use std::io::Write;
use std::sync::mpsc::Sender;

use serde::Serialize;

use crate::engine::{BreathRecord, CycleReport};
use crate::events::{Fault, UiEvent};

pub trait TelemetrySink {
    /// A breath closed. `session_ms` is time since power-on.
    fn on_breath(&mut self, _breath: &BreathRecord, _session_ms: u64) {}
    fn on_cycle(&mut self, report: &CycleReport);
    fn on_fault(&mut self, _fault: Fault) {}
}

/// `HH:MM:SS`, hours wrapping at 24.
pub fn format_elapsed(ms: u64) -> String {
    let secs = ms / 1000;
    format!(
        "{:02}:{:02}:{:02}",
        (secs / 3600) % 24,
        (secs / 60) % 60,
        secs % 60
    )
}

// ---------------------------------------------------------------------------
// Serial JSON
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct EventLine<'a> {
    event: &'a str,
    time: String,
}

#[derive(Serialize)]
struct VolumeLine {
    volume: VolumeFields,
}

#[derive(Serialize)]
struct VolumeFields {
    #[serde(rename = "volumeExp")]
    volume_exp: f32,
    #[serde(rename = "VE")]
    ve: f32,
    #[serde(rename = "VEmean")]
    ve_mean: f32,
    #[serde(rename = "freqVE")]
    freq: f32,
    #[serde(rename = "freqVEmean")]
    freq_mean: f32,
}

#[derive(Serialize)]
struct Vo2Line {
    vo2: Vo2Fields,
}

#[derive(Serialize)]
struct Vo2Fields {
    #[serde(rename = "vo2Total")]
    total: f32,
    consumed_o2: f32,
    /// O2 volume inhaled per minute (ml/min STPD).
    #[serde(rename = "vo2TotalIn")]
    total_in: f32,
    #[serde(rename = "vo2TotalOut")]
    total_out: f32,
}

#[derive(Serialize)]
struct Vco2Line {
    vco2: Vco2Fields,
}

#[derive(Serialize)]
struct Vco2Fields {
    #[serde(rename = "vco2Total")]
    total: f32,
    #[serde(rename = "vco2Max")]
    per_kg: f32,
    respq: f32,
}

/// One JSON object per line, in the shape the desktop logger expects.
pub struct SerialJsonSink<W: Write> {
    out: W,
}

impl<W: Write> SerialJsonSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit<T: Serialize>(&mut self, line: &T) {
        let result = serde_json::to_writer(&mut self.out, line)
            .map_err(std::io::Error::from)
            .and_then(|_| self.out.write_all(b"\n"))
            .and_then(|_| self.out.flush());
        if let Err(e) = result {
            log::warn!("Serial telemetry write failed: {}", e);
        }
    }
}

impl<W: Write> TelemetrySink for SerialJsonSink<W> {
    fn on_breath(&mut self, breath: &BreathRecord, session_ms: u64) {
        self.emit(&EventLine {
            event: "EXPIRATION DONE",
            time: format_elapsed(session_ms),
        });
        self.emit(&VolumeLine {
            volume: VolumeFields {
                volume_exp: breath.expired_volume_l,
                ve: breath.ventilation_rate_lpm,
                ve_mean: breath.ventilation_rate_mean,
                freq: breath.breath_freq,
                freq_mean: breath.breath_freq_mean,
            },
        });
    }

    fn on_cycle(&mut self, report: &CycleReport) {
        let inhaled = report.breath.ventilation_rate_mean * report.density.btps_to_stpd();
        let s = &report.snapshot;
        self.emit(&Vo2Line {
            vo2: Vo2Fields {
                total: s.vo2_total_ml_per_min,
                consumed_o2: report.consumed_o2_pct,
                total_in: inhaled * report.initial_o2_pct / 100.0,
                total_out: inhaled * report.o2_pct / 100.0,
            },
        });
        self.emit(&Vco2Line {
            vco2: Vco2Fields {
                total: s.vco2_total_ml_per_min,
                per_kg: s.vco2_per_kg,
                respq: s.respiratory_quotient,
            },
        });
    }
}

// ---------------------------------------------------------------------------
// BLE
// ---------------------------------------------------------------------------

pub const BLE_SERVICE_UUID: &str = "12345678-1234-5678-1234-56789abcdef0";
pub const BLE_VO2_CHAR_UUID: &str = "12345678-1234-5678-1234-56789abcdef1";
pub const BLE_VCO2_CHAR_UUID: &str = "12345678-1234-5678-1234-56789abcdef2";
pub const BLE_RQ_CHAR_UUID: &str = "12345678-1234-5678-1234-56789abcdef3";

/// The GATT server side: whoever owns the radio implements this.
pub trait GattNotifier {
    fn is_connected(&self) -> bool;
    fn notify(&mut self, characteristic_uuid: &'static str, payload: &[u8]) -> anyhow::Result<()>;
}

/// Per-cycle characteristic values: VO2/kg, VCO2/kg and RQ as little-endian
/// IEEE-754 floats.
pub fn ble_payloads(report: &CycleReport) -> [(&'static str, [u8; 4]); 3] {
    let s = &report.snapshot;
    [
        (BLE_VO2_CHAR_UUID, s.vo2_per_kg.to_le_bytes()),
        (BLE_VCO2_CHAR_UUID, s.vco2_per_kg.to_le_bytes()),
        (BLE_RQ_CHAR_UUID, s.respiratory_quotient.to_le_bytes()),
    ]
}

pub struct BleSink<N: GattNotifier> {
    notifier: N,
}

impl<N: GattNotifier> BleSink<N> {
    pub fn new(notifier: N) -> Self {
        log::info!("BLE telemetry on service {}", BLE_SERVICE_UUID);
        Self { notifier }
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }
}

impl<N: GattNotifier> TelemetrySink for BleSink<N> {
    fn on_cycle(&mut self, report: &CycleReport) {
        if !self.notifier.is_connected() {
            return;
        }
        for (uuid, payload) in ble_payloads(report) {
            if let Err(e) = self.notifier.notify(uuid, &payload) {
                log::warn!("BLE notify {} failed: {}", uuid, e);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// UI bridge
// ---------------------------------------------------------------------------

/// Forwards engine output to the UI task's event channel.
pub struct UiEventSink {
    ui_tx: Sender<UiEvent>,
}

impl UiEventSink {
    pub fn new(ui_tx: Sender<UiEvent>) -> Self {
        Self { ui_tx }
    }

    fn send(&self, event: UiEvent) {
        if self.ui_tx.send(event).is_err() {
            log::debug!("UI channel closed");
        }
    }
}

impl TelemetrySink for UiEventSink {
    fn on_breath(&mut self, breath: &BreathRecord, _session_ms: u64) {
        self.send(UiEvent::BreathCompleted(*breath));
    }

    fn on_cycle(&mut self, report: &CycleReport) {
        self.send(UiEvent::CycleCompleted(Box::new(report.clone())));
    }

    fn on_fault(&mut self, fault: Fault) {
        self.send(UiEvent::Fault(fault));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{AirDensityParams, GasExchangeSnapshot};

    fn breath() -> BreathRecord {
        BreathRecord {
            completed_at_ms: 5000,
            expired_volume_l: 0.6,
            duration_ms: 5000,
            ventilation_rate_lpm: 7.2,
            ventilation_rate_mean: 20.0,
            breath_freq: 12.0,
            breath_freq_mean: 3.0,
        }
    }

    fn report() -> CycleReport {
        CycleReport {
            at_ms: 5000,
            elapsed_ms: 5000,
            breath: breath(),
            snapshot: GasExchangeSnapshot {
                vo2_total_ml_per_min: 70.0,
                vo2_per_kg: 1.0,
                vco2_total_ml_per_min: 60.0,
                vco2_per_kg: 0.5,
                respiratory_quotient: 1.25,
                ..GasExchangeSnapshot::default()
            },
            density: AirDensityParams::default(),
            o2_pct: 16.9,
            initial_o2_pct: 20.9,
            consumed_o2_pct: 4.0,
            co2: None,
            initial_co2_ppm: 400.0,
            expiratory_volume_l: 0.6,
        }
    }

    fn lines(sink: SerialJsonSink<Vec<u8>>) -> Vec<serde_json::Value> {
        let out = String::from_utf8(sink.into_inner()).unwrap();
        out.lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn elapsed_time_wraps_at_a_day() {
        assert_eq!(format_elapsed(0), "00:00:00");
        assert_eq!(format_elapsed(3_723_999), "01:02:03");
        assert_eq!(format_elapsed(25 * 3_600_000 + 5000), "01:00:05");
    }

    #[test]
    fn breath_emits_event_then_volume() {
        let mut sink = SerialJsonSink::new(Vec::new());
        sink.on_breath(&breath(), 65_000);
        let lines = lines(sink);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "EXPIRATION DONE");
        assert_eq!(lines[0]["time"], "00:01:05");
        let volume = &lines[1]["volume"];
        assert!((volume["volumeExp"].as_f64().unwrap() - 0.6).abs() < 1e-6);
        assert_eq!(volume["freqVE"].as_f64().unwrap(), 12.0);
        assert_eq!(volume["VEmean"].as_f64().unwrap(), 20.0);
    }

    #[test]
    fn cycle_emits_vo2_and_vco2_objects() {
        let mut sink = SerialJsonSink::new(Vec::new());
        let r = report();
        sink.on_cycle(&r);
        let lines = lines(sink);
        assert_eq!(lines.len(), 2);

        let vo2 = &lines[0]["vo2"];
        assert_eq!(vo2["vo2Total"].as_f64().unwrap(), 70.0);
        assert_eq!(vo2["consumed_o2"].as_f64().unwrap(), 4.0);
        let inhaled = 20.0 * r.density.btps_to_stpd();
        let total_in = vo2["vo2TotalIn"].as_f64().unwrap() as f32;
        assert!((total_in - inhaled * 0.209).abs() < 1e-4);
        assert!(vo2["vo2TotalOut"].as_f64().unwrap() < vo2["vo2TotalIn"].as_f64().unwrap());

        let vco2 = &lines[1]["vco2"];
        assert_eq!(vco2["vco2Total"].as_f64().unwrap(), 60.0);
        assert_eq!(vco2["vco2Max"].as_f64().unwrap(), 0.5);
        assert_eq!(vco2["respq"].as_f64().unwrap(), 1.25);
    }

    #[derive(Default)]
    struct RecordingNotifier {
        connected: bool,
        sent: Vec<(&'static str, Vec<u8>)>,
    }

    impl GattNotifier for RecordingNotifier {
        fn is_connected(&self) -> bool {
            self.connected
        }

        fn notify(&mut self, uuid: &'static str, payload: &[u8]) -> anyhow::Result<()> {
            self.sent.push((uuid, payload.to_vec()));
            Ok(())
        }
    }

    #[test]
    fn ble_notifies_three_floats_when_connected() {
        let mut sink = BleSink::new(RecordingNotifier {
            connected: true,
            ..Default::default()
        });
        sink.on_cycle(&report());
        let sent = &sink.notifier().sent;
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].0, BLE_VO2_CHAR_UUID);
        assert_eq!(sent[0].1, 1.0f32.to_le_bytes().to_vec());
        assert_eq!(sent[2].0, BLE_RQ_CHAR_UUID);
        assert_eq!(sent[2].1, 1.25f32.to_le_bytes().to_vec());
    }

    #[test]
    fn ble_stays_quiet_without_a_client() {
        let mut sink = BleSink::new(RecordingNotifier::default());
        sink.on_cycle(&report());
        assert!(sink.notifier().sent.is_empty());
    }

    #[test]
    fn ui_sink_forwards_events() {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut sink = UiEventSink::new(tx);
        sink.on_breath(&breath(), 0);
        sink.on_cycle(&report());
        sink.on_fault(Fault::CalibrationLow);
        let got: Vec<_> = rx.try_iter().collect();
        assert!(matches!(got[0], UiEvent::BreathCompleted(_)));
        assert!(matches!(&got[1], UiEvent::CycleCompleted(r) if r.snapshot.vo2_per_kg == 1.0));
        assert!(matches!(got[2], UiEvent::Fault(Fault::CalibrationLow)));
    }
}
