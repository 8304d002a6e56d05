// Cardiac Node — Wire Payload
//
// Wire types for the predictor API.

use serde::{Deserialize, Serialize};

use crate::config::*;
use crate::error::PayloadError;
use crate::sensor::SampleWindow;

/// Request body for `POST /api/v1/vitals`.
#[derive(Debug, Serialize)]
pub struct VitalsPayload<'a> {
    pub device_id: &'a str,
    pub timestamp: i64,
    pub window_ms: u32,
    pub sample_rate_hz: u32,
    pub heart_rate_bpm: f32,
    pub spo2_percent: u8,
    pub ecg_lead_off: bool,
    pub ecg_samples: &'a [u16],
    pub beat_timestamps_ms: &'a [u16],
}

impl<'a> VitalsPayload<'a> {
    pub fn new(window: &'a SampleWindow, device_id: &'a str, timestamp: i64) -> Self {
        Self {
            device_id,
            timestamp,
            window_ms: ECG_WINDOW_MS,
            sample_rate_hz: ECG_SAMPLE_RATE_HZ,
            heart_rate_bpm: (window.heart_rate_bpm * 10.0).round() / 10.0,
            spo2_percent: window.spo2_percent,
            ecg_lead_off: window.lead_off,
            ecg_samples: &window.ecg_samples,
            beat_timestamps_ms: &window.beat_offsets_ms,
        }
    }
}

/// Serialise a window into a request body.
pub fn encode_vitals(
    window: &SampleWindow,
    device_id: &str,
    timestamp: i64,
) -> Result<Vec<u8>, PayloadError> {
    let body = serde_json::to_vec(&VitalsPayload::new(window, device_id, timestamp))?;
    if body.len() > API_MAX_PAYLOAD_BYTES {
        return Err(PayloadError::TooLarge(body.len(), API_MAX_PAYLOAD_BYTES));
    }
    Ok(body)
}

/// Risk classification returned by the predictor.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Prediction {
    #[serde(default)]
    pub risk_score: f32,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default = "unknown_label")]
    pub risk_label: String,
}

fn unknown_label() -> String {
    "unknown".into()
}

#[derive(Debug, Deserialize)]
struct VitalsResponse {
    #[serde(default)]
    prediction: Option<Prediction>,
}

/// Prediction from a 200/201 body.  A malformed body is logged and treated
/// as "no prediction"; the upload itself still counts as delivered.
pub fn parse_prediction(body: &[u8]) -> Option<Prediction> {
    match serde_json::from_slice::<VitalsResponse>(body) {
        Ok(response) => response.prediction.map(|mut p| {
            p.risk_label = truncate_label(&p.risk_label).to_owned();
            p
        }),
        Err(e) => {
            log::warn!("Response parse error: {}", e);
            None
        }
    }
}

/// At most `RISK_LABEL_MAX` bytes, cut on a char boundary.
pub fn truncate_label(label: &str) -> &str {
    if label.len() <= RISK_LABEL_MAX {
        return label;
    }
    let mut end = RISK_LABEL_MAX;
    while !label.is_char_boundary(end) {
        end -= 1;
    }
    &label[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    fn window() -> SampleWindow {
        let mut w = SampleWindow::empty(5_000);
        for v in [2048u16, 2100, 0] {
            w.ecg_samples.push(v).expect("capacity");
        }
        w.beat_offsets_ms.push(120).expect("capacity");
        w.beat_offsets_ms.push(930).expect("capacity");
        w.heart_rate_bpm = 72.46;
        w.spo2_percent = 97;
        w.lead_off = true;
        w
    }

    #[test]
    fn request_body_shape() {
        let body = encode_vitals(&window(), "ESP32_ABCDEF", 1_760_000_000).expect("encode");
        let value: Value = serde_json::from_slice(&body).expect("valid json");
        assert_eq!(
            value,
            json!({
                "device_id": "ESP32_ABCDEF",
                "timestamp": 1_760_000_000i64,
                "window_ms": 10_000,
                "sample_rate_hz": 100,
                "heart_rate_bpm": 72.5,
                "spo2_percent": 97,
                "ecg_lead_off": true,
                "ecg_samples": [2048, 2100, 0],
                "beat_timestamps_ms": [120, 930],
            })
        );
    }

    #[test]
    fn full_window_fits_size_limit() {
        let mut w = SampleWindow::empty(0);
        while !w.is_full() {
            w.ecg_samples.push(4095).expect("capacity");
        }
        assert!(encode_vitals(&w, "ESP32_000000", 0).is_ok());
    }

    #[test]
    fn prediction_fields_default() {
        let p = parse_prediction(br#"{"prediction":{"risk_score":0.8}}"#).expect("prediction");
        assert_eq!(
            p,
            Prediction {
                risk_score: 0.8,
                confidence: 0.0,
                risk_label: "unknown".into(),
            }
        );
    }

    #[test]
    fn missing_or_malformed_prediction_is_none() {
        assert_eq!(parse_prediction(br#"{"status":"stored"}"#), None);
        assert_eq!(parse_prediction(b"<html>oops</html>"), None);
        assert_eq!(parse_prediction(b""), None);
    }

    #[test]
    fn long_label_truncated() {
        let p = parse_prediction(
            br#"{"prediction":{"risk_score":0.1,"confidence":0.9,"risk_label":"extraordinarily low"}}"#,
        )
        .expect("prediction");
        assert_eq!(p.risk_label, "extraordinarily");
        assert_eq!(truncate_label("héllo-wörld-ünïcode"), "héllo-wörld-");
    }
}
