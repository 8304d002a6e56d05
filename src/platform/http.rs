// Cardiac Node — HTTPS transport to the predictor
//
// A fresh connection per request; the worker thread is the only caller.

use std::time::Duration;

use embedded_svc::http::client::Client;
use embedded_svc::io::{Read, Write};
use esp_idf_svc::http::client::{Configuration as HttpConfiguration, EspHttpConnection};

use crate::config::{API_BASE_URL, API_KEY, API_TIMEOUT_MS, API_VITALS_PATH};
use crate::error::TransportError;
use crate::telemetry::{HttpResponse, Transport};

fn network(e: impl core::fmt::Debug) -> TransportError {
    TransportError::Network(format!("{:?}", e))
}

pub struct HttpTransport {
    url: String,
    api_key: &'static str,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            url: format!("{}{}", API_BASE_URL, API_VITALS_PATH),
            api_key: API_KEY,
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for HttpTransport {
    fn is_ready(&self) -> bool {
        let mut info = esp_idf_sys::wifi_ap_record_t::default();
        // SAFETY: `info` is a valid out-pointer for the duration of the call.
        unsafe { esp_idf_sys::esp_wifi_sta_get_ap_info(&mut info) == esp_idf_sys::ESP_OK }
    }

    fn post(&mut self, body: &[u8]) -> Result<HttpResponse, TransportError> {
        let connection = EspHttpConnection::new(&HttpConfiguration {
            timeout: Some(Duration::from_millis(API_TIMEOUT_MS)),
            crt_bundle_attach: Some(esp_idf_sys::esp_crt_bundle_attach),
            ..Default::default()
        })
        .map_err(network)?;
        let mut client = Client::wrap(connection);

        let content_length = body.len().to_string();
        let headers = [
            ("Content-Type", "application/json"),
            ("X-API-Key", self.api_key),
            ("Content-Length", content_length.as_str()),
        ];
        let mut request = client.post(&self.url, &headers).map_err(network)?;
        request.write_all(body).map_err(network)?;
        request.flush().map_err(network)?;

        let mut response = request.submit().map_err(network)?;
        let status = response.status();

        let mut body = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            let n = response.read(&mut buf).map_err(network)?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&buf[..n]);
        }
        Ok(HttpResponse { status, body })
    }
}
