// Cardiac Node — Station Wi-Fi
//
// `EspWifi` in non-blocking mode: `begin` only kicks off association and the
// connectivity state machine polls `is_connected`.  Scan results are cached
// once the driver reports completion.

use esp_idf_svc::wifi::{AuthMethod, ClientConfiguration, Configuration, EspWifi};

use crate::config::WIFI_SCAN_MAX_RESULTS;
use crate::error::NetError;
use crate::net::{AccessPoint, Credentials, ScanStatus, WifiLink, WifiScanner};

fn driver_err(e: impl core::fmt::Display) -> NetError {
    NetError::Driver(e.to_string())
}

pub struct EspLink {
    wifi: EspWifi<'static>,
    mac: [u8; 6],
    scanning: bool,
    scan_done: bool,
    results: Vec<AccessPoint>,
    total: usize,
}

impl EspLink {
    pub fn new(wifi: EspWifi<'static>) -> anyhow::Result<Self> {
        let mac = wifi.sta_netif().get_mac()?;
        Ok(Self {
            wifi,
            mac,
            scanning: false,
            scan_done: false,
            results: Vec::new(),
            total: 0,
        })
    }

    /// Scanning needs the driver running even before any credentials exist.
    fn ensure_started(&mut self) -> Result<(), NetError> {
        if !self.wifi.is_started().map_err(driver_err)? {
            self.wifi
                .set_configuration(&Configuration::Client(ClientConfiguration::default()))
                .map_err(driver_err)?;
            self.wifi.start().map_err(driver_err)?;
        }
        Ok(())
    }

    fn collect_results(&mut self) -> Result<(), NetError> {
        let (aps, total) = self
            .wifi
            .get_scan_result_n::<WIFI_SCAN_MAX_RESULTS>()
            .map_err(driver_err)?;
        self.results = aps
            .iter()
            .map(|ap| AccessPoint {
                ssid: ap.ssid.as_str().to_owned(),
                rssi: ap.signal_strength,
                auth: ap.auth_method.map_or(0, |m| m as u8),
            })
            .collect();
        self.total = total.min(self.results.len());
        Ok(())
    }
}

impl WifiLink for EspLink {
    fn begin(&mut self, credentials: &Credentials) -> Result<(), NetError> {
        let auth_method = if credentials.password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };
        let config = ClientConfiguration {
            ssid: credentials
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| NetError::Driver("SSID too long".into()))?,
            password: credentials
                .password
                .as_str()
                .try_into()
                .map_err(|_| NetError::Driver("password too long".into()))?,
            auth_method,
            ..Default::default()
        };

        // Drop any half-finished association before reconfiguring.
        if self.wifi.is_started().map_err(driver_err)? {
            let _ = self.wifi.disconnect();
        }
        self.wifi
            .set_configuration(&Configuration::Client(config))
            .map_err(driver_err)?;
        if !self.wifi.is_started().map_err(driver_err)? {
            self.wifi.start().map_err(driver_err)?;
        }
        self.wifi.connect().map_err(driver_err)?;
        log::info!("Connecting to '{}'...", credentials.ssid);
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Err(e) = self.wifi.disconnect() {
            log::debug!("Wi-Fi disconnect: {}", e);
        }
    }

    fn is_connected(&self) -> bool {
        self.wifi.is_connected().unwrap_or(false)
    }

    fn mac_address(&self) -> [u8; 6] {
        self.mac
    }

    fn rssi(&self) -> Option<i8> {
        let mut info = esp_idf_sys::wifi_ap_record_t::default();
        // SAFETY: `info` is a valid out-pointer for the duration of the call.
        let err = unsafe { esp_idf_sys::esp_wifi_sta_get_ap_info(&mut info) };
        (err == esp_idf_sys::ESP_OK).then_some(info.rssi)
    }
}

impl WifiScanner for EspLink {
    fn start_scan(&mut self) -> Result<(), NetError> {
        self.ensure_started()
            .map_err(|e| NetError::Scan(e.to_string()))?;
        self.results.clear();
        self.total = 0;
        self.scan_done = false;
        self.wifi
            .start_scan(&Default::default(), false)
            .map_err(|e| NetError::Scan(e.to_string()))?;
        self.scanning = true;
        Ok(())
    }

    fn scan_status(&mut self) -> ScanStatus {
        if !self.scanning {
            return if self.scan_done {
                ScanStatus::Done(self.total)
            } else {
                ScanStatus::Failed
            };
        }
        match self.wifi.is_scan_done() {
            Ok(false) => ScanStatus::Running,
            Ok(true) => {
                self.scanning = false;
                match self.collect_results() {
                    Ok(()) => {
                        self.scan_done = true;
                        ScanStatus::Done(self.total)
                    }
                    Err(e) => {
                        log::warn!("Scan results unavailable: {}", e);
                        ScanStatus::Failed
                    }
                }
            }
            Err(e) => {
                log::warn!("Scan status unavailable: {}", e);
                self.scanning = false;
                ScanStatus::Failed
            }
        }
    }

    fn scan_result(&self, index: usize) -> Option<AccessPoint> {
        self.results.get(index).cloned()
    }

    fn clear_scan(&mut self) {
        if self.scanning {
            let _ = self.wifi.stop_scan();
            self.scanning = false;
        }
        self.scan_done = false;
        self.results.clear();
        self.total = 0;
    }
}
