// Cardiac Node — Networking
//
// Network association, time sync and the connectivity state machine.

pub mod connectivity;

use crate::error::NetError;

pub use connectivity::{ConnectivityManager, ConnectivityState};

/// A network name / passphrase pair.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Credentials {
    pub ssid: String,
    pub password: String,
}

impl Credentials {
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            password: password.into(),
        }
    }
}

// The passphrase never reaches the log.
impl core::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Credentials")
            .field("ssid", &self.ssid)
            .field("password", &"***")
            .finish()
    }
}

/// Station-mode Wi-Fi link.  All calls must return promptly; association
/// progress is observed through `is_connected`.
pub trait WifiLink {
    /// Start associating with the given network.
    fn begin(&mut self, credentials: &Credentials) -> Result<(), NetError>;

    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    /// Station MAC address, used once to derive the device identity.
    fn mac_address(&self) -> [u8; 6];

    /// Signal strength of the current association, if any.
    fn rssi(&self) -> Option<i8> {
        None
    }
}

/// One access point from a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPoint {
    pub ssid: String,
    pub rssi: i8,
    /// Driver-level authentication mode code.
    pub auth: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStatus {
    Running,
    Failed,
    Done(usize),
}

/// Asynchronous network scan facility.
pub trait WifiScanner {
    fn start_scan(&mut self) -> Result<(), NetError>;

    fn scan_status(&mut self) -> ScanStatus;

    fn scan_result(&self, index: usize) -> Option<AccessPoint>;

    /// Release scan results / abort a scan in flight.
    fn clear_scan(&mut self);
}

/// Wall-clock source (SNTP on the device).
pub trait TimeSource {
    fn start_sync(&mut self) -> Result<(), NetError>;

    /// Seconds since the Unix epoch, if the clock has ever been set.
    fn unix_time(&self) -> Option<i64>;
}
