// Cardiac Node — System Events & Radio Encodings

use crate::config::*;

// ---------------------------------------------------------------------------
// Provisioning Events — radio context -> main loop
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningEvent {
    /// Commit the staged credentials and connect.
    ConnectCommand,
    /// Erase stored credentials and re-enter provisioning.
    ClearCommand,
    /// Start a Wi-Fi scan and page the results to the client.
    ScanCommand,
    ClientConnected,
    ClientDisconnected,
}

impl ProvisioningEvent {
    /// Decode the first byte written to the command characteristic.
    pub fn from_command_byte(byte: u8) -> Option<Self> {
        match byte {
            CMD_CONNECT => Some(Self::ConnectCommand),
            CMD_CLEAR_CREDS => Some(Self::ClearCommand),
            CMD_WIFI_SCAN => Some(Self::ScanCommand),
            _ => None,
        }
    }
}

// Bytes written by the companion app to the command characteristic.
pub const CMD_CONNECT: u8 = 0x01;
pub const CMD_CLEAR_CREDS: u8 = 0x02;
pub const CMD_WIFI_SCAN: u8 = 0x03;

// ---------------------------------------------------------------------------
// Provisioning Status — notified on the status characteristic
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProvisioningStatus {
    #[default]
    Idle,
    Connecting,
    WifiOk,
    WifiFail,
    TimeSyncing,
    Ready,
    Cleared,
}

impl ProvisioningStatus {
    pub fn code(self) -> u8 {
        match self {
            Self::Idle => 0x00,
            Self::Connecting => 0x01,
            Self::WifiOk => 0x02,
            Self::WifiFail => 0x03,
            Self::TimeSyncing => 0x04,
            Self::Ready => 0x05,
            Self::Cleared => 0x06,
        }
    }
}

// ---------------------------------------------------------------------------
// GATT characteristics
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Characteristic {
    // Provisioning service
    ProvSsid,
    ProvPassword,
    ProvCommand,
    ProvStatus,
    ScanResult,
    // Cardiac service
    HeartRate,
    Spo2,
    RiskScore,
    RiskLabel,
    DeviceStatus,
}

impl Characteristic {
    pub const ALL: [Characteristic; 10] = [
        Self::ProvSsid,
        Self::ProvPassword,
        Self::ProvCommand,
        Self::ProvStatus,
        Self::ScanResult,
        Self::HeartRate,
        Self::Spo2,
        Self::RiskScore,
        Self::RiskLabel,
        Self::DeviceStatus,
    ];

    pub fn uuid(self) -> u128 {
        match self {
            Self::ProvSsid => BLE_PROV_SSID_UUID,
            Self::ProvPassword => BLE_PROV_PASS_UUID,
            Self::ProvCommand => BLE_PROV_CMD_UUID,
            Self::ProvStatus => BLE_PROV_STATUS_UUID,
            Self::ScanResult => BLE_PROV_SCAN_RESULT_UUID,
            Self::HeartRate => BLE_CARDIAC_HR_UUID,
            Self::Spo2 => BLE_CARDIAC_SPO2_UUID,
            Self::RiskScore => BLE_CARDIAC_RISK_UUID,
            Self::RiskLabel => BLE_CARDIAC_LABEL_UUID,
            Self::DeviceStatus => BLE_CARDIAC_STATUS_UUID,
        }
    }

    pub fn service_uuid(self) -> u128 {
        match self {
            Self::ProvSsid
            | Self::ProvPassword
            | Self::ProvCommand
            | Self::ProvStatus
            | Self::ScanResult => BLE_PROV_SERVICE_UUID,
            _ => BLE_CARDIAC_SERVICE_UUID,
        }
    }

    /// Writable by the client (the three provisioning inputs).
    pub fn is_writable(self) -> bool {
        matches!(self, Self::ProvSsid | Self::ProvPassword | Self::ProvCommand)
    }

    /// Readable by the client.  The scan-result stream is notify-only.
    pub fn is_readable(self) -> bool {
        !self.is_writable() && self != Self::ScanResult
    }
}

// ---------------------------------------------------------------------------
// Advertising posture
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertisingMode {
    /// Provisioning: be easy to find.
    Fast,
    /// Operational: save power.
    Slow,
}

impl AdvertisingMode {
    /// (min, max) interval in units of 0.625 ms.
    pub fn interval(self) -> (u16, u16) {
        match self {
            Self::Fast => (BLE_ADV_FAST_MIN, BLE_ADV_FAST_MAX),
            Self::Slow => (BLE_ADV_SLOW_MIN, BLE_ADV_SLOW_MAX),
        }
    }
}

// ---------------------------------------------------------------------------
// Device Status — composite bitmask for the status characteristic
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceStatus(u8);

impl DeviceStatus {
    pub const SENSOR_OK: u8 = 1 << 0;
    pub const LEAD_OFF: u8 = 1 << 1;
    pub const LINK_UP: u8 = 1 << 2;
    pub const READY: u8 = 1 << 3;
    pub const PROVISIONING: u8 = 1 << 4;
    pub const DISPATCH_BUSY: u8 = 1 << 5;

    pub fn with(mut self, bit: u8, on: bool) -> Self {
        if on {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
        self
    }

    pub fn contains(self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}
