// Cardiac Node — Hardware & System Configuration
// Target: ESP32 DevKit (Xtensa) with MAX30100 + AD8232

// ---------------------------------------------------------------------------
// GPIO Pin Definitions
// ---------------------------------------------------------------------------
pub const PIN_I2C_SDA: i32 = 21;        // MAX30100 data line
pub const PIN_I2C_SCL: i32 = 22;        // MAX30100 clock line
pub const PIN_ECG_OUTPUT: i32 = 34;     // AD8232 OUTPUT — ADC1_CH6, input-only
pub const PIN_ECG_LO_PLUS: i32 = 32;    // AD8232 lead-off detect (+)
pub const PIN_ECG_LO_MINUS: i32 = 33;   // AD8232 lead-off detect (-)
pub const PIN_BEAT_LED: i32 = 2;        // Onboard LED

// ---------------------------------------------------------------------------
// I2C Bus
// ---------------------------------------------------------------------------
pub const I2C_ADDR_MAX30100: u8 = 0x57;
pub const I2C_BAUDRATE_HZ: u32 = 100_000;   // cheap modules have weak pull-ups
pub const I2C_TIMEOUT_TICKS: u32 = 1000;    // FreeRTOS ticks

// ---------------------------------------------------------------------------
// Pulse Oximeter
// ---------------------------------------------------------------------------
pub const SENSOR_INIT_RETRIES: u32 = 5;
pub const SENSOR_INIT_RETRY_DELAY_MS: u64 = 1000;
pub const STALL_TIMEOUT_MS: u64 = 10_000;
pub const HR_REPORT_PERIOD_MS: u64 = 1000;
pub const BEAT_LED_PULSE_MS: u64 = 50;

// ---------------------------------------------------------------------------
// ECG Sampling
// ---------------------------------------------------------------------------
pub const ECG_SAMPLE_RATE_HZ: u32 = 100;
pub const ECG_SAMPLE_PERIOD_MS: u64 = 1000 / ECG_SAMPLE_RATE_HZ as u64;                 // 10 ms
pub const ECG_WINDOW_MS: u32 = 10_000;                                                  // 10 s
pub const ECG_SAMPLES_PER_WINDOW: usize = (ECG_SAMPLE_RATE_HZ * ECG_WINDOW_MS / 1000) as usize; // 1000
pub const MAX_BEATS_PER_WINDOW: usize = 30;                                             // ~180 bpm

// ---------------------------------------------------------------------------
// Wi-Fi / Time
// ---------------------------------------------------------------------------
pub const WIFI_CONNECT_TIMEOUT_MS: u64 = 15_000;
pub const WIFI_RECONNECT_BASE_MS: u64 = 1000;
pub const WIFI_RECONNECT_MAX_MS: u64 = 30_000;
pub const WIFI_BOOT_MAX_FAILURES: u8 = 3;   // consecutive failures before provisioning fallback
pub const WIFI_SSID_MAX: usize = 32;
pub const WIFI_PASSWORD_MAX: usize = 63;
pub const DEVICE_ID_PREFIX: &str = "ESP32_";

/// 2024-01-01T00:00:00Z. Anything earlier means SNTP has not landed yet.
pub const MIN_VALID_UNIX_TIME: i64 = 1_704_067_200;

// ---------------------------------------------------------------------------
// Credential Storage (NVS)
// ---------------------------------------------------------------------------
pub const NVS_NAMESPACE: &str = "cardiac";
pub const NVS_KEY_SSID: &str = "wifi_ssid";
pub const NVS_KEY_PASSWORD: &str = "wifi_pass";

// ---------------------------------------------------------------------------
// Predictor API
// ---------------------------------------------------------------------------
pub const API_BASE_URL: &str = match option_env!("CARDIAC_API_URL") {
    Some(url) => url,
    None => "https://sanuka0523-cardiac-monitor-api.hf.space",
};
pub const API_KEY: &str = match option_env!("CARDIAC_API_KEY") {
    Some(key) => key,
    None => "esp32-cardiac-device-key-2026",
};
pub const API_VITALS_PATH: &str = "/api/v1/vitals";
pub const API_TIMEOUT_MS: u64 = 10_000;
pub const API_MAX_RETRIES: u32 = 2;
pub const API_RETRY_DELAY_MS: u64 = 500;
pub const RISK_LABEL_MAX: usize = 15;
pub const API_MAX_PAYLOAD_BYTES: usize = 16 * 1024;  // 1000 samples as JSON is ~6 KiB

// ---------------------------------------------------------------------------
// Dispatch Task
// ---------------------------------------------------------------------------
#[cfg(target_os = "espidf")]
pub const STACK_DISPATCH: usize = 12 * 1024;  // HTTPS + JSON + TLS
#[cfg(not(target_os = "espidf"))]
pub const STACK_DISPATCH: usize = 256 * 1024; // host debug builds have fat frames
pub const DISPATCH_QUEUE_DEPTH: usize = 2;

// ---------------------------------------------------------------------------
// BLE
// ---------------------------------------------------------------------------
pub const BLE_DEVICE_NAME: &str = "CardiacMon";

// Wi-Fi provisioning service
pub const BLE_PROV_SERVICE_UUID: u128 = 0x0000FF00_1234_5678_9ABC_DEF012345678;
pub const BLE_PROV_SSID_UUID: u128 = 0x0000FF01_1234_5678_9ABC_DEF012345678;
pub const BLE_PROV_PASS_UUID: u128 = 0x0000FF02_1234_5678_9ABC_DEF012345678;
pub const BLE_PROV_CMD_UUID: u128 = 0x0000FF03_1234_5678_9ABC_DEF012345678;
pub const BLE_PROV_STATUS_UUID: u128 = 0x0000FF04_1234_5678_9ABC_DEF012345678;
pub const BLE_PROV_SCAN_RESULT_UUID: u128 = 0x0000FF05_1234_5678_9ABC_DEF012345678;

// Cardiac monitor service
pub const BLE_CARDIAC_SERVICE_UUID: u128 = 0x0000CC00_1234_5678_9ABC_DEF012345678;
pub const BLE_CARDIAC_HR_UUID: u128 = 0x0000CC01_1234_5678_9ABC_DEF012345678;
pub const BLE_CARDIAC_SPO2_UUID: u128 = 0x0000CC02_1234_5678_9ABC_DEF012345678;
pub const BLE_CARDIAC_RISK_UUID: u128 = 0x0000CC03_1234_5678_9ABC_DEF012345678;
pub const BLE_CARDIAC_LABEL_UUID: u128 = 0x0000CC04_1234_5678_9ABC_DEF012345678;
pub const BLE_CARDIAC_STATUS_UUID: u128 = 0x0000CC05_1234_5678_9ABC_DEF012345678;

// Advertising intervals (units of 0.625 ms)
pub const BLE_ADV_FAST_MIN: u16 = 160;    // 100 ms — provisioning
pub const BLE_ADV_FAST_MAX: u16 = 240;    // 150 ms
pub const BLE_ADV_SLOW_MIN: u16 = 1600;   // 1 s — operational
pub const BLE_ADV_SLOW_MAX: u16 = 1600;

pub const BLE_VITALS_NOTIFY_MS: u64 = 1000;
pub const BLE_EVENT_QUEUE_SIZE: usize = 8;

// ---------------------------------------------------------------------------
// Wi-Fi Scan (provisioning)
// ---------------------------------------------------------------------------
pub const WIFI_SCAN_TIMEOUT_MS: u64 = 10_000;
pub const WIFI_SCAN_NOTIFY_INTERVAL_MS: u64 = 30;
pub const WIFI_SCAN_MAX_RESULTS: usize = 20;

// ---------------------------------------------------------------------------
// Runtime policies
// ---------------------------------------------------------------------------

/// Sampling and stall-recovery timing for [`crate::sensor::window::WindowBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    pub sample_period_ms: u64,
    pub stall_timeout_ms: u64,
    pub init_retries: u32,
    pub init_retry_delay_ms: u64,
    pub report_period_ms: u64,
    pub led_pulse_ms: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            sample_period_ms: ECG_SAMPLE_PERIOD_MS,
            stall_timeout_ms: STALL_TIMEOUT_MS,
            init_retries: SENSOR_INIT_RETRIES,
            init_retry_delay_ms: SENSOR_INIT_RETRY_DELAY_MS,
            report_period_ms: HR_REPORT_PERIOD_MS,
            led_pulse_ms: BEAT_LED_PULSE_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityConfig {
    pub connect_timeout_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub min_valid_unix_time: i64,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: WIFI_CONNECT_TIMEOUT_MS,
            backoff_base_ms: WIFI_RECONNECT_BASE_MS,
            backoff_max_ms: WIFI_RECONNECT_MAX_MS,
            min_valid_unix_time: MIN_VALID_UNIX_TIME,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    pub queue_depth: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub stack_size: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_depth: DISPATCH_QUEUE_DEPTH,
            max_retries: API_MAX_RETRIES,
            retry_delay_ms: API_RETRY_DELAY_MS,
            stack_size: STACK_DISPATCH,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanConfig {
    pub timeout_ms: u64,
    pub notify_interval_ms: u64,
    pub max_results: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            timeout_ms: WIFI_SCAN_TIMEOUT_MS,
            notify_interval_ms: WIFI_SCAN_NOTIFY_INTERVAL_MS,
            max_results: WIFI_SCAN_MAX_RESULTS,
        }
    }
}
