// Cardiac Node — Connectivity State Machine
//
//   Disconnected ──(backoff elapsed)──▶ Connecting ──(link up)──▶ TimeSyncing ──(clock valid)──▶ Ready
//        ▲                                  │                          │                           │
//        └──────(connect timeout)───────────┘                          └───────(link lost)─────────┘
//
// `update()` is non-blocking and makes at most one transition per call.
// Failed attempts are retried forever with exponential backoff; the
// consecutive-failure counter is exported so the node can decide to fall back
// to BLE provisioning.

use crate::config::{ConnectivityConfig, DEVICE_ID_PREFIX};
use crate::net::{Credentials, TimeSource, WifiLink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Disconnected,
    Connecting,
    /// Link up but time sync could not be started yet.
    Connected,
    TimeSyncing,
    /// Link up and wall clock valid.
    Ready,
}

impl ConnectivityState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::TimeSyncing => "TIME_SYNCING",
            Self::Ready => "READY",
        }
    }

    pub fn link_up(self) -> bool {
        matches!(self, Self::Connected | Self::TimeSyncing | Self::Ready)
    }
}

pub struct ConnectivityManager<W, T> {
    link: W,
    time: T,
    config: ConnectivityConfig,

    state: ConnectivityState,
    credentials: Option<Credentials>,
    device_id: String,

    backoff_ms: u64,
    retry_delay_ms: u64,
    retry_at_ms: u64,
    connect_started_ms: u64,
    boot_failures: u8,
    time_synced: bool,
}

impl<W: WifiLink, T: TimeSource> ConnectivityManager<W, T> {
    pub fn new(link: W, time: T, config: ConnectivityConfig) -> Self {
        let device_id = device_id_from_mac(&link.mac_address());
        log::info!("Device ID: {}", device_id);
        Self {
            link,
            time,
            config,
            state: ConnectivityState::Disconnected,
            credentials: None,
            device_id,
            backoff_ms: config.backoff_base_ms,
            retry_delay_ms: 0,
            retry_at_ms: 0,
            connect_started_ms: 0,
            boot_failures: 0,
            time_synced: false,
        }
    }

    /// Kick off the first attempt immediately if credentials are present.
    pub fn init(&mut self, now_ms: u64) {
        if self.credentials.is_some() {
            self.start_attempt(now_ms);
        } else {
            log::info!("No Wi-Fi credentials, link stays idle");
        }
    }

    /// Advance the state machine by at most one transition.
    pub fn update(&mut self, now_ms: u64) -> ConnectivityState {
        match self.state {
            ConnectivityState::Disconnected => {
                if self.credentials.is_some() && now_ms >= self.retry_at_ms {
                    log::info!("Reconnecting (waited {} ms)", self.retry_delay_ms);
                    self.start_attempt(now_ms);
                }
            }
            ConnectivityState::Connecting => {
                if self.link.is_connected() {
                    match self.link.rssi() {
                        Some(rssi) => log::info!("Wi-Fi connected, RSSI {} dBm", rssi),
                        None => log::info!("Wi-Fi connected"),
                    }
                    self.backoff_ms = self.config.backoff_base_ms;
                    self.start_time_sync();
                } else if now_ms.saturating_sub(self.connect_started_ms)
                    > self.config.connect_timeout_ms
                {
                    log::warn!("Wi-Fi connection timeout");
                    self.fail_attempt(now_ms);
                }
            }
            ConnectivityState::Connected => {
                if !self.link.is_connected() {
                    self.link_lost(now_ms);
                } else {
                    self.start_time_sync();
                }
            }
            ConnectivityState::TimeSyncing => {
                if !self.link.is_connected() {
                    self.link_lost(now_ms);
                } else if let Some(secs) = self.valid_time() {
                    if !self.time_synced {
                        log::info!("Clock synced: {} (unix seconds)", secs);
                    }
                    self.time_synced = true;
                    self.boot_failures = 0;
                    self.state = ConnectivityState::Ready;
                }
            }
            ConnectivityState::Ready => {
                if !self.link.is_connected() {
                    self.link_lost(now_ms);
                }
            }
        }
        self.state
    }

    fn start_attempt(&mut self, now_ms: u64) {
        let Some(credentials) = self.credentials.as_ref() else {
            return;
        };
        log::info!("Connecting to '{}'", credentials.ssid);
        match self.link.begin(credentials) {
            Ok(()) => {
                self.connect_started_ms = now_ms;
                self.state = ConnectivityState::Connecting;
            }
            Err(e) => {
                log::warn!("Wi-Fi begin failed: {}", e);
                self.fail_attempt(now_ms);
            }
        }
    }

    fn fail_attempt(&mut self, now_ms: u64) {
        self.link.disconnect();
        self.boot_failures = self.boot_failures.saturating_add(1);
        self.schedule_retry(now_ms);
        self.backoff_ms = (self.backoff_ms * 2).min(self.config.backoff_max_ms);
        self.state = ConnectivityState::Disconnected;
    }

    fn link_lost(&mut self, now_ms: u64) {
        log::warn!("Wi-Fi connection lost");
        self.link.disconnect();
        self.time_synced = false;
        self.schedule_retry(now_ms);
        self.state = ConnectivityState::Disconnected;
    }

    fn schedule_retry(&mut self, now_ms: u64) {
        self.retry_delay_ms = self.backoff_ms;
        self.retry_at_ms = now_ms + self.backoff_ms;
    }

    fn start_time_sync(&mut self) {
        match self.time.start_sync() {
            Ok(()) => {
                log::info!("Starting time sync");
                self.state = ConnectivityState::TimeSyncing;
            }
            Err(e) => {
                log::warn!("Time sync not started: {}", e);
                self.state = ConnectivityState::Connected;
            }
        }
    }

    fn valid_time(&self) -> Option<i64> {
        self.time
            .unix_time()
            .filter(|&secs| secs >= self.config.min_valid_unix_time)
    }

    /// Drop the link and try again immediately with base backoff, e.g. after
    /// new credentials were provisioned.
    pub fn reconnect(&mut self) {
        self.link.disconnect();
        self.time_synced = false;
        self.state = ConnectivityState::Disconnected;
        self.backoff_ms = self.config.backoff_base_ms;
        self.retry_delay_ms = 0;
        self.retry_at_ms = 0;
    }

    pub fn set_credentials(&mut self, credentials: Credentials) {
        self.credentials = Some(credentials);
    }

    /// Stop using the in-memory credentials and go idle.
    pub fn forget_credentials(&mut self) {
        self.credentials = None;
        self.reconnect();
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn state(&self) -> ConnectivityState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectivityState::Ready && self.link.is_connected()
    }

    /// Unix seconds, only while Ready.
    pub fn timestamp(&self) -> Option<i64> {
        if !self.is_ready() {
            return None;
        }
        self.valid_time()
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn boot_failures(&self) -> u8 {
        self.boot_failures
    }

    pub fn reset_boot_failures(&mut self) {
        self.boot_failures = 0;
    }

    /// Backoff that the next failure will schedule.
    pub fn backoff_ms(&self) -> u64 {
        self.backoff_ms
    }

    /// Delay scheduled by the most recent failure or link loss.
    pub fn retry_delay_ms(&self) -> u64 {
        self.retry_delay_ms
    }

    pub fn retry_at_ms(&self) -> u64 {
        self.retry_at_ms
    }

    pub fn link(&self) -> &W {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut W {
        &mut self.link
    }

    pub fn time_source_mut(&mut self) -> &mut T {
        &mut self.time
    }
}

/// `ESP32_XXYYZZ` from the last three MAC octets.
pub fn device_id_from_mac(mac: &[u8; 6]) -> String {
    format!(
        "{}{:02X}{:02X}{:02X}",
        DEVICE_ID_PREFIX, mac[3], mac[4], mac[5]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MIN_VALID_UNIX_TIME;
    use crate::sim::{SimTime, SimWifi};

    type Manager = ConnectivityManager<SimWifi, SimTime>;

    fn manager() -> Manager {
        let mut m = ConnectivityManager::new(
            SimWifi::new([0x24, 0x6F, 0x28, 0xAB, 0xCD, 0xEF]),
            SimTime::default(),
            ConnectivityConfig::default(),
        );
        m.set_credentials(Credentials::new("ward-7", "hunter22"));
        m
    }

    fn bring_up(m: &mut Manager, now: u64) {
        m.link_mut().set_connected(true);
        m.time_source_mut().set_time(Some(MIN_VALID_UNIX_TIME + 3600));
        assert_eq!(m.update(now), ConnectivityState::TimeSyncing);
        assert_eq!(m.update(now), ConnectivityState::Ready);
    }

    fn timeout_once(m: &mut Manager, now: &mut u64) {
        assert_eq!(m.state(), ConnectivityState::Connecting);
        *now += ConnectivityConfig::default().connect_timeout_ms + 1;
        assert_eq!(m.update(*now), ConnectivityState::Disconnected);
    }

    #[test]
    fn device_id_uses_last_three_octets() {
        let m = manager();
        assert_eq!(m.device_id(), "ESP32_ABCDEF");
    }

    #[test]
    fn init_without_credentials_stays_idle() {
        let mut m = ConnectivityManager::new(
            SimWifi::new([0; 6]),
            SimTime::default(),
            ConnectivityConfig::default(),
        );
        m.init(0);
        assert_eq!(m.update(100_000), ConnectivityState::Disconnected);
        assert_eq!(m.link().begin_calls(), 0);
    }

    #[test]
    fn connect_timeout_schedules_base_backoff() {
        let mut m = manager();
        let mut now = 0;
        m.init(now);
        timeout_once(&mut m, &mut now);

        assert_eq!(m.boot_failures(), 1);
        assert_eq!(m.retry_delay_ms(), 1000);
        assert_eq!(m.retry_at_ms(), now + 1000);

        // Not before the backoff elapses.
        assert_eq!(m.update(now + 999), ConnectivityState::Disconnected);
        assert_eq!(m.update(now + 1000), ConnectivityState::Connecting);
    }

    #[test]
    fn backoff_doubles_up_to_ceiling() {
        let mut m = manager();
        let mut now = 0;
        m.init(now);

        for n in 1..=8u32 {
            timeout_once(&mut m, &mut now);
            let expected_next = (1000u64 << n).min(30_000);
            assert_eq!(m.backoff_ms(), expected_next, "after {n} failures");
            assert_eq!(m.retry_delay_ms(), (1000u64 << (n - 1)).min(30_000));
            now = m.retry_at_ms();
            assert_eq!(m.update(now), ConnectivityState::Connecting);
        }
        assert_eq!(m.boot_failures(), 8);
    }

    #[test]
    fn ready_resets_backoff_and_failures() {
        let mut m = manager();
        let mut now = 0;
        m.init(now);
        timeout_once(&mut m, &mut now);
        now = m.retry_at_ms();
        m.update(now);
        timeout_once(&mut m, &mut now);
        assert_eq!(m.backoff_ms(), 4000);

        now = m.retry_at_ms();
        m.update(now);
        bring_up(&mut m, now);
        assert_eq!(m.boot_failures(), 0);
        assert_eq!(m.backoff_ms(), 1000);

        // Link drops: next attempt after base, and a further failure
        // restarts the doubling from base.
        m.link_mut().set_connected(false);
        assert_eq!(m.update(now), ConnectivityState::Disconnected);
        assert_eq!(m.retry_delay_ms(), 1000);
        now = m.retry_at_ms();
        m.update(now);
        timeout_once(&mut m, &mut now);
        assert_eq!(m.retry_delay_ms(), 1000);
        assert_eq!(m.backoff_ms(), 2000);
    }

    #[test]
    fn never_ready_without_link_and_timestamp_sentinel() {
        let mut m = manager();
        m.init(0);
        assert_eq!(m.timestamp(), None);

        bring_up(&mut m, 10);
        assert!(m.is_ready());
        assert_eq!(m.timestamp(), Some(MIN_VALID_UNIX_TIME + 3600));

        // Link gone but update not yet called: still not Ready.
        m.link_mut().set_connected(false);
        assert!(!m.is_ready());
        assert_eq!(m.timestamp(), None);

        m.update(20);
        assert_eq!(m.state(), ConnectivityState::Disconnected);
        assert_eq!(m.timestamp(), None);
    }

    #[test]
    fn implausible_clock_keeps_time_syncing() {
        let mut m = manager();
        m.init(0);
        m.link_mut().set_connected(true);
        m.time_source_mut().set_time(Some(86_400));
        assert_eq!(m.update(0), ConnectivityState::TimeSyncing);
        assert_eq!(m.update(1), ConnectivityState::TimeSyncing);
        assert_eq!(m.timestamp(), None);
    }

    #[test]
    fn time_sync_start_failure_parks_in_connected() {
        let mut m = manager();
        m.init(0);
        m.link_mut().set_connected(true);
        m.time_source_mut().fail_start(true);
        assert_eq!(m.update(0), ConnectivityState::Connected);
        m.time_source_mut().fail_start(false);
        assert_eq!(m.update(1), ConnectivityState::TimeSyncing);
    }

    #[test]
    fn reconnect_forces_immediate_attempt_with_base_backoff() {
        let mut m = manager();
        let mut now = 0;
        m.init(now);
        for _ in 0..3 {
            timeout_once(&mut m, &mut now);
            now = m.retry_at_ms();
            m.update(now);
        }
        assert_eq!(m.backoff_ms(), 8000);

        m.set_credentials(Credentials::new("ward-8", "secret"));
        m.reconnect();
        assert_eq!(m.state(), ConnectivityState::Disconnected);
        assert_eq!(m.backoff_ms(), 1000);
        assert_eq!(m.update(now), ConnectivityState::Connecting);
        assert_eq!(
            m.link().last_credentials().map(|c| c.ssid.as_str()),
            Some("ward-8")
        );
    }

    #[test]
    fn begin_error_counts_as_failure() {
        let mut m = manager();
        m.link_mut().fail_begin(true);
        m.init(0);
        assert_eq!(m.state(), ConnectivityState::Disconnected);
        assert_eq!(m.boot_failures(), 1);
        assert_eq!(m.retry_at_ms(), 1000);
    }

    #[test]
    fn forget_credentials_goes_idle() {
        let mut m = manager();
        m.init(0);
        m.forget_credentials();
        assert!(!m.has_credentials());
        assert_eq!(m.update(1_000_000), ConnectivityState::Disconnected);
        assert_eq!(m.link().begin_calls(), 1);
    }

    #[test]
    fn credentials_debug_hides_password() {
        let text = format!("{:?}", Credentials::new("ward-7", "hunter22"));
        assert!(text.contains("ward-7"));
        assert!(!text.contains("hunter22"));
    }
}
