// Cardiac Node — BLE Provisioning Channel
//
// Two halves:
//   * `ProvisioningInbox` — shared with the radio callback context.  Callbacks
//     only stage credential bytes or push one event; nothing else.
//   * `ProvisioningChannel` — owned by the main loop.  Drains the inbox,
//     commits credentials, drives the scan pager and mirrors state outward
//     as GATT notifications.

use std::sync::{Arc, Mutex, PoisonError};

use crate::config::*;
use crate::events::{
    AdvertisingMode, Characteristic, DeviceStatus, ProvisioningEvent, ProvisioningStatus,
};
use crate::net::{ConnectivityManager, Credentials, TimeSource, WifiLink, WifiScanner};
use crate::provision::queue::EventQueue;
use crate::provision::scan::{ScanPager, ScanState};
use crate::provision::store::{self, CredentialStore};
use crate::telemetry::payload::truncate_label;

/// GATT server capability.  Implementations must not block.
pub trait Radio {
    /// Update a characteristic's readable value without notifying.
    fn set_value(&mut self, characteristic: Characteristic, value: &[u8]);

    /// Update a characteristic's value and notify subscribers.
    fn notify(&mut self, characteristic: Characteristic, value: &[u8]);

    fn set_advertising(&mut self, mode: AdvertisingMode);
}

// ---------------------------------------------------------------------------
// Inbox — radio callback side
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Staged {
    ssid: heapless::Vec<u8, WIFI_SSID_MAX>,
    password: heapless::Vec<u8, WIFI_PASSWORD_MAX>,
}

#[derive(Default)]
pub struct ProvisioningInbox {
    queue: EventQueue,
    staged: Mutex<Staged>,
}

impl ProvisioningInbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Client wrote `value` to `characteristic`.  Oversized values are
    /// truncated to the staging capacity.
    pub fn on_write(&self, characteristic: Characteristic, value: &[u8]) {
        match characteristic {
            Characteristic::ProvSsid => {
                let mut staged = self.lock();
                staged.ssid.clear();
                let n = value.len().min(WIFI_SSID_MAX);
                let _ = staged.ssid.extend_from_slice(&value[..n]);
            }
            Characteristic::ProvPassword => {
                let mut staged = self.lock();
                staged.password.clear();
                let n = value.len().min(WIFI_PASSWORD_MAX);
                let _ = staged.password.extend_from_slice(&value[..n]);
            }
            Characteristic::ProvCommand => {
                if let Some(event) = value
                    .first()
                    .and_then(|&byte| ProvisioningEvent::from_command_byte(byte))
                {
                    self.push(event);
                }
            }
            _ => {}
        }
    }

    pub fn on_client_connected(&self) {
        self.push(ProvisioningEvent::ClientConnected);
    }

    pub fn on_client_disconnected(&self) {
        self.push(ProvisioningEvent::ClientDisconnected);
    }

    /// Full queue drops the event.
    pub fn push(&self, event: ProvisioningEvent) -> bool {
        self.queue.push(event)
    }

    pub fn staged_ssid(&self) -> String {
        String::from_utf8_lossy(&self.lock().ssid).into_owned()
    }

    pub fn staged_password_len(&self) -> usize {
        self.lock().password.len()
    }

    fn next_event(&self) -> Option<ProvisioningEvent> {
        self.queue.pop()
    }

    /// Staged credentials, if a network name was written.
    fn staged_credentials(&self) -> Option<Credentials> {
        let staged = self.lock();
        if staged.ssid.is_empty() {
            return None;
        }
        Some(Credentials {
            ssid: String::from_utf8_lossy(&staged.ssid).into_owned(),
            password: String::from_utf8_lossy(&staged.password).into_owned(),
        })
    }

    fn clear_staged(&self) {
        let mut staged = self.lock();
        staged.ssid.clear();
        staged.password.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Staged> {
        self.staged.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Channel — main-loop side
// ---------------------------------------------------------------------------

pub struct ProvisioningChannel<R> {
    radio: R,
    inbox: Arc<ProvisioningInbox>,
    scan: ScanPager,
    provisioning: bool,
    client_connected: bool,
    status: ProvisioningStatus,
    advertising: AdvertisingMode,
}

impl<R: Radio> ProvisioningChannel<R> {
    pub fn new(radio: R, inbox: Arc<ProvisioningInbox>, scan: ScanConfig) -> Self {
        Self {
            radio,
            inbox,
            scan: ScanPager::new(scan),
            provisioning: false,
            client_connected: false,
            status: ProvisioningStatus::Idle,
            advertising: AdvertisingMode::Slow,
        }
    }

    /// Pick the boot posture.
    pub fn start(&mut self, provisioning: bool) {
        if provisioning {
            self.enter_provisioning();
        } else {
            self.set_status(ProvisioningStatus::Idle);
            self.set_operational_mode();
        }
    }

    pub fn inbox(&self) -> Arc<ProvisioningInbox> {
        Arc::clone(&self.inbox)
    }

    /// Drain every queued event and act on it.
    pub fn poll<W, T, S>(
        &mut self,
        now_ms: u64,
        connectivity: &mut ConnectivityManager<W, T>,
        store: &mut S,
    ) where
        W: WifiLink + WifiScanner,
        T: TimeSource,
        S: CredentialStore + ?Sized,
    {
        while let Some(event) = self.inbox.next_event() {
            match event {
                ProvisioningEvent::ConnectCommand => self.handle_connect(connectivity, store),
                ProvisioningEvent::ClearCommand => self.handle_clear(connectivity, store),
                ProvisioningEvent::ScanCommand => {
                    if self.scan.state() != ScanState::Idle {
                        log::info!("Scan already in progress, ignoring");
                    } else if !self.scan.start(now_ms, connectivity.link_mut()) {
                        self.notify_if_connected(Characteristic::ScanResult, &[]);
                    }
                }
                ProvisioningEvent::ClientConnected => {
                    log::info!("BLE client connected");
                    self.client_connected = true;
                }
                ProvisioningEvent::ClientDisconnected => {
                    log::info!("BLE client disconnected");
                    self.client_connected = false;
                    self.scan.abort(connectivity.link_mut());
                }
            }
        }
    }

    fn handle_connect<W, T, S>(&mut self, connectivity: &mut ConnectivityManager<W, T>, store: &mut S)
    where
        W: WifiLink,
        T: TimeSource,
        S: CredentialStore + ?Sized,
    {
        let Some(credentials) = self.inbox.staged_credentials() else {
            log::warn!("Connect command but no SSID staged");
            return;
        };
        log::info!("Connect command: SSID={}", credentials.ssid);
        match store::save_credentials(store, &credentials) {
            Ok(()) => log::info!("Credentials saved for SSID: {}", credentials.ssid),
            Err(e) => log::warn!("Credentials not persisted: {}", e),
        }
        self.set_status(ProvisioningStatus::Connecting);
        connectivity.set_credentials(credentials);
        connectivity.reset_boot_failures();
        connectivity.reconnect();
        self.provisioning = false;
    }

    fn handle_clear<W, T, S>(&mut self, connectivity: &mut ConnectivityManager<W, T>, store: &mut S)
    where
        W: WifiLink,
        T: TimeSource,
        S: CredentialStore + ?Sized,
    {
        log::info!("Clear credentials command");
        match store::clear_credentials(store) {
            Ok(()) => log::info!("Credentials cleared from storage"),
            Err(e) => log::warn!("Credentials not cleared: {}", e),
        }
        connectivity.forget_credentials();
        self.enter_provisioning();
        self.set_status(ProvisioningStatus::Cleared);
    }

    /// Advance the scan pager by one step and forward its output.
    pub fn process_scan<S: WifiScanner + ?Sized>(&mut self, now_ms: u64, scanner: &mut S) {
        if !self.client_connected && self.scan.state() == ScanState::Sending {
            self.scan.abort(scanner);
            return;
        }
        if let Some(output) = self.scan.process(now_ms, scanner) {
            self.notify_if_connected(Characteristic::ScanResult, output.as_bytes());
        }
    }

    // ---- Mode switching ----

    pub fn enter_provisioning(&mut self) {
        self.inbox.clear_staged();
        self.provisioning = true;
        self.set_status(ProvisioningStatus::Idle);
        self.set_advertising(AdvertisingMode::Fast);
        log::info!("Entered provisioning mode (fast advertising)");
    }

    pub fn set_operational_mode(&mut self) {
        self.provisioning = false;
        self.set_advertising(AdvertisingMode::Slow);
        log::info!("Operational mode (slow advertising)");
    }

    fn set_advertising(&mut self, mode: AdvertisingMode) {
        self.advertising = mode;
        self.radio.set_advertising(mode);
    }

    // ---- Outbound state ----

    /// Always updates the readable value; notifies only with a peer.
    pub fn set_status(&mut self, status: ProvisioningStatus) {
        self.status = status;
        let value = [status.code()];
        self.radio.set_value(Characteristic::ProvStatus, &value);
        if self.client_connected {
            self.radio.notify(Characteristic::ProvStatus, &value);
        }
    }

    pub fn notify_heart_rate(&mut self, bpm: f32) {
        self.notify_if_connected(Characteristic::HeartRate, &encode_heart_rate(bpm));
    }

    pub fn notify_spo2(&mut self, percent: u8) {
        self.notify_if_connected(Characteristic::Spo2, &[percent]);
    }

    pub fn notify_risk_score(&mut self, score: f32) {
        self.notify_if_connected(Characteristic::RiskScore, &score.to_le_bytes());
    }

    pub fn notify_risk_label(&mut self, label: &str) {
        self.notify_if_connected(Characteristic::RiskLabel, truncate_label(label).as_bytes());
    }

    pub fn notify_device_status(&mut self, status: DeviceStatus) {
        self.notify_if_connected(Characteristic::DeviceStatus, &[status.bits()]);
    }

    fn notify_if_connected(&mut self, characteristic: Characteristic, value: &[u8]) {
        if self.client_connected {
            self.radio.notify(characteristic, value);
        }
    }

    // ---- Accessors ----

    pub fn is_provisioning(&self) -> bool {
        self.provisioning
    }

    pub fn is_client_connected(&self) -> bool {
        self.client_connected
    }

    pub fn status(&self) -> ProvisioningStatus {
        self.status
    }

    pub fn advertising_mode(&self) -> AdvertisingMode {
        self.advertising
    }

    pub fn scan_state(&self) -> ScanState {
        self.scan.state()
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }
}

/// bpm × 10 as little-endian u16.
pub fn encode_heart_rate(bpm: f32) -> [u8; 2] {
    let tenths = (bpm * 10.0).clamp(0.0, f32::from(u16::MAX)) as u16;
    tenths.to_le_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NVS_KEY_SSID, MIN_VALID_UNIX_TIME};
    use crate::events::CMD_CONNECT;
    use crate::net::ConnectivityState;
    use crate::provision::store::MemoryStore;
    use crate::sim::{SimRadio, SimTime, SimWifi};
    use pretty_assertions::assert_eq;

    struct Rig {
        channel: ProvisioningChannel<SimRadio>,
        inbox: Arc<ProvisioningInbox>,
        conn: ConnectivityManager<SimWifi, SimTime>,
        store: MemoryStore,
    }

    fn rig(provisioning: bool) -> Rig {
        let inbox = Arc::new(ProvisioningInbox::new());
        let mut channel =
            ProvisioningChannel::new(SimRadio::default(), Arc::clone(&inbox), ScanConfig::default());
        channel.start(provisioning);
        Rig {
            channel,
            inbox,
            conn: ConnectivityManager::new(
                SimWifi::new([0, 1, 2, 3, 4, 5]),
                SimTime::default(),
                ConnectivityConfig::default(),
            ),
            store: MemoryStore::new(),
        }
    }

    impl Rig {
        fn poll(&mut self, now: u64) {
            self.channel.poll(now, &mut self.conn, &mut self.store);
        }
    }

    #[test]
    fn connect_commits_staged_credentials() {
        let mut r = rig(true);
        r.inbox.on_write(Characteristic::ProvSsid, b"ward-7");
        r.inbox.on_write(Characteristic::ProvPassword, b"hunter22");
        r.inbox.on_write(Characteristic::ProvCommand, &[CMD_CONNECT]);
        r.poll(0);

        assert!(!r.channel.is_provisioning());
        assert_eq!(r.channel.status(), ProvisioningStatus::Connecting);
        assert_eq!(
            store::load_credentials(&mut r.store),
            Ok(Some(Credentials::new("ward-7", "hunter22")))
        );
        assert_eq!(
            r.conn.credentials(),
            Some(&Credentials::new("ward-7", "hunter22"))
        );
        // reconnect() makes the next update attempt immediately.
        assert_eq!(r.conn.update(0), ConnectivityState::Connecting);
    }

    #[test]
    fn connect_without_ssid_is_noop() {
        let mut r = rig(true);
        r.inbox.on_write(Characteristic::ProvPassword, b"only-a-password");
        r.inbox.push(ProvisioningEvent::ConnectCommand);
        r.poll(0);

        assert!(r.channel.is_provisioning());
        assert_eq!(r.channel.status(), ProvisioningStatus::Idle);
        assert!(r.store.is_empty());
        assert!(!r.conn.has_credentials());
    }

    #[test]
    fn staged_fields_are_truncated() {
        let r = rig(true);
        r.inbox.on_write(Characteristic::ProvSsid, &[b'a'; 40]);
        r.inbox.on_write(Characteristic::ProvPassword, &[b'p'; 80]);
        assert_eq!(r.inbox.staged_ssid().len(), WIFI_SSID_MAX);
        assert_eq!(r.inbox.staged_password_len(), WIFI_PASSWORD_MAX);
    }

    #[test]
    fn unknown_and_empty_commands_are_ignored() {
        let r = rig(true);
        r.inbox.on_write(Characteristic::ProvCommand, &[]);
        r.inbox.on_write(Characteristic::ProvCommand, &[0x7F]);
        r.inbox.on_write(Characteristic::HeartRate, &[1]);
        assert_eq!(r.inbox.next_event(), None);
    }

    #[test]
    fn inbox_accepts_events_from_several_threads() {
        let r = rig(true);
        let callbacks: Vec<_> = (0..2)
            .map(|_| {
                let inbox = Arc::clone(&r.inbox);
                std::thread::spawn(move || {
                    inbox.on_client_connected();
                    inbox.on_client_disconnected();
                })
            })
            .collect();
        for callback in callbacks {
            callback.join().expect("callback thread");
        }
        assert!(r.inbox.push(ProvisioningEvent::ScanCommand));

        let mut events = Vec::new();
        while let Some(event) = r.inbox.next_event() {
            events.push(event);
        }
        assert_eq!(events.len(), 5);
        assert_eq!(events.last(), Some(&ProvisioningEvent::ScanCommand));
    }

    #[test]
    fn full_inbox_drops_newest_event() {
        let r = rig(true);
        for _ in 0..BLE_EVENT_QUEUE_SIZE {
            assert!(r.inbox.push(ProvisioningEvent::ScanCommand));
        }
        assert!(!r.inbox.push(ProvisioningEvent::ClearCommand));
        r.inbox.on_write(Characteristic::ProvCommand, &[CMD_CONNECT]);

        let mut drained = 0;
        while let Some(event) = r.inbox.next_event() {
            assert_eq!(event, ProvisioningEvent::ScanCommand);
            drained += 1;
        }
        assert_eq!(drained, BLE_EVENT_QUEUE_SIZE);
    }

    #[test]
    fn clear_resets_everything() {
        let mut r = rig(false);
        store::save_credentials(&mut r.store, &Credentials::new("old", "pw")).expect("seed");
        r.conn.set_credentials(Credentials::new("old", "pw"));
        r.inbox.on_write(Characteristic::ProvSsid, b"half-typed");
        r.inbox.push(ProvisioningEvent::ClearCommand);
        r.poll(0);

        assert_eq!(r.store.contains(NVS_KEY_SSID), Ok(false));
        assert_eq!(r.inbox.staged_ssid(), "");
        assert_eq!(r.channel.status(), ProvisioningStatus::Cleared);
        assert!(r.channel.is_provisioning());
        assert!(!r.conn.has_credentials());
        assert_eq!(
            r.channel.radio().advertising(),
            Some(AdvertisingMode::Fast)
        );
    }

    #[test]
    fn scan_pages_only_to_connected_client() {
        let mut r = rig(true);
        r.conn.link_mut().set_scan_results(vec![crate::net::AccessPoint {
            ssid: "ward-7".into(),
            rssi: -50,
            auth: 3,
        }]);
        r.inbox.on_client_connected();
        r.inbox.push(ProvisioningEvent::ScanCommand);
        r.poll(0);
        assert_eq!(r.channel.scan_state(), ScanState::Running);

        // Second command while running is ignored.
        r.inbox.push(ProvisioningEvent::ScanCommand);
        r.poll(1);
        assert_eq!(r.conn.link().scan_starts(), 1);

        r.conn.link_mut().complete_scan();
        for now in 0..100 {
            r.channel.process_scan(now, r.conn.link_mut());
        }
        assert_eq!(
            r.channel.radio().notified(Characteristic::ScanResult),
            vec![b"0,1,-50,3,ward-7".to_vec(), Vec::new()]
        );
        assert_eq!(r.channel.scan_state(), ScanState::Idle);
    }

    #[test]
    fn disconnect_aborts_scan() {
        let mut r = rig(true);
        r.conn.link_mut().set_scan_results(vec![
            crate::net::AccessPoint { ssid: "a".into(), rssi: -40, auth: 0 },
            crate::net::AccessPoint { ssid: "b".into(), rssi: -41, auth: 0 },
        ]);
        r.inbox.on_client_connected();
        r.inbox.push(ProvisioningEvent::ScanCommand);
        r.poll(0);
        r.conn.link_mut().complete_scan();
        r.channel.process_scan(0, r.conn.link_mut());
        r.channel.process_scan(0, r.conn.link_mut());

        r.inbox.on_client_disconnected();
        r.poll(1);
        assert!(!r.channel.is_client_connected());
        assert_eq!(r.channel.scan_state(), ScanState::Idle);
        for now in 1..200 {
            r.channel.process_scan(now, r.conn.link_mut());
        }
        assert_eq!(r.channel.radio().notified(Characteristic::ScanResult).len(), 1);
    }

    #[test]
    fn vitals_notify_only_with_peer() {
        let mut r = rig(false);
        r.channel.notify_heart_rate(72.5);
        assert!(r.channel.radio().notified(Characteristic::HeartRate).is_empty());

        r.inbox.on_client_connected();
        r.poll(0);
        r.channel.notify_heart_rate(72.5);
        r.channel.notify_spo2(97);
        r.channel.notify_risk_score(0.25);
        r.channel.notify_risk_label("moderately-elevated");
        assert_eq!(
            r.channel.radio().notified(Characteristic::HeartRate),
            vec![725u16.to_le_bytes().to_vec()]
        );
        assert_eq!(r.channel.radio().notified(Characteristic::Spo2), vec![vec![97]]);
        assert_eq!(
            r.channel.radio().notified(Characteristic::RiskScore),
            vec![0.25f32.to_le_bytes().to_vec()]
        );
        assert_eq!(
            r.channel.radio().notified(Characteristic::RiskLabel),
            vec![b"moderately-elev".to_vec()]
        );
    }

    #[test]
    fn status_value_set_even_without_peer() {
        let mut r = rig(false);
        r.channel.set_status(ProvisioningStatus::WifiOk);
        assert_eq!(
            r.channel.radio().value(Characteristic::ProvStatus),
            Some(vec![ProvisioningStatus::WifiOk.code()])
        );
        assert!(r.channel.radio().notified(Characteristic::ProvStatus).is_empty());
    }

    #[test]
    fn ready_link_survives_connect_command_flow() {
        let mut r = rig(true);
        r.inbox.on_write(Characteristic::ProvSsid, b"ward-7");
        r.inbox.push(ProvisioningEvent::ConnectCommand);
        r.poll(0);
        r.conn.update(0);
        r.conn.link_mut().set_connected(true);
        r.conn.time_source_mut().set_time(Some(MIN_VALID_UNIX_TIME));
        r.conn.update(1);
        assert_eq!(r.conn.update(2), ConnectivityState::Ready);
        assert_eq!(r.conn.boot_failures(), 0);
    }
}
