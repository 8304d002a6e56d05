// Cardiac Node — Orchestration
//
// One `step()` is one pass of the main loop:
//   1. Sensor tick (ECG sample, oximeter FIFO, LED, stall check)
//   2. Connectivity update, status mirroring, provisioning fallback
//   3. Provisioning events and scan paging
//   4. Completed window → dispatcher (or discard)
//   5. Dispatch result → risk notifications
//   6. Once per second: vitals notifications + log line
//
// The node owns one instance of every component and passes references
// explicitly; the radio callbacks reach it only through the inbox.

use std::sync::Arc;

use crate::clock::Clock;
use crate::config::*;
use crate::error::SensorError;
use crate::events::{AdvertisingMode, DeviceStatus, ProvisioningStatus};
use crate::net::{ConnectivityManager, ConnectivityState, TimeSource, WifiLink, WifiScanner};
use crate::provision::store::{self, CredentialStore};
use crate::provision::{ProvisioningChannel, ProvisioningInbox, Radio};
use crate::sensor::{BeatIndicator, EcgFrontEnd, PulseOximeter, WindowBuffer};
use crate::telemetry::{DispatchResult, Prediction, TelemetryDispatcher};

/// The set of collaborator types a node is built from.
pub trait Platform {
    type Clock: Clock;
    type Oximeter: PulseOximeter;
    type Ecg: EcgFrontEnd;
    type Indicator: BeatIndicator;
    type Link: WifiLink + WifiScanner;
    type Time: TimeSource;
    type Radio: Radio;
    type Store: CredentialStore;
}

/// Everything a node needs, already constructed.
pub struct NodeParts<P: Platform> {
    pub clock: P::Clock,
    pub oximeter: P::Oximeter,
    pub ecg: P::Ecg,
    pub indicator: P::Indicator,
    pub link: P::Link,
    pub time: P::Time,
    pub radio: P::Radio,
    pub inbox: Arc<ProvisioningInbox>,
    pub store: P::Store,
    pub dispatcher: TelemetryDispatcher,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeConfig {
    pub window: WindowConfig,
    pub connectivity: ConnectivityConfig,
    pub scan: ScanConfig,
    pub report_period_ms: u64,
    pub boot_max_failures: u8,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            window: WindowConfig::default(),
            connectivity: ConnectivityConfig::default(),
            scan: ScanConfig::default(),
            report_period_ms: BLE_VITALS_NOTIFY_MS,
            boot_max_failures: WIFI_BOOT_MAX_FAILURES,
        }
    }
}

/// What happened to completed windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowCounters {
    pub queued: u32,
    pub dropped_queue_full: u32,
    pub discarded_provisioning: u32,
    pub discarded_not_ready: u32,
}

pub struct Node<P: Platform> {
    clock: P::Clock,
    sensors: WindowBuffer<P::Oximeter, P::Ecg, P::Indicator>,
    connectivity: ConnectivityManager<P::Link, P::Time>,
    provisioning: ProvisioningChannel<P::Radio>,
    store: P::Store,
    dispatcher: TelemetryDispatcher,
    config: NodeConfig,

    last_state: ConnectivityState,
    last_report_ms: Option<u64>,
    last_prediction: Option<Prediction>,
    counters: WindowCounters,
}

impl<P: Platform> Node<P> {
    pub fn new(parts: NodeParts<P>, config: NodeConfig) -> Self {
        Self {
            sensors: WindowBuffer::new(parts.oximeter, parts.ecg, parts.indicator, config.window),
            connectivity: ConnectivityManager::new(parts.link, parts.time, config.connectivity),
            provisioning: ProvisioningChannel::new(parts.radio, parts.inbox, config.scan),
            clock: parts.clock,
            store: parts.store,
            dispatcher: parts.dispatcher,
            config,
            last_state: ConnectivityState::Disconnected,
            last_report_ms: None,
            last_prediction: None,
            counters: WindowCounters::default(),
        }
    }

    /// Bring the sensors up and pick the boot mode.  An error means the
    /// pulse oximeter is absent and the node cannot do anything useful.
    pub fn begin(&mut self) -> Result<(), SensorError> {
        self.sensors.begin(&self.clock)?;

        match store::load_credentials(&mut self.store) {
            Ok(Some(credentials)) => {
                log::info!("Stored credentials found for '{}'", credentials.ssid);
                self.connectivity.set_credentials(credentials);
                self.provisioning.start(false);
            }
            Ok(None) => {
                log::info!("No stored credentials, starting in provisioning mode");
                self.provisioning.start(true);
            }
            Err(e) => {
                log::warn!("Credential store unreadable ({}), starting in provisioning mode", e);
                self.provisioning.start(true);
            }
        }

        self.connectivity.init(self.clock.now_ms());
        self.last_state = self.connectivity.state();
        if self.last_state == ConnectivityState::Connecting {
            self.provisioning.set_status(ProvisioningStatus::Connecting);
        }
        Ok(())
    }

    /// One main-loop iteration.  Never blocks except inside sensor stall
    /// recovery.
    pub fn step(&mut self) {
        self.sensors.tick(&self.clock);
        let now = self.clock.now_ms();

        // ---- Connectivity ----
        let state = self.connectivity.update(now);
        if state != self.last_state {
            self.on_transition(self.last_state, state);
            self.last_state = state;
        }
        self.check_fallback();

        // ---- Provisioning ----
        self.provisioning
            .poll(now, &mut self.connectivity, &mut self.store);
        self.provisioning
            .process_scan(now, self.connectivity.link_mut());

        // ---- Telemetry ----
        self.handle_window(now);
        if let Some(result) = self.dispatcher.poll_result() {
            self.on_result(result);
        }

        // ---- Periodic report ----
        let due = self
            .last_report_ms
            .map_or(true, |t| now.saturating_sub(t) >= self.config.report_period_ms);
        if due {
            self.last_report_ms = Some(now);
            self.report();
        }
    }

    fn on_transition(&mut self, from: ConnectivityState, to: ConnectivityState) {
        log::info!("Wi-Fi state: {} -> {}", from.as_str(), to.as_str());
        match to {
            ConnectivityState::Connecting => {
                self.provisioning.set_status(ProvisioningStatus::Connecting);
            }
            ConnectivityState::Connected => {
                self.provisioning.set_status(ProvisioningStatus::WifiOk);
            }
            ConnectivityState::TimeSyncing => {
                if from != ConnectivityState::Connected {
                    self.provisioning.set_status(ProvisioningStatus::WifiOk);
                }
                self.provisioning.set_status(ProvisioningStatus::TimeSyncing);
            }
            ConnectivityState::Ready => {
                self.provisioning.set_status(ProvisioningStatus::Ready);
                if self.provisioning.advertising_mode() == AdvertisingMode::Fast {
                    self.provisioning.set_operational_mode();
                }
            }
            ConnectivityState::Disconnected => {
                if from == ConnectivityState::Connecting {
                    self.provisioning.set_status(ProvisioningStatus::WifiFail);
                }
            }
        }
    }

    /// Too many consecutive failed attempts with the current credentials:
    /// stop using them and let the companion app provide new ones.  Stored
    /// credentials are kept, so a reboot tries them again.
    fn check_fallback(&mut self) {
        if self.provisioning.is_provisioning()
            || !self.connectivity.has_credentials()
            || self.connectivity.boot_failures() < self.config.boot_max_failures
        {
            return;
        }
        log::warn!(
            "{} consecutive Wi-Fi failures, falling back to BLE provisioning",
            self.connectivity.boot_failures()
        );
        self.connectivity.forget_credentials();
        self.connectivity.reset_boot_failures();
        self.provisioning.enter_provisioning();
        self.last_state = self.connectivity.state();
    }

    fn handle_window(&mut self, now: u64) {
        let Some(window) = self.sensors.take_window(now) else {
            return;
        };

        if self.provisioning.is_provisioning() {
            log::debug!("Provisioning mode, window discarded");
            self.counters.discarded_provisioning += 1;
            return;
        }
        let Some(timestamp) = self.connectivity.timestamp() else {
            log::info!("Wi-Fi not ready, window discarded");
            self.counters.discarded_not_ready += 1;
            return;
        };

        let (samples, beats) = (window.sample_count(), window.beat_count());
        if self
            .dispatcher
            .enqueue(window, self.connectivity.device_id(), timestamp)
        {
            log::info!("Window queued: {} samples, {} beats", samples, beats);
            self.counters.queued += 1;
        } else {
            self.counters.dropped_queue_full += 1;
        }
    }

    fn on_result(&mut self, result: DispatchResult) {
        log::debug!(
            "Dispatch finished: {:?} after {} attempt(s)",
            result.outcome,
            result.attempts
        );
        if let Some(prediction) = result.prediction {
            self.provisioning.notify_risk_score(prediction.risk_score);
            self.provisioning.notify_risk_label(&prediction.risk_label);
            self.last_prediction = Some(prediction);
        }
    }

    fn report(&mut self) {
        let hr = self.sensors.heart_rate();
        let spo2 = self.sensors.spo2();
        let status = self.device_status();

        self.provisioning.notify_heart_rate(hr);
        self.provisioning.notify_spo2(spo2);
        self.provisioning.notify_device_status(status);

        log::info!("{}", vitals_line(hr, spo2, self.sensors.beat_total()));
        if self.sensors.leads_off() {
            log::info!("ECG leads OFF, reattach electrodes");
        }
    }

    pub fn device_status(&self) -> DeviceStatus {
        DeviceStatus::default()
            .with(DeviceStatus::SENSOR_OK, self.sensors.sensor_ok())
            .with(DeviceStatus::LEAD_OFF, self.sensors.leads_off())
            .with(DeviceStatus::LINK_UP, self.connectivity.link().is_connected())
            .with(DeviceStatus::READY, self.connectivity.is_ready())
            .with(DeviceStatus::PROVISIONING, self.provisioning.is_provisioning())
            .with(DeviceStatus::DISPATCH_BUSY, self.dispatcher.is_busy())
    }

    // ---- Accessors ----

    pub fn clock(&self) -> &P::Clock {
        &self.clock
    }

    pub fn sensors(&self) -> &WindowBuffer<P::Oximeter, P::Ecg, P::Indicator> {
        &self.sensors
    }

    pub fn sensors_mut(&mut self) -> &mut WindowBuffer<P::Oximeter, P::Ecg, P::Indicator> {
        &mut self.sensors
    }

    pub fn connectivity(&self) -> &ConnectivityManager<P::Link, P::Time> {
        &self.connectivity
    }

    pub fn connectivity_mut(&mut self) -> &mut ConnectivityManager<P::Link, P::Time> {
        &mut self.connectivity
    }

    pub fn provisioning(&self) -> &ProvisioningChannel<P::Radio> {
        &self.provisioning
    }

    pub fn store_mut(&mut self) -> &mut P::Store {
        &mut self.store
    }

    pub fn dispatcher(&self) -> &TelemetryDispatcher {
        &self.dispatcher
    }

    pub fn last_prediction(&self) -> Option<&Prediction> {
        self.last_prediction.as_ref()
    }

    pub fn counters(&self) -> WindowCounters {
        self.counters
    }
}

/// `HR: 72.5 bpm | SpO2: 97% | Beats: 42`, with placeholders for missing
/// readings.
pub fn vitals_line(heart_rate: f32, spo2: u8, beats: u64) -> String {
    let hr = if heart_rate < 1.0 {
        "--.-".to_string()
    } else {
        format!("{:.1}", heart_rate)
    };
    let spo2 = if spo2 == 0 {
        "---".to_string()
    } else {
        spo2.to_string()
    };
    format!("HR: {} bpm | SpO2: {}% | Beats: {}", hr, spo2, beats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::events::Characteristic;
    use crate::net::Credentials;
    use crate::provision::MemoryStore;
    use crate::sim::{
        SimEcg, SimLed, SimOximeter, SimPlatform, SimRadio, SimTime, SimTransport, SimWifi,
    };
    use pretty_assertions::assert_eq;
    use std::time::{Duration, Instant};

    const SYNCED: i64 = MIN_VALID_UNIX_TIME + 86_400;

    fn node(stored: Option<Credentials>, auto_connect: bool) -> Node<SimPlatform> {
        let clock = ManualClock::new(0);
        let mut link = SimWifi::new([0x24, 0x6F, 0x28, 0x01, 0x02, 0x03]);
        link.set_auto_connect(auto_connect);
        let store = stored
            .as_ref()
            .map(MemoryStore::with_credentials)
            .unwrap_or_default();
        let dispatcher =
            TelemetryDispatcher::spawn(SimTransport::new(), clock.clone(), Default::default())
                .expect("spawn dispatcher");
        let mut node = Node::new(
            NodeParts {
                clock,
                oximeter: SimOximeter::new(),
                ecg: SimEcg::new(),
                indicator: SimLed::default(),
                link,
                time: SimTime::syncing_to(SYNCED),
                radio: SimRadio::default(),
                inbox: Arc::new(ProvisioningInbox::new()),
                store,
                dispatcher,
            },
            NodeConfig::default(),
        );
        node.begin().expect("sensor init");
        node
    }

    fn run(node: &mut Node<SimPlatform>, steps: usize) {
        for _ in 0..steps {
            node.step();
            node.clock().advance(ECG_SAMPLE_PERIOD_MS);
        }
    }

    fn statuses(node: &Node<SimPlatform>) -> Vec<u8> {
        node.provisioning()
            .radio()
            .notified(Characteristic::ProvStatus)
            .into_iter()
            .map(|v| v[0])
            .collect()
    }

    #[test]
    fn boots_operational_with_stored_credentials() {
        let node = node(Some(Credentials::new("ward-7", "pw")), false);
        assert!(!node.provisioning().is_provisioning());
        assert_eq!(
            node.provisioning().radio().advertising(),
            Some(AdvertisingMode::Slow)
        );
        assert_eq!(node.connectivity().state(), ConnectivityState::Connecting);
        assert_eq!(node.connectivity().device_id(), "ESP32_010203");
    }

    #[test]
    fn boots_provisioning_without_credentials() {
        let mut node = node(None, false);
        run(&mut node, 100);
        assert!(node.provisioning().is_provisioning());
        assert_eq!(
            node.provisioning().radio().advertising(),
            Some(AdvertisingMode::Fast)
        );
        assert_eq!(node.connectivity().link().begin_calls(), 0);
        assert!(node.device_status().contains(DeviceStatus::PROVISIONING));
    }

    #[test]
    fn falls_back_to_provisioning_after_repeated_failures() {
        let mut node = node(Some(Credentials::new("gone", "pw")), false);
        // 15 s timeout + 1 s, 2 s backoff: third failure lands well within 60 s.
        for _ in 0..60 {
            node.step();
            node.clock().advance(1000);
        }
        assert!(node.provisioning().is_provisioning());
        assert!(!node.connectivity().has_credentials());
        assert_eq!(node.connectivity().link().begin_calls(), 3);
        // Stored credentials survive for the next boot.
        assert_eq!(
            store::load_credentials(node.store_mut()),
            Ok(Some(Credentials::new("gone", "pw")))
        );
    }

    #[test]
    fn mirrors_connectivity_into_status_and_slows_advertising() {
        let mut node = node(None, true);
        let inbox = node.provisioning().inbox();
        inbox.on_client_connected();
        inbox.on_write(Characteristic::ProvSsid, b"ward-7");
        inbox.on_write(Characteristic::ProvPassword, b"pw");
        inbox.on_write(Characteristic::ProvCommand, &[crate::events::CMD_CONNECT]);
        run(&mut node, 5);

        assert!(node.connectivity().is_ready());
        assert_eq!(
            statuses(&node),
            vec![
                ProvisioningStatus::Connecting.code(),
                ProvisioningStatus::Connecting.code(),
                ProvisioningStatus::WifiOk.code(),
                ProvisioningStatus::TimeSyncing.code(),
                ProvisioningStatus::Ready.code(),
            ]
        );
        assert_eq!(
            node.provisioning().radio().advertising(),
            Some(AdvertisingMode::Slow)
        );
    }

    #[test]
    fn windows_discarded_until_ready() {
        let mut node = node(Some(Credentials::new("ward-7", "pw")), false);
        run(&mut node, ECG_SAMPLES_PER_WINDOW + 1);
        assert_eq!(node.counters().discarded_not_ready, 1);
        assert_eq!(node.counters().queued, 0);
    }

    #[test]
    fn ready_window_is_uploaded_and_risk_notified() {
        let mut node = node(Some(Credentials::new("ward-7", "pw")), true);
        node.provisioning().inbox().on_client_connected();
        node.sensors_mut().oximeter_mut().set_vitals(71.0, 98);
        run(&mut node, ECG_SAMPLES_PER_WINDOW + 1);
        assert_eq!(node.counters().queued, 1);

        let deadline = Instant::now() + Duration::from_secs(5);
        while node.last_prediction().is_none() {
            assert!(Instant::now() < deadline, "no dispatch result");
            std::thread::sleep(Duration::from_millis(1));
            node.step();
        }
        assert_eq!(
            node.provisioning().radio().notified(Characteristic::RiskLabel),
            vec![b"low".to_vec()]
        );
        let status = node.device_status();
        assert!(status.contains(DeviceStatus::SENSOR_OK));
        assert!(status.contains(DeviceStatus::READY));
        assert!(status.contains(DeviceStatus::LINK_UP));
        assert!(!status.contains(DeviceStatus::PROVISIONING));
    }

    #[test]
    fn vitals_notified_once_per_period() {
        let mut node = node(Some(Credentials::new("ward-7", "pw")), true);
        node.provisioning().inbox().on_client_connected();
        node.sensors_mut().oximeter_mut().set_vitals(72.5, 97);
        // 2.5 s of loop: reports at 0, 1000 and 2000 ms.
        run(&mut node, 250);
        assert_eq!(
            node.provisioning().radio().notified(Characteristic::HeartRate),
            vec![725u16.to_le_bytes().to_vec(); 3]
        );
    }

    #[test]
    fn vitals_line_placeholders() {
        assert_eq!(vitals_line(0.0, 0, 0), "HR: --.- bpm | SpO2: ---% | Beats: 0");
        assert_eq!(vitals_line(72.46, 97, 12), "HR: 72.5 bpm | SpO2: 97% | Beats: 12");
    }
}
