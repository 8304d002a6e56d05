// Cardiac Node — Simulated Collaborators
//
// Host stand-ins for every hardware collaborator.
//
// Used by the unit tests, the integration scenarios and the host build of
// the firmware binary.  Each fake is scriptable from the outside and keeps
// enough history to assert on.

use std::collections::{HashMap, VecDeque};
use std::marker::PhantomData;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};

use crate::clock::{Clock, ManualClock};
use crate::error::{NetError, SensorError, TransportError};
use crate::events::{AdvertisingMode, Characteristic};
use crate::net::{AccessPoint, Credentials, ScanStatus, TimeSource, WifiLink, WifiScanner};
use crate::node::Platform;
use crate::provision::{MemoryStore, Radio};
use crate::sensor::{BeatIndicator, EcgFrontEnd, PulseOximeter};
use crate::telemetry::{HttpResponse, Transport};

/// A node built entirely from the fakes below, driven by clock `C`.
pub struct SimPlatform<C = ManualClock>(PhantomData<C>);

impl<C: Clock> Platform for SimPlatform<C> {
    type Clock = C;
    type Oximeter = SimOximeter;
    type Ecg = SimEcg;
    type Indicator = SimLed;
    type Link = SimWifi;
    type Time = SimTime;
    type Radio = SimRadio;
    type Store = MemoryStore;
}

// ---------------------------------------------------------------------------
// Sensors
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct SimOximeter {
    pending_beats: u32,
    failing_inits: u32,
    init_calls: u32,
    heart_rate: f32,
    spo2: u8,
}

impl SimOximeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `n` beats on the next `update`.
    pub fn queue_beats(&mut self, n: u32) {
        self.pending_beats += n;
    }

    /// Make the next `n` `init` calls fail.
    pub fn fail_next_inits(&mut self, n: u32) {
        self.failing_inits = self.failing_inits.saturating_add(n);
    }

    pub fn set_vitals(&mut self, heart_rate: f32, spo2: u8) {
        self.heart_rate = heart_rate;
        self.spo2 = spo2;
    }

    pub fn init_calls(&self) -> u32 {
        self.init_calls
    }
}

impl PulseOximeter for SimOximeter {
    fn init(&mut self) -> Result<(), SensorError> {
        self.init_calls += 1;
        if self.failing_inits > 0 {
            self.failing_inits -= 1;
            return Err(SensorError::NotDetected(0x00));
        }
        Ok(())
    }

    fn update(&mut self) -> u32 {
        core::mem::take(&mut self.pending_beats)
    }

    fn heart_rate(&self) -> f32 {
        self.heart_rate
    }

    fn spo2(&self) -> u8 {
        self.spo2
    }
}

/// Sawtooth around mid-scale; never reads as the lead-off zero.
#[derive(Debug, Default)]
pub struct SimEcg {
    leads_off: bool,
    phase: u16,
}

impl SimEcg {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_leads_off(&mut self, off: bool) {
        self.leads_off = off;
    }
}

impl EcgFrontEnd for SimEcg {
    fn leads_off(&mut self) -> bool {
        self.leads_off
    }

    fn read_raw(&mut self) -> u16 {
        self.phase = (self.phase + 1) % 80;
        1800 + self.phase * 8
    }
}

#[derive(Debug, Default)]
pub struct SimLed {
    on: bool,
    pulses: u32,
}

impl SimLed {
    pub fn is_on(&self) -> bool {
        self.on
    }

    /// Number of off→on edges seen.
    pub fn pulses(&self) -> u32 {
        self.pulses
    }
}

impl BeatIndicator for SimLed {
    fn set(&mut self, on: bool) {
        if on && !self.on {
            self.pulses += 1;
        }
        self.on = on;
    }
}

// ---------------------------------------------------------------------------
// Wi-Fi / time
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimScan {
    Idle,
    Running,
    Done,
    Failed,
}

#[derive(Debug)]
pub struct SimWifi {
    mac: [u8; 6],
    connected: bool,
    auto_connect: bool,
    fail_begin: bool,
    begin_calls: u32,
    last_credentials: Option<Credentials>,
    scan: SimScan,
    scan_results: Vec<AccessPoint>,
    scan_starts: u32,
}

impl SimWifi {
    pub fn new(mac: [u8; 6]) -> Self {
        Self {
            mac,
            connected: false,
            auto_connect: false,
            fail_begin: false,
            begin_calls: 0,
            last_credentials: None,
            scan: SimScan::Idle,
            scan_results: Vec::new(),
            scan_starts: 0,
        }
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// Associate as soon as `begin` is called.
    pub fn set_auto_connect(&mut self, auto: bool) {
        self.auto_connect = auto;
    }

    pub fn fail_begin(&mut self, fail: bool) {
        self.fail_begin = fail;
    }

    pub fn begin_calls(&self) -> u32 {
        self.begin_calls
    }

    pub fn last_credentials(&self) -> Option<&Credentials> {
        self.last_credentials.as_ref()
    }

    pub fn set_scan_results(&mut self, results: Vec<AccessPoint>) {
        self.scan_results = results;
    }

    pub fn complete_scan(&mut self) {
        if self.scan == SimScan::Running {
            self.scan = SimScan::Done;
        }
    }

    pub fn fail_scan(&mut self) {
        if self.scan == SimScan::Running {
            self.scan = SimScan::Failed;
        }
    }

    pub fn scan_starts(&self) -> u32 {
        self.scan_starts
    }
}

impl WifiLink for SimWifi {
    fn begin(&mut self, credentials: &Credentials) -> Result<(), NetError> {
        self.begin_calls += 1;
        if self.fail_begin {
            return Err(NetError::Driver("simulated begin failure".into()));
        }
        self.last_credentials = Some(credentials.clone());
        if self.auto_connect {
            self.connected = true;
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn mac_address(&self) -> [u8; 6] {
        self.mac
    }

    fn rssi(&self) -> Option<i8> {
        self.connected.then_some(-55)
    }
}

impl WifiScanner for SimWifi {
    fn start_scan(&mut self) -> Result<(), NetError> {
        self.scan_starts += 1;
        self.scan = SimScan::Running;
        Ok(())
    }

    fn scan_status(&mut self) -> ScanStatus {
        match self.scan {
            SimScan::Running => ScanStatus::Running,
            SimScan::Done => ScanStatus::Done(self.scan_results.len()),
            SimScan::Idle | SimScan::Failed => ScanStatus::Failed,
        }
    }

    fn scan_result(&self, index: usize) -> Option<AccessPoint> {
        if self.scan != SimScan::Done {
            return None;
        }
        self.scan_results.get(index).cloned()
    }

    fn clear_scan(&mut self) {
        self.scan = SimScan::Idle;
    }
}

#[derive(Debug, Default)]
pub struct SimTime {
    unix: Option<i64>,
    sync_result: Option<i64>,
    fail_start: bool,
    start_calls: u32,
}

impl SimTime {
    /// `start_sync` sets the clock to `unix` seconds.
    pub fn syncing_to(unix: i64) -> Self {
        Self {
            sync_result: Some(unix),
            ..Self::default()
        }
    }

    pub fn set_time(&mut self, unix: Option<i64>) {
        self.unix = unix;
    }

    pub fn fail_start(&mut self, fail: bool) {
        self.fail_start = fail;
    }

    pub fn start_calls(&self) -> u32 {
        self.start_calls
    }
}

impl TimeSource for SimTime {
    fn start_sync(&mut self) -> Result<(), NetError> {
        self.start_calls += 1;
        if self.fail_start {
            return Err(NetError::TimeSync("simulated".into()));
        }
        if let Some(unix) = self.sync_result {
            self.unix = Some(unix);
        }
        Ok(())
    }

    fn unix_time(&self) -> Option<i64> {
        self.unix
    }
}

// ---------------------------------------------------------------------------
// BLE
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct SimRadio {
    values: HashMap<Characteristic, Vec<u8>>,
    notifications: Vec<(Characteristic, Vec<u8>)>,
    advertising: Option<AdvertisingMode>,
}

impl SimRadio {
    pub fn value(&self, characteristic: Characteristic) -> Option<Vec<u8>> {
        self.values.get(&characteristic).cloned()
    }

    /// Every payload notified on `characteristic`, oldest first.
    pub fn notified(&self, characteristic: Characteristic) -> Vec<Vec<u8>> {
        self.notifications
            .iter()
            .filter(|(c, _)| *c == characteristic)
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn advertising(&self) -> Option<AdvertisingMode> {
        self.advertising
    }

    pub fn clear_notifications(&mut self) {
        self.notifications.clear();
    }
}

impl Radio for SimRadio {
    fn set_value(&mut self, characteristic: Characteristic, value: &[u8]) {
        self.values.insert(characteristic, value.to_vec());
    }

    fn notify(&mut self, characteristic: Characteristic, value: &[u8]) {
        self.values.insert(characteristic, value.to_vec());
        self.notifications.push((characteristic, value.to_vec()));
    }

    fn set_advertising(&mut self, mode: AdvertisingMode) {
        self.advertising = Some(mode);
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

const CANNED_RESPONSE: &[u8] =
    br#"{"prediction":{"risk_score":0.12,"confidence":0.91,"risk_label":"low"}}"#;

/// Scripted predictor.  Unscripted requests get a 200 with a low-risk
/// prediction.
pub struct SimTransport {
    responses: VecDeque<Result<HttpResponse, TransportError>>,
    posted: Arc<Mutex<Vec<Vec<u8>>>>,
    gate: Option<Receiver<()>>,
    ready: bool,
}

impl SimTransport {
    pub fn new() -> Self {
        Self {
            responses: VecDeque::new(),
            posted: Arc::new(Mutex::new(Vec::new())),
            gate: None,
            ready: true,
        }
    }

    pub fn push_response(&mut self, response: Result<HttpResponse, TransportError>) {
        self.responses.push_back(response);
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    /// From now on every `post` waits for one message on the returned
    /// sender.
    pub fn gate(&mut self) -> Sender<()> {
        let (tx, rx) = mpsc::channel();
        self.gate = Some(rx);
        tx
    }

    /// Shared log of request bodies.
    pub fn posted(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
        Arc::clone(&self.posted)
    }

    pub fn post_count(&self) -> usize {
        self.posted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for SimTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SimTransport {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn post(&mut self, body: &[u8]) -> Result<HttpResponse, TransportError> {
        if let Some(gate) = &self.gate {
            if gate.recv().is_err() {
                return Err(TransportError::Network("gate closed".into()));
            }
        }
        self.posted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(body.to_vec());
        self.responses.pop_front().unwrap_or_else(|| {
            Ok(HttpResponse {
                status: 200,
                body: CANNED_RESPONSE.to_vec(),
            })
        })
    }
}
