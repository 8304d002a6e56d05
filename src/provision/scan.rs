// Cardiac Node — Wi-Fi Scan Pager
//
//   Idle ──(start)──▶ Running ──(done, n > 0)──▶ Sending ──(all records + end marker)──▶ Idle
//                        │
//                        └──(timeout / failure / n == 0)──▶ end marker ──▶ Idle
//
// Results go out one record per `notify_interval_ms` as
// "index,total,rssi,auth,ssid"; an empty payload marks the end.  The interval
// is a minimum spacing: a slow caller only delays records, never drops them.

use crate::config::ScanConfig;
use crate::net::{AccessPoint, ScanStatus, WifiScanner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Running,
    Sending,
}

/// What the pager wants sent on the scan-result characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutput {
    Record(String),
    EndOfResults,
}

impl ScanOutput {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Record(text) => text.as_bytes(),
            Self::EndOfResults => &[],
        }
    }
}

pub fn format_record(index: usize, total: usize, ap: &AccessPoint) -> String {
    format!("{},{},{},{},{}", index, total, ap.rssi, ap.auth, ap.ssid)
}

#[derive(Debug)]
pub struct ScanPager {
    config: ScanConfig,
    state: ScanState,
    started_ms: u64,
    total: usize,
    next_index: usize,
    last_sent_ms: Option<u64>,
}

impl ScanPager {
    pub fn new(config: ScanConfig) -> Self {
        Self {
            config,
            state: ScanState::Idle,
            started_ms: 0,
            total: 0,
            next_index: 0,
            last_sent_ms: None,
        }
    }

    /// Start a scan if none is in flight.  Returns false when the request
    /// was ignored or the scanner refused.
    pub fn start<S: WifiScanner + ?Sized>(&mut self, now_ms: u64, scanner: &mut S) -> bool {
        if self.state != ScanState::Idle {
            log::info!("Scan already in progress, ignoring");
            return false;
        }
        scanner.clear_scan();
        match scanner.start_scan() {
            Ok(()) => {
                log::info!("Wi-Fi scan requested");
                self.state = ScanState::Running;
                self.started_ms = now_ms;
                self.total = 0;
                self.next_index = 0;
                self.last_sent_ms = None;
                true
            }
            Err(e) => {
                log::warn!("Wi-Fi scan not started: {}", e);
                false
            }
        }
    }

    /// Drop whatever is in flight without sending the remainder.
    pub fn abort<S: WifiScanner + ?Sized>(&mut self, scanner: &mut S) {
        if self.state == ScanState::Idle {
            return;
        }
        scanner.clear_scan();
        self.state = ScanState::Idle;
        log::info!("Scan aborted (client disconnected)");
    }

    /// One pager step.  Emits at most one output.
    pub fn process<S: WifiScanner + ?Sized>(
        &mut self,
        now_ms: u64,
        scanner: &mut S,
    ) -> Option<ScanOutput> {
        match self.state {
            ScanState::Idle => None,
            ScanState::Running => self.poll_scanner(now_ms, scanner),
            ScanState::Sending => self.send_next(now_ms, scanner),
        }
    }

    fn poll_scanner<S: WifiScanner + ?Sized>(
        &mut self,
        now_ms: u64,
        scanner: &mut S,
    ) -> Option<ScanOutput> {
        match scanner.scan_status() {
            ScanStatus::Running => {
                if now_ms.saturating_sub(self.started_ms) > self.config.timeout_ms {
                    log::warn!("Wi-Fi scan timeout");
                    return Some(self.finish(scanner));
                }
                None
            }
            ScanStatus::Failed => {
                log::warn!("Wi-Fi scan failed");
                Some(self.finish(scanner))
            }
            ScanStatus::Done(found) => {
                log::info!("Wi-Fi scan done: {} networks found", found);
                self.total = found.min(self.config.max_results);
                self.next_index = 0;
                if self.total == 0 {
                    return Some(self.finish(scanner));
                }
                self.state = ScanState::Sending;
                None
            }
        }
    }

    fn send_next<S: WifiScanner + ?Sized>(
        &mut self,
        now_ms: u64,
        scanner: &mut S,
    ) -> Option<ScanOutput> {
        if let Some(last) = self.last_sent_ms {
            if now_ms.saturating_sub(last) < self.config.notify_interval_ms {
                return None;
            }
        }
        self.last_sent_ms = Some(now_ms);

        if self.next_index >= self.total {
            log::info!("Wi-Fi scan results sent");
            return Some(self.finish(scanner));
        }

        let index = self.next_index;
        self.next_index += 1;
        let ap = scanner.scan_result(index).unwrap_or(AccessPoint {
            ssid: String::new(),
            rssi: 0,
            auth: 0,
        });
        Some(ScanOutput::Record(format_record(index, self.total, &ap)))
    }

    fn finish<S: WifiScanner + ?Sized>(&mut self, scanner: &mut S) -> ScanOutput {
        scanner.clear_scan();
        self.state = ScanState::Idle;
        ScanOutput::EndOfResults
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn next_index(&self) -> usize {
        self.next_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimWifi;
    use pretty_assertions::assert_eq;

    fn ap(ssid: &str, rssi: i8) -> AccessPoint {
        AccessPoint {
            ssid: ssid.into(),
            rssi,
            auth: 3,
        }
    }

    fn wifi_with(aps: Vec<AccessPoint>) -> SimWifi {
        let mut wifi = SimWifi::new([0; 6]);
        wifi.set_scan_results(aps);
        wifi
    }

    #[test]
    fn pages_records_then_end_marker() {
        let mut wifi = wifi_with(vec![ap("ward-7", -48), ap("lobby", -71)]);
        let mut pager = ScanPager::new(ScanConfig::default());

        assert!(pager.start(0, &mut wifi));
        assert_eq!(pager.process(5, &mut wifi), None); // still running
        wifi.complete_scan();
        assert_eq!(pager.process(10, &mut wifi), None);
        assert_eq!(pager.state(), ScanState::Sending);

        let mut out = Vec::new();
        let mut now = 10;
        while pager.state() != ScanState::Idle {
            if let Some(o) = pager.process(now, &mut wifi) {
                out.push((now, o));
            }
            now += 1;
        }

        assert_eq!(
            out,
            vec![
                (10, ScanOutput::Record("0,2,-48,3,ward-7".into())),
                (40, ScanOutput::Record("1,2,-71,3,lobby".into())),
                (70, ScanOutput::EndOfResults),
            ]
        );
    }

    #[test]
    fn coarse_polling_delays_but_never_drops() {
        let aps = (0..5).map(|i| ap(&format!("net{i}"), -60)).collect();
        let mut wifi = wifi_with(aps);
        let mut pager = ScanPager::new(ScanConfig::default());
        pager.start(0, &mut wifi);
        wifi.complete_scan();

        let mut records = 0;
        let mut now = 0;
        while pager.state() != ScanState::Idle {
            if let Some(ScanOutput::Record(_)) = pager.process(now, &mut wifi) {
                records += 1;
            }
            now += 100;
        }
        assert_eq!(records, 5);
    }

    #[test]
    fn results_capped_at_maximum() {
        let aps = (0..40).map(|i| ap(&format!("n{i}"), -50)).collect();
        let mut wifi = wifi_with(aps);
        let mut pager = ScanPager::new(ScanConfig::default());
        pager.start(0, &mut wifi);
        wifi.complete_scan();
        pager.process(0, &mut wifi);
        assert_eq!(pager.total(), 20);
        assert_eq!(
            pager.process(0, &mut wifi),
            Some(ScanOutput::Record("0,20,-50,3,n0".into()))
        );
    }

    #[test]
    fn zero_results_end_immediately() {
        let mut wifi = wifi_with(Vec::new());
        let mut pager = ScanPager::new(ScanConfig::default());
        pager.start(0, &mut wifi);
        wifi.complete_scan();
        assert_eq!(pager.process(1, &mut wifi), Some(ScanOutput::EndOfResults));
        assert_eq!(pager.state(), ScanState::Idle);
    }

    #[test]
    fn timeout_and_failure_end_with_marker() {
        let mut wifi = wifi_with(vec![ap("x", -1)]);
        let mut pager = ScanPager::new(ScanConfig::default());
        pager.start(0, &mut wifi);
        assert_eq!(pager.process(10_000, &mut wifi), None);
        assert_eq!(pager.process(10_001, &mut wifi), Some(ScanOutput::EndOfResults));
        assert_eq!(pager.state(), ScanState::Idle);

        pager.start(20_000, &mut wifi);
        wifi.fail_scan();
        assert_eq!(pager.process(20_001, &mut wifi), Some(ScanOutput::EndOfResults));
    }

    #[test]
    fn second_start_is_ignored() {
        let mut wifi = wifi_with(vec![ap("a", -40), ap("b", -41)]);
        let mut pager = ScanPager::new(ScanConfig::default());
        assert!(pager.start(0, &mut wifi));
        wifi.complete_scan();
        pager.process(1, &mut wifi);
        pager.process(2, &mut wifi);
        let (state, index) = (pager.state(), pager.next_index());

        assert!(!pager.start(3, &mut wifi));
        assert_eq!((pager.state(), pager.next_index()), (state, index));
        assert_eq!(wifi.scan_starts(), 1);
    }

    #[test]
    fn abort_stops_sending() {
        let mut wifi = wifi_with(vec![ap("a", -40), ap("b", -41)]);
        let mut pager = ScanPager::new(ScanConfig::default());
        pager.start(0, &mut wifi);
        wifi.complete_scan();
        pager.process(0, &mut wifi);
        assert!(pager.process(0, &mut wifi).is_some());
        pager.abort(&mut wifi);
        assert_eq!(pager.state(), ScanState::Idle);
        assert_eq!(pager.process(1000, &mut wifi), None);
    }
}
