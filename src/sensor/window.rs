// Cardiac Node — ECG Window Buffer
//
// Collects 1000 ECG samples (10 s at 100 Hz) plus the beat offsets reported
// by the pulse oximeter, then holds the completed window until the main loop
// drains it.  Also owns stall detection for the oximeter: if beats have been
// seen before but none arrive for `stall_timeout_ms`, the sensor is
// re-initialised in place.

use crate::clock::Clock;
use crate::config::*;
use crate::error::SensorError;
use crate::sensor::{BeatIndicator, EcgFrontEnd, PulseOximeter};

/// One completed unit of telemetry.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleWindow {
    pub ecg_samples: heapless::Vec<u16, ECG_SAMPLES_PER_WINDOW>,
    /// Beat times in ms relative to `window_start_ms`, non-decreasing.
    pub beat_offsets_ms: heapless::Vec<u16, MAX_BEATS_PER_WINDOW>,
    pub heart_rate_bpm: f32,
    pub spo2_percent: u8,
    /// Latched: set if the leads were off at any sample in the window.
    pub lead_off: bool,
    pub window_start_ms: u64,
}

impl SampleWindow {
    pub fn empty(window_start_ms: u64) -> Self {
        Self {
            ecg_samples: heapless::Vec::new(),
            beat_offsets_ms: heapless::Vec::new(),
            heart_rate_bpm: 0.0,
            spo2_percent: 0,
            lead_off: false,
            window_start_ms,
        }
    }

    pub fn sample_count(&self) -> usize {
        self.ecg_samples.len()
    }

    pub fn beat_count(&self) -> usize {
        self.beat_offsets_ms.len()
    }

    pub fn is_full(&self) -> bool {
        self.ecg_samples.is_full()
    }
}

pub struct WindowBuffer<O, E, L> {
    oximeter: O,
    ecg: E,
    indicator: L,
    config: WindowConfig,

    active: SampleWindow,
    ready: bool,
    started: bool,

    // Sampling
    last_sample_ms: Option<u64>,
    last_ecg_value: u16,
    leads_off: bool,

    // Vitals snapshot, refreshed every `report_period_ms`
    last_report_ms: Option<u64>,
    heart_rate_bpm: f32,
    spo2_percent: u8,

    // Beat bookkeeping / stall detection
    beat_total: u64,
    beat_total_seen: u64,
    last_beat_change_ms: u64,
    sensor_ok: bool,
    stall_recoveries: u32,

    led_on_since: Option<u64>,
}

impl<O, E, L> WindowBuffer<O, E, L>
where
    O: PulseOximeter,
    E: EcgFrontEnd,
    L: BeatIndicator,
{
    pub fn new(oximeter: O, ecg: E, indicator: L, config: WindowConfig) -> Self {
        Self {
            oximeter,
            ecg,
            indicator,
            config,
            active: SampleWindow::empty(0),
            ready: false,
            started: false,
            last_sample_ms: None,
            last_ecg_value: 0,
            leads_off: false,
            last_report_ms: None,
            heart_rate_bpm: 0.0,
            spo2_percent: 0,
            beat_total: 0,
            beat_total_seen: 0,
            last_beat_change_ms: 0,
            sensor_ok: false,
            stall_recoveries: 0,
            led_on_since: None,
        }
    }

    /// Bring the oximeter up and open the first window.  An error here means
    /// no valid telemetry can ever be produced.
    pub fn begin<C: Clock>(&mut self, clock: &C) -> Result<(), SensorError> {
        self.indicator.set(false);
        self.init_oximeter(clock)?;

        let now = clock.now_ms();
        self.active = SampleWindow::empty(now);
        self.ready = false;
        self.started = true;
        log::info!("ECG front-end ready, first window opens at {} ms", now);
        Ok(())
    }

    /// Bounded init loop.  This and stall recovery are the only places the
    /// sampling path is allowed to block.
    fn init_oximeter<C: Clock>(&mut self, clock: &C) -> Result<(), SensorError> {
        let attempts = self.config.init_retries.max(1);
        for attempt in 1..=attempts {
            log::info!("Pulse oximeter init attempt {}/{}", attempt, attempts);
            match self.oximeter.init() {
                Ok(()) => {
                    self.last_beat_change_ms = clock.now_ms();
                    self.beat_total_seen = self.beat_total;
                    self.sensor_ok = true;
                    return Ok(());
                }
                Err(e) => {
                    log::warn!("Pulse oximeter init failed: {}", e);
                    if attempt < attempts {
                        clock.sleep_ms(self.config.init_retry_delay_ms);
                    }
                }
            }
        }
        Err(SensorError::InitFailed(attempts))
    }

    /// Call from the main loop as often as possible; self-paces to
    /// `sample_period_ms`.
    pub fn tick<C: Clock>(&mut self, clock: &C) {
        let now = clock.now_ms();

        // The oximeter FIFO has to be serviced on every pass.
        let beats = self.oximeter.update();
        for _ in 0..beats {
            self.record_beat(now);
        }

        // ---- ECG sampling ----
        let due = self
            .last_sample_ms
            .map_or(true, |t| now.saturating_sub(t) >= self.config.sample_period_ms);
        if due {
            self.last_sample_ms = Some(now);
            self.sample_ecg();
        }

        // ---- Non-blocking LED pulse ----
        if let Some(on_since) = self.led_on_since {
            if now.saturating_sub(on_since) >= self.config.led_pulse_ms {
                self.indicator.set(false);
                self.led_on_since = None;
            }
        }

        // ---- Stall detection ----
        if self.beat_total != self.beat_total_seen {
            self.beat_total_seen = self.beat_total;
            self.last_beat_change_ms = now;
        }
        let stalled = now.saturating_sub(self.last_beat_change_ms) > self.config.stall_timeout_ms;
        if self.sensor_ok && self.beat_total > 0 && stalled {
            self.recover(clock);
        }

        // ---- Vitals snapshot ----
        let report_due = self
            .last_report_ms
            .map_or(true, |t| now.saturating_sub(t) >= self.config.report_period_ms);
        if report_due {
            self.heart_rate_bpm = self.oximeter.heart_rate();
            self.spo2_percent = self.oximeter.spo2();
            self.last_report_ms = Some(now);
        }
    }

    fn sample_ecg(&mut self) {
        self.leads_off = self.ecg.leads_off();
        self.last_ecg_value = if self.leads_off { 0 } else { self.ecg.read_raw() };

        if self.ready {
            return;
        }
        if self.leads_off {
            self.active.lead_off = true;
        }
        // Cannot fail: `ready` is raised the moment the buffer fills.
        let _ = self.active.ecg_samples.push(self.last_ecg_value);
        if self.active.is_full() {
            self.ready = true;
            log::debug!("Window complete ({} samples)", self.active.sample_count());
        }
    }

    /// Beat-detected hook.  Only appends to the current window and lights
    /// the LED; never blocks.  A timestamp older than the last stored beat
    /// is recorded at that beat's offset.
    pub(crate) fn record_beat(&mut self, now_ms: u64) {
        self.beat_total += 1;
        self.indicator.set(true);
        self.led_on_since = Some(now_ms);

        if !self.started || self.active.beat_offsets_ms.is_full() {
            return;
        }
        let last = self.active.beat_offsets_ms.last().copied().map_or(0, u64::from);
        let relative = now_ms
            .saturating_sub(self.active.window_start_ms)
            .max(last);
        if relative <= u64::from(ECG_WINDOW_MS) {
            let _ = self.active.beat_offsets_ms.push(relative as u16);
        }
    }

    fn recover<C: Clock>(&mut self, clock: &C) {
        log::warn!(
            "Sensor stall: no beat for {} ms, reinitialising",
            self.config.stall_timeout_ms
        );
        self.sensor_ok = false;
        self.stall_recoveries += 1;

        match self.init_oximeter(clock) {
            Ok(()) => log::info!("Sensor recovery OK"),
            Err(e) => {
                log::warn!(
                    "Sensor recovery failed ({}), retrying in {} ms",
                    e,
                    self.config.stall_timeout_ms
                );
                self.last_beat_change_ms = clock.now_ms();
                self.sensor_ok = true;
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Hand out the completed window and open the next one at `now_ms`.
    /// Returns `None` (and changes nothing) if no window is ready.
    pub fn take_window(&mut self, now_ms: u64) -> Option<SampleWindow> {
        if !self.ready {
            return None;
        }
        let mut window = core::mem::replace(&mut self.active, SampleWindow::empty(now_ms));
        window.heart_rate_bpm = self.heart_rate_bpm;
        window.spo2_percent = self.spo2_percent;
        self.ready = false;
        Some(window)
    }

    // ---- Accessors ----

    pub fn sample_count(&self) -> usize {
        self.active.sample_count()
    }

    pub fn heart_rate(&self) -> f32 {
        self.heart_rate_bpm
    }

    pub fn spo2(&self) -> u8 {
        self.spo2_percent
    }

    pub fn last_ecg_value(&self) -> u16 {
        self.last_ecg_value
    }

    pub fn leads_off(&self) -> bool {
        self.leads_off
    }

    pub fn sensor_ok(&self) -> bool {
        self.sensor_ok
    }

    pub fn beat_total(&self) -> u64 {
        self.beat_total
    }

    pub fn stall_recoveries(&self) -> u32 {
        self.stall_recoveries
    }

    pub fn oximeter_mut(&mut self) -> &mut O {
        &mut self.oximeter
    }

    pub fn ecg_mut(&mut self) -> &mut E {
        &mut self.ecg
    }

    pub fn indicator(&self) -> &L {
        &self.indicator
    }

    pub fn indicator_mut(&mut self) -> &mut L {
        &mut self.indicator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::sim::{SimEcg, SimLed, SimOximeter};

    type Buffer = WindowBuffer<SimOximeter, SimEcg, SimLed>;

    fn started(clock: &ManualClock) -> Buffer {
        let mut buf = WindowBuffer::new(
            SimOximeter::new(),
            SimEcg::new(),
            SimLed::default(),
            WindowConfig::default(),
        );
        buf.begin(clock).expect("sim oximeter init");
        buf
    }

    fn run_ticks(buf: &mut Buffer, clock: &ManualClock, ticks: usize) {
        for _ in 0..ticks {
            buf.tick(clock);
            clock.advance(ECG_SAMPLE_PERIOD_MS);
        }
    }

    #[test]
    fn sample_count_never_exceeds_capacity() {
        let clock = ManualClock::new(0);
        let mut buf = started(&clock);

        run_ticks(&mut buf, &clock, ECG_SAMPLES_PER_WINDOW + 250);
        assert!(buf.is_ready());
        assert_eq!(buf.sample_count(), ECG_SAMPLES_PER_WINDOW);

        let window = buf.take_window(clock.now_ms()).expect("window ready");
        assert_eq!(window.sample_count(), ECG_SAMPLES_PER_WINDOW);
        assert_eq!(buf.sample_count(), 0);
        assert!(!buf.is_ready());
    }

    #[test]
    fn take_window_is_idempotent_when_not_ready() {
        let clock = ManualClock::new(0);
        let mut buf = started(&clock);
        run_ticks(&mut buf, &clock, 10);

        assert!(buf.take_window(clock.now_ms()).is_none());
        assert!(buf.take_window(clock.now_ms()).is_none());
        assert_eq!(buf.sample_count(), 10);
    }

    #[test]
    fn ticks_faster_than_period_do_not_sample() {
        let clock = ManualClock::new(0);
        let mut buf = started(&clock);
        for _ in 0..50 {
            buf.tick(&clock);
            clock.advance(1);
        }
        // t = 0, 10, 20, 30, 40
        assert_eq!(buf.sample_count(), 5);
    }

    #[test]
    fn lead_off_records_zero_and_latches() {
        let clock = ManualClock::new(0);
        let mut buf = started(&clock);

        run_ticks(&mut buf, &clock, 5);
        buf.ecg_mut().set_leads_off(true);
        run_ticks(&mut buf, &clock, 1);
        buf.ecg_mut().set_leads_off(false);
        run_ticks(&mut buf, &clock, ECG_SAMPLES_PER_WINDOW);

        let window = buf.take_window(clock.now_ms()).expect("window ready");
        assert_eq!(window.ecg_samples[5], 0);
        assert_ne!(window.ecg_samples[4], 0);
        assert!(window.lead_off);

        // The latch belongs to the window, not the buffer.
        run_ticks(&mut buf, &clock, ECG_SAMPLES_PER_WINDOW);
        let next = buf.take_window(clock.now_ms()).expect("window ready");
        assert!(!next.lead_off);
    }

    #[test]
    fn beat_offsets_are_bounded_and_ordered() {
        let clock = ManualClock::new(0);
        let mut buf = started(&clock);

        for i in 0..(MAX_BEATS_PER_WINDOW as u64 + 10) {
            buf.record_beat(i * 300);
        }
        run_ticks(&mut buf, &clock, ECG_SAMPLES_PER_WINDOW);
        let window = buf.take_window(clock.now_ms()).expect("window ready");

        assert_eq!(window.beat_count(), MAX_BEATS_PER_WINDOW);
        assert!(window.beat_offsets_ms.windows(2).all(|w| w[0] <= w[1]));
        assert!(window
            .beat_offsets_ms
            .iter()
            .all(|&o| u32::from(o) <= ECG_WINDOW_MS));
        assert_eq!(buf.beat_total(), MAX_BEATS_PER_WINDOW as u64 + 10);
    }

    #[test]
    fn beats_past_window_duration_are_dropped() {
        let clock = ManualClock::new(1000);
        let mut buf = started(&clock);
        buf.record_beat(1000 + u64::from(ECG_WINDOW_MS) + 1);
        buf.record_beat(1000 + u64::from(ECG_WINDOW_MS));
        run_ticks(&mut buf, &clock, ECG_SAMPLES_PER_WINDOW);
        let window = buf.take_window(clock.now_ms()).expect("window ready");
        assert_eq!(window.beat_offsets_ms.as_slice(), &[ECG_WINDOW_MS as u16]);
    }

    #[test]
    fn late_beat_timestamps_keep_offsets_monotonic() {
        let clock = ManualClock::new(1000);
        let mut buf = started(&clock);
        buf.record_beat(4000);
        buf.record_beat(3000);
        buf.record_beat(500);
        buf.record_beat(4250);
        run_ticks(&mut buf, &clock, ECG_SAMPLES_PER_WINDOW);
        let window = buf.take_window(clock.now_ms()).expect("window ready");
        assert_eq!(window.beat_offsets_ms.as_slice(), &[3000, 3000, 3000, 3250]);
        assert_eq!(buf.beat_total(), 4);
    }

    #[test]
    fn beat_led_pulses_without_blocking() {
        let clock = ManualClock::new(0);
        let mut buf = started(&clock);

        buf.oximeter_mut().queue_beats(1);
        buf.tick(&clock);
        assert!(buf.indicator().is_on());

        clock.advance(BEAT_LED_PULSE_MS - 1);
        buf.tick(&clock);
        assert!(buf.indicator().is_on());

        clock.advance(1);
        buf.tick(&clock);
        assert!(!buf.indicator().is_on());
    }

    #[test]
    fn stall_triggers_reinit_and_recovers() {
        let clock = ManualClock::new(0);
        let mut buf = started(&clock);
        assert_eq!(buf.oximeter_mut().init_calls(), 1);

        // No beat ever seen: no stall handling.
        clock.advance(STALL_TIMEOUT_MS * 2);
        buf.tick(&clock);
        assert_eq!(buf.stall_recoveries(), 0);

        buf.oximeter_mut().queue_beats(1);
        buf.tick(&clock);
        clock.advance(STALL_TIMEOUT_MS + 1);
        buf.tick(&clock);

        assert_eq!(buf.stall_recoveries(), 1);
        assert_eq!(buf.oximeter_mut().init_calls(), 2);
        assert!(buf.sensor_ok());
    }

    #[test]
    fn failed_recovery_resumes_and_retries_next_timeout() {
        let clock = ManualClock::new(0);
        let mut buf = started(&clock);
        buf.oximeter_mut().queue_beats(1);
        buf.tick(&clock);

        buf.oximeter_mut().fail_next_inits(SENSOR_INIT_RETRIES);
        clock.advance(STALL_TIMEOUT_MS + 1);
        let before = clock.now_ms();
        buf.tick(&clock);

        assert!(buf.sensor_ok(), "optimistically resumes");
        assert_eq!(buf.stall_recoveries(), 1);
        assert_eq!(buf.oximeter_mut().init_calls(), 1 + SENSOR_INIT_RETRIES);
        // Four inter-attempt delays on the failure path.
        assert_eq!(
            clock.now_ms() - before,
            SENSOR_INIT_RETRY_DELAY_MS * u64::from(SENSOR_INIT_RETRIES - 1)
        );

        // Not again until another full timeout passes.
        clock.advance(STALL_TIMEOUT_MS);
        buf.tick(&clock);
        assert_eq!(buf.stall_recoveries(), 1);
        clock.advance(1);
        buf.tick(&clock);
        assert_eq!(buf.stall_recoveries(), 2);
    }

    #[test]
    fn begin_fails_when_sensor_absent() {
        let clock = ManualClock::new(0);
        let mut oximeter = SimOximeter::new();
        oximeter.fail_next_inits(u32::MAX);
        let mut buf = WindowBuffer::new(
            oximeter,
            SimEcg::new(),
            SimLed::default(),
            WindowConfig::default(),
        );
        assert_eq!(
            buf.begin(&clock),
            Err(SensorError::InitFailed(SENSOR_INIT_RETRIES))
        );
    }

    #[test]
    fn window_carries_latest_vitals() {
        let clock = ManualClock::new(0);
        let mut buf = started(&clock);
        buf.oximeter_mut().set_vitals(72.5, 97);
        run_ticks(&mut buf, &clock, ECG_SAMPLES_PER_WINDOW);
        let window = buf.take_window(clock.now_ms()).expect("window ready");
        assert_eq!(window.heart_rate_bpm, 72.5);
        assert_eq!(window.spo2_percent, 97);
    }
}
