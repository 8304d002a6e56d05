// Cardiac Node — Pulse Oximeter Signal Path
//
// Turns raw IR / red photodiode readings into beat events, a heart-rate
// average and an SpO2 estimate.  Runs at the oximeter's FIFO rate (100 Hz)
// inside the MAX30100 adapter; kept free of I/O so it can be tested on the
// host.

/// First-order DC blocker (high-pass, ~0.5 Hz at 100 Hz).
#[derive(Debug, Clone, Copy)]
pub struct DcRemover {
    alpha: f32,
    dcw: f32,
}

impl DcRemover {
    pub const DEFAULT_ALPHA: f32 = 0.95;

    pub fn new(alpha: f32) -> Self {
        Self { alpha, dcw: 0.0 }
    }

    /// Feed one raw sample, get back its AC component.
    pub fn step(&mut self, x: f32) -> f32 {
        let old = self.dcw;
        self.dcw = x + self.alpha * self.dcw;
        self.dcw - old
    }

    /// Current DC level estimate.
    pub fn dc(&self) -> f32 {
        self.dcw * (1.0 - self.alpha)
    }

    pub fn reset(&mut self) {
        self.dcw = 0.0;
    }
}

impl Default for DcRemover {
    fn default() -> Self {
        Self::new(Self::DEFAULT_ALPHA)
    }
}

const MIN_THRESHOLD: f32 = 20.0;
const THRESHOLD_DECAY: f32 = 0.99;
const PEAK_FALL_RATIO: f32 = 0.5;
const NEXT_THRESHOLD_RATIO: f32 = 0.6;
const REFRACTORY_MS: u64 = 300; // 200 bpm ceiling
const INVALID_READOUT_MS: u64 = 2500;
const SETTLE_MS: u64 = 2000;
const BPM_AVERAGE_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DetectorState {
    Settling,
    Waiting,
    FollowingPeak,
}

/// Peak detector on the (negated) IR AC component.
#[derive(Debug, Clone)]
pub struct BeatDetector {
    state: DetectorState,
    started_ms: Option<u64>,
    threshold: f32,
    peak: f32,
    last_beat_ms: Option<u64>,
    periods: heapless::Deque<u64, BPM_AVERAGE_LEN>,
}

impl Default for BeatDetector {
    fn default() -> Self {
        Self {
            state: DetectorState::Settling,
            started_ms: None,
            threshold: MIN_THRESHOLD,
            peak: 0.0,
            last_beat_ms: None,
            periods: heapless::Deque::new(),
        }
    }
}

impl BeatDetector {
    /// Returns true when `x` completes a beat.
    pub fn add_sample(&mut self, x: f32, now_ms: u64) -> bool {
        let started = *self.started_ms.get_or_insert(now_ms);
        self.threshold = (self.threshold * THRESHOLD_DECAY).max(MIN_THRESHOLD);

        if let Some(last) = self.last_beat_ms {
            if now_ms.saturating_sub(last) > INVALID_READOUT_MS {
                self.periods.clear();
                self.last_beat_ms = None;
            }
        }

        match self.state {
            DetectorState::Settling => {
                if now_ms.saturating_sub(started) >= SETTLE_MS {
                    self.state = DetectorState::Waiting;
                }
                false
            }
            DetectorState::Waiting => {
                if x > self.threshold {
                    self.peak = x;
                    self.state = DetectorState::FollowingPeak;
                }
                false
            }
            DetectorState::FollowingPeak => {
                if x > self.peak {
                    self.peak = x;
                    return false;
                }
                if x > self.peak * PEAK_FALL_RATIO {
                    return false;
                }
                self.state = DetectorState::Waiting;
                self.threshold = (self.peak * NEXT_THRESHOLD_RATIO).max(MIN_THRESHOLD);
                self.register_beat(now_ms)
            }
        }
    }

    fn register_beat(&mut self, now_ms: u64) -> bool {
        match self.last_beat_ms {
            Some(last) if now_ms.saturating_sub(last) < REFRACTORY_MS => false,
            Some(last) => {
                if self.periods.is_full() {
                    self.periods.pop_front();
                }
                let _ = self.periods.push_back(now_ms - last);
                self.last_beat_ms = Some(now_ms);
                true
            }
            None => {
                self.last_beat_ms = Some(now_ms);
                true
            }
        }
    }

    /// Average over the last few beat periods, 0.0 until two beats are seen.
    pub fn rate_bpm(&self) -> f32 {
        if self.periods.is_empty() {
            return 0.0;
        }
        let total: u64 = self.periods.iter().sum();
        let mean = total as f32 / self.periods.len() as f32;
        60_000.0 / mean
    }
}

/// Ratio-of-ratios SpO2 estimator, evaluated once per beat.
#[derive(Debug, Clone, Default)]
pub struct Spo2Estimator {
    ir_sq_sum: f32,
    red_sq_sum: f32,
    samples: u32,
    spo2: u8,
}

impl Spo2Estimator {
    pub fn add_sample(&mut self, ir_ac: f32, red_ac: f32) {
        self.ir_sq_sum += ir_ac * ir_ac;
        self.red_sq_sum += red_ac * red_ac;
        self.samples += 1;
    }

    pub fn on_beat(&mut self, ir_dc: f32, red_dc: f32) {
        if self.samples > 0 && ir_dc > 0.0 && red_dc > 0.0 && self.ir_sq_sum > 0.0 {
            let n = self.samples as f32;
            let ir_rms = (self.ir_sq_sum / n).sqrt();
            let red_rms = (self.red_sq_sum / n).sqrt();
            let ratio = (red_rms / red_dc) / (ir_rms / ir_dc);
            self.spo2 = (110.0 - 25.0 * ratio).round().clamp(0.0, 100.0) as u8;
        }
        self.reset_sums();
    }

    fn reset_sums(&mut self) {
        self.ir_sq_sum = 0.0;
        self.red_sq_sum = 0.0;
        self.samples = 0;
    }

    pub fn spo2(&self) -> u8 {
        self.spo2
    }

    pub fn reset(&mut self) {
        self.reset_sums();
        self.spo2 = 0;
    }
}

/// Complete per-sample pipeline used by the MAX30100 adapter.
#[derive(Debug, Clone, Default)]
pub struct PulseTracker {
    ir_dc: DcRemover,
    red_dc: DcRemover,
    detector: BeatDetector,
    spo2: Spo2Estimator,
    last_beat_ms: Option<u64>,
}

impl PulseTracker {
    /// Returns true when this reading completes a beat.
    pub fn push(&mut self, ir: u16, red: u16, now_ms: u64) -> bool {
        let ir_ac = self.ir_dc.step(f32::from(ir));
        let red_ac = self.red_dc.step(f32::from(red));
        self.spo2.add_sample(ir_ac, red_ac);

        // Blood volume peaks absorb more IR, so pulses are dips in the
        // reflected signal.
        let beat = self.detector.add_sample(-ir_ac, now_ms);
        if beat {
            self.spo2.on_beat(self.ir_dc.dc(), self.red_dc.dc());
            self.last_beat_ms = Some(now_ms);
        } else if self
            .last_beat_ms
            .is_some_and(|t| now_ms.saturating_sub(t) > INVALID_READOUT_MS)
        {
            self.spo2.reset();
            self.last_beat_ms = None;
        }
        beat
    }

    pub fn heart_rate(&self) -> f32 {
        self.detector.rate_bpm()
    }

    pub fn spo2(&self) -> u8 {
        self.spo2.spo2()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
