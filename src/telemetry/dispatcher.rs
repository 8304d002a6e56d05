// Cardiac Node — Telemetry Dispatcher
//
// Owns the bounded job queue and the background "dispatch" thread.  The main
// loop only ever calls `enqueue` (never blocks) and `poll_result` (never
// blocks); all network I/O and retry sleeps happen on the worker.

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::clock::Clock;
use crate::config::DispatchConfig;
use crate::error::TransportError;
use crate::sensor::SampleWindow;
use crate::tasks::dispatch::dispatch_task;
use crate::telemetry::payload::Prediction;
use crate::telemetry::slot::ResultSlot;

/// Status line and body of one HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// "Deliver bytes, get status" network collaborator.  Runs on the worker
/// thread; per-request timeouts are the implementation's job.
pub trait Transport: Send {
    /// False when there is no route to the predictor right now.
    fn is_ready(&self) -> bool {
        true
    }

    fn post(&mut self, body: &[u8]) -> Result<HttpResponse, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }

    fn post(&mut self, body: &[u8]) -> Result<HttpResponse, TransportError> {
        (**self).post(body)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Ok,
    HttpError(u16),
    NetworkError,
    PayloadError,
    NotReady,
}

impl DispatchOutcome {
    /// Outcomes that end the retry loop early.
    pub fn is_final(self) -> bool {
        matches!(self, Self::Ok | Self::PayloadError | Self::NotReady)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResult {
    pub outcome: DispatchOutcome,
    pub prediction: Option<Prediction>,
    /// Transport attempts made, 0 when the payload could not be built.
    pub attempts: u32,
}

#[derive(Debug, Clone)]
pub struct DispatchJob {
    pub window: SampleWindow,
    pub device_id: String,
    pub timestamp: i64,
}

/// Counters shared between the worker and the main loop.
#[derive(Debug, Default)]
pub struct DispatchStats {
    success: AtomicU32,
    failure: AtomicU32,
    last_http_status: AtomicU16,
    completed: AtomicU32,
    busy: AtomicBool,
}

impl DispatchStats {
    pub(crate) fn record_attempt(&self, outcome: DispatchOutcome) {
        match outcome {
            DispatchOutcome::Ok => {
                self.success.fetch_add(1, Ordering::Relaxed);
            }
            DispatchOutcome::NotReady => {}
            _ => {
                self.failure.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub(crate) fn record_http_status(&self, status: u16) {
        self.last_http_status.store(status, Ordering::Relaxed);
    }

    pub(crate) fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::Release);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            success: self.success.load(Ordering::Relaxed),
            failure: self.failure.load(Ordering::Relaxed),
            last_http_status: match self.last_http_status.load(Ordering::Relaxed) {
                0 => None,
                status => Some(status),
            },
            completed: self.completed.load(Ordering::Relaxed),
            busy: self.busy.load(Ordering::Acquire),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub success: u32,
    pub failure: u32,
    pub last_http_status: Option<u16>,
    /// Jobs finished, whatever their outcome.
    pub completed: u32,
    pub busy: bool,
}

pub struct TelemetryDispatcher {
    jobs: Option<SyncSender<DispatchJob>>,
    results: ResultSlot<DispatchResult>,
    stats: Arc<DispatchStats>,
    worker: Option<JoinHandle<()>>,
}

impl TelemetryDispatcher {
    /// Start the worker thread.
    pub fn spawn<T, C>(transport: T, clock: C, config: DispatchConfig) -> std::io::Result<Self>
    where
        T: Transport + 'static,
        C: Clock + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(config.queue_depth);
        let results = ResultSlot::new();
        let stats = Arc::new(DispatchStats::default());

        let worker_results = results.clone();
        let worker_stats = Arc::clone(&stats);
        let worker = thread::Builder::new()
            .name("dispatch".into())
            .stack_size(config.stack_size)
            .spawn(move || {
                dispatch_task(rx, transport, clock, config, worker_results, worker_stats);
            })?;

        Ok(Self {
            jobs: Some(tx),
            results,
            stats,
            worker: Some(worker),
        })
    }

    /// Non-blocking.  Returns false and drops the window when the queue is
    /// full; already-queued jobs are untouched.
    pub fn enqueue(&self, window: SampleWindow, device_id: &str, timestamp: i64) -> bool {
        let Some(jobs) = self.jobs.as_ref() else {
            return false;
        };
        let job = DispatchJob {
            window,
            device_id: device_id.to_owned(),
            timestamp,
        };
        match jobs.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::warn!("Dispatch queue full, window dropped");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                log::error!("Dispatch task gone, window dropped");
                false
            }
        }
    }

    /// Latest finished result, if one arrived since the last poll.
    pub fn poll_result(&self) -> Option<DispatchResult> {
        self.results.take()
    }

    pub fn is_busy(&self) -> bool {
        self.stats.snapshot().busy
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Close the queue and wait for the worker to finish what is queued.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Dispatch task panicked");
            }
        }
    }
}

impl Drop for TelemetryDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
