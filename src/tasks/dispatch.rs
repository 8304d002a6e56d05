// Cardiac Node — Dispatch Task
//
// Blocks on the job queue, serialises each window, POSTs it with a bounded
// retry loop and publishes the final result to the overwrite slot.  The only
// thread in the system allowed to block on the network or sleep between
// retries.

use std::sync::mpsc::Receiver;
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::DispatchConfig;
use crate::error::TransportError;
use crate::telemetry::dispatcher::{
    DispatchJob, DispatchOutcome, DispatchResult, DispatchStats, Transport,
};
use crate::telemetry::payload::{self, Prediction};
use crate::telemetry::slot::ResultSlot;

pub fn dispatch_task<T: Transport, C: Clock>(
    jobs: Receiver<DispatchJob>,
    mut transport: T,
    clock: C,
    config: DispatchConfig,
    results: ResultSlot<DispatchResult>,
    stats: Arc<DispatchStats>,
) {
    log::info!("Dispatch task started");

    loop {
        // Block until the main loop hands over a window.
        let job = match jobs.recv() {
            Ok(job) => job,
            Err(_) => {
                log::info!("Job channel closed, exiting dispatch task");
                return;
            }
        };

        stats.set_busy(true);
        let result = send_with_retry(&mut transport, &clock, &config, &job, &stats);

        if result.outcome != DispatchOutcome::Ok {
            let s = stats.snapshot();
            log::warn!(
                "Window dropped ({:?}). Stats: {} OK, {} FAIL",
                result.outcome,
                s.success,
                s.failure
            );
        }
        // Publish before counting so `completed` never runs ahead of the slot.
        results.publish(result);
        stats.record_completed();
        stats.set_busy(false);
    }
}

/// Up to `1 + max_retries` attempts; stops early on success, payload error
/// or not-ready.
pub fn send_with_retry<T: Transport + ?Sized, C: Clock + ?Sized>(
    transport: &mut T,
    clock: &C,
    config: &DispatchConfig,
    job: &DispatchJob,
    stats: &DispatchStats,
) -> DispatchResult {
    let body = match payload::encode_vitals(&job.window, &job.device_id, job.timestamp) {
        Ok(body) => body,
        Err(e) => {
            log::error!("Payload build failed: {}", e);
            stats.record_attempt(DispatchOutcome::PayloadError);
            return DispatchResult {
                outcome: DispatchOutcome::PayloadError,
                prediction: None,
                attempts: 0,
            };
        }
    };
    log::info!(
        "Payload: {} bytes, {} samples, {} beats",
        body.len(),
        job.window.sample_count(),
        job.window.beat_count()
    );

    let mut attempts = 0;
    loop {
        if attempts > 0 {
            log::info!("Retry {}/{}...", attempts, config.max_retries);
            clock.sleep_ms(config.retry_delay_ms);
        }
        attempts += 1;

        let (outcome, prediction) = send_once(transport, &body, stats);
        stats.record_attempt(outcome);

        if outcome.is_final() || attempts > config.max_retries {
            return DispatchResult {
                outcome,
                prediction,
                attempts,
            };
        }
    }
}

fn send_once<T: Transport + ?Sized>(
    transport: &mut T,
    body: &[u8],
    stats: &DispatchStats,
) -> (DispatchOutcome, Option<Prediction>) {
    if !transport.is_ready() {
        log::warn!("Network not ready, skipping POST");
        return (DispatchOutcome::NotReady, None);
    }

    match transport.post(body) {
        Err(TransportError::NotReady) => {
            log::warn!("Network not ready, skipping POST");
            (DispatchOutcome::NotReady, None)
        }
        Err(TransportError::Network(e)) => {
            log::warn!("POST failed: {}", e);
            (DispatchOutcome::NetworkError, None)
        }
        Ok(response) => {
            stats.record_http_status(response.status);
            log::info!("HTTP {}", response.status);
            match response.status {
                200 | 201 => {
                    let prediction = payload::parse_prediction(&response.body);
                    if let Some(p) = &prediction {
                        log::info!(
                            "Risk: {} (score={:.3}, conf={:.3})",
                            p.risk_label,
                            p.risk_score,
                            p.confidence
                        );
                    }
                    (DispatchOutcome::Ok, prediction)
                }
                status => {
                    log::warn!(
                        "Server error: {}",
                        String::from_utf8_lossy(&response.body)
                    );
                    (DispatchOutcome::HttpError(status), None)
                }
            }
        }
    }
}
