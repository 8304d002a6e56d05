// Cardiac Node — Telemetry
//
// Asynchronous upload of completed windows to the predictor.

pub mod dispatcher;
pub mod payload;
pub mod slot;

pub use dispatcher::{
    DispatchOutcome, DispatchResult, HttpResponse, StatsSnapshot, TelemetryDispatcher, Transport,
};
pub use payload::Prediction;
pub use slot::ResultSlot;
