// Cardiac Node — Library Root
//
// Cardiac telemetry node firmware.
//
// Acquires 10 s ECG + pulse-oximetry windows, keeps a Wi-Fi link and wall
// clock alive, accepts credentials over BLE and hands each completed window
// to a background worker that uploads it to the risk predictor.
//
// Everything outside `platform` and `drivers` builds and tests on the host;
// those two modules bind the collaborator traits to ESP-IDF.

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod net;
pub mod node;
pub mod provision;
pub mod sensor;
pub mod sim;
pub mod tasks;
pub mod telemetry;

#[cfg(target_os = "espidf")]
pub mod drivers;
#[cfg(target_os = "espidf")]
pub mod platform;

pub use node::{Node, NodeConfig, NodeParts, Platform};
