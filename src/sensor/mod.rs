// Cardiac Node — Sensors
//
// Sensor acquisition: collaborator traits and the windowing buffer.
//
// The register-level drivers live in `crate::drivers` (device builds) and in
// `crate::sim` (host builds); the window logic only sees these traits.

pub mod pulse;
pub mod window;

use crate::error::SensorError;

pub use window::{SampleWindow, WindowBuffer};

/// Pulse oximeter capability (MAX30100 on the device).
pub trait PulseOximeter {
    /// Probe and configure the sensor.  Called once at boot and again by
    /// stall recovery.
    fn init(&mut self) -> Result<(), SensorError>;

    /// Service the sensor FIFO.  Returns how many beats were detected since
    /// the previous call; must be called as often as possible.
    fn update(&mut self) -> u32;

    /// Latest heart-rate estimate in bpm, 0.0 when unknown.
    fn heart_rate(&self) -> f32;

    /// Latest SpO2 estimate in percent, 0 when unknown.
    fn spo2(&self) -> u8;
}

/// Single-lead ECG front-end (AD8232 on the device).
pub trait EcgFrontEnd {
    /// True when either lead-off sense line is asserted.
    fn leads_off(&mut self) -> bool;

    /// One raw 12-bit ADC sample.
    fn read_raw(&mut self) -> u16;
}

/// Visual beat indicator (the onboard LED).
pub trait BeatIndicator {
    fn set(&mut self, on: bool);
}
