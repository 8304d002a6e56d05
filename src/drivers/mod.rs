// Register- and pin-level drivers for the on-board parts.  Each implements one
// of the collaborator traits from `crate::sensor`.

pub mod ecg;
pub mod led;
pub mod max30100;
