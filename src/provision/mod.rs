// Cardiac Node — BLE Provisioning
//
// BLE provisioning: event queue, credential storage, scan paging and the
// channel that ties them to the connectivity manager.

pub mod channel;
pub mod queue;
pub mod scan;
pub mod store;

pub use channel::{ProvisioningChannel, ProvisioningInbox, Radio};
pub use queue::EventQueue;
pub use scan::{ScanOutput, ScanPager, ScanState};
pub use store::{CredentialStore, MemoryStore};
