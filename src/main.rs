// Cardiac Node — Firmware Entry Point
//
// Boot sequence:
//   1. Initialise logging.
//   2. Bring up drivers, Wi-Fi, BLE, NVS and the dispatch task.
//   3. Probe the pulse oximeter (fatal if absent: LED blinks forever).
//   4. Pick the boot mode from stored credentials.
//   5. Run the main loop, yielding 1 ms per pass.
//
// Host builds run the same loop against the simulated platform.

use std::thread;
use std::time::Duration;

use cardiac_node::{Node, NodeConfig};

const LOOP_YIELD_MS: u64 = 1;

#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    use cardiac_node::platform;

    // Link esp-idf-sys runtime patches and initialise logging.
    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();
    log::info!("Cardiac node firmware starting...");

    let peripherals = esp_idf_hal::peripherals::Peripherals::take()?;
    let parts = platform::build_parts(peripherals)?;

    let mut node = Node::<platform::EspPlatform>::new(parts, NodeConfig::default());
    if let Err(e) = node.begin() {
        log::error!("FATAL: {}", e);
        node.sensors_mut().indicator_mut().fail_loop();
    }
    log::info!(
        "Boot complete as {}, entering main loop",
        node.connectivity().device_id()
    );

    loop {
        node.step();
        thread::sleep(Duration::from_millis(LOOP_YIELD_MS));
    }
}

#[cfg(not(target_os = "espidf"))]
fn main() -> anyhow::Result<()> {
    use std::sync::Arc;
    use std::time::{SystemTime, UNIX_EPOCH};

    use cardiac_node::clock::{Clock, SystemClock};
    use cardiac_node::config::DispatchConfig;
    use cardiac_node::net::Credentials;
    use cardiac_node::provision::{MemoryStore, ProvisioningInbox};
    use cardiac_node::sim::*;
    use cardiac_node::telemetry::TelemetryDispatcher;
    use cardiac_node::NodeParts;

    const SIM_BEAT_PERIOD_MS: u64 = 800;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("Cardiac node simulation starting...");

    let clock = SystemClock::new();
    let now_unix = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() as i64;

    let mut oximeter = SimOximeter::new();
    oximeter.set_vitals(75.0, 97);
    let mut link = SimWifi::new([0x24, 0x6F, 0x28, 0xAB, 0xCD, 0xEF]);
    link.set_auto_connect(true);

    let parts = NodeParts::<SimPlatform<SystemClock>> {
        clock,
        oximeter,
        ecg: SimEcg::new(),
        indicator: SimLed::default(),
        link,
        time: SimTime::syncing_to(now_unix),
        radio: SimRadio::default(),
        inbox: Arc::new(ProvisioningInbox::new()),
        store: MemoryStore::with_credentials(&Credentials::new("sim-network", "sim-password")),
        dispatcher: TelemetryDispatcher::spawn(
            SimTransport::new(),
            clock,
            DispatchConfig::default(),
        )?,
    };

    let mut node = Node::new(parts, NodeConfig::default());
    node.begin()?;
    log::info!("Simulating {}", node.connectivity().device_id());

    let mut last_beat_ms = 0;
    loop {
        let now = clock.now_ms();
        if now.saturating_sub(last_beat_ms) >= SIM_BEAT_PERIOD_MS {
            last_beat_ms = now;
            node.sensors_mut().oximeter_mut().queue_beats(1);
        }
        node.step();
        thread::sleep(Duration::from_millis(LOOP_YIELD_MS));
    }
}
