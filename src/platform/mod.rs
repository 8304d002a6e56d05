// Cardiac Node — ESP-IDF platform bindings
//
// Binds every collaborator trait to its ESP-IDF implementation and hands the
// assembled parts to `Node`.

pub mod ble;
pub mod http;
pub mod nvs;
pub mod sntp;
pub mod wifi;

use std::sync::Arc;

use esp_idf_hal::adc::oneshot::config::AdcChannelConfig;
use esp_idf_hal::adc::oneshot::{AdcChannelDriver, AdcDriver};
use esp_idf_hal::adc::attenuation::DB_11;
use esp_idf_hal::gpio::{InputPin, OutputPin, PinDriver};
use esp_idf_hal::i2c::{I2cConfig, I2cDriver};
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_hal::prelude::*;
use esp_idf_svc::bt::{Ble, BtDriver};
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::EspWifi;

use crate::clock::SystemClock;
use crate::config::*;
use crate::drivers::ecg::Ad8232;
use crate::drivers::led::BeatLed;
use crate::drivers::max30100::Max30100;
use crate::node::{NodeParts, Platform};
use crate::provision::ProvisioningInbox;
use crate::telemetry::TelemetryDispatcher;

use self::ble::EspRadio;
use self::http::HttpTransport;
use self::nvs::NvsStore;
use self::sntp::SntpTime;
use self::wifi::EspLink;

pub struct EspPlatform;

impl Platform for EspPlatform {
    type Clock = SystemClock;
    type Oximeter = Max30100;
    type Ecg = Ad8232;
    type Indicator = BeatLed;
    type Link = EspLink;
    type Time = SntpTime;
    type Radio = EspRadio;
    type Store = NvsStore;
}

/// Take the peripherals and bring up every driver and service.  Sensor
/// probing is left to `Node::begin`.
pub fn build_parts(peripherals: Peripherals) -> anyhow::Result<NodeParts<EspPlatform>> {
    let sysloop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let clock = SystemClock::new();

    // ---- Sensors ----------------------------------------------------------
    let i2c_config = I2cConfig::new().baudrate(I2C_BAUDRATE_HZ.Hz());
    let i2c = I2cDriver::new(
        peripherals.i2c0,
        peripherals.pins.gpio21, // SDA
        peripherals.pins.gpio22, // SCL
        &i2c_config,
    )?;
    let oximeter = Max30100::new(i2c);

    let adc = AdcDriver::new(peripherals.adc1)?;
    let ecg_channel = AdcChannelDriver::new(
        adc,
        peripherals.pins.gpio34,
        &AdcChannelConfig {
            attenuation: DB_11,
            ..Default::default()
        },
    )?;
    let lo_plus = PinDriver::input(peripherals.pins.gpio32.downgrade_input())?;
    let lo_minus = PinDriver::input(peripherals.pins.gpio33.downgrade_input())?;
    let ecg = Ad8232::new(ecg_channel, lo_plus, lo_minus);

    let led_pin = PinDriver::output(peripherals.pins.gpio2.downgrade_output())?;
    let indicator = BeatLed::new(led_pin);
    log::info!(
        "MAX30100 on SDA {} / SCL {}, AD8232 on GPIO{} (LO+ {}, LO- {}), LED on GPIO{}",
        PIN_I2C_SDA,
        PIN_I2C_SCL,
        PIN_ECG_OUTPUT,
        PIN_ECG_LO_PLUS,
        PIN_ECG_LO_MINUS,
        PIN_BEAT_LED
    );

    // ---- Radio (Wi-Fi + BLE share the modem) -------------------------------
    let (wifi_modem, bt_modem) = peripherals.modem.split();
    let wifi = EspWifi::new(wifi_modem, sysloop, Some(nvs_partition.clone()))?;
    let link = EspLink::new(wifi)?;

    let inbox = Arc::new(ProvisioningInbox::new());
    let bt = Arc::new(BtDriver::<Ble>::new(bt_modem, Some(nvs_partition.clone()))?);
    let radio = EspRadio::new(bt, Arc::clone(&inbox))?;

    let store = NvsStore::new(nvs_partition)?;

    // ---- Dispatch task ----------------------------------------------------
    let dispatcher =
        TelemetryDispatcher::spawn(HttpTransport::new(), clock, DispatchConfig::default())?;

    Ok(NodeParts {
        clock,
        oximeter,
        ecg,
        indicator,
        link,
        time: SntpTime::default(),
        radio,
        inbox,
        store,
        dispatcher,
    })
}
