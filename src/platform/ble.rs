// Cardiac Node — BLE GATT Server
//
// Bluedroid GATT server exposing the provisioning and cardiac services.
// Stack callbacks run on the Bluedroid task and only ever touch the
// `ProvisioningInbox`; everything else goes through the `Radio` impl on the
// main loop.
//
// Attribute table construction is event driven: each service is created,
// then its characteristics are added one at a time (plus a CCCD for the ones
// that notify), then the next service.  Advertising starts once the table is
// complete and the advertising data has been accepted.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use esp_idf_svc::bt::ble::gap::{AdvConfiguration, BleGapEvent, EspBleGap};
use esp_idf_svc::bt::ble::gatt::server::{ConnectionId, EspGatts, GattsEvent};
use esp_idf_svc::bt::ble::gatt::{
    AutoResponse, GattCharacteristic, GattDescriptor, GattId, GattInterface, GattServiceId,
    GattStatus, Handle, Permission, Property,
};
use esp_idf_svc::bt::{Ble, BtDriver, BtStatus, BtUuid};
use esp_idf_sys::EspError;

use crate::config::*;
use crate::events::{AdvertisingMode, Characteristic};
use crate::provision::{ProvisioningInbox, Radio};

type Gap = EspBleGap<'static, Ble, Arc<BtDriver<'static, Ble>>>;
type Gatts = EspGatts<'static, Ble, Arc<BtDriver<'static, Ble>>>;

const APP_ID: u16 = 0;
const CCCD_UUID: u16 = 0x2902;
const CHAR_MAX_LEN: usize = 128;
const PROV_SERVICE_HANDLES: u8 = 16;
const CARDIAC_SERVICE_HANDLES: u8 = 20;

fn notifies(characteristic: Characteristic) -> bool {
    !characteristic.is_writable()
}

#[derive(Default)]
struct GattState {
    gatt_if: Option<GattInterface>,
    conn_id: Option<ConnectionId>,
    service: Option<Handle>,
    pending_services: VecDeque<u128>,
    pending_chars: VecDeque<Characteristic>,
    handles: HashMap<Handle, Characteristic>,
    attrs: HashMap<Characteristic, Handle>,
    // Values set before their attribute existed.
    early_values: HashMap<Characteristic, Vec<u8>>,
    table_ready: bool,
    adv_configured: bool,
    advertising: Option<AdvertisingMode>,
}

struct Server {
    gap: Gap,
    gatts: Gatts,
    inbox: Arc<ProvisioningInbox>,
    state: Mutex<GattState>,
}

impl Server {
    fn lock(&self) -> std::sync::MutexGuard<'_, GattState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_gap_event(&self, event: BleGapEvent) -> Result<(), EspError> {
        if let BleGapEvent::AdvertisingConfigured(status) = event {
            if status != BtStatus::Success {
                log::warn!("Advertising data rejected: {:?}", status);
                return Ok(());
            }
            let mut state = self.lock();
            state.adv_configured = true;
            self.try_advertise(&state);
        }
        Ok(())
    }

    fn on_gatts_event(&self, gatt_if: GattInterface, event: GattsEvent) -> Result<(), EspError> {
        match event {
            GattsEvent::ServiceRegistered { status, app_id } => {
                if !check(status) || app_id != APP_ID {
                    return Ok(());
                }
                self.gap.set_device_name(BLE_DEVICE_NAME)?;
                self.gap.set_adv_conf(&AdvConfiguration {
                    include_name: true,
                    include_txpower: true,
                    flag: 2,
                    service_uuid: Some(BtUuid::uuid128(BLE_PROV_SERVICE_UUID)),
                    ..Default::default()
                })?;

                let mut state = self.lock();
                state.gatt_if = Some(gatt_if);
                state.pending_services =
                    VecDeque::from([BLE_PROV_SERVICE_UUID, BLE_CARDIAC_SERVICE_UUID]);
                self.create_next_service(&mut state)?;
            }
            GattsEvent::ServiceCreated {
                status,
                service_handle,
                service_id,
                ..
            } => {
                if !check(status) {
                    return Ok(());
                }
                self.gatts.start_service(service_handle)?;
                let mut state = self.lock();
                state.service = Some(service_handle);
                state.pending_chars = Characteristic::ALL
                    .into_iter()
                    .filter(|c| BtUuid::uuid128(c.service_uuid()) == service_id.id.uuid)
                    .collect();
                self.add_next(&mut state)?;
            }
            GattsEvent::CharacteristicAdded {
                status,
                attr_handle,
                service_handle,
                char_uuid,
            } => {
                if !check(status) {
                    return Ok(());
                }
                let mut state = self.lock();
                let added = Characteristic::ALL
                    .into_iter()
                    .find(|c| BtUuid::uuid128(c.uuid()) == char_uuid);
                match added {
                    Some(characteristic) => {
                        state.handles.insert(attr_handle, characteristic);
                        state.attrs.insert(characteristic, attr_handle);
                        if let Some(value) = state.early_values.remove(&characteristic) {
                            self.gatts.set_attr(attr_handle, &value)?;
                        }
                        if notifies(characteristic) {
                            self.gatts.add_descriptor(
                                service_handle,
                                &GattDescriptor {
                                    uuid: BtUuid::uuid16(CCCD_UUID),
                                    permissions: Permission::Read | Permission::Write,
                                },
                            )?;
                            return Ok(());
                        }
                        self.add_next(&mut state)?;
                    }
                    None => {
                        log::warn!("Unknown characteristic {:?} added", char_uuid);
                        self.add_next(&mut state)?;
                    }
                }
            }
            GattsEvent::DescriptorAdded { status, .. } => {
                if check(status) {
                    let mut state = self.lock();
                    self.add_next(&mut state)?;
                }
            }
            GattsEvent::PeerConnected { conn_id, .. } => {
                self.lock().conn_id = Some(conn_id);
                self.inbox.on_client_connected();
            }
            GattsEvent::PeerDisconnected { .. } => {
                let mut state = self.lock();
                state.conn_id = None;
                // The stack stops advertising on connect; resume it.
                self.try_advertise(&state);
                drop(state);
                self.inbox.on_client_disconnected();
            }
            GattsEvent::Write { handle, value, .. } => {
                let characteristic = self.lock().handles.get(&handle).copied();
                match characteristic {
                    Some(c) if c.is_writable() => self.inbox.on_write(c, value),
                    // CCCD writes are handled by the stack.
                    _ => {}
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn create_next_service(&self, state: &mut GattState) -> Result<(), EspError> {
        let (Some(uuid), Some(gatt_if)) = (state.pending_services.pop_front(), state.gatt_if)
        else {
            state.table_ready = true;
            log::info!("GATT table complete");
            self.try_advertise(state);
            return Ok(());
        };
        let handles = if uuid == BLE_PROV_SERVICE_UUID {
            PROV_SERVICE_HANDLES
        } else {
            CARDIAC_SERVICE_HANDLES
        };
        self.gatts.create_service(
            gatt_if,
            &GattServiceId {
                id: GattId {
                    uuid: BtUuid::uuid128(uuid),
                    inst_id: 0,
                },
                is_primary: true,
            },
            handles,
        )
    }

    fn add_next(&self, state: &mut GattState) -> Result<(), EspError> {
        let (Some(characteristic), Some(service)) = (state.pending_chars.pop_front(), state.service)
        else {
            return self.create_next_service(state);
        };

        let properties = if characteristic.is_writable() {
            Property::Write.into()
        } else if characteristic.is_readable() {
            Property::Read | Property::Notify
        } else {
            Property::Notify.into()
        };
        let permissions = if characteristic.is_writable() {
            Permission::Write.into()
        } else {
            Permission::Read.into()
        };

        self.gatts.add_characteristic(
            service,
            &GattCharacteristic {
                uuid: BtUuid::uuid128(characteristic.uuid()),
                permissions,
                properties,
                max_len: CHAR_MAX_LEN,
                auto_rsp: AutoResponse::ByGatt,
            },
            &[],
        )?;
        Ok(())
    }

    fn try_advertise(&self, state: &GattState) {
        if !state.table_ready || !state.adv_configured || state.conn_id.is_some() {
            return;
        }
        if let Some(mode) = state.advertising {
            start_advertising(mode);
        }
    }
}

fn check(status: GattStatus) -> bool {
    if status != GattStatus::Ok {
        log::warn!("GATT operation failed: {:?}", status);
        return false;
    }
    true
}

fn start_advertising(mode: AdvertisingMode) {
    let (min, max) = mode.interval();
    let mut params = esp_idf_sys::esp_ble_adv_params_t {
        adv_int_min: min,
        adv_int_max: max,
        adv_type: esp_idf_sys::esp_ble_adv_type_t_ADV_TYPE_IND,
        own_addr_type: esp_idf_sys::esp_ble_addr_type_t_BLE_ADDR_TYPE_PUBLIC,
        channel_map: esp_idf_sys::esp_ble_adv_channel_t_ADV_CHNL_ALL,
        adv_filter_policy: esp_idf_sys::esp_ble_adv_filter_t_ADV_FILTER_ALLOW_SCAN_ANY_CON_ANY,
        ..Default::default()
    };
    // SAFETY: Bluedroid copies the parameters before returning.
    unsafe {
        esp_idf_sys::esp_ble_gap_stop_advertising();
        let err = esp_idf_sys::esp_ble_gap_start_advertising(&mut params);
        if err != esp_idf_sys::ESP_OK {
            log::warn!("Advertising start failed: {}", err);
        }
    }
}

/// `Radio` backed by the Bluedroid GATT server.
pub struct EspRadio {
    server: Arc<Server>,
}

impl EspRadio {
    /// Register the GATT application.  The attribute table is built
    /// asynchronously; writes before it exists are replayed.
    pub fn new(
        driver: Arc<BtDriver<'static, Ble>>,
        inbox: Arc<ProvisioningInbox>,
    ) -> anyhow::Result<Self> {
        let server = Arc::new(Server {
            gap: EspBleGap::new(Arc::clone(&driver))?,
            gatts: EspGatts::new(driver)?,
            inbox,
            state: Mutex::new(GattState::default()),
        });

        let gap_server = Arc::clone(&server);
        server.gap.subscribe(move |event| {
            if let Err(e) = gap_server.on_gap_event(event) {
                log::warn!("GAP event handling failed: {}", e);
            }
        })?;

        let gatts_server = Arc::clone(&server);
        server.gatts.subscribe(move |(gatt_if, event)| {
            if let Err(e) = gatts_server.on_gatts_event(gatt_if, event) {
                log::warn!("GATTS event handling failed: {}", e);
            }
        })?;

        server.gatts.register_app(APP_ID)?;
        log::info!("BLE GATT server registering as '{}'", BLE_DEVICE_NAME);
        Ok(Self { server })
    }
}

impl Radio for EspRadio {
    fn set_value(&mut self, characteristic: Characteristic, value: &[u8]) {
        let mut state = self.server.lock();
        match state.attrs.get(&characteristic).copied() {
            Some(handle) => {
                if let Err(e) = self.server.gatts.set_attr(handle, value) {
                    log::debug!("set_attr {:?} failed: {}", characteristic, e);
                }
            }
            None => {
                state.early_values.insert(characteristic, value.to_vec());
            }
        }
    }

    fn notify(&mut self, characteristic: Characteristic, value: &[u8]) {
        self.set_value(characteristic, value);

        let state = self.server.lock();
        let (Some(gatt_if), Some(conn_id), Some(handle)) = (
            state.gatt_if,
            state.conn_id,
            state.attrs.get(&characteristic).copied(),
        ) else {
            return;
        };
        if let Err(e) = self.server.gatts.notify(gatt_if, conn_id, handle, value) {
            log::debug!("notify {:?} failed: {}", characteristic, e);
        }
    }

    fn set_advertising(&mut self, mode: AdvertisingMode) {
        let mut state = self.server.lock();
        state.advertising = Some(mode);
        self.server.try_advertise(&state);
    }
}
