// Cardiac Node — Provisioning Event Queue
//
// Bounded channel from the BLE host callback context (and anything else that
// holds the inbox) to the main loop.  Producers never block: a full queue
// drops the new event.  Only the main loop takes the receiver lock.

use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError, TrySendError};
use std::sync::{Mutex, PoisonError};

use crate::config::BLE_EVENT_QUEUE_SIZE;
use crate::events::ProvisioningEvent;

pub struct EventQueue {
    tx: SyncSender<ProvisioningEvent>,
    rx: Mutex<Receiver<ProvisioningEvent>>,
    capacity: usize,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::sync_channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
            capacity,
        }
    }

    /// Never blocks.  Returns false and drops `event` when the queue is full;
    /// queued events are left untouched.
    pub fn push(&self, event: ProvisioningEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(dropped)) => {
                log::warn!("Provisioning event queue full, {:?} dropped", dropped);
                false
            }
            // Both ends live in `self`.
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    pub fn pop(&self) -> Option<ProvisioningEvent> {
        let rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        match rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Everything queued right now, oldest first.
    pub fn drain(&self) -> Vec<ProvisioningEvent> {
        let rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        rx.try_iter().collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new(BLE_EVENT_QUEUE_SIZE)
    }
}
