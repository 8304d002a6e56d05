// Cardiac Node — Result Slot
//
// Single-element overwrite cell: the newest value wins, older unread values
// are discarded.

use std::sync::{Arc, Mutex, PoisonError};

pub struct ResultSlot<T> {
    inner: Arc<Mutex<Option<T>>>,
}

impl<T> ResultSlot<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
        }
    }

    /// Store `value`, returning true if an unread value was overwritten.
    pub fn publish(&self, value: T) -> bool {
        let mut slot = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        slot.replace(value).is_some()
    }

    /// Take the latest value, if any.  Never blocks on the producer for
    /// longer than the swap.
    pub fn take(&self) -> Option<T> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn is_empty(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl<T> Clone for ResultSlot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for ResultSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_value_wins() {
        let slot = ResultSlot::new();
        assert!(!slot.publish(1));
        assert!(slot.publish(2));
        assert!(slot.publish(3));
        assert_eq!(slot.take(), Some(3));
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn clones_share_the_cell() {
        let producer: ResultSlot<&str> = ResultSlot::new();
        let consumer = producer.clone();
        std::thread::spawn(move || {
            producer.publish("done");
        })
        .join()
        .expect("producer");
        assert_eq!(consumer.take(), Some("done"));
        assert!(consumer.is_empty());
    }
}
