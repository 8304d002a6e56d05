// Cardiac Node — Beat LED
//
// Onboard GPIO LED.  Pulsed on every detected beat; blinks forever when the
// node cannot start.

use std::thread;
use std::time::Duration;

use esp_idf_hal::gpio::{AnyOutputPin, Output, PinDriver};

use crate::sensor::BeatIndicator;

const FAIL_BLINK_MS: u64 = 100;

pub struct BeatLed {
    pin: PinDriver<'static, AnyOutputPin, Output>,
}

impl BeatLed {
    pub fn new(pin: PinDriver<'static, AnyOutputPin, Output>) -> Self {
        Self { pin }
    }

    /// Fast blink, never returns.  Signals a fatal boot error.
    pub fn fail_loop(&mut self) -> ! {
        loop {
            let _ = self.pin.set_high();
            thread::sleep(Duration::from_millis(FAIL_BLINK_MS));
            let _ = self.pin.set_low();
            thread::sleep(Duration::from_millis(FAIL_BLINK_MS));
        }
    }
}

impl BeatIndicator for BeatLed {
    fn set(&mut self, on: bool) {
        let _ = if on {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };
    }
}
