// Cardiac Node — AD8232 ECG Front-End
//
// Analog output on an ADC1 pin, plus the two lead-off comparator outputs.

use esp_idf_hal::adc::oneshot::{AdcChannelDriver, AdcDriver};
use esp_idf_hal::adc::ADC1;
use esp_idf_hal::gpio::{AnyInputPin, Gpio34, Input, PinDriver};

use crate::sensor::EcgFrontEnd;

pub type EcgChannel = AdcChannelDriver<'static, Gpio34, AdcDriver<'static, ADC1>>;

pub struct Ad8232 {
    adc: EcgChannel,
    lo_plus: PinDriver<'static, AnyInputPin, Input>,
    lo_minus: PinDriver<'static, AnyInputPin, Input>,
}

impl Ad8232 {
    pub fn new(
        adc: EcgChannel,
        lo_plus: PinDriver<'static, AnyInputPin, Input>,
        lo_minus: PinDriver<'static, AnyInputPin, Input>,
    ) -> Self {
        Self {
            adc,
            lo_plus,
            lo_minus,
        }
    }
}

impl EcgFrontEnd for Ad8232 {
    fn leads_off(&mut self) -> bool {
        self.lo_plus.is_high() || self.lo_minus.is_high()
    }

    fn read_raw(&mut self) -> u16 {
        match self.adc.read_raw() {
            Ok(raw) => raw,
            Err(e) => {
                log::debug!("ECG ADC read failed: {}", e);
                0
            }
        }
    }
}
