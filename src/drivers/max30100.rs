// Cardiac Node — MAX30100 Pulse Oximeter Driver
//
// Register-level driver over I2C.  The FIFO is drained on every `update` and
// each IR/red pair is fed through the `PulseTracker` signal path.

use esp_idf_hal::i2c::I2cDriver;

use crate::config::*;
use crate::error::SensorError;
use crate::sensor::pulse::PulseTracker;
use crate::sensor::PulseOximeter;

// MAX30100 register addresses
const REG_FIFO_WR_PTR: u8 = 0x02;
const REG_OVF_COUNTER: u8 = 0x03;
const REG_FIFO_RD_PTR: u8 = 0x04;
const REG_FIFO_DATA: u8 = 0x05;
const REG_MODE_CONFIG: u8 = 0x06;
const REG_SPO2_CONFIG: u8 = 0x07;
const REG_LED_CONFIG: u8 = 0x09;
const REG_PART_ID: u8 = 0xFF;
const PART_ID_EXPECTED: u8 = 0x11;

const MODE_RESET: u8 = 0x40;
const MODE_SPO2: u8 = 0x03;
// Hi-res ADC, 100 samples/s, 1600 us pulse width (16-bit).
const SPO2_CONFIG: u8 = 0x40 | (0x01 << 2) | 0x03;
// Red 27.1 mA, IR 50 mA.
const LED_CONFIG: u8 = (0x08 << 4) | 0x0F;

const FIFO_DEPTH: usize = 16;
const BYTES_PER_SAMPLE: usize = 4;
const SAMPLE_PERIOD_MS: u64 = 10;

pub struct Max30100 {
    bus: I2cDriver<'static>,
    tracker: PulseTracker,
    // Sample timestamps are derived from the FIFO rate, not the wall clock.
    sample_clock_ms: u64,
}

impl Max30100 {
    pub fn new(bus: I2cDriver<'static>) -> Self {
        Self {
            bus,
            tracker: PulseTracker::default(),
            sample_clock_ms: 0,
        }
    }

    fn write_reg(&mut self, reg: u8, value: u8) -> Result<(), SensorError> {
        self.bus
            .write(I2C_ADDR_MAX30100, &[reg, value], I2C_TIMEOUT_TICKS)
            .map_err(|e| SensorError::Bus(e.to_string()))
    }

    fn read_regs(&mut self, reg: u8, buf: &mut [u8]) -> Result<(), SensorError> {
        self.bus
            .write_read(I2C_ADDR_MAX30100, &[reg], buf, I2C_TIMEOUT_TICKS)
            .map_err(|e| SensorError::Bus(e.to_string()))
    }

    fn read_reg(&mut self, reg: u8) -> Result<u8, SensorError> {
        let mut buf = [0u8; 1];
        self.read_regs(reg, &mut buf)?;
        Ok(buf[0])
    }

    /// Number of unread samples in the FIFO.
    fn fifo_available(&mut self) -> Result<usize, SensorError> {
        let wr = self.read_reg(REG_FIFO_WR_PTR)?;
        let rd = self.read_reg(REG_FIFO_RD_PTR)?;
        let ovf = self.read_reg(REG_OVF_COUNTER)?;
        if ovf > 0 {
            return Ok(FIFO_DEPTH);
        }
        Ok(usize::from(wr.wrapping_sub(rd) & 0x0F))
    }

    fn drain_fifo(&mut self) -> Result<u32, SensorError> {
        let available = self.fifo_available()?;
        if available == 0 {
            return Ok(0);
        }

        let mut raw = [0u8; FIFO_DEPTH * BYTES_PER_SAMPLE];
        let len = available * BYTES_PER_SAMPLE;
        self.read_regs(REG_FIFO_DATA, &mut raw[..len])?;

        let mut beats = 0;
        for sample in raw[..len].chunks_exact(BYTES_PER_SAMPLE) {
            let ir = u16::from_be_bytes([sample[0], sample[1]]);
            let red = u16::from_be_bytes([sample[2], sample[3]]);
            self.sample_clock_ms += SAMPLE_PERIOD_MS;
            if self.tracker.push(ir, red, self.sample_clock_ms) {
                beats += 1;
            }
        }
        Ok(beats)
    }
}

impl PulseOximeter for Max30100 {
    /// Reset the part and configure SpO2 mode (IR + red).
    fn init(&mut self) -> Result<(), SensorError> {
        let part_id = self.read_reg(REG_PART_ID)?;
        if part_id != PART_ID_EXPECTED {
            return Err(SensorError::NotDetected(part_id));
        }

        self.write_reg(REG_MODE_CONFIG, MODE_RESET)?;
        std::thread::sleep(std::time::Duration::from_millis(10));

        self.write_reg(REG_MODE_CONFIG, MODE_SPO2)?;
        self.write_reg(REG_SPO2_CONFIG, SPO2_CONFIG)?;
        self.write_reg(REG_LED_CONFIG, LED_CONFIG)?;

        // Start from an empty FIFO.
        self.write_reg(REG_FIFO_WR_PTR, 0)?;
        self.write_reg(REG_OVF_COUNTER, 0)?;
        self.write_reg(REG_FIFO_RD_PTR, 0)?;

        self.tracker.reset();
        log::info!("MAX30100 initialised (SpO2 mode, 100 sps, IR 50mA)");
        Ok(())
    }

    fn update(&mut self) -> u32 {
        match self.drain_fifo() {
            Ok(beats) => beats,
            Err(e) => {
                // A dead bus shows up as a beat stall; the window buffer
                // handles recovery.
                log::debug!("MAX30100 read failed: {}", e);
                0
            }
        }
    }

    fn heart_rate(&self) -> f32 {
        self.tracker.heart_rate()
    }

    fn spo2(&self) -> u8 {
        self.tracker.spo2()
    }
}
