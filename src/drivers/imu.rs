// SkWatch - MPU6050 Motion Interrupt Driver
//
// Register-level driver over the shared I2C bus. The MPU6050 only has a
// motion-detect interrupt, so tilt and double-tap wake both use it with
// different thresholds. It has no step counter.

use std::sync::{Mutex, PoisonError};

use esp_idf_hal::i2c::I2cDriver;

use crate::config::*;
use crate::drivers::{MotionSensor, MotionStatus, WakeSource};

/// Thread-safe handle to a shared I2C bus.
pub type SharedBus = &'static Mutex<I2cDriver<'static>>;

// MPU6050 register addresses
const REG_MOT_THR: u8 = 0x1F;
const REG_MOT_DUR: u8 = 0x20;
const REG_INT_PIN_CFG: u8 = 0x37;
const REG_INT_ENABLE: u8 = 0x38;
const REG_INT_STATUS: u8 = 0x3A;
const REG_PWR_MGMT_1: u8 = 0x6B;
const REG_WHO_AM_I: u8 = 0x75;
const WHO_AM_I_EXPECTED: u8 = 0x68;

const INT_MOT: u8 = 1 << 6;
// Active high, push-pull, latched until INT_STATUS is read.
const INT_PIN_LATCHED: u8 = 1 << 5;

// Motion threshold in 2 mg steps; a tap is a sharp spike, a tilt a slow swing.
const TILT_THRESHOLD: u8 = 20;
const TAP_THRESHOLD: u8 = 96;

pub struct Mpu6050 {
    bus: SharedBus,
    double_tap: bool,
    tilt: bool,
    last: MotionStatus,
}

impl Mpu6050 {
    pub fn new(bus: SharedBus) -> Self {
        Self {
            bus,
            double_tap: false,
            tilt: false,
            last: MotionStatus::default(),
        }
    }

    /// Verify the device is reachable on the I2C bus.
    pub fn is_connected(&self) -> bool {
        let mut buf = [0u8; 1];
        self.read(REG_WHO_AM_I, &mut buf).is_ok() && buf[0] == WHO_AM_I_EXPECTED
    }

    /// Wake the sensor and route its interrupt to the INT pin.
    pub fn init(&self) -> anyhow::Result<()> {
        self.write(REG_PWR_MGMT_1, 0x00)?;
        self.write(REG_INT_PIN_CFG, INT_PIN_LATCHED)?;
        self.write(REG_INT_ENABLE, 0x00)?;
        log::info!("MPU6050 initialised (motion interrupt, latched)");
        Ok(())
    }

    fn apply_interrupts(&self) -> anyhow::Result<()> {
        if !(self.double_tap || self.tilt) {
            return self.write(REG_INT_ENABLE, 0x00);
        }
        let threshold = if self.tilt { TILT_THRESHOLD } else { TAP_THRESHOLD };
        self.write(REG_MOT_THR, threshold)?;
        self.write(REG_MOT_DUR, 1)?;
        self.write(REG_INT_ENABLE, INT_MOT)
    }

    fn write(&self, reg: u8, value: u8) -> anyhow::Result<()> {
        let mut bus = self.bus.lock().unwrap_or_else(PoisonError::into_inner);
        bus.write(I2C_ADDR_MPU6050, &[reg, value], I2C_TIMEOUT_TICKS)?;
        Ok(())
    }

    fn read(&self, reg: u8, buf: &mut [u8]) -> anyhow::Result<()> {
        let mut bus = self.bus.lock().unwrap_or_else(PoisonError::into_inner);
        bus.write_read(I2C_ADDR_MPU6050, &[reg], buf, I2C_TIMEOUT_TICKS)?;
        Ok(())
    }
}

impl MotionSensor for Mpu6050 {
    fn read_and_acknowledge_interrupt(&mut self) -> bool {
        // Reading INT_STATUS releases the latched line.
        let mut status = [0u8; 1];
        if let Err(e) = self.read(REG_INT_STATUS, &mut status) {
            log::debug!("MPU6050 INT_STATUS read failed: {:#}", e);
            return false;
        }
        let motion = status[0] & INT_MOT != 0;
        self.last = MotionStatus {
            step_counter: false,
            double_tap: motion && self.double_tap && !self.tilt,
            tilt: motion && self.tilt,
        };
        true
    }

    fn interrupt_status(&self) -> MotionStatus {
        self.last
    }

    fn enable_wake_source(&mut self, source: WakeSource, enable: bool) -> anyhow::Result<()> {
        match source {
            WakeSource::DoubleTap => self.double_tap = enable,
            WakeSource::Tilt => self.tilt = enable,
        }
        self.apply_interrupts()
    }

    fn enable_step_counter_interrupt(&mut self, _enable: bool) -> anyhow::Result<()> {
        Ok(())
    }

    fn step_count(&self) -> u32 {
        0
    }
}
