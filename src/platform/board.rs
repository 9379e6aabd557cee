// SkWatch - Xiao ESP32-C3 Board Parts
//
// SSD1306 OLED over the shared I2C bus, power key on GPIO, light sleep via
// ESP-IDF. The board has no touch controller and no PMIC.

use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

use crate::config::*;
use crate::drivers::imu::SharedBus;
use crate::drivers::{DisplayDriver, Gui, PowerChip, PowerStatus, SleepControl, TouchPanel};
use crate::events::Signals;
use crate::isr;

// SSD1306 command stream prefix and commands.
const OLED_CMD: u8 = 0x00;
const OLED_DISPLAY_OFF: u8 = 0xAE;
const OLED_DISPLAY_ON: u8 = 0xAF;
const OLED_SET_CONTRAST: u8 = 0x81;
const OLED_CONTRAST_DIM: u8 = 0x00;
const OLED_CONTRAST_NORMAL: u8 = 0xCF;

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

/// OLED panel. Contrast stands in for the backlight; the panel keeps its
/// own frame buffer, so there is no refresh tick to stop.
pub struct Ssd1306Panel {
    bus: SharedBus,
}

impl Ssd1306Panel {
    pub fn new(bus: SharedBus) -> Self {
        Self { bus }
    }

    fn command(&self, bytes: &[u8]) -> anyhow::Result<()> {
        let mut bus = self.bus.lock().unwrap_or_else(PoisonError::into_inner);
        let mut frame = [0u8; 3];
        frame[0] = OLED_CMD;
        frame[1..=bytes.len()].copy_from_slice(bytes);
        bus.write(I2C_ADDR_OLED, &frame[..=bytes.len()], I2C_TIMEOUT_TICKS)?;
        Ok(())
    }

    fn contrast(&self, level: u8) {
        if let Err(e) = self.command(&[OLED_SET_CONTRAST, level]) {
            log::warn!("OLED contrast write failed: {:#}", e);
        }
    }
}

impl DisplayDriver for Ssd1306Panel {
    fn stop_tick(&mut self) {}

    fn start_tick(&mut self) {}

    fn backlight_off(&mut self) {
        self.contrast(OLED_CONTRAST_DIM);
    }

    fn backlight_on(&mut self) {
        self.contrast(OLED_CONTRAST_NORMAL);
    }

    fn display_sleep(&mut self) -> anyhow::Result<()> {
        self.command(&[OLED_DISPLAY_OFF])
    }

    fn display_wakeup(&mut self) -> anyhow::Result<()> {
        self.command(&[OLED_DISPLAY_ON])
    }
}

// ---------------------------------------------------------------------------
// Touch
// ---------------------------------------------------------------------------

pub struct NoTouch;

impl TouchPanel for NoTouch {
    fn set_low_power(&mut self, _low_power: bool) -> anyhow::Result<()> {
        Ok(())
    }

    fn allow_wakeup(&mut self, _allow: bool) -> anyhow::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Power key
// ---------------------------------------------------------------------------

/// The user button wired as the power key (active LOW).
pub struct ButtonPowerKey {
    last: PowerStatus,
}

impl ButtonPowerKey {
    pub fn new() -> Self {
        Self {
            last: PowerStatus::default(),
        }
    }
}

impl Default for ButtonPowerKey {
    fn default() -> Self {
        Self::new()
    }
}

impl PowerChip for ButtonPowerKey {
    fn read_and_acknowledge_interrupt(&mut self) -> bool {
        // Edge interrupt: nothing latched, just sample the key.
        let pressed = unsafe { esp_idf_sys::gpio_get_level(PIN_BUTTON) } == 0;
        self.last = PowerStatus {
            key_short_press: pressed,
            ..PowerStatus::default()
        };
        true
    }

    fn interrupt_status(&self) -> PowerStatus {
        self.last
    }
}

// ---------------------------------------------------------------------------
// GUI activity
// ---------------------------------------------------------------------------

/// Activity source for builds without the widget layer: the screen stays on
/// for one timeout after every wake.
pub struct IdleGui {
    last_activity: Instant,
}

impl IdleGui {
    pub fn new() -> Self {
        Self {
            last_activity: Instant::now(),
        }
    }
}

impl Default for IdleGui {
    fn default() -> Self {
        Self::new()
    }
}

impl Gui for IdleGui {
    fn inactive_time(&self) -> Duration {
        self.last_activity.elapsed()
    }

    fn transfer_pending(&self) -> bool {
        false
    }

    fn run_tasks(&mut self) -> Duration {
        IDLE_SLICE_MAX
    }

    fn trigger_activity(&mut self) {
        self.last_activity = Instant::now();
    }
}

// ---------------------------------------------------------------------------
// Light sleep
// ---------------------------------------------------------------------------

/// Light sleep, woken by the timer or by the IMU / power key lines.
///
/// Level wakeup also switches the pins to level interrupts, and the IMU line
/// stays high until its status is read from task context. The pin
/// interrupts are masked for the whole low-power period; the lines are
/// sampled after every sleep instead.
pub struct LightSleep {
    signals: Arc<Signals>,
    gpio_armed: bool,
}

impl LightSleep {
    pub fn new(signals: Arc<Signals>) -> Self {
        Self {
            signals,
            gpio_armed: false,
        }
    }

    fn arm_gpio_wakeup(&mut self) -> anyhow::Result<()> {
        if self.gpio_armed {
            return Ok(());
        }
        unsafe {
            check(esp_idf_sys::gpio_intr_disable(PIN_IMU_INT))?;
            check(esp_idf_sys::gpio_intr_disable(PIN_BUTTON))?;
            // Masked from here on, even if arming fails below.
            self.gpio_armed = true;
            check(esp_idf_sys::gpio_wakeup_enable(
                PIN_IMU_INT,
                esp_idf_sys::gpio_int_type_t_GPIO_INTR_HIGH_LEVEL,
            ))?;
            check(esp_idf_sys::gpio_wakeup_enable(
                PIN_BUTTON,
                esp_idf_sys::gpio_int_type_t_GPIO_INTR_LOW_LEVEL,
            ))?;
            check(esp_idf_sys::esp_sleep_enable_gpio_wakeup())?;
        }
        Ok(())
    }

    fn sample_wake_lines(&self) {
        let (motion_line, power_key) = unsafe {
            (
                esp_idf_sys::gpio_get_level(PIN_IMU_INT) == 1,
                esp_idf_sys::gpio_get_level(PIN_BUTTON) == 0,
            )
        };
        isr::on_gpio_wakeup(&self.signals, motion_line, power_key);
    }
}

fn check(rc: esp_idf_sys::esp_err_t) -> anyhow::Result<()> {
    if rc == esp_idf_sys::ESP_OK {
        Ok(())
    } else {
        anyhow::bail!("esp_err {}", rc)
    }
}

impl SleepControl for LightSleep {
    fn light_sleep(&mut self, max: Duration) -> anyhow::Result<()> {
        self.arm_gpio_wakeup()?;
        let micros = u64::try_from(max.as_micros()).unwrap_or(u64::MAX);
        unsafe {
            check(esp_idf_sys::esp_sleep_enable_timer_wakeup(micros))?;
            check(esp_idf_sys::esp_light_sleep_start())?;
        }
        self.sample_wake_lines();
        Ok(())
    }

    fn resume(&mut self) {
        if !self.gpio_armed {
            return;
        }
        // Back to edge interrupts, unmasked only after the wake drain.
        unsafe {
            esp_idf_sys::gpio_wakeup_disable(PIN_IMU_INT);
            esp_idf_sys::gpio_wakeup_disable(PIN_BUTTON);
            esp_idf_sys::gpio_set_intr_type(
                PIN_IMU_INT,
                esp_idf_sys::gpio_int_type_t_GPIO_INTR_POSEDGE,
            );
            esp_idf_sys::gpio_set_intr_type(
                PIN_BUTTON,
                esp_idf_sys::gpio_int_type_t_GPIO_INTR_NEGEDGE,
            );
            esp_idf_sys::gpio_intr_enable(PIN_IMU_INT);
            esp_idf_sys::gpio_intr_enable(PIN_BUTTON);
        }
        self.gpio_armed = false;
    }
}
