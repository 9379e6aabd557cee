// SkWatch - ESP32-C3 Platform Binding
//
// Binds the runtime's hardware traits to ESP-IDF: GPIO interrupts, light
// sleep, NVS, the Wi-Fi driver and the I2C peripherals.

use core::ffi::c_void;
use std::sync::Arc;

use esp_idf_sys as sys;

use crate::config::*;
use crate::events::Signals;
use crate::isr;

pub mod board;
pub mod nvs;
pub mod wifi;

pub use board::{ButtonPowerKey, IdleGui, LightSleep, NoTouch, Ssd1306Panel};
pub use nvs::NvsStore;
pub use wifi::{bridge_radio_events, EspRadio, RadioEventBridge};

// ---------------------------------------------------------------------------
// GPIO interrupt handlers
// ---------------------------------------------------------------------------

unsafe extern "C" fn motion_isr(arg: *mut c_void) {
    // SAFETY: `arg` is the `Signals` pointer leaked in `install_interrupts`.
    let signals = unsafe { &*(arg as *const Signals) };
    isr::on_motion_interrupt(signals);
}

unsafe extern "C" fn power_key_isr(arg: *mut c_void) {
    // SAFETY: as above.
    let signals = unsafe { &*(arg as *const Signals) };
    isr::on_power_interrupt(signals);
}

fn esp_check(rc: sys::esp_err_t, what: &str) -> anyhow::Result<()> {
    if rc == sys::ESP_OK {
        Ok(())
    } else {
        anyhow::bail!("{} failed ({})", what, rc)
    }
}

/// Route the IMU INT line and the power key to the interrupt entry points.
/// The `Signals` handed in is kept alive for the rest of the program.
pub fn install_interrupts(signals: &Arc<Signals>) -> anyhow::Result<()> {
    let arg = Arc::into_raw(Arc::clone(signals)) as *mut c_void;

    unsafe {
        esp_check(sys::gpio_install_isr_service(0), "gpio_install_isr_service")?;

        // IMU INT: active high.
        esp_check(
            sys::gpio_set_direction(PIN_IMU_INT, sys::gpio_mode_t_GPIO_MODE_INPUT),
            "imu int direction",
        )?;
        esp_check(
            sys::gpio_set_intr_type(PIN_IMU_INT, sys::gpio_int_type_t_GPIO_INTR_POSEDGE),
            "imu int type",
        )?;
        esp_check(
            sys::gpio_isr_handler_add(PIN_IMU_INT, Some(motion_isr), arg),
            "imu int handler",
        )?;

        // Power key: pull-up, active low.
        esp_check(
            sys::gpio_set_direction(PIN_BUTTON, sys::gpio_mode_t_GPIO_MODE_INPUT),
            "button direction",
        )?;
        esp_check(
            sys::gpio_set_pull_mode(PIN_BUTTON, sys::gpio_pull_mode_t_GPIO_PULLUP_ONLY),
            "button pull-up",
        )?;
        esp_check(
            sys::gpio_set_intr_type(PIN_BUTTON, sys::gpio_int_type_t_GPIO_INTR_NEGEDGE),
            "button int type",
        )?;
        esp_check(
            sys::gpio_isr_handler_add(PIN_BUTTON, Some(power_key_isr), arg),
            "button handler",
        )?;
    }

    log::info!(
        "Interrupts installed (IMU GPIO{}, power key GPIO{})",
        PIN_IMU_INT,
        PIN_BUTTON
    );
    Ok(())
}
