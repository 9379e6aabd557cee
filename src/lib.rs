// SkWatch - Runtime Core
//
// Interrupt bridging, deferred work, the async dispatcher, the power/sleep
// state machine and the Wi-Fi connection manager of the SkWatch firmware.
// Hardware is reached only through the traits in `drivers`, `wifi` and
// `settings`; `platform` binds them on the ESP32-C3.

pub mod app;
pub mod config;
pub mod drivers;
pub mod error;
pub mod events;
pub mod isr;
pub mod power;
pub mod settings;
pub mod sim;
pub mod tasks;
pub mod telemetry;
pub mod wifi;

#[cfg(target_os = "espidf")]
pub mod platform;

pub use error::{Error, Result};
