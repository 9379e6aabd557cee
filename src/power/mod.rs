// SkWatch - Power / Sleep State Machine
//
// Decides when the watch drops into low power and how it comes back, and
// fans every transition out to registered observers.

use std::time::Duration;

use crate::config::*;
use crate::settings::HardwareSettings;

mod manager;

pub use manager::PowerManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Active,
    EnteringLowPower,
    LowPower,
    LeavingLowPower,
}

/// Why the device left low power.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    Accelerometer,
    PowerButton,
    Touch,
    /// No interrupt: an application wake request.
    Timeout,
}

impl WakeReason {
    pub fn as_u32(self) -> u32 {
        match self {
            WakeReason::Accelerometer => 0,
            WakeReason::PowerButton => 1,
            WakeReason::Touch => 2,
            WakeReason::Timeout => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerEventCode {
    EnterLowPower,
    LeaveLowPower,
    LowPowerTick,
    ChargingStarted,
    ChargingStopped,
    ChargingDone,
    StepCounterUpdated,
    DoubleTapDetected,
}

/// A power transition, as delivered to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerEvent {
    EnterLowPower,
    LeaveLowPower(WakeReason),
    /// Milliseconds spent in low power so far.
    LowPowerTick { elapsed_ms: u32 },
    ChargingStarted,
    ChargingStopped,
    ChargingDone,
    StepCounterUpdated(u32),
    DoubleTapDetected,
}

impl PowerEvent {
    pub fn code(&self) -> PowerEventCode {
        match self {
            PowerEvent::EnterLowPower => PowerEventCode::EnterLowPower,
            PowerEvent::LeaveLowPower(_) => PowerEventCode::LeaveLowPower,
            PowerEvent::LowPowerTick { .. } => PowerEventCode::LowPowerTick,
            PowerEvent::ChargingStarted => PowerEventCode::ChargingStarted,
            PowerEvent::ChargingStopped => PowerEventCode::ChargingStopped,
            PowerEvent::ChargingDone => PowerEventCode::ChargingDone,
            PowerEvent::StepCounterUpdated(_) => PowerEventCode::StepCounterUpdated,
            PowerEvent::DoubleTapDetected => PowerEventCode::DoubleTapDetected,
        }
    }

    /// Numeric argument carried with the event; 0 when there is none.
    pub fn argument(&self) -> u32 {
        match self {
            PowerEvent::LeaveLowPower(reason) => reason.as_u32(),
            PowerEvent::LowPowerTick { elapsed_ms } => *elapsed_ms,
            PowerEvent::StepCounterUpdated(steps) => *steps,
            _ => 0,
        }
    }
}

/// Observer called synchronously, in registration order, on the main loop.
pub type PowerCallback = Box<dyn FnMut(&PowerEvent) + Send>;

/// Runtime timings for the power state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerConfig {
    /// Inactivity before the device drops into low power.
    pub screen_timeout: Duration,
    /// Sleep increment while in low power.
    pub low_power_poll: Duration,
    /// Cadence of `LowPowerTick`.
    pub low_power_tick: Duration,
    /// Shortest wait on the deferred queue per loop iteration.
    pub queue_wait: Duration,
    /// Longest wait on the deferred queue per loop iteration.
    pub idle_slice_max: Duration,
}

impl PowerConfig {
    pub fn from_settings(settings: &HardwareSettings) -> Self {
        Self {
            screen_timeout: Duration::from_secs(u64::from(settings.screen_timeout_secs)),
            ..Self::default()
        }
    }
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            screen_timeout: Duration::from_secs(u64::from(DEFAULT_SCREEN_TIMEOUT_SECS)),
            low_power_poll: LOW_POWER_POLL,
            low_power_tick: LOW_POWER_TICK,
            queue_wait: DEFERRED_QUEUE_WAIT,
            idle_slice_max: IDLE_SLICE_MAX,
        }
    }
}
