// SkWatch - Hardware Collaborators
//
// The runtime core only talks to hardware through these traits. The device
// build binds them in `platform`, the host build and the tests use `sim`.

use std::time::Duration;

pub mod haptic;
#[cfg(target_os = "espidf")]
pub mod imu;

/// Display panel, backlight and the GUI refresh tick.
pub trait DisplayDriver: Send {
    fn stop_tick(&mut self);
    fn start_tick(&mut self);
    fn backlight_off(&mut self);
    fn backlight_on(&mut self);
    fn display_sleep(&mut self) -> anyhow::Result<()>;
    fn display_wakeup(&mut self) -> anyhow::Result<()>;
}

pub trait TouchPanel: Send {
    /// Switch the controller between its monitor (low power) and active scan modes.
    fn set_low_power(&mut self, low_power: bool) -> anyhow::Result<()>;
    /// Let a touch raise the interrupt line while the device sleeps.
    fn allow_wakeup(&mut self, allow: bool) -> anyhow::Result<()>;
}

/// Wake sources a motion sensor can be armed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeSource {
    DoubleTap,
    Tilt,
}

/// What the last acknowledged motion interrupt was about.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MotionStatus {
    pub step_counter: bool,
    pub double_tap: bool,
    pub tilt: bool,
}

pub trait MotionSensor: Send {
    /// Read the interrupt status register, clearing the latch. Returns `true`
    /// once the line has been released; callers poll until it does.
    fn read_and_acknowledge_interrupt(&mut self) -> bool;
    /// Status captured by the last acknowledged read.
    fn interrupt_status(&self) -> MotionStatus;
    fn enable_wake_source(&mut self, source: WakeSource, enable: bool) -> anyhow::Result<()>;
    fn enable_step_counter_interrupt(&mut self, enable: bool) -> anyhow::Result<()>;
    fn step_count(&self) -> u32;
}

/// What the last acknowledged power chip interrupt was about.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PowerStatus {
    pub vbus_plugged: bool,
    pub vbus_removed: bool,
    pub charge_done: bool,
    pub key_short_press: bool,
}

pub trait PowerChip: Send {
    fn read_and_acknowledge_interrupt(&mut self) -> bool;
    fn interrupt_status(&self) -> PowerStatus;
}

/// The widget layer, seen only as an activity source and a cooperative task.
pub trait Gui: Send {
    /// Time since the last user interaction.
    fn inactive_time(&self) -> Duration;
    /// A data transfer the user is waiting on keeps the screen awake.
    fn transfer_pending(&self) -> bool;
    /// Run pending GUI work; returns how long until it next needs to run.
    fn run_tasks(&mut self) -> Duration;
    /// Restart the inactivity timer.
    fn trigger_activity(&mut self);
}

/// Chip-level low-power control.
pub trait SleepControl: Send {
    /// Light sleep for at most `max`, or until a wake-capable GPIO fires.
    fn light_sleep(&mut self, max: Duration) -> anyhow::Result<()>;
    /// Restore full clock speed after light sleep.
    fn resume(&mut self);
}

/// Vibration motor, on or off.
pub trait Motor: Send {
    fn set(&mut self, on: bool) -> anyhow::Result<()>;
}

/// Hardware owned by the power state machine.
pub struct Board {
    pub display: Box<dyn DisplayDriver>,
    pub touch: Box<dyn TouchPanel>,
    pub motion: Box<dyn MotionSensor>,
    pub power_chip: Box<dyn PowerChip>,
    pub gui: Box<dyn Gui>,
    pub sleep: Box<dyn SleepControl>,
}
