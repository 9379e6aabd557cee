use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::*;
use crate::drivers::{Board, PowerStatus, WakeSource};
use crate::events::*;
use crate::power::{PowerCallback, PowerConfig, PowerEvent, PowerState, WakeReason};
use crate::settings::{HardwareSettings, SettingsStore};
use crate::wifi::{WifiConnectionState, WifiStateHandle};

/// Owns the board and runs the cooperative main loop, one `poll` at a time.
pub struct PowerManager {
    signals: Arc<Signals>,
    board: Board,
    store: SettingsStore,
    settings: HardwareSettings,
    config: PowerConfig,
    wifi: WifiStateHandle,

    state: PowerState,
    callbacks: Vec<PowerCallback>,
    next_wait: Duration,
    // Chosen at low-power entry: light sleep only with the radio off.
    light_sleep: bool,
}

impl PowerManager {
    pub fn new(
        signals: Arc<Signals>,
        board: Board,
        store: SettingsStore,
        wifi: WifiStateHandle,
    ) -> Self {
        let settings: HardwareSettings = store.load(SETTINGS_KEY_HARDWARE);
        let config = PowerConfig::from_settings(&settings);
        let mut manager = Self {
            signals,
            board,
            store,
            settings,
            config,
            wifi,
            state: PowerState::Active,
            callbacks: Vec::new(),
            next_wait: config.queue_wait,
            light_sleep: false,
        };
        manager.arm_awake_sensors();
        log::info!(
            "Power manager ready (screen timeout {} s)",
            manager.settings.screen_timeout_secs
        );
        manager
    }

    /// Override the timings, including the persisted screen timeout.
    pub fn with_config(mut self, config: PowerConfig) -> Self {
        self.next_wait = config.queue_wait;
        self.config = config;
        self
    }

    /// Append an observer. Observers run in registration order.
    pub fn register_callback(&mut self, callback: impl FnMut(&PowerEvent) + Send + 'static) {
        self.callbacks.push(Box::new(callback));
    }

    pub fn state(&self) -> PowerState {
        self.state
    }

    pub fn config(&self) -> &PowerConfig {
        &self.config
    }

    pub fn settings(&self) -> &HardwareSettings {
        &self.settings
    }

    // -----------------------------------------------------------------------
    // Main loop iteration
    // -----------------------------------------------------------------------

    /// One main loop iteration. The deferred queue wait is the only
    /// suspension point while awake; a trip through low power blocks until
    /// the device wakes again.
    pub fn poll(&mut self) {
        if self.signals.isr.intersects(SLEEP_EXIT | IRQ_BITS) {
            // An interrupt raced the last wake sequence.
            let bits = self.drain_wake_irqs();
            log::debug!("Cleared stale wake flags {:#x}", bits);
        }

        if self.signals.app.clear(APP_SLEEP_REQUEST) & APP_SLEEP_REQUEST != 0 {
            self.sleep();
            return;
        }

        let dropped = self.signals.queue.take_dropped();
        if dropped > 0 {
            log::debug!("Deferred queue full, dropped {} events", dropped);
        }

        if let Some(event) = self.signals.queue.pop_wait(self.next_wait) {
            if self.handle_deferred(event) {
                self.sleep();
                return;
            }
        }

        let gui = &mut self.board.gui;
        if gui.inactive_time() < self.config.screen_timeout || gui.transfer_pending() {
            self.next_wait = gui
                .run_tasks()
                .max(self.config.queue_wait)
                .min(self.config.idle_slice_max);
        } else {
            self.sleep();
        }
    }

    /// Go through a whole low-power period: enter, wait, wake.
    pub fn sleep(&mut self) -> WakeReason {
        self.enter_low_power();
        self.wait_for_wake();
        self.leave_low_power()
    }

    /// Returns `true` when the event asks for low power.
    fn handle_deferred(&mut self, event: DeferredEvent) -> bool {
        match event {
            DeferredEvent::MotionInterrupt => {
                let motion = &mut self.board.motion;
                drain("motion", || motion.read_and_acknowledge_interrupt());
                let status = self.board.motion.interrupt_status();
                if status.step_counter {
                    let steps = self.board.motion.step_count();
                    self.notify(PowerEvent::StepCounterUpdated(steps));
                }
                if status.double_tap {
                    self.notify(PowerEvent::DoubleTapDetected);
                }
                false
            }
            DeferredEvent::PowerInterrupt => {
                let chip = &mut self.board.power_chip;
                drain("power", || chip.read_and_acknowledge_interrupt());
                let status = self.board.power_chip.interrupt_status();
                self.notify_charging(status);
                status.key_short_press
            }
        }
    }

    fn notify_charging(&mut self, status: PowerStatus) {
        if status.vbus_plugged {
            self.notify(PowerEvent::ChargingStarted);
        }
        if status.vbus_removed {
            self.notify(PowerEvent::ChargingStopped);
        }
        if status.charge_done {
            self.notify(PowerEvent::ChargingDone);
        }
    }

    // -----------------------------------------------------------------------
    // Low power
    // -----------------------------------------------------------------------

    pub fn enter_low_power(&mut self) {
        log::info!("Entering low power");
        self.state = PowerState::EnteringLowPower;
        self.signals.isr.set(SLEEP_MODE);
        self.signals.app.set(APP_LOW_POWER);
        self.notify(PowerEvent::EnterLowPower);

        let display = &mut self.board.display;
        display.stop_tick();
        display.backlight_off();
        if let Err(e) = display.display_sleep() {
            log::warn!("Display sleep failed: {:#}", e);
        }
        best_effort("touch low power", self.board.touch.set_low_power(true));
        best_effort(
            "touch wakeup",
            self.board.touch.allow_wakeup(self.settings.touch_wakeup),
        );

        let motion = &mut self.board.motion;
        best_effort("step interrupt", motion.enable_step_counter_interrupt(false));
        best_effort(
            "double tap wakeup",
            motion.enable_wake_source(WakeSource::DoubleTap, self.settings.double_tap_wakeup),
        );
        best_effort(
            "tilt wakeup",
            motion.enable_wake_source(WakeSource::Tilt, self.settings.tilt_wakeup),
        );

        self.light_sleep = self.wifi.get() == WifiConnectionState::Off;
        if self.light_sleep {
            log::info!("Radio off, using light sleep");
        } else {
            log::info!("Radio on, staying in modem sleep");
        }
        self.state = PowerState::LowPower;
    }

    /// Sleep in coarse increments until an interrupt or the application asks
    /// to wake. There is no timeout.
    pub fn wait_for_wake(&mut self) {
        let start = Instant::now();
        let tick = self.config.low_power_tick.max(Duration::from_millis(1));
        let mut next_tick = tick;

        while !self.signals.isr.contains(SLEEP_EXIT)
            && !self.signals.app.contains(APP_WAKE_REQUEST)
        {
            let poll = self.config.low_power_poll;
            if self.light_sleep {
                if let Err(e) = self.board.sleep.light_sleep(poll) {
                    log::warn!("Light sleep failed: {:#}", e);
                    thread::sleep(poll);
                }
            } else {
                thread::sleep(poll);
            }

            let elapsed = start.elapsed();
            if elapsed >= next_tick {
                let elapsed_ms = u32::try_from(elapsed.as_millis()).unwrap_or(u32::MAX);
                self.notify(PowerEvent::LowPowerTick { elapsed_ms });
                while next_tick <= elapsed {
                    next_tick += tick;
                }
            }
        }
    }

    pub fn leave_low_power(&mut self) -> WakeReason {
        self.state = PowerState::LeavingLowPower;
        let bits = self.drain_wake_irqs();
        self.signals.isr.clear(SLEEP_MODE);
        self.signals.app.clear(APP_WAKE_REQUEST | APP_LOW_POWER);

        let reason = wake_reason(bits);
        log::info!("Waking up: {:?} (flags {:#x})", reason, bits);

        if self.light_sleep {
            self.board.sleep.resume();
            self.light_sleep = false;
        }

        let display = &mut self.board.display;
        if let Err(e) = display.display_wakeup() {
            log::warn!("Display wakeup failed: {:#}", e);
        }
        display.backlight_on();
        display.start_tick();
        best_effort("touch active", self.board.touch.set_low_power(false));

        // Double tap is reported as an event while awake.
        best_effort(
            "double tap",
            self.board.motion.enable_wake_source(WakeSource::DoubleTap, true),
        );
        self.board.gui.trigger_activity();

        self.notify(PowerEvent::LeaveLowPower(reason));
        if bits & POWER_IRQ != 0 {
            // A charger plugged in while asleep wakes through the same line.
            let status = self.board.power_chip.interrupt_status();
            self.notify_charging(status);
        }
        best_effort(
            "step interrupt",
            self.board.motion.enable_step_counter_interrupt(true),
        );

        self.next_wait = self.config.queue_wait;
        self.state = PowerState::Active;
        reason
    }

    /// Acknowledge every latched wake interrupt at the sensor, then clear its
    /// bit and `SLEEP_EXIT`. Returns all bits seen.
    fn drain_wake_irqs(&mut self) -> FlagBits {
        let mut seen = 0;
        for _ in 0..IRQ_DRAIN_ATTEMPTS {
            let bits = self.signals.isr.get() & (IRQ_BITS | SLEEP_EXIT);
            if bits == 0 {
                break;
            }
            if bits & MOTION_IRQ != 0 {
                let motion = &mut self.board.motion;
                drain("motion", || motion.read_and_acknowledge_interrupt());
            }
            if bits & POWER_IRQ != 0 {
                let chip = &mut self.board.power_chip;
                drain("power", || chip.read_and_acknowledge_interrupt());
            }
            self.signals.isr.clear(bits);
            seen |= bits;
        }
        seen
    }

    fn arm_awake_sensors(&mut self) {
        let motion = &mut self.board.motion;
        best_effort("double tap", motion.enable_wake_source(WakeSource::DoubleTap, true));
        best_effort(
            "tilt wakeup",
            motion.enable_wake_source(WakeSource::Tilt, self.settings.tilt_wakeup),
        );
        best_effort("step interrupt", motion.enable_step_counter_interrupt(true));
    }

    fn notify(&mut self, event: PowerEvent) {
        for callback in self.callbacks.iter_mut() {
            callback(&event);
        }
    }

    // -----------------------------------------------------------------------
    // Preferences
    // -----------------------------------------------------------------------

    /// Takes effect at the next low-power entry; double tap stays armed
    /// while awake.
    pub fn set_double_tap_wakeup(&mut self, enable: bool) {
        self.settings.double_tap_wakeup = enable;
        self.persist();
    }

    pub fn set_tilt_wakeup(&mut self, enable: bool) {
        self.settings.tilt_wakeup = enable;
        best_effort(
            "tilt wakeup",
            self.board.motion.enable_wake_source(WakeSource::Tilt, enable),
        );
        self.persist();
    }

    pub fn set_touch_wakeup(&mut self, enable: bool) {
        self.settings.touch_wakeup = enable;
        self.persist();
    }

    pub fn set_screen_timeout(&mut self, secs: u32) {
        self.settings.screen_timeout_secs = secs;
        self.config.screen_timeout = Duration::from_secs(u64::from(secs));
        self.persist();
    }

    fn persist(&self) {
        if let Err(e) = self.store.save(SETTINGS_KEY_HARDWARE, &self.settings) {
            log::warn!("Hardware settings not saved: {:#}", e);
        }
    }
}

/// Wake reason from the flags seen on wake. Several IRQ bits can be set at
/// once; the first match wins.
fn wake_reason(bits: FlagBits) -> WakeReason {
    if bits & MOTION_IRQ != 0 {
        WakeReason::Accelerometer
    } else if bits & POWER_IRQ != 0 {
        WakeReason::PowerButton
    } else if bits & TOUCH_IRQ != 0 {
        WakeReason::Touch
    } else {
        WakeReason::Timeout
    }
}

/// Poll a latched interrupt until the sensor releases it.
fn drain(name: &str, mut acknowledge: impl FnMut() -> bool) -> bool {
    for _ in 0..IRQ_DRAIN_ATTEMPTS {
        if acknowledge() {
            return true;
        }
    }
    log::warn!(
        "{} interrupt still latched after {} reads",
        name,
        IRQ_DRAIN_ATTEMPTS
    );
    false
}

fn best_effort(what: &str, result: anyhow::Result<()>) {
    if let Err(e) = result {
        log::warn!("{} failed: {:#}", what, e);
    }
}
