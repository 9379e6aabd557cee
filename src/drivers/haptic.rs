// SkWatch - Haptic Motor
//
// Simple GPIO-driven vibration motor. Vibrations block for their whole
// duration, so they are always run on the async dispatcher.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use crate::config::*;
use crate::drivers::Motor;
use crate::error::Result;
use crate::tasks::dispatcher::DispatcherHandle;

#[cfg(target_os = "espidf")]
pub use self::device::HapticDriver;

#[cfg(target_os = "espidf")]
mod device {
    use esp_idf_hal::gpio::{AnyOutputPin, Output, PinDriver};

    use crate::drivers::Motor;

    pub struct HapticDriver<'d> {
        pin: PinDriver<'d, AnyOutputPin, Output>,
    }

    impl<'d> HapticDriver<'d> {
        pub fn new(pin: PinDriver<'d, AnyOutputPin, Output>) -> Self {
            Self { pin }
        }
    }

    impl Motor for HapticDriver<'static> {
        fn set(&mut self, on: bool) -> anyhow::Result<()> {
            if on {
                self.pin.set_high()?;
            } else {
                self.pin.set_low()?;
            }
            Ok(())
        }
    }
}

type SharedMotor = Arc<Mutex<Box<dyn Motor>>>;

/// Queues vibrations on the dispatcher so callers never wait on them.
#[derive(Clone)]
pub struct Vibrator {
    motor: SharedMotor,
    dispatcher: DispatcherHandle,
}

impl Vibrator {
    pub fn new(motor: impl Motor + 'static, dispatcher: DispatcherHandle) -> Self {
        Self {
            motor: Arc::new(Mutex::new(Box::new(motor))),
            dispatcher,
        }
    }

    /// Buzz for `duration` (at least 150 ms) in 100 ms pulses.
    pub fn vibrate(&self, duration: Duration) -> Result<()> {
        let motor = Arc::clone(&self.motor);
        let duration = duration.max(Duration::from_millis(VIBRATE_MIN_MS));
        self.dispatcher.run_async("vibrate", move || {
            let pulse = Duration::from_millis(VIBRATE_PULSE_MS);
            let mut remaining = duration;
            while !remaining.is_zero() {
                let on = remaining.min(pulse);
                buzz(&motor, on);
                remaining -= on;
                if remaining.is_zero() {
                    break;
                }
                let off = remaining.min(pulse);
                thread::sleep(off);
                remaining -= off;
            }
            set_motor(&motor, false);
        })
    }

    /// Play alternating on/off durations in milliseconds, starting with "on",
    /// `repeat` times over.
    pub fn vibrate_pattern(&self, pattern: &[u32], repeat: u32) -> Result<()> {
        let motor = Arc::clone(&self.motor);
        let pattern = pattern.to_vec();
        self.dispatcher.run_async("vibrate_pattern", move || {
            for _ in 0..repeat {
                for (i, ms) in pattern.iter().enumerate() {
                    let step = Duration::from_millis(u64::from(*ms));
                    if i % 2 == 0 {
                        buzz(&motor, step);
                    } else {
                        thread::sleep(step);
                    }
                }
            }
            set_motor(&motor, false);
        })
    }
}

fn buzz(motor: &SharedMotor, duration: Duration) {
    set_motor(motor, true);
    thread::sleep(duration);
    set_motor(motor, false);
}

fn set_motor(motor: &SharedMotor, on: bool) {
    let mut motor = motor.lock().unwrap_or_else(PoisonError::into_inner);
    if let Err(e) = motor.set(on) {
        log::warn!("Haptic motor write failed: {:#}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimMotor;
    use crate::tasks::dispatcher::Dispatcher;

    #[test]
    fn short_vibration_is_stretched_to_the_minimum() {
        let dispatcher = Dispatcher::start().unwrap();
        let motor = SimMotor::new();
        let vibrator = Vibrator::new(motor.clone(), dispatcher.handle());

        vibrator.vibrate(Duration::from_millis(10)).unwrap();
        drop(vibrator);
        dispatcher.join().unwrap();

        // 150 ms: on 100, off 50 -> no second pulse fits after the gap.
        assert_eq!(motor.writes(), vec![true, false, false]);
        assert!(!motor.is_on());
    }

    #[test]
    fn pattern_repeats_and_leaves_the_motor_off() {
        let dispatcher = Dispatcher::start().unwrap();
        let motor = SimMotor::new();
        let vibrator = Vibrator::new(motor.clone(), dispatcher.handle());

        vibrator.vibrate_pattern(&[5, 5, 5], 2).unwrap();
        drop(vibrator);
        dispatcher.join().unwrap();

        let ons = motor.writes().iter().filter(|on| **on).count();
        assert_eq!(ons, 4);
        assert!(!motor.is_on());
    }
}
