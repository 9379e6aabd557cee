// SkWatch - Interrupt Entry Points
//
// Called directly from GPIO interrupt handlers. Never block, allocate, lock
// or log here.

use crate::events::{
    DeferredEvent, FlagBits, Signals, MOTION_IRQ, POWER_IRQ, SLEEP_EXIT, SLEEP_MODE, TOUCH_IRQ,
};

/// Accelerometer interrupt line (step counter, double tap, tilt).
pub fn on_motion_interrupt(signals: &Signals) {
    raise(signals, MOTION_IRQ, Some(DeferredEvent::MotionInterrupt));
}

/// Power management chip / power key interrupt line.
pub fn on_power_interrupt(signals: &Signals) {
    raise(signals, POWER_IRQ, Some(DeferredEvent::PowerInterrupt));
}

/// Touch controller interrupt line. Only relevant as a wake source; while
/// awake the GUI reads the touch panel itself.
pub fn on_touch_interrupt(signals: &Signals) {
    raise(signals, TOUCH_IRQ, None);
}

/// Wake lines sampled by task code after a light sleep, while the pin
/// interrupts themselves are masked.
pub fn on_gpio_wakeup(signals: &Signals, motion_line: bool, power_key: bool) {
    if motion_line {
        on_motion_interrupt(signals);
    }
    if power_key {
        on_power_interrupt(signals);
    }
}

fn raise(signals: &Signals, irq: FlagBits, awake_event: Option<DeferredEvent>) {
    if signals.isr.contains(SLEEP_MODE) {
        // Fast wake path: the low-power loop watches SLEEP_EXIT.
        signals.isr.set(SLEEP_EXIT | irq);
    } else if let Some(event) = awake_event {
        // Full queue: the same source fires again on its next edge.
        let _ = signals.queue.try_push(event);
    }
}
