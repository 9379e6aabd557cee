// SkWatch - Event Signal Bus & Deferred Work Queue
//
// The only state shared with interrupt context. Everything here is lock-free,
// non-blocking and allocation-free on the producer side.

use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use heapless::mpmc::MpMcQueue;

use crate::config::DEFERRED_QUEUE_CAPACITY;

/// Raw flag word.
pub type FlagBits = u32;

// ---------------------------------------------------------------------------
// Interrupt flag bits (`Signals::isr`)
// ---------------------------------------------------------------------------
/// Device is in low-power mode.
pub const SLEEP_MODE: FlagBits = 1 << 1;
/// A wake condition was observed. Always raised together with one IRQ bit.
pub const SLEEP_EXIT: FlagBits = 1 << 2;
pub const MOTION_IRQ: FlagBits = 1 << 3;
pub const POWER_IRQ: FlagBits = 1 << 4;
pub const TOUCH_IRQ: FlagBits = 1 << 5;

pub const IRQ_BITS: FlagBits = MOTION_IRQ | POWER_IRQ | TOUCH_IRQ;

// ---------------------------------------------------------------------------
// Application flag bits (`Signals::app`)
// ---------------------------------------------------------------------------
/// Mirror of "device is in low power" for code outside the main loop.
pub const APP_LOW_POWER: FlagBits = 1 << 0;
/// Leave low power even though no interrupt fired.
pub const APP_WAKE_REQUEST: FlagBits = 1 << 1;
/// Enter low power on the next main loop iteration.
pub const APP_SLEEP_REQUEST: FlagBits = 1 << 2;

// ---------------------------------------------------------------------------
// Event Signal Bus
// ---------------------------------------------------------------------------

/// Atomic bit register shared between interrupt and task context.
///
/// Every operation is a single atomic read-modify-write, so concurrent
/// `set`/`clear` calls on different bits never tear each other.
#[derive(Debug, Default)]
pub struct EventFlags {
    bits: AtomicU32,
}

impl EventFlags {
    pub const fn new() -> Self {
        Self {
            bits: AtomicU32::new(0),
        }
    }

    /// Set `bits`, returning the register as it was before. ISR-safe.
    pub fn set(&self, bits: FlagBits) -> FlagBits {
        self.bits.fetch_or(bits, Ordering::AcqRel)
    }

    /// Clear `bits`, returning the register as it was before. ISR-safe.
    pub fn clear(&self, bits: FlagBits) -> FlagBits {
        self.bits.fetch_and(!bits, Ordering::AcqRel)
    }

    /// Snapshot of the whole register.
    pub fn get(&self) -> FlagBits {
        self.bits.load(Ordering::Acquire)
    }

    /// `true` if every bit in `bits` is set.
    pub fn contains(&self, bits: FlagBits) -> bool {
        self.get() & bits == bits
    }

    /// `true` if any bit in `bits` is set.
    pub fn intersects(&self, bits: FlagBits) -> bool {
        self.get() & bits != 0
    }
}

// ---------------------------------------------------------------------------
// Deferred Work Queue
// ---------------------------------------------------------------------------

/// Interrupt notifications handed from ISRs to the main loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredEvent {
    /// Accelerometer (step counter, double tap, tilt) interrupt line fired.
    MotionInterrupt,
    /// Power management chip / power key interrupt line fired.
    PowerInterrupt,
}

const POP_POLL_SLICE: Duration = Duration::from_millis(1);

/// Bounded FIFO filled from interrupt context and drained by the main loop.
pub struct DeferredQueue {
    ring: MpMcQueue<DeferredEvent, DEFERRED_QUEUE_CAPACITY>,
    dropped: AtomicU32,
}

impl DeferredQueue {
    pub const fn new() -> Self {
        Self {
            ring: MpMcQueue::new(),
            dropped: AtomicU32::new(0),
        }
    }

    /// Non-blocking push. A full queue drops the event and returns `false`.
    pub fn try_push(&self, event: DeferredEvent) -> bool {
        match self.ring.enqueue(event) {
            Ok(()) => true,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Non-blocking pop.
    pub fn try_pop(&self) -> Option<DeferredEvent> {
        self.ring.dequeue()
    }

    /// Pop the oldest event, waiting up to `timeout` for one to arrive.
    /// Task context only.
    pub fn pop_wait(&self, timeout: Duration) -> Option<DeferredEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(event) = self.ring.dequeue() {
                return Some(event);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            thread::sleep((deadline - now).min(POP_POLL_SLICE));
        }
    }

    /// Number of events dropped on a full queue since the last call.
    pub fn take_dropped(&self) -> u32 {
        self.dropped.swap(0, Ordering::Relaxed)
    }
}

impl Default for DeferredQueue {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// Cross-context primitives, created once at boot and shared by reference.
#[derive(Default)]
pub struct Signals {
    pub isr: EventFlags,
    pub app: EventFlags,
    pub queue: DeferredQueue,
}

impl Signals {
    pub const fn new() -> Self {
        Self {
            isr: EventFlags::new(),
            app: EventFlags::new(),
            queue: DeferredQueue::new(),
        }
    }

    pub fn is_low_power(&self) -> bool {
        self.app.contains(APP_LOW_POWER)
    }

    /// Ask the main loop to leave low power without a hardware wake source.
    pub fn request_wake(&self) {
        self.app.set(APP_WAKE_REQUEST);
    }

    /// Ask the main loop to enter low power on its next iteration.
    pub fn request_sleep(&self) {
        self.app.set(APP_SLEEP_REQUEST);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn set_and_clear_report_previous_value() {
        let flags = EventFlags::new();
        assert_eq!(flags.set(SLEEP_MODE), 0);
        assert_eq!(flags.set(SLEEP_EXIT | MOTION_IRQ), SLEEP_MODE);
        assert!(flags.contains(SLEEP_EXIT | MOTION_IRQ));
        assert!(!flags.contains(SLEEP_EXIT | POWER_IRQ));
        assert!(flags.intersects(IRQ_BITS));

        flags.clear(MOTION_IRQ | SLEEP_EXIT);
        assert_eq!(flags.get(), SLEEP_MODE);
    }

    #[test]
    fn concurrent_updates_on_disjoint_bits_are_not_torn() {
        let flags = Arc::new(EventFlags::new());

        // "ISR" toggles MOTION_IRQ and finishes with it set; the task side
        // toggles TOUCH_IRQ and finishes with it cleared.
        let isr = {
            let flags = Arc::clone(&flags);
            thread::spawn(move || {
                for _ in 0..10_000 {
                    flags.set(MOTION_IRQ);
                    flags.clear(MOTION_IRQ);
                }
                flags.set(MOTION_IRQ);
            })
        };
        let task = {
            let flags = Arc::clone(&flags);
            thread::spawn(move || {
                for _ in 0..10_000 {
                    flags.set(TOUCH_IRQ);
                    flags.clear(TOUCH_IRQ);
                }
            })
        };
        isr.join().unwrap();
        task.join().unwrap();

        assert_eq!(flags.get(), MOTION_IRQ);
    }

    #[test]
    fn queue_preserves_order_from_a_single_producer() {
        let queue = Arc::new(DeferredQueue::new());
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..200u32 {
                    let event = if i % 3 == 0 {
                        DeferredEvent::PowerInterrupt
                    } else {
                        DeferredEvent::MotionInterrupt
                    };
                    while !queue.try_push(event) {
                        thread::yield_now();
                    }
                }
            })
        };

        let mut received = Vec::new();
        while received.len() < 200 {
            if let Some(event) = queue.pop_wait(Duration::from_millis(50)) {
                received.push(event);
            }
        }
        producer.join().unwrap();

        for (i, event) in received.iter().enumerate() {
            let expected = if i % 3 == 0 {
                DeferredEvent::PowerInterrupt
            } else {
                DeferredEvent::MotionInterrupt
            };
            assert_eq!(*event, expected, "event {i} out of order");
        }
    }

    #[test]
    fn full_queue_drops_and_counts() {
        let queue = DeferredQueue::new();
        for _ in 0..DEFERRED_QUEUE_CAPACITY {
            assert!(queue.try_push(DeferredEvent::MotionInterrupt));
        }
        assert!(!queue.try_push(DeferredEvent::PowerInterrupt));
        assert!(!queue.try_push(DeferredEvent::PowerInterrupt));
        assert_eq!(queue.take_dropped(), 2);
        assert_eq!(queue.take_dropped(), 0);

        // Dropped events never show up; the stored ones are intact.
        let mut drained = 0;
        while let Some(event) = queue.try_pop() {
            assert_eq!(event, DeferredEvent::MotionInterrupt);
            drained += 1;
        }
        assert_eq!(drained, DEFERRED_QUEUE_CAPACITY);
    }

    #[test]
    fn pop_wait_times_out_on_empty_queue() {
        let queue = DeferredQueue::new();
        let start = Instant::now();
        assert_eq!(queue.pop_wait(Duration::from_millis(20)), None);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn wake_and_sleep_requests_use_app_flags() {
        let signals = Signals::new();
        assert!(!signals.is_low_power());
        signals.request_wake();
        signals.request_sleep();
        assert!(signals.app.contains(APP_WAKE_REQUEST | APP_SLEEP_REQUEST));
        assert_eq!(signals.isr.get(), 0);
    }
}
