use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use skwatch::app::{lock_wifi, Runtime};
use skwatch::config::*;
use skwatch::drivers::MotionStatus;
use skwatch::events::Signals;
use skwatch::isr;
use skwatch::power::{PowerConfig, PowerEvent, PowerEventCode, PowerState, WakeReason};
use skwatch::settings::{MemoryStore, SettingsStore, WifiSettings};
use skwatch::sim::{HwCall, RadioCall, SimHardware, SimMotor, SimRadio};
use skwatch::wifi::{RadioEvent, WifiConnectionState};

fn test_config() -> PowerConfig {
    PowerConfig {
        screen_timeout: Duration::from_secs(1),
        low_power_poll: Duration::from_millis(5),
        low_power_tick: Duration::from_millis(50),
        queue_wait: Duration::from_millis(1),
        idle_slice_max: Duration::from_millis(10),
    }
}

struct Watch {
    signals: Arc<Signals>,
    hw: SimHardware,
    radio: SimRadio,
    runtime: Runtime,
    events: Arc<Mutex<Vec<PowerEvent>>>,
}

fn watch(store: SettingsStore) -> Watch {
    let signals = Arc::new(Signals::new());
    let hw = SimHardware::new();
    let radio = SimRadio::new();
    let mut runtime = Runtime::new(
        Arc::clone(&signals),
        hw.board(),
        radio.clone(),
        SimMotor::new(),
        store,
    )
    .unwrap()
    .with_power_config(test_config());

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    runtime
        .power()
        .register_callback(move |event| sink.lock().unwrap().push(*event));

    Watch {
        signals,
        hw,
        radio,
        runtime,
        events,
    }
}

fn count(events: &[PowerEvent], code: PowerEventCode) -> usize {
    events.iter().filter(|event| event.code() == code).count()
}

#[test]
fn inactivity_sleeps_and_motion_wakes() {
    let mut w = watch(SettingsStore::new(MemoryStore::new()));
    w.hw.set_inactive(test_config().screen_timeout + Duration::from_secs(1));

    // Wrist raise from "interrupt context" once the watch is asleep.
    let signals = Arc::clone(&w.signals);
    let sensor = w.hw.clone();
    let imu = thread::spawn(move || {
        while !signals.is_low_power() {
            thread::sleep(Duration::from_millis(1));
        }
        thread::sleep(Duration::from_millis(20));
        sensor.latch_motion(MotionStatus {
            tilt: true,
            ..MotionStatus::default()
        });
        isr::on_motion_interrupt(&signals);
    });

    w.runtime.poll_once();
    imu.join().unwrap();

    let events = w.events.lock().unwrap().clone();
    assert_eq!(count(&events, PowerEventCode::EnterLowPower), 1);
    assert_eq!(count(&events, PowerEventCode::LeaveLowPower), 1);
    assert_eq!(events.first(), Some(&PowerEvent::EnterLowPower));
    assert_eq!(
        events.last(),
        Some(&PowerEvent::LeaveLowPower(WakeReason::Accelerometer))
    );
    assert_eq!(w.runtime.power().state(), PowerState::Active);
    assert_eq!(w.signals.isr.get(), 0);
    assert!(!w.signals.is_low_power());
    assert_eq!(w.hw.count(&HwCall::MotionAck), 1);

    // Activity was reset on wake, so the next iteration stays awake.
    w.runtime.poll_once();
    assert_eq!(count(&w.events.lock().unwrap(), PowerEventCode::EnterLowPower), 1);
}

#[test]
fn sleep_request_and_power_key_wake() {
    let mut w = watch(SettingsStore::new(MemoryStore::new()));
    w.signals.request_sleep();

    let signals = Arc::clone(&w.signals);
    let key = thread::spawn(move || {
        while !signals.is_low_power() {
            thread::sleep(Duration::from_millis(1));
        }
        isr::on_power_interrupt(&signals);
    });

    w.runtime.poll_once();
    key.join().unwrap();

    assert_eq!(
        w.events.lock().unwrap().last(),
        Some(&PowerEvent::LeaveLowPower(WakeReason::PowerButton))
    );
    assert_eq!(w.hw.count(&HwCall::PowerAck), 1);
    // Nothing went through the deferred queue while asleep.
    assert_eq!(w.signals.queue.try_pop(), None);
}

#[test]
fn wifi_backoff_is_served_from_low_power_ticks() {
    let store = SettingsStore::new(MemoryStore::new());
    store
        .save(
            SETTINGS_KEY_WIFI,
            &WifiSettings {
                enabled: true,
                ssid: "Boat".into(),
                password: "secret1".into(),
                retry_schedule_secs: vec![0],
                ..WifiSettings::default()
            },
        )
        .unwrap();
    let mut w = watch(store);

    let wifi = w.runtime.wifi();
    let retried_asleep = Arc::new(Mutex::new(false));
    {
        let signals = Arc::clone(&w.signals);
        let retried_asleep = Arc::clone(&retried_asleep);
        let mut manager = lock_wifi(&wifi);
        // Association fails: back off (immediately due with a zero schedule).
        manager.handle_event(RadioEvent::Disconnected, std::time::Instant::now());
        assert_eq!(manager.state(), WifiConnectionState::Disconnected);
        manager.attach(move |state| {
            if state == WifiConnectionState::Connecting && signals.is_low_power() {
                *retried_asleep.lock().unwrap() = true;
            }
        });
    }

    w.signals.request_sleep();
    let signals = Arc::clone(&w.signals);
    let waker = thread::spawn(move || {
        while !signals.is_low_power() {
            thread::sleep(Duration::from_millis(1));
        }
        thread::sleep(Duration::from_millis(150));
        signals.request_wake();
    });
    w.runtime.poll_once();
    waker.join().unwrap();

    let events = w.events.lock().unwrap().clone();
    assert!(count(&events, PowerEventCode::LowPowerTick) >= 1);
    assert!(*retried_asleep.lock().unwrap());
    assert!(w.radio.calls().contains(&RadioCall::Connect));
    // Radio was on: no light sleep.
    assert_eq!(w.hw.count(&HwCall::LightSleep), 0);
}
