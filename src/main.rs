// SkWatch - Firmware Entry Point
//
// Device boot sequence:
//   1. Logging, NVS, system event loop.
//   2. Shared I2C bus: MPU6050 motion interrupt + SSD1306 panel.
//   3. Runtime (dispatcher, Wi-Fi manager, power state machine).
//   4. GPIO interrupts and Wi-Fi driver events.
//   5. Main loop on the "power" task; the boot thread parks.
//
// On any other target the same runtime runs against simulated hardware with
// a scripted day in the life of the watch.

#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    device::main()
}

#[cfg(not(target_os = "espidf"))]
fn main() -> anyhow::Result<()> {
    host::main()
}

#[cfg(target_os = "espidf")]
mod device {
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use esp_idf_hal::gpio::{AnyOutputPin, Output, OutputPin, PinDriver};
    use esp_idf_hal::i2c::{I2cConfig, I2cDriver};
    use esp_idf_hal::prelude::*;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use esp_idf_svc::wifi::EspWifi;

    use skwatch::app::Runtime;
    use skwatch::drivers::haptic::HapticDriver;
    use skwatch::drivers::imu::Mpu6050;
    use skwatch::drivers::Board;
    use skwatch::events::Signals;
    use skwatch::platform::{
        self, ButtonPowerKey, EspRadio, IdleGui, LightSleep, NoTouch, NvsStore, Ssd1306Panel,
    };
    use skwatch::settings::SettingsStore;
    use skwatch::tasks::power::spawn_power_task;

    pub fn main() -> anyhow::Result<()> {
        // Link esp-idf-sys runtime patches and initialise logging.
        esp_idf_svc::sys::link_patches();
        esp_idf_svc::log::EspLogger::initialize_default();
        log::info!("SkWatch firmware starting…");

        let peripherals = Peripherals::take()?;
        let sysloop = EspSystemEventLoop::take()?;
        let nvs_partition = EspDefaultNvsPartition::take()?;
        let store = SettingsStore::new(NvsStore::new(nvs_partition.clone())?);

        // ---- I2C bus (shared between OLED and MPU6050) --------------------
        let i2c_config = I2cConfig::new().baudrate(400u32.kHz().into());
        let i2c = I2cDriver::new(
            peripherals.i2c0,
            peripherals.pins.gpio6, // SDA
            peripherals.pins.gpio7, // SCL
            &i2c_config,
        )?;
        // SAFETY: The I2C peripheral is a singleton obtained from `Peripherals::take()`.
        // It lives for the entire programme (firmware never exits).
        let i2c_bus: &'static Mutex<I2cDriver<'static>> =
            Box::leak(Box::new(Mutex::new(unsafe { core::mem::transmute(i2c) })));

        let imu = Mpu6050::new(i2c_bus);
        if !imu.is_connected() {
            log::error!("MPU6050 not found on I2C bus");
        }
        imu.init()?;

        let signals = Arc::new(Signals::new());
        let board = Board {
            display: Box::new(Ssd1306Panel::new(i2c_bus)),
            touch: Box::new(NoTouch),
            motion: Box::new(imu),
            power_chip: Box::new(ButtonPowerKey::new()),
            gui: Box::new(IdleGui::new()),
            sleep: Box::new(LightSleep::new(Arc::clone(&signals))),
        };

        // SAFETY: GPIO peripheral lives forever, same argument as I2C above.
        let haptic_pin = PinDriver::output(peripherals.pins.gpio4.downgrade_output())?;
        let haptic_pin: PinDriver<'static, AnyOutputPin, Output> =
            unsafe { core::mem::transmute(haptic_pin) };
        let haptic = HapticDriver::new(haptic_pin);

        let radio = EspRadio::new(EspWifi::new(
            peripherals.modem,
            sysloop.clone(),
            Some(nvs_partition),
        )?);

        // ---- Runtime ------------------------------------------------------
        let runtime = Runtime::new(Arc::clone(&signals), board, radio.clone(), haptic, store)?;

        platform::install_interrupts(&signals)?;
        let _radio_events = platform::bridge_radio_events(&sysloop, &radio, runtime.wifi())?;

        spawn_power_task(runtime)?;
        log::info!("Boot complete");

        // All work happens on the spawned tasks.
        loop {
            thread::sleep(Duration::from_secs(60));
        }
    }
}

#[cfg(not(target_os = "espidf"))]
mod host {
    use std::net::Ipv4Addr;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use skwatch::app::{lock_wifi, Runtime};
    use skwatch::config::*;
    use skwatch::drivers::MotionStatus;
    use skwatch::events::Signals;
    use skwatch::isr;
    use skwatch::power::{PowerConfig, PowerEvent};
    use skwatch::settings::{MemoryStore, SettingsStore, WifiSettings};
    use skwatch::sim::{SimHardware, SimMotor, SimRadio, SimSocket};
    use skwatch::wifi::RadioEvent;

    const SIM_RUN_TIME: Duration = Duration::from_secs(8);

    pub fn main() -> anyhow::Result<()> {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
        log::info!("SkWatch simulator starting…");

        let store = SettingsStore::new(MemoryStore::new());
        store.save(
            SETTINGS_KEY_WIFI,
            &WifiSettings {
                enabled: true,
                ssid: "Boat".into(),
                password: "secret1".into(),
                ..WifiSettings::default()
            },
        )?;

        let hw = SimHardware::new();
        let signals = Arc::new(Signals::new());
        let mut runtime = Runtime::new(
            Arc::clone(&signals),
            hw.board(),
            SimRadio::new(),
            SimMotor::new(),
            store,
        )?
        .with_power_config(PowerConfig {
            screen_timeout: Duration::from_secs(2),
            low_power_tick: Duration::from_secs(1),
            ..PowerConfig::default()
        });
        runtime.attach_telemetry(SimSocket::new());

        let vibrator = runtime.vibrator().clone();
        runtime.power().register_callback(move |event| {
            log::info!("Power event {:?} (arg {})", event.code(), event.argument());
            if let PowerEvent::DoubleTapDetected = event {
                if let Err(e) = vibrator.vibrate(Duration::from_millis(VIBRATE_MIN_MS)) {
                    log::warn!("Vibration not queued: {}", e);
                }
            }
        });

        // The radio driver answers on its own thread.
        let wifi = runtime.wifi();
        thread::Builder::new().name("radio".into()).spawn(move || {
            thread::sleep(Duration::from_millis(200));
            lock_wifi(&wifi).handle_event(RadioEvent::Started, Instant::now());
            thread::sleep(Duration::from_millis(300));
            lock_wifi(&wifi)
                .handle_event(RadioEvent::GotAddress(Ipv4Addr::new(10, 0, 0, 5)), Instant::now());
        })?;

        // A double tap while awake, then a wrist raise once asleep.
        let isr_signals = Arc::clone(&signals);
        let sensor = hw.clone();
        thread::Builder::new().name("imu".into()).spawn(move || {
            thread::sleep(Duration::from_secs(1));
            sensor.latch_motion(MotionStatus {
                double_tap: true,
                ..MotionStatus::default()
            });
            isr::on_motion_interrupt(&isr_signals);

            while !isr_signals.is_low_power() {
                thread::sleep(Duration::from_millis(50));
            }
            thread::sleep(Duration::from_millis(1500));
            sensor.latch_motion(MotionStatus {
                tilt: true,
                ..MotionStatus::default()
            });
            isr::on_motion_interrupt(&isr_signals);
        })?;

        // Wake the loop for the last time once the run is over.
        let stop_signals = Arc::clone(&signals);
        thread::Builder::new().name("stop".into()).spawn(move || {
            thread::sleep(SIM_RUN_TIME);
            stop_signals.request_wake();
        })?;

        let deadline = Instant::now() + SIM_RUN_TIME;
        while Instant::now() < deadline {
            runtime.poll_once();
        }

        log::info!("Simulation finished, WiFi {:?}", lock_wifi(&runtime.wifi()).state());
        Ok(())
    }
}
