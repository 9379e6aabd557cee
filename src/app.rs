// SkWatch - Runtime Composition
//
// Builds the one instance of every runtime component and wires them
// together. Hardware comes in from outside: `platform` on the device, `sim`
// on the host.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::drivers::haptic::Vibrator;
use crate::drivers::{Board, Motor};
use crate::events::Signals;
use crate::power::{PowerConfig, PowerEvent, PowerManager};
use crate::settings::SettingsStore;
use crate::tasks::dispatcher::{Dispatcher, DispatcherHandle};
use crate::telemetry::{TelemetryLink, TelemetrySocket};
use crate::wifi::{WifiManager, WifiRadio};

/// The Wi-Fi manager is shared with the radio driver's event thread.
pub type SharedWifi = Arc<Mutex<WifiManager>>;

pub fn lock_wifi(wifi: &SharedWifi) -> MutexGuard<'_, WifiManager> {
    wifi.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Runtime {
    signals: Arc<Signals>,
    dispatcher: Dispatcher,
    wifi: SharedWifi,
    power: PowerManager,
    vibrator: Vibrator,
}

impl Runtime {
    pub fn new(
        signals: Arc<Signals>,
        board: Board,
        radio: impl WifiRadio + 'static,
        motor: impl Motor + 'static,
        store: SettingsStore,
    ) -> anyhow::Result<Self> {
        let dispatcher = Dispatcher::start()?;

        let wifi = WifiManager::new(radio, store.clone());
        let wifi_state = wifi.state_handle();
        let wifi: SharedWifi = Arc::new(Mutex::new(wifi));

        let mut power = PowerManager::new(Arc::clone(&signals), board, store, wifi_state);
        let housekeeping = Arc::clone(&wifi);
        power.register_callback(move |event| {
            if let PowerEvent::LowPowerTick { .. } = event {
                lock_wifi(&housekeeping).poll(Instant::now());
            }
        });

        let vibrator = Vibrator::new(motor, dispatcher.handle());

        log::info!("Runtime ready");
        Ok(Self {
            signals,
            dispatcher,
            wifi,
            power,
            vibrator,
        })
    }

    /// Let the telemetry socket follow the Wi-Fi connection.
    pub fn attach_telemetry(&self, socket: impl TelemetrySocket + 'static) {
        TelemetryLink::attach(&mut lock_wifi(&self.wifi), socket, self.dispatcher.handle());
    }

    pub fn with_power_config(mut self, config: PowerConfig) -> Self {
        self.power = self.power.with_config(config);
        self
    }

    /// One main loop iteration: power state machine, then Wi-Fi backoff.
    pub fn poll_once(&mut self) {
        self.power.poll();
        lock_wifi(&self.wifi).poll(Instant::now());
    }

    pub fn run(mut self) -> ! {
        log::info!("Main loop started");
        loop {
            self.poll_once();
        }
    }

    pub fn signals(&self) -> &Arc<Signals> {
        &self.signals
    }

    pub fn wifi(&self) -> SharedWifi {
        Arc::clone(&self.wifi)
    }

    pub fn power(&mut self) -> &mut PowerManager {
        &mut self.power
    }

    pub fn vibrator(&self) -> &Vibrator {
        &self.vibrator
    }

    pub fn dispatcher(&self) -> DispatcherHandle {
        self.dispatcher.handle()
    }
}
