// SkWatch - Telemetry Link
//
// Follows the Wi-Fi connection with the telemetry socket. The socket speaks
// its own protocol; the core only tells it when to connect and disconnect.
// Socket calls go through the async dispatcher so Wi-Fi observers stay fast.

use std::sync::{Arc, Mutex, PoisonError};

use crate::tasks::dispatcher::DispatcherHandle;
use crate::wifi::{WifiConnectionState, WifiManager};

pub trait TelemetrySocket: Send {
    fn connect(&mut self) -> anyhow::Result<()>;
    fn disconnect(&mut self);
    fn is_connected(&self) -> bool;
}

type SharedSocket = Arc<Mutex<Box<dyn TelemetrySocket>>>;

pub struct TelemetryLink;

impl TelemetryLink {
    /// Register the socket as a Wi-Fi observer.
    pub fn attach(
        wifi: &mut WifiManager,
        socket: impl TelemetrySocket + 'static,
        dispatcher: DispatcherHandle,
    ) {
        let socket: SharedSocket = Arc::new(Mutex::new(Box::new(socket)));
        wifi.attach(move |state| on_wifi_state(state, &socket, &dispatcher));
    }
}

fn on_wifi_state(state: WifiConnectionState, socket: &SharedSocket, dispatcher: &DispatcherHandle) {
    let socket = Arc::clone(socket);
    let queued = match state {
        WifiConnectionState::Connected => dispatcher.run_async("telemetry_connect", move || {
            let mut socket = socket.lock().unwrap_or_else(PoisonError::into_inner);
            match socket.connect() {
                Ok(()) => log::info!("Telemetry connected"),
                Err(e) => log::warn!("Telemetry connect failed: {:#}", e),
            }
        }),
        WifiConnectionState::Disconnected | WifiConnectionState::Off => {
            dispatcher.run_async("telemetry_disconnect", move || {
                let mut socket = socket.lock().unwrap_or_else(PoisonError::into_inner);
                if socket.is_connected() {
                    socket.disconnect();
                    log::info!("Telemetry disconnected");
                }
            })
        }
        WifiConnectionState::Connecting => Ok(()),
    };
    if let Err(e) = queued {
        log::error!("Telemetry update dropped: {}", e);
    }
}
