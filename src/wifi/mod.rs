// SkWatch - Wireless Connection Manager
//
// Station-mode connection state machine. The radio driver retries transient
// drops on its own; on top of that the manager spaces out its own reconnect
// attempts along a retry schedule so a wrong password or a missing access
// point does not drain the battery.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

mod known;
mod manager;
mod retry;

pub use known::KnownNetworks;
pub use manager::{WifiManager, WifiObserver};
pub use retry::RetrySchedule;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiConnectionState {
    Off,
    Disconnected,
    Connecting,
    Connected,
}

impl WifiConnectionState {
    fn to_u8(self) -> u8 {
        match self {
            WifiConnectionState::Off => 0,
            WifiConnectionState::Disconnected => 1,
            WifiConnectionState::Connecting => 2,
            WifiConnectionState::Connected => 3,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => WifiConnectionState::Disconnected,
            2 => WifiConnectionState::Connecting,
            3 => WifiConnectionState::Connected,
            _ => WifiConnectionState::Off,
        }
    }
}

/// Lock-free view of the connection state for other threads.
#[derive(Debug, Clone)]
pub struct WifiStateHandle(Arc<AtomicU8>);

impl WifiStateHandle {
    pub fn new(state: WifiConnectionState) -> Self {
        Self(Arc::new(AtomicU8::new(state.to_u8())))
    }

    pub fn get(&self) -> WifiConnectionState {
        WifiConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: WifiConnectionState) {
        self.0.store(state.to_u8(), Ordering::Release);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPoint {
    pub ssid: String,
    pub rssi: i8,
}

/// Events reported by the radio driver, in the order it raised them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    Started,
    Disconnected,
    GotAddress(Ipv4Addr),
    ScanDone(Vec<AccessPoint>),
}

/// Station-mode radio driver. Results only report whether the request was
/// accepted; outcomes arrive later as `RadioEvent`s.
pub trait WifiRadio: Send {
    fn start(&mut self, ssid: &str, password: &str) -> anyhow::Result<()>;
    fn connect(&mut self) -> anyhow::Result<()>;
    fn stop(&mut self) -> anyhow::Result<()>;
    fn start_scan(&mut self) -> anyhow::Result<()>;
}
