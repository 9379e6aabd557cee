// SkWatch - ESP-IDF Wi-Fi Radio
//
// `EspWifi` in station mode behind the `WifiRadio` trait, plus the system
// event loop subscriptions that feed driver events back to the manager.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use anyhow::anyhow;
use esp_idf_svc::eventloop::{EspSubscription, EspSystemEventLoop, System};
use esp_idf_svc::netif::IpEvent;
use esp_idf_svc::wifi::config::ScanConfig;
use esp_idf_svc::wifi::{ClientConfiguration, Configuration, EspWifi, WifiEvent};

use crate::app::{lock_wifi, SharedWifi};
use crate::wifi::{AccessPoint, RadioEvent, WifiRadio};

type SharedEspWifi = Arc<Mutex<EspWifi<'static>>>;

fn lock(wifi: &SharedEspWifi) -> MutexGuard<'_, EspWifi<'static>> {
    wifi.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
pub struct EspRadio {
    wifi: SharedEspWifi,
}

impl EspRadio {
    pub fn new(wifi: EspWifi<'static>) -> Self {
        Self {
            wifi: Arc::new(Mutex::new(wifi)),
        }
    }
}

impl WifiRadio for EspRadio {
    fn start(&mut self, ssid: &str, password: &str) -> anyhow::Result<()> {
        let mut wifi = lock(&self.wifi);
        wifi.set_configuration(&Configuration::Client(ClientConfiguration {
            ssid: ssid.try_into().map_err(|_| anyhow!("wifi ssid too long"))?,
            password: password
                .try_into()
                .map_err(|_| anyhow!("wifi password too long"))?,
            ..Default::default()
        }))?;
        wifi.start()?;
        Ok(())
    }

    fn connect(&mut self) -> anyhow::Result<()> {
        lock(&self.wifi).connect()?;
        Ok(())
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        lock(&self.wifi).stop()?;
        Ok(())
    }

    fn start_scan(&mut self) -> anyhow::Result<()> {
        let mut wifi = lock(&self.wifi);
        if !wifi.is_started()? {
            wifi.set_configuration(&Configuration::Client(ClientConfiguration::default()))?;
            wifi.start()?;
        }
        wifi.start_scan(&ScanConfig::default(), false)?;
        Ok(())
    }
}

/// Keeps the event loop subscriptions alive.
pub struct RadioEventBridge {
    _wifi: EspSubscription<'static, System>,
    _ip: EspSubscription<'static, System>,
}

pub fn bridge_radio_events(
    sysloop: &EspSystemEventLoop,
    radio: &EspRadio,
    manager: SharedWifi,
) -> anyhow::Result<RadioEventBridge> {
    let esp_wifi = Arc::clone(&radio.wifi);
    let wifi_manager = Arc::clone(&manager);
    let manager_catch_up = Arc::clone(&manager);
    let wifi_sub = sysloop.subscribe::<WifiEvent, _>(move |event| {
        let event = match event {
            WifiEvent::StaStarted => RadioEvent::Started,
            WifiEvent::StaDisconnected(..) => RadioEvent::Disconnected,
            WifiEvent::ScanDone(..) => RadioEvent::ScanDone(scan_results(&esp_wifi)),
            _ => return,
        };
        lock_wifi(&wifi_manager).handle_event(event, Instant::now());
    })?;

    let ip_sub = sysloop.subscribe::<IpEvent, _>(move |event| {
        if let IpEvent::DhcpIpAssigned(assignment) = event {
            let ip = assignment.ip().into();
            lock_wifi(&manager).handle_event(RadioEvent::GotAddress(ip), Instant::now());
        }
    })?;

    // The manager may have started the radio before anyone was listening.
    let started = lock(&radio.wifi).is_started().unwrap_or(false);
    if started {
        lock_wifi(&manager_catch_up).handle_event(RadioEvent::Started, Instant::now());
    }

    Ok(RadioEventBridge {
        _wifi: wifi_sub,
        _ip: ip_sub,
    })
}

fn scan_results(wifi: &SharedEspWifi) -> Vec<AccessPoint> {
    match lock(wifi).get_scan_result() {
        Ok(found) => found
            .into_iter()
            .map(|ap| AccessPoint {
                ssid: ap.ssid.as_str().to_owned(),
                rssi: ap.signal_strength,
            })
            .collect(),
        Err(e) => {
            log::warn!("WiFi scan results unavailable: {}", e);
            Vec::new()
        }
    }
}
