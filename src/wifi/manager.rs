use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use crate::config::*;
use crate::error::{Error, Result};
use crate::settings::{KnownNetwork, SettingsStore, WifiSettings};
use crate::wifi::{
    AccessPoint, KnownNetworks, RadioEvent, RetrySchedule, WifiConnectionState, WifiRadio,
    WifiStateHandle,
};

/// Called with every new connection state. Runs with the manager locked:
/// must not call back into it.
pub type WifiObserver = Box<dyn FnMut(WifiConnectionState) + Send>;

pub struct WifiManager {
    radio: Box<dyn WifiRadio>,
    store: SettingsStore,
    settings: WifiSettings,
    known: KnownNetworks,
    schedule: RetrySchedule,

    state: WifiConnectionState,
    handle: WifiStateHandle,
    observers: Vec<WifiObserver>,

    ip: Option<Ipv4Addr>,
    retry_index: usize,
    next_attempt_at: Option<Instant>,
    // The radio itself failed to start; the next attempt starts it again.
    restart_needed: bool,
    // Manually entered credentials, cached once they get us an address.
    pending_credentials: Option<KnownNetwork>,

    scan_running: bool,
    scan_results: Option<Vec<AccessPoint>>,
}

impl WifiManager {
    /// Build the manager from persisted settings, turning the radio on if it
    /// was left enabled.
    pub fn new(radio: impl WifiRadio + 'static, store: SettingsStore) -> Self {
        let settings: WifiSettings = store.load(SETTINGS_KEY_WIFI);
        let schedule = RetrySchedule::from_secs(&settings.retry_schedule_secs).unwrap_or_else(|e| {
            log::warn!("WiFi retry schedule: {}, using defaults", e);
            RetrySchedule::default()
        });
        let known = KnownNetworks::from_settings(&settings.known_networks);
        let enabled = settings.enabled;

        let mut manager = Self {
            radio: Box::new(radio),
            store,
            settings,
            known,
            schedule,
            state: WifiConnectionState::Off,
            handle: WifiStateHandle::new(WifiConnectionState::Off),
            observers: Vec::new(),
            ip: None,
            retry_index: 0,
            next_attempt_at: None,
            restart_needed: false,
            pending_credentials: None,
            scan_running: false,
            scan_results: None,
        };

        log::info!(
            "WiFi manager ready ({} known networks, enabled: {})",
            manager.known.len(),
            enabled
        );
        if enabled {
            manager.on();
        }
        manager
    }

    // -----------------------------------------------------------------------
    // Enable / disable
    // -----------------------------------------------------------------------

    /// Enable the radio and start joining the configured network.
    pub fn on(&mut self) {
        if self.settings.ssid.is_empty() {
            log::warn!("WiFi on requested without a configured network");
            self.off();
            return;
        }
        if self.settings.enabled
            && matches!(
                self.state,
                WifiConnectionState::Connecting | WifiConnectionState::Connected
            )
        {
            return;
        }
        if !self.settings.enabled {
            self.settings.enabled = true;
            self.persist();
        }
        self.start_radio(Instant::now());
    }

    /// Disable the radio, whatever it is doing.
    pub fn off(&mut self) {
        if let Err(e) = self.radio.stop() {
            log::warn!("WiFi stop failed: {:#}", e);
        }
        if self.settings.enabled {
            self.settings.enabled = false;
            self.persist();
        }
        self.ip = None;
        self.next_attempt_at = None;
        self.restart_needed = false;
        self.pending_credentials = None;
        self.set_state(WifiConnectionState::Off);
    }

    /// Make `ssid` the configured network and join it.
    pub fn connect_to(&mut self, ssid: &str, password: &str) -> Result<()> {
        if ssid.is_empty() {
            return Err(Error::EmptySsid);
        }
        if ssid.len() > WIFI_SSID_MAX {
            return Err(Error::SsidTooLong);
        }
        if password.len() > WIFI_PASSWORD_MAX {
            return Err(Error::PasswordTooLong);
        }

        log::info!("WiFi connecting to {}", ssid);
        if self.state != WifiConnectionState::Off {
            if let Err(e) = self.radio.stop() {
                log::warn!("WiFi stop failed: {:#}", e);
            }
        }
        self.settings.ssid = ssid.to_owned();
        self.settings.password = password.to_owned();
        self.settings.enabled = true;
        self.persist();

        self.pending_credentials = Some(KnownNetwork {
            ssid: ssid.to_owned(),
            password: password.to_owned(),
        });
        self.ip = None;
        self.start_radio(Instant::now());
        Ok(())
    }

    /// Every fresh attempt replaces whatever backoff was pending.
    fn start_radio(&mut self, now: Instant) {
        self.restart_needed = false;
        self.next_attempt_at = None;
        match self.radio.start(&self.settings.ssid, &self.settings.password) {
            Ok(()) => self.set_state(WifiConnectionState::Connecting),
            Err(e) => {
                log::warn!("WiFi start failed: {:#}", e);
                self.restart_needed = true;
                self.schedule_retry(now);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Driver events & backoff
    // -----------------------------------------------------------------------

    pub fn handle_event(&mut self, event: RadioEvent, now: Instant) {
        match event {
            RadioEvent::Started => {
                if self.settings.enabled {
                    self.associate(now);
                }
            }
            RadioEvent::Disconnected => self.on_disconnected(now),
            RadioEvent::GotAddress(ip) => self.on_got_address(ip),
            RadioEvent::ScanDone(results) => {
                log::info!("WiFi scan done, {} access points", results.len());
                self.scan_running = false;
                self.scan_results = Some(results);
            }
        }
    }

    fn on_disconnected(&mut self, now: Instant) {
        match self.state {
            WifiConnectionState::Off => {}
            _ if !self.settings.enabled => self.set_state(WifiConnectionState::Disconnected),
            WifiConnectionState::Connected => {
                // Transient drop: straight back to the access point.
                log::info!("WiFi connection lost, reconnecting");
                self.ip = None;
                self.set_state(WifiConnectionState::Disconnected);
                self.associate(now);
            }
            WifiConnectionState::Connecting => {
                log::info!("WiFi connection attempt failed");
                self.schedule_retry(now);
            }
            WifiConnectionState::Disconnected => {}
        }
    }

    fn on_got_address(&mut self, ip: Ipv4Addr) {
        log::info!("WiFi connected, address {}", ip);
        self.ip = Some(ip);
        self.retry_index = 0;
        self.next_attempt_at = None;
        self.restart_needed = false;
        if let Some(network) = self.pending_credentials.take() {
            self.known.insert(&network.ssid, &network.password);
            self.persist();
        }
        self.set_state(WifiConnectionState::Connected);
    }

    fn associate(&mut self, now: Instant) {
        self.next_attempt_at = None;
        match self.radio.connect() {
            Ok(()) => self.set_state(WifiConnectionState::Connecting),
            Err(e) => {
                log::warn!("WiFi connect failed: {:#}", e);
                self.schedule_retry(now);
            }
        }
    }

    /// Wait `schedule[retry_index]` before the next attempt, then move the
    /// index on. The index never runs past the last entry.
    fn schedule_retry(&mut self, now: Instant) {
        let wait = self.schedule.delay(self.retry_index);
        self.retry_index = (self.retry_index + 1).min(self.schedule.last_index());
        self.next_attempt_at = Some(now + wait);
        log::info!("WiFi retry in {} s", wait.as_secs());
        self.set_state(WifiConnectionState::Disconnected);
    }

    /// Run a reconnect attempt once its backoff has elapsed.
    pub fn poll(&mut self, now: Instant) {
        if !self.settings.enabled {
            return;
        }
        match self.next_attempt_at {
            Some(at) if now >= at => {
                self.next_attempt_at = None;
                if self.restart_needed {
                    self.start_radio(now);
                } else {
                    self.associate(now);
                }
            }
            _ => {}
        }
    }

    // -----------------------------------------------------------------------
    // Scan
    // -----------------------------------------------------------------------

    /// Start an access point scan. Returns `false` if one is already running
    /// or the radio refused.
    pub fn scan(&mut self) -> bool {
        if self.scan_running {
            return false;
        }
        if let Err(e) = self.radio.start_scan() {
            log::warn!("WiFi scan failed to start: {:#}", e);
            return false;
        }
        self.scan_running = true;
        self.scan_results = None;
        true
    }

    pub fn is_scan_complete(&self) -> bool {
        !self.scan_running && self.scan_results.is_some()
    }

    pub fn scan_results(&self) -> &[AccessPoint] {
        self.scan_results.as_deref().unwrap_or(&[])
    }

    // -----------------------------------------------------------------------
    // Observers & accessors
    // -----------------------------------------------------------------------

    /// Register an observer. It is called right away with the current state.
    pub fn attach(&mut self, observer: impl FnMut(WifiConnectionState) + Send + 'static) {
        let mut observer: WifiObserver = Box::new(observer);
        observer(self.state);
        self.observers.push(observer);
    }

    fn set_state(&mut self, state: WifiConnectionState) {
        if self.state == state {
            return;
        }
        log::info!("WiFi {:?} -> {:?}", self.state, state);
        self.state = state;
        self.handle.set(state);
        for observer in self.observers.iter_mut() {
            observer(state);
        }
    }

    pub fn state(&self) -> WifiConnectionState {
        self.state
    }

    pub fn state_handle(&self) -> WifiStateHandle {
        self.handle.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    pub fn ip(&self) -> Option<Ipv4Addr> {
        self.ip
    }

    pub fn retry_index(&self) -> usize {
        self.retry_index
    }

    /// Time left before the next manager-initiated attempt, if one is due.
    pub fn next_retry_in(&self, now: Instant) -> Option<Duration> {
        self.next_attempt_at.map(|at| at.saturating_duration_since(now))
    }

    pub fn is_known(&self, ssid: &str) -> bool {
        self.known.is_known(ssid)
    }

    pub fn get_known_password(&self, ssid: &str) -> Option<&str> {
        self.known.get_known_password(ssid)
    }

    pub fn forget(&mut self, ssid: &str) -> bool {
        let removed = self.known.forget(ssid);
        if removed {
            self.persist();
        }
        removed
    }

    fn persist(&mut self) {
        self.settings.known_networks = self.known.to_settings();
        if let Err(e) = self.store.save(SETTINGS_KEY_WIFI, &self.settings) {
            log::warn!("WiFi settings not saved: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MemoryStore;
    use crate::sim::{RadioCall, SimRadio};
    use std::sync::{Arc, Mutex};

    fn store_with(settings: &WifiSettings) -> SettingsStore {
        let store = SettingsStore::new(MemoryStore::new());
        store.save(SETTINGS_KEY_WIFI, settings).unwrap();
        store
    }

    fn boat() -> WifiSettings {
        WifiSettings {
            ssid: "Boat".into(),
            password: "secret1".into(),
            retry_schedule_secs: vec![1, 2, 4],
            ..WifiSettings::default()
        }
    }

    fn recorder(manager: &mut WifiManager) -> Arc<Mutex<Vec<WifiConnectionState>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        manager.attach(move |state| sink.lock().unwrap().push(state));
        seen.lock().unwrap().clear();
        seen
    }

    #[test]
    fn on_without_ssid_stays_off() {
        let radio = SimRadio::new();
        let mut manager = WifiManager::new(radio.clone(), SettingsStore::new(MemoryStore::new()));
        manager.on();
        assert_eq!(manager.state(), WifiConnectionState::Off);
        assert!(!manager.is_enabled());
        assert_eq!(radio.calls(), vec![RadioCall::Stop]);
    }

    #[test]
    fn enabled_settings_start_the_radio_at_construction() {
        let radio = SimRadio::new();
        let store = store_with(&WifiSettings {
            enabled: true,
            ..boat()
        });
        let manager = WifiManager::new(radio.clone(), store);
        assert_eq!(manager.state(), WifiConnectionState::Connecting);
        assert_eq!(
            radio.calls(),
            vec![RadioCall::Start("Boat".into(), "secret1".into())]
        );
    }

    #[test]
    fn failed_attempts_walk_the_schedule_and_saturate() {
        let radio = SimRadio::new();
        let mut manager = WifiManager::new(radio, store_with(&boat()));
        manager.on();
        let mut now = Instant::now();

        for expected in [1u64, 2, 4, 4, 4] {
            manager.handle_event(RadioEvent::Disconnected, now);
            assert_eq!(manager.state(), WifiConnectionState::Disconnected);
            assert_eq!(manager.next_retry_in(now), Some(Duration::from_secs(expected)));

            // Nothing happens before the wait is over.
            manager.poll(now + Duration::from_secs(expected) - Duration::from_millis(1));
            assert_eq!(manager.state(), WifiConnectionState::Disconnected);

            now += Duration::from_secs(expected);
            manager.poll(now);
            assert_eq!(manager.state(), WifiConnectionState::Connecting);
        }
        assert_eq!(manager.retry_index(), 2);
    }

    #[test]
    fn fresh_attempt_cancels_the_pending_backoff() {
        let radio = SimRadio::new();
        let mut manager = WifiManager::new(radio.clone(), store_with(&boat()));
        let t0 = Instant::now();
        manager.on();
        manager.handle_event(RadioEvent::Disconnected, t0);
        assert!(manager.next_retry_in(t0).is_some());

        manager.on();
        assert_eq!(manager.state(), WifiConnectionState::Connecting);
        assert_eq!(manager.next_retry_in(t0), None);

        manager.poll(t0 + Duration::from_secs(31));
        assert_eq!(manager.state(), WifiConnectionState::Connecting);
        let connects = radio
            .calls()
            .into_iter()
            .filter(|call| *call == RadioCall::Connect)
            .count();
        assert_eq!(connects, 0);
    }

    #[test]
    fn driver_start_during_backoff_cancels_the_timer() {
        let radio = SimRadio::new();
        let mut manager = WifiManager::new(radio.clone(), store_with(&boat()));
        let t0 = Instant::now();
        manager.on();
        manager.handle_event(RadioEvent::Disconnected, t0);

        manager.handle_event(RadioEvent::Started, t0);
        assert_eq!(manager.next_retry_in(t0), None);
        manager.poll(t0 + Duration::from_secs(31));
        assert_eq!(
            radio.calls(),
            vec![
                RadioCall::Start("Boat".into(), "secret1".into()),
                RadioCall::Connect,
            ]
        );
    }

    #[test]
    fn manual_connect_keeps_the_retry_index() {
        let mut manager = WifiManager::new(SimRadio::new(), store_with(&boat()));
        manager.on();
        manager.handle_event(RadioEvent::Disconnected, Instant::now());
        assert_eq!(manager.retry_index(), 1);

        manager.connect_to("Marina", "harbour").unwrap();
        assert_eq!(manager.retry_index(), 1);
        manager.handle_event(RadioEvent::GotAddress(Ipv4Addr::new(192, 168, 4, 2)), Instant::now());
        assert_eq!(manager.retry_index(), 0);
    }

    #[test]
    fn start_failure_restarts_the_radio_after_backoff() {
        let radio = SimRadio::new();
        radio.fail_next_start();
        let mut manager = WifiManager::new(radio.clone(), store_with(&boat()));
        let now = Instant::now();
        manager.on();
        assert_eq!(manager.state(), WifiConnectionState::Disconnected);

        manager.poll(now + Duration::from_secs(2));
        assert_eq!(manager.state(), WifiConnectionState::Connecting);
        let starts = radio
            .calls()
            .into_iter()
            .filter(|call| matches!(call, RadioCall::Start(..)))
            .count();
        assert_eq!(starts, 2);
    }

    #[test]
    fn off_twice_notifies_once() {
        let radio = SimRadio::new();
        let mut manager = WifiManager::new(radio, store_with(&boat()));
        manager.on();
        let seen = recorder(&mut manager);

        manager.off();
        assert_eq!(manager.state(), WifiConnectionState::Off);
        manager.off();
        assert_eq!(manager.state(), WifiConnectionState::Off);

        assert_eq!(*seen.lock().unwrap(), vec![WifiConnectionState::Off]);
    }

    #[test]
    fn attach_replays_current_state() {
        let radio = SimRadio::new();
        let mut manager = WifiManager::new(radio, store_with(&boat()));
        manager.on();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        manager.attach(move |state| sink.lock().unwrap().push(state));
        assert_eq!(*seen.lock().unwrap(), vec![WifiConnectionState::Connecting]);
    }

    #[test]
    fn manual_credentials_are_remembered_after_connecting() {
        let radio = SimRadio::new();
        let store = SettingsStore::new(MemoryStore::new());
        let mut manager = WifiManager::new(radio, store.clone());

        manager.connect_to("Marina", "harbour").unwrap();
        assert!(!manager.is_known("Marina"));
        manager.handle_event(RadioEvent::Started, Instant::now());
        manager.handle_event(RadioEvent::GotAddress(Ipv4Addr::new(192, 168, 4, 2)), Instant::now());

        assert_eq!(manager.get_known_password("Marina"), Some("harbour"));
        let saved: WifiSettings = store.load(SETTINGS_KEY_WIFI);
        assert!(saved.enabled);
        assert_eq!(saved.ssid, "Marina");
        assert_eq!(saved.known_networks.len(), 1);

        assert!(manager.forget("Marina"));
        let saved: WifiSettings = store.load(SETTINGS_KEY_WIFI);
        assert!(saved.known_networks.is_empty());
    }

    #[test]
    fn connect_to_validates_credentials() {
        let mut manager = WifiManager::new(SimRadio::new(), SettingsStore::new(MemoryStore::new()));
        assert_eq!(manager.connect_to("", "pw"), Err(Error::EmptySsid));
        let long_ssid = "s".repeat(WIFI_SSID_MAX + 1);
        assert_eq!(manager.connect_to(&long_ssid, "pw"), Err(Error::SsidTooLong));
        let long_password = "p".repeat(WIFI_PASSWORD_MAX + 1);
        assert_eq!(manager.connect_to("Boat", &long_password), Err(Error::PasswordTooLong));
        assert_eq!(manager.state(), WifiConnectionState::Off);
    }

    #[test]
    fn scan_runs_one_at_a_time() {
        let radio = SimRadio::new();
        let mut manager = WifiManager::new(radio, SettingsStore::new(MemoryStore::new()));
        assert!(manager.scan());
        assert!(!manager.scan());
        assert!(!manager.is_scan_complete());

        let aps = vec![AccessPoint {
            ssid: "Boat".into(),
            rssi: -60,
        }];
        manager.handle_event(RadioEvent::ScanDone(aps.clone()), Instant::now());
        assert!(manager.is_scan_complete());
        assert_eq!(manager.scan_results(), aps.as_slice());
        assert!(manager.scan());
    }

    #[test]
    fn disconnect_while_off_is_ignored() {
        let mut manager = WifiManager::new(SimRadio::new(), SettingsStore::new(MemoryStore::new()));
        manager.handle_event(RadioEvent::Disconnected, Instant::now());
        assert_eq!(manager.state(), WifiConnectionState::Off);
        assert_eq!(manager.next_retry_in(Instant::now()), None);
    }
}
