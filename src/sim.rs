// SkWatch - Simulated Hardware
//
// In-memory collaborators for the host build and the tests. Every part of a
// `SimHardware` board shares one state block, so a test can latch an
// interrupt on the "sensor" and then read back what the runtime did with it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::drivers::{
    Board, DisplayDriver, Gui, Motor, MotionSensor, MotionStatus, PowerChip, PowerStatus,
    SleepControl, TouchPanel, WakeSource,
};
use crate::telemetry::TelemetrySocket;
use crate::wifi::WifiRadio;

fn lock<T>(state: &Mutex<T>) -> MutexGuard<'_, T> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A hardware call, as recorded in the journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HwCall {
    StopTick,
    StartTick,
    BacklightOff,
    BacklightOn,
    DisplaySleep,
    DisplayWakeup,
    TouchLowPower(bool),
    TouchWakeup(bool),
    WakeSource(WakeSource, bool),
    StepIrq(bool),
    MotionAck,
    PowerAck,
    LightSleep,
    Resume,
    TriggerActivity,
}

struct SimState {
    journal: Vec<HwCall>,

    last_activity: Instant,
    transfer_pending: bool,
    gui_runs: u32,
    gui_next: Duration,

    motion_latched: Option<MotionStatus>,
    motion_status: MotionStatus,
    steps: u32,
    double_tap_armed: bool,
    tilt_armed: bool,
    step_irq: bool,

    power_latched: Option<PowerStatus>,
    power_status: PowerStatus,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            journal: Vec::new(),
            last_activity: Instant::now(),
            transfer_pending: false,
            gui_runs: 0,
            gui_next: Duration::from_millis(10),
            motion_latched: None,
            motion_status: MotionStatus::default(),
            steps: 0,
            double_tap_armed: false,
            tilt_armed: false,
            step_irq: false,
            power_latched: None,
            power_status: PowerStatus::default(),
        }
    }
}

/// Controller side of a simulated board.
#[derive(Clone, Default)]
pub struct SimHardware {
    state: Arc<Mutex<SimState>>,
}

impl SimHardware {
    pub fn new() -> Self {
        Self::default()
    }

    /// A board whose parts all report to this controller.
    pub fn board(&self) -> Board {
        Board {
            display: Box::new(SimPart(self.clone())),
            touch: Box::new(SimPart(self.clone())),
            motion: Box::new(SimPart(self.clone())),
            power_chip: Box::new(SimPart(self.clone())),
            gui: Box::new(SimPart(self.clone())),
            sleep: Box::new(SimPart(self.clone())),
        }
    }

    pub fn journal(&self) -> Vec<HwCall> {
        lock(&self.state).journal.clone()
    }

    pub fn clear_journal(&self) {
        lock(&self.state).journal.clear();
    }

    pub fn count(&self, call: &HwCall) -> usize {
        lock(&self.state).journal.iter().filter(|c| *c == call).count()
    }

    /// Pretend the last user interaction was `inactive` ago.
    pub fn set_inactive(&self, inactive: Duration) {
        let now = Instant::now();
        lock(&self.state).last_activity = now.checked_sub(inactive).unwrap_or(now);
    }

    pub fn set_transfer_pending(&self, pending: bool) {
        lock(&self.state).transfer_pending = pending;
    }

    pub fn gui_runs(&self) -> u32 {
        lock(&self.state).gui_runs
    }

    /// Latch a motion interrupt; the next acknowledge reads `status`.
    pub fn latch_motion(&self, status: MotionStatus) {
        lock(&self.state).motion_latched = Some(status);
    }

    pub fn latch_power(&self, status: PowerStatus) {
        lock(&self.state).power_latched = Some(status);
    }

    pub fn set_step_count(&self, steps: u32) {
        lock(&self.state).steps = steps;
    }

    pub fn wake_source_armed(&self, source: WakeSource) -> bool {
        let state = lock(&self.state);
        match source {
            WakeSource::DoubleTap => state.double_tap_armed,
            WakeSource::Tilt => state.tilt_armed,
        }
    }

    pub fn step_irq_enabled(&self) -> bool {
        lock(&self.state).step_irq
    }

    fn record(&self, call: HwCall) {
        lock(&self.state).journal.push(call);
    }

    /// Record `call` and keep the state locked for the caller.
    fn record_locked(&self, call: HwCall) -> MutexGuard<'_, SimState> {
        let mut state = lock(&self.state);
        state.journal.push(call);
        state
    }
}

/// One simulated part; which trait it plays depends on where it is boxed.
struct SimPart(SimHardware);

impl DisplayDriver for SimPart {
    fn stop_tick(&mut self) {
        self.0.record(HwCall::StopTick);
    }

    fn start_tick(&mut self) {
        self.0.record(HwCall::StartTick);
    }

    fn backlight_off(&mut self) {
        self.0.record(HwCall::BacklightOff);
    }

    fn backlight_on(&mut self) {
        self.0.record(HwCall::BacklightOn);
    }

    fn display_sleep(&mut self) -> anyhow::Result<()> {
        self.0.record(HwCall::DisplaySleep);
        Ok(())
    }

    fn display_wakeup(&mut self) -> anyhow::Result<()> {
        self.0.record(HwCall::DisplayWakeup);
        Ok(())
    }
}

impl TouchPanel for SimPart {
    fn set_low_power(&mut self, low_power: bool) -> anyhow::Result<()> {
        self.0.record(HwCall::TouchLowPower(low_power));
        Ok(())
    }

    fn allow_wakeup(&mut self, allow: bool) -> anyhow::Result<()> {
        self.0.record(HwCall::TouchWakeup(allow));
        Ok(())
    }
}

impl MotionSensor for SimPart {
    fn read_and_acknowledge_interrupt(&mut self) -> bool {
        let mut state = self.0.record_locked(HwCall::MotionAck);
        let status = state.motion_latched.take().unwrap_or_default();
        state.motion_status = status;
        true
    }

    fn interrupt_status(&self) -> MotionStatus {
        lock(&self.0.state).motion_status
    }

    fn enable_wake_source(&mut self, source: WakeSource, enable: bool) -> anyhow::Result<()> {
        let mut state = self.0.record_locked(HwCall::WakeSource(source, enable));
        match source {
            WakeSource::DoubleTap => state.double_tap_armed = enable,
            WakeSource::Tilt => state.tilt_armed = enable,
        }
        Ok(())
    }

    fn enable_step_counter_interrupt(&mut self, enable: bool) -> anyhow::Result<()> {
        self.0.record_locked(HwCall::StepIrq(enable)).step_irq = enable;
        Ok(())
    }

    fn step_count(&self) -> u32 {
        lock(&self.0.state).steps
    }
}

impl PowerChip for SimPart {
    fn read_and_acknowledge_interrupt(&mut self) -> bool {
        let mut state = self.0.record_locked(HwCall::PowerAck);
        let status = state.power_latched.take().unwrap_or_default();
        state.power_status = status;
        true
    }

    fn interrupt_status(&self) -> PowerStatus {
        lock(&self.0.state).power_status
    }
}

impl Gui for SimPart {
    fn inactive_time(&self) -> Duration {
        lock(&self.0.state).last_activity.elapsed()
    }

    fn transfer_pending(&self) -> bool {
        lock(&self.0.state).transfer_pending
    }

    fn run_tasks(&mut self) -> Duration {
        let mut state = lock(&self.0.state);
        state.gui_runs += 1;
        state.gui_next
    }

    fn trigger_activity(&mut self) {
        self.0.record_locked(HwCall::TriggerActivity).last_activity = Instant::now();
    }
}

impl SleepControl for SimPart {
    fn light_sleep(&mut self, max: Duration) -> anyhow::Result<()> {
        self.0.record(HwCall::LightSleep);
        thread::sleep(max);
        Ok(())
    }

    fn resume(&mut self) {
        self.0.record(HwCall::Resume);
    }
}

// ---------------------------------------------------------------------------
// Motor
// ---------------------------------------------------------------------------

/// Records every on/off write.
#[derive(Clone, Default)]
pub struct SimMotor {
    writes: Arc<Mutex<Vec<bool>>>,
}

impl SimMotor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> Vec<bool> {
        lock(&self.writes).clone()
    }

    pub fn is_on(&self) -> bool {
        lock(&self.writes).last().copied().unwrap_or(false)
    }
}

impl Motor for SimMotor {
    fn set(&mut self, on: bool) -> anyhow::Result<()> {
        lock(&self.writes).push(on);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Radio
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCall {
    Start(String, String),
    Connect,
    Stop,
    Scan,
}

#[derive(Default)]
struct RadioState {
    calls: Vec<RadioCall>,
    fail_next_start: bool,
}

/// Radio that only records requests; tests feed `RadioEvent`s by hand.
#[derive(Clone, Default)]
pub struct SimRadio {
    state: Arc<Mutex<RadioState>>,
}

impl SimRadio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<RadioCall> {
        lock(&self.state).calls.clone()
    }

    pub fn fail_next_start(&self) {
        lock(&self.state).fail_next_start = true;
    }
}

impl WifiRadio for SimRadio {
    fn start(&mut self, ssid: &str, password: &str) -> anyhow::Result<()> {
        let mut state = lock(&self.state);
        state
            .calls
            .push(RadioCall::Start(ssid.to_owned(), password.to_owned()));
        if std::mem::take(&mut state.fail_next_start) {
            anyhow::bail!("radio did not start");
        }
        Ok(())
    }

    fn connect(&mut self) -> anyhow::Result<()> {
        lock(&self.state).calls.push(RadioCall::Connect);
        Ok(())
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        lock(&self.state).calls.push(RadioCall::Stop);
        Ok(())
    }

    fn start_scan(&mut self) -> anyhow::Result<()> {
        lock(&self.state).calls.push(RadioCall::Scan);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Telemetry socket
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SocketState {
    connected: bool,
    connects: u32,
    disconnects: u32,
    fail_connect: bool,
}

#[derive(Clone, Default)]
pub struct SimSocket {
    state: Arc<Mutex<SocketState>>,
}

impl SimSocket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connects(&self) -> u32 {
        lock(&self.state).connects
    }

    pub fn disconnects(&self) -> u32 {
        lock(&self.state).disconnects
    }

    pub fn set_fail_connect(&self, fail: bool) {
        lock(&self.state).fail_connect = fail;
    }
}

impl TelemetrySocket for SimSocket {
    fn connect(&mut self) -> anyhow::Result<()> {
        let mut state = lock(&self.state);
        state.connects += 1;
        if state.fail_connect {
            anyhow::bail!("telemetry server unreachable");
        }
        state.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        let mut state = lock(&self.state);
        state.disconnects += 1;
        state.connected = false;
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }
}
