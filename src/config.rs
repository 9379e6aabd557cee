// SkWatch - Hardware & System Configuration
// Target: Seeed Studio Xiao ESP32-C3 (RISC-V)

use std::time::Duration;

// ---------------------------------------------------------------------------
// GPIO Pin Definitions (Xiao ESP32-C3 pinout)
// ---------------------------------------------------------------------------
pub const PIN_BUTTON: i32 = 3;      // D1/A1 - Power key (INPUT_PULLUP, active LOW)
pub const PIN_HAPTIC: i32 = 4;      // D2/A2 - Haptic motor control
pub const PIN_IMU_INT: i32 = 5;     // D3    - MPU6050 INT (active HIGH)
pub const PIN_I2C_SDA: i32 = 6;     // D4    - I2C data line
pub const PIN_I2C_SCL: i32 = 7;     // D5    - I2C clock line

// ---------------------------------------------------------------------------
// I2C Bus
// ---------------------------------------------------------------------------
pub const I2C_ADDR_MPU6050: u8 = 0x68;
pub const I2C_ADDR_OLED: u8 = 0x3C;
pub const I2C_TIMEOUT_TICKS: u32 = 1000; // FreeRTOS ticks

// ---------------------------------------------------------------------------
// Task Stack Sizes (bytes)
// ---------------------------------------------------------------------------
#[cfg(target_os = "espidf")]
pub const STACK_MAIN_LOOP: usize = 8192;
#[cfg(target_os = "espidf")]
pub const STACK_ASYNC: usize = 8192;

// Host threads unwind and print backtraces; give them the std default.
#[cfg(not(target_os = "espidf"))]
pub const STACK_MAIN_LOOP: usize = 2 * 1024 * 1024;
#[cfg(not(target_os = "espidf"))]
pub const STACK_ASYNC: usize = 2 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Queues
// ---------------------------------------------------------------------------
/// Deferred work queue slots. Must be a power of two (lock-free MPMC ring).
pub const DEFERRED_QUEUE_CAPACITY: usize = 32;
pub const ASYNC_QUEUE_CAPACITY: usize = 32;
pub const ASYNC_TASK_NAME_MAX: usize = 32;

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------
pub const DEFERRED_QUEUE_WAIT: Duration = Duration::from_millis(5);
pub const IDLE_SLICE_MAX: Duration = Duration::from_millis(250);
pub const LOW_POWER_POLL: Duration = Duration::from_millis(500);
pub const LOW_POWER_TICK: Duration = Duration::from_secs(5);
pub const DEFAULT_SCREEN_TIMEOUT_SECS: u32 = 10;
/// Reads of a latched sensor interrupt before giving up on the acknowledge.
pub const IRQ_DRAIN_ATTEMPTS: u32 = 64;

// ---------------------------------------------------------------------------
// Haptics
// ---------------------------------------------------------------------------
pub const VIBRATE_MIN_MS: u64 = 150;
pub const VIBRATE_PULSE_MS: u64 = 100;

// ---------------------------------------------------------------------------
// WiFi
// ---------------------------------------------------------------------------
pub const WIFI_SSID_MAX: usize = 32;
pub const WIFI_PASSWORD_MAX: usize = 64;

/// Manager-level reconnect backoff, in seconds: 0.5, 1, 2, 3, 10, 20, 30, 60 minutes.
pub const DEFAULT_RETRY_SCHEDULE_SECS: [u32; 8] = [30, 60, 120, 180, 600, 1200, 1800, 3600];

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------
pub const NVS_NAMESPACE: &str = "skwatch";
pub const SETTINGS_KEY_HARDWARE: &str = "hardware";
pub const SETTINGS_KEY_WIFI: &str = "wifi";
/// Largest encoded settings record read back from the store.
pub const SETTINGS_BLOB_MAX: usize = 2048;
