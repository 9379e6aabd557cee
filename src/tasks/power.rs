// SkWatch - Main Loop Task
//
// Runs the cooperative main loop (power state machine, GUI, Wi-Fi backoff)
// on its own thread so the boot thread can go on watching the system.

use std::thread::{self, JoinHandle};

use crate::app::Runtime;
use crate::config::*;

pub fn spawn_power_task(runtime: Runtime) -> anyhow::Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("power".into())
        .stack_size(STACK_MAIN_LOOP)
        .spawn(move || power_task(runtime))?;
    Ok(handle)
}

fn power_task(runtime: Runtime) {
    log::info!("Power task started");
    runtime.run()
}
