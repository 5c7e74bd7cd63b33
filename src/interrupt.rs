//! Termination flag shared between the signal handler and the serve loop.
//!
//! SIGINT and SIGTERM (ctrlc "termination" feature) only flip the flag; the
//! drain/flush itself runs on the main thread, so tests can trigger the same
//! path with `set_interrupted()` and no real signal.

use anyhow::{anyhow, Result};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

#[derive(Clone, Debug, Default)]
pub struct InterruptState {
    interrupted: Arc<AtomicBool>,
}

impl InterruptState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_interrupted(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Block until interrupted, polling every `tick`.
    pub fn wait(&self, tick: Duration) {
        while !self.is_interrupted() {
            std::thread::sleep(tick);
        }
    }
}

/// Install the process-wide handler. May be called once per process.
pub fn set_up_process_interrupt_handler() -> Result<InterruptState> {
    let state = InterruptState::new();
    let flag = state.clone();
    ctrlc::set_handler(move || {
        flag.set_interrupted();
    })
    .map_err(|e| anyhow!("install termination handler: {}", e))?;
    Ok(state)
}
