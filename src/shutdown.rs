//! Cooperative cancellation.
//!
//! A [`ShutdownToken`] is a shared flag: signal handlers (or tests) set
//! it, the orchestrator polls it at the top of every tick and inside
//! every wait loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::info;

#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    flag: Arc<AtomicBool>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Request shutdown on SIGINT and SIGTERM.
pub fn install_signal_handler(token: &ShutdownToken) -> anyhow::Result<()> {
    let token = token.clone();
    ctrlc::set_handler(move || {
        info!("shutdown signaled");
        token.request();
    })?;
    Ok(())
}
