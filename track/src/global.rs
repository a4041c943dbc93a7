//! Process-wide tracker, shut down by an `atexit` hook.

use std::sync::{Mutex, PoisonError};

use lazy_static::lazy_static;

use crate::{Tracker, TrackerConfig};

/// Failure to install the process-wide tracker.
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("a process-wide tracker is already installed")]
    AlreadyInstalled,
    #[error("could not register the exit hook")]
    HookRegistration,
}

lazy_static! {
    static ref GLOBAL: Mutex<Option<Tracker>> = Mutex::new(None);
}

extern "C" fn shutdown_at_exit() {
    if let Some(tracker) = tracker() {
        std::mem::drop(tracker.shutdown());
    }
}

/// Install the process-wide tracker and register its shutdown to run at normal process exit.
pub fn install(config: TrackerConfig) -> Result<Tracker, InstallError> {
    let mut global = GLOBAL.lock().unwrap_or_else(PoisonError::into_inner);
    if global.is_some() {
        return Err(InstallError::AlreadyInstalled);
    }
    if unsafe { libc::atexit(shutdown_at_exit) } != 0 {
        return Err(InstallError::HookRegistration);
    }
    let tracker = Tracker::new(config);
    *global = Some(tracker.clone());
    log::debug!("installed process-wide allocation tracker");
    Ok(tracker)
}

/// The installed tracker, if any.
pub fn tracker() -> Option<Tracker> {
    GLOBAL
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}
