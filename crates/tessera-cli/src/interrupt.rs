//! Ctrl-C while user code runs stops it instead of killing the shell.
//!
//! The SIGINT handler only sets a flag; a watcher thread turns the flag into
//! a stop request on whichever engine is currently armed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tessera_core::StopHandle;
use tracing::debug;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Routes SIGINT to the stop handle of the running evaluation.
#[derive(Clone)]
pub struct Interrupter {
    slot: Arc<Mutex<Option<StopHandle>>>,
}

impl Interrupter {
    pub fn install() -> Self {
        install_handler();
        let slot: Arc<Mutex<Option<StopHandle>>> = Arc::default();
        let watched = slot.clone();
        let spawned = std::thread::Builder::new()
            .name("tessera-interrupt".into())
            .spawn(move || {
                loop {
                    std::thread::sleep(Duration::from_millis(20));
                    if !INTERRUPTED.swap(false, Ordering::SeqCst) {
                        continue;
                    }
                    let armed = match watched.lock() {
                        Ok(slot) => slot.clone(),
                        Err(poisoned) => poisoned.into_inner().clone(),
                    };
                    if let Some(handle) = armed {
                        debug!("interrupt: stopping running snippet");
                        handle.stop();
                    }
                }
            });
        if let Err(e) = spawned {
            tracing::warn!("cannot start interrupt watcher: {e}");
        }
        Self { slot }
    }

    /// Send interrupts to `handle` until [`disarm`](Self::disarm).
    pub fn arm(&self, handle: StopHandle) {
        INTERRUPTED.store(false, Ordering::SeqCst);
        self.set(Some(handle));
    }

    pub fn disarm(&self) {
        self.set(None);
    }

    fn set(&self, handle: Option<StopHandle>) {
        match self.slot.lock() {
            Ok(mut slot) => *slot = handle,
            Err(poisoned) => *poisoned.into_inner() = handle,
        }
    }
}

#[cfg(unix)]
fn install_handler() {
    extern "C" fn on_sigint(_sig: libc::c_int) {
        INTERRUPTED.store(true, Ordering::SeqCst);
    }

    // SAFETY: the handler only performs an atomic store, which is
    // async-signal-safe.
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = on_sigint as usize;
        sa.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&raw mut sa.sa_mask);
        libc::sigaction(libc::SIGINT, &raw const sa, std::ptr::null_mut());
    }
}

#[cfg(not(unix))]
fn install_handler() {}
