pub mod models {
    pub mod price;
    pub mod tibber;
}

pub mod client;
pub mod config;
pub mod registers;
pub mod store;
pub mod utils;
pub mod services {
    pub mod fetch;
    pub mod sync;
}

use crate::client::TibberClient;
use crate::config::Config;
use crate::registers::ModbusTcpClient;
use crate::services::{fetch, sync};
use crate::store::PriceStore;
use crossbeam_channel::{Receiver, Sender};
use log::info;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

/// Stop signal shared by the interrupt handler and `run`.
///
/// Dropping the only sender disconnects every receiver, which both loops
/// treat as the stop signal.
#[derive(Debug, Clone)]
struct Shutdown(Arc<Mutex<Option<Sender<()>>>>);

impl Shutdown {
    fn new() -> (Self, Receiver<()>) {
        let (tx, rx) = crossbeam_channel::bounded::<()>(0);
        (Self(Arc::new(Mutex::new(Some(tx)))), rx)
    }

    /// Returns `true` only for the call that actually stopped the loops.
    fn trigger(&self) -> bool {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take().is_some()
    }

    /// Run `body`, then stop the loops however it returned, so threads it
    /// already spawned in a scope exit even when it bails out early.
    fn stop_after<T>(&self, body: impl FnOnce() -> Result<T, String>) -> Result<T, String> {
        let result = body();
        self.trigger();
        result
    }
}

/// Run both control loops until an interrupt arrives.
///
/// The loops share nothing but `store`; each constructs its own transport.
pub fn run(cfg: Config) -> Result<(), String> {
    info!(
        "Config loaded (heatpump={}, unit={}, sync_interval={}s, fetch_align={}min, window={:02}:00-{:02}:00, cheap={}/{}, normal={}/{})",
        cfg.heatpump_endpoint,
        cfg.heatpump_unit_id,
        cfg.sync_interval.as_secs(),
        cfg.fetch.align_minutes,
        cfg.fetch.window_start_hour,
        cfg.fetch.window_end_hour,
        cfg.profiles.cheap.start,
        cfg.profiles.cheap.stop,
        cfg.profiles.normal.start,
        cfg.profiles.normal.stop,
    );

    let (shutdown, shutdown_rx) = Shutdown::new();
    let interrupt = shutdown.clone();
    ctrlc::set_handler(move || {
        if interrupt.trigger() {
            info!("Interrupt received, shutting down");
        }
    })
    .map_err(|e| format!("installing interrupt handler failed: {}", e))?;

    let store = PriceStore::new();
    let feed = TibberClient::new(&cfg.tibber_url, &cfg.tibber_token, cfg.feed_timeout);

    thread::scope(|s| {
        shutdown.stop_after(|| {
            let fetcher = thread::Builder::new()
                .name("price-fetch".into())
                .spawn_scoped(s, || fetch::run_loop(&feed, &store, cfg.fetch, &shutdown_rx))
                .map_err(|e| format!("spawning price fetch loop failed: {}", e))?;

            let syncer = thread::Builder::new()
                .name("heatpump-sync".into())
                .spawn_scoped(s, || {
                    let mut registers =
                        ModbusTcpClient::new(&cfg.heatpump_endpoint, cfg.heatpump_unit_id, cfg.register_timeout);
                    sync::run_loop(&mut registers, &store, &cfg.profiles, cfg.sync_interval, &shutdown_rx)
                })
                .map_err(|e| format!("spawning heat pump sync loop failed: {}", e))?;

            fetcher.join().map_err(|_| "price fetch loop panicked".to_string())?;
            syncer.join().map_err(|_| "heat pump sync loop panicked".to_string())?;
            Ok(())
        })
    })?;

    info!("Stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::RecvError;

    #[test]
    fn trigger_disconnects_receivers_once() {
        let (shutdown, rx) = Shutdown::new();
        let other = rx.clone();
        assert!(shutdown.clone().trigger());
        assert!(!shutdown.trigger());
        assert_eq!(rx.recv(), Err(RecvError));
        assert_eq!(other.recv(), Err(RecvError));
    }

    #[test]
    fn failed_startup_stops_running_loops() {
        let (shutdown, rx) = Shutdown::new();
        let result: Result<(), String> = thread::scope(|s| {
            shutdown.stop_after(|| {
                s.spawn(|| while rx.recv().is_ok() {});
                Err("spawning second loop failed".to_string())
            })
        });
        assert_eq!(result, Err("spawning second loop failed".to_string()));
    }
}
