use crate::registers::{self, Readings, RegisterClient, RegisterError};
use crate::store::PriceStore;
use crate::utils::is_same_hour;
use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, select, tick};
use log::{error, info};
use std::time::Duration;

/// Tap water start/stop temperatures in whole °C.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HeatPumpProfile {
    pub start: i16,
    pub stop: i16,
}

impl HeatPumpProfile {
    fn matches(&self, readings: &Readings) -> bool {
        readings.start == f64::from(self.start) && readings.stop == f64::from(self.stop)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Profiles {
    pub cheap: HeatPumpProfile,
    pub normal: HeatPumpProfile,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ProfileKind {
    Cheap,
    Normal,
}

impl ProfileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileKind::Cheap => "cheap",
            ProfileKind::Normal => "normal",
        }
    }
}

impl Profiles {
    pub fn get(&self, kind: ProfileKind) -> HeatPumpProfile {
        match kind {
            ProfileKind::Cheap => self.cheap,
            ProfileKind::Normal => self.normal,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    InSync { profile: ProfileKind, tank: f64 },
    Updated { profile: ProfileKind, previous: Readings },
}

/// Cheap during the stored cheapest hour, normal otherwise (including when
/// no cheapest hour has been decided yet).
pub fn target_profile(store: &PriceStore, now: DateTime<Utc>) -> ProfileKind {
    match store.cheapest_hour() {
        Some(hour) if is_same_hour(now, hour) => ProfileKind::Cheap,
        _ => ProfileKind::Normal,
    }
}

/// One reconciliation pass: read, compare, write only on difference.
///
/// Any register error aborts the pass. The next pass re-reads the device and
/// re-applies the full profile, which also repairs a partial write.
pub fn sync_once<C: RegisterClient + ?Sized>(
    client: &mut C,
    store: &PriceStore,
    profiles: &Profiles,
    now: DateTime<Utc>,
) -> Result<SyncOutcome, RegisterError> {
    let readings = registers::read_readings(client)?;
    let kind = target_profile(store, now);
    let target = profiles.get(kind);

    if target.matches(&readings) {
        info!(
            "Heat pump already in sync (profile={}, start={}, stop={}, tank={})",
            kind.as_str(),
            readings.start,
            readings.stop,
            readings.tank
        );
        return Ok(SyncOutcome::InSync {
            profile: kind,
            tank: readings.tank,
        });
    }

    registers::write_setpoints(client, target.start, target.stop)?;
    info!(
        "Updated heat pump temperatures (profile={}, start={} -> {}, stop={} -> {}, tank={})",
        kind.as_str(),
        readings.start,
        target.start,
        readings.stop,
        target.stop,
        readings.tank
    );
    Ok(SyncOutcome::Updated {
        profile: kind,
        previous: readings,
    })
}

/// Reconcile on a fixed interval until `shutdown` fires or disconnects.
///
/// The ticker holds at most one pending tick, so a slow pass coalesces
/// missed ticks instead of queueing them.
pub fn run_loop<C: RegisterClient + ?Sized>(
    client: &mut C,
    store: &PriceStore,
    profiles: &Profiles,
    interval: Duration,
    shutdown: &Receiver<()>,
) {
    let ticker = tick(interval);
    loop {
        select! {
            recv(shutdown) -> _ => {
                info!("Heat pump sync loop stopping");
                return;
            }
            recv(ticker) -> _ => {
                if let Err(e) = sync_once(client, store, profiles, Utc::now()) {
                    error!("Heat pump sync failed: {}", e);
                }
            }
        }
    }
}
