//! The exclusive lease and its renewal scheduler.
//!
//! A lock is `Idle` until a conditional write claims its key, `Held` while a
//! background task keeps pushing the key's expiry forward, and back to `Idle`
//! on release or as soon as a renewal fails. A failed renewal gives the lock
//! up (abdication) rather than let this process believe it holds a lease it
//! can no longer extend.
//!
//! `acquire`, `release`, manual renewals, and abdication all run under one
//! async mutex that also owns the scheduler handle. Release cancels the
//! scheduler and waits for it to exit before deleting the key, so a renewal
//! can never land after the delete and resurrect a lease someone else may have
//! claimed since.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{LockOptions, LockSettings};
use crate::error::{LockError, LockResult, StoreOp};
use crate::models::{self, EVENT_CHANNEL_SIZE, LockEvent, LockInspection};
use crate::store::LeaseStore;

/// Result of a single renewal attempt.
#[derive(Debug, Clone)]
pub enum RenewOutcome {
    /// The lock is not held; nothing was sent to the store.
    NotHeld,
    /// A previous renewal has not settled yet; this attempt was skipped.
    InFlight,
    /// The key's expiry was reset to the full TTL.
    Renewed,
    /// Renewal failed and the lock was given up.
    Abdicated(LockError),
}

/// An exclusive, store-backed lease on a named resource.
///
/// Owned by whoever created it. The store handle may be shared with any
/// number of other locks.
pub struct ExclusiveLock<S> {
    shared: Arc<Shared<S>>,
}

struct Shared<S> {
    settings: LockSettings,
    store: S,
    held: AtomicBool,
    renewing: AtomicBool,
    /// Serializes acquire, release, and abdication; holds the running
    /// scheduler, if any.
    scheduler: Mutex<Option<Renewer>>,
    events: broadcast::Sender<LockEvent>,
}

struct Renewer {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Clears the in-flight flag when dropped, including when a renewal future is
/// cancelled mid-flight.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn enter(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Renewer {
    fn spawn<S: LeaseStore>(shared: Arc<Shared<S>>) -> Self {
        let token = CancellationToken::new();
        let handle = tokio::spawn(renewal_loop(shared, token.clone()));
        Self { token, handle }
    }

    /// Cancel and wait until the task has exited.
    async fn stop(self) {
        self.token.cancel();
        if let Err(err) = self.handle.await {
            if !err.is_cancelled() {
                error!(?err, "renewal task panicked");
            }
        }
    }

    /// Cancel and abort without waiting.
    fn abort(self) {
        self.token.cancel();
        self.handle.abort();
    }

    /// The scheduler giving itself up: cancel the token and let the task run
    /// to completion.
    fn abort_self(self) {
        self.token.cancel();
    }
}

async fn renewal_loop<S: LeaseStore>(shared: Arc<Shared<S>>, token: CancellationToken) {
    let period = shared.settings.renewal_interval();
    // a period too large to schedule never ticks
    let Some(start) = time::Instant::now().checked_add(period) else {
        token.cancelled().await;
        return;
    };
    let mut ticker = time::interval_at(start, period);
    // a tick that comes due while the previous one is still running is dropped
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let res = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            res = shared.renew_once() => res,
        };
        if let Err(err) = res {
            shared.abdicate(err, &token).await;
            break;
        }
    }
    debug!(key = %shared.settings.key(), "renewal task stopping");
}

impl<S: LeaseStore> Shared<S> {
    fn emit(&self, event: LockEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Reset the key's expiry to the full TTL. The caller holds the in-flight
    /// guard.
    async fn reset_expiry(&self) -> LockResult<()> {
        let key = self.settings.key();
        let ttl = self.settings.ttl();
        self.store
            .reset_expiry(key, ttl)
            .await
            .map_err(|err| LockError::store(StoreOp::ResetExpiry, key, err))?;

        debug!(key, ttl_ms = ttl.as_millis() as u64, "lock renewed");
        self.emit(LockEvent::Renewed {
            key: key.to_owned(),
            ttl,
        });
        Ok(())
    }

    /// One scheduled renewal.
    async fn renew_once(&self) -> LockResult<RenewOutcome> {
        if !self.held.load(Ordering::Acquire) {
            return Ok(RenewOutcome::NotHeld);
        }
        let Some(_in_flight) = InFlight::enter(&self.renewing) else {
            debug!(key = %self.settings.key(), "renewal already in flight, skipping");
            return Ok(RenewOutcome::InFlight);
        };
        self.reset_expiry().await?;
        Ok(RenewOutcome::Renewed)
    }

    fn renewal_failed(&self, err: LockError) {
        let key = self.settings.key();
        error!(?err, key, "could not renew lock, abdicating");
        self.emit(LockEvent::RenewalFailed {
            key: key.to_owned(),
            error: err,
        });
    }

    /// Give the lock up from the renewal task after a failed renewal.
    async fn abdicate(&self, err: LockError, token: &CancellationToken) {
        self.renewal_failed(err);
        let mut scheduler = tokio::select! {
            biased;
            // a release is already tearing us down and owns the delete
            _ = token.cancelled() => return,
            guard = self.scheduler.lock() => guard,
        };
        if !self.held.load(Ordering::Acquire) {
            return;
        }
        if let Some(renewer) = scheduler.take() {
            renewer.abort_self();
        }
        self.remove_after_failure().await;
    }

    /// Delete the key and go idle after a failed renewal. Must run under the
    /// scheduler lock with the scheduler already stopped. Never returns an
    /// error; a failed delete is logged and published instead.
    async fn remove_after_failure(&self) {
        let key = self.settings.key();
        let res = self.store.delete(key).await;
        self.held.store(false, Ordering::Release);
        match res {
            Ok(()) => {
                info!(key, "lock removed after failed renewal");
                self.emit(LockEvent::Released {
                    key: key.to_owned(),
                });
            }
            Err(err) => {
                let err = LockError::store(StoreOp::Delete, key, err);
                error!(?err, key, "could not remove lock after failed renewal");
                self.emit(LockEvent::ReleaseFailed {
                    key: key.to_owned(),
                    error: err,
                });
            }
        }
    }
}

impl<S: LeaseStore> ExclusiveLock<S> {
    /// Validate `options` and bind a lock to `store`. Fails before any store
    /// access if the options are invalid.
    pub fn new(options: &LockOptions, store: S) -> LockResult<Self> {
        let settings = options.validate().inspect_err(|err| {
            error!(%err, "invalid lock options");
        })?;
        Ok(Self::with_settings(settings, store))
    }

    /// Bind a lock to `store` using already validated settings.
    pub fn with_settings(settings: LockSettings, store: S) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            shared: Arc::new(Shared {
                settings,
                store,
                held: AtomicBool::new(false),
                renewing: AtomicBool::new(false),
                scheduler: Mutex::new(None),
                events,
            }),
        }
    }

    /// The store key this lock claims.
    pub fn key(&self) -> &str {
        self.shared.settings.key()
    }

    pub fn settings(&self) -> &LockSettings {
        &self.shared.settings
    }

    pub fn store(&self) -> &S {
        &self.shared.store
    }

    /// Whether this instance currently believes it holds the lock.
    pub fn is_held(&self) -> bool {
        self.shared.held.load(Ordering::Acquire)
    }

    /// Whether a renewal round-trip is pending.
    pub fn is_renewing(&self) -> bool {
        self.shared.renewing.load(Ordering::Acquire)
    }

    /// Whether a renewal scheduler is running.
    pub async fn is_renewal_scheduled(&self) -> bool {
        self.shared.scheduler.lock().await.is_some()
    }

    /// Subscribe to state transitions from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LockEvent> {
        self.shared.events.subscribe()
    }

    /// Try to claim the lock.
    ///
    /// Returns `Ok(true)` if this call (or an earlier one) holds the lock and
    /// `Ok(false)` if another holder owns it. A store error means the outcome
    /// is unknown: the caller must assume neither ownership nor its absence.
    pub async fn acquire(&self) -> LockResult<bool> {
        let mut scheduler = self.shared.scheduler.lock().await;
        let settings = &self.shared.settings;
        let key = settings.key();
        if self.is_held() {
            warn!(key, "lock is already acquired, release it first");
            return Ok(true);
        }
        if let Some(stale) = scheduler.take() {
            stale.stop().await;
        }

        let created = self
            .shared
            .store
            .set_if_absent(key, settings.payload(), settings.ttl())
            .await
            .map_err(|err| LockError::store(StoreOp::SetIfAbsent, key, err))?;
        if !created {
            debug!(key, "lock is held elsewhere");
            return Ok(false);
        }

        self.shared.held.store(true, Ordering::Release);
        if settings.auto_renew() {
            *scheduler = Some(Renewer::spawn(Arc::clone(&self.shared)));
        }
        info!(
            key,
            contents = %settings.payload(),
            ttl_ms = settings.ttl().as_millis() as u64,
            renewal_interval_ms = settings.renewal_interval().as_millis() as u64,
            "lock acquired"
        );
        self.shared.emit(LockEvent::Acquired {
            key: key.to_owned(),
        });
        Ok(true)
    }

    /// Push the key's expiry forward once.
    ///
    /// The background scheduler renews the same way on every tick; this is
    /// for callers running with `auto_renew` disabled. The round trip runs
    /// under the same lock as `acquire` and `release`, so a release waits for
    /// it and a failure can only abdicate the lease it was renewing.
    pub async fn renew(&self) -> RenewOutcome {
        if !self.is_held() {
            return RenewOutcome::NotHeld;
        }
        let Some(_in_flight) = InFlight::enter(&self.shared.renewing) else {
            debug!(key = self.key(), "renewal already in flight, skipping");
            return RenewOutcome::InFlight;
        };
        let mut scheduler = self.shared.scheduler.lock().await;
        // released while we waited
        if !self.is_held() {
            return RenewOutcome::NotHeld;
        }
        match self.shared.reset_expiry().await {
            Ok(()) => RenewOutcome::Renewed,
            Err(err) => {
                self.shared.renewal_failed(err.clone());
                if let Some(renewer) = scheduler.take() {
                    renewer.stop().await;
                }
                self.shared.remove_after_failure().await;
                RenewOutcome::Abdicated(err)
            }
        }
    }

    /// Give the lock up.
    ///
    /// Stops the scheduler, then deletes the key. The lock is `Idle`
    /// afterwards even if the delete fails; the error is returned because the
    /// key may linger until it expires.
    pub async fn release(&self) -> LockResult<()> {
        let mut scheduler = self.shared.scheduler.lock().await;
        if !self.is_held() {
            return Ok(());
        }
        if let Some(renewer) = scheduler.take() {
            renewer.stop().await;
        }

        let key = self.key();
        let res = self.shared.store.delete(key).await;
        self.shared.held.store(false, Ordering::Release);
        match res {
            Ok(()) => {
                info!(key, "lock removed");
                self.shared.emit(LockEvent::Released {
                    key: key.to_owned(),
                });
                Ok(())
            }
            Err(err) => {
                let err = LockError::store(StoreOp::Delete, key, err);
                error!(?err, key, "error removing lock");
                self.shared.emit(LockEvent::ReleaseFailed {
                    key: key.to_owned(),
                    error: err.clone(),
                });
                Err(err)
            }
        }
    }

    /// Read back the stored contents and remaining TTL of a held lock.
    ///
    /// `None` while idle, without contacting the store. Corrupt contents come
    /// back raw and an empty batch comes back with every field absent.
    pub async fn inspect(&self) -> LockResult<Option<LockInspection>> {
        if !self.is_held() {
            return Ok(None);
        }
        let key = self.key();
        let stored = self
            .shared
            .store
            .batch_read(key)
            .await
            .map_err(|err| LockError::store(StoreOp::BatchRead, key, err))?;
        let Some(stored) = stored else {
            warn!(key, "lock inspection returned no result");
            return Ok(Some(LockInspection::default()));
        };
        Ok(Some(LockInspection {
            contents: stored.value.map(|raw| models::decode(key, raw)),
            remaining_ttl: stored.remaining_ttl,
        }))
    }
}

impl<S> Drop for ExclusiveLock<S> {
    fn drop(&mut self) {
        // the key is left to expire on its own
        if let Ok(mut scheduler) = self.shared.scheduler.try_lock() {
            if let Some(renewer) = scheduler.take() {
                renewer.abort();
            }
        }
    }
}

impl<S> fmt::Debug for ExclusiveLock<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExclusiveLock")
            .field("key", &self.shared.settings.key())
            .field("held", &self.shared.held.load(Ordering::Acquire))
            .field("renewing", &self.shared.renewing.load(Ordering::Acquire))
            .finish()
    }
}
