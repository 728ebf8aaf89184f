//! Sync orchestrator: the public entry point of the coordinator.
//!
//! Owns scheduling (debounce and coalescing), the single-flight run lock,
//! the realtime listener lifecycle, and the status published to observers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::SyncSettings;
use crate::conflict::{ConflictPolicy, LocalAuthoritativePolicy};
use crate::engine::{CancelFlag, DownSync, RunContext, UpSync};
use crate::error::{Error, Result};
use crate::models::{ActorId, SyncMode, SyncReport, SyncRunId, SyncSchema, SyncStatus};
use crate::realtime::{RealtimeListener, SyncTrigger};
use crate::remote::RemoteClient;
use crate::store::LocalStore;
use crate::util::now_millis;
use crate::version::{VersionCheck, VersionGate};

/// Explicitly constructed coordinator over one store, remote, and schema.
///
/// Cloning yields another handle to the same coordinator.
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    store: LocalStore,
    remote: Arc<dyn RemoteClient>,
    schema: SyncSchema,
    actor: ActorId,
    settings: SyncSettings,
    policy: Arc<dyn ConflictPolicy>,
    down: DownSync,
    up: UpSync,
    trigger: SyncTrigger,
    run_lock: tokio::sync::Mutex<()>,
    last_run_id: AtomicU64,
    current_run: Mutex<Option<CancelFlag>>,
    status: watch::Sender<SyncStatus>,
    last_report: Mutex<Option<SyncReport>>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
    listener: tokio::sync::Mutex<Option<RealtimeListener>>,
    shutting_down: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SyncOrchestrator")
            .field("actor", &self.inner.actor)
            .field("schema", &self.inner.schema)
            .field("status", &*self.inner.status.borrow())
            .finish_non_exhaustive()
    }
}

impl SyncOrchestrator {
    pub fn new(
        store: LocalStore,
        remote: Arc<dyn RemoteClient>,
        schema: SyncSchema,
        actor: ActorId,
        settings: SyncSettings,
    ) -> Self {
        Self::build(
            store,
            remote,
            schema,
            actor,
            settings,
            Arc::new(LocalAuthoritativePolicy),
        )
    }

    /// Replace the conflict policy. Call before `start`.
    #[must_use]
    pub fn with_policy(self, policy: Arc<dyn ConflictPolicy>) -> Self {
        let inner = &self.inner;
        Self::build(
            inner.store.clone(),
            Arc::clone(&inner.remote),
            inner.schema.clone(),
            inner.actor.clone(),
            inner.settings.clone(),
            policy,
        )
    }

    fn build(
        store: LocalStore,
        remote: Arc<dyn RemoteClient>,
        schema: SyncSchema,
        actor: ActorId,
        settings: SyncSettings,
        policy: Arc<dyn ConflictPolicy>,
    ) -> Self {
        let settings = settings.normalized();
        let down = DownSync::new(
            store.clone(),
            Arc::clone(&remote),
            schema.clone(),
            actor.clone(),
            Arc::clone(&policy),
            settings.retry,
        );
        let up = UpSync::new(
            store.clone(),
            Arc::clone(&remote),
            schema.clone(),
            settings.retry,
        );
        let (status, _) = watch::channel(SyncStatus::Idle);

        Self {
            inner: Arc::new(Inner {
                store,
                remote,
                schema,
                actor,
                settings,
                policy,
                down,
                up,
                trigger: SyncTrigger::new(),
                run_lock: tokio::sync::Mutex::new(()),
                last_run_id: AtomicU64::new(0),
                current_run: Mutex::new(None),
                status,
                last_report: Mutex::new(None),
                scheduler: Mutex::new(None),
                listener: tokio::sync::Mutex::new(None),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn store(&self) -> &LocalStore {
        &self.inner.store
    }

    pub fn schema(&self) -> &SyncSchema {
        &self.inner.schema
    }

    pub fn actor(&self) -> &ActorId {
        &self.inner.actor
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.inner.settings
    }

    pub fn policy_name(&self) -> &'static str {
        self.inner.policy.name()
    }

    /// Handle for requesting syncs from elsewhere, e.g. after local edits.
    pub fn trigger(&self) -> SyncTrigger {
        self.inner.trigger.clone()
    }

    /// Check the version gate (if any) and start the debounce scheduler.
    ///
    /// Requests made before `start` are kept and run once it is called.
    pub async fn start(&self, gate: Option<&VersionGate>) -> Result<Option<VersionCheck>> {
        self.ensure_accepting()?;
        let check = match gate {
            Some(gate) => Some(gate.ensure_compatible(self.inner.remote.as_ref()).await?),
            None => None,
        };

        let mut scheduler = lock(&self.inner.scheduler);
        if scheduler.is_none() {
            *scheduler = Some(tokio::spawn(self.clone().schedule()));
            tracing::info!(
                debounce_ms = u64::try_from(self.inner.settings.debounce.as_millis())
                    .unwrap_or(u64::MAX),
                "Sync scheduler started"
            );
        }
        Ok(check)
    }

    /// Ask for a coalesced background sync. Never blocks.
    ///
    /// Returns `false` once shutdown has begun.
    pub fn request_sync(&self) -> bool {
        self.inner.trigger.request()
    }

    /// Down-sync from the checkpoint, then push pending records.
    pub async fn sync(&self) -> Result<SyncReport> {
        self.execute(SyncMode::Incremental).await
    }

    /// Re-fetch everything, reconcile orphans, then push pending records.
    pub async fn full_sync(&self) -> Result<SyncReport> {
        self.execute(SyncMode::Full).await
    }

    /// Push records in the failed state again.
    pub async fn retry_sync(&self) -> Result<SyncReport> {
        self.execute(SyncMode::RetryFailed).await
    }

    /// Make the next `sync` fetch every remote row (without the orphan pass).
    pub async fn reset_last_sync_time(&self) -> Result<()> {
        let cleared = self.inner.store.clear_checkpoints(&self.inner.actor).await?;
        tracing::info!(actor = %self.inner.actor, cleared, "Cleared sync checkpoints");
        Ok(())
    }

    /// Latest down-sync checkpoint across entity types (Unix ms).
    pub async fn last_sync_time(&self) -> Result<Option<i64>> {
        let mut latest = None;
        for table in self.inner.schema.tables() {
            let checkpoint = self.inner.store.checkpoint(&self.inner.actor, table).await?;
            latest = latest.max(checkpoint);
        }
        Ok(latest)
    }

    pub async fn start_listening(&self) -> Result<()> {
        self.ensure_accepting()?;
        let mut listener = self.inner.listener.lock().await;
        if listener.as_ref().is_some_and(RealtimeListener::is_running) {
            return Ok(());
        }
        if let Some(stale) = listener.take() {
            stale.stop().await;
        }
        *listener = Some(RealtimeListener::spawn(
            Arc::clone(&self.inner.remote),
            self.inner.settings.realtime_topic.clone(),
            self.inner.actor.clone(),
            self.inner.trigger.clone(),
            self.inner.settings.realtime_reconnect,
        ));
        Ok(())
    }

    pub async fn stop_listening(&self) {
        if let Some(listener) = self.inner.listener.lock().await.take() {
            listener.stop().await;
        }
    }

    /// Observe realtime events while listening.
    pub async fn realtime_events(
        &self,
    ) -> Option<tokio::sync::broadcast::Receiver<crate::realtime::RealtimeEvent>> {
        self.inner
            .listener
            .lock()
            .await
            .as_ref()
            .map(RealtimeListener::events)
    }

    pub async fn is_listening(&self) -> bool {
        self.inner
            .listener
            .lock()
            .await
            .as_ref()
            .is_some_and(RealtimeListener::is_running)
    }

    pub fn status(&self) -> SyncStatus {
        self.inner.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status.subscribe()
    }

    pub fn last_report(&self) -> Option<SyncReport> {
        lock(&self.inner.last_report).clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Tear down in order: stop accepting requests, wait for the in-flight
    /// run (cancelling it after `shutdown_timeout`), close the realtime
    /// subscription, release the store.
    pub async fn shutdown(&self) -> Result<()> {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!("Shutting down sync coordinator");
        self.inner.trigger.close();

        let timeout = self.inner.settings.shutdown_timeout;
        let run_guard = match tokio::time::timeout(timeout, self.inner.run_lock.lock()).await {
            Ok(guard) => guard,
            Err(_) => {
                tracing::warn!("In-flight sync exceeded the shutdown timeout, cancelling it");
                if let Some(cancel) = lock(&self.inner.current_run).as_ref() {
                    cancel.cancel();
                }
                self.inner.run_lock.lock().await
            }
        };

        let scheduler = lock(&self.inner.scheduler).take();
        if let Some(scheduler) = scheduler {
            scheduler.abort();
            let _ = scheduler.await;
        }

        self.stop_listening().await;
        self.inner.store.close().await?;
        drop(run_guard);

        tracing::info!("Sync coordinator stopped");
        Ok(())
    }

    fn ensure_accepting(&self) -> Result<()> {
        if self.is_shutting_down() {
            Err(Error::ShuttingDown)
        } else {
            Ok(())
        }
    }

    async fn schedule(self) {
        let trigger = self.inner.trigger.clone();
        let debounce = self.inner.settings.debounce;

        loop {
            trigger.notified().await;
            if !trigger.is_accepting() {
                break;
            }
            tokio::time::sleep(debounce).await;
            if !trigger.is_accepting() {
                break;
            }
            if !trigger.take_pending() {
                continue;
            }

            match self.execute(SyncMode::Incremental).await {
                Ok(_) => {}
                Err(Error::ShuttingDown) => break,
                Err(error) => tracing::warn!("Scheduled sync failed: {error}"),
            }
        }
        tracing::debug!("Sync scheduler exited");
    }

    /// Run one pass under the single-flight lock.
    async fn execute(&self, mode: SyncMode) -> Result<SyncReport> {
        self.ensure_accepting()?;
        let _run_guard = self.inner.run_lock.lock().await;
        self.ensure_accepting()?;

        let run_id = SyncRunId::new(self.inner.last_run_id.fetch_add(1, Ordering::SeqCst) + 1);
        let ctx = RunContext::new(run_id, mode);
        *lock(&self.inner.current_run) = Some(ctx.cancel.clone());
        self.inner.status.send_replace(SyncStatus::Syncing { run_id });
        tracing::info!(run_id = %run_id, ?mode, "Sync run started");

        let result = self.run_passes(&ctx).await;
        *lock(&self.inner.current_run) = None;

        match result {
            Ok(report) => {
                let status = match report.error_summary() {
                    None => SyncStatus::Ok {
                        run_id,
                        at: report.finished_at,
                    },
                    Some(message) => {
                        tracing::warn!(run_id = %run_id, "Sync run finished with errors: {message}");
                        SyncStatus::Error { run_id, message }
                    }
                };
                tracing::info!(
                    run_id = %run_id,
                    pushed = report.pushed_records(),
                    failed = report.failed_records(),
                    "Sync run finished"
                );
                self.inner.status.send_replace(status);
                *lock(&self.inner.last_report) = Some(report.clone());
                Ok(report)
            }
            Err(error) => {
                tracing::error!(run_id = %run_id, "Sync run failed: {error}");
                self.inner.status.send_replace(SyncStatus::Error {
                    run_id,
                    message: error.to_string(),
                });
                Err(error)
            }
        }
    }

    async fn run_passes(&self, ctx: &RunContext) -> Result<SyncReport> {
        let mut report = SyncReport::new(ctx.run_id, ctx.mode, now_millis());
        if ctx.mode != SyncMode::RetryFailed {
            report.down = self.inner.down.run(ctx).await?;
        }
        report.up = self.inner.up.run(ctx).await?;
        report.finished_at = now_millis();
        Ok(report)
    }
}
