// crates/policy-mirror-core/src/runtime/synchronizer.rs
// ============================================================================
// Module: Policy Mirror Synchronizer
// Description: Watch-driven mirror of stored rules into a live engine.
// Purpose: Keep engines converged with peer writes without write-back loops.
// Dependencies: thiserror, tokio, tokio-util, tracing, crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! A [`Synchronizer`] opens a watch on one scope, replays the initial
//! snapshot into a [`PolicyEngine`] through self-mutation calls, and keeps
//! applying live events on one background task. [`Synchronizer::start`]
//! returns only after the snapshot-complete marker has been applied.
//!
//! State moves `Created -> Starting -> Syncing -> Synced -> Stopped` and is
//! published through a `tokio::sync::watch` channel. A stopped instance
//! cannot be restarted.
//!
//! Cancellation is cooperative through one [`CancellationToken`] shared by
//! the feed task and the start barrier. Dropping the synchronizer cancels it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::core::RuleObject;
use crate::core::Scope;
use crate::interfaces::ObjectBackend;
use crate::interfaces::PolicyEngine;
use crate::interfaces::StoreError;
use crate::interfaces::WatchEvent;
use crate::runtime::client::StoreClient;
use crate::runtime::client::TypedWatch;
use crate::runtime::registry::KindRegistry;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Default time allowed for the initial snapshot.
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(30);

/// Synchronizer settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynchronizerConfig {
    /// Time allowed for the initial snapshot before `start` fails.
    pub sync_timeout: Duration,
    /// Leave the engine's auto-save and auto-notify flags untouched.
    pub skip_disable_auto: bool,
}

impl Default for SynchronizerConfig {
    fn default() -> Self {
        Self {
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
            skip_disable_auto: false,
        }
    }
}

// ============================================================================
// SECTION: State
// ============================================================================

/// Lifecycle state of a synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncState {
    /// Constructed, not started.
    Created,
    /// Opening the watch feed.
    Starting,
    /// Initial snapshot in flight.
    Syncing,
    /// Initial snapshot applied; live events flowing.
    Synced,
    /// Feed ended. Terminal.
    Stopped,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Synchronizer errors.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Operation is not valid in the current state.
    #[error("synchronizer cannot start from state {0}")]
    InvalidState(SyncState),
    /// Watch feed could not be opened or failed.
    #[error("synchronizer watch error: {0}")]
    Watch(#[from] StoreError),
    /// Initial snapshot did not complete in time.
    #[error("synchronizer initial sync timed out after {0} ms")]
    BarrierTimeout(u128),
    /// Canceled before the initial snapshot completed.
    #[error("synchronizer canceled before initial sync completed")]
    Canceled,
    /// Watch feed ended unexpectedly.
    #[error("synchronizer watch feed closed")]
    FeedClosed,
    /// Background task panicked or was aborted.
    #[error("synchronizer task failed: {0}")]
    Join(String),
}

// ============================================================================
// SECTION: Event Handlers
// ============================================================================

/// Observer applying rule lifecycle events to an engine.
///
/// Handlers run sequentially on the synchronizer task and receive the engine
/// explicitly on every call. Failures are the handler's to log; they never
/// stop the feed.
pub trait RuleEventHandler: Send + Sync {
    /// Applies an added rule object.
    fn on_add(&self, engine: &dyn PolicyEngine, object: &RuleObject, initial: bool);

    /// Applies a changed rule object.
    fn on_update(&self, engine: &dyn PolicyEngine, old: &RuleObject, new: &RuleObject);

    /// Applies a removed rule object.
    fn on_delete(&self, engine: &dyn PolicyEngine, object: &RuleObject);
}

/// Default handler mirroring rule objects into engine rules.
///
/// Objects carrying a soft-delete marker are treated as already gone: an
/// addition of a marked object is skipped and a change that sets the marker
/// removes the rule.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineMirror;

impl RuleEventHandler for EngineMirror {
    fn on_add(&self, engine: &dyn PolicyEngine, object: &RuleObject, initial: bool) {
        let key = object.metadata.name.as_str();
        if object.metadata.is_deleting() {
            debug!(key, initial, "skipping rule marked for deletion");
            return;
        }
        let params = object.spec.policy_params();
        if initial {
            debug!(key, ptype = %params.ptype, rule = ?params.rule, "replaying rule");
        } else {
            info!(key, ptype = %params.ptype, rule = ?params.rule, "rule added");
        }
        if let Err(err) = engine.self_add_policy(&params.section, &params.ptype, &params.rule) {
            error!(key, error = %err, "failed to add rule");
        }
    }

    fn on_update(&self, engine: &dyn PolicyEngine, old: &RuleObject, new: &RuleObject) {
        let key = new.metadata.name.as_str();
        let old_params = old.spec.policy_params();
        if old.metadata.is_deleting() {
            debug!(key, "ignoring change to rule marked for deletion");
            return;
        }
        if new.metadata.is_deleting() {
            info!(key, ptype = %old_params.ptype, rule = ?old_params.rule, "rule marked for deletion");
            if let Err(err) = engine.self_remove_policy(&old_params.section, &old_params.ptype, &old_params.rule) {
                error!(key, error = %err, "failed to remove rule");
            }
            return;
        }
        let new_params = new.spec.policy_params();
        if old_params == new_params {
            debug!(key, "rule metadata changed");
            return;
        }
        info!(
            key,
            old_rule = ?old_params.rule,
            new_rule = ?new_params.rule,
            "rule updated"
        );
        let result = if old_params.section == new_params.section && old_params.ptype == new_params.ptype {
            engine.self_update_policy(&new_params.section, &new_params.ptype, &old_params.rule, &new_params.rule)
        } else {
            engine
                .self_remove_policy(&old_params.section, &old_params.ptype, &old_params.rule)
                .and_then(|_| engine.self_add_policy(&new_params.section, &new_params.ptype, &new_params.rule))
        };
        if let Err(err) = result {
            error!(key, error = %err, "failed to update rule");
        }
    }

    fn on_delete(&self, engine: &dyn PolicyEngine, object: &RuleObject) {
        let key = object.metadata.name.as_str();
        let params = object.spec.policy_params();
        info!(key, ptype = %params.ptype, rule = ?params.rule, "rule deleted");
        match engine.self_remove_policy(&params.section, &params.ptype, &params.rule) {
            Ok(true) => {}
            Ok(false) => debug!(key, "deleted rule was not loaded"),
            Err(err) => error!(key, error = %err, "failed to remove rule"),
        }
    }
}

// ============================================================================
// SECTION: Synchronizer
// ============================================================================

/// Watch-driven rule mirror for one engine.
pub struct Synchronizer {
    /// Settings.
    config: SynchronizerConfig,
    /// Backend to watch.
    backend: Arc<dyn ObjectBackend>,
    /// Kind registry used to build the store client.
    registry: KindRegistry,
    /// Engine receiving self-mutations.
    engine: Arc<dyn PolicyEngine>,
    /// Event observer.
    handler: Arc<dyn RuleEventHandler>,
    /// Token shared by the feed task and the start barrier.
    cancel: CancellationToken,
    /// Published lifecycle state.
    state: watch::Sender<SyncState>,
    /// Feed task, once started.
    task: Option<JoinHandle<Result<(), SyncError>>>,
}

impl Synchronizer {
    /// Creates a synchronizer for `engine`.
    ///
    /// Unless `config.skip_disable_auto` is set, the engine's auto-save and
    /// auto-notify behaviors are switched off so mirrored rules are never
    /// written back to the store.
    #[must_use]
    pub fn new(
        config: SynchronizerConfig,
        backend: Arc<dyn ObjectBackend>,
        registry: &KindRegistry,
        engine: Arc<dyn PolicyEngine>,
    ) -> Self {
        if !config.skip_disable_auto {
            engine.enable_auto_save(false);
            engine.enable_auto_notify_watcher(false);
        }
        let (state, _) = watch::channel(SyncState::Created);
        Self {
            config,
            backend,
            registry: registry.clone(),
            engine,
            handler: Arc::new(EngineMirror),
            cancel: CancellationToken::new(),
            state,
            task: None,
        }
    }

    /// Replaces the event handler.
    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn RuleEventHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    /// Subscribes to state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// Returns a clone of the cancellation token.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Opens the feed for `scope` and waits for the initial snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidState`] unless the synchronizer is freshly
    /// created, [`SyncError::Watch`] when the feed cannot be opened,
    /// [`SyncError::BarrierTimeout`] or [`SyncError::Canceled`] when the
    /// snapshot does not complete. Any failure leaves the instance stopped.
    pub async fn start(&mut self, scope: Scope) -> Result<(), SyncError> {
        let current = self.state();
        if current != SyncState::Created {
            return Err(SyncError::InvalidState(current));
        }
        self.state.send_replace(SyncState::Starting);
        info!(scope = %scope, "starting rule synchronizer");

        let feed = match StoreClient::<RuleObject>::new(Arc::clone(&self.backend), &self.registry, scope.clone())
            .and_then(|client| client.watch())
        {
            Ok(feed) => feed,
            Err(err) => {
                error!(scope = %scope, error = %err, "failed to open rule watch");
                self.shutdown();
                return Err(SyncError::Watch(err));
            }
        };

        self.state.send_replace(SyncState::Syncing);
        let (synced_tx, synced_rx) = oneshot::channel();
        let task = FeedTask {
            feed,
            engine: Arc::clone(&self.engine),
            handler: Arc::clone(&self.handler),
            cancel: self.cancel.clone(),
            state: self.state.clone(),
            synced: Some(synced_tx),
            scope: scope.clone(),
        };
        self.task = Some(tokio::spawn(task.run()));

        let timeout = self.config.sync_timeout;
        let waited = tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            waited = tokio::time::timeout(timeout, synced_rx) => Some(waited),
        };
        let outcome = match waited {
            None => Err(SyncError::Canceled),
            Some(Ok(Ok(()))) => Ok(()),
            Some(Ok(Err(_))) => Err(self.feed_failure().await),
            Some(Err(_)) => Err(SyncError::BarrierTimeout(timeout.as_millis())),
        };
        match outcome {
            Ok(()) => {
                info!(scope = %scope, "rule synchronizer synced");
                Ok(())
            }
            Err(err) => {
                warn!(scope = %scope, error = %err, "rule synchronizer failed to start");
                self.shutdown();
                Err(err)
            }
        }
    }

    /// Cancels the feed. Idempotent; safe before `start`.
    pub fn stop(&self) {
        self.shutdown();
    }

    /// Waits for the feed task to finish and returns its outcome.
    ///
    /// Returns `Ok(())` when the task was never started or already joined.
    ///
    /// # Errors
    ///
    /// Returns the task's terminal [`SyncError`] or [`SyncError::Join`].
    pub async fn join(&mut self) -> Result<(), SyncError> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        task.await.map_err(|err| SyncError::Join(err.to_string()))?
    }

    /// Returns true when a started feed task has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_some_and(JoinHandle::is_finished)
    }

    /// Cancels the token and marks the instance stopped.
    fn shutdown(&self) {
        self.cancel.cancel();
        self.state.send_replace(SyncState::Stopped);
    }

    /// Recovers the error that ended the feed before the barrier fired.
    async fn feed_failure(&mut self) -> SyncError {
        match self.join().await {
            Err(err) => err,
            Ok(()) => SyncError::FeedClosed,
        }
    }
}

impl Drop for Synchronizer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ============================================================================
// SECTION: Feed Task
// ============================================================================

/// State moved onto the background feed task.
struct FeedTask {
    /// Typed watch feed.
    feed: TypedWatch<RuleObject>,
    /// Engine receiving self-mutations.
    engine: Arc<dyn PolicyEngine>,
    /// Event observer.
    handler: Arc<dyn RuleEventHandler>,
    /// Shared cancellation token.
    cancel: CancellationToken,
    /// Published lifecycle state.
    state: watch::Sender<SyncState>,
    /// Barrier signal, consumed at snapshot completion.
    synced: Option<oneshot::Sender<()>>,
    /// Watched scope, for logging.
    scope: Scope,
}

impl FeedTask {
    /// Applies events until canceled or the feed ends.
    async fn run(mut self) -> Result<(), SyncError> {
        let result = loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break Ok(()),
                next = self.feed.next() => next,
            };
            match next {
                Some(Ok(event)) => self.dispatch(event),
                Some(Err(err)) => {
                    error!(scope = %self.scope, error = %err, "rule watch failed");
                    break Err(SyncError::Watch(err));
                }
                None => {
                    warn!(scope = %self.scope, "rule watch closed");
                    break Err(SyncError::FeedClosed);
                }
            }
        };
        self.state.send_replace(SyncState::Stopped);
        info!(scope = %self.scope, "rule synchronizer stopped");
        result
    }

    /// Routes one event to the handler.
    fn dispatch(&mut self, event: WatchEvent<RuleObject>) {
        let engine = self.engine.as_ref();
        match event {
            WatchEvent::Added {
                object,
                initial,
            } => self.handler.on_add(engine, &object, initial),
            WatchEvent::Modified {
                old,
                new,
            } => self.handler.on_update(engine, &old, &new),
            WatchEvent::Deleted {
                object,
            } => self.handler.on_delete(engine, &object),
            WatchEvent::SnapshotComplete => {
                if let Some(synced) = self.synced.take() {
                    self.state.send_replace(SyncState::Synced);
                    if synced.send(()).is_err() {
                        debug!(scope = %self.scope, "start barrier already abandoned");
                    }
                }
            }
        }
    }
}
