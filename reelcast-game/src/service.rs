//! Async shell around [`FishingEngine`]: serialized access, the background
//! flush worker, legendary side effects and signal-driven shutdown.
use log::{debug, error, info, warn};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use crate::catch::Timestamp;
use crate::engine::{ActionResult, CastOptions, EngineError, FishingEngine};
use crate::legendary::{ArtifactGenerator, Broadcaster, LegendaryConfig, LegendaryNotice, broadcast, resolve_artifact};
use crate::persistence::{StateStorage, write_snapshot};
use crate::state::{CommunityId, GlobalStats, LeaderboardEntry, LeaderboardKey, PlayerId, PlayerSummary};

/// Wall-clock source, swappable in tests.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> Timestamp;
}

/// UTC system time in milliseconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Timestamp {
        chrono::Utc::now().timestamp_millis()
    }
}

/// External side-effect ports used for legendary catches.
#[derive(Clone)]
pub struct Collaborators {
    pub artifacts: Arc<dyn ArtifactGenerator>,
    pub broadcaster: Arc<dyn Broadcaster>,
}

/// Shared, serialized access to one engine.
///
/// The engine mutex is the single serialization point: actions for one player
/// run in submission order, and the flush worker only ever writes a snapshot
/// cloned under the lock. A separate write lock keeps storage single-writer
/// while the engine lock is released during I/O.
pub struct EngineHandle<S: StateStorage + 'static> {
    engine: Arc<Mutex<FishingEngine<S>>>,
    clock: Arc<dyn Clock>,
    collaborators: Collaborators,
    legendary: LegendaryConfig,
    tasks: std::sync::Mutex<JoinSet<()>>,
    writes: Arc<Mutex<()>>,
    stop: watch::Sender<bool>,
    flush_worker: JoinHandle<()>,
}

impl<S: StateStorage + 'static> EngineHandle<S> {
    /// Take ownership of an engine and start the flush worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(mut engine: FishingEngine<S>, collaborators: Collaborators, clock: Arc<dyn Clock>) -> Self {
        engine.set_flush_on_action(false);
        let interval_ms = u64::try_from(engine.config().flush_interval_ms).unwrap_or(1).max(1);
        let legendary = engine.config().legendary.clone();
        let engine = Arc::new(Mutex::new(engine));
        let writes = Arc::new(Mutex::new(()));
        let (stop, stopped) = watch::channel(false);
        let flush_worker = tokio::spawn(flush_loop(
            Arc::clone(&engine),
            Arc::clone(&writes),
            Arc::clone(&clock),
            Duration::from_millis(interval_ms),
            stopped,
        ));
        Self {
            engine,
            clock,
            collaborators,
            legendary,
            tasks: std::sync::Mutex::new(JoinSet::new()),
            writes,
            stop,
            flush_worker,
        }
    }

    /// Run one action. Legendary records are written with the catch; their
    /// artifact and broadcast side effects are spawned and never awaited here.
    ///
    /// # Errors
    ///
    /// Propagates [`EngineError`] from the engine.
    pub async fn attempt_catch(
        &self,
        player: &PlayerId,
        community: &CommunityId,
        display_name: &str,
        options: CastOptions,
    ) -> Result<ActionResult, EngineError> {
        let now = self.clock.now_ms();
        let result = self
            .engine
            .lock()
            .await
            .attempt_catch(player, community, display_name, options, now)?;
        if let ActionResult::Caught(report) = &result {
            for notice in &report.legendary {
                self.spawn_legendary(notice.clone());
            }
        }
        Ok(result)
    }

    fn spawn_legendary(&self, notice: LegendaryNotice) {
        let engine = Arc::clone(&self.engine);
        let collaborators = self.collaborators.clone();
        let config = self.legendary.clone();
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        while let Some(finished) = tasks.try_join_next() {
            if let Err(err) = finished {
                warn!("legendary side-effect task failed: {err}");
            }
        }
        tasks.spawn(async move {
            let artifact = resolve_artifact(&notice, collaborators.artifacts.as_ref(), &config).await;
            if let Some(artifact) = &artifact {
                engine
                    .lock()
                    .await
                    .attach_artifact(notice.record_index, artifact.reference.clone());
            }
            broadcast(&notice, artifact.as_ref(), collaborators.broadcaster.as_ref(), &config).await;
        });
    }

    /// Run a closure against the engine under the lock.
    pub async fn with_engine<T>(&self, f: impl FnOnce(&mut FishingEngine<S>) -> T) -> T {
        let mut engine = self.engine.lock().await;
        f(&mut engine)
    }

    pub async fn player_summary(&self, player: &PlayerId) -> Option<PlayerSummary> {
        let now = self.clock.now_ms();
        self.engine.lock().await.player_summary(player, now)
    }

    pub async fn community_leaderboard(
        &self,
        community: &CommunityId,
        key: LeaderboardKey,
        limit: usize,
    ) -> Vec<LeaderboardEntry> {
        self.engine.lock().await.community_leaderboard(community, key, limit)
    }

    pub async fn global_stats(&self) -> GlobalStats {
        self.engine.lock().await.global_stats()
    }

    pub async fn reset_community(&self, community: &CommunityId) -> bool {
        self.engine.lock().await.reset_community(community)
    }

    /// # Errors
    ///
    /// Returns [`EngineError::UnknownPlayer`] for a player never seen.
    pub async fn adjust_resource_pool(&self, player: &PlayerId, delta: i64) -> Result<u32, EngineError> {
        let now = self.clock.now_ms();
        self.engine.lock().await.adjust_resource_pool(player, delta, now)
    }

    /// Flush now on the worker path (snapshot under lock, write off-lock).
    pub async fn flush_now(&self) {
        flush_once(&self.engine, &self.writes, self.clock.as_ref()).await;
    }

    /// Stop the worker, drain legendary tasks (bounded), then write the final
    /// state synchronously. Records of abandoned tasks keep no artifact.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Persist`] if the final write fails.
    pub async fn shutdown(self) -> Result<u64, EngineError> {
        let _ = self.stop.send(true);
        if let Err(err) = self.flush_worker.await {
            warn!("flush worker ended abnormally: {err}");
        }

        let mut tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        let drain = Duration::from_millis(self.legendary.shutdown_drain_ms);
        let drained = tokio::time::timeout(drain, async {
            while let Some(finished) = tasks.join_next().await {
                if let Err(err) = finished {
                    warn!("legendary side-effect task failed: {err}");
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!("abandoning {} pending legendary tasks at shutdown", tasks.len());
            tasks.abort_all();
        }

        let _writer = self.writes.lock().await;
        let now = self.clock.now_ms();
        let digest = self.engine.lock().await.force_flush(now)?;
        info!("final state flushed on shutdown (digest {digest:016x})");
        Ok(digest)
    }

    /// Wait for interrupt, terminate or quit, then shut down.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Persist`] if the final write fails.
    pub async fn run_until_shutdown_signal(self) -> Result<u64, EngineError> {
        shutdown_signal().await;
        self.shutdown().await
    }
}

async fn flush_loop<S: StateStorage + 'static>(
    engine: Arc<Mutex<FishingEngine<S>>>,
    writes: Arc<Mutex<()>>,
    clock: Arc<dyn Clock>,
    period: Duration,
    mut stopped: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => flush_once(&engine, &writes, clock.as_ref()).await,
            changed = stopped.changed() => {
                if changed.is_err() || *stopped.borrow() {
                    debug!("flush worker stopping");
                    break;
                }
            }
        }
    }
}

async fn flush_once<S: StateStorage + 'static>(
    engine: &Arc<Mutex<FishingEngine<S>>>,
    writes: &Mutex<()>,
    clock: &dyn Clock,
) {
    // Held from snapshot to completion so writes land in generation order.
    let _writer = writes.lock().await;
    let prepared = engine.lock().await.prepare_flush();
    let Some((ticket, snapshot, storage)) = prepared else {
        return;
    };
    let result = tokio::task::spawn_blocking(move || write_snapshot(storage.as_ref(), &snapshot))
        .await
        .unwrap_or_else(|err| Err(err.into()));
    engine.lock().await.finish_flush(ticket, result, clock.now_ms());
}

/// Resolve when the process receives ctrl-c, or SIGTERM / SIGQUIT on unix.
pub async fn shutdown_signal() {
    let interrupt = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("cannot listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match (signal(SignalKind::terminate()), signal(SignalKind::quit())) {
            (Ok(mut term), Ok(mut quit)) => {
                tokio::select! {
                    _ = term.recv() => {}
                    _ = quit.recv() => {}
                }
            }
            _ => {
                error!("cannot listen for termination signals");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => info!("interrupt received, shutting down"),
        () = terminate => info!("termination signal received, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{LootCatalog, default_catalog};
    use crate::config::EngineConfig;
    use crate::legendary::{Artifact, CollaboratorError, MessageRef};
    use crate::persistence::{FullState, MemoryStorage, PersistenceError};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};

    struct ManualClock(AtomicI64);

    impl Clock for ManualClock {
        fn now_ms(&self) -> Timestamp {
            self.0.load(Ordering::SeqCst)
        }
    }

    struct StaticArtifacts;

    #[async_trait::async_trait]
    impl ArtifactGenerator for StaticArtifacts {
        async fn generate(&self, prompt: &str) -> Result<Option<Artifact>, CollaboratorError> {
            Ok(Some(Artifact {
                reference: format!("img:{}", prompt.len()),
            }))
        }
    }

    struct StalledArtifacts;

    #[async_trait::async_trait]
    impl ArtifactGenerator for StalledArtifacts {
        async fn generate(&self, _prompt: &str) -> Result<Option<Artifact>, CollaboratorError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(Some(Artifact {
                reference: String::from("too-late"),
            }))
        }
    }

    /// Counts writes that start while another is still in progress.
    #[derive(Default)]
    struct ContendedStorage {
        active: AtomicUsize,
        overlaps: AtomicUsize,
        writes: AtomicUsize,
    }

    impl StateStorage for ContendedStorage {
        type Error = PersistenceError;

        fn load_all(&self) -> Result<FullState, Self::Error> {
            Ok(FullState::default())
        }

        fn atomic_write(&self, _bytes: &[u8]) -> Result<(), Self::Error> {
            if self.active.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            std::thread::sleep(Duration::from_millis(40));
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Fails every write until marked healthy.
    #[derive(Default)]
    struct FlakyStorage {
        healthy: AtomicBool,
        attempts: AtomicUsize,
        inner: MemoryStorage,
    }

    impl StateStorage for FlakyStorage {
        type Error = PersistenceError;

        fn load_all(&self) -> Result<FullState, Self::Error> {
            self.inner.load_all()
        }

        fn atomic_write(&self, bytes: &[u8]) -> Result<(), Self::Error> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if !self.healthy.load(Ordering::SeqCst) {
                return Err(PersistenceError::Io {
                    path: PathBuf::from("/dev/full"),
                    source: std::io::Error::other("disk full"),
                });
            }
            self.inner.atomic_write(bytes)
        }
    }

    struct SilentBroadcaster;

    #[async_trait::async_trait]
    impl Broadcaster for SilentBroadcaster {
        async fn publish(
            &self,
            target: &str,
            _artifact: Option<&Artifact>,
            _caption: &str,
        ) -> Result<MessageRef, CollaboratorError> {
            Ok(MessageRef {
                target: target.to_string(),
                id: String::from("1"),
            })
        }

        async fn pin(&self, _message: &MessageRef, _duration_ms: u64) -> Result<(), CollaboratorError> {
            Ok(())
        }
    }

    fn rare_only_catalog() -> LootCatalog {
        let mut catalog = default_catalog().clone();
        catalog.junk_chance = 0.0;
        catalog.upgrades.clear();
        catalog.downgrades.clear();
        catalog.rare_species[0].chance = 1.0;
        catalog
    }

    fn quick_flush_config() -> EngineConfig {
        EngineConfig {
            flush_interval_ms: 20,
            ..EngineConfig::default()
        }
    }

    async fn eventually<S: StateStorage + 'static>(
        handle: &EngineHandle<S>,
        check: impl Fn(&FishingEngine<S>) -> bool,
    ) -> bool {
        for _ in 0..200 {
            if handle.with_engine(|engine| check(engine)).await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    fn collaborators() -> Collaborators {
        Collaborators {
            artifacts: Arc::new(StaticArtifacts),
            broadcaster: Arc::new(SilentBroadcaster),
        }
    }

    #[tokio::test]
    async fn legendary_record_is_appended_with_artifact() {
        let engine =
            FishingEngine::init(MemoryStorage::new(), EngineConfig::default(), rare_only_catalog(), 3, 0).unwrap();
        let clock = Arc::new(ManualClock(AtomicI64::new(1_000)));
        let handle = EngineHandle::start(engine, collaborators(), clock);

        let player = PlayerId::from("mira");
        let result = handle
            .attempt_catch(&player, &CommunityId::from("lake"), "Mira", CastOptions::default())
            .await
            .unwrap();
        let report = result.report().unwrap();
        assert!(report.catches[0].is_rare);
        assert_eq!(report.legendary.len(), 1);

        assert_eq!(report.legendary[0].record_index, 0);
        assert!(
            eventually(&handle, |engine| {
                engine.legendary_records().iter().all(|r| r.artifact_ref.is_some())
            })
            .await
        );
        let records = handle.with_engine(|engine| engine.legendary_records().to_vec()).await;
        assert_eq!(records.len(), 1);
        assert!(records[0].artifact_ref.as_deref().is_some_and(|r| r.starts_with("img:")));

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn flush_now_writes_snapshot_and_clears_dirty() {
        let engine = FishingEngine::init(
            MemoryStorage::new(),
            EngineConfig::default(),
            default_catalog().clone(),
            5,
            0,
        )
        .unwrap();
        let clock = Arc::new(ManualClock(AtomicI64::new(0)));
        let handle = EngineHandle::start(engine, collaborators(), clock.clone());
        let player = PlayerId::from("ana");
        let community = CommunityId::from("lake");
        handle
            .attempt_catch(&player, &community, "Ana", CastOptions::default())
            .await
            .unwrap();
        assert!(handle.with_engine(|engine| engine.is_dirty()).await);

        handle.flush_now().await;
        assert!(!handle.with_engine(|engine| engine.is_dirty()).await);

        let second = handle
            .attempt_catch(&player, &community, "Ana", CastOptions::default())
            .await
            .unwrap();
        assert!(second.is_rejected());

        clock.0.store(45_000, Ordering::SeqCst);
        let third = handle
            .attempt_catch(&player, &community, "Ana", CastOptions::default())
            .await
            .unwrap();
        assert!(!third.is_rejected());
        let expected = handle.with_engine(|engine| engine.state_digest()).await;
        assert_eq!(handle.shutdown().await.unwrap(), expected);
    }

    #[tokio::test]
    async fn shutdown_keeps_records_of_abandoned_artifacts() {
        let mut config = EngineConfig::default();
        config.legendary.shutdown_drain_ms = 50;
        let engine = FishingEngine::init(MemoryStorage::new(), config, rare_only_catalog(), 3, 0).unwrap();
        let collaborators = Collaborators {
            artifacts: Arc::new(StalledArtifacts),
            broadcaster: Arc::new(SilentBroadcaster),
        };
        let handle = EngineHandle::start(engine, collaborators, Arc::new(ManualClock(AtomicI64::new(1_000))));
        let storage = handle.with_engine(|engine| engine.storage()).await;

        let result = handle
            .attempt_catch(&PlayerId::from("mira"), &CommunityId::from("lake"), "Mira", CastOptions::default())
            .await
            .unwrap();
        assert_eq!(result.report().unwrap().legendary.len(), 1);
        handle.shutdown().await.unwrap();

        let reloaded = storage.load_all().unwrap();
        assert_eq!(reloaded.legendary_records.len(), 1);
        let record = &reloaded.legendary_records[0];
        assert_eq!(record.species, "Golden Koi");
        assert_eq!(record.artifact_ref, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn overlapping_flushes_write_one_at_a_time() {
        let engine = FishingEngine::init(
            ContendedStorage::default(),
            EngineConfig::default(),
            default_catalog().clone(),
            5,
            0,
        )
        .unwrap();
        let handle = EngineHandle::start(engine, collaborators(), Arc::new(ManualClock(AtomicI64::new(0))));
        let storage = handle.with_engine(|engine| engine.storage()).await;
        handle
            .attempt_catch(&PlayerId::from("ana"), &CommunityId::from("lake"), "Ana", CastOptions::default())
            .await
            .unwrap();

        tokio::join!(handle.flush_now(), handle.flush_now(), handle.flush_now());
        assert_eq!(storage.overlaps.load(Ordering::SeqCst), 0);
        assert_eq!(storage.writes.load(Ordering::SeqCst), 1);
        assert!(!handle.with_engine(|engine| engine.is_dirty()).await);

        handle.shutdown().await.unwrap();
        assert_eq!(storage.overlaps.load(Ordering::SeqCst), 0);
        assert_eq!(storage.writes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn worker_flushes_dirty_state_on_its_interval() {
        let engine = FishingEngine::init(
            MemoryStorage::new(),
            quick_flush_config(),
            default_catalog().clone(),
            9,
            0,
        )
        .unwrap();
        let handle = EngineHandle::start(engine, collaborators(), Arc::new(ManualClock(AtomicI64::new(0))));
        let storage = handle.with_engine(|engine| engine.storage()).await;
        handle
            .attempt_catch(&PlayerId::from("ana"), &CommunityId::from("lake"), "Ana", CastOptions::default())
            .await
            .unwrap();

        assert!(eventually(&handle, |engine| !engine.is_dirty()).await);
        assert!(storage.writes() >= 1);
        let expected = handle.with_engine(|engine| engine.state_digest()).await;
        assert_eq!(storage.load_all().unwrap().digest(), expected);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn worker_keeps_retrying_failed_flushes() {
        let engine = FishingEngine::init(
            FlakyStorage::default(),
            quick_flush_config(),
            default_catalog().clone(),
            9,
            0,
        )
        .unwrap();
        let handle = EngineHandle::start(engine, collaborators(), Arc::new(ManualClock(AtomicI64::new(0))));
        let storage = handle.with_engine(|engine| engine.storage()).await;
        handle
            .attempt_catch(&PlayerId::from("ana"), &CommunityId::from("lake"), "Ana", CastOptions::default())
            .await
            .unwrap();

        assert!(eventually(&handle, |engine| engine.storage().attempts.load(Ordering::SeqCst) >= 2).await);
        assert!(handle.with_engine(|engine| engine.is_dirty()).await);
        assert_eq!(storage.inner.writes(), 0);

        storage.healthy.store(true, Ordering::SeqCst);
        assert!(eventually(&handle, |engine| !engine.is_dirty()).await);
        assert_eq!(storage.inner.writes(), 1);
        handle.shutdown().await.unwrap();
    }

    #[test]
    fn system_clock_is_past_2020() {
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }
}
