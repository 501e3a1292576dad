use anyhow::{Context, Result};
use async_trait::async_trait;
use log::info;
use reelcast_game::{
    Artifact, ArtifactGenerator, Broadcaster, CastOptions, Clock, CollaboratorError, Collaborators,
    EngineHandle, FishingEngine, MessageRef, StateStorage, Timestamp,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use tokio::task::JoinSet;

use crate::logic::{SimulationConfig, SimulationReport};

/// Clock advanced by the driver between rounds.
#[derive(Debug, Default)]
pub struct SimulatedClock(AtomicI64);

impl SimulatedClock {
    pub fn set(&self, now: Timestamp) {
        self.0.store(now, Ordering::SeqCst);
    }
}

impl Clock for SimulatedClock {
    fn now_ms(&self) -> Timestamp {
        self.0.load(Ordering::SeqCst)
    }
}

/// Artifact port that fabricates a reference from the prompt and logs it.
#[derive(Debug, Default)]
pub struct LoggingArtifacts {
    issued: AtomicU64,
}

#[async_trait]
impl ArtifactGenerator for LoggingArtifacts {
    async fn generate(&self, prompt: &str) -> Result<Option<Artifact>, CollaboratorError> {
        let id = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        info!("artifact #{id} requested: {prompt}");
        Ok(Some(Artifact {
            reference: format!("artifact-{id:04}"),
        }))
    }
}

/// Notification port that writes captions to the log.
#[derive(Debug, Default)]
pub struct LoggingBroadcaster {
    published: AtomicU64,
}

impl LoggingBroadcaster {
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Broadcaster for LoggingBroadcaster {
    async fn publish(
        &self,
        target: &str,
        artifact: Option<&Artifact>,
        caption: &str,
    ) -> Result<MessageRef, CollaboratorError> {
        let id = self.published.fetch_add(1, Ordering::SeqCst) + 1;
        let attachment = artifact.map_or("no artifact", |a| a.reference.as_str());
        info!("[{target}] {caption} ({attachment})");
        Ok(MessageRef {
            target: target.to_string(),
            id: id.to_string(),
        })
    }

    async fn pin(&self, message: &MessageRef, duration_ms: u64) -> Result<(), CollaboratorError> {
        info!("[{}] pinned message {} for {duration_ms}ms", message.target, message.id);
        Ok(())
    }
}

/// Outcome of a service-mode run.
#[derive(Debug, Clone)]
pub struct ServiceRun {
    pub report: SimulationReport,
    /// Legendary captions published across all targets.
    pub broadcasts: u64,
}

/// Drive an engine through the async handle: each round every player casts
/// concurrently, then the simulated clock moves on. Ends with a graceful
/// shutdown whose digest lands in the report.
///
/// # Errors
///
/// Returns an error if an action fails, a task panics, or the final flush fails.
pub async fn run_service_simulation<S: StateStorage + 'static>(
    engine: FishingEngine<S>,
    config: &SimulationConfig,
) -> Result<ServiceRun> {
    let mut report = SimulationReport {
        weight_threshold: engine.catalog().weights.threshold,
        ..SimulationReport::default()
    };
    let clock = Arc::new(SimulatedClock::default());
    clock.set(config.start_ms);
    let broadcaster = Arc::new(LoggingBroadcaster::default());
    let collaborators = Collaborators {
        artifacts: Arc::new(LoggingArtifacts::default()),
        broadcaster: broadcaster.clone(),
    };
    let handle = Arc::new(EngineHandle::start(engine, collaborators, clock.clone()));
    let players = config.player_ids();
    let communities = config.community_ids();
    let mut now = config.start_ms;

    for _ in 0..config.rounds {
        clock.set(now);
        let mut casts = JoinSet::new();
        for (index, player) in players.iter().enumerate() {
            let handle = Arc::clone(&handle);
            let player = player.clone();
            let community = communities[index % communities.len()].clone();
            casts.spawn(async move {
                handle
                    .attempt_catch(&player, &community, player.as_str(), CastOptions::default())
                    .await
            });
        }
        while let Some(joined) = casts.join_next().await {
            let result = joined.context("cast task panicked")??;
            report.observe(&result);
        }
        if let Err(err) = handle.with_engine(|engine| engine.audit()).await {
            report.invariant_failures.push(err.to_string());
        }
        now += config.step_ms;
    }

    let handle = Arc::into_inner(handle).context("engine handle still shared after the run")?;
    let digest = handle.shutdown().await?;
    report.digest = digest;
    Ok(ServiceRun {
        report,
        broadcasts: broadcaster.published(),
    })
}
