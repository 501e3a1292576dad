//! Legendary registry: append-only records of rare catches and the
//! best-effort artifact and broadcast side effects that accompany them.
use serde::{Deserialize, Serialize};

use crate::catch::{Catch, Timestamp};
use crate::constants::{ARTIFACT_TIMEOUT_MS, LEGENDARY_DRAIN_TIMEOUT_MS, PIN_DURATION_MS};
use crate::state::{CommunityId, PlayerId};

/// Durable log entry for a rare-species catch. Appended when the catch lands;
/// only `artifact_ref` is filled in afterwards, at most once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegendaryRecord {
    pub species: String,
    pub weight: f64,
    pub player_id: PlayerId,
    pub display_name: String,
    pub community_id: CommunityId,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub artifact_ref: Option<String>,
}

/// A rare catch waiting for its side effects to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegendaryNotice {
    pub catch: Catch,
    pub player_id: PlayerId,
    pub display_name: String,
    pub community_id: CommunityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decoration: Option<String>,
    /// Position of the matching record in the legendary log.
    #[serde(default)]
    pub record_index: usize,
}

impl LegendaryNotice {
    /// Text handed to the artifact generator.
    #[must_use]
    pub fn prompt(&self) -> String {
        let mut prompt = format!(
            "A triumphant angler named {} holding a legendary {} weighing {:.2} kg, golden hour light over the water",
            self.display_name, self.catch.species, self.catch.weight
        );
        if let Some(decoration) = &self.decoration {
            prompt.push_str(", themed around ");
            prompt.push_str(decoration);
        }
        prompt
    }

    /// Broadcast caption.
    #[must_use]
    pub fn caption(&self) -> String {
        format!(
            "🏆 LEGENDARY CATCH! {} landed a {} weighing {:.2} kg in {}!",
            self.display_name, self.catch.species, self.catch.weight, self.community_id
        )
    }

    #[must_use]
    pub fn to_record(&self, artifact_ref: Option<String>) -> LegendaryRecord {
        LegendaryRecord {
            species: self.catch.species.clone(),
            weight: self.catch.weight,
            player_id: self.player_id.clone(),
            display_name: self.display_name.clone(),
            community_id: self.community_id.clone(),
            timestamp: self.catch.timestamp,
            artifact_ref,
        }
    }
}

/// Where and how long legendary announcements are shown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegendaryConfig {
    #[serde(default)]
    pub broadcast_targets: Vec<String>,
    /// Zero disables pinning.
    #[serde(default = "LegendaryConfig::default_pin_duration_ms")]
    pub pin_duration_ms: u64,
    #[serde(default = "LegendaryConfig::default_artifact_timeout_ms")]
    pub artifact_timeout_ms: u64,
    /// How long shutdown waits for pending side effects before abandoning them.
    #[serde(default = "LegendaryConfig::default_shutdown_drain_ms")]
    pub shutdown_drain_ms: u64,
}

impl LegendaryConfig {
    const fn default_pin_duration_ms() -> u64 {
        PIN_DURATION_MS
    }

    const fn default_artifact_timeout_ms() -> u64 {
        ARTIFACT_TIMEOUT_MS
    }

    const fn default_shutdown_drain_ms() -> u64 {
        LEGENDARY_DRAIN_TIMEOUT_MS
    }
}

impl Default for LegendaryConfig {
    fn default() -> Self {
        Self {
            broadcast_targets: Vec::new(),
            pin_duration_ms: Self::default_pin_duration_ms(),
            artifact_timeout_ms: Self::default_artifact_timeout_ms(),
            shutdown_drain_ms: Self::default_shutdown_drain_ms(),
        }
    }
}

/// Generated image (or other media) for a legendary catch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub reference: String,
}

/// Handle to a published broadcast, used for pinning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    pub target: String,
    pub id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("collaborator request failed: {0}")]
    RequestFailed(String),
    #[error("collaborator unavailable")]
    Unavailable,
}

#[cfg(feature = "async")]
pub use collaborators::{ArtifactGenerator, Broadcaster, broadcast, resolve_artifact};

#[cfg(feature = "async")]
mod collaborators {
    use super::{Artifact, CollaboratorError, LegendaryConfig, LegendaryNotice, MessageRef};
    use log::{debug, warn};
    use std::time::Duration;

    /// Image-generation port.
    #[async_trait::async_trait]
    pub trait ArtifactGenerator: Send + Sync {
        async fn generate(&self, prompt: &str) -> Result<Option<Artifact>, CollaboratorError>;
    }

    /// Notification port.
    #[async_trait::async_trait]
    pub trait Broadcaster: Send + Sync {
        async fn publish(
            &self,
            target: &str,
            artifact: Option<&Artifact>,
            caption: &str,
        ) -> Result<MessageRef, CollaboratorError>;

        async fn pin(&self, message: &MessageRef, duration_ms: u64) -> Result<(), CollaboratorError>;
    }

    /// Request an artifact with a bounded wait. Failures and timeouts yield `None`.
    pub async fn resolve_artifact<G>(
        notice: &LegendaryNotice,
        generator: &G,
        config: &LegendaryConfig,
    ) -> Option<Artifact>
    where
        G: ArtifactGenerator + ?Sized,
    {
        let prompt = notice.prompt();
        let wait = Duration::from_millis(config.artifact_timeout_ms);
        match tokio::time::timeout(wait, generator.generate(&prompt)).await {
            Ok(Ok(artifact)) => artifact,
            Ok(Err(err)) => {
                warn!("artifact generation failed for {}: {err}", notice.catch.species);
                None
            }
            Err(_) => {
                warn!(
                    "artifact generation timed out after {}ms for {}",
                    config.artifact_timeout_ms, notice.catch.species
                );
                None
            }
        }
    }

    /// Publish to every configured target and pin each message. Failures are
    /// logged per target; returns the messages that went out.
    pub async fn broadcast<B>(
        notice: &LegendaryNotice,
        artifact: Option<&Artifact>,
        broadcaster: &B,
        config: &LegendaryConfig,
    ) -> Vec<MessageRef>
    where
        B: Broadcaster + ?Sized,
    {
        let caption = notice.caption();
        let mut sent = Vec::with_capacity(config.broadcast_targets.len());
        for target in &config.broadcast_targets {
            let message = match broadcaster.publish(target, artifact, &caption).await {
                Ok(message) => message,
                Err(err) => {
                    warn!("broadcast to {target} failed: {err}");
                    continue;
                }
            };
            if config.pin_duration_ms > 0
                && let Err(err) = broadcaster.pin(&message, config.pin_duration_ms).await
            {
                warn!("pinning {} in {target} failed: {err}", message.id);
            }
            debug!("legendary broadcast sent to {target}");
            sent.push(message);
        }
        sent
    }
}
