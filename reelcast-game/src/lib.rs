//! Reelcast Game Engine
//!
//! Reward-economy core for the Reelcast chat fishing game: bait regeneration
//! and cooldowns, tiered catch generation, loot events, stacking buffs and
//! debuffs, bounded inventories, community leaderboards, legendary records and
//! buffered crash-safe persistence. Transport and chat concerns live with the
//! caller; the engine only sees player and community identifiers.

pub mod catalog;
pub mod catch;
pub mod config;
pub mod constants;
pub mod engine;
pub mod generator;
pub mod legendary;
pub mod modifiers;
pub mod numbers;
pub mod persistence;
pub mod rng;
pub mod scheduler;
#[cfg(feature = "async")]
pub mod service;
pub mod state;

// Re-export commonly used types
pub use catalog::{
    CatalogError, LootCatalog, LootEffect, LootEntry, MagnitudeRange, RareSpecies, WeightCurve,
    default_catalog,
};
pub use catch::{Catch, CatchSet, Modifier, ModifierKind, Timestamp};
pub use config::{ConfigError, EngineConfig};
pub use engine::{ActionResult, CastOptions, CatchReport, EngineError, FishingEngine};
pub use generator::{
    LootEvent, LootOutcome, ResolvedEffect, generate_base_catch, generate_catches, roll_loot_event,
    roll_weight,
};
pub use legendary::{
    Artifact, CollaboratorError, LegendaryConfig, LegendaryNotice, LegendaryRecord, MessageRef,
};
#[cfg(feature = "async")]
pub use legendary::{ArtifactGenerator, Broadcaster};
pub use modifiers::{EffectNote, PipelineOutput};
pub use persistence::{
    FlushOutcome, FlushTracker, FullState, JsonFileStorage, MemoryStorage, PersistenceError,
    PersistenceManager, StateStorage,
};
pub use rng::RngBundle;
pub use scheduler::{BaitSchedule, RejectReason};
#[cfg(feature = "async")]
pub use service::{Clock, Collaborators, EngineHandle, SystemClock, shutdown_signal};
pub use state::{
    CommunityAggregate, CommunityId, GlobalStats, HeaviestCatch, InvariantViolation,
    LeaderboardEntry, LeaderboardKey, Ledger, PlayerId, PlayerState, PlayerSummary,
};
