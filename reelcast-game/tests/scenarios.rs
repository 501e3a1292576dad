use reelcast_game::{
    ActionResult, BaitSchedule, CastOptions, Catch, CommunityId, EffectNote, EngineConfig,
    FishingEngine, JsonFileStorage, LootCatalog, LootEvent, MemoryStorage, ModifierKind, PlayerId,
    PlayerState, RejectReason, default_catalog,
};
use std::path::PathBuf;

const COOLDOWN_MS: i64 = 30_000;

fn quiet_catalog() -> LootCatalog {
    let mut catalog = default_catalog().clone();
    catalog.junk_chance = 0.0;
    for rare in &mut catalog.rare_species {
        rare.chance = 0.0;
    }
    for entry in catalog.upgrades.iter_mut().chain(catalog.downgrades.iter_mut()) {
        entry.chance = 0.0;
    }
    catalog
}

fn only_upgrade(id: &str) -> LootCatalog {
    let mut catalog = quiet_catalog();
    for entry in &mut catalog.upgrades {
        if entry.id == id {
            entry.chance = 1.0;
        }
    }
    catalog
}

fn only_downgrade(id: &str) -> LootCatalog {
    let mut catalog = quiet_catalog();
    for entry in &mut catalog.downgrades {
        if entry.id == id {
            entry.chance = 1.0;
        }
    }
    catalog
}

fn engine_with(catalog: LootCatalog) -> FishingEngine<MemoryStorage> {
    FishingEngine::init(MemoryStorage::new(), EngineConfig::default(), catalog, 0xFEED, 0)
        .expect("engine init")
}

fn ids() -> (PlayerId, CommunityId) {
    (PlayerId::from("player-1"), CommunityId::from("community-1"))
}

fn cast<S: reelcast_game::StateStorage>(
    engine: &mut FishingEngine<S>,
    player: &PlayerId,
    community: &CommunityId,
    now: i64,
) -> ActionResult {
    engine
        .attempt_catch(player, community, "Player One", CastOptions::default(), now)
        .expect("cast succeeds")
}

fn scratch_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("reelcast-scenario-{name}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir.join("state.json")
}

#[test]
fn empty_pool_rejects_without_touching_state() {
    let mut engine = engine_with(quiet_catalog());
    let (player, community) = ids();
    cast(&mut engine, &player, &community, 0);
    assert_eq!(engine.adjust_resource_pool(&player, -100, 0).unwrap(), 0);
    let before = engine.snapshot();

    let result = cast(&mut engine, &player, &community, COOLDOWN_MS + 1);
    assert_eq!(
        result,
        ActionResult::Rejected(RejectReason::NoResource {
            next_unit_at: BaitSchedule::default().regen_period_ms,
        })
    );
    assert_eq!(engine.snapshot(), before);
}

#[test]
fn second_cast_inside_cooldown_is_rejected() {
    let mut engine = engine_with(quiet_catalog());
    let (player, community) = ids();
    assert!(cast(&mut engine, &player, &community, 1_000).report().is_some());
    let before = engine.snapshot();
    let result = cast(&mut engine, &player, &community, 1_000 + COOLDOWN_MS - 1);
    assert_eq!(
        result,
        ActionResult::Rejected(RejectReason::Cooldown {
            ready_at: 1_000 + COOLDOWN_MS,
        })
    );
    assert_eq!(engine.snapshot(), before);
    assert!(cast(&mut engine, &player, &community, 1_000 + COOLDOWN_MS).report().is_some());
}

#[test]
fn forced_rare_catch_carries_bonus_and_is_recorded() {
    let mut catalog = quiet_catalog();
    catalog.rare_species[1].chance = 1.0;
    let mut engine = engine_with(catalog);
    let (player, community) = ids();
    let result = engine
        .attempt_catch(&player, &community, "Player One", CastOptions::decorated("🐉"), 5_000)
        .unwrap();
    let report = result.report().expect("caught");
    let catch = &report.catches[0];
    assert!(catch.is_rare);
    assert_eq!(catch.species, "Abyssal Leviathan");
    assert!(catch.weight >= 300.0);
    assert_eq!(report.legendary.len(), 1);
    assert_eq!(report.legendary[0].decoration.as_deref(), Some("🐉"));

    let records = engine.legendary_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].species, "Abyssal Leviathan");
    assert!(records[0].artifact_ref.is_none());
    assert_eq!(engine.global_stats().legendary_count, 1);
}

#[test]
fn full_inventory_evicts_previous_minimum() {
    let schedule = BaitSchedule::default();
    let mut state = PlayerState::new("Player One", 0, &schedule);
    let weights = [4.0, 2.5, 9.0, 1.25, 7.0, 3.0, 6.0, 8.0, 5.0, 2.0];
    for weight in weights {
        assert!(state.record_catch(Catch::new("Pike", weight, 0), weights.len()).is_none());
    }
    let before = state.inventory_weight;

    let evicted = state
        .record_catch(Catch::new("Sturgeon", 42.0, 1), weights.len())
        .expect("eviction");
    assert!((evicted.weight - 1.25).abs() < 1e-9);
    assert_eq!(state.inventory.len(), weights.len());
    assert!(state.inventory.iter().any(|c| c.species == "Sturgeon"));
    assert!((state.inventory_weight - (before + 42.0 - 1.25)).abs() < 1e-9);
    assert!((state.aggregate_weight - (before + 42.0)).abs() < 1e-9);
}

#[test]
fn trash_leaves_catches_and_inventory_untouched() {
    let path = scratch_path("trash");
    let (player, community) = ids();

    let mut quiet = FishingEngine::init(
        JsonFileStorage::new(&path),
        EngineConfig::default(),
        quiet_catalog(),
        1,
        0,
    )
    .unwrap();
    for step in 0..3 {
        cast(&mut quiet, &player, &community, step * COOLDOWN_MS);
    }
    quiet.shutdown(3 * COOLDOWN_MS).unwrap();

    let mut junk = quiet_catalog();
    junk.junk_chance = 1.0;
    let mut engine =
        FishingEngine::init(JsonFileStorage::new(&path), EngineConfig::default(), junk, 2, 0).unwrap();
    let before = engine.player(&player).unwrap().clone();
    let community_before = engine.community_leaderboard(&community, Default::default(), 10);

    let result = cast(&mut engine, &player, &community, 10 * COOLDOWN_MS);
    assert!(matches!(
        result,
        ActionResult::Voided {
            event: LootEvent::Trash,
            ..
        }
    ));
    let after = engine.player(&player).unwrap();
    assert_eq!(after.total_catches, before.total_catches);
    assert_eq!(after.inventory, before.inventory);
    assert_eq!(after.total_trash_caught, before.total_trash_caught + 1);
    assert!((after.aggregate_weight - before.aggregate_weight).abs() < 1e-9);
    assert_eq!(after.total_resource_used, before.total_resource_used + 1);
    assert_eq!(
        engine.community_leaderboard(&community, Default::default(), 10),
        community_before
    );
    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn trash_voids_whole_double_catch_and_keeps_the_buff() {
    let path = scratch_path("double-trash");
    let (player, community) = ids();
    let mut catalog = only_upgrade("double_hook");
    let mut engine =
        FishingEngine::init(JsonFileStorage::new(&path), EngineConfig::default(), catalog.clone(), 3, 0)
            .unwrap();
    cast(&mut engine, &player, &community, 0);
    assert_eq!(engine.player(&player).unwrap().active_buffs.len(), 1);
    engine.shutdown(1).unwrap();

    catalog.junk_chance = 1.0;
    let mut engine =
        FishingEngine::init(JsonFileStorage::new(&path), EngineConfig::default(), catalog, 4, 0).unwrap();
    let result = cast(&mut engine, &player, &community, COOLDOWN_MS);
    assert!(matches!(result, ActionResult::Voided { .. }));
    let state = engine.player(&player).unwrap();
    assert_eq!(state.total_catches, 1);
    assert_eq!(state.active_buffs.len(), 1);
    assert_eq!(state.active_buffs[0].kind, ModifierKind::DoubleCatch);
    assert_eq!(state.active_buffs[0].remaining_uses, 1);
    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn double_hook_doubles_the_next_action_only() {
    let mut catalog = only_upgrade("double_hook");
    catalog.rare_species[0].chance = 1.0;
    let mut engine = engine_with(catalog);
    let (player, community) = ids();

    let first = cast(&mut engine, &player, &community, 0);
    let first = first.report().unwrap();
    assert_eq!(first.catches.len(), 1, "granted buff applies to future actions");
    assert!(matches!(first.loot_event, Some(LootEvent::Upgrade(_))));

    let second = cast(&mut engine, &player, &community, COOLDOWN_MS);
    let second = second.report().unwrap();
    assert_eq!(second.catches.len(), 2);
    assert!(second.catches[0].is_rare);
    assert!(!second.catches[1].is_rare, "rare drops only on the primary catch");
    assert!(second.notes.iter().any(|n| matches!(n, EffectNote::DoubleCatch { .. })));
    assert_eq!(second.bait, 8, "one unit per action");
}

#[test]
fn single_use_multiplier_expires_after_one_catch() {
    let mut catalog = only_upgrade("lucky_lure");
    if let Some(entry) = catalog.upgrades.iter_mut().find(|e| e.id == "lucky_lure")
        && let reelcast_game::LootEffect::Modifier { uses, .. } = &mut entry.effect
    {
        *uses = 1;
    }
    let mut engine = engine_with(catalog);
    let (player, community) = ids();

    cast(&mut engine, &player, &community, 0);
    let buffs = &engine.player(&player).unwrap().active_buffs;
    assert_eq!(buffs.len(), 1);
    assert_eq!(buffs[0].remaining_uses, 1);

    let report = cast(&mut engine, &player, &community, COOLDOWN_MS);
    let notes = &report.report().unwrap().notes;
    let applied = notes
        .iter()
        .position(|n| matches!(n, EffectNote::ModifierApplied { kind: ModifierKind::WeightMultiplier, .. }))
        .expect("buff applied");
    let expired = notes
        .iter()
        .position(|n| matches!(n, EffectNote::ModifierExpired { .. }))
        .expect("buff expired");
    let regained = notes
        .iter()
        .position(|n| matches!(n, EffectNote::ModifierGained { buff: true, .. }))
        .expect("new buff granted after the catch");
    assert!(applied < expired && expired < regained);
}

#[test]
fn bait_stash_is_clamped_to_cap() {
    let mut engine = engine_with(only_upgrade("bait_stash"));
    let (player, community) = ids();
    let report = cast(&mut engine, &player, &community, 0);
    let report = report.report().unwrap();
    assert_eq!(report.bait, 10);
    assert!(report.notes.iter().any(|n| matches!(n, EffectNote::BaitChanged { delta: 1, pool: 10, .. })));
}

#[test]
fn bait_thief_never_drives_pool_negative() {
    let mut engine = engine_with(only_downgrade("bait_thief"));
    let (player, community) = ids();
    cast(&mut engine, &player, &community, 0);
    engine.adjust_resource_pool(&player, -100, 0).unwrap();
    assert_eq!(engine.adjust_resource_pool(&player, 3, 0).unwrap(), 3);
    let mut now = COOLDOWN_MS;
    let mut caught = 0;
    while let ActionResult::Caught(report) = cast(&mut engine, &player, &community, now) {
        assert!(report.bait <= 1);
        caught += 1;
        now += COOLDOWN_MS;
    }
    assert!((1..=2).contains(&caught));
    assert_eq!(engine.player(&player).unwrap().resource_pool, 0);
}

#[test]
fn tipped_bucket_clears_inventory_but_not_leaderboards() {
    let mut engine = engine_with(only_downgrade("tipped_bucket"));
    let (player, community) = ids();
    let report = cast(&mut engine, &player, &community, 0);
    let report = report.report().unwrap();
    assert!(report.notes.iter().any(|n| matches!(n, EffectNote::InventoryCleared { items: 1, .. })));

    let state = engine.player(&player).unwrap();
    assert!(state.inventory.is_empty());
    assert!(state.inventory_weight.abs() < 1e-9);
    assert!(state.aggregate_weight.abs() < 1e-9);
    assert_eq!(state.total_catches, 1);
    let board = engine.community_leaderboard(&community, Default::default(), 10);
    assert_eq!(board[0].total_catches, 1);
    assert!(board[0].total_weight > 0.0);
}

#[test]
fn invariants_hold_across_a_busy_lake() {
    let catalog = default_catalog().clone();
    let mut engine = engine_with(catalog);
    let players: Vec<PlayerId> = (0..6).map(|i| PlayerId::new(format!("p{i}"))).collect();
    let communities = [CommunityId::from("north"), CommunityId::from("south")];
    let mut now = 0;
    for round in 0..400 {
        for (index, player) in players.iter().enumerate() {
            let community = &communities[index % 2];
            let _ = engine
                .attempt_catch(player, community, "", CastOptions::default(), now)
                .expect("no invariant violations");
            let state = engine.player(player).unwrap();
            assert!(state.resource_pool <= 10);
            assert!(state.inventory.len() <= 10);
        }
        now += if round % 3 == 0 { 5_000 } else { 31 * 60 * 1_000 / 20 };
    }
    engine.audit().expect("ledger consistent");
    let stats = engine.global_stats();
    assert_eq!(stats.players, players.len());
    assert!(stats.total_catches > 0);
    assert!(stats.total_trash > 0);
}
