mod logic;
mod service;
mod util;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use reelcast_game::{EngineConfig, FishingEngine, JsonFileStorage, LootCatalog, MemoryStorage, default_catalog};
use std::fs::File;
use std::io::{BufWriter, Write, stdout};
use std::path::{Path, PathBuf};
use std::time::Instant;

use logic::{LogicTester, Scenario, ScenarioResult, SimulationConfig, SimulationReport, TesterAssets, list_scenarios};
use service::run_service_simulation;
use util::{resolve_seeds, split_csv};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TestMode {
    /// Synchronous engine scenarios (fast, deterministic)
    Logic,
    /// Drive the async handle with concurrent casts and logging collaborators
    Service,
    /// Run both logic scenarios and the service lake
    Both,
}

#[derive(Debug, Parser)]
#[command(name = "reelcast-tester", version)]
#[command(about = "Seeded simulation and QA harness for the Reelcast reward engine")]
struct Args {
    /// Test mode: logic scenarios, the async service lake, or both
    #[arg(long, value_enum, default_value_t = TestMode::Logic)]
    mode: TestMode,

    /// Scenarios to run (comma-separated, or `all`)
    #[arg(long, default_value = "all")]
    scenarios: String,

    /// List all available scenarios and exit
    #[arg(long)]
    list_scenarios: bool,

    /// Seeds to run (comma-separated; decimal or 0x hex)
    #[arg(long, default_value = "1337")]
    seeds: String,

    /// Number of iterations per scenario and seed
    #[arg(long, default_value_t = 3)]
    iterations: usize,

    /// Simulated players in the lake
    #[arg(long, default_value_t = 8)]
    players: usize,

    /// Communities the players are spread across
    #[arg(long, default_value_t = 2)]
    communities: usize,

    /// Rounds in which every player casts once
    #[arg(long, default_value_t = 200)]
    rounds: usize,

    /// Simulated milliseconds between rounds
    #[arg(long, default_value_t = 5 * 60 * 1_000)]
    step_ms: i64,

    /// Engine config JSON overriding the built-in defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Loot catalog JSON replacing the shipped catalog
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Persist the lake run to this state file instead of memory
    #[arg(long)]
    state: Option<PathBuf>,

    /// Output report format
    #[arg(long, default_value = "console")]
    #[arg(value_parser = ["json", "markdown", "console"])]
    report: String,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Optional path to write the report output instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if maybe_list_scenarios(&args)? {
        return Ok(());
    }

    announce_banner();

    let start_time = Instant::now();
    let scenarios = expand_scenarios(&args.scenarios);
    let seeds = resolve_seeds(&split_csv(&args.seeds))?;
    let assets = load_assets(&args)?;

    let results = run_logic_scenarios(&args, &scenarios, &seeds, &assets);
    let lake = run_service_lake(&args, &seeds, &assets).await?;

    write_reports(&args, &results, lake.as_ref(), start_time)?;

    let lake_failed = lake.as_ref().is_some_and(|l| !l.invariant_failures.is_empty());
    if results.iter().any(|r| !r.passed) || lake_failed {
        std::process::exit(1);
    }

    Ok(())
}

fn maybe_list_scenarios(args: &Args) -> Result<bool> {
    if !args.list_scenarios {
        return Ok(false);
    }
    let mut output_target = OutputTarget::new(args.output.clone())?;
    writeln!(output_target.writer(), "Available scenarios:")?;
    for (key, description) in list_scenarios() {
        writeln!(output_target.writer(), "  {key:15} - {description}")?;
    }
    output_target.flush_inner()?;
    Ok(true)
}

fn announce_banner() {
    println!("{}", "🎣 Reelcast Engine Tester".bright_cyan().bold());
    println!("{}", "=========================".cyan());
}

fn expand_scenarios(scenarios_arg: &str) -> Vec<String> {
    let mut scenarios = split_csv(scenarios_arg);
    if scenarios.iter().any(|s| s == "all") {
        scenarios.retain(|s| s != "all");
        for scenario in Scenario::ALL {
            let key = scenario.key().to_string();
            if !scenarios.contains(&key) {
                scenarios.push(key);
            }
        }
    }
    scenarios
}

fn read_json_file(path: &Path, what: &str) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {what} {}", path.display()))
}

fn load_assets(args: &Args) -> Result<TesterAssets> {
    let config = match &args.config {
        Some(path) => EngineConfig::from_json(&read_json_file(path, "engine config")?)
            .with_context(|| format!("parsing engine config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    config.validate()?;
    let catalog = match &args.catalog {
        Some(path) => LootCatalog::from_json(&read_json_file(path, "loot catalog")?)
            .with_context(|| format!("parsing loot catalog {}", path.display()))?,
        None => default_catalog().clone(),
    };
    catalog.validate()?;
    let simulation = SimulationConfig::new(args.players, args.rounds)
        .with_communities(args.communities)
        .with_step(args.step_ms);
    Ok(TesterAssets {
        config,
        catalog,
        simulation,
    })
}

fn run_logic_scenarios(
    args: &Args,
    scenarios: &[String],
    seeds: &[u64],
    assets: &TesterAssets,
) -> Vec<ScenarioResult> {
    let mut results = Vec::new();
    if !matches!(args.mode, TestMode::Logic | TestMode::Both) {
        return results;
    }

    println!("{}", "🧠 Running Logic Scenarios".bright_yellow().bold());
    println!("{}", "-".repeat(30).yellow());

    let tester = LogicTester::new(assets.clone(), args.verbose);
    for name in scenarios {
        if let Some(scenario) = Scenario::from_key(name) {
            results.extend(tester.run_scenario(scenario, seeds, args.iterations));
        } else {
            eprintln!("⚠️  Unknown scenario: {}", name.yellow());
        }
    }
    results
}

async fn run_service_lake(args: &Args, seeds: &[u64], assets: &TesterAssets) -> Result<Option<SimulationReport>> {
    if !matches!(args.mode, TestMode::Service | TestMode::Both) {
        return Ok(None);
    }

    println!("{}", "🌊 Running Service Lake".bright_blue().bold());
    println!("{}", "-".repeat(30).blue());

    let seed = seeds.first().copied().unwrap_or(1337);
    let start_ms = assets.simulation.start_ms;
    let run = if let Some(path) = &args.state {
        let engine = FishingEngine::init(
            JsonFileStorage::new(path),
            assets.config.clone(),
            assets.catalog.clone(),
            seed,
            start_ms,
        )
        .with_context(|| format!("opening state {}", path.display()))?;
        run_service_simulation(engine, &assets.simulation).await?
    } else {
        let engine = FishingEngine::init(
            MemoryStorage::new(),
            assets.config.clone(),
            assets.catalog.clone(),
            seed,
            start_ms,
        )?;
        run_service_simulation(engine, &assets.simulation).await?
    };
    println!(
        "✅ seed {seed}: {} attempts, {} legendary broadcasts",
        run.report.attempts, run.broadcasts
    );
    Ok(Some(run.report))
}

fn write_reports(
    args: &Args,
    results: &[ScenarioResult],
    lake: Option<&SimulationReport>,
    start_time: Instant,
) -> Result<()> {
    let mut output_target = OutputTarget::new(args.output.clone())?;

    match args.report.as_str() {
        "json" => logic::reports::generate_json_report(&mut output_target, results, lake)?,
        "markdown" => logic::reports::generate_markdown_report(&mut output_target, results, lake)?,
        _ => {
            let duration = start_time.elapsed();
            if results.is_empty() && lake.is_none() {
                writeln!(&mut output_target, "Nothing executed.")?;
            } else {
                logic::reports::generate_console_report(&mut output_target, results, lake, duration)?;
            }
            writeln!(&mut output_target)?;
            writeln!(&mut output_target, "🏁 Total time: {duration:?}")?;
        }
    }

    output_target.flush_inner()?;
    Ok(())
}

enum OutputTarget {
    Stdout(BufWriter<std::io::Stdout>),
    File(BufWriter<File>),
}

impl OutputTarget {
    fn new(path: Option<PathBuf>) -> Result<Self> {
        if let Some(path) = path {
            let file = File::create(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            Ok(Self::File(BufWriter::new(file)))
        } else {
            Ok(Self::Stdout(BufWriter::new(stdout())))
        }
    }

    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Self::Stdout(w) => w,
            Self::File(w) => w,
        }
    }

    fn flush_inner(&mut self) -> std::io::Result<()> {
        match self {
            Self::Stdout(w) => w.flush(),
            Self::File(w) => w.flush(),
        }
    }
}

impl Write for OutputTarget {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writer().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.flush_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn base_args() -> Args {
        Args {
            mode: TestMode::Logic,
            scenarios: "all".to_string(),
            list_scenarios: false,
            seeds: "1337".to_string(),
            iterations: 1,
            players: 3,
            communities: 2,
            rounds: 20,
            step_ms: 60_000,
            config: None,
            catalog: None,
            state: None,
            report: "json".to_string(),
            verbose: false,
            output: None,
        }
    }

    fn temp_file(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("reelcast-tester-{}-{name}", std::process::id()))
    }

    fn sample_result(passed: bool) -> ScenarioResult {
        ScenarioResult {
            scenario_name: "determinism".to_string(),
            seed: 7,
            passed,
            iterations_run: 1,
            successful_iterations: usize::from(passed),
            failures: Vec::new(),
            average_duration: Duration::from_millis(1),
        }
    }

    #[test]
    fn expands_all_scenarios_keyword() {
        let expanded = expand_scenarios("invariants,all");
        assert_eq!(expanded.first().map(String::as_str), Some("invariants"));
        assert_eq!(expanded.len(), Scenario::ALL.len());
    }

    #[test]
    fn expand_scenarios_without_all_preserves_order() {
        let expanded = expand_scenarios("persistence,distribution");
        assert_eq!(expanded, vec!["persistence".to_string(), "distribution".to_string()]);
    }

    #[test]
    fn maybe_list_scenarios_writes_output() {
        let temp = temp_file("scenarios.txt");
        let args = Args {
            list_scenarios: true,
            output: Some(temp.clone()),
            ..base_args()
        };
        assert!(maybe_list_scenarios(&args).unwrap());
        let content = std::fs::read_to_string(temp).unwrap();
        assert!(content.contains("Available scenarios"));
        assert!(content.contains("persistence"));
    }

    #[test]
    fn maybe_list_scenarios_returns_false_when_disabled() {
        assert!(!maybe_list_scenarios(&base_args()).unwrap());
    }

    #[test]
    fn load_assets_applies_overrides() {
        let config_path = temp_file("engine.json");
        std::fs::write(&config_path, r#"{ "max_bait": 4 }"#).unwrap();
        let args = Args {
            config: Some(config_path),
            players: 5,
            ..base_args()
        };
        let assets = load_assets(&args).unwrap();
        assert_eq!(assets.config.max_bait, 4);
        assert_eq!(assets.simulation.players, 5);
        assert_eq!(assets.catalog, *default_catalog());
    }

    #[test]
    fn load_assets_rejects_invalid_catalog() {
        let catalog_path = temp_file("catalog.json");
        std::fs::write(&catalog_path, r#"{ "junk_chance": 2.0 }"#).unwrap();
        let args = Args {
            catalog: Some(catalog_path),
            ..base_args()
        };
        assert!(load_assets(&args).is_err());
    }

    #[test]
    fn run_logic_scenarios_skips_when_not_enabled() {
        let args = Args {
            mode: TestMode::Service,
            ..base_args()
        };
        let assets = load_assets(&args).unwrap();
        let results = run_logic_scenarios(&args, &["invariants".to_string()], &[42], &assets);
        assert!(results.is_empty());
    }

    #[test]
    fn run_logic_scenarios_runs_known_and_skips_unknown() {
        let args = base_args();
        let assets = load_assets(&args).unwrap();
        let names = vec!["invariants".to_string(), "weather".to_string()];
        let results = run_logic_scenarios(&args, &names, &[42], &assets);
        assert_eq!(results.len(), 1);
        assert!(results[0].passed);
    }

    #[test]
    fn service_lake_skips_in_logic_mode() {
        let args = base_args();
        let assets = load_assets(&args).unwrap();
        let lake = tokio_test::block_on(run_service_lake(&args, &[1], &assets)).unwrap();
        assert!(lake.is_none());
    }

    #[test]
    fn write_reports_emits_json_output() {
        let temp = temp_file("report.json");
        let args = Args {
            output: Some(temp.clone()),
            ..base_args()
        };
        write_reports(&args, &[sample_result(true)], None, Instant::now()).unwrap();
        let content = std::fs::read_to_string(temp).unwrap();
        assert!(content.contains("\"scenario_name\": \"determinism\""));
    }

    #[test]
    fn write_reports_console_with_nothing_executed() {
        let temp = temp_file("report.txt");
        let args = Args {
            report: "console".to_string(),
            output: Some(temp.clone()),
            ..base_args()
        };
        write_reports(&args, &[], None, Instant::now()).unwrap();
        let content = std::fs::read_to_string(temp).unwrap();
        assert!(content.contains("Nothing executed"));
        assert!(content.contains("Total time"));
    }

    #[test]
    fn output_target_stdout_writes() {
        let mut target = OutputTarget::new(None).unwrap();
        target.write_all(b"ok").unwrap();
        target.flush().unwrap();
    }
}
