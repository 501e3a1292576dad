use anyhow::Result;
use colored::Colorize;
use std::io::Write;
use std::time::Duration;

use super::{ScenarioResult, SimulationReport};

fn success_rate(results: &[ScenarioResult]) -> f64 {
    let passed = results.iter().filter(|r| r.passed).count();
    #[allow(clippy::cast_precision_loss)]
    let rate = (passed as f64 / results.len().max(1) as f64) * 100.0;
    rate
}

pub fn generate_console_report(
    out: &mut dyn Write,
    results: &[ScenarioResult],
    lake: Option<&SimulationReport>,
    total_duration: Duration,
) -> Result<()> {
    writeln!(out)?;
    writeln!(out, "{}", "📊 Reward Engine Test Summary".bright_cyan().bold())?;
    writeln!(out, "{}", "=============================".cyan())?;

    let total = results.len();
    let passed = results.iter().filter(|r| r.passed).count();
    writeln!(out, "Total scenarios: {total}")?;
    writeln!(out, "Passed: {}", passed.to_string().green())?;
    writeln!(out, "Failed: {}", (total - passed).to_string().red())?;
    writeln!(out, "Success rate: {:.1}%", success_rate(results))?;
    writeln!(out, "Total time: {total_duration:?}")?;
    writeln!(out)?;

    for result in results {
        let status = if result.passed {
            "✅ PASS".green()
        } else {
            "❌ FAIL".red()
        };
        writeln!(out, "{} {} (seed {})", status, result.scenario_name.bold(), result.seed)?;
        writeln!(
            out,
            "   Iterations: {}/{} successful",
            result.successful_iterations, result.iterations_run
        )?;
        writeln!(out, "   Average time: {:?}", result.average_duration)?;
        if !result.failures.is_empty() {
            writeln!(out, "   Failures:")?;
            for failure in &result.failures {
                writeln!(out, "     • {}", failure.red())?;
            }
        }
        writeln!(out)?;
    }

    if let Some(lake) = lake {
        write_lake_summary(out, lake)?;
    }
    Ok(())
}

fn write_lake_summary(out: &mut dyn Write, lake: &SimulationReport) -> Result<()> {
    writeln!(out, "{}", "🎣 Lake Summary".bright_yellow().bold())?;
    writeln!(out, "{}", "===============".yellow())?;
    writeln!(
        out,
        "Attempts: {} (accepted {}, cooldown {}, out of bait {})",
        lake.attempts, lake.accepted, lake.rejected_cooldown, lake.rejected_bait
    )?;
    writeln!(
        out,
        "Catches: {} (double {}, rare {}, evicted {})",
        lake.catches, lake.double_catches, lake.rare_catches, lake.evictions
    )?;
    writeln!(out, "Trash rate: {:.2}%", lake.trash_rate() * 100.0)?;
    writeln!(
        out,
        "Below {:.1} kg: {:.1}% of common catches",
        lake.weight_threshold,
        lake.share_below(lake.weight_threshold) * 100.0
    )?;
    if let Some(median) = lake.upper_median(lake.weight_threshold) {
        writeln!(out, "Upper band median: {median:.2} kg")?;
    }
    if !lake.loot.is_empty() {
        writeln!(out, "Loot events:")?;
        for (label, count) in &lake.loot {
            writeln!(out, "  {label:18} {count}")?;
        }
    }
    if lake.invariant_failures.is_empty() {
        writeln!(out, "Invariants: {}", "held".green())?;
    } else {
        writeln!(
            out,
            "Invariants: {}",
            format!("{} failures", lake.invariant_failures.len()).red()
        )?;
    }
    writeln!(out, "State digest: {:016x}", lake.digest)?;
    Ok(())
}

pub fn generate_json_report(
    out: &mut dyn Write,
    results: &[ScenarioResult],
    lake: Option<&SimulationReport>,
) -> Result<()> {
    let payload = serde_json::json!({
        "scenarios": results,
        "lake": lake,
    });
    serde_json::to_writer_pretty(&mut *out, &payload)?;
    writeln!(out)?;
    Ok(())
}

pub fn generate_markdown_report(
    out: &mut dyn Write,
    results: &[ScenarioResult],
    lake: Option<&SimulationReport>,
) -> Result<()> {
    writeln!(out, "# Reelcast Engine Test Results\n")?;
    if results.is_empty() {
        writeln!(out, "_No scenarios executed._\n")?;
    } else {
        let total = results.len();
        let passed = results.iter().filter(|r| r.passed).count();
        writeln!(out, "## Summary\n")?;
        writeln!(out, "- **Total scenarios**: {total}")?;
        writeln!(out, "- **Passed**: {passed}")?;
        writeln!(out, "- **Failed**: {}", total - passed)?;
        writeln!(out, "- **Success rate**: {:.1}%\n", success_rate(results))?;

        writeln!(out, "## Detailed Results\n")?;
        for result in results {
            let status = if result.passed { "✅" } else { "❌" };
            writeln!(out, "### {} {} (seed {})\n", status, result.scenario_name, result.seed)?;
            writeln!(
                out,
                "- **Iterations**: {}/{} successful",
                result.successful_iterations, result.iterations_run
            )?;
            writeln!(out, "- **Average time**: {:?}", result.average_duration)?;
            if !result.failures.is_empty() {
                writeln!(out, "- **Failures**:")?;
                for failure in &result.failures {
                    writeln!(out, "  - {failure}")?;
                }
            }
            writeln!(out)?;
        }
    }

    if let Some(lake) = lake {
        writeln!(out, "## Lake\n")?;
        writeln!(out, "| Metric | Value |")?;
        writeln!(out, "| --- | --- |")?;
        writeln!(out, "| Attempts | {} |", lake.attempts)?;
        writeln!(out, "| Accepted | {} |", lake.accepted)?;
        writeln!(out, "| Catches | {} |", lake.catches)?;
        writeln!(out, "| Rare catches | {} |", lake.rare_catches)?;
        writeln!(out, "| Trash | {} |", lake.trash)?;
        writeln!(out, "| Invariant failures | {} |", lake.invariant_failures.len())?;
        writeln!(out, "| Digest | `{:016x}` |", lake.digest)?;
    }
    Ok(())
}
