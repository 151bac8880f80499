//! Rendering of plans, targets and release results.

use console::style;
use serde::Serialize;
use std::fmt::Write;
use tagship_core::BuildTarget;
use tagship_core::config::ReleaseConfig;
use tagship_core::release::{ReleaseResult, ReleaseStatus, TargetOutcome};
use tagship_scheduler::ReleasePlan;

/// JSON form of a finished release.
#[derive(Serialize)]
pub struct ResultReport<'a> {
    pub status: ReleaseStatus,
    pub failed_targets: Vec<String>,
    #[serde(flatten)]
    pub result: &'a ReleaseResult,
}

impl<'a> ResultReport<'a> {
    pub fn new(result: &'a ReleaseResult) -> Self {
        Self {
            status: result.status(),
            failed_targets: result.failed_targets().iter().map(|a| a.to_string()).collect(),
            result,
        }
    }
}

pub fn result_json(result: &ReleaseResult) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&ResultReport::new(result))
}

pub fn result_table(result: &ReleaseResult) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Release {} ({})",
        style(result.version.canonical()).bold(),
        style(result.release_id).dim()
    );

    for (arch, outcome) in &result.outcomes {
        let (marker, detail) = match outcome {
            TargetOutcome::Published { checksum } => {
                (style("✓").green(), format!("sha256 {}", short(checksum)))
            }
            TargetOutcome::Skipped { .. } => (style("-").yellow(), "already on the index".to_string()),
            TargetOutcome::Failed {
                reason, artifact, ..
            } => {
                let mut detail = reason.clone();
                if let Some(path) = artifact {
                    let _ = write!(detail, " (artifact kept at {})", path.display());
                }
                (style("✗").red(), detail)
            }
        };
        let _ = writeln!(
            out,
            "  {} {:<12} {:<32} {}",
            marker,
            arch.as_str(),
            outcome.to_string(),
            detail
        );
    }

    let summary = match result.status() {
        ReleaseStatus::Succeeded => style("succeeded".to_string()).green(),
        ReleaseStatus::PartiallyFailed => style(format!(
            "partially failed, re-run with --only {}",
            result
                .failed_targets()
                .iter()
                .map(|a| a.to_string())
                .collect::<Vec<_>>()
                .join(",")
        ))
        .red(),
    };
    let _ = writeln!(out, "Release {}", summary);
    out
}

fn short(checksum: &str) -> &str {
    checksum.get(..12).unwrap_or(checksum)
}

pub fn plan_table(plan: &ReleasePlan) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Would release {} {} (tag {}) to {}",
        style(&plan.package).bold(),
        style(plan.version.canonical()).bold(),
        plan.tag,
        plan.index
    );
    for target in &plan.targets {
        let _ = writeln!(
            out,
            "  {:<12} {:<48} {} [{}]",
            target.arch.as_str(),
            target.environment,
            target.artifact,
            target.identity
        );
    }
    out
}

pub fn targets_table(config: &ReleaseConfig) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} targets for {}", config.targets.len(), style(&config.package).bold());
    for target in config.targets.list_targets() {
        let _ = writeln!(
            out,
            "  {:<12} {:<48} {}{}",
            target.arch.as_str(),
            target.environment.describe(),
            target.artifact,
            identity_suffix(target)
        );
    }
    out
}

fn identity_suffix(target: &BuildTarget) -> String {
    match &target.identity {
        Some(identity) => format!(" [{}]", identity),
        None => String::new(),
    }
}
