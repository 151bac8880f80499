//! Command handlers.

use crate::commands::OutputFormat;
use crate::output;
use anyhow::Context;
use console::style;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tagship_core::config::ReleaseConfig;
use tagship_core::ports::EnvironmentProvider;
use tagship_core::release::ReleaseEvent;
use tagship_core::{Arch, EnvironmentKind};
use tagship_publish::{HttpPackageIndex, Publisher};
use tagship_runner::{
    BuildTaskRunner, ContainerEnvironmentProvider, HostEnvironmentProvider, RunnerConfig,
};
use tagship_scheduler::{ReleaseCoordinator, ReleasePlan, TagMatch, TriggerMatcher};
use tagship_secrets::CredentialBroker;
use tracing::info;

pub struct ReleaseArgs {
    pub reference: String,
    pub only: Vec<String>,
    pub dry_run: bool,
    pub source: PathBuf,
    pub work_dir: Option<PathBuf>,
    pub result_file: Option<PathBuf>,
    pub output: OutputFormat,
}

fn load_config(path: &Path) -> anyhow::Result<ReleaseConfig> {
    ReleaseConfig::load(path)
        .with_context(|| format!("failed to load release configuration {}", path.display()))
}

/// Run a release for a pushed reference.
pub async fn release(config_path: &Path, args: ReleaseArgs) -> anyhow::Result<ExitCode> {
    let config = Arc::new(load_config(config_path)?);
    let matcher = TriggerMatcher::new(config.tag.clone());

    let event = ReleaseEvent::new(args.reference.as_str());
    let version = match matcher.classify(&event) {
        TagMatch::Release(version) => version,
        other => {
            println!(
                "{} {} is not a release tag ({}); nothing to do",
                style("i").blue(),
                args.reference,
                describe_mismatch(&other, &config.tag.prefix)
            );
            return Ok(ExitCode::SUCCESS);
        }
    };

    let only: Vec<Arch> = args.only.iter().map(|a| Arch::new(a.trim())).collect();

    if args.dry_run {
        let plan = ReleasePlan::new(&config, &version, &only)?;
        match args.output {
            OutputFormat::Table => print!("{}", output::plan_table(&plan)),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
        }
        return Ok(ExitCode::SUCCESS);
    }

    let coordinator = build_coordinator(config.clone(), &args).await?;
    let result = coordinator.release(&version, &only).await?;

    match args.output {
        OutputFormat::Table => print!("{}", output::result_table(&result)),
        OutputFormat::Json => println!("{}", output::result_json(&result)?),
    }

    if let Some(path) = &args.result_file {
        tokio::fs::write(path, output::result_json(&result)?)
            .await
            .with_context(|| format!("failed to write result file {}", path.display()))?;
        info!(path = %path.display(), "Wrote release result");
    }

    Ok(if result.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

async fn build_coordinator(
    config: Arc<ReleaseConfig>,
    args: &ReleaseArgs,
) -> anyhow::Result<ReleaseCoordinator> {
    let source = args
        .source
        .canonicalize()
        .with_context(|| format!("source directory {} not found", args.source.display()))?;
    let work_root = args
        .work_dir
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("tagship").join("work"));

    let mut runner = BuildTaskRunner::new(RunnerConfig::from(config.as_ref()))
        .with_provider(Arc::new(HostEnvironmentProvider::new(&work_root, &source)));

    let needs_docker = config
        .targets
        .list_targets()
        .iter()
        .any(|t| t.environment.kind == EnvironmentKind::Container);
    if needs_docker {
        let provider: Arc<dyn EnvironmentProvider> = Arc::new(
            ContainerEnvironmentProvider::new(&work_root, &source)
                .context("container targets are configured but Docker is unavailable")?,
        );
        runner = runner.with_provider(provider);
    }

    let store = tagship_secrets::from_config(&config.secrets).await?;
    let broker = CredentialBroker::from_config(store, &config);

    let index = HttpPackageIndex::new(&config.index)?;
    let publisher = Publisher::new(Arc::new(index), config.policy.retry.clone());

    Ok(ReleaseCoordinator::new(
        config,
        Arc::new(runner),
        Arc::new(broker),
        Arc::new(publisher),
    ))
}

fn describe_mismatch(result: &TagMatch, prefix: &str) -> String {
    match result {
        TagMatch::Release(version) => format!("release {}", version),
        TagMatch::NotATag => "not a tag reference".to_string(),
        TagMatch::PrefixMismatch => format!("tag does not start with '{}'", prefix),
        TagMatch::Malformed { suffix, reason } => {
            format!("'{}' is not a valid version: {}", suffix, reason)
        }
        TagMatch::PrereleaseNotAllowed(version) => {
            format!("{} is a pre-release and tag.allow_prerelease is off", version)
        }
    }
}

/// Report whether a reference would trigger a release.
pub fn match_reference(config_path: &Path, reference: &str) -> anyhow::Result<ExitCode> {
    let config = load_config(config_path)?;
    let matcher = TriggerMatcher::new(config.tag.clone());

    match matcher.evaluate(reference) {
        TagMatch::Release(version) => {
            println!(
                "{} {} releases {} {}",
                style("✓").green(),
                reference,
                config.package,
                style(version.canonical()).bold()
            );
            Ok(ExitCode::SUCCESS)
        }
        other => {
            println!(
                "{} {}: {}",
                style("✗").red(),
                reference,
                describe_mismatch(&other, &config.tag.prefix)
            );
            Ok(ExitCode::from(1))
        }
    }
}

/// List configured targets.
pub fn targets(config_path: &Path, format: OutputFormat) -> anyhow::Result<ExitCode> {
    let config = load_config(config_path)?;
    match format {
        OutputFormat::Table => print!("{}", output::targets_table(&config)),
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(config.targets.list_targets())?
        ),
    }
    Ok(ExitCode::SUCCESS)
}

/// Validate a release configuration.
pub fn validate(config_path: &Path) -> anyhow::Result<ExitCode> {
    let config = load_config(config_path)?;

    println!(
        "{} Release configuration for \"{}\" is valid",
        style("✓").green(),
        config.package
    );
    println!("  Tag pattern: {}<version>", config.tag.prefix);
    println!("  Index: {} ({})", config.index.name, config.index.url);
    println!("  Targets: {}", config.targets.len());
    for target in config.targets.list_targets() {
        println!("    - {} ({})", target.arch, target.environment.describe());
    }
    Ok(ExitCode::SUCCESS)
}

/// Print the configuration JSON schema.
pub fn schema() -> anyhow::Result<ExitCode> {
    let schema = schemars::schema_for!(ReleaseConfig);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(ExitCode::SUCCESS)
}
