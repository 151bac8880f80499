//! Tagship CLI entrypoint.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;
mod handlers;
mod logging;
mod output;

use commands::{Commands, LogFormat};

#[derive(Parser)]
#[command(name = "tagship")]
#[command(author, version, about = "Tag-triggered release orchestrator", long_about = None)]
struct Cli {
    /// Release configuration file
    #[arg(short, long, global = true, env = "TAGSHIP_CONFIG", default_value = "tagship.yaml")]
    config: PathBuf,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    logging::init(cli.log_format);

    match cli.command {
        Commands::Release {
            reference,
            only,
            dry_run,
            source,
            work_dir,
            result_file,
            output,
        } => {
            let args = handlers::ReleaseArgs {
                reference,
                only,
                dry_run,
                source,
                work_dir,
                result_file,
                output,
            };
            handlers::release(&cli.config, args).await
        }
        Commands::Match { reference } => handlers::match_reference(&cli.config, &reference),
        Commands::Targets { output } => handlers::targets(&cli.config, output),
        Commands::Validate => handlers::validate(&cli.config),
        Commands::Schema => handlers::schema(),
    }
}
