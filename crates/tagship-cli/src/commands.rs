//! CLI command definitions.

use clap::{Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Release the version named by a pushed reference
    Release {
        /// Pushed reference, e.g. `refs/tags/release-v2.3.0`
        #[arg(env = "TAGSHIP_REF")]
        reference: String,

        /// Only build and publish these architectures (comma separated)
        #[arg(long, value_delimiter = ',')]
        only: Vec<String>,

        /// Print the release plan without building or publishing
        #[arg(long)]
        dry_run: bool,

        /// Source tree handed to every build environment
        #[arg(long, default_value = ".")]
        source: PathBuf,

        /// Directory under which build workspaces are created
        #[arg(long)]
        work_dir: Option<PathBuf>,

        /// Also write the release result as JSON to this file
        #[arg(long)]
        result_file: Option<PathBuf>,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },

    /// Check whether a reference is a release tag (exit 0 if it is)
    Match {
        reference: String,
    },

    /// List the configured build targets
    Targets {
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },

    /// Validate the release configuration
    Validate,

    /// Print the JSON schema of the release configuration
    Schema,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}
