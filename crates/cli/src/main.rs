mod conflate;
mod exit_codes;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use geomerge_conflate::ConflateError;

use exit_codes::*;

#[derive(Parser)]
#[command(name = "geomerge")]
#[command(about = "Conflate official geolocated datasets with crowdsourced map features")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a dataset: match, classify and write the CSV reports
    #[command(after_help = "\
Examples:
  geomerge run hydrants.toml --store osm.sqlite
  geomerge run hydrants.toml --store osm.sqlite --out-dir reports/
  geomerge run hydrants.toml --store osm.sqlite --json
  geomerge run hydrants.toml --store osm.sqlite --output result.json")]
    Run {
        /// Path to the dataset .toml config
        config: PathBuf,

        /// SQLite store holding the source table and map features (in-memory when omitted)
        #[arg(long, env = "GEOMERGE_STORE")]
        store: Option<PathBuf>,

        /// Directory receiving <name>.csv, <name>.byOSM.csv and <name>.metainfo.csv
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,

        /// Print the result document as JSON on stdout
        #[arg(long)]
        json: bool,

        /// Write the result document as JSON to a file
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Check a dataset config without running it
    #[command(after_help = "\
Examples:
  geomerge validate hydrants.toml")]
    Validate {
        /// Path to the dataset .toml config
        config: PathBuf,
    },

    /// Load a CSV file into a store table, replacing it
    #[command(after_help = "\
Examples:
  geomerge import --store osm.sqlite --table pei_81 pei_81.csv")]
    Import {
        /// CSV file with a header line
        file: PathBuf,

        /// SQLite store to write into
        #[arg(long, env = "GEOMERGE_STORE")]
        store: PathBuf,

        /// Destination table name
        #[arg(long)]
        table: String,
    },
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("GIT_COMMIT_HASH"), ")",
        "\nengine:  geomerge-conflate ", env!("CARGO_PKG_VERSION"),
        "\ntarget:  ", env!("TARGET"),
    )
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn usage(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }

    pub fn export(msg: impl Into<String>) -> Self {
        Self { code: EXIT_EXPORT, message: msg.into(), hint: None }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl From<ConflateError> for CliError {
    fn from(err: ConflateError) -> Self {
        let code = match &err {
            ConflateError::ConfigParse(_)
            | ConflateError::ConfigValidation(_)
            | ConflateError::UnsupportedCrs(_) => EXIT_INVALID_CONFIG,
            ConflateError::Export { .. } => EXIT_EXPORT,
            ConflateError::Store(_)
            | ConflateError::MissingColumn { .. }
            | ConflateError::Geometry { .. }
            | ConflateError::Io(_) => EXIT_RUNTIME,
        };
        let hint = match &err {
            ConflateError::MissingColumn { .. } => {
                Some("check [source] x, y and ref against the table header".to_string())
            }
            ConflateError::Store(msg) if msg.contains("no such table") => {
                Some("import the source first: geomerge import --store <db> --table <name> <file.csv>".to_string())
            }
            _ => None,
        };
        Self { code, message: err.to_string(), hint }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let result = match cli.command {
        Commands::Run { config, store, out_dir, json, output } => {
            conflate::cmd_run(config, store, out_dir, json, output)
        }
        Commands::Validate { config } => conflate::cmd_validate(config),
        Commands::Import { file, store, table } => conflate::cmd_import(file, store, table),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}
