//! HostAudit - Concurrent host checks with a tamper-evident audit trail
//!
//! Runs an external probe against many targets with bounded concurrency,
//! a global rate limit and per-check timeouts, then seals the results in
//! a hashed audit trail that can be verified and signed later.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod cli;
mod errors;
mod ui;

use cli::commands;
use cli::config::{HostAuditConfig, RunArgs};
use cli::OutputFormat;
use errors::HostAuditError;
use hostaudit::HashAlgorithm;

/// HostAudit - Audited host checks
#[derive(Parser)]
#[command(
    name = "hostaudit",
    version,
    about = "Concurrent host checks with a tamper-evident audit trail",
    long_about = "HostAudit runs a checker executable against a list of targets and records \
                  every outcome in an append-only audit trail.\n\n\
                  After a run the trail is sealed with a content hash; `verify` recomputes \
                  the hash and `sign` attaches an operator signature."
)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output format
    #[arg(short, long, default_value = "text", global = true)]
    format: OutputFormat,

    /// Path to config file (default: ./hostaudit.toml, then the user config dir)
    #[arg(long, global = true, env = "HOSTAUDIT_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory for audit trails and runs
    #[arg(long, global = true, env = "HOSTAUDIT_STORE")]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a checker against targets and seal the audit trail
    Run {
        /// Targets to check
        targets: Vec<String>,

        /// File with one target per line
        #[arg(long)]
        targets_file: Option<PathBuf>,

        /// Checker executable (invoked as `<checker> [args...] <target>`)
        #[arg(short, long)]
        checker: Option<String>,

        /// Argument passed to the checker before the target (repeatable)
        #[arg(long = "arg", value_name = "ARG", allow_hyphen_values = true)]
        args: Vec<String>,

        /// Environment override for the checker, KEY=VALUE (repeatable)
        #[arg(long, value_name = "KEY=VALUE")]
        env: Vec<String>,

        /// Engagement id the run is recorded under
        #[arg(short, long)]
        engagement: Option<String>,

        /// Human-readable engagement name
        #[arg(long)]
        name: Option<String>,

        /// Operator recorded in audit entries (default: $USER)
        #[arg(long)]
        operator: Option<String>,

        /// Maximum checks in flight
        #[arg(long)]
        concurrency: Option<usize>,

        /// Checks started per second (0 disables limiting)
        #[arg(long)]
        rate_limit: Option<f64>,

        /// Per-check timeout (seconds)
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Hash algorithm used to seal the trail (sha256, sha512)
        #[arg(long)]
        algorithm: Option<HashAlgorithm>,
    },

    /// Recompute an engagement's evidence hash and compare it to the seal
    Verify {
        /// Engagement id
        engagement: String,
    },

    /// Attach a signature to a sealed audit trail
    Sign {
        /// Engagement id
        engagement: String,

        /// Signature text
        signature: String,
    },

    /// List stored runs
    Runs {
        /// Only runs of this engagement
        #[arg(short, long)]
        engagement: Option<String>,
    },

    /// Show a run and its results
    Show {
        /// Run id
        run_id: String,
    },

    /// Delete a stored run
    Delete {
        /// Run id
        run_id: String,
    },
}

fn init_logging(verbosity: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbosity {
            0 => EnvFilter::new("hostaudit=info"),
            1 => EnvFilter::new("hostaudit=debug"),
            2 => EnvFilter::new("hostaudit=trace"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

async fn dispatch(cli: Cli) -> Result<()> {
    let config = HostAuditConfig::load(cli.config.as_deref())?;
    let store = config.store_path(cli.store.as_deref());
    let format = cli.format;

    match cli.command {
        Commands::Run {
            targets,
            targets_file,
            checker,
            args,
            env,
            engagement,
            name,
            operator,
            concurrency,
            rate_limit,
            timeout,
            algorithm,
        } => {
            let run_args = RunArgs {
                checker,
                args,
                env,
                engagement,
                name,
                operator,
                concurrency,
                rate_limit,
                timeout,
                algorithm,
            };
            commands::run::run(
                targets,
                targets_file.as_deref(),
                run_args,
                &config,
                &store,
                format,
            )
            .await
        }
        Commands::Verify { engagement } => commands::verify::run(&engagement, &store, format).await,
        Commands::Sign {
            engagement,
            signature,
        } => commands::sign::run(&engagement, &signature, &store, format).await,
        Commands::Runs { engagement } => {
            commands::runs::list(engagement.as_deref(), &store, format).await
        }
        Commands::Show { run_id } => commands::runs::show(&run_id, &store, format).await,
        Commands::Delete { run_id } => commands::runs::delete(&run_id, &store, format).await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.quiet);

    match dispatch(cli).await {
        Ok(()) => Ok(()),
        Err(err) => match err.downcast::<HostAuditError>() {
            Ok(diagnostic) => {
                eprintln!("{:?}", miette::Report::new(diagnostic));
                std::process::exit(1);
            }
            Err(err) => Err(err),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_accepts_hyphenated_checker_args() {
        let cli = Cli::try_parse_from([
            "hostaudit",
            "run",
            "web-1",
            "--checker",
            "sh",
            "--arg=-c",
            "--arg",
            "echo",
            "--algorithm",
            "sha512",
            "--env",
            "PORT=443",
        ])
        .unwrap();

        match cli.command {
            Commands::Run {
                targets,
                args,
                algorithm,
                env,
                ..
            } => {
                assert_eq!(targets, vec!["web-1"]);
                assert_eq!(args, vec!["-c", "echo"]);
                assert_eq!(algorithm, Some(HashAlgorithm::Sha512));
                assert_eq!(env, vec!["PORT=443"]);
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["hostaudit", "verify", "eng-1", "-f", "json", "-vv"]).unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        assert!(Cli::try_parse_from(["hostaudit", "run", "a", "--algorithm", "md5"]).is_err());
    }
}
