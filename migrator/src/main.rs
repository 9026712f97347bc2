//! Versioned changeset runner.
//!
//! Applies the changesets of a TOML changelog through an interactive shell
//! backend, recording each executed changeset in an append-only ledger so
//! repeated runs only apply what is new.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use migrator::apply::{ApplyPlan, apply_changelog, verify_changelog};
use migrator::core::invariants::DefaultChangesetValidator;
use migrator::error::EngineError;
use migrator::exit_codes;
use migrator::io::changelog::TomlChangelogSource;
use migrator::io::config::load_config;
use migrator::io::executor::ShellSessionFactory;
use migrator::io::ledger::JsonlLedger;
use migrator::logging;

#[derive(Parser)]
#[command(
    name = "migrator",
    version,
    about = "Apply versioned changesets through an interactive shell backend"
)]
struct Cli {
    /// Log engine progress at info level (overridden by `RUST_LOG`).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply every pending changeset in the changelog.
    Apply {
        /// Connection string handed to the backend shell.
        #[arg(long)]
        connection: String,
        /// Root changelog file.
        #[arg(long)]
        changelog: PathBuf,
        /// Only apply context-constrained changesets labelled with this context.
        #[arg(long)]
        context: Option<String>,
        /// Migrator config file (defaults apply when missing).
        #[arg(long, default_value = "migrator.toml")]
        config: PathBuf,
    },
    /// Load and validate the changelog without applying anything.
    Verify {
        #[arg(long)]
        changelog: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    if let Err(err) = run(cli) {
        eprintln!("{:#}", err);
        std::process::exit(exit_code_for(&err));
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Apply {
            connection,
            changelog,
            context,
            config,
        } => cmd_apply(connection, changelog, context, config),
        Command::Verify { changelog } => cmd_verify(changelog),
    }
}

fn cmd_apply(
    connection: String,
    changelog: PathBuf,
    context: Option<String>,
    config: PathBuf,
) -> Result<()> {
    let cfg = load_config(&config)?;
    let source = TomlChangelogSource::new(changelog);
    let mut ledger = JsonlLedger::new(&cfg.ledger_path);
    let factory = ShellSessionFactory {
        spec: cfg.backend_spec(),
        options: cfg.session_options(),
        connection,
    };
    let staging = cfg.staging_area();

    let summary = apply_changelog(
        ApplyPlan {
            source: &source,
            validator: &DefaultChangesetValidator,
            ledger: &mut ledger,
            factory: &factory,
            staging: &staging,
        },
        context.as_deref(),
    )?;
    println!(
        "executed {} skipped {} failed-but-recorded {}",
        summary.executed(),
        summary.skipped(),
        summary.failed_recorded()
    );
    Ok(())
}

fn cmd_verify(changelog: PathBuf) -> Result<()> {
    let source = TomlChangelogSource::new(changelog);
    let changesets = verify_changelog(&source, &DefaultChangesetValidator)?;
    println!("{} changesets valid", changesets.len());
    Ok(())
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<EngineError>() {
        Some(EngineError::Validation(_) | EngineError::Source(_)) | None => exit_codes::INVALID,
        Some(_) => exit_codes::FAILED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_apply_defaults() {
        let cli = Cli::parse_from([
            "migrator",
            "apply",
            "--connection",
            "mongodb://localhost/app",
            "--changelog",
            "changelog.toml",
        ]);
        match cli.command {
            Command::Apply {
                connection,
                context,
                config,
                ..
            } => {
                assert_eq!(connection, "mongodb://localhost/app");
                assert_eq!(context, None);
                assert_eq!(config, PathBuf::from("migrator.toml"));
            }
            Command::Verify { .. } => panic!("expected apply"),
        }
    }

    #[test]
    fn parse_verify_with_global_verbose() {
        let cli = Cli::parse_from(["migrator", "verify", "--changelog", "c.toml", "-v"]);
        assert!(cli.verbose);
        assert!(matches!(cli.command, Command::Verify { .. }));
    }

    #[test]
    fn exit_codes_separate_invalid_input_from_failed_runs() {
        let invalid = anyhow::Error::from(EngineError::validation("dup"));
        let failed = anyhow::Error::from(EngineError::Protocol("died".to_string()));
        let config = anyhow::anyhow!("parse migrator.toml");
        assert_eq!(exit_code_for(&invalid), exit_codes::INVALID);
        assert_eq!(exit_code_for(&failed), exit_codes::FAILED);
        assert_eq!(exit_code_for(&config), exit_codes::INVALID);
    }
}
