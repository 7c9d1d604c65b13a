// assign-bulk - reconcile a bulk submission upload from the command line

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use thiserror::Error;

use assign_bulk::{
    ConfigError, DirectorySink, DiskStore, IdentifierField, IdentifierResolver, JournalError,
    JsonRoster, LogHook, ReconcileConfig, ReconcileError, Reconciler, RosterSource, RunJournal,
    RunReport, RunRequest, ScopeLock,
};

const EXIT_SUCCESS: u8 = 0;
const EXIT_ERROR: u8 = 1;
const EXIT_UNMATCHED: u8 = 2;

#[derive(Parser)]
#[command(name = "assign-bulk")]
#[command(about = "Split one bulk upload into per-recipient submissions")]
#[command(version)]
struct Cli {
    /// JSON config file
    #[arg(long, global = true, env = "ASSIGN_BULK_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Match an upload against a roster and report (or commit) the result
    #[command(after_help = "\
Exit codes:
  0  every file was matched
  1  the run failed
  2  the run finished but some files matched no recipient")]
    Run {
        /// Directory holding the upload (never modified)
        #[arg(long, value_name = "DIR")]
        upload: PathBuf,

        /// JSON roster of eligible recipients
        #[arg(long, value_name = "FILE")]
        roster: PathBuf,

        /// Roster field that names files and folders
        #[arg(long, value_enum)]
        identifier: Option<IdentifierField>,

        /// Staging scope; runs against the same scope are serialized
        #[arg(long, default_value = "default")]
        scope: String,

        /// Replace recipients' submissions instead of previewing
        #[arg(long)]
        commit: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that a token names exactly one recipient
    Lookup {
        #[arg(long, value_name = "FILE")]
        roster: PathBuf,

        #[arg(long, value_enum)]
        identifier: Option<IdentifierField>,

        token: String,
    },

    /// Show the journaled state of a scope, or every unfinished run
    Status {
        #[arg(long)]
        scope: Option<String>,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error("{0}")]
    Usage(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error("failed to write output: {0}")]
    Output(#[from] serde_json::Error),
}

fn main() -> ExitCode {
    assign_bulk::load_env();
    assign_bulk::init_tracing();

    let cli = Cli::parse();
    match execute(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

fn execute(cli: Cli) -> Result<u8, CliError> {
    let config = ReconcileConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            upload,
            roster,
            identifier,
            scope,
            commit,
            json,
        } => {
            if !upload.is_dir() {
                return Err(CliError::Usage(format!(
                    "upload directory {} does not exist",
                    upload.display()
                )));
            }
            let request = RunRequest {
                identifier_field: identifier.unwrap_or(config.identifier_field),
                commit,
            };

            let _lock = ScopeLock::acquire(&config.journal_dir, &scope)?;
            let journal = RunJournal::new(&config.journal_dir);
            let scope_root = config.scope_root(&scope);
            let mut store = DiskStore::new(&upload, &scope_root);
            let mut sink = DirectorySink::new(config.submission_root(&scope), config.policy);

            let report = {
                let mut reconciler = Reconciler::new(&mut store, &mut sink)
                    .with_hook(Box::new(LogHook))
                    .with_journal(&journal, scope.clone());
                reconciler.run(&JsonRoster::new(roster), &request)?
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report, &scope_root);
            }

            Ok(if report.has_unmatched() {
                EXIT_UNMATCHED
            } else {
                EXIT_SUCCESS
            })
        }

        Commands::Lookup {
            roster,
            identifier,
            token,
        } => {
            let recipients = JsonRoster::new(roster).list_eligible_recipients()?;
            let field = identifier.unwrap_or(config.identifier_field);
            let resolver = IdentifierResolver::build(recipients, field)?;
            let recipient = resolver.lookup_or_fail(&token)?;
            println!("{}\t{}", recipient.id, recipient.full_name);
            Ok(EXIT_SUCCESS)
        }

        Commands::Status { scope } => {
            let journal = RunJournal::new(&config.journal_dir);
            let records = match scope {
                Some(scope) => journal.load(&scope)?.into_iter().collect(),
                None => journal.incomplete_runs()?,
            };

            if records.is_empty() {
                println!("No runs to show");
            }
            for record in records {
                let outcome = match &record.failure {
                    Some(reason) => format!("failed: {}", reason),
                    None if record.is_complete() => "complete".to_string(),
                    None => "interrupted".to_string(),
                };
                println!(
                    "{}  {}  {}  ({}, updated {})",
                    record.scope,
                    record.state,
                    outcome,
                    record.run_id,
                    record.updated_at.to_rfc3339()
                );
            }
            Ok(EXIT_SUCCESS)
        }
    }
}

fn print_report(report: &RunReport, scope_root: &std::path::Path) {
    let mode = if report.preview { "Preview" } else { "Committed" };
    println!(
        "{}: {} recipient(s), {} unmatched file(s)",
        mode,
        report.recipients.len(),
        report.unmatched_paths.len()
    );

    for recipient in &report.recipients {
        let status = if report.preview || recipient.committed {
            ""
        } else {
            "  (not submitted)"
        };
        println!(
            "  {}  {}{}",
            recipient.recipient_id, recipient.full_name, status
        );
        for path in &recipient.matched_file_paths {
            println!("      {}", path);
        }
        for notice in &recipient.notices {
            println!("    ! {}", notice);
        }
    }

    if report.has_unmatched() {
        println!("Unmatched:");
        for path in &report.unmatched_paths {
            println!("  {}", path);
        }
    }
    if report.staging_preserved {
        println!("Staging kept at {}", scope_root.display());
    }
}
