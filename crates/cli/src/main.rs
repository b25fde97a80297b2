#![forbid(unsafe_code)]

mod args;

use args::Cli;
use clap::Parser;
use ds_engine::{
    Encoder, EngineError, MutationSummary, QueryEngine, RunSummary, select_repos, unified_catalog,
};
use ds_storage::Config;
use std::io::{self, Read};
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "DEVSQL_LOG";

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        // A closed pipe (`devsql ... | head`) is not a failure.
        Err(EngineError::Output(err)) if err.kind() == io::ErrorKind::BrokenPipe => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("devsql: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}

fn init_logging(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: &Cli) -> Result<(), EngineError> {
    let config = Config::resolve(cli.data_dir.clone(), cli.codex_dir.clone());
    debug!(
        data_dir = %config.data_dir().display(),
        codex_dir = %config.codex_dir().display(),
        "resolved data directories"
    );
    let cwd = std::env::current_dir().map_err(|err| {
        EngineError::Execution(format!("cannot read the working directory: {err}"))
    })?;
    let repos = select_repos(&cli.repos, &cwd)?;
    let catalog = unified_catalog(&config, repos)?;
    let engine = QueryEngine::new(&catalog);

    let sql = statement_text(&cli.sql)?;
    let stdout = io::stdout();
    let mut encoder = Encoder::new(cli.format, stdout.lock());
    let summary = engine.execute(&sql, cli.write_mode(), &mut encoder)?;
    report(&summary);
    Ok(())
}

fn statement_text(arg: &str) -> Result<String, EngineError> {
    let sql = if arg == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .map_err(|err| EngineError::Execution(format!("cannot read SQL from stdin: {err}")))?;
        buf
    } else {
        arg.to_string()
    };
    let sql = sql.trim();
    if sql.is_empty() {
        return Err(EngineError::Parse("empty statement".to_string()));
    }
    Ok(sql.to_string())
}

/// Out-of-band notes go to stderr so stdout stays machine-readable.
fn report(summary: &RunSummary) {
    if summary.skipped_records > 0 {
        eprintln!(
            "devsql: skipped {} malformed record(s)",
            summary.skipped_records
        );
    }
    if let Some(mutation) = &summary.mutation {
        eprintln!("devsql: {}", describe_mutation(mutation));
    }
}

fn describe_mutation(mutation: &MutationSummary) -> String {
    let counts = format!(
        "{} deleted, {} updated, {} inserted",
        mutation.deleted, mutation.updated, mutation.inserted
    );
    let file = mutation.file.display();
    match (&mutation.backup, mutation.applied) {
        (_, false) if mutation.affected() == 0 => {
            format!("no rows affected in {}; nothing written", mutation.table)
        }
        (_, false) => format!("dry run: {counts} in {file}; nothing written"),
        (Some(backup), true) => format!("{counts} in {file}; backup at {}", backup.display()),
        (None, true) => format!("{counts} in {file} (new file, no backup)"),
    }
}
