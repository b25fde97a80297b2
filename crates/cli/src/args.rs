#![forbid(unsafe_code)]

use clap::Parser;
use ds_engine::{OutputFormat, WriteMode};
use std::path::PathBuf;

const AFTER_HELP: &str = "\
EXAMPLES:
  devsql \"SELECT COUNT(*) FROM history WHERE project = '/repo/a'\"
  devsql -f json \"SELECT date(timestamp / 1000, 'unixepoch') AS day, COUNT(*) FROM history GROUP BY day\"
  devsql --repos ../api,../web \"SELECT _repo, COUNT(*) FROM commits GROUP BY _repo\"
  devsql --dry-run \"DELETE FROM history WHERE project = '/tmp/scratch'\"

EXIT STATUS:
  0 ok, 1 execution, 2 syntax, 3 unknown table/column, 4 mutation rejected,
  5 backup, 6 source/git, 7 type mismatch, 8 write";

/// SQL over coding-assistant logs and git repositories.
#[derive(Parser, Debug)]
#[command(name = "devsql", version)]
#[command(about = "SQL over coding-assistant logs and git repositories")]
#[command(after_help = AFTER_HELP)]
pub struct Cli {
    /// SQL statement to run; `-` reads it from stdin
    pub sql: String,

    /// Output format: table, json, jsonl, csv or raw
    #[arg(short, long, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,

    /// Coding-assistant data directory [env: CLAUDE_DATA_DIR] [default: ~/.claude]
    #[arg(short, long, value_name = "PATH")]
    pub data_dir: Option<PathBuf>,

    /// Data directory of the secondary CLI [env: CODEX_HOME] [default: ~/.codex]
    #[arg(long, value_name = "PATH")]
    pub codex_dir: Option<PathBuf>,

    /// Repositories behind the git tables, in order
    /// [default: the repository containing the working directory]
    #[arg(short, long, value_name = "PATH,...", value_delimiter = ',')]
    pub repos: Vec<PathBuf>,

    /// Show what INSERT/UPDATE/DELETE would change without writing
    #[arg(long, conflicts_with = "write")]
    pub dry_run: bool,

    /// Apply INSERT/UPDATE/DELETE, keeping a backup of the rewritten file
    #[arg(long)]
    pub write: bool,

    /// Debug logging on stderr (DEVSQL_LOG overrides)
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn write_mode(&self) -> WriteMode {
        if self.write {
            WriteMode::Write
        } else if self.dry_run {
            WriteMode::DryRun
        } else {
            WriteMode::Reject
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("devsql").chain(args.iter().copied()))
    }

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_to_table_output_and_rejecting_mutations() {
        let cli = parse(&["SELECT 1"]).expect("parse");
        assert_eq!(cli.sql, "SELECT 1");
        assert_eq!(cli.format, OutputFormat::Table);
        assert_eq!(cli.write_mode(), WriteMode::Reject);
        assert!(cli.repos.is_empty());
    }

    #[test]
    fn repos_split_on_commas_in_order() {
        let cli = parse(&["--repos", "b,a", "-f", "CSV", "SELECT 1"]).expect("parse");
        assert_eq!(cli.repos, vec![PathBuf::from("b"), PathBuf::from("a")]);
        assert_eq!(cli.format, OutputFormat::Csv);
    }

    #[test]
    fn dry_run_and_write_are_mutually_exclusive() {
        assert!(parse(&["--dry-run", "--write", "DELETE FROM history WHERE 1=1"]).is_err());
        let cli = parse(&["--dry-run", "DELETE FROM history WHERE 1=1"]).expect("parse");
        assert_eq!(cli.write_mode(), WriteMode::DryRun);
        let cli = parse(&["--write", "DELETE FROM history WHERE 1=1"]).expect("parse");
        assert_eq!(cli.write_mode(), WriteMode::Write);
    }

    #[test]
    fn statement_is_required_and_formats_are_checked() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["--format", "yaml", "SELECT 1"]).is_err());
    }
}
