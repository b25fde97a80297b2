#![forbid(unsafe_code)]

use crate::error::EngineError;
use crate::guard::{self, WriteMode};
use crate::loader::{Session, from_sql};
use crate::result::{QueryResult, ResultColumn, RowSink, RunSummary};
use crate::statement::{self, Analysis};
use crate::typecheck;
use ds_core::ColumnType;
use ds_storage::{Catalog, ResolvedTable};
use tracing::debug;

/// Executes SQL against the virtual tables of one catalog.
///
/// Every call starts from a fresh snapshot: the referenced tables are read from their
/// sources into an in-memory SQLite database that lives for that call only.
#[derive(Clone, Copy, Debug)]
pub struct QueryEngine<'c> {
    catalog: &'c Catalog,
}

impl<'c> QueryEngine<'c> {
    pub fn new(catalog: &'c Catalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &'c Catalog {
        self.catalog
    }

    /// Runs one statement, streaming its rows (or the mutation preview) into `sink`.
    pub fn execute(
        &self,
        sql: &str,
        mode: WriteMode,
        sink: &mut dyn RowSink,
    ) -> Result<RunSummary, EngineError> {
        let analysis = statement::analyze(sql)?;
        let tables = self.resolve(&analysis)?;
        typecheck::check(&analysis.comparisons, &tables)?;
        debug!(kind = analysis.kind.as_str(), tables = ?analysis.tables, "executing statement");

        if analysis.kind.is_mutating() {
            guard::run(sql, &analysis, &tables, mode, sink)
        } else {
            self.select(sql, &tables, sink)
        }
    }

    /// Read-only convenience: collects the rows in memory. Mutations are rejected.
    pub fn query(&self, sql: &str) -> Result<QueryResult, EngineError> {
        let mut result = QueryResult::new();
        self.execute(sql, WriteMode::Reject, &mut result)?;
        Ok(result)
    }

    fn resolve(&self, analysis: &Analysis) -> Result<Vec<ResolvedTable>, EngineError> {
        analysis
            .tables
            .iter()
            .map(|name| self.catalog.resolve(name).map_err(EngineError::from))
            .collect()
    }

    fn select(
        &self,
        sql: &str,
        tables: &[ResolvedTable],
        sink: &mut dyn RowSink,
    ) -> Result<RunSummary, EngineError> {
        let mut session = Session::open()?;
        session.attach(tables)?;

        let mut stmt = session.conn().prepare(sql)?;
        let columns = stmt
            .columns()
            .iter()
            .map(|column| {
                ResultColumn::new(
                    column.name(),
                    column.decl_type().and_then(ColumnType::from_decl),
                )
            })
            .collect::<Vec<_>>();
        sink.columns(&columns)?;

        let mut count = 0usize;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let values = columns
                .iter()
                .enumerate()
                .map(|(index, column)| row.get_ref(index).map(|value| from_sql(value, column.ty)))
                .collect::<Result<Vec<_>, _>>()?;
            sink.row(values)?;
            count += 1;
        }

        let summary = RunSummary {
            rows: count,
            skipped_records: session.skipped(),
            mutation: None,
        };
        sink.finish(&summary)?;
        Ok(summary)
    }
}
