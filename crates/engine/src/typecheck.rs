#![forbid(unsafe_code)]

use crate::error::EngineError;
use crate::statement::{Comparison, Literal};
use ds_core::ColumnType;
use ds_storage::ResolvedTable;

/// Rejects comparisons whose literal can never match the column's declared type.
///
/// SQLite would silently compare a TEXT column against a number (always false under
/// its affinity rules); such a query is almost always a mistake, so it is reported.
/// A column name found in several referenced tables is only rejected when none of
/// them accepts the literal.
pub fn check(comparisons: &[Comparison], tables: &[ResolvedTable]) -> Result<(), EngineError> {
    for comparison in comparisons {
        let candidates = tables
            .iter()
            .filter(|table| {
                comparison
                    .qualifier
                    .as_deref()
                    .is_none_or(|qualifier| qualifier == table.name || !is_table_name(qualifier, tables))
            })
            .filter_map(|table| table.source.schema().column(&comparison.column))
            .map(|column| column.ty)
            .collect::<Vec<_>>();
        let Some(&ty) = candidates.first() else {
            continue;
        };
        if candidates.iter().all(|ty| !accepts(*ty, &comparison.literal)) {
            return Err(EngineError::Type(format!(
                "`{}` compares {} column `{}` with {}",
                comparison.fragment,
                ty,
                comparison.column,
                describe(&comparison.literal)
            )));
        }
    }
    Ok(())
}

fn is_table_name(name: &str, tables: &[ResolvedTable]) -> bool {
    tables.iter().any(|table| table.name == name)
}

fn accepts(ty: ColumnType, literal: &Literal) -> bool {
    match (ty, literal) {
        (ColumnType::Json, _) => true,
        (ColumnType::Text, Literal::Text(_)) => true,
        (ColumnType::Text, Literal::Number(_) | Literal::Boolean(_)) => false,
        (ColumnType::Integer | ColumnType::Real | ColumnType::Boolean, Literal::Number(_)) => true,
        (ColumnType::Integer | ColumnType::Real | ColumnType::Boolean, Literal::Boolean(_)) => true,
        (ColumnType::Integer | ColumnType::Real, Literal::Text(text)) => {
            text.trim().parse::<f64>().is_ok()
        }
        (ColumnType::Boolean, Literal::Text(text)) => matches!(text.trim(), "0" | "1"),
    }
}

fn describe(literal: &Literal) -> String {
    match literal {
        Literal::Number(number) => format!("the number {number}"),
        Literal::Text(text) => format!("the string '{text}'"),
        Literal::Boolean(flag) => format!("the boolean {flag}"),
    }
}
