#![forbid(unsafe_code)]

use crate::error::CatalogError;
use crate::git::{self, GitRepo};
use crate::source::{TableKind, TableSource};
use crate::tables;
use crate::Config;
use ds_core::Schema;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Clone, Debug)]
enum Entry {
    Table(Arc<dyn TableSource>),
    Alias {
        target: String,
        table: Arc<dyn TableSource>,
    },
}

impl Entry {
    fn table(&self) -> &Arc<dyn TableSource> {
        match self {
            Self::Table(table) | Self::Alias { table, .. } => table,
        }
    }

    fn same_as(&self, other: &Entry) -> bool {
        let same_source = std::ptr::eq(
            Arc::as_ptr(self.table()).cast::<()>(),
            Arc::as_ptr(other.table()).cast::<()>(),
        );
        let same_shape = matches!(
            (self, other),
            (Self::Table(_), Self::Table(_)) | (Self::Alias { .. }, Self::Alias { .. })
        );
        same_source && same_shape
    }
}

/// A name resolved against the catalog.
#[derive(Clone, Debug)]
pub struct ResolvedTable {
    /// Name as registered (lowercase), which may be an alias.
    pub name: String,
    /// Name of the table that owns the reader.
    pub canonical: String,
    pub source: Arc<dyn TableSource>,
}

impl ResolvedTable {
    pub fn is_alias(&self) -> bool {
        self.name != self.canonical
    }
}

/// Listing entry for one table or alias.
#[derive(Clone, Debug)]
pub struct TableInfo {
    pub name: String,
    pub schema: Schema,
    pub kind: TableKind,
    pub alias_of: Option<String>,
    pub description: String,
}

/// Table namespace of one invocation. Names are case-insensitive and unique.
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    entries: BTreeMap<String, Entry>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The coding-assistant tables over `config`'s data directories.
    pub fn assistant(config: &Config) -> Self {
        let mut catalog = Self::new();
        catalog.insert_table(Arc::new(tables::history::table(config)));
        catalog.insert_table(Arc::new(tables::jhistory::table(config)));
        catalog.insert_table(Arc::new(tables::transcripts::table(config)));
        catalog.insert_table(Arc::new(tables::todos::table(config)));
        catalog.insert_table(Arc::new(tables::stats::table(config)));
        catalog.insert_alias("codex_history", "jhistory");
        catalog
    }

    /// The repository tables; each is the ordered union over `repos`.
    pub fn git(repos: Vec<GitRepo>) -> Self {
        let mut catalog = Self::new();
        for table in git::tables(repos) {
            catalog.insert_table(Arc::new(table));
        }
        catalog
    }

    // Builtin names are fixed and distinct, so construction cannot collide.
    fn insert_table(&mut self, table: Arc<dyn TableSource>) {
        let name = table.name().to_ascii_lowercase();
        self.entries.insert(name, Entry::Table(table));
    }

    fn insert_alias(&mut self, alias: &str, existing: &str) {
        if let Some(Entry::Table(table)) = self.entries.get(existing) {
            let entry = Entry::Alias {
                target: existing.to_string(),
                table: Arc::clone(table),
            };
            self.entries.insert(alias.to_string(), entry);
        }
    }

    pub fn register(&mut self, table: Arc<dyn TableSource>) -> Result<(), CatalogError> {
        let name = table.name().to_ascii_lowercase();
        if self.entries.contains_key(&name) {
            return Err(CatalogError::NameCollision(name));
        }
        self.entries.insert(name, Entry::Table(table));
        Ok(())
    }

    /// Makes `alias` resolve to the same reader and schema as `existing`.
    pub fn alias(&mut self, alias: &str, existing: &str) -> Result<(), CatalogError> {
        let alias_key = alias.to_ascii_lowercase();
        if self.entries.contains_key(&alias_key) {
            return Err(CatalogError::InvalidAlias {
                alias: alias.to_string(),
                reason: "name is already taken".to_string(),
            });
        }
        let resolved = self
            .resolve(existing)
            .map_err(|err| CatalogError::InvalidAlias {
                alias: alias.to_string(),
                reason: err.to_string(),
            })?;
        self.entries.insert(
            alias_key,
            Entry::Alias {
                target: resolved.canonical,
                table: resolved.source,
            },
        );
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<ResolvedTable, CatalogError> {
        let key = name.to_ascii_lowercase();
        match self.entries.get(&key) {
            Some(Entry::Table(table)) => Ok(ResolvedTable {
                canonical: key.clone(),
                name: key,
                source: Arc::clone(table),
            }),
            Some(Entry::Alias { target, table }) => Ok(ResolvedTable {
                name: key,
                canonical: target.clone(),
                source: Arc::clone(table),
            }),
            None => Err(CatalogError::TableNotFound {
                name: name.to_string(),
                suggestions: self.suggest(&key),
            }),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    /// Closest known names by edit distance, best first.
    fn suggest(&self, name: &str) -> Vec<String> {
        let limit = (name.len() / 3).max(2);
        let mut scored = self
            .entries
            .keys()
            .map(|known| (levenshtein(name, known), known))
            .filter(|(distance, _)| *distance <= limit)
            .collect::<Vec<_>>();
        scored.sort();
        scored
            .into_iter()
            .take(3)
            .map(|(_, known)| known.clone())
            .collect()
    }

    /// Tables and aliases in name order.
    pub fn list(&self) -> Vec<TableInfo> {
        self.entries
            .iter()
            .map(|(name, entry)| {
                let table = entry.table();
                TableInfo {
                    name: name.clone(),
                    schema: table.schema(),
                    kind: table.kind(),
                    alias_of: match entry {
                        Entry::Alias { target, .. } => Some(target.clone()),
                        Entry::Table(_) => None,
                    },
                    description: table.description().to_string(),
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Union of two catalogs.
    ///
    /// A name present in both is accepted only when both sides hold the identical
    /// entry (the same reader instance, registered the same way); anything else is
    /// a [`CatalogError::NameCollision`].
    pub fn merge(mut self, other: Catalog) -> Result<Catalog, CatalogError> {
        for (name, entry) in other.entries {
            match self.entries.get(&name) {
                Some(existing) if existing.same_as(&entry) => {}
                Some(_) => return Err(CatalogError::NameCollision(name)),
                None => {
                    self.entries.insert(name, entry);
                }
            }
        }
        Ok(self)
    }
}

/// Edit distance between two names, counted in chars.
fn levenshtein(a: &str, b: &str) -> usize {
    let b_len = b.chars().count();
    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut curr = vec![0; b_len + 1];
    for (i, a_char) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, b_char) in b.chars().enumerate() {
            let cost = usize::from(a_char != b_char);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_len]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_catalog_exposes_alias() {
        let catalog = Catalog::assistant(&Config::new("/nowhere/claude", "/nowhere/codex"));
        let resolved = catalog.resolve("CODEX_HISTORY").expect("alias");
        assert!(resolved.is_alias());
        assert_eq!(resolved.canonical, "jhistory");
        let canonical = catalog.resolve("jhistory").expect("table");
        assert!(Arc::ptr_eq(&resolved.source, &canonical.source));
    }

    #[test]
    fn unknown_names_suggest_neighbours() {
        let catalog = Catalog::assistant(&Config::new("/nowhere/claude", "/nowhere/codex"));
        let err = catalog.resolve("histroy").expect_err("unknown");
        match err {
            CatalogError::TableNotFound { suggestions, .. } => {
                assert_eq!(suggestions.first().map(String::as_str), Some("history"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn edit_distance_counts_chars() {
        assert_eq!(levenshtein("history", "history"), 0);
        assert_eq!(levenshtein("histroy", "history"), 2);
        assert_eq!(levenshtein("", "tags"), 4);
        assert_eq!(levenshtein("café", "cafe"), 1);
    }

    #[test]
    fn listing_reports_aliases_in_name_order() {
        let catalog = Catalog::assistant(&Config::new("/nowhere/claude", "/nowhere/codex"));
        let listing = catalog.list();
        let names = listing.iter().map(|info| info.name.as_str()).collect::<Vec<_>>();
        assert_eq!(
            names,
            ["codex_history", "history", "jhistory", "stats", "todos", "transcripts"]
        );
        assert_eq!(listing[0].alias_of.as_deref(), Some("jhistory"));
        assert_eq!(listing[0].schema, listing[2].schema);
        assert_eq!(listing[1].kind, TableKind::SingleFile);
    }

    #[test]
    fn registration_and_aliases_refuse_taken_names() {
        let config = Config::new("/nowhere/claude", "/nowhere/codex");
        let mut catalog = Catalog::assistant(&config);
        let err = catalog
            .register(Arc::new(tables::history::table(&config)))
            .expect_err("duplicate");
        assert!(matches!(err, CatalogError::NameCollision(name) if name == "history"));

        catalog.alias("prompts", "HISTORY").expect("alias");
        assert_eq!(catalog.resolve("prompts").expect("alias").canonical, "history");
        assert!(matches!(
            catalog.alias("prompts", "stats"),
            Err(CatalogError::InvalidAlias { .. })
        ));
        assert!(matches!(
            catalog.alias("missing_alias", "nope"),
            Err(CatalogError::InvalidAlias { .. })
        ));
    }

    #[test]
    fn merge_rejects_collisions_but_keeps_shared_entries() {
        let config = Config::new("/nowhere/claude", "/nowhere/codex");
        let assistant = Catalog::assistant(&config);
        let merged = assistant
            .clone()
            .merge(assistant.clone())
            .expect("identical entries are shared");
        assert_eq!(merged.len(), assistant.len());

        let err = assistant
            .merge(Catalog::assistant(&config))
            .expect_err("independent readers collide");
        assert!(matches!(err, CatalogError::NameCollision(_)));

        let unified = Catalog::assistant(&config)
            .merge(Catalog::git(Vec::new()))
            .expect("disjoint");
        assert!(unified.contains("commits") && unified.contains("codex_history"));
    }
}
