#![forbid(unsafe_code)]

use crate::error::EngineError;
use ds_storage::{Catalog, Config, GitRepo};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Repositories behind the git tables: the explicit list in order, or the repository
/// containing `cwd`. No repository at all leaves the git tables empty.
pub fn select_repos(explicit: &[PathBuf], cwd: &Path) -> Result<Vec<GitRepo>, EngineError> {
    if !explicit.is_empty() {
        return explicit
            .iter()
            .map(|path| GitRepo::open(path).map_err(EngineError::from))
            .collect();
    }
    match GitRepo::discover(cwd)? {
        Some(repo) => {
            debug!(repo = %repo.label(), "using repository of the working directory");
            Ok(vec![repo])
        }
        None => {
            warn!(cwd = %cwd.display(), "no git repository found; git tables will be empty");
            Ok(Vec::new())
        }
    }
}

/// One namespace over the coding-assistant tables and the git tables.
pub fn unified_catalog(config: &Config, repos: Vec<GitRepo>) -> Result<Catalog, EngineError> {
    let catalog = Catalog::assistant(config).merge(Catalog::git(repos))?;
    debug!(tables = catalog.len(), "catalog ready");
    Ok(catalog)
}
