//! The playbook catalog collaborator (§1 SCOPE: "The playbook catalog
//! (content-addressed store of YAML playbooks): the core consumes
//! `fetch(path, version) -> playbook` only").
//!
//! A production catalog (git-backed, object-store-backed, database-backed)
//! is an external collaborator behind this trait; [`FsPlaybookCatalog`] is
//! a reference implementation that resolves `path`/`version` to a YAML
//! file on disk, sufficient for local development and the test fixtures in
//! this repository.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use super::{parse, ParseError, Playbook};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("playbook not found: {path}@{version}")]
    NotFound { path: String, version: String },

    #[error("failed to read playbook source: {0}")]
    Io(String),

    #[error("failed to parse playbook: {0}")]
    Parse(#[from] ParseError),
}

#[async_trait]
pub trait PlaybookCatalog: Send + Sync + 'static {
    async fn fetch(&self, path: &str, version: &str) -> Result<Playbook, CatalogError>;
}

/// Resolves `{root}/{path}.yaml` for `version == "latest"`, otherwise
/// `{root}/{path}@{version}.yaml`. `path` is sanitized to forbid `..`
/// segments so it cannot escape `root`.
pub struct FsPlaybookCatalog {
    root: PathBuf,
}

impl FsPlaybookCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str, version: &str) -> Result<PathBuf, CatalogError> {
        if path.split('/').any(|segment| segment == "..") {
            return Err(CatalogError::Io(format!("invalid playbook path: {path}")));
        }
        let file_name = if version.is_empty() || version == "latest" {
            format!("{path}.yaml")
        } else {
            format!("{path}@{version}.yaml")
        };
        Ok(self.root.join(file_name))
    }
}

#[async_trait]
impl PlaybookCatalog for FsPlaybookCatalog {
    async fn fetch(&self, path: &str, version: &str) -> Result<Playbook, CatalogError> {
        let file_path = self.resolve(path, version)?;
        let source = tokio::fs::read_to_string(&file_path).await.map_err(|_| {
            CatalogError::NotFound {
                path: path.to_string(),
                version: version.to_string(),
            }
        })?;
        Ok(parse(&source)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_path_traversal() {
        let catalog = FsPlaybookCatalog::new("/tmp/playbooks");
        assert!(catalog.resolve("../etc/passwd", "latest").is_err());
    }

    #[test]
    fn resolves_latest_without_version_suffix() {
        let catalog = FsPlaybookCatalog::new("/tmp/playbooks");
        let resolved = catalog.resolve("orders/process", "latest").unwrap();
        assert_eq!(resolved, PathBuf::from("/tmp/playbooks/orders/process.yaml"));
    }

    #[test]
    fn resolves_pinned_version() {
        let catalog = FsPlaybookCatalog::new("/tmp/playbooks");
        let resolved = catalog.resolve("orders/process", "3").unwrap();
        assert_eq!(
            resolved,
            PathBuf::from("/tmp/playbooks/orders/process@3.yaml")
        );
    }
}
