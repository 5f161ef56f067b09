//! Document text source.
//!
//! `DirectorySource` lays documents out as `<root>/<type>/<id>.txt`, e.g.
//! `docs/guideline/12.txt`. The text is returned byte-for-byte; span offsets
//! are computed against exactly what this returns.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use glob::glob;
use tracing::debug;

use crate::domain::{DocumentRef, DocumentType};

#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Clean text of a document, `None` if it does not exist
    async fn fetch_text(&self, document: DocumentRef) -> Result<Option<String>>;

    /// All known documents, optionally limited to one type
    async fn list_documents(&self, document_type: Option<DocumentType>) -> Result<Vec<DocumentRef>>;
}

/// Documents stored as text files under a root directory
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, document: DocumentRef) -> PathBuf {
        self.root
            .join(document.document_type.as_str())
            .join(format!("{}.txt", document.document_id))
    }
}

#[async_trait]
impl DocumentSource for DirectorySource {
    async fn fetch_text(&self, document: DocumentRef) -> Result<Option<String>> {
        let path = self.path_for(document);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to read document: {}", path.display()))
            }
        }
    }

    async fn list_documents(&self, document_type: Option<DocumentType>) -> Result<Vec<DocumentRef>> {
        let types = match document_type {
            Some(t) => vec![t],
            None => vec![DocumentType::Guideline, DocumentType::Case],
        };

        let mut documents = Vec::new();
        for doc_type in types {
            let pattern = self.root.join(doc_type.as_str()).join("*.txt");
            let pattern = pattern
                .to_str()
                .with_context(|| format!("Non UTF-8 path: {}", pattern.display()))?;

            for entry in glob(pattern).context("Invalid document glob pattern")? {
                let path = entry.context("Failed to read document directory entry")?;
                let id = path
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .and_then(|stem| stem.parse::<i64>().ok());
                match id {
                    Some(id) => documents.push(DocumentRef::new(doc_type, id)),
                    None => debug!(path = %path.display(), "Skipping file without numeric id"),
                }
            }
        }

        documents.sort();
        Ok(documents)
    }
}
