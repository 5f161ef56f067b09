//! Concept catalog: which concepts exist, and which tiers a context uses.
//!
//! `YamlCatalog` reads a single file:
//!
//! ```yaml
//! sources:
//!   core:
//!     version: "2024.1"
//!     concepts:
//!       - uri: http://example.org/eng#PublicSafety
//!         label: Public Safety Principle
//! contexts:
//!   engineering:
//!     - tier: core
//!       source: core
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::ConceptSource;

/// One step of a context's tier order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierMapping {
    pub tier: String,
    pub source: String,
}

impl TierMapping {
    pub fn new(tier: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            tier: tier.into(),
            source: source.into(),
        }
    }
}

#[async_trait]
pub trait ConceptCatalog: Send + Sync {
    /// Tiers to consult for a context, in priority order
    async fn mapping_for_context(&self, context_id: &str) -> Result<Vec<TierMapping>>;

    /// Concepts of the named sources; unknown names are simply absent
    async fn list_concepts(&self, source_names: &[String]) -> Result<HashMap<String, ConceptSource>>;
}

/// On-disk catalog format
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub sources: HashMap<String, ConceptSource>,
    #[serde(default)]
    pub contexts: HashMap<String, Vec<TierMapping>>,
}

/// Catalog backed by a YAML file, loaded once
#[derive(Debug, Clone)]
pub struct YamlCatalog {
    path: Option<PathBuf>,
    catalog: CatalogFile,
}

impl YamlCatalog {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog file: {}", path.display()))?;
        let mut catalog = Self::from_yaml(&content)
            .with_context(|| format!("Invalid catalog file: {}", path.display()))?;
        catalog.path = Some(path.to_path_buf());
        Ok(catalog)
    }

    /// Catalog with no sources and no contexts
    pub fn empty() -> Self {
        Self {
            path: None,
            catalog: CatalogFile::default(),
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let catalog: CatalogFile =
            serde_yaml::from_str(content).context("Failed to parse catalog YAML")?;
        Self::validate(&catalog)?;
        Ok(Self {
            path: None,
            catalog,
        })
    }

    fn validate(catalog: &CatalogFile) -> Result<()> {
        for (name, source) in &catalog.sources {
            for concept in &source.concepts {
                if concept.uri.trim().is_empty() {
                    anyhow::bail!("Source '{}' has a concept with an empty uri", name);
                }
            }
        }
        for (context, tiers) in &catalog.contexts {
            if tiers.is_empty() {
                anyhow::bail!("Context '{}' has no tiers", context);
            }
        }
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn contexts(&self) -> impl Iterator<Item = &str> {
        self.catalog.contexts.keys().map(String::as_str)
    }
}

#[async_trait]
impl ConceptCatalog for YamlCatalog {
    async fn mapping_for_context(&self, context_id: &str) -> Result<Vec<TierMapping>> {
        self.catalog
            .contexts
            .get(context_id)
            .cloned()
            .with_context(|| format!("Unknown context '{}'", context_id))
    }

    async fn list_concepts(&self, source_names: &[String]) -> Result<HashMap<String, ConceptSource>> {
        Ok(source_names
            .iter()
            .filter_map(|name| {
                self.catalog
                    .sources
                    .get(name)
                    .map(|source| (name.clone(), source.clone()))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CATALOG: &str = r#"
sources:
  core:
    version: "2024.1"
    concepts:
      - uri: http://example.org/eng#PublicSafety
        label: Public Safety Principle
        definition: Engineers hold paramount the safety of the public
        type: principle
  ethics:
    concepts:
      - uri: http://example.org/eng#Honesty
        label: Honesty
contexts:
  engineering:
    - tier: core
      source: core
    - tier: domain
      source: ethics
"#;

    #[tokio::test]
    async fn test_mapping_keeps_tier_order() {
        let catalog = YamlCatalog::from_yaml(CATALOG).unwrap();
        let mapping = catalog.mapping_for_context("engineering").await.unwrap();
        assert_eq!(
            mapping,
            vec![TierMapping::new("core", "core"), TierMapping::new("domain", "ethics")]
        );
        assert!(catalog.mapping_for_context("medicine").await.is_err());
    }

    #[tokio::test]
    async fn test_list_concepts_skips_unknown_sources() {
        let catalog = YamlCatalog::from_yaml(CATALOG).unwrap();
        let sources = catalog
            .list_concepts(&["core".to_string(), "missing".to_string()])
            .await
            .unwrap();

        assert_eq!(sources.len(), 1);
        let core = &sources["core"];
        assert_eq!(core.version.as_deref(), Some("2024.1"));
        assert_eq!(core.concepts[0].concept_type.as_deref(), Some("principle"));
    }

    #[test]
    fn test_rejects_empty_context() {
        let yaml = "contexts:\n  empty: []\n";
        assert!(YamlCatalog::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CATALOG.as_bytes()).unwrap();

        let catalog = YamlCatalog::from_file(file.path()).unwrap();
        assert_eq!(catalog.path(), Some(file.path()));
        assert_eq!(catalog.contexts().collect::<Vec<_>>(), vec!["engineering"]);
    }
}
