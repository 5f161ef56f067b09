//! Concepts and the tiers they are consulted in.

use serde::{Deserialize, Serialize};

use super::annotation::ConceptRef;

/// A concept as supplied by a catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    pub uri: String,
    pub label: String,
    #[serde(default)]
    pub definition: Option<String>,
    #[serde(default, rename = "type")]
    pub concept_type: Option<String>,
}

impl Concept {
    pub fn new(uri: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            label: label.into(),
            definition: None,
            concept_type: None,
        }
    }

    pub fn to_ref(&self, source_name: &str, source_version: Option<&str>) -> ConceptRef {
        ConceptRef {
            uri: self.uri.clone(),
            label: self.label.clone(),
            definition: self.definition.clone(),
            concept_type: self.concept_type.clone(),
            source_name: source_name.to_string(),
            source_version: source_version.map(str::to_string),
        }
    }
}

/// A named collection of concepts with its version
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConceptSource {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub concepts: Vec<Concept>,
}

/// One generation pass: a tier name bound to the source it draws from
#[derive(Debug, Clone, PartialEq)]
pub struct ConceptTier {
    /// Tier name (e.g. "core", "intermediate", "domain")
    pub name: String,
    pub source_name: String,
    pub source_version: Option<String>,
    pub concepts: Vec<Concept>,
}

impl ConceptTier {
    pub fn find(&self, uri: &str) -> Option<&Concept> {
        self.concepts.iter().find(|c| c.uri == uri)
    }

    pub fn concept_ref(&self, concept: &Concept) -> ConceptRef {
        concept.to_ref(&self.source_name, self.source_version.as_deref())
    }
}
