//! Knowledge files: parsing, indexing and per-agent injection
//!
//! An agent builds one `KnowledgeIndex` at construction and keeps it behind an
//! `Arc`. Which items have already been placed in the agent's context is
//! tracked separately by `LoadedKnowledge`, owned by that agent alone.

mod index;
pub mod parser;

pub use index::KnowledgeIndex;
pub use parser::{ParsedFile, DEFAULT_HEADING_LEVEL};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Function,
    Concept,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Function => "function",
            ItemType::Concept => "concept",
        }
    }
}

/// One named function or concept from a knowledge file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeItem {
    pub name: String,
    pub item_type: ItemType,
    /// Keyword the heading used, normalized ("contract function", "pattern", ...)
    pub label: String,
    /// Parameter list as written, e.g. "(text, limit)"
    pub signature: Option<String>,
    pub category: String,
    pub source_path: PathBuf,
    pub line: usize,
    pub description: String,
    pub raw_content: String,
}

/// Items already injected into one agent's context
#[derive(Debug, Clone, Default)]
pub struct LoadedKnowledge {
    names: HashSet<String>,
}

impl LoadedKnowledge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select items referenced by `text` that are not loaded yet.
    ///
    /// Each directly referenced item brings along the items its own body
    /// references. Returned items are marked loaded.
    pub fn inject<'a>(&mut self, index: &'a KnowledgeIndex, text: &str) -> Vec<&'a KnowledgeItem> {
        let direct = index.detect_references(text);
        let mut wanted: Vec<String> = direct.iter().cloned().collect();
        for name in &direct {
            for dep in index.references_of(name) {
                if !wanted.contains(&dep) {
                    wanted.push(dep);
                }
            }
        }

        let mut injected = Vec::new();
        for name in wanted {
            if self.names.contains(&name) {
                continue;
            }
            if let Some(item) = index.get(&name) {
                self.names.insert(name);
                injected.push(item);
            }
        }
        injected
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn clear(&mut self) {
        self.names.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_inject_pulls_dependencies_once() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("k.md"),
            "## function @plan\nMake a plan, then @check it.\n\n## function @check\nVerify.\n\n## concept @unused\nNever mentioned.\n",
        )
        .unwrap();
        let index = KnowledgeIndex::build_index(&[temp.path()]);
        let mut loaded = LoadedKnowledge::new();

        let first: Vec<_> = loaded
            .inject(&index, "please @plan this")
            .into_iter()
            .map(|i| i.name.clone())
            .collect();
        assert_eq!(first, vec!["plan", "check"]);
        assert!(!loaded.contains("unused"));

        assert!(loaded.inject(&index, "@plan again, and @check").is_empty());
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn test_loaded_state_is_per_owner() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("k.md"), "## concept @shared\nx\n").unwrap();
        let index = KnowledgeIndex::build_index(&[temp.path()]);

        let mut a = LoadedKnowledge::new();
        let mut b = LoadedKnowledge::new();
        assert_eq!(a.inject(&index, "@shared").len(), 1);
        assert_eq!(b.inject(&index, "@shared").len(), 1);
    }
}
