//! Name-keyed index over parsed knowledge items

use super::parser::{self, DEFAULT_HEADING_LEVEL};
use super::KnowledgeItem;
use crate::error::KnowledgeParseError;
use indexmap::IndexMap;
use regex::Regex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use walkdir::WalkDir;

fn reference_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@(\w+)").expect("reference regex is valid"))
}

/// Knowledge items keyed by name, built once per agent
#[derive(Debug, Default)]
pub struct KnowledgeIndex {
    items: IndexMap<String, KnowledgeItem>,
    diagnostics: Vec<KnowledgeParseError>,
    files: Vec<PathBuf>,
}

impl KnowledgeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from files and directories using the default heading level
    pub fn build_index<P: AsRef<Path>>(paths: &[P]) -> Self {
        Self::build_with_level(paths, DEFAULT_HEADING_LEVEL)
    }

    /// Build an index from files and directories.
    ///
    /// Directories are walked recursively for `*.md` files (skipping
    /// `__init__.md`) in sorted order, so when two files define the same
    /// name the one visited later wins.
    pub fn build_with_level<P: AsRef<Path>>(paths: &[P], heading_level: usize) -> Self {
        let mut index = Self::new();
        for path in paths {
            let path = path.as_ref();
            for file in markdown_files(path) {
                index.load_file(&file, heading_level);
            }
        }
        tracing::info!(
            items = index.items.len(),
            files = index.files.len(),
            diagnostics = index.diagnostics.len(),
            "Knowledge index built"
        );
        index
    }

    fn load_file(&mut self, path: &Path, heading_level: usize) {
        match parser::parse_file(path, heading_level) {
            Ok(parsed) => {
                self.files.push(path.to_path_buf());
                self.diagnostics.extend(parsed.diagnostics);
                for item in parsed.items {
                    self.insert(item);
                }
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read knowledge file");
                self.diagnostics.push(KnowledgeParseError {
                    path: path.to_path_buf(),
                    line: 0,
                    heading: String::new(),
                    reason: format!("unreadable: {}", e),
                });
            }
        }
    }

    /// Insert an item, replacing any earlier item with the same name
    pub fn insert(&mut self, item: KnowledgeItem) -> Option<KnowledgeItem> {
        let previous = self.items.insert(item.name.clone(), item);
        if let Some(prev) = &previous {
            if let Some(current) = self.items.get(&prev.name) {
                tracing::warn!(
                    name = %prev.name,
                    previous = %prev.source_path.display(),
                    replacement = %current.source_path.display(),
                    "Knowledge item overwritten, last loaded wins"
                );
            }
        }
        previous
    }

    pub fn get(&self, name: &str) -> Option<&KnowledgeItem> {
        self.items.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.items.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> impl Iterator<Item = &KnowledgeItem> {
        self.items.values()
    }

    pub fn names(&self) -> Vec<&str> {
        self.items.keys().map(|s| s.as_str()).collect()
    }

    /// Headings that were skipped while building
    pub fn diagnostics(&self) -> &[KnowledgeParseError] {
        &self.diagnostics
    }

    /// Files that were parsed, in load order
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Case-insensitive substring search over name, description and category
    pub fn search_by_keyword(&self, keyword: &str) -> Vec<&KnowledgeItem> {
        let needle = keyword.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        self.items
            .values()
            .filter(|item| {
                item.name.to_lowercase().contains(&needle)
                    || item.description.to_lowercase().contains(&needle)
                    || item.category.to_lowercase().contains(&needle)
            })
            .collect()
    }

    /// Names of indexed items mentioned as `@name` in `text`.
    ///
    /// The token after `@` runs until the first non-word character. When the
    /// whole token is not indexed, its longest indexed prefix is used, which
    /// handles names written directly against following text in scripts
    /// without word spacing.
    pub fn detect_references(&self, text: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        for caps in reference_regex().captures_iter(text) {
            let Some(token) = caps.get(1) else { continue };
            let token = token.as_str();
            let boundaries: Vec<usize> = token
                .char_indices()
                .map(|(i, _)| i)
                .skip(1)
                .chain(std::iter::once(token.len()))
                .collect();
            for end in boundaries.into_iter().rev() {
                let candidate = &token[..end];
                if self.items.contains_key(candidate) {
                    found.insert(candidate.to_string());
                    break;
                }
            }
        }
        found
    }

    /// Items referenced from the body of `name`, excluding itself
    pub fn references_of(&self, name: &str) -> BTreeSet<String> {
        let Some(item) = self.items.get(name) else {
            return BTreeSet::new();
        };
        let mut refs = self.detect_references(&item.raw_content);
        refs.remove(name);
        refs
    }

    /// Items in the same category, items `name` references, and items that
    /// reference `name`. One hop only.
    pub fn get_related_items(&self, name: &str) -> Vec<&KnowledgeItem> {
        let Some(target) = self.items.get(name) else {
            return Vec::new();
        };
        let outgoing = self.references_of(name);
        self.items
            .values()
            .filter(|item| item.name != name)
            .filter(|item| {
                item.category == target.category
                    || outgoing.contains(&item.name)
                    || self.references_of(&item.name).contains(name)
            })
            .collect()
    }

    /// Compact listing of every item for the system prompt
    pub fn catalog(&self) -> Vec<String> {
        self.items
            .values()
            .map(|item| {
                format!(
                    "@{}{} [{}] {}",
                    item.name,
                    item.signature.as_deref().unwrap_or(""),
                    item.label,
                    item.description
                )
            })
            .collect()
    }
}

/// Markdown files under `path` in sorted order
fn markdown_files(path: &Path) -> Vec<PathBuf> {
    if path.is_file() {
        return vec![path.to_path_buf()];
    }
    if !path.is_dir() {
        tracing::warn!(path = %path.display(), "Knowledge path does not exist, skipping");
        return Vec::new();
    }
    WalkDir::new(path)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "md"))
        .filter(|p| p.file_name().is_some_and(|n| n != "__init__.md"))
        .collect()
}
