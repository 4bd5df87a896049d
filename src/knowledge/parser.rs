//! Markdown knowledge file parser
//!
//! A knowledge file is ordinary markdown. Headings at the configured level
//! whose first word is a kind keyword declare items:
//!
//! ```text
//! # Research helpers                    <- category
//!
//! ## function @summarize(text, limit)
//! Condense a document into a short abstract.
//!
//! ## 概念 @上下文
//! ...
//! ```

use super::{ItemType, KnowledgeItem};
use crate::error::KnowledgeParseError;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

pub const DEFAULT_HEADING_LEVEL: usize = 2;

const NO_DESCRIPTION: &str = "(no description)";

/// Items and diagnostics produced from one file
#[derive(Debug, Default)]
pub struct ParsedFile {
    pub items: Vec<KnowledgeItem>,
    pub diagnostics: Vec<KnowledgeParseError>,
}

fn keyword_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^(?P<kind>contract\s+function|function|concept|pattern|principle|契约函数|函数|概念|模式|原理)(?P<rest>.*)$",
        )
        .expect("keyword regex is valid")
    })
}

fn docstring_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?s)"""(.*?)""""#).expect("docstring regex is valid"))
}

fn name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^@(?P<name>\w+)(?P<sig>\s*\([^)]*\))?").expect("name regex is valid")
    })
}

/// Map a matched keyword to its item type and a normalized label
fn classify(keyword: &str) -> (ItemType, &'static str) {
    let lower = keyword.to_lowercase();
    let collapsed: Vec<&str> = lower.split_whitespace().collect();
    match collapsed.join(" ").as_str() {
        "function" | "函数" => (ItemType::Function, "function"),
        "contract function" | "契约函数" => (ItemType::Function, "contract function"),
        "concept" | "概念" => (ItemType::Concept, "concept"),
        "pattern" | "模式" => (ItemType::Concept, "pattern"),
        _ => (ItemType::Concept, "principle"),
    }
}

/// Level and text of an ATX heading, if the line is one
fn heading(line: &str) -> Option<(usize, &str)> {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    Some((hashes, rest.trim()))
}

fn is_fence(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("```") || t.starts_with("~~~")
}

enum HeadingKind<'a> {
    Item {
        item_type: ItemType,
        label: &'static str,
        name: &'a str,
        signature: Option<String>,
    },
    Malformed(&'static str),
    Plain,
}

fn classify_heading(text: &str) -> HeadingKind<'_> {
    let Some(caps) = keyword_regex().captures(text) else {
        return HeadingKind::Plain;
    };
    let rest = caps.name("rest").map(|m| m.as_str()).unwrap_or("");
    // "functional programming" is a plain heading, not a malformed item
    if rest.chars().next().is_some_and(|c| c.is_alphanumeric() || c == '_') {
        return HeadingKind::Plain;
    }
    let kind = caps.name("kind").map(|m| m.as_str()).unwrap_or("");
    let (item_type, label) = classify(kind);

    let rest = rest.trim();
    if rest.is_empty() {
        return HeadingKind::Malformed("missing @name after keyword");
    }
    match name_regex().captures(rest) {
        Some(c) => HeadingKind::Item {
            item_type,
            label,
            name: c.name("name").map(|m| m.as_str()).unwrap_or(""),
            signature: c.name("sig").map(|m| m.as_str().trim().to_string()),
        },
        None => HeadingKind::Malformed("expected @name after keyword"),
    }
}

struct OpenItem<'a> {
    item_type: ItemType,
    label: &'static str,
    name: String,
    signature: Option<String>,
    category: String,
    line: usize,
    lines: Vec<&'a str>,
}

impl OpenItem<'_> {
    fn close(self, path: &Path) -> KnowledgeItem {
        let raw_content = self.lines.join("\n").trim_end().to_string();
        KnowledgeItem {
            name: self.name,
            item_type: self.item_type,
            label: self.label.to_string(),
            signature: self.signature,
            category: self.category,
            source_path: path.to_path_buf(),
            line: self.line,
            description: describe(&self.lines[1..]),
            raw_content,
        }
    }
}

/// Text inside the first `"""` pair wins over the first paragraph
fn describe(body: &[&str]) -> String {
    let text = body.join("\n");
    if let Some(doc) = docstring_regex().captures(&text).and_then(|c| c.get(1)) {
        let joined = doc
            .as_str()
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if !joined.is_empty() {
            return joined;
        }
    }
    first_paragraph(body)
}

/// First paragraph of body text outside code fences and sub-headings
fn first_paragraph(body: &[&str]) -> String {
    let mut in_fence = false;
    let mut paragraph: Vec<&str> = Vec::new();
    for line in body {
        if is_fence(line) {
            in_fence = !in_fence;
            if !paragraph.is_empty() {
                break;
            }
            continue;
        }
        if in_fence || heading(line).is_some() {
            if !paragraph.is_empty() {
                break;
            }
            continue;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if !paragraph.is_empty() {
                break;
            }
            continue;
        }
        paragraph.push(trimmed);
    }
    if paragraph.is_empty() {
        NO_DESCRIPTION.to_string()
    } else {
        paragraph.join(" ")
    }
}

/// Parse knowledge items out of markdown text
pub fn parse_str(path: &Path, content: &str, heading_level: usize) -> ParsedFile {
    let mut parsed = ParsedFile::default();
    let fallback_category = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let mut category: Option<String> = None;
    let mut current: Option<OpenItem> = None;
    let mut in_fence = false;

    for (idx, line) in content.lines().enumerate() {
        let line_no = idx + 1;
        if is_fence(line) {
            in_fence = !in_fence;
        } else if !in_fence {
            if let Some((level, text)) = heading(line) {
                if level == 1 && heading_level > 1 {
                    category = Some(text.to_string());
                }
                if level <= heading_level {
                    if let Some(open) = current.take() {
                        parsed.items.push(open.close(path));
                    }
                }
                if level == heading_level {
                    match classify_heading(text) {
                        HeadingKind::Item {
                            item_type,
                            label,
                            name,
                            signature,
                        } => {
                            current = Some(OpenItem {
                                item_type,
                                label,
                                name: name.to_string(),
                                signature,
                                category: category
                                    .clone()
                                    .unwrap_or_else(|| fallback_category.clone()),
                                line: line_no,
                                lines: vec![line],
                            });
                            continue;
                        }
                        HeadingKind::Malformed(reason) => {
                            let err = KnowledgeParseError {
                                path: path.to_path_buf(),
                                line: line_no,
                                heading: line.to_string(),
                                reason: reason.to_string(),
                            };
                            tracing::warn!(error = %err, "Skipping malformed knowledge heading");
                            parsed.diagnostics.push(err);
                        }
                        HeadingKind::Plain => {}
                    }
                }
            }
        }
        if let Some(open) = current.as_mut() {
            open.lines.push(line);
        }
    }

    if let Some(open) = current.take() {
        parsed.items.push(open.close(path));
    }
    parsed
}

/// Read and parse one knowledge file
pub fn parse_file(path: &Path, heading_level: usize) -> std::io::Result<ParsedFile> {
    let content = std::fs::read_to_string(path)?;
    Ok(parse_str(path, &content, heading_level))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> ParsedFile {
        parse_str(Path::new("notes/tools.md"), content, DEFAULT_HEADING_LEVEL)
    }

    #[test]
    fn test_function_and_concept_headings() {
        let parsed = parse(
            "# Helpers\n\n## function @summarize(text, limit)\nCondense a document.\nKeep it short.\n\nSecond paragraph.\n\n## concept @context\nWhat the model sees.\n",
        );
        assert!(parsed.diagnostics.is_empty());
        assert_eq!(parsed.items.len(), 2);

        let f = &parsed.items[0];
        assert_eq!(f.name, "summarize");
        assert_eq!(f.item_type, ItemType::Function);
        assert_eq!(f.signature.as_deref(), Some("(text, limit)"));
        assert_eq!(f.category, "Helpers");
        assert_eq!(f.line, 3);
        assert_eq!(f.description, "Condense a document. Keep it short.");
        assert!(f.raw_content.contains("Second paragraph."));
        assert!(!f.raw_content.contains("@context"));

        assert_eq!(parsed.items[1].item_type, ItemType::Concept);
    }

    #[test]
    fn test_cjk_keywords_and_names() {
        let parsed = parse("## 契约函数 @验证订单(订单)\n检查订单是否完整。\n\n## 原理 @最小惊讶\n");
        assert_eq!(parsed.items.len(), 2);
        assert_eq!(parsed.items[0].name, "验证订单");
        assert_eq!(parsed.items[0].label, "contract function");
        assert_eq!(parsed.items[1].label, "principle");
        assert_eq!(parsed.items[1].description, NO_DESCRIPTION);
        // no level-1 heading, category falls back to file stem
        assert_eq!(parsed.items[1].category, "tools");
    }

    #[test]
    fn test_docstring_description() {
        let parsed = parse(
            "## 契约函数 @验证订单(订单)\n\"\"\"\n检查订单是否完整。\n\"\"\"\n\nRuns before payment.\n\n## function @ship\nNo quotes here.\n",
        );
        assert_eq!(parsed.items[0].description, "检查订单是否完整。");
        assert_eq!(parsed.items[1].description, "No quotes here.");

        let parsed = parse("## concept @inline\nIntro text.\n\n\"\"\"Spans\n  two lines\"\"\"\n");
        assert_eq!(parsed.items[0].description, "Spans two lines");
    }

    #[test]
    fn test_malformed_heading_is_skipped() {
        let parsed = parse("## function\nbody\n\n## function summarize\n\n## concept @ok\nfine\n");
        assert_eq!(parsed.items.len(), 1);
        assert_eq!(parsed.items[0].name, "ok");
        assert_eq!(parsed.diagnostics.len(), 2);
        assert_eq!(parsed.diagnostics[0].line, 1);
        assert_eq!(parsed.diagnostics[1].line, 4);
    }

    #[test]
    fn test_plain_headings_are_not_items() {
        let parsed = parse("## Functional style\ntext\n## Usage\nmore\n");
        assert!(parsed.items.is_empty());
        assert!(parsed.diagnostics.is_empty());
    }

    #[test]
    fn test_headings_inside_fences_are_ignored() {
        let parsed = parse(
            "## function @build\n```markdown\n## function @fake\n```\nBuilds things.\n### Steps\n1. go\n",
        );
        assert_eq!(parsed.items.len(), 1);
        assert_eq!(parsed.items[0].description, "Builds things.");
        assert!(parsed.items[0].raw_content.contains("### Steps"));
    }

    #[test]
    fn test_custom_heading_level() {
        let parsed = parse_str(
            Path::new("x.md"),
            "# function @top\nTop level.\n## function @nested\n",
            1,
        );
        assert_eq!(parsed.items.len(), 1);
        assert_eq!(parsed.items[0].name, "top");
        assert!(parsed.items[0].raw_content.contains("@nested"));
    }
}
