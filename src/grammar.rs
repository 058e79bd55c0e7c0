//! Line grammars for the taxonomy file format and for raw LLM responses.
//!
//! Three grammars are in play:
//! - persisted tree lines: `[level] name (Count: n): description`
//! - mode proposals from generation responses: `[level] name: description`
//!   (the colon may be full- or half-width)
//! - merge proposals from refinement responses:
//!   `[level] name: description ([level] orig1, [level] orig2, ...)`
//!
//! All parsers work line-by-line; a line that fails to match is reported as
//! a skip with a reason and never aborts the surrounding batch.

use regex::Regex;

/// Result of parsing a single line: either a value or a reason to skip it.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome<T> {
    Parsed(T),
    Skip(String),
}

impl<T> ParseOutcome<T> {
    pub fn parsed(self) -> Option<T> {
        match self {
            ParseOutcome::Parsed(v) => Some(v),
            ParseOutcome::Skip(_) => None,
        }
    }
}

/// A line of the persisted taxonomy file.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeLine {
    pub level: u32,
    pub name: String,
    pub count: u64,
    pub desc: String,
}

/// One mode proposed by a generation response.
#[derive(Debug, Clone, PartialEq)]
pub struct ModeProposal {
    pub level: u32,
    pub name: String,
    pub desc: String,
}

/// One consolidation proposed by a refinement response: a replacement mode
/// plus the `(name, level)` pairs it replaces.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeProposal {
    pub level: u32,
    pub name: String,
    pub desc: String,
    pub originals: Vec<(String, u32)>,
}

pub struct Grammar {
    tree_line: Regex,
    seed_line: Regex,
    mode_line: Regex,
    merge_line: Regex,
    merge_original: Regex,
}

impl Default for Grammar {
    fn default() -> Self {
        Self::new()
    }
}

impl Grammar {
    pub fn new() -> Self {
        Self {
            tree_line: Regex::new(r"^\[(\d+)\] (.+?)(?: \(Count: (\d+)\))?(?::\s*(.+))?$")
                .unwrap(),
            seed_line: Regex::new(r"^\[(\d+)\] (.+)").unwrap(),
            mode_line: Regex::new(r"^\[(\d+)\]\s*([\w\s]+?)\s*[:：]\s*(.+)").unwrap(),
            merge_line: Regex::new(r"^\[(\d+)\]([^:]+?):(.+?)\(([^)]+)\)$").unwrap(),
            merge_original: Regex::new(r"\[(\d+)\]([^,)]+)").unwrap(),
        }
    }

    /// Parse a persisted taxonomy line. Count defaults to 1, description to
    /// empty, matching what the serializer may have omitted.
    pub fn parse_tree_line(&self, line: &str) -> ParseOutcome<TreeLine> {
        let caps = match self.tree_line.captures(line.trim()) {
            Some(c) => c,
            None => return ParseOutcome::Skip("no tree-line match".to_string()),
        };
        let level = match caps[1].parse::<u32>() {
            Ok(l) => l,
            Err(_) => return ParseOutcome::Skip("level out of range".to_string()),
        };
        let count = caps
            .get(3)
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .unwrap_or(1);
        ParseOutcome::Parsed(TreeLine {
            level,
            name: caps[2].trim().to_string(),
            count,
            desc: caps
                .get(4)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default(),
        })
    }

    /// Parse a seed line `[level] name`.
    pub fn parse_seed_line(&self, line: &str) -> ParseOutcome<(u32, String)> {
        let caps = match self.seed_line.captures(line.trim()) {
            Some(c) => c,
            None => return ParseOutcome::Skip("no seed-line match".to_string()),
        };
        match caps[1].parse::<u32>() {
            Ok(level) => ParseOutcome::Parsed((level, caps[2].trim().to_string())),
            Err(_) => ParseOutcome::Skip("level out of range".to_string()),
        }
    }

    /// Parse one mode proposal from a generation response.
    pub fn parse_mode_line(&self, line: &str) -> ParseOutcome<ModeProposal> {
        let caps = match self.mode_line.captures(line.trim()) {
            Some(c) => c,
            None => return ParseOutcome::Skip("no mode-line match".to_string()),
        };
        let level = match caps[1].parse::<u32>() {
            Ok(l) => l,
            Err(_) => return ParseOutcome::Skip("level out of range".to_string()),
        };
        ParseOutcome::Parsed(ModeProposal {
            level,
            name: caps[2].trim().to_string(),
            desc: caps[3].trim().to_string(),
        })
    }

    /// Parse one merge proposal from a refinement response. The trailing
    /// parenthesized group is matched again to recover each original
    /// `(name, level)` pair; a group with no recoverable originals is a skip.
    pub fn parse_merge_line(&self, line: &str) -> ParseOutcome<MergeProposal> {
        let caps = match self.merge_line.captures(line.trim()) {
            Some(c) => c,
            None => return ParseOutcome::Skip("no merge-line match".to_string()),
        };
        let level = match caps[1].parse::<u32>() {
            Ok(l) => l,
            Err(_) => return ParseOutcome::Skip("level out of range".to_string()),
        };
        let originals: Vec<(String, u32)> = self
            .merge_original
            .captures_iter(&caps[4])
            .filter_map(|oc| {
                let lvl = oc[1].parse::<u32>().ok()?;
                Some((oc[2].trim().to_string(), lvl))
            })
            .collect();
        if originals.is_empty() {
            return ParseOutcome::Skip("no originals in merge group".to_string());
        }
        ParseOutcome::Parsed(MergeProposal {
            level,
            name: caps[2].trim().to_string(),
            desc: caps[3].trim().to_string(),
            originals,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn given_full_tree_line_when_parsing_then_all_fields_captured() {
        let grammar = Grammar::new();
        let out = grammar.parse_tree_line("[1] Ambiguity (Count: 7): unclear user intent");
        assert_eq!(
            out,
            ParseOutcome::Parsed(TreeLine {
                level: 1,
                name: "Ambiguity".to_string(),
                count: 7,
                desc: "unclear user intent".to_string(),
            })
        );
    }

    #[test]
    fn given_tree_line_without_count_when_parsing_then_count_defaults_to_one() {
        let grammar = Grammar::new();
        let out = grammar.parse_tree_line("[2] Vague Query: missing constraints");
        let parsed = out.parsed().unwrap();
        assert_eq!(parsed.count, 1);
        assert_eq!(parsed.desc, "missing constraints");
    }

    #[test]
    fn given_tree_line_without_desc_when_parsing_then_desc_empty() {
        let grammar = Grammar::new();
        let parsed = grammar
            .parse_tree_line("[1] Length (Count: 3)")
            .parsed()
            .unwrap();
        assert_eq!(parsed.count, 3);
        assert_eq!(parsed.desc, "");
    }

    #[rstest]
    #[case("[1] Ambiguity: unclear intent")]
    #[case("[1] Ambiguity： unclear intent")]
    fn given_mode_line_with_either_colon_when_parsing_then_parsed(#[case] line: &str) {
        let grammar = Grammar::new();
        let parsed = grammar.parse_mode_line(line).parsed().unwrap();
        assert_eq!(parsed.level, 1);
        assert_eq!(parsed.name, "Ambiguity");
        assert_eq!(parsed.desc, "unclear intent");
    }

    #[rstest]
    #[case("Ambiguity - unclear intent")]
    #[case("some free text without structure")]
    #[case("")]
    fn given_malformed_mode_line_when_parsing_then_skipped(#[case] line: &str) {
        let grammar = Grammar::new();
        assert!(matches!(
            grammar.parse_mode_line(line),
            ParseOutcome::Skip(_)
        ));
    }

    #[test]
    fn given_merge_line_when_parsing_then_originals_recovered() {
        let grammar = Grammar::new();
        let parsed = grammar
            .parse_merge_line("[1] Unclear Intent: question lacks specificity ([1] Ambiguity, [1] Vagueness)")
            .parsed()
            .unwrap();
        assert_eq!(parsed.level, 1);
        assert_eq!(parsed.name, "Unclear Intent");
        assert_eq!(
            parsed.originals,
            vec![
                ("Ambiguity".to_string(), 1),
                ("Vagueness".to_string(), 1)
            ]
        );
    }

    #[test]
    fn given_merge_line_without_originals_when_parsing_then_skipped() {
        let grammar = Grammar::new();
        assert!(matches!(
            grammar.parse_merge_line("[1] Unclear Intent: desc (no brackets here)"),
            ParseOutcome::Skip(_)
        ));
    }
}
