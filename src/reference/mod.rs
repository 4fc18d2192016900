//! Rule-table driven detection of Bible references, topics and theological terms

pub mod verse_ref;

pub use verse_ref::VerseRef;

use anyhow::{anyhow, Context, Result};
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// Which rule table a rule belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleKind {
    Verse,
    Topic,
    Term,
}

/// A single `pattern -> label` rule
#[derive(Debug, Clone)]
pub struct PatternRule {
    pattern: Regex,
    label: String,
}

impl PatternRule {
    /// Compile a case-insensitive rule
    pub fn new(pattern: &str, label: &str) -> Result<Self> {
        let pattern = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .with_context(|| format!("invalid pattern for {:?}", label))?;

        Ok(Self {
            pattern,
            label: label.to_string(),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

/// One explicit reference found in a line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerseMatch {
    pub book: String,
    /// Decimal digits without leading zeros, any length
    pub chapter: String,
    pub verse: Option<String>,
}

impl VerseMatch {
    pub fn verse_ref(&self) -> VerseRef {
        VerseRef::from_parts(&self.book, &self.chapter, self.verse.as_deref())
    }
}

/// Canonical form of a captured number: digits only, leading zeros dropped
fn normalize_number(digits: &str) -> Option<String> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let trimmed = digits.trim_start_matches('0');
    Some(if trimmed.is_empty() { "0" } else { trimmed }.to_string())
}

/// German and English book names. Group 1 is the chapter, group 2 the optional verse.
const VERSE_RULES: &[(&str, &str)] = &[
    (r"(?:1\.?\s*Mose|Genesis)\s+(\d+)(?:,\s*(?:Vers\s+)?(\d+))?", "Genesis"),
    (r"Psalm\s+(\d+)(?:,\s*(?:Vers\s+)?(\d+))?", "Psalm"),
    (r"(?:2\.?\s*Mose|Exodus)\s+(\d+)(?:,\s*(?:Vers\s+)?(\d+))?", "Exodus"),
    (r"(?:Matthäus|Matthew)\s+(\d+)(?:,\s*(?:Vers\s+)?(\d+))?", "Matthew"),
    (r"(?:Johannes|John)\s+(\d+)(?:,\s*(?:Vers\s+)?(\d+))?", "John"),
    (r"(?:Römer|Romans)\s+(\d+)(?:,\s*(?:Vers\s+)?(\d+))?", "Romans"),
    (r"(?:1\.?\s*Korinther|1 Corinthians)\s+(\d+)(?:,\s*(?:Vers\s+)?(\d+))?", "1 Corinthians"),
    (r"(?:2\.?\s*Korinther|2 Corinthians)\s+(\d+)(?:,\s*(?:Vers\s+)?(\d+))?", "2 Corinthians"),
    (r"(?:Galater|Galatians)\s+(\d+)(?:,\s*(?:Vers\s+)?(\d+))?", "Galatians"),
    (r"(?:Epheser|Ephesians)\s+(\d+)(?:,\s*(?:Vers\s+)?(\d+))?", "Ephesians"),
    (r"(?:Philipper|Philippians)\s+(\d+)(?:,\s*(?:Vers\s+)?(\d+))?", "Philippians"),
    (r"(?:Kolosser|Colossians)\s+(\d+)(?:,\s*(?:Vers\s+)?(\d+))?", "Colossians"),
    (r"(?:Hebräer|Hebrews)\s+(\d+)(?:,\s*(?:Vers\s+)?(\d+))?", "Hebrews"),
    (r"(?:Jakobus|James)\s+(\d+)(?:,\s*(?:Vers\s+)?(\d+))?", "James"),
    (r"(?:1\.?\s*Petrus|1 Peter)\s+(\d+)(?:,\s*(?:Vers\s+)?(\d+))?", "1 Peter"),
    (r"(?:Offenbarung|Revelation)\s+(\d+)(?:,\s*(?:Vers\s+)?(\d+))?", "Revelation"),
    (r"(?:Lukas|Luke)\s+(\d+)(?:,\s*(?:Vers\s+)?(\d+))?", "Luke"),
];

const TOPIC_RULES: &[(&str, &str)] = &[
    (r"Schöpfung|Creation", "creation"),
    (r"Licht", "light"),
    (r"Wasser", "water"),
    (r"Atmosphäre", "atmosphere"),
    (r"Zeit", "time"),
    (r"Raum", "space"),
    (r"Pflanze", "plants"),
    (r"Tier", "animals"),
    (r"Mensch", "humanity"),
    (r"Ehe|Marriage", "marriage"),
    (r"Sabbat", "sabbath"),
    (r"Sünde", "sin"),
    (r"Erlösung|Redemption", "redemption"),
];

const TERM_RULES: &[(&str, &str)] = &[
    (r"Tohu\s+Wabohu", "tohu_wabohu"),
    (r"Rakia", "rakia"),
    (r"Bara", "bara"),
    (r"Elohim", "elohim"),
    (r"Ebenbild", "image_of_god"),
    (r"Dreieinig", "trinity"),
];

/// Matches transcript lines against the verse, topic and term rule tables
#[derive(Debug, Clone)]
pub struct ReferenceMatcher {
    verse_rules: Vec<PatternRule>,
    topic_rules: Vec<PatternRule>,
    term_rules: Vec<PatternRule>,
}

impl ReferenceMatcher {
    /// Create a matcher with the built-in tables
    pub fn new() -> Result<Self> {
        Self::from_tables(VERSE_RULES, TOPIC_RULES, TERM_RULES)
    }

    pub fn from_tables(
        verses: &[(&str, &str)],
        topics: &[(&str, &str)],
        terms: &[(&str, &str)],
    ) -> Result<Self> {
        let compile = |rules: &[(&str, &str)]| -> Result<Vec<PatternRule>> {
            rules
                .iter()
                .map(|(pattern, label)| PatternRule::new(pattern, label))
                .collect()
        };

        Ok(Self {
            verse_rules: compile(verses)?,
            topic_rules: compile(topics)?,
            term_rules: compile(terms)?,
        })
    }

    /// Built-in tables extended with the rules of a rule file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        let mut matcher = Self::new()?;
        matcher.parse_rules_file(&content)?;
        info!("📚 Loaded reference rules from: {}", path.as_ref().display());
        Ok(matcher)
    }

    /// Append a rule to one of the tables
    pub fn add_rule(&mut self, kind: RuleKind, pattern: &str, label: &str) -> Result<()> {
        let rule = PatternRule::new(pattern, label)?;
        match kind {
            RuleKind::Verse => {
                if rule.pattern.captures_len() < 2 {
                    return Err(anyhow!("verse rule for {:?} needs a chapter group", label));
                }
                self.verse_rules.push(rule);
            }
            RuleKind::Topic => self.topic_rules.push(rule),
            RuleKind::Term => self.term_rules.push(rule),
        }
        Ok(())
    }

    /// Every (book, chapter, verse) triple found in the line, one per pattern match.
    ///
    /// Overlapping or duplicate matches from different rules are all kept.
    pub fn find_verses(&self, text: &str) -> Vec<VerseMatch> {
        let mut matches = Vec::new();

        for rule in &self.verse_rules {
            for captures in rule.pattern.captures_iter(text) {
                let chapter = match captures.get(1).and_then(|m| normalize_number(m.as_str())) {
                    Some(chapter) => chapter,
                    None => continue,
                };
                let verse = captures.get(2).and_then(|m| normalize_number(m.as_str()));

                matches.push(VerseMatch {
                    book: rule.label.clone(),
                    chapter,
                    verse,
                });
            }
        }

        matches
    }

    /// Topics present in the line (presence only, no counting)
    pub fn find_topics(&self, text: &str) -> Vec<String> {
        Self::labels_present(&self.topic_rules, text)
    }

    /// Theological terms present in the line
    pub fn find_terms(&self, text: &str) -> Vec<String> {
        Self::labels_present(&self.term_rules, text)
    }

    fn labels_present(rules: &[PatternRule], text: &str) -> Vec<String> {
        rules
            .iter()
            .filter(|rule| rule.is_match(text))
            .map(|rule| rule.label.clone())
            .collect()
    }

    /// Parse a rule file.
    ///
    /// Format: `[verses]`, `[topics]` or `[terms]` headers followed by
    /// `pattern -> label` lines. `#` starts a comment line.
    fn parse_rules_file(&mut self, content: &str) -> Result<()> {
        let mut current = RuleKind::Topic;

        for (number, line) in content.lines().enumerate() {
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                current = match line[1..line.len() - 1].to_lowercase().as_str() {
                    "verses" | "books" => RuleKind::Verse,
                    "topics" => RuleKind::Topic,
                    "terms" => RuleKind::Term,
                    other => return Err(anyhow!("unknown rule section [{}] on line {}", other, number + 1)),
                };
                continue;
            }

            match line.rsplit_once(" -> ") {
                Some((pattern, label)) => self
                    .add_rule(current, pattern.trim(), label.trim())
                    .with_context(|| format!("rule on line {}", number + 1))?,
                None => return Err(anyhow!("expected `pattern -> label` on line {}", number + 1)),
            }
        }

        Ok(())
    }

    pub fn get_stats(&self) -> HashMap<RuleKind, usize> {
        HashMap::from([
            (RuleKind::Verse, self.verse_rules.len()),
            (RuleKind::Topic, self.topic_rules.len()),
            (RuleKind::Term, self.term_rules.len()),
        ])
    }
}
