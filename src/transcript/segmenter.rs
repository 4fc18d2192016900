use super::{
    truncate_chars, CommentaryExcerpt, Mention, Occurrence, QuestionMention, Segment, VideoStudyData,
};
use crate::reference::ReferenceMatcher;
use crate::timestamp::ts_to_ms;
use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, warn};

const CONTEXT_CHARS: usize = 200;
const COMMENTARY_CHARS: usize = 500;
/// Raw lines after a mention that may contribute commentary text
const COMMENTARY_LOOKAHEAD: usize = 4;
const QUESTION_MIN_WORDS: usize = 5;

/// Optional `<stem>.json` next to a transcript
#[derive(Debug, Default, Deserialize)]
struct TranscriptSidecar {
    video: Option<String>,
    language: Option<String>,
}

/// Turns `[HH:MM:SS] text` transcripts into tagged segments
pub struct TranscriptSegmenter {
    matcher: ReferenceMatcher,
    line_pattern: Regex,
    question_pattern: Regex,
}

impl TranscriptSegmenter {
    pub fn new(matcher: ReferenceMatcher) -> Result<Self> {
        Ok(Self {
            matcher,
            line_pattern: Regex::new(r"^\[(\d{2}:\d{2}:\d{2})\]\s*(.*)")?,
            question_pattern: Regex::new(r"([^.!]*\?)")?,
        })
    }

    pub fn matcher(&self) -> &ReferenceMatcher {
        &self.matcher
    }

    /// Split a raw line into timestamp and trimmed text
    pub fn parse_line<'a>(&self, line: &'a str) -> Option<(&'a str, &'a str)> {
        let captures = self.line_pattern.captures(line)?;
        let timestamp = captures.get(1)?.as_str();
        let text = captures.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
        Some((timestamp, text))
    }

    /// Untagged segments for every timestamped line
    pub fn segment_lines(&self, lines: &[&str]) -> Result<Vec<Segment>> {
        let mut segments = Vec::new();
        for line in lines {
            if let Some((timestamp, text)) = self.parse_line(line) {
                segments.push(Segment::new(timestamp, ts_to_ms(timestamp)?, text));
            }
        }
        Ok(segments)
    }

    /// Extract study data from transcript text
    pub fn process(&self, video_id: &str, title: &str, language: &str, content: &str) -> Result<VideoStudyData> {
        let lines: Vec<&str> = content.lines().collect();

        let mut data = VideoStudyData {
            video_id: video_id.to_string(),
            video_file: format!("{}.mp4", video_id),
            title: title.to_string(),
            language: language.to_string(),
            ..Default::default()
        };

        for (i, line) in lines.iter().enumerate() {
            let Some((timestamp, text)) = self.parse_line(line) else {
                continue;
            };
            let timestamp_ms = ts_to_ms(timestamp)?;
            let mut segment = Segment::new(timestamp, timestamp_ms, text);

            for found in self.matcher.find_verses(text) {
                let verse_ref = found.verse_ref();
                segment.verses.push(verse_ref.clone());

                data.verse_mentions
                    .entry(verse_ref.clone())
                    .or_default()
                    .push(Mention::new(timestamp, timestamp_ms, truncate_chars(text, CONTEXT_CHARS)));

                data.commentary.entry(verse_ref).or_default().push(CommentaryExcerpt {
                    timestamp: timestamp.to_string(),
                    timestamp_ms,
                    text: truncate_chars(&self.commentary_text(&lines, i, text), COMMENTARY_CHARS),
                });
            }

            for topic in self.matcher.find_topics(text) {
                data.topics.entry(topic.clone()).or_default().push(occurrence(timestamp, timestamp_ms, text));
                segment.topics.push(topic);
            }

            for term in self.matcher.find_terms(text) {
                data.terms.entry(term.clone()).or_default().push(occurrence(timestamp, timestamp_ms, text));
                segment.terms.push(term);
            }

            if let Some(question) = self.question(text) {
                data.questions.push(QuestionMention {
                    timestamp: timestamp.to_string(),
                    timestamp_ms,
                    question,
                    context: text.to_string(),
                });
            }

            data.segments.push(segment);
        }

        debug!(
            "{}: {} segments, {} verse refs, {} questions",
            video_id,
            data.segments.len(),
            data.verse_mentions.len(),
            data.questions.len()
        );

        Ok(data)
    }

    /// Read a transcript and its optional sidecar metadata
    pub async fn process_file(&self, transcript_path: &Path) -> Result<VideoStudyData> {
        let content = tokio::fs::read_to_string(transcript_path)
            .await
            .with_context(|| format!("Failed to read transcript: {}", transcript_path.display()))?;

        let video_id = transcript_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();

        let sidecar = load_sidecar(&transcript_path.with_extension("json")).await;
        let title = sidecar.video.unwrap_or_else(|| video_id.clone());
        let language = sidecar.language.unwrap_or_else(super::default_language);

        self.process(&video_id, &title, &language, &content)
    }

    fn commentary_text(&self, lines: &[&str], index: usize, text: &str) -> String {
        let mut commentary = text.to_string();
        let end = (index + 1 + COMMENTARY_LOOKAHEAD).min(lines.len());

        for next in lines.iter().take(end).skip(index + 1) {
            if let Some((_, next_text)) = self.parse_line(next) {
                commentary.push(' ');
                commentary.push_str(next_text);
            }
        }

        commentary
    }

    fn question(&self, text: &str) -> Option<String> {
        if !text.contains('?') || text.split_whitespace().count() <= QUESTION_MIN_WORDS {
            return None;
        }
        self.question_pattern
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
    }
}

fn occurrence(timestamp: &str, timestamp_ms: u64, text: &str) -> Occurrence {
    Occurrence {
        timestamp: timestamp.to_string(),
        timestamp_ms,
        text: truncate_chars(text, CONTEXT_CHARS),
    }
}

async fn load_sidecar(path: &Path) -> TranscriptSidecar {
    let Ok(content) = tokio::fs::read_to_string(path).await else {
        return TranscriptSidecar::default();
    };

    match serde_json::from_str(&content) {
        Ok(sidecar) => sidecar,
        Err(e) => {
            warn!("⚠️ Ignoring unreadable sidecar {}: {}", path.display(), e);
            TranscriptSidecar::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::VerseRef;
    use tempfile::TempDir;

    fn segmenter() -> TranscriptSegmenter {
        TranscriptSegmenter::new(ReferenceMatcher::new().unwrap()).unwrap()
    }

    #[test]
    fn test_single_mention_line() {
        let data = segmenter()
            .process("v1", "v1", "de", "[00:12:30] Schauen wir uns 1. Mose 1,1 an.")
            .unwrap();

        assert_eq!(data.segments.len(), 1);
        assert_eq!(data.segments[0].verses, vec![VerseRef::from("Genesis 1:1")]);

        let mentions = &data.verse_mentions[&VerseRef::from("Genesis 1:1")];
        assert_eq!(mentions.len(), 1);
        assert_eq!(mentions[0].timestamp, "00:12:30");
        assert_eq!(mentions[0].timestamp_ms, 750_000);
        assert_eq!(mentions[0].context, "Schauen wir uns 1. Mose 1,1 an.");
    }

    #[test]
    fn test_untimestamped_lines_are_dropped() {
        let content = "Kopfzeile\n[00:00:01] Hallo\n\n  [00:00:02] eingerückt\n[00:00:03] Ende";
        let data = segmenter().process("v", "v", "de", content).unwrap();

        let starts: Vec<&str> = data.segments.iter().map(|s| s.start.as_str()).collect();
        assert_eq!(starts, vec!["00:00:01", "00:00:03"]);
    }

    #[test]
    fn test_commentary_uses_following_timestamped_lines() {
        let content = "[00:00:01] Genesis 1,1 sagt\n\
                       [00:00:02] eins\n\
                       ohne zeit\n\
                       [00:00:03] zwei\n\
                       [00:00:04] drei\n\
                       [00:00:05] vier";
        let data = segmenter().process("v", "v", "de", content).unwrap();
        let commentary = &data.commentary[&VerseRef::from("Genesis 1:1")][0];

        assert_eq!(commentary.text, "Genesis 1,1 sagt eins zwei drei");
    }

    #[test]
    fn test_context_truncated_to_200_chars() {
        let long = "ä".repeat(300);
        let content = format!("[00:00:01] Johannes 3,16 {}", long);
        let data = segmenter().process("v", "v", "de", &content).unwrap();
        let mention = &data.verse_mentions[&VerseRef::from("John 3:16")][0];

        assert_eq!(mention.context.chars().count(), 200);
        assert_eq!(data.segments[0].text.chars().count(), "Johannes 3,16 ".chars().count() + 300);
    }

    #[test]
    fn test_questions_need_more_than_five_words() {
        let content = "[00:00:01] Was ist das?\n[00:00:02] Gut. Aber was bedeutet das Wort Licht hier eigentlich? Genau.";
        let data = segmenter().process("v", "v", "de", content).unwrap();

        assert_eq!(data.questions.len(), 1);
        assert_eq!(data.questions[0].question, "Aber was bedeutet das Wort Licht hier eigentlich?");
        assert!(data.topics.contains_key("light"));
    }

    #[tokio::test]
    async fn test_process_file_reads_sidecar() {
        let dir = TempDir::new().unwrap();
        let transcript = dir.path().join("predigt_12345.txt");
        tokio::fs::write(&transcript, "[00:00:05] Psalm 23").await.unwrap();
        tokio::fs::write(dir.path().join("predigt_12345.json"), r#"{"video": "Der gute Hirte"}"#)
            .await
            .unwrap();

        let data = segmenter().process_file(&transcript).await.unwrap();
        assert_eq!(data.video_id, "predigt_12345");
        assert_eq!(data.video_file, "predigt_12345.mp4");
        assert_eq!(data.title, "Der gute Hirte");
        assert_eq!(data.language, "de");
        assert!(data.verse_mentions.contains_key(&VerseRef::from("Psalm 23")));
    }
}
