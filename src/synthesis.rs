//! Cross-video commentary synthesis per verse

use crate::database::{Database, VerseCommentary, VerseIndex};
use crate::index::clean_title;
use crate::llm::{AnnotationError, Annotator};
use crate::processing::BatchReport;
use crate::reference::VerseRef;
use crate::transcript::window::{teaching_blocks, DEFAULT_BLOCK_AFTER};
use crate::transcript::VideoArtifact;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};

const MIN_SECTION_CHARS: usize = 40;
const MIN_BLOCK_CHARS: usize = 200;
const DEFAULT_CATEGORY: &str = "allgemein";

/// Single verses need one video, ranges and chapters need two
pub fn is_eligible(verse_ref: &VerseRef, video_count: usize) -> bool {
    if verse_ref.is_single_verse() {
        video_count >= 1
    } else {
        video_count >= 2
    }
}

/// Eligible references of an index, in sorted order
pub fn eligible_verses(index: &VerseIndex) -> Vec<VerseRef> {
    index
        .iter()
        .filter(|(verse_ref, videos)| is_eligible(verse_ref, videos.len()))
        .map(|(verse_ref, _)| verse_ref.clone())
        .collect()
}

/// One video's material about one verse
#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    pub video_title: String,
    pub text: String,
    pub is_parsed: bool,
}

impl Passage {
    pub fn short_title(&self) -> String {
        clean_title(&self.video_title)
    }
}

/// Parsed sections when the video has any for this verse, raw teaching blocks otherwise
pub fn video_passage(verse_ref: &VerseRef, video: &VideoArtifact) -> Option<Passage> {
    let title = &video.study.title;

    if let Some(sections) = video.verse_sections.get(verse_ref).filter(|s| !s.is_empty()) {
        let mut by_category: Vec<(String, Vec<String>)> = Vec::new();

        for section in sections {
            let content = section.content.trim();
            if content.chars().count() <= MIN_SECTION_CHARS {
                continue;
            }

            let category = if section.category.is_empty() {
                DEFAULT_CATEGORY
            } else {
                section.category.as_str()
            };

            match by_category.iter_mut().find(|(name, _)| name == category) {
                Some((_, items)) => items.push(content.to_string()),
                None => by_category.push((category.to_string(), vec![content.to_string()])),
            }
        }

        if by_category.is_empty() {
            return None;
        }

        let mut lines = Vec::new();
        for (category, items) in by_category {
            lines.push(format!("[{}]", category.to_uppercase()));
            lines.extend(items.into_iter().map(|item| format!("- {}", item)));
        }

        return Some(Passage {
            video_title: title.clone(),
            text: lines.join("\n"),
            is_parsed: true,
        });
    }

    let mentions = video.study.verse_mentions.get(verse_ref)?;
    let timestamps: Vec<&str> = mentions.iter().map(|m| m.timestamp.as_str()).collect();
    let segments: Vec<_> = teaching_blocks(&video.study.segments, &timestamps, DEFAULT_BLOCK_AFTER)
        .into_iter()
        .flatten()
        .collect();

    if segments.is_empty() {
        return None;
    }

    let block_text = segments.iter().map(|s| s.text.as_str()).collect::<Vec<_>>().join(" ");
    if block_text.chars().count() <= MIN_BLOCK_CHARS {
        return None;
    }

    Some(Passage {
        video_title: title.clone(),
        text: segments
            .iter()
            .map(|s| format!("[{}] {}", s.start, s.text))
            .collect::<Vec<_>>()
            .join("\n"),
        is_parsed: false,
    })
}

pub fn collect_passages(verse_ref: &VerseRef, videos: &[VideoArtifact]) -> Vec<Passage> {
    videos.iter().filter_map(|video| video_passage(verse_ref, video)).collect()
}

/// Parsed artifacts first, then enhanced artifacts of videos without a parse
pub fn synthesis_sources(parsed: Vec<VideoArtifact>, enhanced: Vec<VideoArtifact>) -> Vec<VideoArtifact> {
    let parsed_ids: HashSet<String> = parsed.iter().map(|v| v.study.video_id.clone()).collect();
    let mut sources = parsed;
    sources.extend(enhanced.into_iter().filter(|v| !parsed_ids.contains(&v.study.video_id)));
    sources
}

pub fn format_passages(passages: &[Passage]) -> String {
    let mut formatted = String::new();
    for passage in passages {
        formatted.push_str(&format!("\n\n=== [{}] ===\n", passage.short_title()));
        formatted.push_str(&passage.text);
    }
    formatted
}

pub fn default_synthesis_prompt() -> &'static str {
    r#"Du bist Kurator eines Video-Studienbibel-Projekts. Deine Aufgabe ist es, die Aussagen verschiedener Bibel-Lehrer zu einer Textstelle zu strukturieren, so wie es in Studienbibeln und Kommentaren üblich ist.

BIBELSTELLE: {verse_ref}
QUELLEN: {source_count} verschiedene Lehrer/Videos

KRITISCH: Verwende NUR was tatsächlich in den Transkripten steht. Kein eigenes Wissen ergänzen.
Quellenangabe: Nutze den Kurztitel genau so wie er in den ===[Titel]=== Headers steht.

HINWEIS: Manche Quellen sind bereits nach Kategorien gegliedert (z.B. [TEXTANALYSE], [THEOLOGISCH]).
Nutze diese Gliederung als Orientierung. Kombiniere und dedupliziere gleichartige Aussagen verschiedener Sprecher.

INHALTE DER SPRECHER:
{passages}

Ordne die Aussagen der Sprecher nach diesen Studienbibel-Kategorien.
Lass eine Kategorie weg wenn wirklich nichts Passendes im Transkript steht.
Lieber wenige, tiefgründige Punkte als viele oberflächliche.

ANTWORTFORMAT (nur JSON):
{
  "summary": "1-2 Sätze: Was ist das Kernthema dieser Textstelle laut den Lehrern?",
  "categories": {
    "textanalyse": [{"text": "Spezifische Beobachtung zum Text, z.B. Wortbedeutung, Satzbau, Struktur", "source": "Kurztitel"}],
    "historisch_kulturell": [{"text": "Historischer oder kultureller Hintergrund, den ein Sprecher erläutert", "source": "Kurztitel"}],
    "theologisch": [{"text": "Theologische Einsicht oder Lehraussage eines Sprechers", "source": "Kurztitel"}],
    "christologisch": [{"text": "Verbindung zu Jesus Christus oder zum Neuen Testament, die ein Sprecher aufzeigt", "source": "Kurztitel"}],
    "anwendung": [{"text": "Konkrete Lebensanwendung mit Beispiel, die ein Sprecher nennt", "source": "Kurztitel"}],
    "illustrationen": [{"text": "Geschichte, Analogie oder Bild, das ein Sprecher zur Veranschaulichung verwendet", "source": "Kurztitel"}]
  },
  "cross_references": ["Johannes 1:1", "Hebräer 11:3"],
  "source_count": {source_count}
}

Wenn gar kein verwertbarer Inhalt vorhanden ist, gib {} zurück.
Alles auf Deutsch. Nur gültiges JSON."#
}

pub struct CommentarySynthesizer {
    annotator: Annotator,
    template: String,
}

impl CommentarySynthesizer {
    pub fn new(annotator: Annotator, template: String) -> Self {
        Self { annotator, template }
    }

    pub fn build_prompt(&self, verse_ref: &VerseRef, passages: &[Passage]) -> String {
        self.template
            .replace("{verse_ref}", verse_ref.as_str())
            .replace("{source_count}", &passages.len().to_string())
            .replace("{passages}", &format_passages(passages))
    }

    /// Commentary for one verse; `Ok(None)` when there is nothing to synthesize
    pub async fn synthesize(
        &self,
        verse_ref: &VerseRef,
        videos: &[VideoArtifact],
    ) -> Result<Option<VerseCommentary>, AnnotationError> {
        let passages = collect_passages(verse_ref, videos);
        if passages.is_empty() {
            return Ok(None);
        }

        let mut value = self.annotator.annotate(&self.build_prompt(verse_ref, &passages)).await?;
        let Some(object) = value.as_object_mut() else {
            return Err(AnnotationError::NotAnObject);
        };
        if object.is_empty() {
            return Ok(None);
        }

        if object.get("source_count").map_or(true, Value::is_null) {
            object.insert("source_count".to_string(), Value::from(passages.len()));
        }
        object.insert(
            "source_videos".to_string(),
            Value::from(passages.iter().map(Passage::short_title).collect::<Vec<_>>()),
        );

        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| AnnotationError::MalformedJson(e.to_string()))
    }

    /// Commentary for every eligible focus verse, in sorted order
    pub async fn synthesize_all(
        &self,
        database: &Database,
        videos: &[VideoArtifact],
    ) -> (BTreeMap<VerseRef, VerseCommentary>, BatchReport) {
        let mut report = BatchReport::new("synthesis");
        let mut commentaries = BTreeMap::new();

        let verses = eligible_verses(&database.verses.focus);
        info!("🧠 Synthesizing commentary for {} verses from {} videos", verses.len(), videos.len());

        for verse_ref in verses {
            report.total += 1;
            let video_count = database.verses.focus.get(&verse_ref).map_or(0, Vec::len);
            debug!("🔎 {} ({} videos)", verse_ref, video_count);

            match self.synthesize(&verse_ref, videos).await {
                Ok(Some(commentary)) => {
                    info!(
                        "  ✅ {}: {} points from {} sources",
                        verse_ref,
                        commentary.point_count(),
                        commentary.source_count
                    );
                    commentaries.insert(verse_ref, commentary);
                    report.successful += 1;
                }
                Ok(None) => {
                    info!("  ⚠️ {}: not enough teaching content", verse_ref);
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!("  ⚠️ Synthesis error for {}: {}", verse_ref, e);
                    report.failed += 1;
                }
            }
        }

        (commentaries, report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::VideoEntry;
    use crate::llm::mock::MockLLM;
    use crate::timestamp::ms_to_ts;
    use crate::transcript::{Mention, Segment, TeachingSection, VideoStudyData};
    use std::sync::Arc;

    fn entries(count: usize) -> Vec<VideoEntry> {
        (0..count).map(|i| VideoEntry::new(&format!("v{}", i), "", "", vec![])).collect()
    }

    fn parsed_video(title: &str, verse: &str, sections: &[(&str, &str)]) -> VideoArtifact {
        let mut artifact = VideoArtifact::from(VideoStudyData {
            video_id: title.to_string(),
            title: title.to_string(),
            ..Default::default()
        });
        artifact.verse_sections.insert(
            VerseRef::from(verse),
            sections
                .iter()
                .map(|(category, content)| TeachingSection {
                    timestamp: "00:01:00".to_string(),
                    verse_reference: verse.to_string(),
                    category: category.to_string(),
                    quality: "high".to_string(),
                    content: content.to_string(),
                })
                .collect(),
        );
        artifact
    }

    fn raw_video(title: &str, verse: &str) -> VideoArtifact {
        let segments: Vec<Segment> = (0..30)
            .map(|i| {
                Segment::new(
                    ms_to_ts(i * 10_000),
                    i * 10_000,
                    format!("Hier erklärt der Prediger den Gedanken Nummer {}.", i),
                )
            })
            .collect();
        let mut study = VideoStudyData {
            video_id: title.to_string(),
            title: title.to_string(),
            segments,
            ..Default::default()
        };
        study
            .verse_mentions
            .insert(VerseRef::from(verse), vec![Mention::new("00:01:00", 60_000, verse)]);
        VideoArtifact::from(study)
    }

    const LONG_A: &str = "Das hebräische Wort bara beschreibt ein Schaffen, das allein Gott zukommt.";
    const LONG_B: &str = "Die Schöpfung ist kein Zufall, sondern Ausdruck von Gottes Willen und Wort.";

    #[test]
    fn test_eligibility() {
        let mut index = VerseIndex::new();
        index.insert("Genesis 1:3".into(), entries(3));
        index.insert("Genesis 1:1-5".into(), entries(1));
        index.insert("Genesis 1:6-8".into(), entries(2));
        index.insert("Genesis 1".into(), entries(1));

        assert_eq!(
            eligible_verses(&index),
            vec![VerseRef::from("Genesis 1:3"), VerseRef::from("Genesis 1:6-8")]
        );
    }

    #[test]
    fn test_parsed_passage_groups_by_category() {
        let video = parsed_video(
            "Am_Anfang_12345",
            "Genesis 1:1",
            &[("textanalyse", LONG_A), ("", LONG_B), ("textanalyse", "zu kurz"), ("textanalyse", LONG_B)],
        );

        let passage = video_passage(&"Genesis 1:1".into(), &video).unwrap();
        assert!(passage.is_parsed);
        assert_eq!(
            passage.text,
            format!("[TEXTANALYSE]\n- {}\n- {}\n[ALLGEMEIN]\n- {}", LONG_A, LONG_B, LONG_B)
        );
        assert_eq!(passage.short_title(), "Am Anfang");
    }

    #[test]
    fn test_short_sections_do_not_fall_back_to_raw_blocks() {
        let mut video = raw_video("v", "Genesis 1:1");
        video.verse_sections = parsed_video("v", "Genesis 1:1", &[("theologisch", "kurz")]).verse_sections;
        assert!(video_passage(&"Genesis 1:1".into(), &video).is_none());
    }

    #[test]
    fn test_raw_block_fallback() {
        let video = raw_video("Predigt_55555", "Genesis 1:2");
        let passage = video_passage(&"Genesis 1:2".into(), &video).unwrap();

        assert!(!passage.is_parsed);
        assert!(passage.text.starts_with("[00:00:40] "));
        assert_eq!(passage.text.lines().count(), 26);
    }

    #[tokio::test]
    async fn test_synthesis_merges_sources() {
        let mock = Arc::new(MockLLM::new([
            r#"```json
{"summary": "Gott schafft durch sein Wort.", "categories": {"theologisch": [{"text": "Schöpfung aus dem Nichts", "source": "Am Anfang"}]}, "cross_references": ["Johannes 1:1"]}
```"#,
        ]));
        let synthesizer = CommentarySynthesizer::new(Annotator::new(mock.clone()), default_synthesis_prompt().to_string());
        let videos = vec![
            parsed_video("Am_Anfang_12345", "Genesis 1:1", &[("theologisch", LONG_A)]),
            raw_video("Predigt_55555", "Genesis 1:1"),
        ];

        let commentary = synthesizer.synthesize(&"Genesis 1:1".into(), &videos).await.unwrap().unwrap();
        assert_eq!(commentary.source_count, 2);
        assert_eq!(commentary.source_videos, vec!["Am Anfang", "Predigt"]);
        assert_eq!(commentary.point_count(), 1);

        let prompt = mock.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("=== [Am Anfang] ===\n[THEOLOGISCH]"));
        assert!(prompt.contains("=== [Predigt] ===\n[00:00:40]"));
        assert!(prompt.contains("BIBELSTELLE: Genesis 1:1"));
    }

    #[tokio::test]
    async fn test_null_fields_in_model_result_are_absent() {
        let mock = Arc::new(MockLLM::new([
            r#"{"summary": "Gott schafft.", "categories": {"theologisch": [{"text": "Ex nihilo", "source": null}], "anwendung": null}, "cross_references": null, "source_count": null}"#,
        ]));
        let synthesizer = CommentarySynthesizer::new(Annotator::new(mock), default_synthesis_prompt().to_string());
        let videos = vec![parsed_video("a", "Genesis 1:1", &[("theologisch", LONG_A)])];

        let commentary = synthesizer.synthesize(&"Genesis 1:1".into(), &videos).await.unwrap().unwrap();
        assert_eq!(commentary.summary, "Gott schafft.");
        assert!(commentary.cross_references.is_empty());
        assert_eq!(commentary.source_count, 1);
        assert!(commentary.categories["anwendung"].is_empty());
        assert_eq!(commentary.categories["theologisch"][0].source, "");
        assert_eq!(commentary.point_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_model_result_skips_verse() {
        let mock = Arc::new(MockLLM::new(["{}"]));
        let synthesizer = CommentarySynthesizer::new(Annotator::new(mock), default_synthesis_prompt().to_string());
        let videos = vec![parsed_video("a", "Genesis 1:1", &[("theologisch", LONG_A)])];

        assert!(synthesizer.synthesize(&"Genesis 1:1".into(), &videos).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_no_passages_makes_no_request() {
        let mock = Arc::new(MockLLM::new(Vec::<String>::new()));
        let synthesizer = CommentarySynthesizer::new(Annotator::new(mock.clone()), default_synthesis_prompt().to_string());

        assert!(synthesizer.synthesize(&"Genesis 1:9".into(), &[]).await.unwrap().is_none());
        assert_eq!(mock.prompt_count(), 0);
    }

    #[test]
    fn test_sources_prefer_parsed() {
        let parsed = vec![parsed_video("a", "Genesis 1:1", &[])];
        let enhanced = vec![raw_video("a", "Genesis 1:1"), raw_video("b", "Genesis 1:1")];
        let sources = synthesis_sources(parsed, enhanced);

        let ids: Vec<&str> = sources.iter().map(|v| v.study.video_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(sources[0].verse_sections.contains_key(&VerseRef::from("Genesis 1:1")));
    }
}
