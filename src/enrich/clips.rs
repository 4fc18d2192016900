use crate::artifacts::{ArtifactStore, SEGMENT_PREFERENCE};
use crate::database::Database;
use crate::llm::{AnnotationError, Annotator};
use crate::processing::BatchReport;
use crate::reference::VerseRef;
use crate::timestamp::ms_to_ts;
use crate::transcript::window::{symmetric_window, CLIP_WINDOW_RADIUS_MS};
use crate::transcript::{truncate_chars, ClipAnnotation, Mention, Segment};
use serde::{Deserialize, Deserializer};
use serde_json::Number;
use std::collections::HashMap;
use tracing::{info, warn};

/// Longest accepted clip
pub const MAX_CLIP_MS: i64 = 600_000;

#[derive(Debug, Deserialize)]
struct ClipReply {
    #[serde(default, deserialize_with = "rounded_ms")]
    clip_start_ms: i64,
    #[serde(default, deserialize_with = "rounded_ms")]
    clip_end_ms: i64,
    #[serde(default)]
    clip_title: Option<String>,
    #[serde(default)]
    clip_description: Option<String>,
}

/// Integer or fractional milliseconds, rounded; `null` reads as 0 and fails validation
fn rounded_ms<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let number = Option::<Number>::deserialize(deserializer)?;
    Ok(number
        .and_then(|n| n.as_i64().or_else(|| n.as_f64().map(|ms| ms.round() as i64)))
        .unwrap_or_default())
}

/// Reject inverted, overlong or negative bounds
pub fn validate_clip_bounds(start_ms: i64, end_ms: i64) -> Result<(), AnnotationError> {
    if start_ms >= end_ms {
        return Err(AnnotationError::Rejected(format!("start {} is not before end {}", start_ms, end_ms)));
    }
    if end_ms - start_ms > MAX_CLIP_MS {
        return Err(AnnotationError::Rejected(format!("clip of {} ms is too long", end_ms - start_ms)));
    }
    if start_ms < 0 {
        return Err(AnnotationError::Rejected(format!("negative start {}", start_ms)));
    }
    Ok(())
}

/// Everything the clip prompt is built from; equal keys share one request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClipKey {
    video_id: String,
    verse_ref: VerseRef,
    timestamp: String,
    context: String,
    category: Option<String>,
}

pub fn default_clip_prompt() -> &'static str {
    r#"Du analysierst ein deutsches christliches Lehrvideo-Transkript.

BIBELVERS: {verse_ref}
BEKANNTE LEHRSTELLE: {timestamp} — „{context}"
KATEGORIE: {category}

TRANSKRIPT-AUSSCHNITT (Format: [HH:MM:SS|ms] Text):
{segments}

Aufgabe:
1. Finde den besten START-Zeitpunkt für einen Clip zu diesem Vers (inkl. Einleitung/Setup, typisch 20–60 Sek. vor der Hauptaussage). Wähle einen Zeitpunkt aus dem Transkript.
2. Finde den END-Zeitpunkt (wenn der Sprecher zum nächsten Thema übergeht). Wähle einen Zeitpunkt aus dem Transkript.
3. Schreibe einen prägnanten deutschen Hook-Titel (max. 7 Wörter, keine Anführungszeichen).
4. Schreibe eine deutsche Beschreibung (1 Satz, max. 20 Wörter), was der Zuschauer in diesem Clip lernt.

Antworte NUR mit gültigem JSON:
{
  "clip_start_ms": <Ganzzahl, ms aus dem Transkript>,
  "clip_end_ms": <Ganzzahl, ms aus dem Transkript>,
  "clip_title": "<Hook-Titel>",
  "clip_description": "<Beschreibung>"
}"#
}

/// Finds clip bounds and texts for verse mentions
pub struct ClipExtractor {
    annotator: Annotator,
    template: String,
    radius_ms: u64,
}

impl ClipExtractor {
    pub fn new(annotator: Annotator, template: String) -> Self {
        Self {
            annotator,
            template,
            radius_ms: CLIP_WINDOW_RADIUS_MS,
        }
    }

    pub fn with_radius(mut self, radius_ms: u64) -> Self {
        self.radius_ms = radius_ms;
        self
    }

    pub fn build_prompt(&self, verse_ref: &VerseRef, mention: &Mention, window: &[&Segment]) -> String {
        let segments = window
            .iter()
            .map(|s| format!("[{}|{}ms] {}", s.start, s.start_ms, s.text))
            .collect::<Vec<_>>()
            .join("\n");

        self.template
            .replace("{verse_ref}", verse_ref.as_str())
            .replace("{timestamp}", &mention.timestamp)
            .replace("{context}", &truncate_chars(&mention.context, 200))
            .replace("{category}", mention.category.as_deref().unwrap_or("?"))
            .replace("{segments}", &segments)
    }

    /// Clip for one mention; `Ok(None)` when the window around it is empty
    pub async fn extract(
        &self,
        verse_ref: &VerseRef,
        mention: &Mention,
        segments: &[Segment],
    ) -> Result<Option<ClipAnnotation>, AnnotationError> {
        let window = symmetric_window(segments, mention.timestamp_ms, self.radius_ms);
        if window.is_empty() {
            return Ok(None);
        }

        let reply: ClipReply = self.annotator.annotate_as(&self.build_prompt(verse_ref, mention, &window)).await?;
        validate_clip_bounds(reply.clip_start_ms, reply.clip_end_ms)?;

        Ok(Some(ClipAnnotation {
            start_ms: reply.clip_start_ms,
            end_ms: reply.clip_end_ms,
            title: reply.clip_title.unwrap_or_default(),
            description: reply.clip_description.unwrap_or_default(),
        }))
    }

    /// Enrich every mention in both indices that has no clip yet.
    ///
    /// Segments are loaded once per video. Mentions with the same video, verse,
    /// timestamp, context and category share one request, so a mention filed in
    /// both indices costs one call.
    pub async fn enrich_database(&self, database: &mut Database, artifacts: &ArtifactStore) -> BatchReport {
        let mut report = BatchReport::new("clips");
        let mut segment_cache: HashMap<String, Vec<Segment>> = HashMap::new();
        let mut clip_cache: HashMap<ClipKey, Option<ClipAnnotation>> = HashMap::new();

        for (verse_ref, entry) in database.verse_entries_mut() {
            if !segment_cache.contains_key(&entry.video_id) {
                let segments = match artifacts.load_segments(&entry.video_id, SEGMENT_PREFERENCE).await {
                    Ok(segments) => segments,
                    Err(e) => {
                        warn!("⚠️ No segments for {}: {:#}", entry.video_id, e);
                        Vec::new()
                    }
                };
                segment_cache.insert(entry.video_id.clone(), segments);
            }

            let segments = segment_cache.get(&entry.video_id).map(Vec::as_slice).unwrap_or_default();
            if entry.mentions.is_empty() || segments.is_empty() {
                continue;
            }

            info!("🎬 [{}] → {}", entry.display_name(), verse_ref);

            for mention in &mut entry.mentions {
                report.total += 1;
                if mention.has_clip() {
                    report.skipped += 1;
                    continue;
                }

                let key = ClipKey {
                    video_id: entry.video_id.clone(),
                    verse_ref: verse_ref.clone(),
                    timestamp: mention.timestamp.clone(),
                    context: mention.context.clone(),
                    category: mention.category.clone(),
                };
                if let Some(cached) = clip_cache.get(&key) {
                    match cached {
                        Some(clip) => {
                            mention.apply_clip(clip);
                            report.successful += 1;
                        }
                        None => report.failed += 1,
                    }
                    continue;
                }

                let outcome = match self.extract(verse_ref, mention, segments).await {
                    Ok(Some(clip)) => Some(clip),
                    Ok(None) => {
                        warn!("  ⚠️ {}: empty transcript window", mention.timestamp);
                        None
                    }
                    Err(e) => {
                        warn!("  ⚠️ {}: no clip extracted: {}", mention.timestamp, e);
                        None
                    }
                };

                match &outcome {
                    Some(clip) => {
                        info!(
                            "  ✅ {} → {}-{} ({}s) {}",
                            mention.timestamp,
                            ms_to_ts(clip.start_ms as u64),
                            ms_to_ts(clip.end_ms as u64),
                            (clip.end_ms - clip.start_ms) / 1000,
                            clip.title
                        );
                        mention.apply_clip(clip);
                        report.successful += 1;
                    }
                    None => report.failed += 1,
                }
                clip_cache.insert(key, outcome);
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::VideoEntry;
    use crate::llm::mock::MockLLM;
    use std::sync::Arc;

    fn segments() -> Vec<Segment> {
        (0..10)
            .map(|i| Segment::new(ms_to_ts(i * 60_000), i * 60_000, format!("Satz {}", i)))
            .collect()
    }

    #[test]
    fn test_validation() {
        assert!(matches!(validate_clip_bounds(500, 100), Err(AnnotationError::Rejected(_))));
        assert!(validate_clip_bounds(100, 100).is_err());
        assert!(validate_clip_bounds(0, 600_001).is_err());
        assert!(validate_clip_bounds(-5, 100).is_err());
        assert!(validate_clip_bounds(0, 600_000).is_ok());
    }

    #[tokio::test]
    async fn test_prompt_lists_window_segments() {
        let mock = Arc::new(MockLLM::new([
            r#"{"clip_start_ms": 120000, "clip_end_ms": 300000, "clip_title": "Licht", "clip_description": "Worum es geht."}"#,
        ]));
        let extractor = ClipExtractor::new(Annotator::new(mock.clone()), default_clip_prompt().to_string());
        let mention = Mention::new("00:03:00", 180_000, "Genesis 1,3");

        let clip = extractor
            .extract(&"Genesis 1:3".into(), &mention, &segments())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(clip.start_ms, 120_000);
        assert_eq!(clip.title, "Licht");

        let prompt = mock.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("[00:00:00|0ms] Satz 0"));
        assert!(prompt.contains("[00:06:00|360000ms] Satz 6"));
        assert!(!prompt.contains("Satz 7"));
        assert!(prompt.contains("KATEGORIE: ?"));
    }

    #[tokio::test]
    async fn test_invalid_reply_is_rejected() {
        let mock = Arc::new(MockLLM::new([r#"{"clip_start_ms": 500, "clip_end_ms": 100}"#]));
        let extractor = ClipExtractor::new(Annotator::new(mock), default_clip_prompt().to_string());
        let mention = Mention::new("00:01:00", 60_000, "");

        let result = extractor.extract(&"Genesis 1:1".into(), &mention, &segments()).await;
        assert!(matches!(result, Err(AnnotationError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_fractional_bounds_are_rounded() {
        let mock = Arc::new(MockLLM::new([r#"{"clip_start_ms": 120000.0, "clip_end_ms": 179999.6, "clip_title": "Licht"}"#]));
        let extractor = ClipExtractor::new(Annotator::new(mock), default_clip_prompt().to_string());
        let mention = Mention::new("00:03:00", 180_000, "");

        let clip = extractor
            .extract(&"Genesis 1:3".into(), &mention, &segments())
            .await
            .unwrap()
            .unwrap();
        assert_eq!((clip.start_ms, clip.end_ms), (120_000, 180_000));
        assert_eq!(clip.description, "");
    }

    #[tokio::test]
    async fn test_empty_window_makes_no_request() {
        let mock = Arc::new(MockLLM::new(Vec::<String>::new()));
        let extractor = ClipExtractor::new(Annotator::new(mock.clone()), default_clip_prompt().to_string());
        let mention = Mention::new("05:00:00", 18_000_000, "");

        assert!(extractor.extract(&"Genesis 1:1".into(), &mention, &segments()).await.unwrap().is_none());
        assert_eq!(mock.prompt_count(), 0);
    }

    #[tokio::test]
    async fn test_enrich_database_is_idempotent() {
        let dir = tempfile::TempDir::new().unwrap();
        let artifacts = ArtifactStore::new(dir.path());
        let mut study = crate::transcript::VideoArtifact::default();
        study.study.video_id = "v".to_string();
        study.study.segments = segments();
        artifacts
            .save("v", crate::artifacts::ArtifactStage::StudyData, &study)
            .await
            .unwrap();

        let mut done = Mention::new("00:01:00", 60_000, "");
        done.clip_start_ms = Some(0);
        let open = Mention::new("00:02:00", 120_000, "");
        let entry = VideoEntry::new("v", "v.mp4", "v", vec![done, open]);

        let mut db = Database::default();
        db.verses.focus.insert("Genesis 1:1".into(), vec![entry.clone()]);
        db.verses.all.insert("Genesis 1:1".into(), vec![entry]);

        let mock = Arc::new(MockLLM::new([r#"{"clip_start_ms": 60000, "clip_end_ms": 180000, "clip_title": "T", "clip_description": "D"}"#]));
        let extractor = ClipExtractor::new(Annotator::new(mock.clone()), default_clip_prompt().to_string());
        let report = extractor.enrich_database(&mut db, &artifacts).await;

        assert_eq!(mock.prompt_count(), 1);
        assert_eq!(report.total, 4);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.successful, 2);
        assert!(db.video_entries().all(|e| e.mentions.iter().all(Mention::has_clip)));
    }

    #[tokio::test]
    async fn test_same_timestamp_with_other_context_gets_own_clip() {
        let dir = tempfile::TempDir::new().unwrap();
        let artifacts = ArtifactStore::new(dir.path());
        let mut study = crate::transcript::VideoArtifact::default();
        study.study.segments = segments();
        artifacts
            .save("v", crate::artifacts::ArtifactStage::StudyData, &study)
            .await
            .unwrap();

        let first = Mention::new("00:02:00", 120_000, "Gott spricht");
        let second = Mention::new("00:02:00", 120_000, "Es wird Licht");
        let mut db = Database::default();
        db.verses
            .all
            .insert("Genesis 1:3".into(), vec![VideoEntry::new("v", "v.mp4", "v", vec![first, second])]);

        let mock = Arc::new(MockLLM::new([
            r#"{"clip_start_ms": 60000, "clip_end_ms": 180000, "clip_title": "Wort"}"#,
            r#"{"clip_start_ms": 90000, "clip_end_ms": 200000, "clip_title": "Licht"}"#,
        ]));
        let extractor = ClipExtractor::new(Annotator::new(mock.clone()), default_clip_prompt().to_string());
        let report = extractor.enrich_database(&mut db, &artifacts).await;

        assert_eq!(mock.prompt_count(), 2);
        assert_eq!(report.successful, 2);
        let titles: Vec<_> = db.video_entries().flat_map(|e| e.mentions.iter()).map(|m| m.clip_title.clone()).collect();
        assert_eq!(titles, vec![Some("Wort".to_string()), Some("Licht".to_string())]);
    }
}
