use crate::llm::{AnnotationError, Annotator};
use crate::reference::VerseRef;
use crate::transcript::{Segment, TeachingSection, VideoArtifact, VideoStudyData};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const CHUNK_SIZE: usize = 40;
pub const CHUNK_OVERLAP: usize = 5;

/// Fixed teaching-section categories
pub const CATEGORY_LABELS: &[&str] = &[
    "textanalyse",
    "historisch_kulturell",
    "theologisch",
    "christologisch",
    "anwendung",
    "illustrationen",
];

#[derive(Debug, Default, Deserialize)]
struct SectionsReply {
    #[serde(default)]
    sections: Vec<TeachingSection>,
}

/// Overlapping chunks covering every segment
pub fn chunk_segments(segments: &[Segment], size: usize, overlap: usize) -> Vec<&[Segment]> {
    let step = size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < segments.len() {
        let end = (start + size).min(segments.len());
        chunks.push(&segments[start..end]);
        start += step;
    }

    chunks
}

/// Sections grouped by reference; sections without a reference are dropped
pub fn group_by_verse(sections: &[TeachingSection]) -> BTreeMap<VerseRef, Vec<TeachingSection>> {
    let mut grouped: BTreeMap<VerseRef, Vec<TeachingSection>> = BTreeMap::new();
    for section in sections {
        let reference = section.verse_reference.trim();
        if reference.is_empty() {
            continue;
        }
        grouped.entry(VerseRef::from(reference)).or_default().push(section.clone());
    }
    grouped
}

pub fn default_sections_prompt() -> &'static str {
    r#"Du analysierst ein deutsches Bibel-Lehr-Video-Transkript.

VIDEO: {title}

DEINE AUFGABE:
Identifiziere alle Stellen im Transkript, wo der Sprecher über einen konkreten Bibelvers oder -abschnitt LEHRT (nicht nur vorliest oder ankündigt).

Ignoriere:
- Moderationsansagen ("Herzlich willkommen...")
- Verse vorlesen ohne Kommentar
- Ankündigungen ("Schlagen Sie auf...")
- Musik, Begrüßungen, Übergänge

Extrahiere NUR:
- Stellen mit echtem Lehrinhalt: Erklärungen, Einsichten, Anwendungen, Illustrationen
- Muss sich auf einen bestimmten Bibelvers oder -abschnitt beziehen
- Der Bezug kann explizit ("Genesis 1:1") oder implizit ("Am Anfang schuf Gott") sein

Für jede Lehrstelle:
- Welcher Vers/Abschnitt wird behandelt?
- Welche Kategorie trifft am besten zu?
  - "textanalyse": Wortbedeutung, Sprache, Aufbau des Textes
  - "historisch_kulturell": Historischer oder kultureller Hintergrund
  - "theologisch": Glaubenslehre, theologische Aussagen
  - "christologisch": Verbindung zu Jesus Christus, NT-Bezug
  - "anwendung": Praktische Lebensanwendung, persönlicher Bezug
  - "illustrationen": Geschichte, Analogie, Beispiel zur Veranschaulichung
- Was sagt der Sprecher konkret? (als klare, eigenständige Aussage)

TRANSKRIPT:
{transcript}

ANTWORTFORMAT (nur JSON):
{
  "sections": [
    {
      "timestamp": "HH:MM:SS",
      "verse_reference": "Genesis 1:1",
      "category": "theologisch",
      "quality": "high",
      "content": "Was der Sprecher sagt, als klare Aussage, nicht als Zitat"
    }
  ]
}

"quality" Werte: "high" (tiefgründig, einzigartig), "medium" (solide, nützlich), "low" (zu allgemein).
Nur "high" und "medium" aufnehmen. Bei Zweifeln weglassen.
Nur gültiges JSON. Alles auf Deutsch."#
}

/// AI-first parse of whole transcripts into teaching sections
pub struct SectionParser {
    annotator: Annotator,
    template: String,
    chunk_size: usize,
    overlap: usize,
    pause: Duration,
}

impl SectionParser {
    pub fn new(annotator: Annotator, template: String) -> Self {
        Self {
            annotator,
            template,
            chunk_size: CHUNK_SIZE,
            overlap: CHUNK_OVERLAP,
            pause: Duration::from_millis(500),
        }
    }

    pub fn with_chunking(mut self, chunk_size: usize, overlap: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self.overlap = overlap;
        self
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub fn build_prompt(&self, title: &str, chunk: &[Segment]) -> String {
        let transcript = chunk
            .iter()
            .map(|s| format!("[{}] {}", s.start, s.text))
            .collect::<Vec<_>>()
            .join("\n");

        self.template.replace("{title}", title).replace("{transcript}", &transcript)
    }

    pub async fn parse_chunk(&self, title: &str, chunk: &[Segment]) -> Result<Vec<TeachingSection>, AnnotationError> {
        let reply: SectionsReply = self.annotator.annotate_as(&self.build_prompt(title, chunk)).await?;
        Ok(reply.sections)
    }

    /// Parse every chunk of a video; failed chunks contribute nothing
    pub async fn parse_video(&self, video: &VideoStudyData) -> VideoArtifact {
        let chunks = chunk_segments(&video.segments, self.chunk_size, self.overlap);
        info!("📖 Parsing {} segments in {} chunks", video.segments.len(), chunks.len());

        let mut all_sections = Vec::new();
        for (number, chunk) in chunks.iter().enumerate() {
            let (Some(first), Some(last)) = (chunk.first(), chunk.last()) else {
                continue;
            };

            match self.parse_chunk(&video.title, chunk).await {
                Ok(sections) => {
                    debug!("  Chunk {} [{} → {}]: {} sections", number + 1, first.start, last.start, sections.len());
                    all_sections.extend(sections);
                }
                Err(e) => warn!("  ⚠️ Chunk {} [{} → {}] failed: {}", number + 1, first.start, last.start, e),
            }

            if !self.pause.is_zero() {
                tokio::time::sleep(self.pause).await;
            }
        }

        let verse_sections = group_by_verse(&all_sections);
        info!("✅ {} teaching sections → {} passages", all_sections.len(), verse_sections.len());

        VideoArtifact {
            study: video.clone(),
            ai_sections: all_sections,
            verse_sections,
            ai_summary: None,
        }
    }
}
