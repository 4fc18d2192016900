/// Video Study Bible Builder
///
/// Turns timestamped German sermon transcripts into a study Bible database:
/// verse and topic indices, clip ranges, speaker metadata and synthesized
/// commentary per verse.

pub mod artifacts;
pub mod config;
pub mod database;
pub mod enrich;
pub mod index;
pub mod llm;
pub mod processing;
pub mod reference;
pub mod synthesis;
pub mod timestamp;
pub mod transcript;

// Re-export main types for easy access
pub use crate::artifacts::{ArtifactStage, ArtifactStore};
pub use crate::config::{Config, ConfigBuilder};
pub use crate::database::{Database, DatabaseStore, VerseCommentary, VideoEntry};
pub use crate::index::FocusFilter;
pub use crate::llm::{AnnotationError, Annotator, LLMConfig, LLMProvider, LLM};
pub use crate::processing::{BatchReport, ExtractionMode, Pipeline};
pub use crate::reference::{ReferenceMatcher, VerseRef};
pub use crate::transcript::segmenter::TranscriptSegmenter;
pub use crate::transcript::{Mention, Segment, VideoArtifact, VideoStudyData};
