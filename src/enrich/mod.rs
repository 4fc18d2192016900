//! Model-driven and catalog-driven enrichment stages

pub mod clips;
pub mod metadata;
pub mod sections;
pub mod thumbnails;

pub use clips::ClipExtractor;
pub use metadata::MetadataExtractor;
pub use sections::SectionParser;
pub use thumbnails::ThumbnailFetcher;
