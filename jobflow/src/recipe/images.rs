//! Image pipeline.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::deps::RecipeDeps;
use super::payload::ImageJobData;
use super::store::ImageRecord;
use super::{required_str, PROCESS_IMAGE, SAVE_IMAGE};
use crate::actions::Action;
use crate::context::ActionContext;
use crate::core::JobState;
use crate::errors::{JobError, JobResult};

/// Result of processing one image reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedImage {
    /// Reference as found in the note.
    pub source: String,
    /// Derived thumbnail location.
    pub thumbnail: String,
    /// Lowercased file extension.
    pub format: String,
}

/// Turns an image reference into stored artifacts.
#[async_trait]
pub trait ImageProcessor: Send + Sync {
    /// Processes one image.
    async fn process(&self, image_id: &str, source: &str) -> anyhow::Result<ProcessedImage>;
}

const SUPPORTED_FORMATS: &[&str] = &["gif", "jpeg", "jpg", "png", "webp"];

/// Validates the format and derives a thumbnail path under a fixed directory.
#[derive(Debug, Clone)]
pub struct ThumbnailPathProcessor {
    thumbnail_dir: String,
}

impl Default for ThumbnailPathProcessor {
    fn default() -> Self {
        Self::new("thumbnails")
    }
}

impl ThumbnailPathProcessor {
    /// Creates a processor writing under `thumbnail_dir`.
    pub fn new(thumbnail_dir: impl Into<String>) -> Self {
        Self {
            thumbnail_dir: thumbnail_dir.into(),
        }
    }
}

#[async_trait]
impl ImageProcessor for ThumbnailPathProcessor {
    async fn process(&self, image_id: &str, source: &str) -> anyhow::Result<ProcessedImage> {
        let path = source.split(['?', '#']).next().unwrap_or(source);
        let format = Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .filter(|ext| SUPPORTED_FORMATS.contains(&ext.as_str()))
            .ok_or_else(|| JobError::validation(format!("Unsupported image format: {source}")))?;

        Ok(ProcessedImage {
            source: source.to_string(),
            thumbnail: format!("{}/{image_id}.{format}", self.thumbnail_dir),
            format,
        })
    }
}

/// Runs the image processor.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessImageAction;

#[async_trait]
impl Action<RecipeDeps> for ProcessImageAction {
    fn name(&self) -> &str {
        PROCESS_IMAGE
    }

    fn validate_input(&self, input: &JobState) -> JobResult<()> {
        required_str(input, "imageId")?;
        required_str(input, "source").map(|_| ())
    }

    async fn execute(&self, input: &JobState, deps: &RecipeDeps, _ctx: &ActionContext) -> anyhow::Result<JobState> {
        let processed = deps
            .image_processor
            .process(required_str(input, "imageId")?, required_str(input, "source")?)
            .await?;
        Ok(JobState::new().with("processedImage", serde_json::to_value(processed)?))
    }
}

/// Upserts the image row.
#[derive(Debug, Clone, Copy, Default)]
pub struct SaveImageAction;

#[async_trait]
impl Action<RecipeDeps> for SaveImageAction {
    fn name(&self) -> &str {
        SAVE_IMAGE
    }

    async fn execute(&self, input: &JobState, deps: &RecipeDeps, _ctx: &ActionContext) -> anyhow::Result<JobState> {
        let data: ImageJobData = input.to_typed()?;
        let processed: ProcessedImage = input.get_as("processedImage")?;

        deps.repository
            .save_image(ImageRecord {
                id: data.image_id.clone(),
                note_id: data.note_id,
                source: processed.source,
                thumbnail: processed.thumbnail,
                format: processed.format,
            })
            .await?;
        Ok(JobState::new().with("savedImageId", data.image_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{classify_error, ErrorKind};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_thumbnail_path_derived() {
        let processor = ThumbnailPathProcessor::new("thumbs");

        let image = processor.process("note-1-img-0", "https://cdn/x/Soup.JPG?w=200").await.unwrap();

        assert_eq!(image.format, "jpg");
        assert_eq!(image.thumbnail, "thumbs/note-1-img-0.jpg");
        assert_eq!(image.source, "https://cdn/x/Soup.JPG?w=200");
    }

    #[tokio::test]
    async fn test_unsupported_format_is_not_retried() {
        let processor = ThumbnailPathProcessor::default();

        let err = classify_error(processor.process("img", "recipe.pdf").await.unwrap_err());

        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(!err.is_retryable());
    }
}
