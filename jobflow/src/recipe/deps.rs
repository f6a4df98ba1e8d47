//! Shared dependency bundle for recipe actions.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::categorization::{Categorizer, KeywordCategorizer};
use super::images::{ImageProcessor, ThumbnailPathProcessor};
use super::parsing::{HtmlCleaner, IngredientParser, NoteParser, RegexHtmlCleaner, RegexIngredientParser, SectionNoteParser};
use super::store::NoteRepository;
use crate::broadcast::StatusBroadcaster;
use crate::coordinator::{CompletionCoordinator, CompletionStore};
use crate::errors::JobflowError;
use crate::queue::JobQueue;

/// Everything recipe actions reach for, built once per worker.
pub struct RecipeDeps {
    /// Markup stripper.
    pub html_cleaner: Arc<dyn HtmlCleaner>,
    /// Note splitter.
    pub note_parser: Arc<dyn NoteParser>,
    /// Ingredient line parser.
    pub ingredient_parser: Arc<dyn IngredientParser>,
    /// Image handling.
    pub image_processor: Arc<dyn ImageProcessor>,
    /// Category assignment.
    pub categorizer: Arc<dyn Categorizer>,
    /// Persistence.
    pub repository: Arc<dyn NoteRepository>,
    /// Transport used to schedule follow-up jobs.
    pub queue: Arc<dyn JobQueue>,
    /// Fan-in tracking.
    pub coordinator: CompletionCoordinator,
    /// Progress reporting.
    pub broadcaster: Arc<dyn StatusBroadcaster>,
}

impl RecipeDeps {
    /// Creates a bundle with the default regex parsers and keyword categorizer.
    pub fn new(
        repository: Arc<dyn NoteRepository>,
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn CompletionStore>,
        broadcaster: Arc<dyn StatusBroadcaster>,
    ) -> Result<Self, JobflowError> {
        Ok(Self {
            html_cleaner: Arc::new(RegexHtmlCleaner::new()?),
            note_parser: Arc::new(SectionNoteParser::new()?),
            ingredient_parser: Arc::new(RegexIngredientParser::new()?),
            image_processor: Arc::new(ThumbnailPathProcessor::default()),
            categorizer: Arc::new(KeywordCategorizer::default()),
            repository,
            queue,
            coordinator: CompletionCoordinator::new(store, Arc::clone(&broadcaster)),
            broadcaster,
        })
    }

    /// Replaces the HTML cleaner.
    #[must_use]
    pub fn with_html_cleaner(mut self, cleaner: Arc<dyn HtmlCleaner>) -> Self {
        self.html_cleaner = cleaner;
        self
    }

    /// Replaces the note parser.
    #[must_use]
    pub fn with_note_parser(mut self, parser: Arc<dyn NoteParser>) -> Self {
        self.note_parser = parser;
        self
    }

    /// Replaces the ingredient parser.
    #[must_use]
    pub fn with_ingredient_parser(mut self, parser: Arc<dyn IngredientParser>) -> Self {
        self.ingredient_parser = parser;
        self
    }

    /// Replaces the image processor.
    #[must_use]
    pub fn with_image_processor(mut self, processor: Arc<dyn ImageProcessor>) -> Self {
        self.image_processor = processor;
        self
    }

    /// Replaces the categorizer.
    #[must_use]
    pub fn with_categorizer(mut self, categorizer: Arc<dyn Categorizer>) -> Self {
        self.categorizer = categorizer;
        self
    }

    /// Sets how long a downstream trigger claim is honored before another
    /// sibling may take it over. Usually the queue's visibility timeout.
    #[must_use]
    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.coordinator = self.coordinator.with_claim_lease(lease);
        self
    }
}

impl fmt::Debug for RecipeDeps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecipeDeps")
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}
