//! One-call entry points over the pipeline's collaborators.

use crate::model::{ImageCandidate, SelectedImage, ValidatedCandidate};

use super::{PipelineError, PipelineOrchestrator};

/// Thin delegation surface for callers that want a single stage at a time.
#[derive(Clone, Copy)]
pub struct ImageService<'a> {
    pipeline: &'a PipelineOrchestrator,
}

impl<'a> ImageService<'a> {
    #[must_use]
    pub fn new(pipeline: &'a PipelineOrchestrator) -> Self {
        Self { pipeline }
    }

    /// Runs the whole pipeline for one item.
    ///
    /// # Errors
    ///
    /// See [`PipelineOrchestrator::process_item`].
    pub async fn process_article(&self, id: &str, table: Option<&str>) -> Result<String, PipelineError> {
        self.pipeline.process_item(id, table).await
    }

    /// Text of an item in the default table.
    ///
    /// # Errors
    ///
    /// See [`PipelineOrchestrator::fetch_text`].
    pub async fn fetch_article_content(&self, id: &str) -> Result<Option<String>, PipelineError> {
        self.pipeline.fetch_text(id).await
    }

    pub async fn generate_search_query(&self, text: &str) -> Option<String> {
        self.pipeline.ranking().generate_query(text).await
    }

    pub async fn validate_image_url(&self, url: &str) -> bool {
        self.pipeline.validator().validate_one(url).await
    }

    pub async fn search_candidates(&self, query: &str, target_count: usize, max_retries: u32) -> Vec<ImageCandidate> {
        self.pipeline.search().search(query, target_count, max_retries).await
    }

    pub async fn select_best_image(
        &self,
        candidates: &[ValidatedCandidate],
        snippet: &str,
        query: &str,
    ) -> Option<SelectedImage> {
        self.pipeline.ranking().select_best(candidates, snippet, query).await
    }

    pub async fn download_image(&self, url: &str, max_retries: u32) -> Option<Vec<u8>> {
        self.pipeline.storage().download(url, max_retries).await
    }

    pub async fn upload_image(&self, bytes: &[u8], path: &str) -> Option<String> {
        self.pipeline.storage().upload(bytes, path).await
    }
}
