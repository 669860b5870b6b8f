//! Hierarchical database source.
//!
//! Two authenticated exchanges per cycle:
//!
//! 1. `POST {base}/databases/{id}/query` with `{"page_size": 100}` lists page
//!    summaries (`id`, `created_time`). One page is picked at random.
//! 2. `GET {base}/blocks/{page_id}/children` lists the page's blocks; the
//!    plain text of its paragraph blocks becomes the report.
//!
//! Both requests carry `Authorization: Bearer <credential>` and a fixed
//! `Notion-Version` header.
//!
//! # Configuration
//!
//! ```toml
//! [source]
//! kind = "database"
//! collection_id = "2802f8ddbb294101b52d698c5f37aba9"
//! refresh_interval = 60             # minutes, clamped to [1, 1440]
//! credential_env = "NOTION_TOKEN"
//! ```

use serde_json::json;

use crate::config::{Config, SourceKind};
use crate::cycle::CycleSettings;
use crate::error::{CycleError, CycleResult};
use crate::extract::{extract_paragraphs, page_report, ExtractedReport};
use crate::http::{endpoint_url, RemoteRecordClient};
use crate::sampler::{sample_page, PageRef, RandomSource};
use crate::schedule::IntervalUnit;
use crate::source::RecordSource;
use crate::store::{Arena, BoundedDocumentStore};

/// API version sent with every request.
pub const NOTION_VERSION: &str = "2022-06-28";
/// Page summaries requested per query.
pub const PAGE_SIZE: u32 = 100;

/// A sampled page and the paragraph text fetched for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampledPage {
    pub page: PageRef,
    pub text: String,
}

pub struct DatabaseSource {
    client: RemoteRecordClient,
    base_url: String,
    page_index_capacity: usize,
    blocks_capacity: usize,
}

impl DatabaseSource {
    pub fn from_config(client: RemoteRecordClient, config: &Config) -> Self {
        Self {
            client,
            base_url: config.source.base_url().to_string(),
            page_index_capacity: config.memory.page_index_capacity,
            blocks_capacity: config.memory.blocks_capacity,
        }
    }

    fn auth_headers(settings: &CycleSettings) -> CycleResult<Vec<(&'static str, String)>> {
        let credential = settings.credential.as_deref().ok_or_else(|| {
            CycleError::Configuration("database source requires a credential".to_string())
        })?;
        Ok(vec![
            ("Authorization", format!("Bearer {}", credential)),
            ("Notion-Version", NOTION_VERSION.to_string()),
        ])
    }

    pub fn query_url(&self, database_id: &str) -> CycleResult<String> {
        Ok(endpoint_url(&self.base_url, &["databases", database_id, "query"])?.into())
    }

    pub fn blocks_url(&self, page_id: &str) -> CycleResult<String> {
        Ok(endpoint_url(&self.base_url, &["blocks", page_id, "children"])?.into())
    }

    /// Fetch the block listing of one page and extract its paragraph text.
    fn fetch_page_text(&self, page_id: &str, settings: &CycleSettings, arena: &Arena) -> CycleResult<String> {
        let headers = Self::auth_headers(settings)?;
        tracing::info!(page = page_id, "fetching page content");

        let text = self
            .client
            .get(&self.blocks_url(page_id)?, &headers, self.blocks_capacity)
            .into_success("page content fetch")?;

        let mut blocks = arena.allocate("blocks", self.blocks_capacity);
        let content = extract_paragraphs(blocks.parse(&text)?)?;
        blocks.release();
        Ok(content)
    }
}

impl RecordSource for DatabaseSource {
    type Entry = SampledPage;

    fn kind(&self) -> SourceKind {
        SourceKind::Database
    }

    fn interval_unit(&self) -> IntervalUnit {
        IntervalUnit::Minutes
    }

    fn requires_credential(&self) -> bool {
        true
    }

    fn fetch(&self, settings: &CycleSettings, arena: &Arena) -> CycleResult<BoundedDocumentStore> {
        let headers = Self::auth_headers(settings)?;
        tracing::info!(database = %settings.collection_id, "querying database pages");

        let text = self
            .client
            .post_json(
                &self.query_url(&settings.collection_id)?,
                &headers,
                &json!({ "page_size": PAGE_SIZE }),
                self.page_index_capacity,
            )
            .into_success("database query")?;

        let mut listing = arena.allocate("page_index", self.page_index_capacity);
        listing.parse(&text)?;
        Ok(listing)
    }

    fn sample(
        &self,
        fetched: BoundedDocumentStore,
        settings: &CycleSettings,
        arena: &Arena,
        rng: &mut dyn RandomSource,
    ) -> CycleResult<SampledPage> {
        let page = sample_page(fetched, rng)?;
        let text = self.fetch_page_text(&page.id, settings, arena)?;
        Ok(SampledPage { page, text })
    }

    fn extract(&self, entry: SampledPage) -> ExtractedReport {
        page_report(&entry.page, entry.text)
    }
}
