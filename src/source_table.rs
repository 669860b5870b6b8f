//! Flat table source.
//!
//! One `GET {base}/{collection}` returns a JSON array of records. The whole
//! array is parsed into the collection store, one record is re-materialized
//! into the smaller record store, and its scalar fields become the report.
//!
//! # Configuration
//!
//! ```toml
//! [source]
//! kind = "table"
//! collection_id = "0f1d2c3b4a59687766554433221100ff"
//! refresh_interval = 2          # hours, clamped to [1, 24]
//! limit = 50                    # optional, only sent when > 0
//! offset = 0                    # optional, only sent when > 0
//! sort = "Name"                 # optional, sent with `asc`
//! ascending = true
//! exclude_fields = ["Created"]
//! ```

use crate::config::{Config, SourceKind};
use crate::cycle::CycleSettings;
use crate::error::CycleResult;
use crate::extract::{extract_text, record_date, BooleanTokens, ExclusionSet, ExtractedReport};
use crate::http::{endpoint_url, RemoteRecordClient};
use crate::sampler::{sample_record, RandomSource};
use crate::schedule::IntervalUnit;
use crate::source::RecordSource;
use crate::store::{Arena, BoundedDocumentStore};

/// Optional query modifiers for the collection request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableQuery {
    pub limit: u32,
    pub offset: u32,
    pub sort: String,
    pub ascending: bool,
}

/// Build `{base}/{collection}` plus the query modifiers that are set, in the
/// order limit, offset, sort/asc. The collection id and sort key are
/// percent-encoded.
pub fn collection_url(base_url: &str, collection_id: &str, query: &TableQuery) -> CycleResult<String> {
    let mut url = endpoint_url(base_url, &[collection_id])?;
    let mut params: Vec<(&str, String)> = Vec::new();
    if query.limit > 0 {
        params.push(("limit", query.limit.to_string()));
    }
    if query.offset > 0 {
        params.push(("offset", query.offset.to_string()));
    }
    if !query.sort.is_empty() {
        params.push(("sort", query.sort.clone()));
        params.push(("asc", query.ascending.to_string()));
    }
    if !params.is_empty() {
        url.query_pairs_mut().extend_pairs(params);
    }
    Ok(url.into())
}

pub struct TableSource {
    client: RemoteRecordClient,
    base_url: String,
    query: TableQuery,
    collection_capacity: usize,
    record_capacity: usize,
    excluded: ExclusionSet,
    tokens: BooleanTokens,
    date_field: String,
}

impl TableSource {
    pub fn from_config(client: RemoteRecordClient, config: &Config) -> Self {
        let source = &config.source;
        Self {
            client,
            base_url: source.base_url().to_string(),
            query: TableQuery {
                limit: source.limit,
                offset: source.offset,
                sort: source.sort.clone(),
                ascending: source.ascending,
            },
            collection_capacity: config.memory.collection_capacity,
            record_capacity: config.memory.record_capacity,
            excluded: ExclusionSet::new(source.exclude_fields.iter().cloned()),
            tokens: BooleanTokens {
                yes: config.display.true_token.clone(),
                no: config.display.false_token.clone(),
            },
            date_field: source.date_field().to_string(),
        }
    }
}

impl RecordSource for TableSource {
    type Entry = BoundedDocumentStore;

    fn kind(&self) -> SourceKind {
        SourceKind::Table
    }

    fn interval_unit(&self) -> IntervalUnit {
        IntervalUnit::Hours
    }

    fn fetch(&self, settings: &CycleSettings, arena: &Arena) -> CycleResult<BoundedDocumentStore> {
        let url = collection_url(&self.base_url, &settings.collection_id, &self.query)?;
        tracing::info!(collection = %settings.collection_id, "fetching table records");
        tracing::debug!(url = %url, "table request");

        let text = self
            .client
            .get(
                &url,
                &[("Accept", "application/json".to_string())],
                self.collection_capacity,
            )
            .into_success("table fetch")?;

        let mut store = arena.allocate("collection", self.collection_capacity);
        store.parse(&text)?;
        Ok(store)
    }

    fn sample(
        &self,
        fetched: BoundedDocumentStore,
        _settings: &CycleSettings,
        arena: &Arena,
        rng: &mut dyn RandomSource,
    ) -> CycleResult<BoundedDocumentStore> {
        sample_record(fetched, arena, self.record_capacity, rng)
    }

    fn extract(&self, record: BoundedDocumentStore) -> ExtractedReport {
        match record.record() {
            Ok(record) => {
                let created = record_date(record, &self.date_field);
                if created.is_none() {
                    tracing::info!(field = %self.date_field, "record has no creation date");
                }
                ExtractedReport::new(extract_text(record, &self.excluded, &self.tokens), created)
            }
            Err(e) => {
                tracing::warn!(error = %e, "sampled entry is not a record");
                ExtractedReport::new(String::new(), None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_without_params() {
        let url = collection_url("https://x/v1/table/", "abc", &TableQuery::default()).unwrap();
        assert_eq!(url, "https://x/v1/table/abc");
    }

    #[test]
    fn test_url_limit_only() {
        let query = TableQuery {
            limit: 5,
            ..TableQuery::default()
        };
        assert_eq!(collection_url("https://x", "abc", &query).unwrap(), "https://x/abc?limit=5");
    }

    #[test]
    fn test_url_offset_first_when_no_limit() {
        let query = TableQuery {
            offset: 10,
            ..TableQuery::default()
        };
        assert_eq!(collection_url("https://x", "abc", &query).unwrap(), "https://x/abc?offset=10");
    }

    #[test]
    fn test_url_all_params_in_order() {
        let query = TableQuery {
            limit: 5,
            offset: 10,
            sort: "Name".to_string(),
            ascending: false,
        };
        assert_eq!(
            collection_url("https://x", "abc", &query).unwrap(),
            "https://x/abc?limit=5&offset=10&sort=Name&asc=false"
        );
    }

    #[test]
    fn test_url_sort_only() {
        let query = TableQuery {
            sort: "Name".to_string(),
            ascending: true,
            ..TableQuery::default()
        };
        assert_eq!(
            collection_url("https://x", "abc", &query).unwrap(),
            "https://x/abc?sort=Name&asc=true"
        );
    }

    #[test]
    fn test_url_encodes_sort_and_collection() {
        let query = TableQuery {
            limit: 5,
            sort: "Due & Done?#".to_string(),
            ascending: true,
            ..TableQuery::default()
        };
        assert_eq!(
            collection_url("https://x/v1/table", "my list", &query).unwrap(),
            "https://x/v1/table/my%20list?limit=5&sort=Due+%26+Done%3F%23&asc=true"
        );
    }
}
