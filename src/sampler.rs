//! Uniform random selection of one collection entry.
//!
//! Randomness is injected through [`RandomSource`] so that tests can pin the
//! chosen index. Production code uses [`EntropySource`].

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;

use crate::error::{CycleError, CycleResult};
use crate::store::{Arena, BoundedDocumentStore};

/// Source of uniformly distributed indices.
pub trait RandomSource {
    /// Return an index uniformly drawn from `[0, len)`. `len` is never 0.
    fn pick(&mut self, len: usize) -> usize;
}

/// [`StdRng`]-backed source, seeded from OS entropy by default.
pub struct EntropySource {
    rng: StdRng,
}

impl EntropySource {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for EntropySource {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomSource for EntropySource {
    fn pick(&mut self, len: usize) -> usize {
        self.rng.gen_range(0..len)
    }
}

/// Identifier and creation time of the page chosen from a page listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRef {
    pub id: String,
    pub created_time: Option<String>,
}

fn choose(len: usize, rng: &mut dyn RandomSource) -> CycleResult<usize> {
    if len == 0 {
        return Err(CycleError::EmptyResult);
    }
    let index = rng.pick(len);
    if index >= len {
        return Err(CycleError::Shape(format!(
            "random source returned index {} for {} entries",
            index, len
        )));
    }
    tracing::debug!(index, len, "entry selected");
    Ok(index)
}

/// Pick one element of the collection array and re-materialize it into a
/// fresh store of `record_capacity` bytes.
///
/// The collection store is consumed and released before the record store is
/// allocated, so at most one of the two holds capacity at any time.
///
/// # Errors
///
/// - [`CycleError::Shape`] if the collection root is not an array.
/// - [`CycleError::EmptyResult`] if the array is empty (no record store is
///   allocated).
/// - [`CycleError::ParseOverflow`] if the chosen element does not fit.
pub fn sample_record(
    mut collection: BoundedDocumentStore,
    arena: &Arena,
    record_capacity: usize,
    rng: &mut dyn RandomSource,
) -> CycleResult<BoundedDocumentStore> {
    let chosen = {
        let items = collection
            .root_mut()?
            .as_array_mut()
            .ok_or_else(|| CycleError::Shape("collection response is not an array".to_string()))?;
        let index = choose(items.len(), rng)?;
        tracing::info!(index, total = items.len(), "record sampled");
        items[index].take()
    };
    collection.release();

    let mut record = arena.allocate("record", record_capacity);
    record.adopt(chosen)?;
    Ok(record)
}

/// Pick one page summary from a page listing (`{"results": [...]}`).
///
/// Only the page's identifier and creation time survive; the listing store is
/// released on return.
pub fn sample_page(listing: BoundedDocumentStore, rng: &mut dyn RandomSource) -> CycleResult<PageRef> {
    let results = listing
        .root()?
        .get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| CycleError::Shape("page listing has no results array".to_string()))?;

    let index = choose(results.len(), rng)?;
    tracing::info!(index, total = results.len(), "page sampled");
    let page = &results[index];

    let id = page
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| CycleError::Shape(format!("page {} has no id", index)))?
        .to_string();
    let created_time = page
        .get("created_time")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(PageRef { id, created_time })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RECORD_CAPACITY;

    struct Fixed(usize);

    impl RandomSource for Fixed {
        fn pick(&mut self, _len: usize) -> usize {
            self.0
        }
    }

    fn loaded(arena: &Arena, capacity: usize, text: &str) -> BoundedDocumentStore {
        let mut store = arena.allocate("collection", capacity);
        store.parse(text).unwrap();
        store
    }

    #[test]
    fn test_sample_record_picks_index() {
        let arena = Arena::new();
        let collection = loaded(&arena, 4096, r#"[{"Name":"x"},{"Name":"y"},{"Name":"z"}]"#);
        let record = sample_record(collection, &arena, 1024, &mut Fixed(1)).unwrap();
        assert_eq!(record.record().unwrap()["Name"], "y");
        assert_eq!(record.capacity(), 1024);
    }

    #[test]
    fn test_collection_released_before_record_allocated() {
        let arena = Arena::new();
        let collection = loaded(&arena, 4096, r#"[{"Name":"x"}]"#);
        let record = sample_record(collection, &arena, 1024, &mut Fixed(0)).unwrap();
        assert_eq!(arena.live_bytes(), 1024);
        assert_eq!(arena.peak_bytes(), 4096);
        drop(record);
        assert_eq!(arena.live_bytes(), 0);
    }

    #[test]
    fn test_empty_collection_allocates_nothing() {
        let arena = Arena::new();
        let collection = loaded(&arena, 4096, "[]");
        let err = sample_record(collection, &arena, RECORD_CAPACITY, &mut Fixed(0)).unwrap_err();
        assert_eq!(err, CycleError::EmptyResult);
        assert_eq!(arena.allocations(), 1);
        assert_eq!(arena.live_bytes(), 0);
    }

    #[test]
    fn test_non_array_is_shape_error() {
        let arena = Arena::new();
        let collection = loaded(&arena, 4096, r#"{"error":"500"}"#);
        let err = sample_record(collection, &arena, 1024, &mut Fixed(0)).unwrap_err();
        assert!(matches!(err, CycleError::Shape(_)));
    }

    #[test]
    fn test_out_of_range_source_is_rejected() {
        let arena = Arena::new();
        let collection = loaded(&arena, 4096, r#"[{"a":1}]"#);
        let err = sample_record(collection, &arena, 1024, &mut Fixed(3)).unwrap_err();
        assert!(matches!(err, CycleError::Shape(_)));
    }

    #[test]
    fn test_record_overflow_after_collection_release() {
        let arena = Arena::new();
        let big = "v".repeat(500);
        let collection = loaded(&arena, 4096, &format!(r#"[{{"Name":"{}"}}]"#, big));
        let err = sample_record(collection, &arena, 128, &mut Fixed(0)).unwrap_err();
        assert!(matches!(err, CycleError::ParseOverflow { capacity: 128, .. }));
        assert_eq!(arena.peak_bytes(), 4096);
        assert_eq!(arena.live_bytes(), 0);
    }

    #[test]
    fn test_entropy_source_in_range_and_uniform() {
        let mut rng = EntropySource::seeded(7);
        let len = 5;
        let draws = 50_000;
        let mut counts = vec![0usize; len];
        for _ in 0..draws {
            let i = rng.pick(len);
            assert!(i < len);
            counts[i] += 1;
        }
        // Chi-squared against uniform, 4 degrees of freedom; p = 0.001 critical value is 18.47.
        let expected = draws as f64 / len as f64;
        let chi2: f64 = counts
            .iter()
            .map(|&c| {
                let d = c as f64 - expected;
                d * d / expected
            })
            .sum();
        assert!(chi2 < 18.47, "chi2 = {}, counts = {:?}", chi2, counts);
    }

    #[test]
    fn test_sample_page() {
        let arena = Arena::new();
        let listing = loaded(
            &arena,
            4096,
            r#"{"results":[{"id":"p1","created_time":"2024-01-01T00:00:00.000Z"},{"id":"p2","created_time":"2024-03-04T10:00:00.000Z"}]}"#,
        );
        let page = sample_page(listing, &mut Fixed(1)).unwrap();
        assert_eq!(page.id, "p2");
        assert_eq!(page.created_time.as_deref(), Some("2024-03-04T10:00:00.000Z"));
        assert_eq!(arena.live_bytes(), 0);
    }

    #[test]
    fn test_sample_page_empty_and_missing_results() {
        let arena = Arena::new();
        let listing = loaded(&arena, 4096, r#"{"results":[]}"#);
        assert_eq!(sample_page(listing, &mut Fixed(0)).unwrap_err(), CycleError::EmptyResult);

        let listing = loaded(&arena, 4096, r#"{"object":"error"}"#);
        assert!(matches!(
            sample_page(listing, &mut Fixed(0)).unwrap_err(),
            CycleError::Shape(_)
        ));
    }

    #[test]
    fn test_sample_page_without_id() {
        let arena = Arena::new();
        let listing = loaded(&arena, 4096, r#"{"results":[{"created_time":"2024"}]}"#);
        assert!(matches!(
            sample_page(listing, &mut Fixed(0)).unwrap_err(),
            CycleError::Shape(_)
        ));
    }
}
