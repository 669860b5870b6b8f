//! The record-source abstraction shared by both remote shapes.
//!
//! A [`RecordSource`] supplies the three data-dependent phases of a duty
//! cycle: fetch (one exchange, parsed into a bounded store), sample (pick one
//! entry, possibly with a second exchange) and extract (turn the entry into an
//! [`ExtractedReport`]). The scheduler drives the phases and never looks at
//! the remote shape itself.
//!
//! | Kind | Implementation | Entry | Interval unit |
//! |------|----------------|-------|---------------|
//! | `table` | [`TableSource`](crate::source_table::TableSource) | record store | hours |
//! | `database` | [`DatabaseSource`](crate::source_database::DatabaseSource) | [`SampledPage`](crate::source_database::SampledPage) | minutes |

use crate::config::SourceKind;
use crate::cycle::CycleSettings;
use crate::error::CycleResult;
use crate::extract::ExtractedReport;
use crate::sampler::RandomSource;
use crate::schedule::IntervalUnit;
use crate::store::{Arena, BoundedDocumentStore};

pub trait RecordSource {
    /// What sampling hands to extraction.
    type Entry;

    fn kind(&self) -> SourceKind;

    fn interval_unit(&self) -> IntervalUnit;

    /// Whether a cycle must be refused without a credential.
    fn requires_credential(&self) -> bool {
        false
    }

    /// Perform the first exchange and parse its body into a store from
    /// `arena`.
    fn fetch(&self, settings: &CycleSettings, arena: &Arena) -> CycleResult<BoundedDocumentStore>;

    /// Choose one entry from the fetched document. Consumes the fetched store.
    fn sample(
        &self,
        fetched: BoundedDocumentStore,
        settings: &CycleSettings,
        arena: &Arena,
        rng: &mut dyn RandomSource,
    ) -> CycleResult<Self::Entry>;

    /// Format the chosen entry. Never fails; missing pieces become
    /// placeholders.
    fn extract(&self, entry: Self::Entry) -> ExtractedReport;
}
