//! Fixed-capacity document stores.
//!
//! A [`BoundedDocumentStore`] turns JSON text into a navigable
//! [`serde_json::Value`] tree without ever growing past the byte capacity it
//! was created with. Capacity is charged *while* deserializing, so an
//! oversized response fails with [`CycleError::ParseOverflow`] as soon as the
//! budget is crossed instead of after the whole tree has been built.
//!
//! # Accounting
//!
//! | Item | Cost |
//! |------|------|
//! | any value node | [`SLOT_BYTES`] |
//! | string value | + UTF-8 length + 1 |
//! | object key | UTF-8 length + 1 |
//!
//! The source text itself must also fit: text longer than the capacity is
//! refused before parsing starts.
//!
//! Stores are handed out by an [`Arena`], which tracks how many bytes of
//! capacity are reserved at any moment. Dropping (or [`release`]-ing) a store
//! returns its capacity to the arena.
//!
//! [`release`]: BoundedDocumentStore::release

use serde::de::{self, DeserializeSeed, MapAccess, SeqAccess, Visitor};
use serde_json::{Map, Number, Value};
use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{CycleError, CycleResult};

/// Cost of one value node.
pub const SLOT_BYTES: usize = 16;

/// Store size for a whole collection fetch.
pub const COLLECTION_CAPACITY: usize = 16 * 1024;
/// Store size for a single re-materialized record.
pub const RECORD_CAPACITY: usize = 8 * 1024;
/// Store size for the page-summary listing of the hierarchical source.
pub const PAGE_INDEX_CAPACITY: usize = 16 * 1024;
/// Store size for the block listing of one page.
pub const BLOCKS_CAPACITY: usize = 8 * 1024;

// ═══════════════════════════════════════════════════════════════════════
// Arena
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct ArenaCounters {
    live: AtomicUsize,
    peak: AtomicUsize,
    allocations: AtomicUsize,
}

/// Hands out stores and keeps the books on reserved capacity.
///
/// Cloning an arena shares its counters.
#[derive(Debug, Clone, Default)]
pub struct Arena {
    counters: Arc<ArenaCounters>,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a new, empty store of `capacity` bytes.
    pub fn allocate(&self, label: &'static str, capacity: usize) -> BoundedDocumentStore {
        let live = self.counters.live.fetch_add(capacity, Ordering::SeqCst) + capacity;
        self.counters.peak.fetch_max(live, Ordering::SeqCst);
        self.counters.allocations.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(store = label, capacity, live, "store allocated");

        BoundedDocumentStore {
            label,
            capacity,
            used: 0,
            state: StoreState::Empty,
            arena: self.clone(),
        }
    }

    /// Capacity currently reserved by live stores.
    pub fn live_bytes(&self) -> usize {
        self.counters.live.load(Ordering::SeqCst)
    }

    /// Highest value [`live_bytes`](Arena::live_bytes) has reached.
    pub fn peak_bytes(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }

    /// Number of stores ever allocated from this arena.
    pub fn allocations(&self) -> usize {
        self.counters.allocations.load(Ordering::SeqCst)
    }

    fn give_back(&self, label: &'static str, capacity: usize) {
        let live = self.counters.live.fetch_sub(capacity, Ordering::SeqCst) - capacity;
        tracing::debug!(store = label, capacity, live, "store released");
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Store
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug)]
enum StoreState {
    Empty,
    Loaded(Value),
    /// A parse or adopt failed; the contents must not be read.
    Poisoned,
}

/// A parse buffer with a fixed byte capacity. Never resized.
#[derive(Debug)]
pub struct BoundedDocumentStore {
    label: &'static str,
    capacity: usize,
    used: usize,
    state: StoreState,
    arena: Arena,
}

impl BoundedDocumentStore {
    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes charged by the current contents.
    pub fn used(&self) -> usize {
        self.used
    }

    /// Parse `text` into this store, replacing any previous contents.
    ///
    /// # Errors
    ///
    /// - [`CycleError::ParseOverflow`] if the text or the tree would exceed
    ///   capacity.
    /// - [`CycleError::ParseSyntax`] if `text` is not a single JSON value.
    ///
    /// On either error the store is poisoned until the next successful parse.
    pub fn parse(&mut self, text: &str) -> CycleResult<&Value> {
        self.state = StoreState::Empty;
        self.used = 0;

        if text.len() > self.capacity {
            self.state = StoreState::Poisoned;
            return Err(CycleError::ParseOverflow {
                capacity: self.capacity,
                required: text.len(),
            });
        }

        let budget = Budget::new(self.capacity);
        let mut deserializer = serde_json::Deserializer::from_str(text);
        let parsed = BudgetedValue(&budget)
            .deserialize(&mut deserializer)
            .and_then(|value| deserializer.end().map(|_| value));

        match parsed {
            Ok(value) => {
                self.used = budget.used.get();
                tracing::debug!(
                    store = self.label,
                    used = self.used,
                    capacity = self.capacity,
                    "document parsed"
                );
                self.state = StoreState::Loaded(value);
                self.root()
            }
            Err(_) if budget.overflowed.get() => {
                self.state = StoreState::Poisoned;
                Err(CycleError::ParseOverflow {
                    capacity: self.capacity,
                    required: budget.used.get(),
                })
            }
            Err(e) => {
                self.state = StoreState::Poisoned;
                Err(CycleError::ParseSyntax(e.to_string()))
            }
        }
    }

    /// Move an already-parsed value into this store, charging its footprint.
    ///
    /// Used to re-materialize one element of a larger document after the
    /// larger store has been released.
    pub fn adopt(&mut self, value: Value) -> CycleResult<&Value> {
        let required = footprint(&value);
        if required > self.capacity {
            self.state = StoreState::Poisoned;
            self.used = 0;
            return Err(CycleError::ParseOverflow {
                capacity: self.capacity,
                required,
            });
        }
        self.used = required;
        self.state = StoreState::Loaded(value);
        self.root()
    }

    /// The parsed root value.
    pub fn root(&self) -> CycleResult<&Value> {
        match &self.state {
            StoreState::Loaded(value) => Ok(value),
            StoreState::Empty => Err(CycleError::Shape(format!("{} store is empty", self.label))),
            StoreState::Poisoned => Err(CycleError::Shape(format!(
                "{} store is unusable after a failed parse",
                self.label
            ))),
        }
    }

    pub fn root_mut(&mut self) -> CycleResult<&mut Value> {
        let label = self.label;
        match &mut self.state {
            StoreState::Loaded(value) => Ok(value),
            StoreState::Empty => Err(CycleError::Shape(format!("{} store is empty", label))),
            StoreState::Poisoned => Err(CycleError::Shape(format!(
                "{} store is unusable after a failed parse",
                label
            ))),
        }
    }

    /// The root as a record (JSON object).
    pub fn record(&self) -> CycleResult<&Map<String, Value>> {
        self.root()?
            .as_object()
            .ok_or_else(|| CycleError::Shape(format!("{} store does not hold an object", self.label)))
    }

    /// Release the store's capacity back to its arena.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for BoundedDocumentStore {
    fn drop(&mut self) {
        self.arena.give_back(self.label, self.capacity);
    }
}

/// Bytes a value would be charged when stored.
pub fn footprint(value: &Value) -> usize {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) => SLOT_BYTES,
        Value::String(s) => SLOT_BYTES + s.len() + 1,
        Value::Array(items) => SLOT_BYTES + items.iter().map(footprint).sum::<usize>(),
        Value::Object(map) => {
            SLOT_BYTES
                + map
                    .iter()
                    .map(|(k, v)| k.len() + 1 + footprint(v))
                    .sum::<usize>()
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Budgeted deserialization
// ═══════════════════════════════════════════════════════════════════════

struct Budget {
    capacity: usize,
    used: Cell<usize>,
    overflowed: Cell<bool>,
}

impl Budget {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            used: Cell::new(0),
            overflowed: Cell::new(false),
        }
    }

    fn charge<E: de::Error>(&self, bytes: usize) -> Result<(), E> {
        let used = self.used.get() + bytes;
        self.used.set(used);
        if used > self.capacity {
            self.overflowed.set(true);
            return Err(E::custom("document exceeds store capacity"));
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
struct BudgetedValue<'a>(&'a Budget);

impl<'de> DeserializeSeed<'de> for BudgetedValue<'_> {
    type Value = Value;

    fn deserialize<D>(self, deserializer: D) -> Result<Value, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        deserializer.deserialize_any(self)
    }
}

impl<'de> Visitor<'de> for BudgetedValue<'_> {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("any JSON value")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        self.0.charge(SLOT_BYTES)?;
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        self.0.charge(SLOT_BYTES)?;
        Ok(Value::Number(v.into()))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        self.0.charge(SLOT_BYTES)?;
        Ok(Value::Number(v.into()))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        self.0.charge(SLOT_BYTES)?;
        Ok(Number::from_f64(v).map_or(Value::Null, Value::Number))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        self.0.charge(SLOT_BYTES + v.len() + 1)?;
        Ok(Value::String(v.to_owned()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
        self.0.charge(SLOT_BYTES + v.len() + 1)?;
        Ok(Value::String(v))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        self.0.charge(SLOT_BYTES)?;
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        self.visit_unit()
    }

    fn visit_some<D>(self, deserializer: D) -> Result<Value, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        self.deserialize(deserializer)
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        self.0.charge(SLOT_BYTES)?;
        let mut items = Vec::new();
        while let Some(item) = seq.next_element_seed(self)? {
            items.push(item);
        }
        Ok(Value::Array(items))
    }

    fn visit_map<A>(self, mut map: A) -> Result<Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        self.0.charge(SLOT_BYTES)?;
        let mut object = Map::new();
        while let Some(key) = map.next_key::<String>()? {
            self.0.charge(key.len() + 1)?;
            let value = map.next_value_seed(self)?;
            object.insert(key, value);
        }
        Ok(Value::Object(object))
    }
}
