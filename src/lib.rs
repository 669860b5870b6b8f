//! # Random Record Frame
//!
//! Drives a battery-powered display that shows one random record from a
//! remote collection per wake.
//!
//! Each wake runs one duty cycle: fetch the collection over HTTP, parse it
//! into a fixed-capacity store, pick one entry uniformly at random and
//! re-materialize it into a smaller store, format its fields as text, hand
//! the text to the display and schedule the next wake.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌─────────────┐   ┌───────────┐   ┌───────────┐
//! │ RecordSrc  │──▶│ Bounded     │──▶│  Sampler  │──▶│ Extractor │
//! │ table / db │   │ store (16K) │   │ → 8K store│   │  → text   │
//! └────────────┘   └─────────────┘   └───────────┘   └─────┬─────┘
//!       ▲                                                  ▼
//!       │            ┌──────────────────────┐        ┌──────────┐
//!       └────────────│  DutyCycleScheduler  │◀──────▶│  Device  │
//!                    │  + ScheduleState     │        │ (render) │
//!                    └──────────────────────┘        └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! frame run                     # one wake: fetch, render, schedule
//! frame watch --cycles 3        # keep cycling in-process
//! frame sample                  # print one random record
//! frame state show              # inspect persisted schedule state
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and the `ConfigSource` lookup |
//! | [`error`] | Cycle failure taxonomy |
//! | [`store`] | Fixed-capacity document stores and their arena |
//! | [`http`] | Blocking HTTP exchange |
//! | [`source`] | `RecordSource` abstraction |
//! | [`source_table`] | Flat table source |
//! | [`source_database`] | Hierarchical database source |
//! | [`sampler`] | Uniform random selection |
//! | [`extract`] | Record → text |
//! | [`schedule`] | Persisted schedule state and refresh policy |
//! | [`cycle`] | Duty-cycle scheduler and app lifecycle |
//! | [`console`] | Console display device |

pub mod config;
pub mod console;
pub mod cycle;
pub mod error;
pub mod extract;
pub mod http;
pub mod sampler;
pub mod schedule;
pub mod source;
pub mod source_database;
pub mod source_table;
pub mod store;
