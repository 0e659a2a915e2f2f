//! dsv: distributed system variables.
//!
//! A single broker process owns the authoritative store of named, typed
//! variables; producer processes publish values under hierarchical names
//! and consumers read or subscribe to changes through [`DsvClient`]. The
//! broker offers typed create/get/set, fuzzy name lookup, int-array element
//! mutations, a last-value cache for late subscribers, optional persistence,
//! and LAN-wide server autodiscovery.

pub mod batch;
pub mod broker;
pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod name;
pub mod registry;
pub mod store;
pub mod value;
pub mod wire;

// Re-export the types most callers need
pub use client::{DsvClient, FuzzyMatch, NewDsv, Notification, Scalar};
pub use config::DsvConfig;
pub use error::{DsvError, Result};
pub use registry::{Entry, Flags, Registry};
pub use value::{DsvType, Value};
pub use wire::{Handle, Opcode};
