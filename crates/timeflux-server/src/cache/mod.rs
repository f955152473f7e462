//! In-process caches: reference data snapshots, enabled rules and webhook
//! delivery dedupe.

mod dedupe;
mod reference;
mod rules;

pub use dedupe::{DedupeCache, dedupe_key};
pub use reference::{ReferenceCache, SnapshotCounts, WorkspaceSnapshot};
pub use rules::RulesCache;
