//! Process-wide registry of persistence prefixes.
//!
//! Two clients sharing a prefix would overwrite each other's persisted
//! state, so each prefix may be claimed once per process. Claims are never
//! released.

use crate::error::{CacheError, CacheResult};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::debug;

static PREFIXES: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();

fn prefixes() -> &'static Mutex<HashSet<String>> {
    PREFIXES.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Claims a prefix for this process.
///
/// # Errors
///
/// Returns `DuplicatePrefix` if the prefix was already claimed.
pub fn register_prefix(prefix: &str) -> CacheResult<()> {
    if !prefixes().lock().insert(prefix.to_string()) {
        return Err(CacheError::DuplicatePrefix(prefix.to_string()));
    }
    debug!(prefix, "registered persistence prefix");
    Ok(())
}

/// Returns true if the prefix has been claimed.
pub fn is_prefix_registered(prefix: &str) -> bool {
    prefixes().lock().contains(prefix)
}
