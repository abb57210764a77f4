//! Cache update callbacks.

use gqlsync_cache::{CacheResult, CacheWrite, NormalizedCache};
use gqlsync_protocol::{FetchResult, Value};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

/// A caller-supplied cache patcher, run after a result lands in the cache.
///
/// Runs on every replay, so it must be deterministic given the same cache
/// and result.
pub type UpdateFn = Arc<dyn Fn(&dyn NormalizedCache, &FetchResult) -> CacheResult<()> + Send + Sync>;

/// Writes `data` into the cache, then runs `update` against it.
///
/// Errors and panics raised by `update` are logged and swallowed. Returns
/// an error only if the cache write itself fails.
pub fn apply_result(
    cache: &dyn NormalizedCache,
    data: &Value,
    update: Option<&UpdateFn>,
    label: &str,
) -> CacheResult<()> {
    if !data.is_null() {
        cache.write(CacheWrite::Entities { data: data.clone() })?;
    }

    if let Some(update) = update {
        let result = FetchResult::data(data.clone());
        match catch_unwind(AssertUnwindSafe(|| update(cache, &result))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(mutation = %label, error = %err, "update function failed"),
            Err(_) => warn!(mutation = %label, "update function panicked"),
        }
    }
    Ok(())
}
