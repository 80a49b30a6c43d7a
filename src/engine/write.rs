//! Sample ingestion.

use super::EngineError;
use crate::db::{Datastore, MAX_PUT_BATCH, SAMPLE_KIND};
use crate::sample::Sample;

/// Upserts samples by identity, in batches the store accepts. Any failed
/// batch surfaces immediately; re-writing the same identities is idempotent,
/// so callers simply retry the whole report.
pub fn write_samples(store: &Datastore, samples: &[Sample]) -> Result<(), EngineError> {
    for chunk in samples.chunks(MAX_PUT_BATCH) {
        store
            .put_multi(SAMPLE_KIND, chunk)
            .map_err(EngineError::WriteFailed)?;
    }
    Ok(())
}
