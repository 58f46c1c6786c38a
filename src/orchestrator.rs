use tracing::debug;

use crate::contract::{Fetched, Flow};
use crate::error::Error;
use crate::pool::WorkerPool;

/// Offsets still to fetch once the discovery page at offset 0 has been consumed.
pub(crate) fn remaining_offsets(batch_size: usize, total_count: usize) -> Vec<usize> {
    (batch_size..total_count).step_by(batch_size).collect()
}

/// Pages through a server-side collection whose size is only known after the first call.
///
/// `fetch(0)` runs synchronously on the calling thread and sizes the run from its
/// `total_count`. The remaining offsets (`batch_size`, `2 * batch_size`, ...) are spread across
/// at most `max_workers` threads. Each fetched page is passed to `consume` on the thread that
/// fetched it, so `consume` must not depend on arrival order.
///
/// The first fetch error, consume error or abort stops the run. Errors are returned
/// unchanged; an abort returns `Ok(())`.
pub fn process_in_concurrent_batches<P, E, F, C>(
    fetch: F,
    consume: C,
    batch_size: usize,
    max_workers: usize,
) -> Result<(), E>
where
    F: Fn(usize) -> Result<Fetched<P>, E> + Sync,
    C: Fn(P, Option<&str>) -> Result<Flow, E> + Sync,
    E: From<Error> + Send,
{
    if batch_size == 0 {
        return Err(Error::InvalidBatchSize.into());
    }
    let pool = WorkerPool::new(max_workers)?;

    let (page, total_count, fingerprint) = fetch(0)?.into_parts();
    if consume(page, fingerprint.as_deref())?.is_break() {
        debug!("batch run aborted on discovery page");
        return Ok(());
    }

    if total_count <= batch_size {
        return Ok(());
    }

    let offsets = remaining_offsets(batch_size, total_count);
    debug!(
        total_count,
        batch_size,
        remaining = offsets.len(),
        workers = pool.max_workers().min(offsets.len()),
        "dispatching remaining batches"
    );

    pool.run(&offsets, |&offset| {
        let fetched = fetch(offset)?;
        consume(fetched.page, fetched.fingerprint.as_deref())
    })
}
