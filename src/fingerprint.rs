use tracing::debug;

use crate::contract::{Fetched, Flow};
use crate::error::Error;
use crate::orchestrator::remaining_offsets;

/// Tracks the fingerprint a paged read is pinned to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FingerprintGuard {
    expected: Option<String>,
}

impl FingerprintGuard {
    /// Pins the guard to the fingerprint of the discovery page.
    pub fn new(initial: Option<String>) -> Self {
        Self { expected: initial }
    }

    /// Precondition to send with the next fetch.
    pub fn expected(&self) -> Option<&str> {
        self.expected.as_deref()
    }

    /// Checks the fingerprint of the page read at `offset` and adopts it.
    ///
    /// A guard without an expected fingerprint accepts anything and starts tracking the
    /// observed value. Once pinned, any difference (including a page that comes back
    /// untracked) is a [`Error::Consistency`].
    pub fn accept(&mut self, offset: usize, observed: Option<&str>) -> Result<(), Error> {
        if self.expected.is_none() {
            self.expected = observed.map(str::to_string);
            return Ok(());
        }
        if self.expected.as_deref() != observed {
            return Err(Error::Consistency {
                offset,
                expected: self.expected.clone(),
                actual: observed.map(str::to_string),
            });
        }
        Ok(())
    }

    pub fn into_inner(self) -> Option<String> {
        self.expected
    }
}

/// Pages through a collection that is not snapshot-isolated, one page at a time.
///
/// The discovery fetch at offset 0 runs without a precondition and pins the run to its
/// fingerprint. Every later fetch receives that fingerprint as `if_match`, and a page that
/// reports a different one ends the run with [`Error::Consistency`] before it is consumed.
/// Because each fetch depends on the previous one, pages are fetched strictly in order.
///
/// Returns the fingerprint the run finished on.
pub fn process_in_consistent_batches<P, E, F, C>(
    mut fetch: F,
    mut consume: C,
    batch_size: usize,
) -> Result<Option<String>, E>
where
    F: FnMut(usize, Option<&str>) -> Result<Fetched<P>, E>,
    C: FnMut(P, Option<&str>) -> Result<Flow, E>,
    E: From<Error>,
{
    if batch_size == 0 {
        return Err(Error::InvalidBatchSize.into());
    }

    let (page, total_count, fingerprint) = fetch(0, None)?.into_parts();
    let mut guard = FingerprintGuard::new(fingerprint);
    if consume(page, guard.expected())?.is_break() {
        debug!("consistent batch run aborted on discovery page");
        return Ok(guard.into_inner());
    }

    let offsets = remaining_offsets(batch_size, total_count);
    debug!(
        total_count,
        batch_size,
        remaining = offsets.len(),
        fingerprint = guard.expected().unwrap_or_default(),
        "paging sequentially with fingerprint checks"
    );

    for offset in offsets {
        let (page, _, fingerprint) = fetch(offset, guard.expected())?.into_parts();
        guard.accept(offset, fingerprint.as_deref())?;
        if consume(page, guard.expected())?.is_break() {
            debug!(offset, "consistent batch run aborted");
            break;
        }
    }

    Ok(guard.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A dimension list whose version can be bumped mid-read.
    struct Versioned {
        len: usize,
        batch_size: usize,
        versions: Vec<(usize, &'static str)>,
        calls: Vec<(usize, Option<String>)>,
    }

    impl Versioned {
        fn new(len: usize, batch_size: usize) -> Self {
            Self {
                len,
                batch_size,
                versions: vec![(0, "v1")],
                calls: Vec::new(),
            }
        }

        /// From `offset` on, pages report `version`.
        fn bump_at(mut self, offset: usize, version: &'static str) -> Self {
            self.versions.push((offset, version));
            self
        }

        fn fetch(
            &mut self,
            offset: usize,
            if_match: Option<&str>,
        ) -> Result<Fetched<Vec<usize>>, Error> {
            self.calls.push((offset, if_match.map(str::to_string)));
            let version = self
                .versions
                .iter()
                .rev()
                .find(|(from, _)| offset >= *from)
                .map(|(_, v)| *v)
                .unwrap_or("");
            let end = (offset + self.batch_size).min(self.len);
            Ok(Fetched::new((offset..end).collect(), self.len).with_fingerprint(version))
        }
    }

    #[test]
    fn stable_resource_reads_every_page_with_precondition() {
        let mut source = Versioned::new(7, 3);
        let mut items = Vec::new();

        let last = process_in_consistent_batches(
            |offset, if_match| source.fetch(offset, if_match),
            |page: Vec<usize>, fingerprint| {
                assert_eq!(fingerprint, Some("v1"));
                items.extend(page);
                Ok(Flow::Continue(()))
            },
            3,
        )
        .unwrap();

        assert_eq!(last.as_deref(), Some("v1"));
        assert_eq!(items, (0..7).collect::<Vec<_>>());
        assert_eq!(
            source.calls,
            [
                (0, None),
                (3, Some("v1".to_string())),
                (6, Some("v1".to_string()))
            ]
        );
    }

    #[test]
    fn changed_fingerprint_stops_the_run() {
        let mut source = Versioned::new(12, 3).bump_at(6, "v2");
        let mut consumed = Vec::new();

        let err = process_in_consistent_batches(
            |offset, if_match| source.fetch(offset, if_match),
            |page: Vec<usize>, _| {
                consumed.push(page[0]);
                Ok(Flow::Continue(()))
            },
            3,
        )
        .unwrap_err();

        assert_eq!(
            err,
            Error::Consistency {
                offset: 6,
                expected: Some("v1".into()),
                actual: Some("v2".into()),
            }
        );
        assert!(err.is_consistency());
        // The mismatching page is never consumed and nothing after it is fetched.
        assert_eq!(consumed, [0, 3]);
        assert_eq!(
            source.calls.iter().map(|(o, _)| *o).collect::<Vec<_>>(),
            [0, 3, 6]
        );
    }

    #[test]
    fn fetch_error_is_returned_unchanged() {
        let err = process_in_consistent_batches(
            |offset, _| {
                if offset == 2 {
                    anyhow::bail!("connection reset");
                }
                Ok(Fetched::new(offset, 6).with_fingerprint("e1"))
            },
            |_, _| Ok(Flow::Continue(())),
            2,
        )
        .unwrap_err();

        assert_eq!(err.to_string(), "connection reset");
        assert!(err.downcast_ref::<Error>().is_none());
    }

    #[test]
    fn consistency_error_survives_anyhow() {
        let err = process_in_consistent_batches(
            |offset, _| {
                let version = if offset == 0 { "e1" } else { "e2" };
                Ok::<_, anyhow::Error>(Fetched::new(offset, 4).with_fingerprint(version))
            },
            |_, _| Ok(Flow::Continue(())),
            2,
        )
        .unwrap_err();

        let err = err.downcast_ref::<Error>().unwrap();
        assert!(err.is_consistency());
    }

    #[test]
    fn abort_stops_without_error() {
        let mut source = Versioned::new(9, 3);
        let mut consumed = 0;

        let last = process_in_consistent_batches(
            |offset, if_match| source.fetch(offset, if_match),
            |_, _| {
                consumed += 1;
                Ok(if consumed == 2 {
                    Flow::Break(())
                } else {
                    Flow::Continue(())
                })
            },
            3,
        )
        .unwrap();

        assert_eq!(last.as_deref(), Some("v1"));
        assert_eq!(consumed, 2);
        assert_eq!(source.calls.len(), 2);
    }

    #[test]
    fn untracked_discovery_adopts_first_fingerprint() {
        let mut guard = FingerprintGuard::new(None);
        assert_eq!(guard.expected(), None);
        guard.accept(3, None).unwrap();
        guard.accept(6, Some("v3")).unwrap();
        assert_eq!(guard.expected(), Some("v3"));
        assert!(guard.accept(9, None).unwrap_err().is_consistency());
    }
}
