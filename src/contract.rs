use std::ops::ControlFlow;

/// What a page consumer asks the engine to do next.
///
/// `Flow::Continue(())` keeps paging; `Flow::Break(())` is an abort: the run stops
/// dispatching new pages and returns `Ok(())`.
pub type Flow = ControlFlow<()>;

/// One page read from a paged collection, as returned by a page fetcher.
///
/// A fetcher has the shape `Fn(offset: usize) -> Result<Fetched<P>, E>`; the matching
/// consumer has the shape `Fn(P, Option<&str>) -> Result<Flow, E>` and receives the page
/// payload together with its fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched<P> {
    /// Caller-defined payload whose items start at the requested offset.
    pub page: P,
    /// Size of the whole collection as reported by this call.
    ///
    /// Only the value from the discovery fetch (offset 0) sizes a run.
    pub total_count: usize,
    /// Version of the server-side state this page was read from, if tracked.
    pub fingerprint: Option<String>,
}

impl<P> Fetched<P> {
    pub fn new(page: P, total_count: usize) -> Self {
        Self {
            page,
            total_count,
            fingerprint: None,
        }
    }

    /// Attaches a fingerprint. An empty string means "not tracked".
    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        let fingerprint = fingerprint.into();
        self.fingerprint = if fingerprint.is_empty() {
            None
        } else {
            Some(fingerprint)
        };
        self
    }

    pub fn into_parts(self) -> (P, usize, Option<String>) {
        (self.page, self.total_count, self.fingerprint)
    }
}
