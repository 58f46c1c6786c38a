use std::thread;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::contract::Flow;
use crate::error::Error;

/// First outcome that stopped a run.
#[derive(Debug)]
enum Outcome<E> {
    Aborted,
    Failed(E),
}

#[derive(Debug)]
struct Dispatch<E> {
    next: usize,
    outcome: Option<Outcome<E>>,
}

/// Shared by every worker of one [`WorkerPool::run`] call.
///
/// Claiming a job and recording an outcome take the same lock, so once an outcome is recorded
/// no job is handed out.
struct RunState<E> {
    dispatch: Mutex<Dispatch<E>>,
}

impl<E> RunState<E> {
    fn new() -> Self {
        Self {
            dispatch: Mutex::new(Dispatch {
                next: 0,
                outcome: None,
            }),
        }
    }

    /// Claims the next job index, or `None` once stopped or drained.
    fn claim(&self, len: usize) -> Option<usize> {
        let mut dispatch = self.dispatch.lock();
        if dispatch.outcome.is_some() || dispatch.next >= len {
            return None;
        }
        let index = dispatch.next;
        dispatch.next += 1;
        Some(index)
    }

    /// Records `outcome` unless another worker got there first.
    fn record(&self, index: usize, outcome: Outcome<E>) {
        let mut dispatch = self.dispatch.lock();
        if dispatch.outcome.is_none() {
            debug!(
                job = index,
                aborted = matches!(outcome, Outcome::Aborted),
                "stopping batch run"
            );
            dispatch.outcome = Some(outcome);
        } else {
            trace!(job = index, "discarding outcome after run was stopped");
        }
    }

    fn finish(self) -> Result<(), E> {
        match self.dispatch.into_inner().outcome {
            Some(Outcome::Failed(err)) => Err(err),
            Some(Outcome::Aborted) | None => Ok(()),
        }
    }
}

/// Runs a fixed list of jobs on at most `max_workers` scoped threads.
///
/// Workers pull jobs from a shared cursor, so with a single worker the jobs run in slice
/// order. The first job to fail or abort stops dispatch; jobs already running are allowed to
/// finish and their outcomes are dropped. `run` returns only after every worker has exited.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    max_workers: usize,
}

impl WorkerPool {
    pub fn new(max_workers: usize) -> Result<Self, Error> {
        if max_workers == 0 {
            return Err(Error::InvalidWorkerCount);
        }
        Ok(Self { max_workers })
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn run<T, E, W>(&self, jobs: &[T], work: W) -> Result<(), E>
    where
        T: Sync,
        E: Send,
        W: Fn(&T) -> Result<Flow, E> + Sync,
    {
        let workers = self.max_workers.min(jobs.len());
        if workers == 0 {
            return Ok(());
        }

        let state = RunState::new();
        let state_ref = &state;
        let work = &work;

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(move || {
                    while let Some(index) = state_ref.claim(jobs.len()) {
                        match work(&jobs[index]) {
                            Ok(Flow::Continue(())) => {}
                            Ok(Flow::Break(())) => state_ref.record(index, Outcome::Aborted),
                            Err(err) => state_ref.record(index, Outcome::Failed(err)),
                        }
                    }
                });
            }
        });

        state.finish()
    }
}
