//! Run state: when a run is complete, and whether it failed.

use crate::error::Error;
use tracing::warn;

/// Where a run is in its lifecycle.
///
/// `Running` becomes `Draining` once every expected result has been observed,
/// or a fatal error has been; `Draining` ends in `Done` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum State {
    Running,
    Draining,
    Done,
    Failed,
}

pub(crate) struct Coordinator {
    expected: u64,
    observed: u64,
    strict: bool,
    state: State,
    failure: Option<Error>,
}

impl Coordinator {
    pub(crate) fn new(expected: u64, strict: bool) -> Self {
        Self {
            expected,
            observed: 0,
            strict,
            state: if expected == 0 { State::Draining } else { State::Running },
            failure: None,
        }
    }

    pub(crate) fn state(&self) -> State {
        self.state
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state == State::Running
    }

    pub(crate) fn observed(&self) -> u64 {
        self.observed
    }

    /// Account for one result, and the error it carried (if any).
    ///
    /// Only the first fatal error is kept. Results observed after the run
    /// stopped running are ignored, so completion happens exactly once.
    pub(crate) fn observe(&mut self, failure: Option<Error>) {
        if !self.is_running() {
            return;
        }
        self.observed += 1;
        if let Some(failure) = failure {
            if self.strict || failure.is_always_fatal() {
                self.fail(failure);
                return;
            }
            warn!(error = ?failure, "Tolerating failed check");
        }
        if self.observed >= self.expected {
            self.state = State::Draining;
        }
    }

    /// Stop the run with `failure`, unless it has already failed.
    pub(crate) fn fail(&mut self, failure: Error) {
        if matches!(self.state, State::Running | State::Draining) && self.failure.is_none() {
            self.failure = Some(failure);
            self.state = State::Draining;
        }
    }

    /// Every producer has finished, whether or not every expected result was
    /// observed.
    pub(crate) fn exhausted(&mut self) {
        if self.is_running() {
            warn!(
                observed = self.observed,
                expected = self.expected,
                "Every record source finished before all expected results were observed"
            );
            self.state = State::Draining;
        }
    }

    /// Leave `Draining`, handing back the retained error if the run failed.
    pub(crate) fn conclude(&mut self) -> Option<Error> {
        let failure = self.failure.take();
        self.state = match failure {
            Some(_) => State::Failed,
            None => State::Done,
        };
        failure
    }
}
