use crate::error::Error;

use std::fmt::Display;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            State::Stopped => f.pad("STOPPED"),
            State::Starting => f.pad("STARTING"),
            State::Running => f.pad("RUNNING"),
            State::Stopping => f.pad("STOPPING"),
            State::Failed => f.pad("FAILED"),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: State,
    last_error: Option<Error>,
}

/// Lifecycle state shared between an instance and its worker thread
#[derive(Clone, Debug)]
pub struct Status {
    inner: Arc<Mutex<Inner>>,
}

impl Default for Status {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: State::Stopped,
                last_error: None,
            })),
        }
    }
}

impl Status {
    pub fn state(&self) -> State {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).state
    }

    pub fn last_error(&self) -> Option<Error> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_error
            .clone()
    }

    /// Enter `Running` once bound, a stop that began meanwhile keeps `Stopping`
    pub fn running(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.state == State::Starting {
            inner.state = State::Running;
        }
    }

    /// Enter `Starting` and forget the error of a previous run
    pub fn starting(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.state = State::Starting;
        inner.last_error = None;
    }

    /// Enter `Stopping` unless the worker already failed
    pub fn stopping(&self) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.state == State::Failed {
            return false;
        }
        inner.state = State::Stopping;
        true
    }

    /// Enter `Stopped` and clear the error, a failure reported meanwhile is kept
    pub fn stopped(&self) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.state == State::Failed {
            return false;
        }
        inner.state = State::Stopped;
        inner.last_error = None;
        true
    }

    pub fn fail(&self, error: Error) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.state = State::Failed;
        inner.last_error = Some(error);
    }
}
