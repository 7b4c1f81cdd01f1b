//! What the host's scripts can see of an upload run

use crate::errors::ResultsError;
use std::sync::{Arc, Mutex, MutexGuard};

/// Receives upload notifications on the host's main thread
pub trait UploadListener: Send + Sync {
    /// A crash bundle was accepted, `index` is its position in [`UploadResults`]
    fn on_crash_uploaded(&self, index: usize, response: &str);
    /// The run is over, [`UploadResults::is_done`] now returns true
    fn on_done_uploading(&self);
}

/// Queues work onto the host's main thread
pub trait MainThreadExecutor: Send + Sync {
    fn execute(&self, task: Box<dyn FnOnce() + Send>);
}

/// Runs every task immediately on the calling thread
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineExecutor;

impl MainThreadExecutor for InlineExecutor {
    fn execute(&self, task: Box<dyn FnOnce() + Send>) {
        task();
    }
}

#[derive(Debug, Default)]
struct State {
    responses: Vec<String>,
    done: bool,
}

/// Shared view of the responses collected by an upload run
#[derive(Clone, Debug, Default)]
pub struct UploadResults {
    state: Arc<Mutex<State>>,
}

impl UploadResults {
    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(e) => e.into_inner(),
        }
    }

    /// Number of crashes uploaded so far
    pub fn uploaded_count(&self) -> usize {
        self.lock().responses.len()
    }

    pub fn is_done(&self) -> bool {
        self.lock().done
    }

    /// The server's response for the `index`th uploaded crash
    ///
    /// Only available once the run is done.
    pub fn response(&self, index: usize) -> Result<String, ResultsError> {
        let state = self.lock();
        if !state.done {
            return Err(ResultsError::NotDone);
        }
        state
            .responses
            .get(index)
            .cloned()
            .ok_or(ResultsError::InvalidIndex {
                index,
                count: state.responses.len(),
            })
    }

    pub(crate) fn push(&self, response: String) -> usize {
        let mut state = self.lock();
        state.responses.push(response);
        state.responses.len() - 1
    }

    pub(crate) fn finish(&self) {
        self.lock().done = true;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn responses_need_a_finished_run() {
        let results = UploadResults::default();
        assert_eq!(results.push("CrashID=bp-1".to_owned()), 0);
        assert_eq!(results.push("CrashID=bp-2".to_owned()), 1);
        assert_eq!(results.uploaded_count(), 2);
        assert_eq!(results.response(0), Err(ResultsError::NotDone));

        let view = results.clone();
        results.finish();
        assert!(view.is_done());
        assert_eq!(view.response(1).as_deref(), Ok("CrashID=bp-2"));
        assert_eq!(
            view.response(2),
            Err(ResultsError::InvalidIndex { index: 2, count: 2 })
        );
    }
}
