//! Completion signal for isochronous fragment transfers

use super::session::StreamSession;
use std::sync::Arc;

/// Handle given to the endpoint's completion context
///
/// Calling it never blocks, never allocates and tolerates spurious or
/// duplicate invocation: only a transfer the pump marked outstanding is
/// moved out of the busy state.
#[derive(Debug, Clone)]
pub struct CompletionSignal {
    session: Arc<StreamSession>,
}

impl CompletionSignal {
    pub fn new(session: Arc<StreamSession>) -> Self {
        Self { session }
    }

    /// The outstanding fragment was delivered
    ///
    /// Returns false if no transfer was outstanding.
    pub fn complete(&self) -> bool {
        self.session.finish_transfer(true)
    }

    /// The outstanding fragment failed; the pump abandons the rest of the frame
    pub fn fail(&self) -> bool {
        self.session.finish_transfer(false)
    }
}
