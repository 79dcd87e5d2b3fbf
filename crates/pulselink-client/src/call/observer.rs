use std::sync::Arc;

use pulselink_core::error::PulseError;
use pulselink_core::protocol::{CallId, CallMedia};

use super::platform::MediaStream;
use super::state::{CallRole, CallState};

/// Identity of a call as shown to the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallInfo {
    pub call_id: CallId,
    pub remote_user_id: String,
    pub role: CallRole,
    pub media: CallMedia,
}

/// UI binding for call events. Invoked from the controller while it holds
/// the session, so implementations must not block.
pub trait CallObserver: Send + Sync {
    /// Every lifecycle transition.
    fn on_state_change(&self, _call: &CallInfo, _state: CallState) {}

    /// An offer arrived and is ringing; answer with `accept_incoming` or `decline`.
    fn on_incoming_call(&self, _call: &CallInfo) {}

    /// Once per call, after local media is acquired.
    fn on_local_stream(&self, _call: &CallInfo, _stream: &Arc<dyn MediaStream>) {}

    /// Once per inbound track set.
    fn on_remote_stream(&self, _call: &CallInfo, _stream: &Arc<dyn MediaStream>) {}

    /// Unrecoverable fault for the call. Reported once, right after the
    /// transition to `Failed`.
    fn on_error(&self, _call: &CallInfo, _error: &PulseError) {}
}

pub struct NoopObserver;

impl CallObserver for NoopObserver {}
