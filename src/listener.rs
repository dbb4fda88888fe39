use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::warn;

use crate::frame::Frame;
use crate::hosts::HostSpec;

/// Lifecycle callbacks a connection can report into.
///
/// Every method has a no-op default body, so implementors override only
/// the events they care about. Callbacks run on the calling task and must
/// not block. Delivery is best-effort: the connection invokes each
/// callback through [`notify`], which catches and logs a panicking
/// listener instead of letting it unwind into connection or heartbeat
/// state.
pub trait ConnectionListener: Send + Sync {
    fn on_connecting(&self, _host: &HostSpec) {}
    fn on_connected(&self, _session: Option<&str>) {}
    fn on_connectfail(&self, _host: &HostSpec) {}
    fn on_disconnect(&self) {}
    fn on_subscribe(&self, _headers: &[(String, String)]) {}
    fn on_unsubscribe(&self, _headers: &[(String, String)]) {}
    fn on_publish(&self, _headers: &[(String, String)]) {}
    fn on_receive(&self, _frame: &Frame) {}
    fn on_begin(&self, _transaction: &str) {}
    fn on_commit(&self, _transaction: &str) {}
    fn on_abort(&self, _transaction: &str) {}
    fn on_ack(&self, _headers: &[(String, String)]) {}
    fn on_nack(&self, _headers: &[(String, String)]) {}
    /// A keep-alive byte went out.
    fn on_hbfire(&self) {}
    /// Writing a keep-alive failed.
    fn on_hbwrite_fail(&self) {}
    /// Inbound traffic lapsed past the heartbeat tolerance.
    fn on_hbread_fail(&self) {}
}

/// Invoke one listener callback, suppressing any panic it raises.
///
/// A buggy listener must not take down the operation that fired the
/// event — least of all the heartbeat timer tasks, which would otherwise
/// die silently.
pub(crate) fn notify(callback: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
        warn!("connection listener panicked; event dropped");
    }
}

/// Listener that ignores every event; the default when none is supplied.
pub struct NullListener;

impl ConnectionListener for NullListener {}
