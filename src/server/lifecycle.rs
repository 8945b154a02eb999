//! Server-wide lifecycle notifications.
//!
//! A [`ServerLifecycleListener`] is a bag of optional callbacks a [`crate::Server`] invokes
//! at points in its life it can't hand back control through the request/response path:
//! the listener coming up, the server shutting down, or a worker failing to finish
//! accepting/parsing a connection before the application handler ever saw it.

use std::sync::Mutex;

type StartedHook = Box<dyn Fn() + Send + Sync>;
type StoppedHook = Box<dyn Fn() + Send + Sync>;
type FailedHook = Box<dyn Fn(&str) + Send + Sync>;
type ClientFailedHook = Box<dyn Fn(std::net::SocketAddr, &str) + Send + Sync>;

/// Registry of lifecycle callbacks, owned by a [`crate::Server`].
///
/// Each hook is optional; an unset hook is simply never called. Hooks run inline on
/// whichever task observed the event, so they should be quick — spawn a task from inside
/// one if it needs to do real work.
#[derive(Default)]
pub struct ServerLifecycleListener {
    started: Mutex<Option<StartedHook>>,
    stopped: Mutex<Option<StoppedHook>>,
    failed: Mutex<Option<FailedHook>>,
    client_connection_failed: Mutex<Option<ClientFailedHook>>,
}

impl std::fmt::Debug for ServerLifecycleListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerLifecycleListener")
            .finish_non_exhaustive()
    }
}

impl ServerLifecycleListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback fired once the listener is bound and workers are spawned,
    /// immediately before [`crate::Server::launch`] starts accepting connections.
    pub fn on_started<F: Fn() + Send + Sync + 'static>(&self, f: F) {
        *self.started.lock().unwrap() = Some(Box::new(f));
    }

    /// Registers a callback fired once [`crate::Server::stop`] has finished quiescing
    /// in-flight connections and the accept loop has exited.
    pub fn on_stopped<F: Fn() + Send + Sync + 'static>(&self, f: F) {
        *self.stopped.lock().unwrap() = Some(Box::new(f));
    }

    /// Registers a callback fired when the server fails in a way that isn't tied to a
    /// single client connection (e.g. the listener itself erroring out of the accept loop).
    pub fn on_failed<F: Fn(&str) + Send + Sync + 'static>(&self, f: F) {
        *self.failed.lock().unwrap() = Some(Box::new(f));
    }

    /// Registers a callback fired when a connection is torn down before producing a
    /// response (parse error, timeout, I/O error, rejected upgrade).
    pub fn on_client_connection_failed<F>(&self, f: F)
    where
        F: Fn(std::net::SocketAddr, &str) + Send + Sync + 'static,
    {
        *self.client_connection_failed.lock().unwrap() = Some(Box::new(f));
    }

    pub(crate) fn started(&self) {
        if let Some(f) = self.started.lock().unwrap().as_ref() {
            f();
        }
    }

    pub(crate) fn stopped(&self) {
        if let Some(f) = self.stopped.lock().unwrap().as_ref() {
            f();
        }
    }

    pub(crate) fn failed(&self, reason: &str) {
        if let Some(f) = self.failed.lock().unwrap().as_ref() {
            f(reason);
        }
    }

    pub(crate) fn client_connection_failed(&self, addr: std::net::SocketAddr, reason: &str) {
        if let Some(f) = self.client_connection_failed.lock().unwrap().as_ref() {
            f(addr, reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn unset_hooks_are_no_ops() {
        let listener = ServerLifecycleListener::new();
        listener.started();
        listener.stopped();
        listener.failed("boom");
        listener.client_connection_failed("127.0.0.1:1".parse().unwrap(), "boom");
    }

    #[test]
    fn started_hook_runs() {
        let listener = ServerLifecycleListener::new();
        let flag = Arc::new(AtomicBool::new(false));

        let flag2 = flag.clone();
        listener.on_started(move || flag2.store(true, Ordering::SeqCst));

        listener.started();
        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn client_connection_failed_hook_receives_addr_and_reason() {
        let listener = ServerLifecycleListener::new();
        let seen = Arc::new(Mutex::new(None));

        let seen2 = seen.clone();
        listener.on_client_connection_failed(move |addr, reason| {
            *seen2.lock().unwrap() = Some((addr, reason.to_string()));
        });

        let addr = "127.0.0.1:9000".parse().unwrap();
        listener.client_connection_failed(addr, "idle timeout");

        let recorded = seen.lock().unwrap().clone().unwrap();
        assert_eq!(recorded.0, addr);
        assert_eq!(recorded.1, "idle timeout");
    }
}
