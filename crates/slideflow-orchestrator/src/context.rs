//! Shared execution context handoff.
//!
//! An execution context is created on the interactive thread (sharing resources
//! with the rendering surface), moved to exactly one worker, made current
//! there, released, and moved back before it is disposed. The protocol is
//! encoded in two types:
//!
//! - [`ContextHandle`]: released, transferable (`Send`), current nowhere.
//! - [`CurrentContext`]: current on the thread that acquired it; `!Send`, so it
//!   cannot leave that thread without going through [`CurrentContext::release`].
//!
//! Ownership is moved, never shared, so the interactive thread cannot touch the
//! context while a worker holds it.

use crate::error::ContextError;
use std::fmt;
use std::marker::PhantomData;
use std::thread::{self, ThreadId};
use tracing::{debug, warn};

/// A graphics/compute context that can be made current on one thread at a time.
pub trait ExecutionContext: Send {
    /// Whether creation produced a usable context.
    fn is_valid(&self) -> bool;

    /// Whether the context shares resources with the rendering surface.
    fn is_sharing(&self) -> bool;

    /// Binds the context to the calling thread.
    fn make_current(&mut self) -> Result<(), ContextError>;

    /// Unbinds the context from the calling thread.
    fn done_current(&mut self);
}

/// Creates contexts that share resources with the interactive surface.
pub trait ContextFactory: Send + Sync {
    fn create_shared(&self) -> Result<Box<dyn ExecutionContext>, ContextError>;
}

/// A released execution context that may be moved to another thread.
pub struct ContextHandle {
    context: Box<dyn ExecutionContext>,
}

impl fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextHandle").finish_non_exhaustive()
    }
}

impl ContextHandle {
    /// Creates a shared context on the calling (interactive) thread.
    ///
    /// The context is made current once and released again before it is
    /// returned, so the first acquisition on the worker sees an initialized
    /// context.
    ///
    /// # Errors
    /// Returns an error if the factory fails, or the context is invalid or not
    /// sharing with the surface. No run may start in that case.
    pub fn create(factory: &dyn ContextFactory) -> Result<Self, ContextError> {
        let mut context = factory.create_shared()?;

        if !context.is_valid() {
            return Err(ContextError::Invalid);
        }
        if !context.is_sharing() {
            return Err(ContextError::NotSharing);
        }

        context.make_current()?;
        context.done_current();

        debug!(thread = ?thread::current().id(), "Execution context created");
        Ok(Self { context })
    }

    /// Makes the context current on the calling thread.
    ///
    /// # Errors
    /// On failure the still-released handle is returned alongside the error so
    /// it can travel back to its owner.
    pub fn acquire(mut self) -> Result<CurrentContext, (Self, ContextError)> {
        match self.context.make_current() {
            Ok(()) => {
                let thread = thread::current().id();
                debug!(thread = ?thread, "Execution context acquired");
                Ok(CurrentContext { context: Some(self.context), thread, _not_send: PhantomData })
            }
            Err(e) => Err((self, e)),
        }
    }

    /// Destroys the context. Must only be called by the interactive thread once
    /// no worker can reach it anymore.
    pub fn dispose(self) {
        debug!(thread = ?thread::current().id(), "Execution context disposed");
    }
}

/// An execution context that is current on exactly one thread.
pub struct CurrentContext {
    context: Option<Box<dyn ExecutionContext>>,
    thread: ThreadId,
    _not_send: PhantomData<*const ()>,
}

impl fmt::Debug for CurrentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CurrentContext").field("thread", &self.thread).finish_non_exhaustive()
    }
}

impl CurrentContext {
    /// Thread the context is current on.
    #[must_use]
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// Releases the context so it can be handed back.
    #[must_use]
    pub fn release(mut self) -> ContextHandle {
        let mut context = self.context.take().unwrap_or_else(|| unreachable!("context released twice"));
        context.done_current();
        debug!(thread = ?self.thread, "Execution context released");
        ContextHandle { context }
    }
}

impl Drop for CurrentContext {
    fn drop(&mut self) {
        if let Some(mut context) = self.context.take() {
            warn!(thread = ?self.thread, "Execution context dropped while current");
            context.done_current();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Calls {
        current_on: Vec<ThreadId>,
        done: usize,
    }

    struct RecordingContext {
        calls: Arc<Mutex<Calls>>,
        valid: bool,
        sharing: bool,
    }

    impl ExecutionContext for RecordingContext {
        fn is_valid(&self) -> bool {
            self.valid
        }

        fn is_sharing(&self) -> bool {
            self.sharing
        }

        fn make_current(&mut self) -> Result<(), ContextError> {
            self.calls.lock().unwrap().current_on.push(thread::current().id());
            Ok(())
        }

        fn done_current(&mut self) {
            self.calls.lock().unwrap().done += 1;
        }
    }

    struct Factory {
        calls: Arc<Mutex<Calls>>,
        valid: bool,
        sharing: bool,
    }

    impl ContextFactory for Factory {
        fn create_shared(&self) -> Result<Box<dyn ExecutionContext>, ContextError> {
            Ok(Box::new(RecordingContext {
                calls: Arc::clone(&self.calls),
                valid: self.valid,
                sharing: self.sharing,
            }))
        }
    }

    fn factory(valid: bool, sharing: bool) -> (Factory, Arc<Mutex<Calls>>) {
        let calls = Arc::new(Mutex::new(Calls::default()));
        (Factory { calls: Arc::clone(&calls), valid, sharing }, calls)
    }

    #[test]
    fn test_handoff_to_worker_thread() {
        let (factory, calls) = factory(true, true);
        let handle = ContextHandle::create(&factory).unwrap();

        let worker = thread::spawn(move || {
            let current = handle.acquire().unwrap();
            assert_eq!(current.thread(), thread::current().id());
            (thread::current().id(), current.release())
        });
        let (worker_id, handle) = worker.join().unwrap();
        handle.dispose();

        let calls = calls.lock().unwrap();
        assert_eq!(calls.current_on, vec![thread::current().id(), worker_id]);
        assert_eq!(calls.done, 2);
    }

    #[test]
    fn test_invalid_context_rejected() {
        let (factory, _) = factory(false, true);
        assert_eq!(ContextHandle::create(&factory).unwrap_err(), ContextError::Invalid);
    }

    #[test]
    fn test_non_sharing_context_rejected() {
        let (factory, _) = factory(true, false);
        assert_eq!(ContextHandle::create(&factory).unwrap_err(), ContextError::NotSharing);
    }

    #[test]
    fn test_drop_while_current_releases() {
        let (factory, calls) = factory(true, true);
        let current = ContextHandle::create(&factory).unwrap().acquire().unwrap();
        drop(current);
        assert_eq!(calls.lock().unwrap().done, 2);
    }
}
