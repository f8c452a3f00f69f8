use crate::connection::Connection;
use crate::context::CachingContext;
use crate::{Error, Result};
use fauna_core::Payload;
use serde::Serialize;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::rc::Rc;
use tracing::debug;

thread_local! {
    static CONTEXTS: RefCell<Vec<Entry>> = const { RefCell::new(Vec::new()) };
    static NEXT_ID: Cell<u64> = const { Cell::new(0) };
}

struct Entry {
    id: u64,
    context: Rc<RefCell<CachingContext>>,
}

/// Ambient, nestable sessions over the calling thread's context stack
///
/// Operations route to the innermost context entered on the current thread.
/// Other threads have their own, independent stacks.
pub struct Client;

/// Keeps a context on the stack; dropping it pops the context
///
/// Not `Send`: a guard is always released on the thread that pushed it.
#[must_use = "the context is popped as soon as the guard is dropped"]
pub struct ContextGuard {
    id: u64,
    depth: usize,
    _thread_bound: PhantomData<Rc<()>>,
}

impl ContextGuard {
    /// Stack depth this guard's context sat at when pushed (1 = outermost).
    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        // Pops this guard's context and anything still nested above it. A
        // context already released through an outer guard is left alone.
        // The thread-local may already be gone during thread teardown.
        let _ = CONTEXTS.try_with(|stack| {
            if let Ok(mut stack) = stack.try_borrow_mut() {
                if let Some(position) = stack.iter().position(|entry| entry.id == self.id) {
                    stack.truncate(position);
                }
            }
        });
        debug!(depth = self.depth, "Exited context");
    }
}

impl Client {
    /// Run `block` inside a fresh context bound to `connection`.
    ///
    /// The context is popped when `block` returns or unwinds.
    pub fn context<F, R>(connection: Connection, block: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = Self::push_context(connection);
        block()
    }

    /// Push a fresh context and return the guard that pops it.
    pub fn push_context(connection: Connection) -> ContextGuard {
        let id = NEXT_ID.with(|next| {
            let id = next.get();
            next.set(id + 1);
            id
        });
        let context = Rc::new(RefCell::new(CachingContext::new(connection)));
        let depth = CONTEXTS.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(Entry { id, context });
            stack.len()
        });
        debug!(depth, "Entered context");

        ContextGuard {
            id,
            depth,
            _thread_bound: PhantomData,
        }
    }

    /// Number of contexts active on the calling thread.
    pub fn depth() -> usize {
        CONTEXTS.with(|stack| stack.borrow().len())
    }

    pub fn get(reference: &str) -> Result<Payload> {
        Self::with_current_mut(|context| context.get(reference))
    }

    pub fn post<T: Serialize + ?Sized>(reference: &str, data: &T) -> Result<Payload> {
        Self::with_current_mut(|context| context.post(reference, data))
    }

    pub fn put<T: Serialize + ?Sized>(reference: &str, data: &T) -> Result<Payload> {
        Self::with_current_mut(|context| context.put(reference, data))
    }

    pub fn patch<T: Serialize + ?Sized>(reference: &str, data: &T) -> Result<Payload> {
        Self::with_current_mut(|context| context.patch(reference, data))
    }

    pub fn delete(reference: &str, data: Option<&Value>) -> Result<()> {
        Self::with_current_mut(|context| context.delete(reference, data))
    }

    /// Cached payload for `reference` in the current context.
    pub fn cached(reference: &str) -> Result<Option<Payload>> {
        Self::with_current(|context| context.cached(reference).cloned())
    }

    /// Run `f` with read access to the current context.
    ///
    /// `Client::cached` works inside `f`; requests made from inside `f`
    /// fail with [`Error::ContextBusy`].
    pub fn with_current<F, R>(f: F) -> Result<R>
    where
        F: FnOnce(&CachingContext) -> R,
    {
        let current = Self::current()?;
        let context = current.try_borrow().map_err(|_| Error::ContextBusy)?;
        Ok(f(&context))
    }

    fn with_current_mut<R>(f: impl FnOnce(&mut CachingContext) -> Result<R>) -> Result<R> {
        let current = Self::current()?;
        let mut context = current.try_borrow_mut().map_err(|_| Error::ContextBusy)?;
        f(&mut context)
    }

    fn current() -> Result<Rc<RefCell<CachingContext>>> {
        CONTEXTS
            .with(|stack| stack.borrow().last().map(|entry| entry.context.clone()))
            .ok_or(Error::NoContext)
    }
}
