use crate::Remote;
use slab::Slab;
use std::fmt;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

/// A boolean wait condition owned by a [`Scheduler`], which may be
/// set or cleared from any thread
///
/// Tasks of the owning scheduler wait on it with [`Event::wait`].
/// Any thread may call [`Event::set`] or [`Event::clear`].  A request
/// made from a foreign thread is not applied there: it is submitted
/// to the owning scheduler through its [`Remote`] and applied when
/// the scheduler next runs, serialized with everything else the
/// scheduler does.  A request made in the owning thread is applied
/// immediately, since that thread is already serialized with the
/// scheduler.  So the state only ever changes in the owning thread,
/// and waiters can never see it change under them.
///
/// When the owning scheduler has shut down, both [`Event::set`] and
/// [`Event::clear`] are silently ignored.  The signal is advisory,
/// and there can be no waiter left to receive it.  Use
/// [`Remote::call_soon`] directly if the failure needs to be seen.
///
/// This is a cheap `Clone` handle.  All clones refer to the same
/// state.
///
/// [`Event::clear`]: struct.Event.html#method.clear
/// [`Event::set`]: struct.Event.html#method.set
/// [`Event::wait`]: struct.Event.html#method.wait
/// [`Remote::call_soon`]: struct.Remote.html#method.call_soon
/// [`Remote`]: struct.Remote.html
/// [`Scheduler`]: struct.Scheduler.html
#[derive(Clone)]
pub struct Event {
    inner: Arc<EventInner>,
}

struct EventInner {
    remote: Remote,
    state: Mutex<EventState>,
}

struct EventState {
    is_set: bool,
    // Bumped every time `waiters` is replaced, so that a `Wait`
    // holding a slot key from an older generation knows that the key
    // is no longer valid
    generation: u64,
    waiters: Slab<Waker>,
}

impl Event {
    /// Create a new cleared [`Event`] owned by the scheduler that
    /// `remote` refers to.  See also [`Scheduler::event`].
    ///
    /// [`Event`]: struct.Event.html
    /// [`Scheduler::event`]: struct.Scheduler.html#method.event
    pub fn new(remote: &Remote) -> Self {
        Self {
            inner: Arc::new(EventInner {
                remote: remote.clone(),
                state: Mutex::new(EventState {
                    is_set: false,
                    generation: 0,
                    waiters: Slab::new(),
                }),
            }),
        }
    }

    /// Set the event, waking all waiters.  May be called from any
    /// thread.  Never blocks beyond taking a short internal lock, and
    /// never panics, even if the owning scheduler has gone.
    pub fn set(&self) {
        self.request(true);
    }

    /// Clear the event.  May be called from any thread, with the same
    /// guarantees as [`Event::set`].
    ///
    /// [`Event::set`]: struct.Event.html#method.set
    pub fn clear(&self) {
        self.request(false);
    }

    /// Get a future that completes once the event is set.  It
    /// completes on first poll if the event is set already.  If the
    /// event is set and then cleared again before the waiting task
    /// gets to run, the task keeps waiting.
    ///
    /// The future must only be polled from the owning scheduler's
    /// thread, and panics otherwise.  Only signalling is
    /// cross-thread, not waiting.
    pub fn wait(&self) -> Wait<'_> {
        Wait {
            event: self,
            slot: None,
        }
    }

    /// Get the currently applied state.  A `set` or `clear` submitted
    /// from another thread is not visible here until the owning
    /// scheduler has run it.
    pub fn is_set(&self) -> bool {
        self.inner.state.lock().unwrap().is_set
    }

    /// Get the [`Remote`] of the owning scheduler
    ///
    /// [`Remote`]: struct.Remote.html
    pub fn remote(&self) -> &Remote {
        &self.inner.remote
    }

    /// Check the number of registered waiters (for testing)
    #[cfg(test)]
    pub(crate) fn waiter_count(&self) -> usize {
        self.inner.state.lock().unwrap().waiters.len()
    }

    fn request(&self, set: bool) {
        let remote = &self.inner.remote;
        if remote.is_owner_thread() {
            if !remote.is_closed() {
                self.inner.apply(set);
            }
        } else {
            let inner = self.inner.clone();
            // An error means the scheduler has gone, so ignore it
            let _ = remote.call_soon(move |_| inner.apply(set));
        }
    }
}

impl EventInner {
    // Must only run in the owning thread
    fn apply(&self, set: bool) {
        let mut state = self.state.lock().unwrap();
        state.is_set = set;
        if set && !state.waiters.is_empty() {
            let waiters = mem::take(&mut state.waiters);
            state.generation = state.generation.wrapping_add(1);
            drop(state);
            for (_, waker) in waiters {
                waker.wake();
            }
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("is_set", &self.is_set())
            .finish()
    }
}

/// Future returned by [`Event::wait`]
///
/// [`Event::wait`]: struct.Event.html#method.wait
#[must_use = "futures do nothing unless polled"]
pub struct Wait<'a> {
    event: &'a Event,
    // (generation, key) of our registration in the waiter slab
    slot: Option<(u64, usize)>,
}

impl Future for Wait<'_> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let event = self.event;
        if !event.inner.remote.is_owner_thread() {
            panic!("Event::wait() polled outside of the owning scheduler thread");
        }
        let mut state = event.inner.state.lock().unwrap();
        let generation = state.generation;
        let registered = match self.slot {
            Some((gen, key)) if gen == generation && state.waiters.contains(key) => Some(key),
            _ => None,
        };

        if state.is_set {
            if let Some(key) = registered {
                state.waiters.remove(key);
            }
            drop(state);
            self.slot = None;
            return Poll::Ready(());
        }

        match registered {
            Some(key) => {
                let waker = &mut state.waiters[key];
                if !waker.will_wake(cx.waker()) {
                    *waker = cx.waker().clone();
                }
            }
            None => {
                let key = state.waiters.insert(cx.waker().clone());
                drop(state);
                self.slot = Some((generation, key));
            }
        }
        Poll::Pending
    }
}

impl Drop for Wait<'_> {
    fn drop(&mut self) {
        if let Some((gen, key)) = self.slot.take() {
            // Ignore poisoning here, to not panic in a drop handler
            if let Ok(mut state) = self.event.inner.state.lock() {
                if state.generation == gen && state.waiters.contains(key) {
                    state.waiters.remove(key);
                }
            }
        }
    }
}
