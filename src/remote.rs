//! # Inter-thread submission
//!
//! Every [`Scheduler`] owns one inbox.  Other threads reach it
//! through [`Remote`] handles, pushing `FnOnce` items that will later
//! be executed in the scheduler thread when it next calls
//! [`Scheduler::run`].  This is the only path by which a foreign
//! thread may cause anything to happen to scheduler-owned state.
//!
//! The inbox is a plain mutex-protected `Vec`.  Contention is
//! expected to be low: pushes are quick, and the scheduler thread
//! takes the whole list in one go.  When a push turns the inbox from
//! empty to non-empty, the poll-waker (if one is configured) is
//! called so that a blocked outer event loop can come back and run
//! the scheduler.
//!
//! ## Shutdown
//!
//! When the scheduler shuts down, the inbox is closed.  Anything
//! still queued is dropped, and any later submission is rejected
//! with [`SchedulerGone`].  The closed flag is never cleared again,
//! so a dead scheduler cannot be brought back to life by a late
//! submission.
//!
//! [`Remote`]: struct.Remote.html
//! [`Scheduler::run`]: struct.Scheduler.html#method.run
//! [`Scheduler`]: struct.Scheduler.html
//! [`SchedulerGone`]: struct.SchedulerGone.html

use crate::Scheduler;
use std::error::Error;
use std::fmt::Display;
use std::mem;
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

pub(crate) type BoxFnOnceSend = Box<dyn FnOnce(&mut Scheduler) + Send + 'static>;
type PollWaker = Arc<dyn Fn() + Send + Sync + 'static>;

struct Inbox {
    mutex: Mutex<InboxBuf>,
    owner: ThreadId,
}

struct InboxBuf {
    queue: Vec<BoxFnOnceSend>,
    closed: bool,
    pollwaker: Option<PollWaker>,
}

/// Thread-safe handle used to submit work to a [`Scheduler`]
///
/// Obtain one with [`Scheduler::remote`].  It may be cloned freely
/// and sent to any thread, including threads that have no scheduler
/// of their own.  Submitted closures run in the scheduler thread, in
/// the order in which they were accepted by the inbox.  No ordering
/// is implied between submissions from different threads beyond
/// that.
///
/// Once the [`Scheduler`] has shut down (or been dropped),
/// [`Remote::call_soon`] returns [`SchedulerGone`] and the closure is
/// dropped in the calling thread.
///
/// [`Remote::call_soon`]: struct.Remote.html#method.call_soon
/// [`Scheduler::remote`]: struct.Scheduler.html#method.remote
/// [`SchedulerGone`]: struct.SchedulerGone.html
/// [`Scheduler`]: struct.Scheduler.html
#[derive(Clone)]
pub struct Remote {
    inbox: Arc<Inbox>,
}

impl Remote {
    pub(crate) fn new() -> Self {
        Self {
            inbox: Arc::new(Inbox {
                mutex: Mutex::new(InboxBuf {
                    queue: Vec::new(),
                    closed: false,
                    pollwaker: None,
                }),
                owner: thread::current().id(),
            }),
        }
    }

    /// Queue `f` to be run in the scheduler thread the next time the
    /// scheduler runs.  Never blocks beyond taking the inbox lock.
    /// Returns `Err(SchedulerGone)` if the scheduler has shut down,
    /// in which case `f` is dropped without being called.
    pub fn call_soon(
        &self,
        f: impl FnOnce(&mut Scheduler) + Send + 'static,
    ) -> Result<(), SchedulerGone> {
        self.push(Box::new(f))
    }

    pub(crate) fn push(&self, f: BoxFnOnceSend) -> Result<(), SchedulerGone> {
        let mut guard = self.inbox.mutex.lock().unwrap();
        if guard.closed {
            drop(guard);
            // `f` is dropped here, outside the lock
            return Err(SchedulerGone);
        }
        let was_empty = guard.queue.is_empty();
        guard.queue.push(f);
        let pollwaker = if was_empty {
            guard.pollwaker.clone()
        } else {
            None
        };
        drop(guard);
        if let Some(pollwaker) = pollwaker {
            pollwaker();
        }
        Ok(())
    }

    /// Tests whether the scheduler has shut down
    pub fn is_closed(&self) -> bool {
        self.inbox.mutex.lock().unwrap().closed
    }

    /// Tests whether the calling thread is the thread that owns the
    /// scheduler
    #[inline]
    pub fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.inbox.owner
    }

    /// Tests whether two handles refer to the same scheduler
    #[inline]
    pub fn same_scheduler(&self, other: &Remote) -> bool {
        Arc::ptr_eq(&self.inbox, &other.inbox)
    }

    // Take everything currently queued, in submission order
    pub(crate) fn drain(&self) -> Vec<BoxFnOnceSend> {
        mem::take(&mut self.inbox.mutex.lock().unwrap().queue)
    }

    // Returns `false` if a poll-waker was already installed
    pub(crate) fn set_poll_waker(&self, pollwaker: PollWaker) -> bool {
        let mut guard = self.inbox.mutex.lock().unwrap();
        if guard.pollwaker.is_some() {
            return false;
        }
        guard.pollwaker = Some(pollwaker);
        true
    }

    // Close the inbox, returning the number of submissions that were
    // discarded.  Idempotent.
    pub(crate) fn close(&self) -> usize {
        // Ignore poisoning here, to not panic in a drop handler
        let (dropped, pollwaker) = match self.inbox.mutex.lock() {
            Ok(mut guard) => {
                guard.closed = true;
                (mem::take(&mut guard.queue), guard.pollwaker.take())
            }
            Err(_) => return 0,
        };
        // Dropping queued items can run arbitrary `Drop` code, which
        // may itself try to submit, so the lock must be released by
        // this point
        let count = dropped.len();
        drop(dropped);
        drop(pollwaker);
        count
    }
}

/// Submission rejected because the [`Scheduler`] has shut down
///
/// [`Scheduler`]: struct.Scheduler.html
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SchedulerGone;
impl Error for SchedulerGone {}
impl Display for SchedulerGone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        "scheduler has shut down".fmt(f)
    }
}
