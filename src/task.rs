//! Support code for tasks

use crate::{LogID, Remote};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Wake, Waker};
use std::thread::Thread;

/// Key identifying a task spawned on a [`Scheduler`]
///
/// Task slots are reused, so the key also carries a sequence number
/// which makes a key for a finished task harmless: it will never
/// match a later task that happens to land in the same slot.
///
/// [`Scheduler`]: struct.Scheduler.html
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct TaskKey {
    pub(crate) index: usize,
    pub(crate) seq: u64,
}

impl TaskKey {
    /// Sequence number of the task, unique within its scheduler.
    /// The first task spawned is 1.
    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = ()> + 'static>>;

/// A spawned task as stored in the scheduler's slab
pub(crate) struct TaskSlot {
    pub seq: u64,
    /// `None` whilst the future is being polled
    pub future: Option<BoxFuture>,
    pub wake: Arc<TaskWake>,
    pub waker: Waker,
    pub log_id: LogID,
}

impl TaskSlot {
    pub fn new(key: TaskKey, future: BoxFuture, remote: Remote, log_id: LogID) -> Self {
        let wake = Arc::new(TaskWake {
            key,
            queued: AtomicBool::new(true),
            remote,
        });
        Self {
            seq: key.seq,
            future: Some(future),
            waker: Waker::from(wake.clone()),
            wake,
            log_id,
        }
    }
}

/// Wake handle for a task.  Waking submits a resume call through the
/// scheduler's [`Remote`], so this works from any thread.  The
/// `queued` flag means that a burst of wakes between two polls costs
/// only a single queued resume.  A wake arriving after the scheduler
/// has gone is ignored, since there is nothing left to resume.
///
/// [`Remote`]: struct.Remote.html
pub(crate) struct TaskWake {
    key: TaskKey,
    queued: AtomicBool,
    remote: Remote,
}

impl TaskWake {
    /// Called just before the task is polled, so that any wake
    /// during or after the poll queues another resume
    #[inline]
    pub fn unqueue(&self) {
        self.queued.store(false, Ordering::SeqCst);
    }
}

impl Wake for TaskWake {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        if !self.queued.swap(true, Ordering::SeqCst) {
            let key = self.key;
            let _ = self.remote.call_soon(move |s| s.resume(key));
        }
    }
}

/// Wake handle for the root future of [`Scheduler::block_on`].  This
/// is polled directly by the blocking loop, so a wake just needs to
/// flag it and make sure that the loop isn't parked.
///
/// [`Scheduler::block_on`]: struct.Scheduler.html#method.block_on
pub(crate) struct RootWake {
    woken: AtomicBool,
    thread: Thread,
}

impl RootWake {
    pub fn new(thread: Thread) -> Self {
        Self {
            woken: AtomicBool::new(true),
            thread,
        }
    }

    /// Test and clear the woken flag
    #[inline]
    pub fn take(&self) -> bool {
        self.woken.swap(false, Ordering::SeqCst)
    }

    #[inline]
    pub fn is_woken(&self) -> bool {
        self.woken.load(Ordering::SeqCst)
    }
}

impl Wake for RootWake {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.woken.store(true, Ordering::SeqCst);
        self.thread.unpark();
    }
}
