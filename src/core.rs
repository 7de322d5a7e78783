use crate::queue::RunQueue;
use crate::task::{RootWake, TaskSlot};
use crate::{Event, LogFilter, LogID, LogLevel, LogRecord, LogVisitor, Remote, TaskKey};
use slab::Slab;
use std::fmt::Arguments;
use std::future::Future;
use std::mem;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::thread;

const LOG_TARGET: &str = "interlatch";

#[derive(Copy, Clone, Eq, PartialEq)]
enum PollWakerMode {
    Unset,
    BlockOn,
    External,
}

/// The single-threaded cooperative scheduler
///
/// This owns a set of tasks (futures with `()` output), a main queue
/// of `FnOnce` calls, and the inbox that other threads reach through
/// [`Remote`].  Everything happens in the thread that created the
/// scheduler: [`Scheduler`] is neither `Send` nor `Sync`.  Other
/// threads can only affect scheduler-owned state by submitting
/// closures with [`Remote::call_soon`], which then run here in order
/// the next time [`Scheduler::run`] is called.
///
/// There are two ways to drive it.  Either embed it in an outer event
/// loop: install a poll-waker with [`Scheduler::set_poll_waker`] so
/// that the loop is woken when another thread submits work, and call
/// [`Scheduler::run`] each time around.  Or let it run its own loop
/// with [`Scheduler::block_on`], which parks the thread whenever
/// there is nothing to do.
///
/// [`Remote::call_soon`]: struct.Remote.html#method.call_soon
/// [`Remote`]: struct.Remote.html
/// [`Scheduler::block_on`]: struct.Scheduler.html#method.block_on
/// [`Scheduler::run`]: struct.Scheduler.html#method.run
/// [`Scheduler::set_poll_waker`]: struct.Scheduler.html#method.set_poll_waker
/// [`Scheduler`]: struct.Scheduler.html
pub struct Scheduler {
    remote: Remote,
    queue: RunQueue,
    alt_queue: Option<RunQueue>,
    tasks: Slab<TaskSlot>,
    task_seq: u64,
    poll_waker_mode: PollWakerMode,
    #[cfg(feature = "logger")]
    log_id_seq: u64,
    #[cfg(feature = "logger")]
    log_filter: LogFilter,
    #[cfg(feature = "logger")]
    logger: Option<Box<dyn FnMut(&LogRecord<'_>)>>,
}

impl Scheduler {
    /// Construct a [`Scheduler`] owned by the calling thread
    ///
    /// [`Scheduler`]: struct.Scheduler.html
    pub fn new() -> Self {
        Self {
            remote: Remote::new(),
            queue: RunQueue::new(),
            alt_queue: Some(RunQueue::new()),
            tasks: Slab::new(),
            task_seq: 0,
            poll_waker_mode: PollWakerMode::Unset,
            #[cfg(feature = "logger")]
            log_id_seq: 0,
            #[cfg(feature = "logger")]
            log_filter: LogFilter::new(),
            #[cfg(feature = "logger")]
            logger: None,
        }
    }

    /// Get a [`Remote`] handle which may be passed to other threads
    /// to submit work to this scheduler.
    ///
    /// [`Remote`]: struct.Remote.html
    #[inline]
    pub fn remote(&self) -> Remote {
        self.remote.clone()
    }

    /// Create a new [`Event`] owned by this scheduler, initially
    /// cleared.
    ///
    /// [`Event`]: struct.Event.html
    #[inline]
    pub fn event(&self) -> Event {
        Event::new(&self.remote)
    }

    /// Add a task.  Its first poll is queued on the main queue, so
    /// nothing runs until the next [`Scheduler::run`].
    ///
    /// [`Scheduler::run`]: struct.Scheduler.html#method.run
    pub fn spawn(&mut self, future: impl Future<Output = ()> + 'static) -> TaskKey {
        self.task_seq += 1;
        let seq = self.task_seq;
        let log_id = self.log_span_open("task", 0, |output| output.kv_u64(Some("task"), seq));
        let entry = self.tasks.vacant_entry();
        let key = TaskKey {
            index: entry.key(),
            seq,
        };
        entry.insert(TaskSlot::new(
            key,
            Box::pin(future),
            self.remote.clone(),
            log_id,
        ));
        self.queue.push(move |s| s.resume(key));
        key
    }

    /// Cancel a task by dropping its future.  Any `Drop` handlers in
    /// the future run immediately, so an interruptible read in
    /// progress will signal its [`Event`] before this returns.
    /// Returns `true` if the task was found, `false` if it had
    /// already finished or been cancelled.
    ///
    /// [`Event`]: struct.Event.html
    pub fn cancel(&mut self, key: TaskKey) -> bool {
        match self.tasks.get(key.index) {
            Some(slot) if slot.seq == key.seq && slot.future.is_some() => (),
            _ => return false,
        }
        let slot = self.tasks.remove(key.index);
        let log_id = slot.log_id;
        drop(slot);
        self.log_span_close(log_id, format_args!("cancelled"), |output| {
            output.kv_null(Some("cancelled"))
        });
        true
    }

    /// Test whether a task is still pending, i.e. has neither
    /// completed nor been cancelled
    #[inline]
    pub fn is_pending(&self, key: TaskKey) -> bool {
        matches!(self.tasks.get(key.index), Some(slot) if slot.seq == key.seq)
    }

    /// Number of pending tasks
    #[inline]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Defer an operation to be executed later on the main queue, in
    /// this thread.  It runs as soon as all operations preceding it
    /// have been executed.
    #[inline]
    pub fn defer(&mut self, f: impl FnOnce(&mut Scheduler) + 'static) {
        self.queue.push(f);
    }

    /// Run everything that is ready.  Submissions from other threads
    /// are collected from the inbox onto the main queue, after
    /// anything already queued locally, and then the main queue is
    /// executed in order.  This repeats until both the inbox and the
    /// main queue are empty.  Returns `true` if there are still tasks
    /// pending.
    ///
    /// If a task panics whilst being polled, its slot is removed and
    /// the panic propagates out of this call.  The scheduler can't be
    /// run again after that, and a further call panics.
    pub fn run(&mut self) -> bool {
        // It's necessary to swap out the queue before executing it,
        // because whilst executing, more items may be added.
        let mut alt = (self.alt_queue.take()).expect("Previous run call must have panicked");
        loop {
            self.queue.extend_from_inbox(self.remote.drain());
            mem::swap(&mut self.queue, &mut alt);
            if alt.is_empty() {
                break;
            }
            alt.execute(self);
        }
        self.alt_queue = Some(alt);
        !self.tasks.is_empty()
    }

    // Poll a task.  Stale keys and spurious resumes are ignored.
    pub(crate) fn resume(&mut self, key: TaskKey) {
        let (mut future, waker) = match self.tasks.get_mut(key.index) {
            Some(slot) if slot.seq == key.seq => {
                slot.wake.unqueue();
                match slot.future.take() {
                    Some(future) => (future, slot.waker.clone()),
                    None => return,
                }
            }
            _ => return,
        };

        let mut cx = Context::from_waker(&waker);
        let mut unwind = RemoveOnUnwind {
            tasks: &mut self.tasks,
            index: key.index,
            armed: true,
        };
        let ready = future.as_mut().poll(&mut cx).is_ready();
        unwind.armed = false;
        drop(unwind);

        if ready {
            drop(future);
            let slot = self.tasks.remove(key.index);
            self.log_span_close(slot.log_id, format_args!(""), |_| {});
        } else {
            // A task can't reach the slab whilst it is being polled,
            // so the slot is still there
            self.tasks[key.index].future = Some(future);
        }
    }

    /// Used to provide the scheduler with a means to wake the outer
    /// event loop.  This is called from whichever thread makes a
    /// submission through a [`Remote`] that finds the inbox empty,
    /// so it must be cheap and must not block.  The event loop should
    /// respond by calling [`Scheduler::run`].
    ///
    /// Panics if a poll-waker has already been set, either by an
    /// earlier call or by [`Scheduler::block_on`].
    ///
    /// [`Remote`]: struct.Remote.html
    /// [`Scheduler::block_on`]: struct.Scheduler.html#method.block_on
    /// [`Scheduler::run`]: struct.Scheduler.html#method.run
    pub fn set_poll_waker(&mut self, waker: impl Fn() + Send + Sync + 'static) {
        if self.poll_waker_mode != PollWakerMode::Unset || !self.remote.set_poll_waker(Arc::new(waker))
        {
            panic!("Scheduler::set_poll_waker called more than once");
        }
        self.poll_waker_mode = PollWakerMode::External;
    }

    /// Run the scheduler in this thread until `future` completes,
    /// returning its output.  The future is polled directly as a
    /// root task, and all other tasks are run alongside it.  When
    /// there is nothing to do, the thread is parked until another
    /// thread submits work or wakes the root future.
    ///
    /// On first use this installs a poll-waker that unparks this
    /// thread.  Panics if a different poll-waker was installed with
    /// [`Scheduler::set_poll_waker`], since then there would be no
    /// way to wake the parked thread.
    ///
    /// [`Scheduler::set_poll_waker`]: struct.Scheduler.html#method.set_poll_waker
    pub fn block_on<F: Future>(&mut self, future: F) -> F::Output {
        match self.poll_waker_mode {
            PollWakerMode::External => {
                panic!("Scheduler::block_on called with an external poll-waker set")
            }
            PollWakerMode::Unset => {
                let thread = thread::current();
                if !self.remote.set_poll_waker(Arc::new(move || thread.unpark())) {
                    panic!("Scheduler::block_on found a poll-waker already installed");
                }
                self.poll_waker_mode = PollWakerMode::BlockOn;
            }
            PollWakerMode::BlockOn => (),
        }

        let root = Arc::new(RootWake::new(thread::current()));
        let waker = Waker::from(root.clone());
        let mut cx = Context::from_waker(&waker);
        let mut future = Box::pin(future);
        loop {
            if root.take() {
                if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                    return output;
                }
            }
            self.run();
            if !root.is_woken() {
                // Anything submitted after `run` drained the inbox
                // will have unparked us, so this can't miss a wake
                thread::park();
            }
        }
    }

    /// Shut down the scheduler's inbox.  Anything already submitted
    /// from other threads but not yet run is dropped, and any further
    /// submission through a [`Remote`] is rejected.  Since every task
    /// wake is delivered through the inbox, no pending task is ever
    /// resumed again, whichever thread the wake comes from.  Pending
    /// tasks stay in place until cancelled or until the scheduler is
    /// dropped.  [`Scheduler::defer`] and [`Scheduler::run`] still
    /// work for local calls.  This is also done when the scheduler is
    /// dropped.  Calling it more than once has no further effect.
    ///
    /// [`Remote`]: struct.Remote.html
    /// [`Scheduler::defer`]: struct.Scheduler.html#method.defer
    /// [`Scheduler::run`]: struct.Scheduler.html#method.run
    pub fn shutdown(&mut self) {
        if self.remote.is_closed() {
            return;
        }
        let dropped = self.remote.close() as u64;
        self.log(
            0,
            LogLevel::Info,
            LOG_TARGET,
            format_args!("scheduler shut down"),
            |output| output.kv_u64(Some("dropped"), dropped),
        );
    }

    /// Tests whether [`Scheduler::shutdown`] has been called
    ///
    /// [`Scheduler::shutdown`]: struct.Scheduler.html#method.shutdown
    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.remote.is_closed()
    }

    /// Set the logger and logging level
    ///
    /// The provided logger will be called synchronously every time a
    /// [`Scheduler::log`] call is made if the logging level is
    /// enabled.  It may choose to forward the logging to an external
    /// log framework.  The scheduler itself logs task spans (`Open`
    /// on spawn and `Close` on completion or cancellation) and an
    /// `Info` record on shutdown.
    ///
    /// Note that the **logger** feature must be enabled for this call
    /// to succeed.
    ///
    /// [`Scheduler::log`]: struct.Scheduler.html#method.log
    #[inline]
    #[allow(unused_variables)]
    pub fn set_logger(&mut self, filter: LogFilter, logger: impl FnMut(&LogRecord<'_>) + 'static) {
        #[cfg(feature = "logger")]
        {
            self.log_filter = filter;
            self.logger = Some(Box::new(logger));
        }
        #[cfg(not(feature = "logger"))]
        panic!("Enable 'logger' feature before setting a logger");
    }

    /// Log a log-record to the current logger, if one is active and
    /// if the log-level is enabled.  Otherwise it is ignored.  `id`
    /// is the span the record belongs to, or 0 for none.
    #[inline]
    #[allow(unused_variables)]
    pub fn log(
        &mut self,
        id: LogID,
        level: LogLevel,
        target: &str,
        fmt: Arguments<'_>,
        kvscan: impl Fn(&mut dyn LogVisitor),
    ) {
        // `format_args!` temporaries only live to the end of the
        // enclosing statement, so the record has to be built here
        #[cfg(feature = "logger")]
        if self.log_check(level) {
            if let Some(mut logger) = self.logger.take() {
                logger(&LogRecord {
                    id,
                    level,
                    target,
                    fmt,
                    kvscan: &kvscan,
                });
                self.logger = Some(logger);
            }
        }
    }

    /// Check whether a log-record with the given [`LogLevel`] should
    /// be logged
    ///
    /// [`LogLevel`]: enum.LogLevel.html
    #[inline]
    #[allow(unused_variables)]
    pub fn log_check(&self, level: LogLevel) -> bool {
        #[cfg(feature = "logger")]
        {
            self.log_filter.allows(level)
        }
        #[cfg(not(feature = "logger"))]
        false
    }

    /// Allocate a new logging-ID and write an `Open` record to the
    /// logger.  `tag` becomes the record's text.  If `parent_id` is
    /// non-zero, a `parent` key is added.  Returns 0 if the
    /// **logger** feature is disabled.
    #[inline]
    #[allow(unused_variables)]
    pub fn log_span_open(
        &mut self,
        tag: &str,
        parent_id: LogID,
        kvscan: impl Fn(&mut dyn LogVisitor),
    ) -> LogID {
        #[cfg(feature = "logger")]
        {
            self.log_id_seq = self.log_id_seq.wrapping_add(1).max(1);
            let id = self.log_id_seq;
            self.log(
                id,
                LogLevel::Open,
                LOG_TARGET,
                format_args!("{}", tag),
                move |output| {
                    if parent_id != 0 {
                        output.kv_u64(Some("parent"), parent_id);
                    }
                    kvscan(output);
                },
            );
            id
        }
        #[cfg(not(feature = "logger"))]
        0
    }

    /// Write a `Close` record to the logger
    #[inline]
    #[allow(unused_variables)]
    pub fn log_span_close(
        &mut self,
        id: LogID,
        fmt: Arguments<'_>,
        kvscan: impl Fn(&mut dyn LogVisitor),
    ) {
        #[cfg(feature = "logger")]
        self.log(id, LogLevel::Close, LOG_TARGET, fmt, kvscan);
    }
}

// Removes the slot of a task whose poll panicked, since the future
// has already been taken out and the task can never run again
struct RemoveOnUnwind<'a> {
    tasks: &'a mut Slab<TaskSlot>,
    index: usize,
    armed: bool,
}

impl Drop for RemoveOnUnwind<'_> {
    fn drop(&mut self) {
        if self.armed && self.tasks.contains(self.index) {
            self.tasks.remove(self.index);
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        // Drop the tasks first, whilst the inbox is still open, so
        // that any guards in the futures see a live scheduler.  A
        // task future's drop handler may queue more work, which is
        // then discarded along with the inbox.
        let tasks = mem::take(&mut self.tasks);
        drop(tasks);
        self.shutdown();
    }
}
