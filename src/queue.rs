use crate::remote::BoxFnOnceSend;
use crate::Scheduler;

type BoxFnOnce = Box<dyn FnOnce(&mut Scheduler) + 'static>;

/// The scheduler's main queue of deferred calls.  Local calls and
/// resumes are pushed directly, and calls submitted from other threads
/// are moved across from the inbox by [`RunQueue::extend_from_inbox`].
pub(crate) struct RunQueue {
    calls: Vec<BoxFnOnce>,
}

impl RunQueue {
    pub fn new() -> Self {
        Self { calls: Vec::new() }
    }

    #[inline]
    pub fn push(&mut self, f: impl FnOnce(&mut Scheduler) + 'static) {
        self.calls.push(Box::new(f));
    }

    /// Append inbox submissions after anything already queued, keeping
    /// their submission order
    pub fn extend_from_inbox(&mut self, submitted: Vec<BoxFnOnceSend>) {
        self.calls.reserve(submitted.len());
        for f in submitted {
            self.calls.push(f);
        }
    }

    /// Run every queued call in order.  Calls pushed whilst this runs
    /// go to the scheduler's other queue, not this one.  The backing
    /// memory is kept for the next round.
    pub fn execute(&mut self, s: &mut Scheduler) {
        for f in self.calls.drain(..) {
            f(s);
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}
