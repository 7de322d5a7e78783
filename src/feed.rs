use crate::MessageSource;
use std::collections::VecDeque;
use std::mem;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

// Uses a Mutex internally.  Contention is expected to be very low,
// since operations are quick and there is only one reader.
struct FeedBuf<M, E> {
    queue: VecDeque<Result<M, E>>,
    closed: bool,        // No more items will be added
    reader_gone: bool,   // Feed has been dropped
    senders: usize,      // Live FeedSender count
    waker: Option<Waker>,
}

/// Create a new feed.  Returns the sending side, which may be cloned
/// and passed to any thread, and the [`Feed`] reading side, which is
/// a [`MessageSource`] for use with
/// [`read_with_interrupt`](fn.read_with_interrupt.html).
///
/// This stands in for the response stream of a transport: a
/// transport thread pushes messages and errors with
/// [`FeedSender::send`] and [`FeedSender::fail`], and marks the end
/// of the stream with [`FeedSender::close`].  The stream also ends
/// when the last [`FeedSender`] is dropped.
///
/// [`FeedSender::close`]: struct.FeedSender.html#method.close
/// [`FeedSender::fail`]: struct.FeedSender.html#method.fail
/// [`FeedSender::send`]: struct.FeedSender.html#method.send
/// [`FeedSender`]: struct.FeedSender.html
/// [`Feed`]: struct.Feed.html
/// [`MessageSource`]: trait.MessageSource.html
pub fn feed<M, E>() -> (FeedSender<M, E>, Feed<M, E>) {
    let arc = Arc::new(Mutex::new(FeedBuf {
        queue: VecDeque::new(),
        closed: false,
        reader_gone: false,
        senders: 1,
        waker: None,
    }));
    (FeedSender { arc: arc.clone() }, Feed { arc })
}

/// Sending side of a [`feed`](fn.feed.html)
pub struct FeedSender<M, E> {
    arc: Arc<Mutex<FeedBuf<M, E>>>,
}

impl<M, E> FeedSender<M, E> {
    /// Add a message to the stream.  Returns `true` if accepted, or
    /// `false` if the reader has gone or the stream was closed, in
    /// which case the message is dropped.
    pub fn send(&self, msg: M) -> bool {
        self.push(Ok(msg))
    }

    /// Add a read failure to the stream.  The reader will see it in
    /// order with the messages around it.  Returns `false` if not
    /// accepted, as for [`FeedSender::send`].
    ///
    /// [`FeedSender::send`]: struct.FeedSender.html#method.send
    pub fn fail(&self, err: E) -> bool {
        self.push(Err(err))
    }

    /// End the stream.  Items already queued will still be read,
    /// and then the reader sees end-of-stream.
    pub fn close(&self) {
        let waker = {
            let mut guard = self.arc.lock().unwrap();
            guard.closed = true;
            guard.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Tests whether the reading side has been dropped
    pub fn is_reader_gone(&self) -> bool {
        self.arc.lock().unwrap().reader_gone
    }

    fn push(&self, item: Result<M, E>) -> bool {
        let mut guard = self.arc.lock().unwrap();
        if guard.closed || guard.reader_gone {
            return false;
        }
        guard.queue.push_back(item);
        let waker = guard.waker.take();
        drop(guard);
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }
}

impl<M, E> Clone for FeedSender<M, E> {
    /// Get another sender for the same stream
    fn clone(&self) -> Self {
        self.arc.lock().unwrap().senders += 1;
        Self {
            arc: self.arc.clone(),
        }
    }
}

impl<M, E> Drop for FeedSender<M, E> {
    fn drop(&mut self) {
        // Ignore poisoning here, to not panic in a drop handler
        let waker = match self.arc.lock() {
            Ok(mut guard) => {
                guard.senders -= 1;
                if guard.senders == 0 {
                    guard.closed = true;
                    guard.waker.take()
                } else {
                    None
                }
            }
            Err(_) => None,
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

/// Reading side of a [`feed`](fn.feed.html)
///
/// When this is dropped, senders are told via the return value of
/// [`FeedSender::send`], and anything still queued is discarded.
///
/// [`FeedSender::send`]: struct.FeedSender.html#method.send
pub struct Feed<M, E> {
    arc: Arc<Mutex<FeedBuf<M, E>>>,
}

impl<M, E> Feed<M, E> {
    /// Number of items queued and not yet read
    pub fn pending(&self) -> usize {
        self.arc.lock().unwrap().queue.len()
    }
}

impl<M, E> MessageSource for Feed<M, E> {
    type Message = M;
    type Error = E;

    fn poll_read(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<M, E>>> {
        let mut guard = self.arc.lock().unwrap();
        if let Some(item) = guard.queue.pop_front() {
            return Poll::Ready(Some(item));
        }
        if guard.closed {
            return Poll::Ready(None);
        }
        match guard.waker {
            Some(ref waker) if waker.will_wake(cx.waker()) => (),
            _ => guard.waker = Some(cx.waker().clone()),
        }
        Poll::Pending
    }
}

impl<M, E> Drop for Feed<M, E> {
    fn drop(&mut self) {
        let discard = match self.arc.lock() {
            Ok(mut guard) => {
                guard.reader_gone = true;
                guard.waker = None;
                mem::take(&mut guard.queue)
            }
            Err(_) => return,
        };
        drop(discard);
    }
}
