//! Reading from a message stream with a guaranteed interrupt signal
//!
//! [`read_with_interrupt`] takes the next item from a
//! [`MessageSource`] and always sets an [`Event`] when the read
//! attempt finishes, whichever way it finishes: a message, a source
//! error, an unexpected end-of-stream, a panic in the key function,
//! or the read future being dropped before it completes.  The signal
//! comes from a drop guard, so there is no exit path that skips it,
//! and the guard is consumed by the first exit, so it fires exactly
//! once per read.
//!
//! [`Event`]: ../struct.Event.html
//! [`MessageSource`]: trait.MessageSource.html
//! [`read_with_interrupt`]: fn.read_with_interrupt.html

use crate::Event;
use std::error::Error;
use std::fmt::{self, Display};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// An ordered asynchronous producer of messages, typically the
/// response side of a streaming RPC call
pub trait MessageSource {
    /// Type of message produced
    type Message;

    /// Type of error produced when a read fails
    type Error;

    /// Attempt to read the next item.  Returns
    /// `Poll::Ready(Some(Ok(msg)))` for a message,
    /// `Poll::Ready(Some(Err(e)))` for a failure, `Poll::Ready(None)`
    /// when the stream has ended, or `Poll::Pending` after arranging
    /// for the task to be woken when there is something to read.
    fn poll_read(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Self::Message, Self::Error>>>;

    /// Get a future that resolves to the next item, with no
    /// interrupt handling.
    fn read_next(&mut self) -> ReadNext<'_, Self>
    where
        Self: Sized,
    {
        ReadNext { source: self }
    }
}

impl<S: MessageSource + ?Sized> MessageSource for &mut S {
    type Message = S::Message;
    type Error = S::Error;

    #[inline]
    fn poll_read(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Self::Message, Self::Error>>> {
        (**self).poll_read(cx)
    }
}

impl<S: MessageSource + ?Sized> MessageSource for Box<S> {
    type Message = S::Message;
    type Error = S::Error;

    #[inline]
    fn poll_read(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Self::Message, Self::Error>>> {
        (**self).poll_read(cx)
    }
}

/// Future returned by [`MessageSource::read_next`]
///
/// [`MessageSource::read_next`]: trait.MessageSource.html#method.read_next
#[must_use = "futures do nothing unless polled"]
pub struct ReadNext<'a, S> {
    source: &'a mut S,
}

impl<S: MessageSource> Future for ReadNext<'_, S> {
    type Output = Option<Result<S::Message, S::Error>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.source.poll_read(cx)
    }
}

/// Failure of an interruptible read
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ReadError<E> {
    /// The stream ended where a message was expected.  Stream
    /// lifetime is managed by the caller, so reaching the end in the
    /// middle of a read is treated as a failure, not a value.
    UnexpectedEof,

    /// The source reported an error, which is passed through as is
    Source(E),
}

impl<E> ReadError<E> {
    /// Test whether this is [`ReadError::UnexpectedEof`]
    ///
    /// [`ReadError::UnexpectedEof`]: enum.ReadError.html#variant.UnexpectedEof
    #[inline]
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::UnexpectedEof)
    }

    /// Get the source's error, if that is what this is
    #[inline]
    pub fn into_source(self) -> Option<E> {
        match self {
            Self::UnexpectedEof => None,
            Self::Source(e) => Some(e),
        }
    }
}

impl<E: Display> Display for ReadError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEof => "unexpected end of stream".fmt(f),
            Self::Source(e) => e.fmt(f),
        }
    }
}

impl<E: Error + 'static> Error for ReadError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::UnexpectedEof => None,
            Self::Source(e) => e.source(),
        }
    }
}

/// Key function type to name when no key is wanted, e.g.
/// `None::<NoKey<_>>`
pub type NoKey<M> = fn(&M);

// Sets the event when dropped
struct SignalOnDrop<'a>(&'a Event);

impl Drop for SignalOnDrop<'_> {
    fn drop(&mut self) {
        self.0.set();
    }
}

/// Future returned by [`read_with_interrupt`]
///
/// If this is dropped before completing (for example because its
/// task was cancelled), the event is set at that point.
///
/// [`read_with_interrupt`]: fn.read_with_interrupt.html
#[must_use = "futures do nothing unless polled"]
pub struct InterruptibleRead<'a, S: ?Sized, F> {
    source: &'a mut S,
    key_fn: Option<F>,
    signal: Option<SignalOnDrop<'a>>,
}

// No field is ever pinned
impl<S: ?Sized, F> Unpin for InterruptibleRead<'_, S, F> {}

impl<S, F, K> Future for InterruptibleRead<'_, S, F>
where
    S: MessageSource + ?Sized,
    F: FnOnce(&S::Message) -> K,
{
    type Output = Result<(S::Message, Option<K>), ReadError<S::Error>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        if this.signal.is_none() {
            panic!("InterruptibleRead polled after completion");
        }
        let item = match this.source.poll_read(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(item) => item,
        };

        // From here on the guard is a local, so it fires on return or
        // on unwind from the key function
        let signal = this.signal.take();
        let outcome = match item {
            Some(Ok(message)) => {
                let key = this.key_fn.take().map(|key_fn| key_fn(&message));
                Ok((message, key))
            }
            Some(Err(e)) => Err(ReadError::Source(e)),
            None => Err(ReadError::UnexpectedEof),
        };
        drop(signal);
        Poll::Ready(outcome)
    }
}

/// Read the next message from `source`, setting `interrupt` when the
/// read finishes, however it finishes.
///
/// On a message `m`, resolves to `Ok((m, Some(key_fn(&m))))`, or to
/// `Ok((m, None))` if no key function was given.  If the source
/// reports end-of-stream, resolves to
/// `Err(ReadError::UnexpectedEof)`.  A source error `e` resolves to
/// `Err(ReadError::Source(e))`.  In every case `interrupt` has
/// already been set (or the request to set it submitted, when it
/// belongs to a scheduler on another thread) by the time the result
/// is returned.  A panic in `key_fn` propagates after the event has
/// been set.
///
/// Exactly one item is taken from the source.  There is no retry.
/// If the key is not wanted, pass `None::<NoKey<_>>` or use
/// [`read_next_with_interrupt`].
///
/// [`read_next_with_interrupt`]: fn.read_next_with_interrupt.html
pub fn read_with_interrupt<'a, S, F, K>(
    source: &'a mut S,
    interrupt: &'a Event,
    key_fn: Option<F>,
) -> InterruptibleRead<'a, S, F>
where
    S: MessageSource + ?Sized,
    F: FnOnce(&S::Message) -> K,
{
    InterruptibleRead {
        source,
        key_fn,
        signal: Some(SignalOnDrop(interrupt)),
    }
}

/// Same as [`read_with_interrupt`] with no key function.  The key in
/// the result is always `None`.
///
/// [`read_with_interrupt`]: fn.read_with_interrupt.html
pub fn read_next_with_interrupt<'a, S>(
    source: &'a mut S,
    interrupt: &'a Event,
) -> InterruptibleRead<'a, S, NoKey<S::Message>>
where
    S: MessageSource + ?Sized,
{
    read_with_interrupt(source, interrupt, None)
}
