//! **interlatch** provides a cross-thread event and an interruptible
//! stream read for code running on a single-threaded cooperative
//! scheduler.  It is aimed at client libraries that consume
//! long-lived streaming RPC channels, where one task reads responses
//! while another needs to know, reliably, when each read attempt has
//! finished.
//!
//! - [Overview of types](#overview-of-types)
//! - [Threads](#threads)
//! - [Cargo features](#cargo-features)
//! - [Example](#example)
//!
//! # Overview of types
//!
//! [`Scheduler`] is the single-threaded cooperative scheduler.  It
//! runs tasks (futures) and a queue of deferred calls, all in the
//! thread that created it.  It can be driven from an outer event loop
//! with [`Scheduler::run`], or run its own loop with
//! [`Scheduler::block_on`].
//!
//! [`Remote`] is a thread-safe handle to a scheduler's inbox.  Any
//! thread may use it to submit a closure to run in the scheduler
//! thread.
//!
//! [`Event`] is a boolean wait condition.  Tasks of the owning
//! scheduler wait on it, and any thread may set or clear it.
//! Requests from other threads are routed through the [`Remote`], so
//! the state only ever changes in the scheduler thread.
//!
//! [`read_with_interrupt`] reads the next message from a
//! [`MessageSource`], optionally derives a correlation key from it,
//! and sets an [`Event`] on every exit path: message, error,
//! unexpected end-of-stream, panic or cancellation.
//!
//! [`feed`] creates a [`MessageSource`] that other threads can push
//! messages and errors into, standing in for a transport's response
//! stream.
//!
//! # Threads
//!
//! Waiting is single-threaded: an [`Event`] may only be waited on by
//! tasks of its own scheduler.  Signalling is cross-thread:
//! [`Event::set`] and [`Event::clear`] may be called from anywhere,
//! including threads with no scheduler of their own.  Once a
//! scheduler has shut down, both calls are silently ignored, and
//! neither ever blocks the caller beyond a short internal lock.
//!
//! # Cargo features
//!
//! - **logger**: Enables [`Scheduler::set_logger`].  Without it, all
//! logging compiles down to nothing.
//!
//! # Example
//!
//! ```
//! use interlatch::{feed, read_with_interrupt, Scheduler};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use std::thread;
//!
//! let mut scheduler = Scheduler::new();
//! let interrupt = scheduler.event();
//! let (sender, mut responses) = feed::<String, std::io::Error>();
//!
//! // Transport thread producing a response
//! let transport = thread::spawn(move || {
//!     sender.send("hello".to_string());
//! });
//!
//! let result = Rc::new(RefCell::new(None));
//! let result2 = result.clone();
//! let interrupt2 = interrupt.clone();
//! scheduler.spawn(async move {
//!     let upper = |m: &String| m.to_uppercase();
//!     let outcome = read_with_interrupt(&mut responses, &interrupt2, Some(upper)).await;
//!     *result2.borrow_mut() = Some(outcome.map_err(|e| e.to_string()));
//! });
//!
//! // Wait until the read attempt has finished
//! scheduler.block_on(interrupt.wait());
//! transport.join().unwrap();
//!
//! assert!(interrupt.is_set());
//! let outcome = result.borrow_mut().take().unwrap();
//! assert_eq!(outcome, Ok(("hello".to_string(), Some("HELLO".to_string()))));
//! ```

// Insist on 2018 style
#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use crate::core::Scheduler;
pub use event::{Event, Wait};
pub use feed::{feed, Feed, FeedSender};
pub use log::{LogFilter, LogID, LogLevel, LogLevelError, LogRecord, LogVisitor};
pub use read::{
    read_next_with_interrupt, read_with_interrupt, InterruptibleRead, MessageSource, NoKey,
    ReadError, ReadNext,
};
pub use remote::{Remote, SchedulerGone};
pub use task::TaskKey;

// Static assertions
static_assertions::assert_not_impl_any!(Scheduler: Send, Sync);
static_assertions::assert_impl_all!(Remote: Send, Sync, Clone);
static_assertions::assert_impl_all!(Event: Send, Sync, Clone);
static_assertions::assert_impl_all!(FeedSender<u8, ()>: Send, Sync, Clone);
static_assertions::assert_impl_all!(Feed<u8, ()>: Send);
static_assertions::assert_not_impl_any!(Feed<u8, ()>: Clone);
static_assertions::assert_impl_all!(TaskKey: Copy, Clone);
static_assertions::assert_impl_all!(SchedulerGone: Copy, Clone);

mod core;
mod event;
mod feed;
mod log;
mod queue;
mod read;
mod remote;
mod task;

#[cfg(test)]
mod test;
