//! Test `Scheduler` and `Remote`

use super::notify_channel;
use crate::*;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

#[test]
fn spawn_and_run() {
    let mut scheduler = Scheduler::new();
    let s = &mut scheduler;
    let done = Rc::new(Cell::new(0));

    let done2 = done.clone();
    let key1 = s.spawn(async move { done2.set(done2.get() + 1) });
    let done2 = done.clone();
    let key2 = s.spawn(async move { done2.set(done2.get() + 10) });
    assert_eq!(1, key1.seq());
    assert_eq!(2, key2.seq());
    assert_ne!(key1, key2);

    // Nothing runs until `run`
    assert_eq!(0, done.get());
    assert_eq!(2, s.task_count());
    assert!(s.is_pending(key1));

    assert!(!s.run());
    assert_eq!(11, done.get());
    assert_eq!(0, s.task_count());
    assert!(!s.is_pending(key1));
    assert!(!s.is_pending(key2));
}

#[test]
fn stale_key_does_not_match_reused_slot() {
    let mut scheduler = Scheduler::new();
    let s = &mut scheduler;

    let old = s.spawn(async {});
    s.run();
    let new = s.spawn(std::future::pending());
    assert!(!s.is_pending(old));
    assert!(s.is_pending(new));
    assert!(!s.cancel(old));
    assert!(s.is_pending(new));
    assert!(s.cancel(new));
    assert_eq!(0, s.task_count());
}

#[test]
fn defer_runs_in_order() {
    let mut scheduler = Scheduler::new();
    let s = &mut scheduler;
    let order = Rc::new(RefCell::new(Vec::new()));

    for i in 0..3 {
        let order = order.clone();
        s.defer(move |s| {
            order.borrow_mut().push(i);
            // Deferred from within the queue, so runs after the rest
            let order = order.clone();
            s.defer(move |_| order.borrow_mut().push(i + 10));
        });
    }
    assert!(order.borrow().is_empty());
    s.run();
    assert_eq!(vec![0, 1, 2, 10, 11, 12], *order.borrow());
}

#[test]
fn call_soon_runs_in_submission_order() {
    let mut scheduler = Scheduler::new();
    let s = &mut scheduler;
    let order = Arc::new(Mutex::new(Vec::new()));
    let remote = s.remote();
    assert!(remote.is_owner_thread());

    let order2 = order.clone();
    thread::spawn(move || {
        assert!(!remote.is_owner_thread());
        for i in 0..100 {
            let order = order2.clone();
            remote
                .call_soon(move |_| order.lock().unwrap().push(i))
                .unwrap();
        }
    })
    .join()
    .unwrap();

    assert!(order.lock().unwrap().is_empty());
    s.run();
    assert_eq!((0..100).collect::<Vec<_>>(), *order.lock().unwrap());
}

#[test]
fn local_queue_runs_before_inbox() {
    let mut scheduler = Scheduler::new();
    let s = &mut scheduler;
    let order = Arc::new(Mutex::new(Vec::new()));

    let order2 = order.clone();
    let remote = s.remote();
    thread::spawn(move || {
        remote
            .call_soon(move |_| order2.lock().unwrap().push("remote"))
            .unwrap();
    })
    .join()
    .unwrap();
    let order2 = order.clone();
    s.defer(move |_| order2.lock().unwrap().push("local"));

    s.run();
    assert_eq!(vec!["local", "remote"], *order.lock().unwrap());
}

#[test]
fn remote_identity() {
    let s1 = Scheduler::new();
    let s2 = Scheduler::new();
    let r1 = s1.remote();
    assert!(r1.same_scheduler(&s1.remote()));
    assert!(r1.same_scheduler(s1.event().remote()));
    assert!(!r1.same_scheduler(&s2.remote()));
}

#[test]
fn submit_after_shutdown() {
    let mut scheduler = Scheduler::new();
    let s = &mut scheduler;
    let remote = s.remote();
    let ran = Arc::new(AtomicUsize::new(0));

    let ran2 = ran.clone();
    remote
        .call_soon(move |_| {
            ran2.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    assert!(!s.is_shutdown());
    s.shutdown();
    assert!(s.is_shutdown());
    assert!(remote.is_closed());

    let ran2 = ran.clone();
    let result = remote.call_soon(move |_| {
        ran2.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(Err(SchedulerGone), result);
    assert_eq!("scheduler has shut down", SchedulerGone.to_string());

    // Both the queued closure and the rejected one were dropped
    s.run();
    assert_eq!(0, ran.load(Ordering::SeqCst));
    assert_eq!(1, Arc::strong_count(&ran));

    // Local operation continues
    let ran2 = ran.clone();
    s.defer(move |_| {
        ran2.fetch_add(1, Ordering::SeqCst);
    });
    s.run();
    assert_eq!(1, ran.load(Ordering::SeqCst));
}

#[test]
fn submit_after_drop() {
    let scheduler = Scheduler::new();
    let remote = scheduler.remote();
    drop(scheduler);
    let result = thread::spawn(move || remote.call_soon(|_| ()))
        .join()
        .unwrap();
    assert_eq!(Err(SchedulerGone), result);
}

#[test]
fn poll_waker_called_when_inbox_fills() {
    let mut scheduler = Scheduler::new();
    let s = &mut scheduler;
    let calls = Arc::new(AtomicUsize::new(0));
    let calls2 = calls.clone();
    s.set_poll_waker(move || {
        calls2.fetch_add(1, Ordering::SeqCst);
    });

    let remote = s.remote();
    thread::spawn(move || {
        remote.call_soon(|_| ()).unwrap();
        remote.call_soon(|_| ()).unwrap();
    })
    .join()
    .unwrap();
    // Only the first submission found the inbox empty
    assert_eq!(1, calls.load(Ordering::SeqCst));

    s.run();
    s.remote().call_soon(|_| ()).unwrap();
    assert_eq!(2, calls.load(Ordering::SeqCst));
}

// An outer event loop woken by the poll-waker, standing in for a
// host loop that embeds the scheduler
#[test]
fn external_event_loop() {
    let mut scheduler = Scheduler::new();
    let s = &mut scheduler;
    let event = s.event();
    let (wake_tx, mut wake_rx) = notify_channel();
    s.set_poll_waker(wake_tx);

    let resumed = Rc::new(Cell::new(false));
    let resumed2 = resumed.clone();
    let event2 = event.clone();
    s.spawn(async move {
        event2.wait().await;
        resumed2.set(true);
    });
    s.run();

    let event3 = event.clone();
    let setter = thread::spawn(move || event3.set());
    while s.run() {
        wake_rx();
    }
    setter.join().unwrap();
    assert!(resumed.get());
    assert!(event.is_set());
}

#[test]
#[should_panic(expected = "called more than once")]
fn poll_waker_set_twice() {
    let mut scheduler = Scheduler::new();
    scheduler.set_poll_waker(|| ());
    scheduler.set_poll_waker(|| ());
}

#[test]
#[should_panic(expected = "external poll-waker")]
fn block_on_with_external_poll_waker() {
    let mut scheduler = Scheduler::new();
    scheduler.set_poll_waker(|| ());
    scheduler.block_on(async {});
}

#[test]
#[should_panic(expected = "called more than once")]
fn poll_waker_after_block_on() {
    let mut scheduler = Scheduler::new();
    scheduler.block_on(async {});
    scheduler.set_poll_waker(|| ());
}

#[test]
fn block_on_returns_output() {
    let mut scheduler = Scheduler::new();
    let s = &mut scheduler;
    assert_eq!(42, s.block_on(async { 42 }));

    // Runs other tasks alongside the root, and can be called again
    let event = s.event();
    let event2 = event.clone();
    s.spawn(async move { event2.set() });
    let event3 = event.clone();
    let text = s.block_on(async move {
        event3.wait().await;
        "done"
    });
    assert_eq!("done", text);
}

#[test]
fn block_on_with_foreign_submissions() {
    let mut scheduler = Scheduler::new();
    let s = &mut scheduler;
    let event = s.event();
    let remote = s.remote();
    let count = Rc::new(Cell::new(0));

    // Closures submitted through the remote can't capture the `Rc`,
    // so they reach task-owned state through an event
    let threads: Vec<_> = (0..4)
        .map(|_| {
            let remote = remote.clone();
            let event = event.clone();
            thread::spawn(move || {
                remote
                    .call_soon(move |s| {
                        s.defer(move |_| event.set());
                    })
                    .unwrap();
            })
        })
        .collect();

    let count2 = count.clone();
    let event2 = event.clone();
    s.block_on(async move {
        event2.wait().await;
        count2.set(count2.get() + 1);
    });
    for t in threads {
        t.join().unwrap();
    }
    assert_eq!(1, count.get());
    assert!(event.is_set());
}

#[test]
fn cancel_drops_future() {
    struct DropFlag(Rc<Cell<bool>>);
    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.set(true);
        }
    }

    let mut scheduler = Scheduler::new();
    let s = &mut scheduler;
    let dropped = Rc::new(Cell::new(false));
    let flag = DropFlag(dropped.clone());
    let key = s.spawn(async move {
        let _flag = flag;
        std::future::pending::<()>().await;
    });
    s.run();
    assert!(!dropped.get());
    assert!(s.cancel(key));
    assert!(dropped.get());
    assert!(!s.run());
}

#[test]
fn wake_of_cancelled_task_is_ignored() {
    let mut scheduler = Scheduler::new();
    let s = &mut scheduler;
    let event = s.event();
    let event2 = event.clone();
    let key = s.spawn(async move { event2.wait().await });
    s.run();
    assert!(s.cancel(key));

    // The wait was dropped along with the task
    assert_eq!(0, event.waiter_count());
    event.set();
    assert!(!s.run());
}

#[test]
fn drop_runs_task_destructors_before_shutdown() {
    let other = Scheduler::new();
    let event = other.event();
    let remote = other.remote();

    let mut scheduler = Scheduler::new();
    let s = &mut scheduler;
    let mine = s.remote();
    let (_tx, mut rx) = feed::<(), ()>();
    let event2 = event.clone();
    s.spawn(async move {
        let _ = read_next_with_interrupt(&mut rx, &event2).await;
    });
    s.run();
    drop(scheduler);

    assert!(mine.is_closed());
    assert!(!remote.is_closed());
    assert!(event.is_set());
}

#[test]
fn run_queue_keeps_local_calls_ahead_of_inbox() {
    use crate::queue::RunQueue;

    let mut scheduler = Scheduler::new();
    let order = Rc::new(RefCell::new(Vec::new()));
    let submitted = Arc::new(Mutex::new(Vec::new()));
    let mut queue = RunQueue::new();
    assert!(queue.is_empty());

    let order2 = order.clone();
    queue.push(move |_| order2.borrow_mut().push("local"));
    let remote = scheduler.remote();
    for name in ["first", "second"] {
        let submitted = submitted.clone();
        remote
            .call_soon(move |_| submitted.lock().unwrap().push(name))
            .unwrap();
    }
    queue.extend_from_inbox(remote.drain());
    assert!(!queue.is_empty());

    queue.execute(&mut scheduler);
    assert!(queue.is_empty());
    assert_eq!(vec!["local"], *order.borrow());
    assert_eq!(vec!["first", "second"], *submitted.lock().unwrap());
}

#[test]
fn no_task_resumes_after_shutdown() {
    let mut scheduler = Scheduler::new();
    let s = &mut scheduler;
    let (tx, mut rx) = feed::<u32, ()>();
    let resumed = Rc::new(Cell::new(false));
    let resumed2 = resumed.clone();
    let key = s.spawn(async move {
        let _ = rx.read_next().await;
        resumed2.set(true);
    });
    s.run();
    s.shutdown();

    // The wake comes from the owning thread, but still goes through
    // the closed inbox
    assert!(tx.send(1));
    assert!(s.run());
    assert!(!resumed.get());
    assert!(s.is_pending(key));
    assert_eq!(1, s.task_count());

    // Local calls still run
    let resumed2 = resumed.clone();
    s.defer(move |_| resumed2.set(true));
    s.run();
    assert!(resumed.get());
    assert!(s.cancel(key));
}

#[test]
fn panicking_task_is_removed() {
    use std::panic::{catch_unwind, AssertUnwindSafe};

    let mut scheduler = Scheduler::new();
    let s = &mut scheduler;
    let (tx, mut rx) = feed::<u32, ()>();
    tx.send(1);

    let key = s.spawn(async move {
        let _ = rx.read_next().await;
        panic!("task failed");
    });
    assert!(s.is_pending(key));
    let result = catch_unwind(AssertUnwindSafe(|| s.run()));
    assert!(result.is_err());

    // The slot is gone and the future was dropped during unwind
    assert!(!s.is_pending(key));
    assert_eq!(0, s.task_count());
    assert!(!s.cancel(key));
    assert!(tx.is_reader_gone());
}

#[test]
#[should_panic(expected = "Previous run call must have panicked")]
fn run_after_task_panic() {
    use std::panic::{catch_unwind, AssertUnwindSafe};

    let mut scheduler = Scheduler::new();
    scheduler.spawn(async { panic!("task failed") });
    let _ = catch_unwind(AssertUnwindSafe(|| scheduler.run()));
    scheduler.run();
}
