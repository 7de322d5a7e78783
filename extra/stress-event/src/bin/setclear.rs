//! Many threads set and clear one event at the same time, whilst a
//! task of the owning scheduler keeps waiting on it.  Each thread's
//! requests are applied in order, and requests from different threads
//! interleave in some order, but whatever the interleaving, the
//! waiting task must never resume whilst the event is cleared, and it
//! must resume once the last applied request is a set.  This test
//! checks that both hold, round after round.

use interlatch::{Event, Scheduler};
use std::cell::Cell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier, Condvar, Mutex};
use std::thread;

/// Number of signalling threads
const THREADS: usize = 8;
/// Number of set/clear requests per thread per round
const REQUESTS: usize = 500;
/// Number of times to repeat the test
const REPEAT: usize = 1000;

/// Counts poll-waker calls, and lets the main loop block until the
/// count moves past what it has already seen
#[derive(Clone, Default)]
struct PollCount(Arc<(Mutex<u64>, Condvar)>);

impl PollCount {
    fn bump(&self) {
        let mut count = self.0 .0.lock().unwrap();
        *count += 1;
        self.0 .1.notify_one();
    }

    /// Wait for at least one poll-waker call since `seen`, then
    /// update `seen`
    fn wait(&self, seen: &mut u64) {
        let mut count = self.0 .0.lock().unwrap();
        while *count == *seen {
            count = self.0 .1.wait(count).unwrap();
        }
        *seen = *count;
    }
}

fn spawn_waiter(s: &mut Scheduler, event: &Event, resumes: &Rc<Cell<usize>>) {
    let event = event.clone();
    let resumes = resumes.clone();
    s.spawn(async move {
        loop {
            event.wait().await;
            if !event.is_set() {
                println!("ERROR: Waiter resumed with the event cleared");
                std::process::exit(1);
            }
            resumes.set(resumes.get() + 1);
            event.clear();
        }
    });
}

fn main() {
    let mut scheduler = Scheduler::new();
    let s = &mut scheduler;
    let polls = PollCount::default();
    let polls2 = polls.clone();
    s.set_poll_waker(move || polls2.bump());
    let mut seen = 0;

    let event = s.event();
    let resumes = Rc::new(Cell::new(0));
    spawn_waiter(s, &event, &resumes);
    s.run();

    for round in 0..REPEAT {
        let start = Arc::new(Barrier::new(THREADS));
        let threads: Vec<_> = (0..THREADS)
            .map(|i| {
                let event = event.clone();
                let start = start.clone();
                thread::spawn(move || {
                    start.wait();
                    for j in 0..REQUESTS {
                        if (i + j + round) % 3 == 0 {
                            event.set();
                        } else {
                            event.clear();
                        }
                    }
                })
            })
            .collect();

        // Run the scheduler concurrently with the signalling threads.
        // The joiner flags completion and then submits, so the final
        // wait always has a poll-waker call to return on.
        let done = Arc::new(AtomicBool::new(false));
        let done2 = done.clone();
        let remote = s.remote();
        let joiner = thread::spawn(move || {
            for t in threads {
                t.join().unwrap();
            }
            done2.store(true, Ordering::SeqCst);
            let _ = remote.call_soon(|_| ());
        });
        while !done.load(Ordering::SeqCst) {
            polls.wait(&mut seen);
            s.run();
        }
        joiner.join().unwrap();
        s.run();

        // Everything is applied now.  A final set must reach the
        // waiter, which clears the event again.
        let before = resumes.get();
        let event2 = event.clone();
        thread::spawn(move || event2.set()).join().unwrap();
        polls.wait(&mut seen);
        s.run();
        if resumes.get() != before + 1 || event.is_set() {
            println!("ERROR: Final set was not delivered in round {}", round);
            std::process::exit(1);
        }
        if round % 100 == 99 {
            println!(
                "{} rounds, {} resumes, {} poll-waker calls",
                round + 1,
                resumes.get(),
                seen
            );
        }
    }
    println!("SUCCESS");
}
