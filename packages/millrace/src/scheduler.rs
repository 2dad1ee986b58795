// process-wide task scheduler that serializes the channels' matching passes.
//
// `run` either executes the task immediately (if nothing is currently running) or enqueues it
// behind the running one. the call that found the scheduler idle keeps draining the queue
// until it is empty, so work submitted from inside a task never nests on the submitter's
// stack: a chain of match-triggers-match resolutions becomes an iterative drain loop with
// O(1) stack depth.

use std::{
    collections::VecDeque,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Mutex,
};

// unit of work submitted to the scheduler.
pub(crate) type Task = Box<dyn FnOnce() + Send>;

// the process-wide instance. all channels submit their matching passes here.
pub(crate) static SCHEDULER: Scheduler = Scheduler::new();

// reentrancy-safe work queue. see module comment.
pub(crate) struct Scheduler {
    inner: Mutex<Inner>,
}

struct Inner {
    // tasks submitted while another task was executing, in arrival order.
    queue: VecDeque<Task>,
    // whether some call to `run` is currently executing tasks.
    running: bool,
}

impl Scheduler {
    pub(crate) const fn new() -> Self {
        Scheduler {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                running: false,
            }),
        }
    }

    // execute `task` now, or enqueue it if a task is already executing.
    //
    // reentrant submissions (and submissions from other threads while a drain is active)
    // return immediately; the active drain picks them up in arrival order before it finishes.
    // the lock is only held for the execute-or-enqueue decision, never while a task runs.
    pub(crate) fn run(&self, task: impl FnOnce() + Send + 'static) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.running {
                inner.queue.push_back(Box::new(task));
                return;
            }
            inner.running = true;
        }
        execute(Box::new(task));
        loop {
            let next = {
                let mut inner = self.inner.lock().unwrap();
                match inner.queue.pop_front() {
                    Some(task) => task,
                    None => {
                        inner.running = false;
                        return;
                    }
                }
            };
            execute(next);
        }
    }
}

// run one task, containing any panic so the drain loop survives it.
fn execute(task: Task) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(move || task())) {
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned());
        error!("scheduler task panicked: {}", msg);
    }
}


// ==== tests ====


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    // tests use their own instance: the global one is shared with whatever channel tests are
    // running in parallel, which would make ordering assertions racy.
    fn scheduler() -> &'static Scheduler {
        Box::leak(Box::new(Scheduler::new()))
    }

    #[test]
    fn idle_scheduler_runs_task_before_returning() {
        let sched = scheduler();
        let hit = Arc::new(Mutex::new(false));
        let hit2 = Arc::clone(&hit);
        sched.run(move || *hit2.lock().unwrap() = true);
        assert!(*hit.lock().unwrap());
    }

    #[test]
    fn reentrant_submissions_drain_in_arrival_order() {
        let sched = scheduler();
        let log = Arc::new(Mutex::new(Vec::new()));
        let outer_log = Arc::clone(&log);
        sched.run(move || {
            outer_log.lock().unwrap().push(1);
            let inner_log = Arc::clone(&outer_log);
            sched.run(move || inner_log.lock().unwrap().push(3));
            let inner_log = Arc::clone(&outer_log);
            sched.run(move || inner_log.lock().unwrap().push(4));
            outer_log.lock().unwrap().push(2);
        });
        assert_eq!(*log.lock().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn long_resubmission_chain_does_not_grow_the_stack() {
        fn chain(sched: &'static Scheduler, left: u32, hits: Arc<Mutex<u32>>) {
            sched.run(move || {
                *hits.lock().unwrap() += 1;
                if left > 0 {
                    chain(sched, left - 1, Arc::clone(&hits));
                }
            });
        }

        let sched = scheduler();
        let hits = Arc::new(Mutex::new(0));
        // deep enough that recursive execution would overflow the stack
        chain(sched, 100_000, Arc::clone(&hits));
        assert_eq!(*hits.lock().unwrap(), 100_001);
    }

    #[test]
    fn panicking_task_does_not_stop_the_drain() {
        let sched = scheduler();
        let hit = Arc::new(Mutex::new(false));
        let hit2 = Arc::clone(&hit);
        sched.run(move || {
            let hit3 = Arc::clone(&hit2);
            sched.run(move || *hit3.lock().unwrap() = true);
            panic!("boom");
        });
        assert!(*hit.lock().unwrap());
    }
}
