// src/replay/queue.rs
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use crossbeam::channel::{RecvTimeoutError, Sender, bounded, unbounded};

use crate::core::logging::{ComponentLogger, LogContext};

type Task = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Task),
    RunAt(Instant, Task),
}

struct Timer {
    deadline: Instant,
    seq: u64,
    task: Task,
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Timer {}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timer {
    // Reversed so the BinaryHeap pops the earliest deadline first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct QueueInner {
    name: String,
    tx: Sender<Message>,
    thread_id: ThreadId,
}

/// Serial execution context backed by one worker thread.
///
/// Tasks run one at a time in post order. The worker exits once every
/// handle (including handles captured by queued tasks) is gone.
#[derive(Clone)]
pub struct ReplayQueue {
    inner: Arc<QueueInner>,
}

impl ReplayQueue {
    pub fn new(name: &str) -> anyhow::Result<Self> {
        let (tx, rx) = unbounded::<Message>();
        let worker_name = name.to_string();

        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut timers: BinaryHeap<Timer> = BinaryHeap::new();
                let mut timer_seq = 0u64;

                loop {
                    let now = Instant::now();
                    while timers.peek().is_some_and(|t| t.deadline <= now) {
                        if let Some(timer) = timers.pop() {
                            run_task(&worker_name, timer.task);
                        }
                    }

                    let msg = match timers.peek() {
                        Some(next) => match rx.recv_deadline(next.deadline) {
                            Ok(msg) => msg,
                            Err(RecvTimeoutError::Timeout) => continue,
                            Err(RecvTimeoutError::Disconnected) => break,
                        },
                        None => match rx.recv() {
                            Ok(msg) => msg,
                            Err(_) => break,
                        },
                    };

                    match msg {
                        Message::Run(task) => run_task(&worker_name, task),
                        Message::RunAt(deadline, task) => {
                            timer_seq += 1;
                            timers.push(Timer {
                                deadline,
                                seq: timer_seq,
                                task,
                            });
                        }
                    }
                }

                if !timers.is_empty() {
                    log::debug!(
                        "[{}] dropping {} pending delayed task(s)",
                        worker_name,
                        timers.len()
                    );
                }
                log::debug!("[{}] worker stopped", worker_name);
            })?;

        let queue = Self {
            inner: Arc::new(QueueInner {
                name: name.to_string(),
                tx,
                thread_id: handle.thread().id(),
            }),
        };
        queue.debug("worker started");
        Ok(queue)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn post<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.inner.tx.send(Message::Run(Box::new(task))).is_err() {
            self.warn("worker gone, task dropped");
        }
    }

    /// Runs `task` on the queue no earlier than `delay` from now.
    pub fn post_after<F>(&self, delay: Duration, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let deadline = Instant::now() + delay;
        if self
            .inner
            .tx
            .send(Message::RunAt(deadline, Box::new(task)))
            .is_err()
        {
            self.warn("worker gone, delayed task dropped");
        }
    }

    pub fn is_current(&self) -> bool {
        std::thread::current().id() == self.inner.thread_id
    }

    /// Runs `f` on the queue and waits for its result.
    ///
    /// Returns `None` when called from the queue itself or if the worker
    /// is gone.
    pub fn sync<T, F>(&self, f: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if self.is_current() {
            self.error("sync called on the queue thread");
            return None;
        }

        let (done_tx, done_rx) = bounded(1);
        self.post(move || {
            let _ = done_tx.send(f());
        });
        done_rx.recv().ok()
    }

    /// Blocks until every task posted before this call has run.
    pub fn flush(&self) {
        let _ = self.sync(|| ());
    }
}

impl ComponentLogger for ReplayQueue {
    fn log_context(&self) -> LogContext {
        LogContext::new("ReplayQueue", &self.inner.name)
    }
}

fn run_task(name: &str, task: Task) {
    if catch_unwind(AssertUnwindSafe(task)).is_err() {
        log::error!("[{}] task panicked", name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_tasks_run_in_post_order() {
        let queue = ReplayQueue::new("test-order").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..100 {
            let seen = seen.clone();
            queue.post(move || seen.lock().unwrap().push(i));
        }
        queue.flush();

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_is_current() {
        let queue = ReplayQueue::new("test-current").unwrap();
        assert!(!queue.is_current());

        let q = queue.clone();
        assert_eq!(queue.sync(move || q.is_current()), Some(true));
    }

    #[test]
    fn test_sync_from_queue_refuses() {
        let queue = ReplayQueue::new("test-nested").unwrap();
        let q = queue.clone();
        let nested = queue.sync(move || q.sync(|| 1));
        assert_eq!(nested, Some(None));
    }

    #[test]
    fn test_post_after_runs_later_and_in_deadline_order() {
        let queue = ReplayQueue::new("test-delay").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let start = Instant::now();

        let s = seen.clone();
        queue.post_after(Duration::from_millis(80), move || s.lock().unwrap().push("late"));
        let s = seen.clone();
        queue.post_after(Duration::from_millis(20), move || s.lock().unwrap().push("early"));
        let s = seen.clone();
        queue.post(move || s.lock().unwrap().push("now"));

        std::thread::sleep(Duration::from_millis(200));
        queue.flush();

        assert_eq!(*seen.lock().unwrap(), vec!["now", "early", "late"]);
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[test]
    fn test_panicking_task_does_not_kill_worker() {
        let queue = ReplayQueue::new("test-panic").unwrap();
        queue.post(|| panic!("boom"));
        assert_eq!(queue.sync(|| 5), Some(5));
    }
}
