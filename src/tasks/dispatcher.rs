// SkWatch - Async Task Dispatcher
//
// A single worker thread that runs queued callbacks one at a time, in the
// order they were queued. Long operations (network calls, vibration
// patterns, scans) go here instead of stalling the main loop.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use crate::config::*;
use crate::error::{Error, Result};

pub type TaskName = heapless::String<ASYNC_TASK_NAME_MAX>;

/// A named unit of deferred work.
pub struct AsyncTask {
    pub name: TaskName,
    pub callback: Box<dyn FnOnce() + Send>,
}

impl AsyncTask {
    pub fn new(name: &str, callback: impl FnOnce() + Send + 'static) -> Self {
        Self {
            name: task_name(name),
            callback: Box::new(callback),
        }
    }
}

/// Truncate to the fixed name capacity on a char boundary.
fn task_name(name: &str) -> TaskName {
    let mut out = TaskName::new();
    for c in name.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

struct QueueState {
    tasks: VecDeque<AsyncTask>,
    // Live `DispatcherHandle`s; the worker exits once this reaches zero and
    // the queue is empty.
    handles: usize,
    running: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    task_ready: Condvar,
    space_free: Condvar,
    capacity: usize,
    worker: OnceLock<ThreadId>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_task(&self) -> Option<AsyncTask> {
        let mut state = self.lock();
        loop {
            if let Some(task) = state.tasks.pop_front() {
                self.space_free.notify_one();
                return Some(task);
            }
            if state.handles == 0 {
                return None;
            }
            state = self
                .task_ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Cloneable enqueue side of the dispatcher.
pub struct DispatcherHandle {
    shared: Arc<Shared>,
}

impl DispatcherHandle {
    /// Queue `callback` behind every task queued before it. Blocks while the
    /// queue is full; never runs the callback inline.
    pub fn run_async(&self, name: &str, callback: impl FnOnce() + Send + 'static) -> Result<()> {
        self.enqueue(AsyncTask::new(name, callback))
    }

    /// Tasks queued from inside a running task never wait for space: the
    /// worker is the only thread that frees it.
    pub fn enqueue(&self, task: AsyncTask) -> Result<()> {
        let shared = &self.shared;
        let from_worker = shared.worker.get() == Some(&thread::current().id());

        let mut state = shared.lock();
        while !from_worker && state.running && state.tasks.len() >= shared.capacity {
            state = shared
                .space_free
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if !state.running {
            log::error!("Async task {} rejected, dispatcher is gone", task.name);
            return Err(Error::DispatcherStopped);
        }
        if from_worker && state.tasks.len() >= shared.capacity {
            log::debug!("Async queue over capacity, {} queued from a task", task.name);
        }
        state.tasks.push_back(task);
        drop(state);
        shared.task_ready.notify_one();
        Ok(())
    }
}

impl Clone for DispatcherHandle {
    fn clone(&self) -> Self {
        self.shared.lock().handles += 1;
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for DispatcherHandle {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.handles -= 1;
        if state.handles == 0 {
            self.shared.task_ready.notify_all();
        }
    }
}

/// Owner of the worker thread.
pub struct Dispatcher {
    handle: DispatcherHandle,
    worker: JoinHandle<()>,
}

impl Dispatcher {
    pub fn start() -> anyhow::Result<Self> {
        Self::with_capacity(ASYNC_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> anyhow::Result<Self> {
        log::info!("Initializing async task dispatcher...");
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                tasks: VecDeque::with_capacity(capacity),
                handles: 1,
                running: true,
            }),
            task_ready: Condvar::new(),
            space_free: Condvar::new(),
            capacity: capacity.max(1),
            worker: OnceLock::new(),
        });
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("async".into())
            .stack_size(STACK_ASYNC)
            .spawn(move || dispatcher_task(worker_shared))?;

        Ok(Self {
            handle: DispatcherHandle { shared },
            worker,
        })
    }

    pub fn handle(&self) -> DispatcherHandle {
        self.handle.clone()
    }

    pub fn run_async(&self, name: &str, callback: impl FnOnce() + Send + 'static) -> Result<()> {
        self.handle.run_async(name, callback)
    }

    /// Stop accepting work from this owner and wait for the worker to drain
    /// the queue. Returns once every outstanding handle is dropped too.
    pub fn join(self) -> thread::Result<()> {
        drop(self.handle);
        self.worker.join()
    }
}

/// Marks the dispatcher stopped when the worker exits, including by panic,
/// and releases producers blocked on a full queue.
struct StopOnExit<'a>(&'a Shared);

impl Drop for StopOnExit<'_> {
    fn drop(&mut self) {
        let mut state = self.0.lock();
        state.running = false;
        let abandoned = std::mem::take(&mut state.tasks);
        drop(state);
        self.0.space_free.notify_all();
        // Dropped unlocked: a callback may own a handle.
        drop(abandoned);
    }
}

/// Worker loop: wait for the next task, run it to completion, repeat.
/// A panicking callback takes the worker down with it.
fn dispatcher_task(shared: Arc<Shared>) {
    let _ = shared.worker.set(thread::current().id());
    let _stop = StopOnExit(&shared);
    log::info!("Async task dispatcher started!");

    while let Some(task) = shared.next_task() {
        log::info!("Starting task {}", task.name);
        (task.callback)();
        log::info!("Task finished {}", task.name);
    }

    log::info!("Async task dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[test]
    fn tasks_run_once_each_in_order_without_overlap() {
        let dispatcher = Dispatcher::with_capacity(4).unwrap();
        let running = Arc::new(AtomicBool::new(false));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..20usize {
            let running = Arc::clone(&running);
            let overlaps = Arc::clone(&overlaps);
            let order = Arc::clone(&order);
            dispatcher
                .run_async("step", move || {
                    if running.swap(true, Ordering::SeqCst) {
                        overlaps.fetch_add(1, Ordering::SeqCst);
                    }
                    thread::sleep(Duration::from_millis(1));
                    order.lock().unwrap().push(i);
                    running.store(false, Ordering::SeqCst);
                })
                .unwrap();
        }

        dispatcher.join().unwrap();

        assert_eq!(*order.lock().unwrap(), (0..20).collect::<Vec<_>>());
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn task_queued_from_a_task_waits_its_turn() {
        let dispatcher = Dispatcher::start().unwrap();
        let handle = dispatcher.handle();
        let order = Arc::new(Mutex::new(Vec::new()));

        {
            let order = Arc::clone(&order);
            let inner_order = Arc::clone(&order);
            dispatcher
                .run_async("outer", move || {
                    handle
                        .run_async("inner", move || inner_order.lock().unwrap().push("inner"))
                        .unwrap();
                    order.lock().unwrap().push("outer");
                })
                .unwrap();
        }

        dispatcher.join().unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["outer", "inner"]);
    }

    #[test]
    fn long_names_are_truncated() {
        let name = "a-very-long-task-name-that-does-not-fit-the-slot";
        let task = AsyncTask::new(name, || {});
        assert_eq!(task.name.len(), ASYNC_TASK_NAME_MAX);
        assert!(name.starts_with(task.name.as_str()));
    }

    #[test]
    fn panicking_task_stops_the_dispatcher() {
        let dispatcher = Dispatcher::start().unwrap();
        let handle = dispatcher.handle();
        dispatcher.run_async("boom", || panic!("task failure")).unwrap();

        // The worker is gone once join reports the panic.
        let outcome = {
            let Dispatcher { handle: owner, worker } = dispatcher;
            drop(owner);
            worker.join()
        };
        assert!(outcome.is_err());
        assert_eq!(handle.run_async("late", || {}), Err(Error::DispatcherStopped));
    }

    #[test]
    fn task_can_queue_past_a_full_dispatcher() {
        let dispatcher = Dispatcher::with_capacity(1).unwrap();
        let handle = dispatcher.handle();
        let order = Arc::new(Mutex::new(Vec::new()));

        let outer_order = Arc::clone(&order);
        dispatcher
            .run_async("outer", move || {
                for i in 0..3 {
                    let order = Arc::clone(&outer_order);
                    handle
                        .run_async("inner", move || order.lock().unwrap().push(i))
                        .unwrap();
                }
                outer_order.lock().unwrap().push(100);
            })
            .unwrap();

        dispatcher.join().unwrap();
        assert_eq!(*order.lock().unwrap(), vec![100, 0, 1, 2]);
    }

    #[test]
    fn full_queue_blocks_other_producers_until_space_frees() {
        let dispatcher = Dispatcher::with_capacity(1).unwrap();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let done = Arc::new(AtomicUsize::new(0));

        dispatcher
            .run_async("gate", move || {
                let _ = release_rx.recv();
            })
            .unwrap();

        let producer = {
            let handle = dispatcher.handle();
            let done = Arc::clone(&done);
            thread::spawn(move || {
                for _ in 0..3 {
                    let done = Arc::clone(&done);
                    handle
                        .run_async("count", move || {
                            done.fetch_add(1, Ordering::SeqCst);
                        })
                        .unwrap();
                }
            })
        };

        thread::sleep(Duration::from_millis(20));
        assert_eq!(done.load(Ordering::SeqCst), 0);
        release_tx.send(()).unwrap();
        producer.join().unwrap();
        dispatcher.join().unwrap();
        assert_eq!(done.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn panicking_task_with_a_backtrace_still_only_stops_the_worker() {
        let dispatcher = Dispatcher::start().unwrap();
        let handle = dispatcher.handle();
        dispatcher
            .run_async("boom", || {
                let trace = std::backtrace::Backtrace::force_capture().to_string();
                panic!("task failure after {} bytes of backtrace", trace.len());
            })
            .unwrap();

        let outcome = {
            let Dispatcher { handle: owner, worker } = dispatcher;
            drop(owner);
            worker.join()
        };
        assert!(outcome.is_err());
        assert_eq!(handle.run_async("late", || {}), Err(Error::DispatcherStopped));
    }
}
