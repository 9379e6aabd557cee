use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use skwatch::tasks::dispatcher::Dispatcher;

const PRODUCERS: usize = 4;
const TASKS_PER_PRODUCER: usize = 25;

#[test]
fn producers_keep_their_order_and_tasks_never_overlap() {
    let dispatcher = Dispatcher::with_capacity(8).unwrap();
    let busy = Arc::new(AtomicBool::new(false));
    let overlapped = Arc::new(AtomicBool::new(false));
    let log = Arc::new(Mutex::new(Vec::new()));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let handle = dispatcher.handle();
            let busy = Arc::clone(&busy);
            let overlapped = Arc::clone(&overlapped);
            let log = Arc::clone(&log);
            thread::spawn(move || {
                for seq in 0..TASKS_PER_PRODUCER {
                    let busy = Arc::clone(&busy);
                    let overlapped = Arc::clone(&overlapped);
                    let log = Arc::clone(&log);
                    handle
                        .run_async("produce", move || {
                            if busy.swap(true, Ordering::SeqCst) {
                                overlapped.store(true, Ordering::SeqCst);
                            }
                            log.lock().unwrap().push((producer, seq));
                            thread::yield_now();
                            busy.store(false, Ordering::SeqCst);
                        })
                        .unwrap();
                }
            })
        })
        .collect();

    for producer in producers {
        producer.join().unwrap();
    }
    dispatcher.join().unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log.len(), PRODUCERS * TASKS_PER_PRODUCER);
    assert!(!overlapped.load(Ordering::SeqCst));
    for producer in 0..PRODUCERS {
        let seen: Vec<usize> = log
            .iter()
            .filter(|(p, _)| *p == producer)
            .map(|(_, seq)| *seq)
            .collect();
        assert_eq!(seen, (0..TASKS_PER_PRODUCER).collect::<Vec<_>>());
    }
}

#[test]
fn callbacks_never_run_on_the_caller() {
    let dispatcher = Dispatcher::start().unwrap();
    let caller = thread::current().id();
    let ran_on = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&ran_on);
    dispatcher
        .run_async("where", move || {
            *sink.lock().unwrap() = Some(thread::current().id());
        })
        .unwrap();
    dispatcher.join().unwrap();

    let ran_on = ran_on.lock().unwrap().expect("task ran");
    assert_ne!(ran_on, caller);
}
