//! A small single-threaded reactor: local tasks plus an idle queue.
//!
//! Everything the service owns lives on the thread running this loop. Other
//! threads only ever reach it through wakers (and the channels they wake).

use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};
use std::thread::{self, Thread};

use crossbeam_channel::{Receiver, Sender};
use slotmap::{SlotMap, new_key_type};
use tracing::trace;

new_key_type! {
    pub struct TaskId;
    pub struct IdleId;
}

type LocalTask = Pin<Box<dyn Future<Output = ()> + 'static>>;

thread_local! {
    static HANDLE: Handle = Handle::new();
}

struct Handle(Rc<RefCell<State>>);

impl Handle {
    fn new() -> Self {
        let (wake_tx, woken) = crossbeam_channel::unbounded();
        Handle(Rc::new(RefCell::new(State {
            tasks: SlotMap::default(),
            idle: SlotMap::default(),
            idle_order: VecDeque::new(),
            wake_tx,
            woken,
            thread: thread::current(),
        })))
    }
}

struct State {
    // A slot holds `None` while its task is being polled.
    tasks: SlotMap<TaskId, Option<LocalTask>>,
    idle: SlotMap<IdleId, Box<dyn FnOnce()>>,
    idle_order: VecDeque<IdleId>,
    wake_tx: Sender<TaskId>,
    woken: Receiver<TaskId>,
    thread: Thread,
}

struct TaskWaker {
    id: TaskId,
    tx: Sender<TaskId>,
    thread: Thread,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) { self.wake_by_ref(); }

    fn wake_by_ref(self: &Arc<Self>) {
        _ = self.tx.send(self.id);
        self.thread.unpark();
    }
}

/// Spawns a future on the current thread's loop. It is first polled on the
/// next [`iterate`].
pub fn spawn(task: impl Future<Output = ()> + 'static) -> TaskId {
    HANDLE.with(|handle| {
        let mut state = handle.0.borrow_mut();
        let id = state.tasks.insert(Some(Box::pin(task)));
        _ = state.wake_tx.send(id);
        id
    })
}

/// Queues `callback` to run once on the next idle turn.
pub fn idle_add(callback: impl FnOnce() + 'static) -> IdleId {
    HANDLE.with(|handle| {
        let mut state = handle.0.borrow_mut();
        let id = state.idle.insert(Box::new(callback));
        state.idle_order.push_back(id);
        id
    })
}

/// Removes a queued idle callback. Returns false if it already ran.
pub fn idle_remove(id: IdleId) -> bool {
    HANDLE.with(|handle| handle.0.borrow_mut().idle.remove(id).is_some())
}

pub fn has_pending() -> bool {
    HANDLE.with(|handle| {
        let state = handle.0.borrow();
        !state.idle.is_empty() || !state.woken.is_empty()
    })
}

/// Runs one turn: every task woken so far, then every idle callback queued
/// before the turn began. Returns whether anything ran.
pub fn iterate() -> bool {
    let mut woken: Vec<TaskId> =
        HANDLE.with(|handle| handle.0.borrow().woken.try_iter().collect());
    woken.dedup();

    let mut ran = false;
    for id in woken {
        ran |= poll_task(id);
    }

    let batch: Vec<IdleId> =
        HANDLE.with(|handle| handle.0.borrow_mut().idle_order.drain(..).collect());
    for id in batch {
        let callback = HANDLE.with(|handle| handle.0.borrow_mut().idle.remove(id));
        if let Some(callback) = callback {
            callback();
            ran = true;
        }
    }
    ran
}

/// Iterates until neither tasks nor idle callbacks are ready.
pub fn run_until_idle() { while iterate() {} }

/// Gives up the rest of this turn, so queued idle callbacks run before the
/// calling task continues.
pub fn yield_now() -> impl Future<Output = ()> {
    let mut yielded = false;
    std::future::poll_fn(move |cx| {
        if yielded {
            return Poll::Ready(());
        }
        yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    })
}

fn poll_task(id: TaskId) -> bool {
    let Some((mut task, waker)) = HANDLE.with(|handle| {
        let mut state = handle.0.borrow_mut();
        let waker = Waker::from(Arc::new(TaskWaker {
            id,
            tx: state.wake_tx.clone(),
            thread: state.thread.clone(),
        }));
        let task = state.tasks.get_mut(id)?.take()?;
        Some((task, waker))
    }) else {
        return false;
    };

    let mut context = Context::from_waker(&waker);
    let done = task.as_mut().poll(&mut context).is_ready();

    HANDLE.with(|handle| {
        let mut state = handle.0.borrow_mut();
        if done {
            trace!(?id, "task finished");
            state.tasks.remove(id);
        } else if let Some(slot) = state.tasks.get_mut(id) {
            *slot = Some(task);
        }
    });
    true
}

pub struct MainLoop;

impl MainLoop {
    /// Runs the loop on the current thread until `main` completes.
    pub fn run(main: impl Future<Output = ()> + 'static) {
        let done = Rc::new(std::cell::Cell::new(false));
        let flag = done.clone();
        let id = spawn(async move {
            main.await;
            flag.set(true);
        });

        struct Guard(TaskId);
        impl Drop for Guard {
            fn drop(&mut self) {
                HANDLE.with(|handle| {
                    handle.0.borrow_mut().tasks.remove(self.0);
                })
            }
        }
        let _guard = Guard(id);

        while !done.get() {
            if !iterate() && !done.get() && !has_pending() {
                thread::park();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::panic::{self, AssertUnwindSafe};
    use std::rc::Rc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn run_returns_when_main_finishes() {
        MainLoop::run(async {});

        let steps = Rc::new(Cell::new(0));
        let counter = steps.clone();
        MainLoop::run(async move {
            counter.set(1);
            yield_now().await;
            yield_now().await;
            counter.set(counter.get() + 1);
        });
        assert_eq!(steps.get(), 2);
    }

    #[test]
    fn panicking_main_is_dropped() {
        struct Flag(Rc<Cell<bool>>);
        impl Drop for Flag {
            fn drop(&mut self) { self.0.set(true); }
        }

        let dropped = Rc::new(Cell::new(false));
        let flag = AssertUnwindSafe(Flag(dropped.clone()));
        let outcome = panic::catch_unwind(move || {
            MainLoop::run(async move {
                let _flag = flag;
                yield_now().await;
                panic!("main task failed");
            });
        });
        assert!(outcome.is_err());
        assert!(dropped.get());
    }

    #[test]
    fn idle_callbacks_run_in_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        for n in 0..3 {
            let log = log.clone();
            idle_add(move || log.borrow_mut().push(n));
        }
        assert!(log.borrow().is_empty());
        run_until_idle();
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn removed_idle_never_runs() {
        let ran = Rc::new(Cell::new(false));
        let ran2 = ran.clone();
        let id = idle_add(move || ran2.set(true));
        assert!(idle_remove(id));
        run_until_idle();
        assert!(!ran.get());
        assert!(!idle_remove(id));
    }

    #[test]
    fn idle_added_during_turn_waits_for_next_turn() {
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        idle_add(move || {
            c.set(c.get() + 1);
            let c = c.clone();
            idle_add(move || c.set(c.get() + 10));
        });
        iterate();
        assert_eq!(count.get(), 1);
        iterate();
        assert_eq!(count.get(), 11);
    }

    #[test]
    fn wakes_for_messages_from_other_threads() {
        use tokio::sync::mpsc;

        let (tx, mut rx) = mpsc::unbounded_channel::<u32>();
        let producer = thread::spawn(move || {
            for n in 0..3 {
                thread::sleep(Duration::from_millis(10));
                _ = tx.send(n);
            }
        });

        let received = Rc::new(RefCell::new(Vec::new()));
        let sink = received.clone();
        MainLoop::run(async move {
            while let Some(n) = rx.recv().await {
                sink.borrow_mut().push(n);
            }
        });
        producer.join().unwrap();
        assert_eq!(*received.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn yield_lets_idle_callbacks_run() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = log.clone();
        MainLoop::run(async move {
            let l2 = l.clone();
            idle_add(move || l2.borrow_mut().push("idle"));
            l.borrow_mut().push("before");
            yield_now().await;
            l.borrow_mut().push("after");
        });
        assert_eq!(*log.borrow(), vec!["before", "idle", "after"]);
    }
}
