// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Single-threaded executor that polls tasks and advances time when all tasks
//! are blocked.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

use arbor_track::entity::Entity;

use crate::time::clock::Clock;
use crate::time::simtime::SimTime;
use crate::types::SimResult;

static TASK_WAKER_VTABLE: RawWakerVTable =
    RawWakerVTable::new(clone_raw_waker, wake_task, wake_task_by_ref, drop_raw_waker);

fn waker_for_task(task: Rc<Task>) -> Waker {
    let ptr = Rc::into_raw(task) as *const ();
    // SAFETY: the vtable functions all treat `ptr` as an `Rc<Task>` created
    // by `Rc::into_raw` and the executor is single-threaded.
    unsafe { Waker::from_raw(RawWaker::new(ptr, &TASK_WAKER_VTABLE)) }
}

unsafe fn clone_raw_waker(data: *const ()) -> RawWaker {
    // SAFETY: `data` always comes from `Rc::into_raw` of a `Task`.
    unsafe { Rc::increment_strong_count(data as *const Task) };
    RawWaker::new(data, &TASK_WAKER_VTABLE)
}

unsafe fn wake_task(data: *const ()) {
    // SAFETY: `data` always comes from `Rc::into_raw` of a `Task`.
    let task = unsafe { Rc::from_raw(data as *const Task) };
    task.executor_state.new_tasks.borrow_mut().push(task.clone());
}

unsafe fn wake_task_by_ref(data: *const ()) {
    // SAFETY: `data` always comes from `Rc::into_raw` of a `Task`.
    unsafe {
        Rc::increment_strong_count(data as *const Task);
        wake_task(data);
    }
}

unsafe fn drop_raw_waker(data: *const ()) {
    // SAFETY: `data` always comes from `Rc::into_raw` of a `Task`.
    unsafe { drop(Rc::from_raw(data as *const Task)) };
}

struct Task {
    future: RefCell<Pin<Box<dyn Future<Output = SimResult>>>>,
    executor_state: Rc<ExecutorState>,
}

impl Task {
    fn new(
        future: impl Future<Output = SimResult> + 'static,
        executor_state: Rc<ExecutorState>,
    ) -> Task {
        Task {
            future: RefCell::new(Box::pin(future)),
            executor_state,
        }
    }

    fn poll(&self, context: &mut Context) -> Poll<SimResult> {
        self.future.borrow_mut().as_mut().poll(context)
    }
}

struct ExecutorState {
    task_queue: RefCell<Vec<Rc<Task>>>,
    new_tasks: RefCell<Vec<Rc<Task>>>,
    time: RefCell<SimTime>,
}

impl ExecutorState {
    fn new(top: &Rc<Entity>) -> Self {
        Self {
            task_queue: RefCell::new(Vec::new()),
            new_tasks: RefCell::new(Vec::new()),
            time: RefCell::new(SimTime::new(top)),
        }
    }
}

/// Single-threaded executor
///
/// This is a thin-wrapper (using [`Rc`]) around the real executor, so that this
/// struct can be cloned and passed around.
#[derive(Clone)]
pub struct Executor {
    pub entity: Rc<Entity>,
    state: Rc<ExecutorState>,
}

impl Executor {
    pub fn spawn(&self, future: impl Future<Output = SimResult> + 'static) {
        self.state
            .new_tasks
            .borrow_mut()
            .push(Rc::new(Task::new(future, self.state.clone())));
    }

    /// Run until `finished` is set, an error is returned by a task, or there
    /// is nothing left that must complete.
    pub fn run(&self, finished: &Rc<Cell<bool>>) -> SimResult {
        loop {
            self.step(finished)?;
            if finished.get() {
                break;
            }

            if self.state.new_tasks.borrow().is_empty() {
                if self.state.time.borrow().can_exit() {
                    break;
                }
                let wakers = self.state.time.borrow_mut().advance_time();
                match wakers {
                    Some(wakers) => {
                        for task_waker in wakers {
                            task_waker.waker.wake();
                        }
                    }
                    None => break,
                }
            }
        }
        Ok(())
    }

    fn step(&self, finished: &Rc<Cell<bool>>) -> SimResult {
        // Move the tasks woken since the last step into the task queue
        let mut task_queue = self.state.task_queue.borrow_mut();
        task_queue.append(&mut self.state.new_tasks.borrow_mut());

        for task in task_queue.drain(..) {
            if finished.get() {
                break;
            }

            let waker = waker_for_task(task.clone());
            let mut context = Context::from_waker(&waker);

            match task.poll(&mut context) {
                Poll::Ready(Err(e)) => {
                    return Err(e);
                }
                Poll::Ready(Ok(())) => {
                    // Task complete, drop it
                }
                Poll::Pending => {
                    // Task will have parked itself waiting somewhere
                }
            }
        }
        Ok(())
    }

    pub fn get_clock(&self, freq_mhz: f64) -> Clock {
        self.state.time.borrow_mut().get_clock(freq_mhz)
    }

    #[must_use]
    pub fn time_now_ns(&self) -> f64 {
        self.state.time.borrow().time_now_ns()
    }
}

#[must_use]
pub fn new_executor(top: &Rc<Entity>) -> Executor {
    let state = Rc::new(ExecutorState::new(top));
    let entity = Rc::new(Entity::new(top, "executor"));
    Executor { entity, state }
}
