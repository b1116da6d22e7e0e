/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The capability surface an embedding application exposes to canvas
//! surfaces. Every method has a default no-op implementation; embedders
//! override only the callbacks they care about.

#![deny(unsafe_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use euclid::default::Rect;
use log::trace;

/// Embedder callbacks. All methods are invoked synchronously on the rendering
/// execution context.
pub trait EmbedderClient {
    /// A region of a surface changed and should eventually be repainted.
    fn invalidate_rect(&self, _dirty_rect: Rect<i32>) {}

    /// A surface wants the embedder to schedule a compositing frame.
    fn schedule_animation(&self) {}

    /// A hidden surface released its GPU backing store.
    fn did_start_hibernating(&self) {}
}

/// A no-op client for surfaces that run without an embedder.
pub struct NullEmbedderClient;

impl EmbedderClient for NullEmbedderClient {}

pub type IdleTask = Box<dyn FnOnce()>;

/// Deferred-work seam. Canvas surfaces hand low-priority work (such as
/// hibernation) to the embedder's idle loop instead of running it inline;
/// the embedder decides when, and whether, idle time is available.
pub trait IdleTaskScheduler {
    fn post_idle_task(&self, task: IdleTask);
}

/// A FIFO idle-task queue for embedders without an idle-scheduling loop of
/// their own, and for tests that need to step deferred work deterministically.
/// Tasks never run re-entrantly; they run only from [`run_pending`].
///
/// [`run_pending`]: SerialTaskQueue::run_pending
#[derive(Default)]
pub struct SerialTaskQueue {
    tasks: RefCell<VecDeque<IdleTask>>,
}

impl SerialTaskQueue {
    pub fn new() -> Rc<SerialTaskQueue> {
        Rc::new(SerialTaskQueue::default())
    }

    pub fn pending_task_count(&self) -> usize {
        self.tasks.borrow().len()
    }

    /// Runs every queued task, including tasks posted by the tasks
    /// themselves.
    pub fn run_pending(&self) {
        loop {
            let task = self.tasks.borrow_mut().pop_front();
            match task {
                Some(task) => task(),
                None => break,
            }
        }
    }
}

impl IdleTaskScheduler for SerialTaskQueue {
    fn post_idle_task(&self, task: IdleTask) {
        trace!("Idle task queued");
        self.tasks.borrow_mut().push_back(task);
    }
}

#[cfg(test)]
mod test {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn test_serial_queue_runs_in_order() {
        let queue = SerialTaskQueue::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            queue.post_idle_task(Box::new(move || log.borrow_mut().push(i)));
        }
        assert_eq!(queue.pending_task_count(), 3);
        queue.run_pending();
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        assert_eq!(queue.pending_task_count(), 0);
    }

    #[test]
    fn test_tasks_posted_during_run_also_run() {
        let queue = SerialTaskQueue::new();
        let ran = Rc::new(Cell::new(false));
        {
            let queue_handle = queue.clone();
            let ran = ran.clone();
            queue.post_idle_task(Box::new(move || {
                queue_handle.post_idle_task(Box::new(move || ran.set(true)));
            }));
        }
        queue.run_pending();
        assert!(ran.get());
    }

    #[test]
    fn test_default_client_methods_are_noops() {
        let client = NullEmbedderClient;
        client.invalidate_rect(Rect::zero());
        client.schedule_animation();
        client.did_start_hibernating();
    }
}
