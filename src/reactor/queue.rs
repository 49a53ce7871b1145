// SPDX-License-Identifier: AGPL-3.0-or-later
// Actor loop grounded on the connection's single-reader `read_loop` plus
// mpsc-channel dispatch (examples/Masorubka1-iscsi-client-rs/src/client/client.rs).

//! A cooperative, single-task-owned reactor: one [`TaskQueue`] is driven by
//! exactly one `tokio::task`, fed through an mpsc channel so any number of
//! producer tasks can enqueue work, fire events, or cancel by id without
//! contending on a lock.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering as AtomicOrdering},
    },
    time::Instant,
};

use tokio::sync::mpsc;

use super::task::{Task, TaskEvent};
use crate::shutdown::ShutdownState;

enum Command {
    Enqueue(Task),
    Fire(u64, TaskEvent),
    Cancel(u64),
}

/// A cloneable front-end for submitting work to a running [`TaskQueue`].
#[derive(Clone)]
pub struct TaskQueueHandle {
    tx: mpsc::UnboundedSender<Command>,
    next_id: Arc<AtomicU64>,
}

impl TaskQueueHandle {
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, AtomicOrdering::Relaxed)
    }

    /// Returns `false` if the queue's reactor loop has already shut down.
    pub fn enqueue(&self, task: Task) -> bool {
        self.tx.send(Command::Enqueue(task)).is_ok()
    }

    pub fn fire(&self, id: u64, event: TaskEvent) -> bool {
        self.tx.send(Command::Fire(id, event)).is_ok()
    }

    pub fn cancel(&self, id: u64) -> bool {
        self.tx.send(Command::Cancel(id)).is_ok()
    }
}

/// The reactor state, owned exclusively by whichever task calls [`TaskQueue::run`].
pub struct TaskQueue {
    rx: mpsc::UnboundedReceiver<Command>,
    tasks: HashMap<u64, Task>,
    next_id: Arc<AtomicU64>,
}

impl TaskQueue {
    pub fn channel() -> (TaskQueueHandle, TaskQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        let next_id = Arc::new(AtomicU64::new(1));
        (
            TaskQueueHandle {
                tx,
                next_id: next_id.clone(),
            },
            TaskQueue {
                rx,
                tasks: HashMap::new(),
                next_id,
            },
        )
    }

    pub fn pending_count(&self) -> usize {
        self.tasks.len()
    }

    /// Runs until `shutdown` fires or every handle is dropped. On shutdown,
    /// every still-registered task is canceled before returning.
    pub async fn run(mut self, shutdown: ShutdownState) {
        loop {
            let next_deadline = self.tasks.values().filter_map(|t| t.deadline).min();
            let sleep = async {
                match next_deadline {
                    Some(d) => tokio::time::sleep_until(d.into()).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = shutdown.wait() => {
                    for (_, mut task) in self.tasks.drain() {
                        task.exit();
                    }
                    return;
                }
                cmd = self.rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle(cmd),
                        None => {
                            for (_, mut task) in self.tasks.drain() {
                                task.exit();
                            }
                            return;
                        },
                    }
                }
                () = sleep, if next_deadline.is_some() => {
                    self.fire_timeouts();
                }
            }
        }
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Enqueue(mut task) => {
                task.init();
                if !matches!(
                    task.state,
                    super::task::TaskState::Completed
                        | super::task::TaskState::TimedOut
                        | super::task::TaskState::Canceled
                        | super::task::TaskState::Exited
                ) {
                    self.tasks.insert(task.id, task);
                }
            },
            Command::Fire(id, event) => {
                let done = if let Some(task) = self.tasks.get_mut(&id) {
                    task.fire(event);
                    matches!(
                        task.state,
                        super::task::TaskState::Completed
                            | super::task::TaskState::TimedOut
                            | super::task::TaskState::Canceled
                            | super::task::TaskState::Exited
                    )
                } else {
                    false
                };
                if done {
                    self.tasks.remove(&id);
                }
            },
            Command::Cancel(id) => {
                if let Some(mut task) = self.tasks.remove(&id) {
                    task.cancel();
                }
            },
        }
    }

    fn fire_timeouts(&mut self) {
        let now = Instant::now();
        let expired: Vec<u64> = self
            .tasks
            .iter()
            .filter(|(_, t)| t.deadline.is_some_and(|d| d <= now))
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            self.handle(Command::Fire(id, TaskEvent::TIMEOUT));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::oneshot;

    use super::*;
    use crate::reactor::task::{TaskOutcome, TaskState};

    #[tokio::test]
    async fn fired_event_completes_task_and_removes_it() {
        let (handle, queue) = TaskQueue::channel();
        let shutdown = ShutdownState::new();
        let runner = tokio::spawn(queue.run(shutdown.clone()));

        let (done_tx, done_rx) = oneshot::channel();
        let id = handle.next_id();
        let task = Task::new(
            id,
            TaskEvent::READ,
            None,
            Box::new(|ev| if ev.contains(TaskEvent::READ) { TaskOutcome::Done } else { TaskOutcome::Continue }),
        )
        .with_completion(done_tx);
        assert!(handle.enqueue(task));
        assert!(handle.fire(id, TaskEvent::READ));

        let state = done_rx.await.expect("completion channel dropped");
        assert_eq!(state, TaskState::Completed);

        shutdown.trigger();
        runner.await.expect("reactor task panicked");
    }

    #[tokio::test]
    async fn deadline_fires_timeout_without_external_event() {
        let (handle, queue) = TaskQueue::channel();
        let shutdown = ShutdownState::new();
        let runner = tokio::spawn(queue.run(shutdown.clone()));

        let (done_tx, done_rx) = oneshot::channel();
        let id = handle.next_id();
        let deadline = Instant::now() + Duration::from_millis(30);
        let task = Task::new(
            id,
            TaskEvent::READ,
            Some(deadline),
            Box::new(|ev| if ev.contains(TaskEvent::TIMEOUT) { TaskOutcome::Done } else { TaskOutcome::Continue }),
        )
        .with_completion(done_tx);
        assert!(handle.enqueue(task));

        let state = tokio::time::timeout(Duration::from_secs(1), done_rx)
            .await
            .expect("task never timed out")
            .expect("completion channel dropped");
        assert_eq!(state, TaskState::TimedOut);

        shutdown.trigger();
        runner.await.expect("reactor task panicked");
    }

    #[tokio::test]
    async fn cancel_before_fire_sets_canceled_state() {
        let (handle, queue) = TaskQueue::channel();
        let shutdown = ShutdownState::new();
        let runner = tokio::spawn(queue.run(shutdown.clone()));

        let id = handle.next_id();
        let task = Task::new(id, TaskEvent::READ, None, Box::new(|_ev| TaskOutcome::Continue));
        assert!(handle.enqueue(task));
        assert!(handle.cancel(id));

        // give the reactor a moment to process the cancel before shutdown
        tokio::task::yield_now().await;
        shutdown.trigger();
        runner.await.expect("reactor task panicked");
    }

    #[tokio::test]
    async fn enqueue_delivers_sock_init_before_any_other_event() {
        let (handle, queue) = TaskQueue::channel();
        let shutdown = ShutdownState::new();
        let runner = tokio::spawn(queue.run(shutdown.clone()));

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let id = handle.next_id();
        let task = Task::new(
            id,
            TaskEvent::READ,
            None,
            Box::new(move |ev| {
                seen2.lock().unwrap().push(ev);
                TaskOutcome::Continue
            }),
        );
        assert!(handle.enqueue(task));
        tokio::task::yield_now().await;

        assert_eq!(*seen.lock().unwrap(), vec![TaskEvent::SOCK_INIT]);

        shutdown.trigger();
        runner.await.expect("reactor task panicked");
    }

    #[tokio::test]
    async fn done_outcome_delivers_sock_done_after_the_triggering_event() {
        let (handle, queue) = TaskQueue::channel();
        let shutdown = ShutdownState::new();
        let runner = tokio::spawn(queue.run(shutdown.clone()));

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let id = handle.next_id();
        let task = Task::new(
            id,
            TaskEvent::READ,
            None,
            Box::new(move |ev| {
                seen2.lock().unwrap().push(ev);
                if ev.contains(TaskEvent::READ) { TaskOutcome::Done } else { TaskOutcome::Continue }
            }),
        );
        assert!(handle.enqueue(task));
        assert!(handle.fire(id, TaskEvent::READ));
        tokio::task::yield_now().await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![TaskEvent::SOCK_INIT, TaskEvent::READ, TaskEvent::SOCK_DONE]
        );

        shutdown.trigger();
        runner.await.expect("reactor task panicked");
    }

    #[tokio::test]
    async fn cancel_delivers_sock_cancel_to_callback_before_removal() {
        let (handle, queue) = TaskQueue::channel();
        let shutdown = ShutdownState::new();
        let runner = tokio::spawn(queue.run(shutdown.clone()));

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let id = handle.next_id();
        let task = Task::new(
            id,
            TaskEvent::READ,
            None,
            Box::new(move |ev| {
                seen2.lock().unwrap().push(ev);
                TaskOutcome::Continue
            }),
        );
        assert!(handle.enqueue(task));
        assert!(handle.cancel(id));
        tokio::task::yield_now().await;

        assert_eq!(*seen.lock().unwrap(), vec![TaskEvent::SOCK_INIT, TaskEvent::SOCK_CANCEL]);

        shutdown.trigger();
        runner.await.expect("reactor task panicked");
    }

    #[tokio::test]
    async fn shutdown_delivers_sock_exit_to_every_live_task() {
        let (handle, queue) = TaskQueue::channel();
        let shutdown = ShutdownState::new();
        let runner = tokio::spawn(queue.run(shutdown.clone()));

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let id = handle.next_id();
        let task = Task::new(
            id,
            TaskEvent::READ,
            None,
            Box::new(move |ev| {
                seen2.lock().unwrap().push(ev);
                TaskOutcome::Continue
            }),
        );
        assert!(handle.enqueue(task));
        tokio::task::yield_now().await;

        shutdown.trigger();
        runner.await.expect("reactor task panicked");

        assert_eq!(*seen.lock().unwrap(), vec![TaskEvent::SOCK_INIT, TaskEvent::SOCK_EXIT]);
    }
}
