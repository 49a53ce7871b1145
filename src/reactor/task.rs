// SPDX-License-Identifier: AGPL-3.0-or-later

//! A single unit of reactor-driven work and the events it can be woken by.

use std::time::Instant;

use tokio::sync::oneshot;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TaskEvent: u16 {
        const READ          = 0b0000_0001;
        const WRITE         = 0b0000_0010;
        const EXCEPTION     = 0b0000_0100;
        const TIMEOUT       = 0b0000_1000;
        const AGAIN         = 0b0001_0000;
        const SOCK_INIT     = 0b0010_0000;
        const SOCK_DONE     = 0b0100_0000;
        const SOCK_CANCEL   = 0b1000_0000;
        const SOCK_EXIT     = 0b1_0000_0000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Init,
    Running,
    Completed,
    Canceled,
    TimedOut,
    /// Terminated by queue shutdown (`NS_SOCK_EXIT`), distinct from an
    /// explicit by-id cancel.
    Exited,
    Free,
}

/// What a task's callback wants the queue to do next.
pub enum TaskOutcome {
    /// Keep the task registered, waiting for more events.
    Continue,
    /// Task is finished; move it to `Completed` and drop it from the queue.
    Done,
}

pub type TaskCallback =
    Box<dyn FnMut(TaskEvent) -> TaskOutcome + Send + 'static>;

/// A scheduled unit of work, analogous to a per-socket callback entry: an
/// id, the events it's waiting on, an optional deadline, and the callback
/// invoked with whichever event fired.
pub struct Task {
    pub id: u64,
    pub state: TaskState,
    pub interested: TaskEvent,
    pub deadline: Option<Instant>,
    callback: TaskCallback,
    /// Fires once with the terminal state, for callers awaiting completion.
    done_tx: Option<oneshot::Sender<TaskState>>,
}

impl Task {
    pub fn new(id: u64, interested: TaskEvent, deadline: Option<Instant>, callback: TaskCallback) -> Self {
        Self {
            id,
            state: TaskState::Init,
            interested,
            deadline,
            callback,
            done_tx: None,
        }
    }

    pub fn with_completion(mut self, tx: oneshot::Sender<TaskState>) -> Self {
        self.done_tx = Some(tx);
        self
    }

    /// Drives the callback for `event`, transitioning state per its
    /// [`TaskOutcome`] and firing the completion channel when terminal. A
    /// non-timeout completion gets one further call with `NS_SOCK_DONE`
    /// before the task is retired, mirroring `Ns_TaskDone`; a timeout
    /// completion does not, since `TIMEOUT` is itself the terminal event.
    pub fn fire(&mut self, event: TaskEvent) {
        self.state = TaskState::Running;
        match (self.callback)(event) {
            TaskOutcome::Continue => {
                self.state = TaskState::Init;
            },
            TaskOutcome::Done => {
                if event.contains(TaskEvent::TIMEOUT) {
                    self.state = TaskState::TimedOut;
                } else {
                    let _ = (self.callback)(TaskEvent::SOCK_DONE);
                    self.state = TaskState::Completed;
                }
                self.finish();
            },
        }
    }

    /// Delivers `NS_SOCK_INIT` to the callback. Called once, when the task
    /// is first registered with the reactor, before any other event.
    pub fn init(&mut self) {
        self.fire(TaskEvent::SOCK_INIT);
    }

    /// Delivers `NS_SOCK_CANCEL` to the callback so it can release its own
    /// resources, then marks the task terminally canceled regardless of
    /// what the callback returns. Cancellation is cooperative in that the
    /// callback gets a chance to clean up, but not optional: the task is
    /// removed from the queue either way.
    pub fn cancel(&mut self) {
        let _ = (self.callback)(TaskEvent::SOCK_CANCEL);
        self.state = TaskState::Canceled;
        self.finish();
    }

    /// Delivers `NS_SOCK_EXIT` to the callback on queue shutdown, then marks
    /// the task terminally exited.
    pub fn exit(&mut self) {
        let _ = (self.callback)(TaskEvent::SOCK_EXIT);
        self.state = TaskState::Exited;
        self.finish();
    }

    fn finish(&mut self) {
        if let Some(tx) = self.done_tx.take() {
            let _ = tx.send(self.state);
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("interested", &self.interested)
            .finish()
    }
}
