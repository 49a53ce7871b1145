// SPDX-License-Identifier: AGPL-3.0-or-later

//! Event-driven task reactor: a single-owner queue fed by an mpsc channel,
//! delivering read/write/exception/timeout events to registered callbacks.

pub mod queue;
pub mod task;

pub use queue::{TaskQueue, TaskQueueHandle};
pub use task::{Task, TaskEvent, TaskOutcome, TaskState};
