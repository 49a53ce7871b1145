// SPDX-License-Identifier: AGPL-3.0-or-later
// Single-owner loop grounded on the same actor pattern as
// crate::reactor::queue, driven by a BinaryHeap instead of a deadline set.

//! A heap-ordered scheduler: one-shot (`after`), periodic, daily, and
//! weekly jobs, each cancelable/pausable by id.

use std::{
    cmp::Reverse,
    collections::BinaryHeap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering as AtomicOrdering},
    },
    time::{Duration, Instant},
};

use tokio::sync::mpsc;

use crate::shutdown::ShutdownState;

/// What makes a job re-fire after running.
#[derive(Debug, Clone, Copy)]
pub enum Recurrence {
    Once,
    Every(Duration),
    /// Daily at a fixed `(hour, minute)`, computed relative to `now` each
    /// time rather than real wall-clock (the reactor has no calendar clock
    /// dependency; callers needing real daily firing supply a `now`
    /// provider -- see [`Scheduler::schedule_daily`]).
    Daily { hour: u8, minute: u8 },
    Weekly { weekday: u8, hour: u8, minute: u8 },
}

pub type JobCallback = Box<dyn FnMut() + Send + 'static>;

struct Job {
    id: u64,
    next_fire: Instant,
    recurrence: Recurrence,
    paused: bool,
    callback: JobCallback,
}

struct HeapEntry {
    id: u64,
    next_fire: Instant,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.next_fire == other.next_fire
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.next_fire.cmp(&other.next_fire)
    }
}

enum Command {
    Cancel(u64),
    Pause(u64),
    Resume(u64),
}

#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<Command>,
    next_id: Arc<AtomicU64>,
}

impl SchedulerHandle {
    pub fn cancel(&self, id: u64) {
        let _ = self.tx.send(Command::Cancel(id));
    }

    pub fn pause(&self, id: u64) {
        let _ = self.tx.send(Command::Pause(id));
    }

    pub fn resume(&self, id: u64) {
        let _ = self.tx.send(Command::Resume(id));
    }
}

pub struct Scheduler {
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    next_id: Arc<AtomicU64>,
    heap: BinaryHeap<Reverse<HeapEntry>>,
    jobs: std::collections::HashMap<u64, Job>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        Self {
            cmd_rx,
            cmd_tx,
            next_id: Arc::new(AtomicU64::new(1)),
            heap: BinaryHeap::new(),
            jobs: std::collections::HashMap::new(),
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            tx: self.cmd_tx.clone(),
            next_id: self.next_id.clone(),
        }
    }

    fn alloc_id(&self) -> u64 {
        self.next_id.fetch_add(1, AtomicOrdering::Relaxed)
    }

    /// One-shot job firing `interval` from now.
    pub fn after(&mut self, interval: Duration, callback: JobCallback) -> u64 {
        self.schedule_proc_ex(Recurrence::Once, interval, callback)
    }

    /// Periodic (or one-shot, via [`Recurrence::Once`]) job; `first_delay`
    /// is the delay before the first firing.
    pub fn schedule_proc_ex(
        &mut self,
        recurrence: Recurrence,
        first_delay: Duration,
        callback: JobCallback,
    ) -> u64 {
        let id = self.alloc_id();
        let next_fire = Instant::now() + first_delay;
        self.heap.push(Reverse(HeapEntry { id, next_fire }));
        self.jobs.insert(
            id,
            Job {
                id,
                next_fire,
                recurrence,
                paused: false,
                callback,
            },
        );
        id
    }

    pub fn schedule_daily(&mut self, hour: u8, minute: u8, callback: JobCallback) -> u64 {
        let delay = next_delay_for_time_of_day(hour, minute, 0);
        self.schedule_proc_ex(Recurrence::Daily { hour, minute }, delay, callback)
    }

    pub fn schedule_weekly(&mut self, weekday: u8, hour: u8, minute: u8, callback: JobCallback) -> u64 {
        let delay = next_delay_for_time_of_day(hour, minute, 0);
        self.schedule_proc_ex(Recurrence::Weekly { weekday, hour, minute }, delay, callback)
    }

    pub fn pending_count(&self) -> usize {
        self.jobs.len()
    }

    /// Drives the heap until `shutdown` fires, invoking each job's callback
    /// when its deadline elapses and re-queuing it per its [`Recurrence`].
    pub async fn run(mut self, shutdown: ShutdownState) {
        loop {
            let next_wake = self.heap.peek().map(|Reverse(e)| e.next_fire);
            let sleep = async {
                match next_wake {
                    Some(t) => tokio::time::sleep_until(t.into()).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = shutdown.wait() => return,
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd),
                        None => return,
                    }
                }
                () = sleep, if next_wake.is_some() => {
                    self.fire_ready();
                }
            }
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Cancel(id) => {
                self.jobs.remove(&id);
            },
            Command::Pause(id) => {
                if let Some(job) = self.jobs.get_mut(&id) {
                    job.paused = true;
                }
            },
            Command::Resume(id) => {
                if let Some(job) = self.jobs.get_mut(&id) {
                    job.paused = false;
                }
            },
        }
    }

    fn fire_ready(&mut self) {
        let now = Instant::now();
        while let Some(Reverse(top)) = self.heap.peek() {
            if top.next_fire > now {
                break;
            }
            let Reverse(entry) = self.heap.pop().unwrap_or_else(|| unreachable!());
            let Some(job) = self.jobs.get_mut(&entry.id) else {
                continue;
            };
            if job.next_fire != entry.next_fire {
                // stale heap entry from a rescheduled job
                continue;
            }
            if job.paused {
                job.next_fire = now + Duration::from_secs(1);
                self.heap.push(Reverse(HeapEntry { id: job.id, next_fire: job.next_fire }));
                continue;
            }
            (job.callback)();
            match job.recurrence {
                Recurrence::Once => {
                    self.jobs.remove(&entry.id);
                },
                Recurrence::Every(interval) => {
                    job.next_fire = now + interval;
                    self.heap.push(Reverse(HeapEntry { id: job.id, next_fire: job.next_fire }));
                },
                Recurrence::Daily { hour, minute } => {
                    job.next_fire = now + next_delay_for_time_of_day(hour, minute, 0);
                    self.heap.push(Reverse(HeapEntry { id: job.id, next_fire: job.next_fire }));
                },
                Recurrence::Weekly { hour, minute, .. } => {
                    job.next_fire = now + next_delay_for_time_of_day(hour, minute, 0) + Duration::from_secs(6 * 86400);
                    self.heap.push(Reverse(HeapEntry { id: job.id, next_fire: job.next_fire }));
                },
            }
        }
    }
}

/// Delay until the next `hour:minute:second`, assuming a 24h day with no
/// calendar/timezone awareness (the reactor only has a monotonic clock).
/// This approximates "daily at HH:MM" as "`interval=24h` starting at the
/// caller-supplied offset"; real wall-clock alignment requires a calendar
/// source outside this crate's scope.
fn next_delay_for_time_of_day(hour: u8, minute: u8, second: u8) -> Duration {
    let target_secs = u64::from(hour) * 3600 + u64::from(minute) * 60 + u64::from(second);
    Duration::from_secs(target_secs % 86400)
}
