// Wait conditions: what a suspended task is waiting for
//
// A closed set of predicates. Each one is evaluated once per tick and
// either lets the task resume (with a value), keeps it parked, or
// fails, in which case the error is thrown into the waiting task.
// Relative delays are turned into absolute deadlines when built, so a
// condition created early and evaluated late still measures from its
// creation.

use alloc::string::String;
use core::fmt;

use embassy_time::{Duration, Instant};

use super::clock::{self, Clock};
use super::task::Resume;

/// The scheduler's task table, as seen by conditions.
pub trait TaskTable<V> {
    fn contains(&self, name: &str) -> bool;

    /// Return value recorded for a finished task, handed to the waiter
    /// that observed the completion. Tables may forget it afterwards.
    fn claim_return_value(&mut self, name: &str) -> Option<V>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitCondition {
    /// Always satisfied; resumes with `Resume::Ready`.
    Immediate,
    /// Satisfied once the clock reaches the deadline; resumes with the
    /// time of evaluation.
    Deadline(Instant),
    /// Satisfied once no task called `task` is registered; resumes with
    /// its recorded return value. Fails once `timeout` has elapsed
    /// since `since` and the task is still there.
    TaskCompleted {
        task: String,
        timeout: Option<Duration>,
        since: Instant,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation<V> {
    Satisfied(Resume<V>),
    Pending,
    Failed(ConditionError),
}

impl WaitCondition {
    pub const fn at(deadline: Instant) -> Self {
        WaitCondition::Deadline(deadline)
    }

    /// Deadline `delay` from now. "Now" is read here, not on evaluation.
    pub fn after(clock: &impl Clock, delay: Duration) -> Self {
        WaitCondition::Deadline(clock::deadline_after(clock.now(), delay))
    }

    pub fn task_completed(
        clock: &impl Clock,
        task: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Self {
        WaitCondition::TaskCompleted {
            task: task.into(),
            timeout,
            since: clock.now(),
        }
    }

    pub fn evaluate<V, T>(&self, now: Instant, table: &mut T) -> Evaluation<V>
    where
        T: TaskTable<V> + ?Sized,
    {
        match self {
            WaitCondition::Immediate => Evaluation::Satisfied(Resume::Ready),
            WaitCondition::Deadline(deadline) => {
                if now >= *deadline {
                    Evaluation::Satisfied(Resume::Time(now))
                } else {
                    Evaluation::Pending
                }
            }
            WaitCondition::TaskCompleted {
                task,
                timeout,
                since,
            } => {
                if !table.contains(task) {
                    let value = table.claim_return_value(task);
                    return Evaluation::Satisfied(Resume::Completed(value));
                }
                match timeout {
                    Some(limit) => {
                        let waited = clock::elapsed_between(*since, now);
                        if waited >= *limit {
                            Evaluation::Failed(ConditionError::Timeout {
                                task: task.clone(),
                                waited,
                            })
                        } else {
                            Evaluation::Pending
                        }
                    }
                    None => Evaluation::Pending,
                }
            }
        }
    }
}

impl Default for WaitCondition {
    fn default() -> Self {
        WaitCondition::Immediate
    }
}

impl fmt::Display for WaitCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitCondition::Immediate => write!(f, "Immediate"),
            WaitCondition::Deadline(at) => write!(f, "Deadline({}ms)", at.as_millis()),
            WaitCondition::TaskCompleted {
                task,
                timeout: Some(limit),
                ..
            } => write!(f, "TaskCompleted({}, {}ms)", task, limit.as_millis()),
            WaitCondition::TaskCompleted { task, .. } => write!(f, "TaskCompleted({})", task),
        }
    }
}

/// Failure raised while evaluating a wait condition. Thrown into the
/// waiting task, which may handle it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionError {
    /// The awaited task was still registered when the timeout ran out.
    Timeout { task: String, waited: Duration },
}

impl fmt::Display for ConditionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionError::Timeout { task, waited } => write!(
                f,
                "timed out after {}ms waiting for task '{}'",
                waited.as_millis(),
                task
            ),
        }
    }
}

impl core::error::Error for ConditionError {}
