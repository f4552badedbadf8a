// Resumable task interface
//
// The scheduler never looks inside a task. It resumes it with a value
// when its wait condition is met, or throws the condition's error into
// it. Either way the task runs until its next suspension point and
// reports what it waits for next, or that it is done.

use embassy_time::Instant;

use super::condition::{ConditionError, WaitCondition};

/// Value handed to a task when it is resumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resume<V> {
    /// `WaitCondition::Immediate` (also the first resumption of a task
    /// registered without a condition).
    Ready,
    /// Deadline reached; carries the time of evaluation.
    Time(Instant),
    /// Awaited task finished; carries its recorded return value, if any.
    Completed(Option<V>),
}

impl<V> Resume<V> {
    pub fn time(&self) -> Option<Instant> {
        match self {
            Resume::Time(at) => Some(*at),
            _ => None,
        }
    }

    pub fn into_completed(self) -> Option<V> {
        match self {
            Resume::Completed(value) => value,
            _ => None,
        }
    }
}

/// Outcome of running a task up to its next suspension point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<V> {
    Wait(WaitCondition),
    Done(V),
}

pub trait Task<V> {
    /// Continue with the value produced by the satisfied condition.
    /// `Err` means an error escaped the task.
    fn resume(&mut self, value: Resume<V>) -> Result<Step<V>, ConditionError>;

    /// Continue with a condition failure in place of a value. Tasks
    /// that do not handle errors re-raise it.
    fn throw(&mut self, error: ConditionError) -> Result<Step<V>, ConditionError> {
        Err(error)
    }
}

// plain state-machine closures; errors thrown into them always escape
impl<V, F> Task<V> for F
where
    F: FnMut(Resume<V>) -> Step<V>,
{
    fn resume(&mut self, value: Resume<V>) -> Result<Step<V>, ConditionError> {
        Ok(self(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::String;
    use embassy_time::Duration;

    #[test]
    fn closure_task_steps_through_states() {
        let mut calls = 0u32;
        let mut task = move |_: Resume<u32>| {
            calls += 1;
            if calls < 3 {
                Step::Wait(WaitCondition::Immediate)
            } else {
                Step::Done(calls)
            }
        };

        assert_eq!(task.resume(Resume::Ready), Ok(Step::Wait(WaitCondition::Immediate)));
        assert_eq!(task.resume(Resume::Ready), Ok(Step::Wait(WaitCondition::Immediate)));
        assert_eq!(task.resume(Resume::Ready), Ok(Step::Done(3)));
    }

    #[test]
    fn closure_task_rethrows() {
        let mut task = |_: Resume<()>| Step::Done(());
        let err = ConditionError::Timeout {
            task: String::from("ghost"),
            waited: Duration::from_secs(1),
        };
        assert_eq!(Task::throw(&mut task, err.clone()), Err(err));
    }

    #[test]
    fn resume_accessors() {
        let at = Instant::from_secs(7);
        assert_eq!(Resume::<u8>::Time(at).time(), Some(at));
        assert_eq!(Resume::<u8>::Ready.time(), None);
        assert_eq!(Resume::Completed(Some(5u8)).into_completed(), Some(5));
        assert_eq!(Resume::<u8>::Time(at).into_completed(), None);
    }
}
