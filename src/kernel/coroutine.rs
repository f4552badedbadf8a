// async adapter: write a task as straight-line async code
//
// The body gets a Suspender and awaits `suspender.wait(condition)` at
// each suspension point. Coroutine drives the future with a single
// poll per resumption (no waker involved, the scheduler tick is the
// wake-up). Values and errors travel through a shared mailbox:
//
//   resume/throw -> mailbox.delivered -> WaitFor::poll -> task body
//   task body -> WaitFor::poll -> mailbox.yielded -> Step::Wait
//
// Only one wait may be outstanding at a time. Awaiting any other future
// that returns Pending parks the task on Immediate, so it is simply
// polled again next tick.

use alloc::boxed::Box;
use alloc::rc::Rc;
use core::cell::RefCell;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};

use super::condition::{ConditionError, WaitCondition};
use super::task::{Resume, Step, Task};

type Body<V> = Pin<Box<dyn Future<Output = Result<V, ConditionError>>>>;

struct Mailbox<V> {
    yielded: Option<WaitCondition>,
    delivered: Option<Result<Resume<V>, ConditionError>>,
}

pub struct Coroutine<V> {
    body: Body<V>,
    mailbox: Rc<RefCell<Mailbox<V>>>,
}

impl<V: 'static> Coroutine<V> {
    pub fn new<F, Fut>(body: F) -> Self
    where
        F: FnOnce(Suspender<V>) -> Fut,
        Fut: Future<Output = Result<V, ConditionError>> + 'static,
    {
        let mailbox = Rc::new(RefCell::new(Mailbox {
            yielded: None,
            delivered: None,
        }));
        let suspender = Suspender {
            mailbox: mailbox.clone(),
        };
        Self {
            body: Box::pin(body(suspender)),
            mailbox,
        }
    }

    fn drive(
        &mut self,
        input: Result<Resume<V>, ConditionError>,
    ) -> Result<Step<V>, ConditionError> {
        self.mailbox.borrow_mut().delivered = Some(input);
        let polled = embassy_futures::poll_once(self.body.as_mut());
        let mut mailbox = self.mailbox.borrow_mut();
        // left unread when the body was not parked on a wait yet (first
        // resumption) or is parked on a foreign future; errors still escape
        let unread = mailbox.delivered.take();
        match polled {
            Poll::Ready(Ok(value)) => Ok(Step::Done(value)),
            Poll::Ready(Err(error)) => Err(error),
            Poll::Pending => match unread {
                Some(Err(error)) => Err(error),
                _ => Ok(Step::Wait(mailbox.yielded.take().unwrap_or_default())),
            },
        }
    }
}

impl<V: 'static> Task<V> for Coroutine<V> {
    fn resume(&mut self, value: Resume<V>) -> Result<Step<V>, ConditionError> {
        self.drive(Ok(value))
    }

    fn throw(&mut self, error: ConditionError) -> Result<Step<V>, ConditionError> {
        self.drive(Err(error))
    }
}

/// Handle given to a coroutine body for suspending itself.
pub struct Suspender<V> {
    mailbox: Rc<RefCell<Mailbox<V>>>,
}

impl<V> Clone for Suspender<V> {
    fn clone(&self) -> Self {
        Self {
            mailbox: self.mailbox.clone(),
        }
    }
}

impl<V> Suspender<V> {
    /// Suspend until `condition` is satisfied. Resolves to the resume
    /// value, or to the condition's error if it failed.
    pub fn wait(&self, condition: WaitCondition) -> WaitFor<V> {
        WaitFor {
            mailbox: self.mailbox.clone(),
            condition: Some(condition),
        }
    }
}

#[must_use = "a wait does nothing unless awaited"]
pub struct WaitFor<V> {
    mailbox: Rc<RefCell<Mailbox<V>>>,
    condition: Option<WaitCondition>,
}

impl<V> Future for WaitFor<V> {
    type Output = Result<Resume<V>, ConditionError>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut mailbox = this.mailbox.borrow_mut();
        if let Some(condition) = this.condition.take() {
            // first poll: hand the condition to the scheduler and park
            mailbox.yielded = Some(condition);
            return Poll::Pending;
        }
        match mailbox.delivered.take() {
            Some(result) => Poll::Ready(result),
            None => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::String;
    use alloc::vec::Vec;
    use embassy_time::{Duration, Instant};

    fn timeout() -> ConditionError {
        ConditionError::Timeout {
            task: String::from("foo1"),
            waited: Duration::from_secs(4),
        }
    }

    #[test]
    fn yields_each_condition_in_order() {
        let mut task = Coroutine::new(|co: Suspender<u32>| async move {
            let first = co.wait(WaitCondition::at(Instant::from_secs(3))).await?;
            let second = co.wait(WaitCondition::at(Instant::from_secs(6))).await?;
            let secs = |r: Resume<u32>| r.time().map_or(0, |t| t.as_secs());
            let total = secs(first) + secs(second);
            Ok(total as u32)
        });

        assert_eq!(
            task.resume(Resume::Ready),
            Ok(Step::Wait(WaitCondition::at(Instant::from_secs(3))))
        );
        assert_eq!(
            task.resume(Resume::Time(Instant::from_secs(3))),
            Ok(Step::Wait(WaitCondition::at(Instant::from_secs(6))))
        );
        assert_eq!(task.resume(Resume::Time(Instant::from_secs(6))), Ok(Step::Done(9)));
    }

    #[test]
    fn caught_error_lets_task_continue() {
        let mut task = Coroutine::new(|co: Suspender<&'static str>| async move {
            match co.wait(WaitCondition::Immediate).await {
                Ok(_) => Ok("finished"),
                Err(ConditionError::Timeout { .. }) => Ok("gave up"),
            }
        });

        assert_eq!(task.resume(Resume::Ready), Ok(Step::Wait(WaitCondition::Immediate)));
        assert_eq!(task.throw(timeout()), Ok(Step::Done("gave up")));
    }

    #[test]
    fn uncaught_error_escapes() {
        let mut task = Coroutine::new(|co: Suspender<()>| async move {
            co.wait(WaitCondition::Immediate).await?;
            Ok(())
        });

        assert_eq!(task.resume(Resume::Ready), Ok(Step::Wait(WaitCondition::Immediate)));
        assert_eq!(task.throw(timeout()), Err(timeout()));
    }

    #[test]
    fn error_thrown_before_first_wait_escapes() {
        let mut task = Coroutine::new(|co: Suspender<()>| async move {
            co.wait(WaitCondition::Immediate).await?;
            Ok(())
        });
        assert_eq!(task.throw(timeout()), Err(timeout()));
    }

    #[test]
    fn receives_completed_value() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let mut task = Coroutine::new(move |co: Suspender<u32>| async move {
            let done = co.wait(WaitCondition::Immediate).await?;
            sink.borrow_mut().push(done.into_completed());
            Ok(0)
        });

        task.resume(Resume::Ready).unwrap();
        assert_eq!(task.resume(Resume::Completed(Some(42))), Ok(Step::Done(0)));
        assert_eq!(*seen.borrow(), [Some(42)]);
    }

    #[test]
    fn foreign_pending_future_parks_on_immediate() {
        struct OnePending(bool);
        impl Future for OnePending {
            type Output = ();
            fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
                if self.0 {
                    Poll::Ready(())
                } else {
                    self.0 = true;
                    Poll::Pending
                }
            }
        }

        let mut task = Coroutine::new(|_co: Suspender<u8>| async move {
            OnePending(false).await;
            Ok(1)
        });
        assert_eq!(task.resume(Resume::Ready), Ok(Step::Wait(WaitCondition::Immediate)));
        assert_eq!(task.resume(Resume::Ready), Ok(Step::Done(1)));
    }
}
