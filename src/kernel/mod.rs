// Cooperative scheduler, wait conditions and time source
// Single thread, no preemption. Tasks run only between being resumed
// and their next suspension point; the run loop sleeps between ticks.
//
// Coroutine: adapter for writing tasks as async code. Driven by the
// scheduler's tick, one poll per resumption. Not a general executor.

pub mod clock;
pub mod condition;
pub mod config;
pub mod coroutine;
pub mod scheduler;
pub mod task;

pub use clock::{Clock, ManualClock, SystemClock};
pub use condition::{ConditionError, WaitCondition};
pub use config::{FailurePolicy, ReturnSlots, SchedulerConfig};
pub use coroutine::{Coroutine, Suspender};
pub use scheduler::{Scheduler, SchedulerError, SchedulerHandle};
pub use task::{Resume, Step, Task};
