// Cooperative polling scheduler
//
// Single thread, no preemption. Every tick evaluates each registered
// task's wait condition exactly once, against a snapshot taken at the
// start of the tick:
//   satisfied -> resume the task, re-queue it with the condition it
//                yields, or drop it and record its return value
//   pending   -> re-queue unchanged
//   failed    -> throw the error into the task; if it escapes, apply
//                the failure policy
// Anything registered while a tick runs (new tasks, re-registrations)
// is first looked at on the next tick, queued behind the tasks that
// survived this one. Survivors keep their snapshot order, also when
// the tick is cut short by an abort.
//
// The table sits behind SchedulerHandle so tasks can register other
// tasks and query the table from inside their own resumption. No
// RefCell borrow is held while task code runs.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::format;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt;
use core::mem;

use embassy_time::{Duration, Instant};
use log::{debug, error, info, warn};

use super::clock::Clock;
use super::condition::{ConditionError, Evaluation, TaskTable, WaitCondition};
use super::config::{FailurePolicy, ReturnSlots, SchedulerConfig};
use super::task::{Step, Task};

/// Error that ends a run under `FailurePolicy::Abort`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// A condition error was thrown into `task` and the task did not
    /// handle it.
    Uncaught { task: String, error: ConditionError },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerError::Uncaught { task, error } => {
                write!(f, "task '{}' did not handle: {}", task, error)
            }
        }
    }
}

impl core::error::Error for SchedulerError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            SchedulerError::Uncaught { error, .. } => Some(error),
        }
    }
}

struct Entry<V> {
    // distinguishes this registration from a later one under the same name
    id: u64,
    name: String,
    condition: WaitCondition,
    task: Box<dyn Task<V>>,
}

enum ReturnValues<V> {
    PerTask(BTreeMap<String, V>),
    Shared(Option<V>),
}

struct Registry<V> {
    // tasks queued for the next tick, in evaluation order
    live: Vec<Entry<V>>,
    // every registered name -> id of the entry owning it; also covers
    // entries taken out into the current tick's snapshot
    names: BTreeMap<String, u64>,
    next_id: u64,
    next_default_name: u64,
    returns: ReturnValues<V>,
    failures: BTreeMap<String, ConditionError>,
}

impl<V> Registry<V> {
    fn new(slots: ReturnSlots) -> Self {
        let returns = match slots {
            ReturnSlots::PerTask => ReturnValues::PerTask(BTreeMap::new()),
            ReturnSlots::Shared => ReturnValues::Shared(None),
        };
        Self {
            live: Vec::new(),
            names: BTreeMap::new(),
            next_id: 0,
            next_default_name: 0,
            returns,
            failures: BTreeMap::new(),
        }
    }

    fn owns(&self, entry: &Entry<V>) -> bool {
        self.names.get(&entry.name) == Some(&entry.id)
    }

    fn default_name(&mut self) -> String {
        loop {
            let candidate = format!("{}", self.next_default_name);
            self.next_default_name += 1;
            if !self.names.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Insert or overwrite. Returns the replaced live entry, if any, so
    /// the caller can drop it outside the borrow.
    fn insert(
        &mut self,
        name: String,
        task: Box<dyn Task<V>>,
        condition: WaitCondition,
    ) -> Option<Entry<V>> {
        let id = self.next_id;
        self.next_id += 1;

        // an idle table starts over: results nobody collected are dropped
        if self.names.is_empty() {
            if let ReturnValues::PerTask(values) = &mut self.returns {
                values.clear();
            }
            self.failures.clear();
        }
        // a new run must not report the previous run's outcome
        if let ReturnValues::PerTask(values) = &mut self.returns {
            values.remove(&name);
        }
        self.failures.remove(&name);

        let replaced = match self.live.iter().position(|e| e.name == name) {
            Some(pos) => Some(mem::replace(
                &mut self.live[pos],
                Entry {
                    id,
                    name: name.clone(),
                    condition,
                    task,
                },
            )),
            None => {
                self.live.push(Entry {
                    id,
                    name: name.clone(),
                    condition,
                    task,
                });
                None
            }
        };
        self.names.insert(name, id);
        replaced
    }

    fn release(&mut self, entry: &Entry<V>) {
        if self.owns(entry) {
            self.names.remove(&entry.name);
        }
    }

    fn record_return(&mut self, name: &str, value: V) {
        match &mut self.returns {
            ReturnValues::PerTask(values) => {
                values.insert(String::from(name), value);
            }
            ReturnValues::Shared(slot) => *slot = Some(value),
        }
    }
}

impl<V: Clone> Registry<V> {
    fn peek_return_value(&self, name: &str) -> Option<V> {
        match &self.returns {
            ReturnValues::PerTask(values) => values.get(name).cloned(),
            // single slot: whichever task finished last, whatever `name` is
            ReturnValues::Shared(slot) => slot.clone(),
        }
    }
}

impl<V: Clone> TaskTable<V> for Registry<V> {
    fn contains(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    // per-task values go to the first waiter; the shared slot stays put
    fn claim_return_value(&mut self, name: &str) -> Option<V> {
        match &mut self.returns {
            ReturnValues::PerTask(values) => values.remove(name),
            ReturnValues::Shared(slot) => slot.clone(),
        }
    }
}

/// Shared access to a scheduler's task table and clock. Cheap to
/// clone; hand one to every task that registers or queries tasks.
pub struct SchedulerHandle<V, C> {
    registry: Rc<RefCell<Registry<V>>>,
    clock: C,
}

impl<V, C: Clone> Clone for SchedulerHandle<V, C> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl<V: Clone + 'static, C: Clock> SchedulerHandle<V, C> {
    /// Register `task` under `name` (or the next free default name),
    /// to be resumed once `condition` holds. An existing task of the
    /// same name is replaced. Returns the name used.
    pub fn register<T>(&self, task: T, name: Option<&str>, condition: WaitCondition) -> String
    where
        T: Task<V> + 'static,
    {
        let mut registry = self.registry.borrow_mut();
        let name = match name {
            Some(name) => String::from(name),
            None => registry.default_name(),
        };
        if registry.names.contains_key(&name) {
            debug!("sched: replacing task '{}'", name);
        }
        debug!("sched: register '{}' waiting on {}", name, condition);
        let replaced = registry.insert(name.clone(), Box::new(task), condition);
        drop(registry);
        drop(replaced);
        name
    }

    /// Register under a default name, resumable on the next tick.
    pub fn spawn<T: Task<V> + 'static>(&self, task: T) -> String {
        self.register(task, None, WaitCondition::Immediate)
    }

    pub fn spawn_named<T: Task<V> + 'static>(&self, name: &str, task: T) -> String {
        self.register(task, Some(name), WaitCondition::Immediate)
    }

    pub fn task_exists(&self, name: &str) -> bool {
        self.registry.borrow().contains(name)
    }

    /// Recorded return value for `name`. With `ReturnSlots::Shared`
    /// this is the value of whichever task finished last. Per-task
    /// values are kept until a `TaskCompleted` waiter or
    /// `take_return_value` collects them, `name` is registered again,
    /// or a task is registered into an empty table.
    pub fn task_return_value(&self, name: &str) -> Option<V> {
        self.registry.borrow().peek_return_value(name)
    }

    /// Like `task_return_value`, but forgets the value afterwards.
    pub fn take_return_value(&self, name: &str) -> Option<V> {
        let mut registry = self.registry.borrow_mut();
        match &mut registry.returns {
            ReturnValues::PerTask(values) => values.remove(name),
            ReturnValues::Shared(slot) => slot.take(),
        }
    }

    pub fn clear_return_values(&self) {
        let mut registry = self.registry.borrow_mut();
        match &mut registry.returns {
            ReturnValues::PerTask(values) => values.clear(),
            ReturnValues::Shared(slot) => *slot = None,
        }
    }

    /// Error that escaped `name` under `FailurePolicy::Isolate`.
    pub fn task_failure(&self, name: &str) -> Option<ConditionError> {
        self.registry.borrow().failures.get(name).cloned()
    }

    pub fn take_failure(&self, name: &str) -> Option<ConditionError> {
        self.registry.borrow_mut().failures.remove(name)
    }

    pub fn clear_failures(&self) {
        self.registry.borrow_mut().failures.clear();
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Deadline `delay` from now.
    pub fn after(&self, delay: Duration) -> WaitCondition {
        WaitCondition::after(&self.clock, delay)
    }

    /// Wait for `task` to finish, failing after `timeout` if given.
    pub fn completion_of(&self, task: &str, timeout: Option<Duration>) -> WaitCondition {
        WaitCondition::task_completed(&self.clock, task, timeout)
    }

    pub fn len(&self) -> usize {
        self.registry.borrow().names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.borrow().names.is_empty()
    }

    pub fn task_names(&self) -> Vec<String> {
        self.registry.borrow().names.keys().cloned().collect()
    }
}

pub struct Scheduler<V, C> {
    handle: SchedulerHandle<V, C>,
    on_uncaught: FailurePolicy,
}

impl<V: Clone + 'static, C: Clock + Clone> Scheduler<V, C> {
    pub fn new(clock: C) -> Self {
        Self::with_config(clock, &SchedulerConfig::defaults())
    }

    /// Only the policies are taken from `config`; the poll interval is
    /// passed to `run`.
    pub fn with_config(clock: C, config: &SchedulerConfig) -> Self {
        Self {
            handle: SchedulerHandle {
                registry: Rc::new(RefCell::new(Registry::new(config.return_slots))),
                clock,
            },
            on_uncaught: config.on_uncaught,
        }
    }

    pub fn handle(&self) -> SchedulerHandle<V, C> {
        self.handle.clone()
    }

    pub fn register<T>(&self, task: T, name: Option<&str>, condition: WaitCondition) -> String
    where
        T: Task<V> + 'static,
    {
        self.handle.register(task, name, condition)
    }

    pub fn spawn<T: Task<V> + 'static>(&self, task: T) -> String {
        self.handle.spawn(task)
    }

    pub fn spawn_named<T: Task<V> + 'static>(&self, name: &str, task: T) -> String {
        self.handle.spawn_named(name, task)
    }

    pub fn task_exists(&self, name: &str) -> bool {
        self.handle.task_exists(name)
    }

    pub fn task_return_value(&self, name: &str) -> Option<V> {
        self.handle.task_return_value(name)
    }

    pub fn task_failure(&self, name: &str) -> Option<ConditionError> {
        self.handle.task_failure(name)
    }

    pub fn len(&self) -> usize {
        self.handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handle.is_empty()
    }

    /// Tick until no task is left, sleeping `poll_interval` after each
    /// tick.
    pub fn run(&mut self, poll_interval: Duration) -> Result<(), SchedulerError> {
        info!(
            "sched: running {} task(s), poll every {}ms",
            self.len(),
            poll_interval.as_millis()
        );
        let mut ticks: u64 = 0;
        while !self.is_empty() {
            self.tick()?;
            ticks += 1;
            self.handle.clock.sleep(poll_interval);
        }
        info!("sched: all tasks finished after {} tick(s)", ticks);
        Ok(())
    }

    /// One evaluation pass over the tasks registered when it starts.
    pub fn tick(&mut self) -> Result<(), SchedulerError> {
        let snapshot = mem::take(&mut self.handle.registry.borrow_mut().live);
        let mut survivors = Vec::with_capacity(snapshot.len());
        let mut queue = snapshot.into_iter();
        while let Some(entry) = queue.next() {
            match self.dispatch(entry) {
                Ok(Some(entry)) => survivors.push(entry),
                Ok(None) => {}
                Err(err) => {
                    // the untouched rest stays registered, in place
                    survivors.extend(queue);
                    self.requeue(survivors);
                    return Err(err);
                }
            }
        }
        self.requeue(survivors);
        Ok(())
    }

    // put this tick's survivors back ahead of the tasks registered
    // during it, dropping any that were replaced meanwhile
    fn requeue(&mut self, survivors: Vec<Entry<V>>) {
        let mut registry = self.handle.registry.borrow_mut();
        let added = mem::take(&mut registry.live);
        let (kept, replaced): (Vec<_>, Vec<_>) =
            survivors.into_iter().partition(|e| registry.owns(e));
        registry.live = kept;
        registry.live.extend(added);
        drop(registry);
        for entry in &replaced {
            debug!("sched: '{}' was replaced while queued", entry.name);
        }
        drop(replaced);
    }

    /// Evaluate and maybe resume one entry. `Ok(Some(_))` hands it back
    /// for the next tick.
    fn dispatch(&mut self, mut entry: Entry<V>) -> Result<Option<Entry<V>>, SchedulerError> {
        let evaluation: Option<Evaluation<V>> = {
            let mut registry = self.handle.registry.borrow_mut();
            if !registry.owns(&entry) {
                None
            } else {
                Some(entry.condition.evaluate(self.handle.clock.now(), &mut *registry))
            }
        };

        let step = match evaluation {
            // replaced by a newer registration during this tick
            None => {
                debug!("sched: dropping replaced entry for '{}'", entry.name);
                return Ok(None);
            }
            Some(Evaluation::Pending) => return Ok(Some(entry)),
            Some(Evaluation::Satisfied(value)) => entry.task.resume(value),
            Some(Evaluation::Failed(error)) => {
                debug!("sched: throwing into '{}': {}", entry.name, error);
                entry.task.throw(error)
            }
        };

        match step {
            Ok(Step::Wait(condition)) => {
                entry.condition = condition;
                if self.handle.registry.borrow().owns(&entry) {
                    Ok(Some(entry))
                } else {
                    debug!("sched: '{}' was replaced while running", entry.name);
                    Ok(None)
                }
            }
            Ok(Step::Done(value)) => {
                debug!("sched: task '{}' finished", entry.name);
                let mut registry = self.handle.registry.borrow_mut();
                // a replacement registered meanwhile owns the name now
                if registry.owns(&entry) {
                    registry.record_return(&entry.name, value);
                    registry.release(&entry);
                }
                drop(registry);
                Ok(None)
            }
            Err(error) => {
                let owned = {
                    let mut registry = self.handle.registry.borrow_mut();
                    let owned = registry.owns(&entry);
                    registry.release(&entry);
                    owned
                };
                match self.on_uncaught {
                    FailurePolicy::Isolate => {
                        warn!("sched: task '{}' failed: {}", entry.name, error);
                        if owned {
                            self.handle
                                .registry
                                .borrow_mut()
                                .failures
                                .insert(entry.name.clone(), error);
                        }
                        Ok(None)
                    }
                    FailurePolicy::Abort => {
                        error!("sched: task '{}' failed, aborting: {}", entry.name, error);
                        Err(SchedulerError::Uncaught {
                            task: mem::take(&mut entry.name),
                            error,
                        })
                    }
                }
            }
        }
    }
}
