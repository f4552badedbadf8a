// hub-kernel host demo
//
// Runs the three-task dependency chain on the real clock:
//   foo1: two 3 s delays, returns 123
//   foo2: 1 s delay, then waits up to 4 s for foo1 (times out, recovers)
//   foo3: 2 s delay, then waits for foo2 and reports its result
// A flusher task prints the background log every 500 ms and exits once
// it is the last task left.
//
// Usage: hub-kernel [settings.txt]

use embassy_time::Duration;
use log::{LevelFilter, info, warn};

use hub_kernel::bglog::{self, BgLog};
use hub_kernel::kernel::{
    Coroutine, Scheduler, SchedulerConfig, SchedulerError, SchedulerHandle, Suspender,
    SystemClock,
};

type Value = Option<u32>;
type Handle = SchedulerHandle<Value, SystemClock>;

static BG_LOG: BgLog = BgLog::new();

const FLUSH_EVERY: Duration = Duration::from_millis(500);

fn load_config() -> SchedulerConfig {
    let Some(path) = std::env::args().nth(1) else {
        return SchedulerConfig::defaults();
    };
    match std::fs::read(&path) {
        Ok(data) => SchedulerConfig::parse(&data),
        Err(e) => {
            warn!("settings: cannot read {}: {}, using defaults", path, e);
            SchedulerConfig::defaults()
        }
    }
}

fn foo1(h: Handle) -> Coroutine<Value> {
    Coroutine::new(move |co: Suspender<Value>| async move {
        info!("foo1a");
        let at = co.wait(h.after(Duration::from_secs(3))).await?;
        info!("foo1b, event_time = {:?}", at.time());
        let at = co.wait(h.after(Duration::from_secs(3))).await?;
        info!("foo1c, event_time = {:?}", at.time());
        Ok(Some(123))
    })
}

fn foo2(h: Handle) -> Coroutine<Value> {
    Coroutine::new(move |co: Suspender<Value>| async move {
        info!("foo2a");
        let at = co.wait(h.after(Duration::from_secs(1))).await?;
        info!("foo2b, event_time = {:?}", at.time());
        match co.wait(h.completion_of("foo1", Some(Duration::from_secs(4)))).await {
            Ok(done) => info!("foo2c, return_value = {:?}", done.into_completed()),
            Err(e) => info!("foo2c, {}", e),
        }
        Ok(Some(456))
    })
}

fn foo3(h: Handle) -> Coroutine<Value> {
    Coroutine::new(move |co: Suspender<Value>| async move {
        info!("foo3a");
        let at = co.wait(h.after(Duration::from_secs(2))).await?;
        info!("foo3b, event_time = {:?}", at.time());
        let done = co.wait(h.completion_of("foo2", None)).await?;
        info!("foo3c, return_value = {:?}", done.into_completed().flatten());
        Ok(None)
    })
}

fn flusher(h: Handle) -> Coroutine<Value> {
    Coroutine::new(move |co: Suspender<Value>| async move {
        loop {
            for line in BG_LOG.take() {
                println!("{}", line);
            }
            if h.len() <= 1 {
                return Ok(None);
            }
            co.wait(h.after(FLUSH_EVERY)).await?;
        }
    })
}

fn main() -> Result<(), SchedulerError> {
    if bglog::init(&BG_LOG, LevelFilter::Info).is_err() {
        eprintln!("logger already installed");
    }
    let config = load_config();

    let mut sched = Scheduler::with_config(SystemClock, &config);
    let h = sched.handle();
    sched.spawn_named("foo1", foo1(h.clone()));
    sched.spawn_named("foo2", foo2(h.clone()));
    sched.spawn_named("foo3", foo3(h.clone()));
    sched.spawn_named("flusher", flusher(h));

    let result = sched.run(config.poll_interval);
    for line in BG_LOG.take() {
        println!("{}", line);
    }
    result?;
    println!("processing finished");
    Ok(())
}
