// Scheduler settings
// Text-based key=value format, same conventions as the device settings
// file: '#' starts a comment line, unknown keys are ignored.
//
//   poll_ms=10           sleep between ticks (1..=1000)
//   on_uncaught=isolate  isolate | abort
//   return_values=per_task  per_task | shared

use embassy_time::Duration;

pub const DEFAULT_POLL_MS: u64 = 10;
const MAX_POLL_MS: u64 = 1000;

/// What happens when an error escapes a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Drop the failing task, record the error, keep running the rest.
    #[default]
    Isolate,
    /// Stop the whole run loop and hand the error to the caller.
    Abort,
}

/// How finished tasks' return values are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnSlots {
    /// One value per task name.
    #[default]
    PerTask,
    /// A single slot holding whichever task finished last.
    Shared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    pub on_uncaught: FailurePolicy,
    pub return_slots: ReturnSlots,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::defaults()
    }
}

impl SchedulerConfig {
    pub const fn defaults() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_MS),
            on_uncaught: FailurePolicy::Isolate,
            return_slots: ReturnSlots::PerTask,
        }
    }

    /// Settings preserving the original loop's observable behavior.
    pub const fn legacy() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_MS),
            on_uncaught: FailurePolicy::Abort,
            return_slots: ReturnSlots::Shared,
        }
    }

    pub const fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.on_uncaught = policy;
        self
    }

    pub const fn with_return_slots(mut self, slots: ReturnSlots) -> Self {
        self.return_slots = slots;
        self
    }

    /// Parse settings text on top of the defaults.
    pub fn parse(data: &[u8]) -> Self {
        let mut config = Self::defaults();
        for line in data.split(|&b| b == b'\n') {
            let line = trim(line);
            if line.is_empty() || line[0] == b'#' {
                continue;
            }
            if let Some(eq) = line.iter().position(|&b| b == b'=') {
                let key = trim(&line[..eq]);
                let val = trim(&line[eq + 1..]);
                config.apply(key, val);
            }
        }
        config.sanitize();
        config
    }

    fn apply(&mut self, key: &[u8], val: &[u8]) {
        match key {
            b"poll_ms" => {
                if let Some(ms) = parse_u64(val) {
                    self.poll_interval = Duration::from_millis(ms);
                }
            }
            b"on_uncaught" => match val {
                b"isolate" => self.on_uncaught = FailurePolicy::Isolate,
                b"abort" => self.on_uncaught = FailurePolicy::Abort,
                _ => log::warn!("config: bad on_uncaught value, keeping {:?}", self.on_uncaught),
            },
            b"return_values" => match val {
                b"per_task" => self.return_slots = ReturnSlots::PerTask,
                b"shared" => self.return_slots = ReturnSlots::Shared,
                _ => log::warn!("config: bad return_values value, keeping {:?}", self.return_slots),
            },
            _ => {} // unknown keys silently ignored for forward compat
        }
    }

    fn sanitize(&mut self) {
        let ms = self.poll_interval.as_millis().clamp(1, MAX_POLL_MS);
        self.poll_interval = Duration::from_millis(ms);
    }
}

fn trim(s: &[u8]) -> &[u8] {
    let mut start = 0;
    let mut end = s.len();
    while start < end && matches!(s[start], b' ' | b'\t' | b'\r') {
        start += 1;
    }
    while end > start && matches!(s[end - 1], b' ' | b'\t' | b'\r') {
        end -= 1;
    }
    &s[start..end]
}

fn parse_u64(s: &[u8]) -> Option<u64> {
    if s.is_empty() {
        return None;
    }
    let mut val: u64 = 0;
    for &b in s {
        if !b.is_ascii_digit() {
            return None;
        }
        val = val.checked_mul(10)?.checked_add((b - b'0') as u64)?;
    }
    Some(val)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_gives_defaults() {
        assert_eq!(SchedulerConfig::parse(b""), SchedulerConfig::defaults());
        assert_eq!(
            SchedulerConfig::parse(b"# nothing here\n\n"),
            SchedulerConfig::default()
        );
    }

    #[test]
    fn parses_all_keys() {
        let text = b"# hub settings\r\n poll_ms = 100\r\non_uncaught=abort\nreturn_values=shared\n";
        let config = SchedulerConfig::parse(text);
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.on_uncaught, FailurePolicy::Abort);
        assert_eq!(config.return_slots, ReturnSlots::Shared);
    }

    #[test]
    fn ignores_junk_and_clamps() {
        let text = b"poll_ms=0\nwhatever=1\non_uncaught=explode\nno equals\n";
        let config = SchedulerConfig::parse(text);
        assert_eq!(config.poll_interval, Duration::from_millis(1));
        assert_eq!(config.on_uncaught, FailurePolicy::Isolate);

        let config = SchedulerConfig::parse(b"poll_ms=99999999\n");
        assert_eq!(config.poll_interval, Duration::from_millis(MAX_POLL_MS));

        let config = SchedulerConfig::parse(b"poll_ms=-5\n");
        assert_eq!(config.poll_interval, Duration::from_millis(DEFAULT_POLL_MS));
    }

    #[test]
    fn legacy_matches_original_loop() {
        let config = SchedulerConfig::legacy();
        assert_eq!(config.on_uncaught, FailurePolicy::Abort);
        assert_eq!(config.return_slots, ReturnSlots::Shared);
    }
}
