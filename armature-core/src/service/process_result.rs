use std::time::Duration;

/// Default clamp applied when a host restricts sleeping.
pub const DEFAULT_MAX_SLEEP_LIMIT: Duration = Duration::from_millis(100);

/// The outcome of one service `process()` tick: how long the host loop may
/// sleep before the next tick, or a request to quit.
///
/// Results from multiple services fold with [`merge`](ProcessResult::merge),
/// which always keeps the most restrictive demand: `Quit` beats everything,
/// a sleep limit beats no limit, and the shorter of two limits wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessResult {
    /// No constraint on how long the host may sleep.
    #[default]
    NoSleepLimit,
    /// Sleep at most this long before processing again.
    SleepLimit(Duration),
    /// The host loop should exit.
    Quit,
}

impl ProcessResult {
    /// Folds two results into the most restrictive one.
    pub fn merge(self, other: ProcessResult) -> ProcessResult {
        use ProcessResult::*;
        match (self, other) {
            (Quit, _) | (_, Quit) => Quit,
            (NoSleepLimit, rhs) => rhs,
            (lhs, NoSleepLimit) => lhs,
            (SleepLimit(lhs), SleepLimit(rhs)) => SleepLimit(lhs.min(rhs)),
        }
    }

    /// Clamps the sleep hint with the default limit when `allow` is false.
    pub fn allow_sleep(self, allow: bool) -> ProcessResult {
        self.allow_sleep_with_limit(allow, DEFAULT_MAX_SLEEP_LIMIT)
    }

    /// With `allow == false`, bounds the result to `SleepLimit(limit)` at
    /// most: `NoSleepLimit` becomes `SleepLimit(limit)`, an existing limit is
    /// shortened to `min(d, limit)`, and `Quit` passes through untouched.
    pub fn allow_sleep_with_limit(self, allow: bool, limit: Duration) -> ProcessResult {
        if allow {
            return self;
        }
        match self {
            ProcessResult::NoSleepLimit => ProcessResult::SleepLimit(limit),
            ProcessResult::SleepLimit(duration) => ProcessResult::SleepLimit(duration.min(limit)),
            ProcessResult::Quit => ProcessResult::Quit,
        }
    }

    /// The sleep hint, if this result carries one.
    pub fn sleep_duration(self) -> Option<Duration> {
        match self {
            ProcessResult::SleepLimit(duration) => Some(duration),
            _ => None,
        }
    }

    pub fn is_quit(self) -> bool {
        matches!(self, ProcessResult::Quit)
    }
}
