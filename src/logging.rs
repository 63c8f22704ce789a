use std::time::{Duration, Instant};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

pub const WARN_THROTTLE_MS: u64 = 500;

/// Installs the global subscriber. Keep the guard alive for the lifetime of the process.
pub fn init_tracing(crate_target: &str) -> WorkerGuard {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{crate_target}=info,info")));

    let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stdout());

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_target(true)
        .try_init();

    guard
}

/// Suppresses a repeated warning with the same reason inside one window.
#[derive(Debug)]
pub struct WarnThrottle {
    window: Duration,
    last_reason: Option<String>,
    last_emit: Option<Instant>,
}

impl Default for WarnThrottle {
    fn default() -> Self {
        Self::new(Duration::from_millis(WARN_THROTTLE_MS))
    }
}

impl WarnThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_reason: None,
            last_emit: None,
        }
    }

    pub fn allow(&mut self, reason: &str, now: Instant) -> bool {
        let repeated = self.last_reason.as_deref() == Some(reason)
            && self
                .last_emit
                .map(|instant| now.saturating_duration_since(instant) < self.window)
                .unwrap_or(false);
        if repeated {
            return false;
        }

        self.last_reason = Some(reason.to_string());
        self.last_emit = Some(now);
        true
    }
}
