//! Runner configuration.

use std::time::Duration;

use branchflow_graph::elements::app_sink::DEFAULT_MAX_BUFFERS;

/// Bytes per generated chunk, as in the classic app-source feeding loop
pub const DEFAULT_CHUNK_BYTES: usize = 1024;

/// Default streaming clock resolution
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Size of each generated chunk in bytes, rounded down to whole frames
    pub chunk_bytes: usize,
    /// How often the streaming clock advances from the system clock.
    /// `None` leaves the clock to [`Runner::advance_clock`](crate::Runner::advance_clock).
    pub tick_interval: Option<Duration>,
    /// Samples an app sink holds before dropping the oldest, unless the
    /// pipeline sets its own limit
    pub sample_queue: usize,
}

impl RunnerConfig {
    /// Configuration with a manually driven clock
    #[must_use]
    pub fn manual_clock() -> Self {
        Self {
            tick_interval: None,
            ..Self::default()
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            chunk_bytes: DEFAULT_CHUNK_BYTES,
            tick_interval: Some(DEFAULT_TICK_INTERVAL),
            sample_queue: DEFAULT_MAX_BUFFERS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RunnerConfig::default();
        assert_eq!(config.chunk_bytes, 1024);
        assert_eq!(config.tick_interval, Some(Duration::from_millis(10)));
        assert_eq!(config.sample_queue, 64);
    }

    #[test]
    fn test_manual_clock() {
        assert_eq!(RunnerConfig::manual_clock().tick_interval, None);
    }
}
