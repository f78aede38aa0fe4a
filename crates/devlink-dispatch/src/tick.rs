//! Fixed-rate pacing for the processing loop.
//!
//! The dispatcher drains the inbound queue once per tick. Ticks fire at a
//! fixed rate; when the loop falls behind, missed ticks are skipped and the
//! schedule restarts from now, so a slow handler never causes a burst of
//! back-to-back drains.
//!
//! ```ignore
//! let mut scheduler = TickScheduler::with_rate(60);
//! loop {
//!     scheduler.wait_for_tick().await;
//!     dispatcher.tick();
//!     scheduler.record_tick_end();
//! }
//! ```

use std::time::Duration;

use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, trace, warn};

/// Pacing configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct TickConfig {
    /// Ticks per second. Clamped to `1..=MAX_TICK_RATE_HZ`.
    pub tick_rate_hz: u32,
    /// Fraction of the tick budget (0.0–1.0) above which a tick logs a
    /// warning.
    pub budget_warn_threshold: f64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 60,
            budget_warn_threshold: 0.80,
        }
    }
}

impl TickConfig {
    pub const MAX_TICK_RATE_HZ: u32 = 240;

    pub fn with_rate(tick_rate_hz: u32) -> Self {
        Self {
            tick_rate_hz,
            ..Default::default()
        }
    }

    /// Clamps out-of-range values. Called by [`TickScheduler::new`].
    pub fn validated(mut self) -> Self {
        if self.tick_rate_hz > Self::MAX_TICK_RATE_HZ {
            warn!(
                rate = self.tick_rate_hz,
                max = Self::MAX_TICK_RATE_HZ,
                "tick_rate_hz exceeds maximum, clamping"
            );
            self.tick_rate_hz = Self::MAX_TICK_RATE_HZ;
        }
        if self.tick_rate_hz == 0 {
            warn!("tick_rate_hz of 0 would never drain the queue, using 1");
            self.tick_rate_hz = 1;
        }
        if self.budget_warn_threshold.is_nan() {
            self.budget_warn_threshold = 1.0;
        }
        self.budget_warn_threshold = self.budget_warn_threshold.clamp(0.0, 1.0);
        self
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_rate_hz.max(1)))
    }
}

/// What [`TickScheduler::wait_for_tick`] reports about the tick that fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickInfo {
    /// Starts at 1.
    pub tick: u64,
    /// Whether the tick fired more than a tenth of a period late.
    pub overrun: bool,
    /// Whole periods that were skipped to catch up.
    pub ticks_skipped: u64,
}

/// Counters accumulated over the scheduler's life.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickMetrics {
    pub total_ticks: u64,
    pub total_overruns: u64,
    pub total_skipped: u64,
    /// Longest span between a tick firing and [`TickScheduler::record_tick_end`].
    pub max_tick_time: Duration,
    /// Utilization of the most recent tick (elapsed / budget).
    pub budget_utilization: f64,
}

/// Fires ticks at a fixed rate, skipping missed ones.
#[derive(Debug)]
pub struct TickScheduler {
    config: TickConfig,
    period: Duration,
    interval: Interval,
    tick_count: u64,
    tick_start: Option<Instant>,
    metrics: TickMetrics,
}

impl TickScheduler {
    pub fn new(config: TickConfig) -> Self {
        let config = config.validated();
        let period = config.tick_duration();
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        debug!(
            rate_hz = config.tick_rate_hz,
            budget_ms = period.as_secs_f64() * 1000.0,
            "tick scheduler created"
        );

        Self {
            config,
            period,
            interval,
            tick_count: 0,
            tick_start: None,
            metrics: TickMetrics::default(),
        }
    }

    pub fn with_rate(tick_rate_hz: u32) -> Self {
        Self::new(TickConfig::with_rate(tick_rate_hz))
    }

    /// Waits for the next tick.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        let deadline = self.interval.tick().await;
        let late_by = Instant::now().saturating_duration_since(deadline);

        self.tick_count += 1;
        self.tick_start = Some(Instant::now());

        let overrun = late_by > self.period / 10;
        let ticks_skipped = if overrun {
            (late_by.as_nanos() / self.period.as_nanos().max(1)) as u64
        } else {
            0
        };
        if ticks_skipped > 0 {
            warn!(
                tick = self.tick_count,
                skipped = ticks_skipped,
                late_ms = late_by.as_secs_f64() * 1000.0,
                "processing loop fell behind, skipping ticks"
            );
        }

        self.metrics.total_ticks += 1;
        self.metrics.total_skipped += ticks_skipped;
        if overrun {
            self.metrics.total_overruns += 1;
        }
        trace!(tick = self.tick_count, overrun, "tick fired");

        TickInfo {
            tick: self.tick_count,
            overrun,
            ticks_skipped,
        }
    }

    /// Marks the end of the work done for the current tick.
    ///
    /// A no-op unless a tick has fired since the last call.
    pub fn record_tick_end(&mut self) {
        let Some(start) = self.tick_start.take() else {
            return;
        };
        let elapsed = start.elapsed();
        let utilization = elapsed.as_secs_f64() / self.period.as_secs_f64();

        self.metrics.budget_utilization = utilization;
        self.metrics.max_tick_time = self.metrics.max_tick_time.max(elapsed);

        if utilization >= self.config.budget_warn_threshold {
            warn!(
                tick = self.tick_count,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                budget_ms = self.period.as_secs_f64() * 1000.0,
                utilization_pct = format!("{:.1}", utilization * 100.0),
                "tick approaching budget limit"
            );
        }
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn tick_rate_hz(&self) -> u32 {
        self.config.tick_rate_hz
    }

    pub fn tick_duration(&self) -> Duration {
        self.period
    }

    pub fn metrics(&self) -> &TickMetrics {
        &self.metrics
    }
}
