use std::{
    future::Future,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use relay_metrics::{printable_rate, SAMPLE_INTERVAL};
use tokio::{
    task::JoinSet,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, Instrument as _};

use super::stats::HandlerStats;
use crate::{config::HandlerConfiguration, limiter::RateLimiter, queue::EntityType};

/// State shared by the periodic reporting tasks of a handler.
pub(super) struct Reporter {
    handler: String,
    entity_type: EntityType,
    stats: Arc<HandlerStats>,
    report_received_stats: bool,
    no_data_limiter: RateLimiter,
}

impl Reporter {
    pub(super) fn new(
        handler: String, entity_type: EntityType, stats: Arc<HandlerStats>, config: &HandlerConfiguration,
    ) -> Result<Self, crate::limiter::LimiterError> {
        let no_data_rate = 1.0 / config.no_data_stats_interval().as_secs_f64().max(1.0);
        Ok(Self {
            handler,
            entity_type,
            stats,
            report_received_stats: config.report_received_stats(),
            no_data_limiter: RateLimiter::new(no_data_rate)?,
        })
    }

    fn print_stats(&self) {
        let rates = self.stats.received_rates();

        // Idle queues still log, but only once per no-data interval.
        if rates.five_minute_count() == 0 && !self.no_data_limiter.try_acquire() {
            return;
        }

        if self.report_received_stats {
            let unit = self.entity_type.rate_unit();
            info!(
                "[{}] {} received rate: {} {} (1 min), {} {} (5 min), {} {} (current).",
                self.handler,
                self.entity_type.capitalized_name(),
                printable_rate(rates.one_minute_rate()),
                unit,
                printable_rate(rates.five_minute_rate()),
                unit,
                rates.current_rate().round() as u64,
                unit,
            );
        }
    }

    fn print_total(&self) {
        info!(
            "[{}] {} processed since start: {}; blocked: {}",
            self.handler,
            self.entity_type.capitalized_name(),
            self.stats.sent(),
            self.stats.blocked(),
        );
    }
}

/// Owns the periodic reporting tasks of a handler.
///
/// Tasks are started by [`spawn`][Self::spawn] and run until [`stop`][Self::stop] is called or the guard is dropped.
pub(super) struct ReporterGuard {
    token: CancellationToken,
    tasks: Mutex<JoinSet<()>>,
}

impl ReporterGuard {
    /// Spawns the sampling, stats, and totals tasks for `reporter`.
    ///
    /// Must be called from within a Tokio runtime.
    pub(super) fn spawn(reporter: Reporter, config: &HandlerConfiguration) -> Self {
        let token = CancellationToken::new();
        let reporter = Arc::new(reporter);
        let mut tasks = JoinSet::new();

        let sampler = Arc::clone(&reporter);
        spawn_periodic(&mut tasks, token.clone(), SAMPLE_INTERVAL, move || {
            sampler.stats.received_rates().sample()
        });

        let stats = Arc::clone(&reporter);
        spawn_periodic(&mut tasks, token.clone(), config.stats_interval(), move || stats.print_stats());

        if reporter.report_received_stats {
            let totals = Arc::clone(&reporter);
            spawn_periodic(&mut tasks, token.clone(), config.totals_interval(), move || totals.print_total());
        }

        Self {
            token,
            tasks: Mutex::new(tasks),
        }
    }

    /// Stops all reporting tasks.
    ///
    /// Calling this more than once has no further effect.
    pub(super) fn stop(&self) {
        self.token.cancel();
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).abort_all();
    }

    /// Returns `true` if the reporting tasks have been stopped.
    pub(super) fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for ReporterGuard {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

fn spawn_periodic<F>(tasks: &mut JoinSet<()>, token: CancellationToken, period: Duration, f: F)
where
    F: FnMut() + Send + 'static,
{
    let period = period.max(Duration::from_millis(1));
    tasks.spawn(run_periodic(token, period, f).in_current_span());
}

fn run_periodic<F>(token: CancellationToken, period: Duration, mut f: F) -> impl Future<Output = ()> + Send
where
    F: FnMut() + Send + 'static,
{
    async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => f(),
            }
        }
    }
}
