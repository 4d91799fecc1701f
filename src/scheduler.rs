use chrono::{DateTime, Timelike, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};

use crate::bot::{CycleReport, TradingBot};
use crate::exchange::Exchange;

/// Time from `now` until the next `interval_minutes` mark of the hour
///
/// Exactly on a mark counts as already there.
pub fn until_next_boundary(now: DateTime<Utc>, interval_minutes: u32) -> Duration {
    let interval = interval_minutes.clamp(1, 60);
    let minute = now.minute();
    let second = now.second();

    let minutes_until_next = interval - (minute % interval);
    let seconds_until_next = if minutes_until_next == interval && second == 0 {
        0 // Already at boundary
    } else {
        (minutes_until_next * 60) - second
    };

    Duration::from_secs(seconds_until_next as u64)
}

/// Next interval mark, or now when sitting exactly on one
fn next_boundary(interval_minutes: u32) -> Instant {
    Instant::now() + until_next_boundary(Utc::now(), interval_minutes)
}

/// Drives the bot: one cycle per aligned interval, the first one included
pub struct CycleScheduler {
    interval_minutes: u32,
    cooldown: Duration,
}

impl CycleScheduler {
    pub fn new(interval_minutes: u32, cooldown: Duration) -> Self {
        Self {
            interval_minutes: interval_minutes.clamp(1, 60),
            cooldown,
        }
    }

    /// Run forever
    pub async fn run<E: Exchange + 'static>(&self, bot: Arc<Mutex<TradingBot<E>>>) {
        self.run_cycles(bot, None).await;
    }

    /// Run `limit` cycles (or forever with `None`), returning how many ran
    pub async fn run_cycles<E: Exchange + 'static>(
        &self,
        bot: Arc<Mutex<TradingBot<E>>>,
        limit: Option<usize>,
    ) -> usize {
        let mut completed = 0;
        if limit == Some(0) {
            return completed;
        }

        let start = next_boundary(self.interval_minutes);
        let period = Duration::from_secs(self.interval_minutes as u64 * 60);
        let mut ticker = interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            "⏱️  First cycle in {:?}, then every {} min",
            start.saturating_duration_since(Instant::now()),
            self.interval_minutes
        );

        while limit.map_or(true, |l| completed < l) {
            ticker.tick().await;
            self.run_guarded(&bot).await;
            completed += 1;
        }

        completed
    }

    /// One cycle in its own task so neither an error nor a panic escapes
    pub async fn run_guarded<E: Exchange + 'static>(
        &self,
        bot: &Arc<Mutex<TradingBot<E>>>,
    ) -> Option<CycleReport> {
        let bot = bot.clone();
        let handle = tokio::spawn(async move {
            let mut bot = bot.lock().await;
            let report = bot.run_cycle().await;
            report
        });

        let failure = match handle.await {
            Ok(Ok(report)) => return Some(report),
            Ok(Err(e)) => format!("{:#}", e),
            Err(join_error) => format!("cycle task aborted: {}", join_error),
        };

        tracing::error!("❌ Cycle failed: {}", failure);
        tracing::info!("Cooling down for {:?}", self.cooldown);
        tokio::time::sleep(self.cooldown).await;
        None
    }
}
