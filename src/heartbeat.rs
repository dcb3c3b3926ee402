use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, trace};

/// Parse the STOMP `heart-beat` header value (format: "cx,cy").
///
/// Parameters
/// - `header`: header string from the server or client (for example
///   "10000,10000"). The values represent milliseconds.
///
/// Returns a tuple `(cx, cy)` where each value is the heartbeat interval in
/// milliseconds. Missing or invalid fields default to `0`.
pub fn parse_heartbeat_header(header: &str) -> (u64, u64) {
    let mut parts = header.split(',');
    let cx = parts
        .next()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);
    let cy = parts
        .next()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);
    (cx, cy)
}

/// Interval at which the client should send heartbeats, given the
/// `heart-beat` header of the server's CONNECTED frame.
///
/// The second value is how often the server wants to hear from the client.
/// The client sends at 80% of that to leave room for jitter. A value of `0`
/// disables outbound heartbeats and yields `None`.
pub fn outbound_interval(server_heartbeat: &str) -> Option<Duration> {
    let (_, server_in) = parse_heartbeat_header(server_heartbeat);
    if server_in == 0 {
        return None;
    }
    let millis = (server_in.saturating_mul(4) / 5).max(1);
    Some(Duration::from_millis(millis))
}

/// A running heartbeat timer.
///
/// Every tick sends one message built by the `tick` closure to the owning
/// worker, which performs the actual write on its serialized outbound path.
/// The timer holds only a weak sender so it never keeps the worker alive.
///
/// Dropping the scheduler (or calling [`HeartbeatScheduler::stop`]) aborts
/// the timer task immediately. Ticks are tagged with the scheduler's
/// generation so the worker can discard any that were already queued.
#[derive(Debug)]
pub struct HeartbeatScheduler {
    interval: Duration,
    generation: u64,
    task: JoinHandle<()>,
}

impl HeartbeatScheduler {
    /// Start ticking every `interval`, first tick one interval from now.
    pub fn start<M, F>(
        interval: Duration,
        generation: u64,
        tx: mpsc::WeakSender<M>,
        tick: F,
    ) -> Self
    where
        M: Send + 'static,
        F: Fn(u64) -> M + Send + 'static,
    {
        debug!(?interval, generation, "starting heartbeat scheduler");
        let task = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(tx) = tx.upgrade() else { break };
                trace!(generation, "heartbeat tick");
                if tx.send(tick(generation)).await.is_err() {
                    break;
                }
            }
        });
        Self {
            interval,
            generation,
            task,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Cancel the timer. No tick is sent after this returns.
    pub fn stop(self) {
        debug!(generation = self.generation, "stopping heartbeat scheduler");
        // Drop aborts the task
    }
}

impl Drop for HeartbeatScheduler {
    fn drop(&mut self) {
        self.task.abort();
    }
}
