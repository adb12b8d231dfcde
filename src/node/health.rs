use super::NodeService;
use crate::array::Array;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{info, trace};

/// A running core check. Dropping it cancels the loop.
pub(crate) struct HealthCheck {
    _cancel: watch::Sender<()>,
}

impl HealthCheck {
    /// Starts checking the core of `array` after `grace`, then every `every`.
    pub(crate) fn start(node: NodeService, array: Array, grace: Duration, every: Duration) -> Self {
        let (cancel, cancelled) = watch::channel(());
        info!(array = %array.id(), "Core integrity check started");
        tokio::spawn(run(node, array, grace, every, cancelled));
        Self { _cancel: cancel }
    }
}

// Ticks never overlap: the next tick is only awaited once the check returned.
async fn run(
    node: NodeService,
    array: Array,
    grace: Duration,
    every: Duration,
    mut cancelled: watch::Receiver<()>,
) {
    tokio::select! {
        _ = sleep(grace) => {}
        _ = cancelled.changed() => return,
    }

    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancelled.changed() => return,
        }

        let check = node.check_core(&array).await;
        if cancelled.has_changed().is_err() {
            return;
        }
        match check {
            Ok(()) => trace!(array = %array.id(), "Core alive"),
            Err(e) => {
                node.core_lost(&array, e).await;
                return;
            }
        }
    }
}
