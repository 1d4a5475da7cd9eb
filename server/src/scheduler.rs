//! Fixed-rate broadcast scheduler
//!
//! Ticks run independently of how often clients send updates; the hub always
//! broadcasts whatever state it knows last.

use crate::error::HubError;
use crate::hub::HubHandle;
use log::{debug, info};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

pub struct BroadcastScheduler;

impl BroadcastScheduler {
    /// Starts sending `BroadcastTick` to the hub every `tick_duration`
    pub fn spawn(hub: HubHandle, tick_duration: Duration) -> SchedulerHandle {
        let (stop, stopped) = oneshot::channel();
        let task = tokio::spawn(run(hub, tick_duration, stopped));
        SchedulerHandle {
            stop: Some(stop),
            task,
        }
    }
}

pub struct SchedulerHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<u64>,
}

impl SchedulerHandle {
    /// Stops the scheduler and returns how many ticks it delivered
    pub async fn stop(mut self) -> u64 {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.task.await.unwrap_or(0)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

async fn run(hub: HubHandle, tick_duration: Duration, mut stopped: oneshot::Receiver<()>) -> u64 {
    let mut ticker = interval(tick_duration);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // Skip the first tick since it fires immediately
    ticker.tick().await;

    info!(
        "Broadcast scheduler running at {:.1}Hz",
        1.0 / tick_duration.as_secs_f64()
    );

    let mut sent = 0;
    loop {
        tokio::select! {
            _ = &mut stopped => break,
            _ = ticker.tick() => {
                match hub.try_broadcast_tick() {
                    Ok(()) => sent += 1,
                    Err(HubError::Busy) => debug!("Hub busy, skipping tick"),
                    Err(HubError::Closed) => {
                        info!("Hub closed, stopping scheduler");
                        break;
                    }
                }
            }
        }
    }

    sent
}
