//! Remote-side state mirror.
//!
//! Polls `GET_STATE` on a fixed interval and publishes what it learns on a
//! watch channel.  Ticks are skipped while the local idle flag is set
//! (screensaver showing), so an idle Remote generates no traffic.

use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tuner_proto::protocol::StateSnapshot;

use crate::client::RemoteClient;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteView {
    /// Last good snapshot; kept across failed polls.
    pub state: Option<StateSnapshot>,
    pub last_error: Option<String>,
    pub last_update: Option<DateTime<Local>>,
    pub polls: u64,
}

pub struct PollerHandle {
    view_rx: watch::Receiver<RemoteView>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub fn view(&self) -> watch::Receiver<RemoteView> {
        self.view_rx.clone()
    }

    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

pub fn spawn(
    client: RemoteClient,
    address: String,
    interval: Duration,
    idle: watch::Receiver<bool>,
) -> PollerHandle {
    let (view_tx, view_rx) = watch::channel(RemoteView::default());
    let cancel = CancellationToken::new();
    let task = tokio::spawn(poll_loop(client, address, interval, idle, view_tx, cancel.clone()));
    PollerHandle {
        view_rx,
        cancel,
        task,
    }
}

async fn poll_loop(
    client: RemoteClient,
    address: String,
    interval: Duration,
    idle: watch::Receiver<bool>,
    view_tx: watch::Sender<RemoteView>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if *idle.borrow() {
            debug!("poller: idle, skipping state poll");
            continue;
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = client.fetch_state(&address) => result,
        };

        view_tx.send_modify(|view| {
            view.polls += 1;
            match result {
                Ok(snapshot) => {
                    view.state = Some(snapshot);
                    view.last_error = None;
                    view.last_update = Some(Local::now());
                }
                Err(e) => {
                    warn!("poller: state poll of {} failed: {}", address, e);
                    view.last_error = Some(e.to_string());
                }
            }
        });
    }
}
