//! Status monitor task.
//!
//! One task owns the [`MonitorState`] and multiplexes two timers: the
//! telemetry poll and the elapsed-time tick. Requests run in their own tasks
//! and report back over a channel, so a slow device never stalls the stall
//! clock. Dropping the [`MonitorHandle`] tears everything down.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{DeviceError, MonitorClosed};
use crate::net::DeviceApi;
use crate::status::MonitorState;
use crate::types::SensorStatus;

enum Command {
    ResetStats { done: oneshot::Sender<()> },
}

struct PollResult {
    result: Result<SensorStatus, DeviceError>,
    reset: bool,
}

// Callers waiting on a reset. Only one reset runs at a time; requests that
// arrive meanwhile are queued and served by the next one.
#[derive(Default)]
struct Resets {
    running: bool,
    waiting: Vec<oneshot::Sender<()>>,
    queued: Vec<oneshot::Sender<()>>,
}

impl Resets {
    fn request(&mut self, done: oneshot::Sender<()>) -> bool {
        if self.running {
            self.queued.push(done);
            false
        } else {
            self.running = true;
            self.waiting.push(done);
            true
        }
    }

    // Releases the callers of the finished reset; true when another is due.
    fn finish(&mut self) -> bool {
        for done in self.waiting.drain(..) {
            let _ = done.send(());
        }
        self.running = !self.queued.is_empty();
        std::mem::swap(&mut self.waiting, &mut self.queued);
        self.running
    }
}

// Aborts the request task when replaced or dropped.
struct InFlight(JoinHandle<()>);

impl InFlight {
    fn is_running(&self) -> bool {
        !self.0.is_finished()
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct MonitorHandle {
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<MonitorState>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Starts polling `device`; the first poll goes out immediately.
    pub fn spawn<D: DeviceApi>(
        device: Arc<D>,
        status_interval: Duration,
        elapsed_tick: Duration,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(8);
        let (view_tx, view_rx) = watch::channel(MonitorState::new(Instant::now()));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(run(
            device,
            status_interval,
            elapsed_tick,
            commands_rx,
            shutdown_rx,
            view_tx,
        ));

        MonitorHandle {
            commands: commands_tx,
            view: view_rx,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }

    pub fn from_config<D: DeviceApi>(device: Arc<D>, config: &Config) -> Self {
        Self::spawn(device, config.status_interval(), config.elapsed_tick())
    }

    /// Latest state, cloned out of the watch channel.
    pub fn current(&self) -> MonitorState {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MonitorState> {
        self.view.clone()
    }

    /// Clears the device's tick statistics and re-polls.
    ///
    /// Resolves once the follow-up poll has been applied. Device failures are
    /// logged by the monitor and are not reported here.
    pub async fn reset_stats(&self) -> Result<(), MonitorClosed> {
        let (done, wait) = oneshot::channel();
        self.commands
            .send(Command::ResetStats { done })
            .await
            .map_err(|_| MonitorClosed)?;
        wait.await.map_err(|_| MonitorClosed)
    }

    /// Stops both timers and waits for the task to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn spawn_poll<D: DeviceApi>(
    device: Arc<D>,
    results: mpsc::Sender<PollResult>,
    reset: bool,
) -> InFlight {
    InFlight(tokio::spawn(async move {
        if reset {
            if let Err(e) = device.reset_stats().await {
                warn!(error = %e, "device stats reset failed");
            }
        }
        let result = device.sensor_status().await;
        let _ = results.send(PollResult { result, reset }).await;
    }))
}

async fn run<D: DeviceApi>(
    device: Arc<D>,
    status_interval: Duration,
    elapsed_tick: Duration,
    mut commands: mpsc::Receiver<Command>,
    mut shutdown: oneshot::Receiver<()>,
    view: watch::Sender<MonitorState>,
) {
    info!(
        status_interval_ms = status_interval.as_millis() as u64,
        elapsed_tick_ms = elapsed_tick.as_millis() as u64,
        "status monitor started"
    );

    let mut state = MonitorState::new(Instant::now());
    let mut status_timer = time::interval(status_interval);
    status_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut elapsed_timer = time::interval(elapsed_tick);
    elapsed_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let (results_tx, mut results_rx) = mpsc::channel::<PollResult>(4);
    let mut in_flight: Option<InFlight> = None;
    let mut resets = Resets::default();

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = status_timer.tick() => {
                if in_flight.as_ref().is_some_and(InFlight::is_running) {
                    debug!("previous status poll still outstanding, skipping tick");
                    continue;
                }
                in_flight = Some(spawn_poll(device.clone(), results_tx.clone(), false));
            }
            _ = elapsed_timer.tick() => {
                state.tick(Instant::now());
            }
            Some(PollResult { result, reset }) = results_rx.recv() => {
                match result {
                    Ok(status) => state.apply(status, Instant::now()),
                    Err(e) => {
                        warn!(error = %e, "sensor status poll failed, keeping last snapshot");
                        state.poll_failed();
                    }
                }
                view.send_replace(state.clone());
                if reset && resets.finish() {
                    in_flight = Some(spawn_poll(device.clone(), results_tx.clone(), true));
                }
                continue;
            }
            Some(command) = commands.recv() => match command {
                Command::ResetStats { done } => {
                    if resets.request(done) {
                        info!("resetting device tick statistics");
                        in_flight = Some(spawn_poll(device.clone(), results_tx.clone(), true));
                    } else {
                        debug!("reset already running, queued");
                    }
                }
            },
        }
        view.send_replace(state.clone());
    }

    info!("status monitor stopped");
}
