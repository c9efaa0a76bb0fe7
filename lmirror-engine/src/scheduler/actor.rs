//! Scheduler task and its handle
//!
//! One tokio task owns the `PlaybackScheduler` and serializes everything
//! that can change it: caller commands, transport notifications and the
//! pending timer. No two transitions ever interleave.

use super::{PlaybackScheduler, SchedulerSnapshot, StartRequest};
use crate::editor::ClipEdit;
use crate::error::{Error, PlaybackError, Result};
use crate::transport::{AudioTransport, TransportEvent};
use lmirror_common::events::{EventBus, PracticeEvent};
use lmirror_common::models::{Clip, PracticeConfiguration};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

/// Commands queued for the scheduler task
enum SchedulerCommand {
    Start {
        request: Box<StartRequest>,
        reply: oneshot::Sender<std::result::Result<Uuid, PlaybackError>>,
    },
    Pause {
        reply: oneshot::Sender<()>,
    },
    Resume {
        config: Option<PracticeConfiguration>,
        reply: oneshot::Sender<std::result::Result<(), PlaybackError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    ApplyEdit {
        clips: Vec<Clip>,
        edit: ClipEdit,
        reply: oneshot::Sender<()>,
    },
    SetForeverMode {
        enabled: bool,
        reply: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<SchedulerSnapshot>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to a running scheduler
///
/// Every method waits until the scheduler has fully processed the command,
/// so events it caused are already on the bus when the call returns.
#[derive(Clone)]
pub struct SchedulerHandle {
    commands: mpsc::Sender<SchedulerCommand>,
    bus: EventBus,
}

impl SchedulerHandle {
    /// Move `scheduler` into its own task
    ///
    /// `transport_events` is the receiver paired with the scheduler's
    /// transport. The task exits on `shutdown()` or once every handle is
    /// dropped, stopping any active run first.
    pub fn spawn<T>(
        scheduler: PlaybackScheduler<T>,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> (Self, JoinHandle<()>)
    where
        T: AudioTransport + 'static,
    {
        let (commands, command_rx) = mpsc::channel::<SchedulerCommand>(32);
        let bus = scheduler.event_bus().clone();
        let task = tokio::spawn(run(scheduler, command_rx, transport_events));
        (Self { commands, bus }, task)
    }

    /// Subscribe to future practice events
    pub fn subscribe(&self) -> broadcast::Receiver<PracticeEvent> {
        self.bus.subscribe()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    pub async fn start(&self, request: StartRequest) -> Result<Uuid> {
        let outcome = self
            .request("start", |reply| SchedulerCommand::Start {
                request: Box::new(request),
                reply,
            })
            .await?;
        Ok(outcome?)
    }

    pub async fn pause(&self) -> Result<()> {
        self.request("pause", |reply| SchedulerCommand::Pause { reply })
            .await
    }

    /// Resume, optionally with a fresh configuration snapshot
    pub async fn resume(&self, config: Option<PracticeConfiguration>) -> Result<()> {
        let outcome = self
            .request("resume", |reply| SchedulerCommand::Resume { config, reply })
            .await?;
        Ok(outcome?)
    }

    pub async fn stop(&self) -> Result<()> {
        self.request("stop", |reply| SchedulerCommand::Stop { reply })
            .await
    }

    /// Hand the scheduler an edited clip list
    pub async fn apply_edit(&self, clips: Vec<Clip>, edit: ClipEdit) -> Result<()> {
        self.request("apply_edit", |reply| SchedulerCommand::ApplyEdit {
            clips,
            edit,
            reply,
        })
        .await
    }

    pub async fn set_forever_mode(&self, enabled: bool) -> Result<()> {
        self.request("set_forever_mode", |reply| SchedulerCommand::SetForeverMode {
            enabled,
            reply,
        })
        .await
    }

    pub async fn snapshot(&self) -> Result<SchedulerSnapshot> {
        self.request("snapshot", |reply| SchedulerCommand::Snapshot { reply })
            .await
    }

    /// Stop any active run and end the scheduler task
    pub async fn shutdown(&self) -> Result<()> {
        self.request("shutdown", |reply| SchedulerCommand::Shutdown { reply })
            .await
    }

    async fn request<R>(
        &self,
        name: &str,
        command: impl FnOnce(oneshot::Sender<R>) -> SchedulerCommand,
    ) -> Result<R> {
        let (reply, reply_rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| Error::SchedulerUnavailable(format!("{}: task has exited", name)))?;
        reply_rx
            .await
            .map_err(|_| Error::SchedulerUnavailable(format!("{}: no reply", name)))
    }
}

async fn run<T: AudioTransport>(
    mut scheduler: PlaybackScheduler<T>,
    mut commands: mpsc::Receiver<SchedulerCommand>,
    mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    info!("Scheduler task started");
    let mut transport_open = true;

    loop {
        let deadline = scheduler.pending_timer().map(|t| t.deadline);

        tokio::select! {
            biased;

            command = commands.recv() => match command {
                Some(SchedulerCommand::Shutdown { reply }) => {
                    scheduler.stop().await;
                    let _ = reply.send(());
                    break;
                }
                Some(command) => handle(&mut scheduler, command).await,
                None => {
                    debug!("All scheduler handles dropped");
                    scheduler.stop().await;
                    break;
                }
            },

            event = transport_events.recv(), if transport_open => match event {
                Some(event) => scheduler.on_transport_event(event).await,
                None => {
                    debug!("Transport event channel closed");
                    transport_open = false;
                }
            },

            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                scheduler.on_timer_elapsed().await;
            }
        }
    }

    info!("Scheduler task exiting");
}

async fn handle<T: AudioTransport>(scheduler: &mut PlaybackScheduler<T>, command: SchedulerCommand) {
    // A caller that gave up waiting is not an error
    match command {
        SchedulerCommand::Start { request, reply } => {
            let _ = reply.send(scheduler.start(*request).await);
        }
        SchedulerCommand::Pause { reply } => {
            scheduler.pause().await;
            let _ = reply.send(());
        }
        SchedulerCommand::Resume { config, reply } => {
            let _ = reply.send(scheduler.resume(config).await);
        }
        SchedulerCommand::Stop { reply } => {
            scheduler.stop().await;
            let _ = reply.send(());
        }
        SchedulerCommand::ApplyEdit { clips, edit, reply } => {
            scheduler.apply_edit(clips, edit).await;
            let _ = reply.send(());
        }
        SchedulerCommand::SetForeverMode { enabled, reply } => {
            scheduler.set_forever_mode(enabled).await;
            let _ = reply.send(());
        }
        SchedulerCommand::Snapshot { reply } => {
            let _ = reply.send(scheduler.snapshot());
        }
        SchedulerCommand::Shutdown { reply } => {
            scheduler.stop().await;
            let _ = reply.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_store::MemorySessionStore;
    use crate::transport::SimulatedTransport;
    use lmirror_common::events::SchedulerState;
    use std::sync::Arc;
    use std::time::Duration;

    fn spawn() -> (SchedulerHandle, JoinHandle<()>) {
        let (transport, rx) = SimulatedTransport::new(None, Duration::from_millis(100));
        let scheduler =
            PlaybackScheduler::new(transport, Arc::new(MemorySessionStore::new()), EventBus::new(64));
        SchedulerHandle::spawn(scheduler, rx)
    }

    #[tokio::test]
    async fn test_snapshot_of_idle_scheduler() {
        let (handle, _task) = spawn();
        let snap = handle.snapshot().await.unwrap();
        assert_eq!(snap.state, SchedulerState::Idle);
        assert!(snap.session.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_ends_task() {
        let (handle, task) = spawn();
        handle.shutdown().await.unwrap();
        task.await.unwrap();

        let err = handle.pause().await.unwrap_err();
        assert!(matches!(err, Error::SchedulerUnavailable(_)));
    }

    #[tokio::test]
    async fn test_dropping_handles_ends_task() {
        let (handle, task) = spawn();
        let clone = handle.clone();
        drop(handle);
        clone.snapshot().await.unwrap();
        drop(clone);
        task.await.unwrap();
    }
}
