//! Realtime listener.
//!
//! Subscribes to one broadcast topic for all entity types and turns every
//! event into a coalesced sync request. Envelope payloads are never written to
//! the local store; the next down-sync applies the change under the conflict
//! policy and dependency ordering.

mod envelope;
mod trigger;

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::RetryPolicy;
use crate::models::ActorId;
use crate::remote::RemoteClient;

pub use envelope::{Envelope, Operation, RealtimeEvent, SUPPORTED_EVENT_VERSION};
pub use trigger::SyncTrigger;

const EVENT_BUFFER: usize = 64;

/// Handle to a running listener task.
pub struct RealtimeListener {
    task: JoinHandle<()>,
    events: broadcast::Sender<RealtimeEvent>,
}

impl std::fmt::Debug for RealtimeListener {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RealtimeListener")
            .field("finished", &self.task.is_finished())
            .finish_non_exhaustive()
    }
}

impl RealtimeListener {
    /// Start listening on `topic`.
    ///
    /// Lost connections are retried with `reconnect` backoff until `stop`;
    /// after a successful reconnect a sync is requested because events may
    /// have been missed. Once `reconnect.max_attempts` consecutive attempts
    /// have failed the outage is reported as a `Degraded` event plus a sync
    /// request, and retries continue at the capped delay.
    pub fn spawn(
        remote: Arc<dyn RemoteClient>,
        topic: impl Into<String>,
        actor: ActorId,
        trigger: SyncTrigger,
        reconnect: RetryPolicy,
    ) -> Self {
        let topic = topic.into();
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let task = tokio::spawn(listen(
            remote,
            topic,
            actor,
            trigger,
            reconnect,
            events.clone(),
        ));
        Self { task, events }
    }

    /// Observe decoded events (for logging and tests).
    pub fn events(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Close the subscription and wait for the task to end.
    pub async fn stop(self) {
        self.task.abort();
        let _ = self.task.await;
        tracing::debug!("Realtime listener stopped");
    }
}

async fn listen(
    remote: Arc<dyn RemoteClient>,
    topic: String,
    actor: ActorId,
    trigger: SyncTrigger,
    reconnect: RetryPolicy,
    events: broadcast::Sender<RealtimeEvent>,
) {
    let mut failures = 0_u32;
    let mut connected_before = false;
    let mut degraded = false;

    loop {
        match remote.subscribe(&topic).await {
            Ok(mut stream) => {
                failures = 0;
                degraded = false;
                if connected_before {
                    tracing::info!(topic = %topic, "Realtime reconnected, requesting sync");
                    trigger.request();
                } else {
                    tracing::info!(topic = %topic, "Realtime subscribed");
                }
                connected_before = true;

                while let Some(item) = stream.next().await {
                    match item {
                        Ok(frame) => {
                            let event = RealtimeEvent::decode(frame, &actor);
                            handle_event(event, &trigger, &events);
                        }
                        Err(error) => {
                            tracing::warn!(topic = %topic, "Realtime channel error: {error}");
                            break;
                        }
                    }
                }
            }
            Err(error) => {
                tracing::warn!(topic = %topic, "Realtime subscribe failed: {error}");
            }
        }

        failures = failures.saturating_add(1);
        if !degraded && !reconnect.allows_retry(failures) {
            degraded = true;
            tracing::error!(topic = %topic, failures, "Realtime connection lost, still retrying");
            let _ = events.send(RealtimeEvent::Degraded {
                reason: "realtime connection lost".to_string(),
            });
            trigger.request();
        }
        tokio::time::sleep(reconnect.delay_for(failures)).await;
    }
}

fn handle_event(
    event: RealtimeEvent,
    trigger: &SyncTrigger,
    events: &broadcast::Sender<RealtimeEvent>,
) {
    match &event {
        RealtimeEvent::Change {
            envelope,
            self_echo: true,
        } => {
            tracing::debug!(table = %envelope.table, "Self-echo received, confirming with a sync");
        }
        RealtimeEvent::Change {
            envelope,
            self_echo: false,
        } => {
            tracing::debug!(
                table = %envelope.table,
                operation = ?envelope.operation,
                "Remote change received"
            );
        }
        RealtimeEvent::Degraded { reason } => {
            tracing::warn!("Realtime event degraded to a generic sync: {reason}");
        }
    }
    trigger.request();
    let _ = events.send(event);
}
