//! Minimal actor framework.
//!
//! An actor owns its state exclusively and processes one message at a time
//! from a bounded mailbox. Callers interact with it only through an
//! [`ActorHandle`], optionally waiting for a reply on a oneshot channel.

use std::fmt::Debug;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

// =============================================================================
// Core Traits
// =============================================================================

/// Marker trait for actor messages.
pub trait Message: Send + Debug + 'static {}

impl<T: Send + Debug + 'static> Message for T {}

/// Behavior of an actor.
#[async_trait]
pub trait Actor: Send + 'static {
    /// The message type this actor handles.
    type Message: Message;

    /// Actor name for logging.
    fn name(&self) -> &str;

    /// Handle a single message. Returns `false` to stop the actor.
    async fn handle(&mut self, msg: Self::Message) -> bool;

    /// Called when the actor is about to stop.
    async fn on_stop(&mut self) {}
}

// =============================================================================
// Errors
// =============================================================================

/// Errors that can occur in actors.
#[derive(Debug, Error)]
pub enum ActorError {
    /// Actor has stopped.
    #[error("actor stopped")]
    ActorStopped,

    /// The actor dropped the reply channel without answering.
    #[error("actor dropped reply")]
    NoReply,
}

// =============================================================================
// Actor Handle
// =============================================================================

/// Handle for sending messages to an actor.
pub struct ActorHandle<M: Message> {
    tx: mpsc::Sender<M>,
    actor_id: String,
}

impl<M: Message> Clone for ActorHandle<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            actor_id: self.actor_id.clone(),
        }
    }
}

impl<M: Message> ActorHandle<M> {
    /// Send a message to the actor.
    pub async fn send(&self, msg: M) -> Result<(), ActorError> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| ActorError::ActorStopped)
    }

    /// Send a message built around a reply channel and wait for the answer.
    pub async fn request<T, F>(&self, build: F) -> Result<T, ActorError>
    where
        F: FnOnce(oneshot::Sender<T>) -> M,
    {
        let (reply_to, reply) = oneshot::channel();
        self.send(build(reply_to)).await?;
        reply.await.map_err(|_| ActorError::NoReply)
    }

    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }
}

// =============================================================================
// Spawning
// =============================================================================

/// Spawn an actor on the tokio runtime.
///
/// The actor runs until it asks to stop, `shutdown` is set to true, or
/// every handle has been dropped. If the shutdown sender is
/// dropped the actor keeps running on its mailbox alone.
pub fn spawn_actor<A: Actor>(
    actor: A,
    mailbox_size: usize,
    shutdown: watch::Receiver<bool>,
) -> (ActorHandle<A::Message>, JoinHandle<()>) {
    let actor_id = format!("{}_{}", actor.name(), uuid::Uuid::new_v4().simple());
    let (tx, rx) = mpsc::channel(mailbox_size);

    info!(actor_id = %actor_id, "Spawned actor");

    let task = tokio::spawn(run_actor_loop(actor, rx, shutdown, actor_id.clone()));
    (ActorHandle { tx, actor_id }, task)
}

async fn run_actor_loop<A: Actor>(
    mut actor: A,
    mut rx: mpsc::Receiver<A::Message>,
    mut shutdown: watch::Receiver<bool>,
    actor_id: String,
) {
    let mut shutdown_live = true;
    debug!(actor_id = %actor_id, "Actor started");

    loop {
        tokio::select! {
            biased;

            changed = shutdown.changed(), if shutdown_live => {
                match changed {
                    Ok(()) if *shutdown.borrow() => {
                        info!(actor_id = %actor_id, "Actor received shutdown signal");
                        break;
                    }
                    Ok(()) => {}
                    Err(_) => shutdown_live = false,
                }
            }

            msg = rx.recv() => {
                let Some(msg) = msg else {
                    debug!(actor_id = %actor_id, "Actor mailbox closed");
                    break;
                };
                if !actor.handle(msg).await {
                    info!(actor_id = %actor_id, "Actor requested stop");
                    break;
                }
            }
        }
    }

    actor.on_stop().await;
    info!(actor_id = %actor_id, "Actor stopped");
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    enum CounterMessage {
        Add(u64),
        Get(oneshot::Sender<u64>),
        Stop,
    }

    struct Counter {
        total: u64,
    }

    #[async_trait]
    impl Actor for Counter {
        type Message = CounterMessage;

        fn name(&self) -> &str {
            "counter"
        }

        async fn handle(&mut self, msg: CounterMessage) -> bool {
            match msg {
                CounterMessage::Add(n) => self.total += n,
                CounterMessage::Get(reply_to) => {
                    let _ = reply_to.send(self.total);
                }
                CounterMessage::Stop => return false,
            }
            true
        }
    }

    #[tokio::test]
    async fn test_messages_processed_in_order() {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (handle, _task) = spawn_actor(Counter { total: 0 }, 8, shutdown_rx);

        handle.send(CounterMessage::Add(2)).await.unwrap();
        handle.send(CounterMessage::Add(3)).await.unwrap();

        let total = handle.request(CounterMessage::Get).await.unwrap();
        assert_eq!(total, 5);
        assert!(handle.actor_id().starts_with("counter_"));
    }

    #[tokio::test]
    async fn test_shutdown_signal_stops_actor() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (handle, task) = spawn_actor(Counter { total: 0 }, 8, shutdown_rx);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();

        assert!(matches!(
            handle.send(CounterMessage::Add(1)).await,
            Err(ActorError::ActorStopped)
        ));
    }

    #[tokio::test]
    async fn test_dropped_shutdown_sender_keeps_actor_alive() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (handle, _task) = spawn_actor(Counter { total: 0 }, 8, shutdown_rx);
        drop(shutdown_tx);

        handle.send(CounterMessage::Add(7)).await.unwrap();
        assert_eq!(handle.request(CounterMessage::Get).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_requested_stop_ends_loop() {
        let (_tx, rx) = watch::channel(false);
        let (handle, task) = spawn_actor(Counter { total: 0 }, 8, rx);
        handle.send(CounterMessage::Stop).await.unwrap();
        task.await.unwrap();
        assert!(handle.request(CounterMessage::Get).await.is_err());
    }
}
