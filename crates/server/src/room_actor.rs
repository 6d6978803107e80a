//! Room actor — owns one room and processes its events sequentially.
//!
//! Each room runs as an independent tokio task. A submit is handled to
//! completion (placeholder clear, user broadcast, generation, assistant
//! broadcast, persistence, retitle, room-list broadcast) before the
//! next command is taken, so two submits to the same room can never
//! interleave their broadcast pairs. A slow gateway call therefore
//! stalls only its own room.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use roomrelay_protocol::{now_ts, Identity, Room, ServerEvent, TurnRole};

use crate::directory::RoomDirectory;
use crate::gateway::{GatewayReply, GenerationGateway, FALLBACK_BUSY};
use crate::history::{FallbackTurn, HistoryStore};

/// Shown until the first real turn arrives
pub const PLACEHOLDER_TEXT: &str = "No messages yet. Send a message to start the conversation.";

const COMMAND_BUFFER: usize = 256;
const BROADCAST_BUFFER: usize = 256;

pub enum RoomCommand {
    /// Resolve what a joining connection should see: `room_created`,
    /// then either a history window or the placeholder.
    Join {
        reply: oneshot::Sender<Vec<ServerEvent>>,
    },

    /// A message submitted into this room
    Submit {
        text: String,
        attachment_refs: Vec<String>,
    },
}

/// Handle to a running room actor (cheap to Clone).
#[derive(Clone)]
pub struct RoomActorHandle {
    pub room_key: String,
    command_tx: mpsc::Sender<RoomCommand>,
    events: broadcast::Sender<ServerEvent>,
    snapshot: Arc<ArcSwap<Room>>,
}

impl RoomActorHandle {
    /// Spawn the actor task for a resolved room.
    pub fn spawn(
        room: Room,
        history: Arc<HistoryStore>,
        directory: Arc<RoomDirectory>,
        gateway: Arc<dyn GenerationGateway>,
        gateway_timeout: Duration,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (events, _) = broadcast::channel(BROADCAST_BUFFER);
        let snapshot = Arc::new(ArcSwap::from_pointee(room.clone()));

        let handle = Self {
            room_key: room.room_key.clone(),
            command_tx,
            events: events.clone(),
            snapshot: snapshot.clone(),
        };

        let actor = RoomActor {
            room,
            history,
            directory,
            gateway,
            gateway_timeout,
            events,
            snapshot,
            placeholder_pending: false,
        };
        tokio::spawn(actor.run(command_rx));

        handle
    }

    /// Send a command to the actor (fire-and-forget).
    pub async fn send(&self, cmd: RoomCommand) {
        if self.command_tx.send(cmd).await.is_err() {
            warn!(
                component = "room_actor",
                room_key = %self.room_key,
                "Actor channel closed, command dropped"
            );
        }
    }

    /// Join the room's broadcast group.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    /// Lock-free room snapshot read.
    pub fn snapshot(&self) -> Arc<Room> {
        self.snapshot.load_full()
    }
}

struct RoomActor {
    room: Room,
    history: Arc<HistoryStore>,
    directory: Arc<RoomDirectory>,
    gateway: Arc<dyn GenerationGateway>,
    gateway_timeout: Duration,
    events: broadcast::Sender<ServerEvent>,
    snapshot: Arc<ArcSwap<Room>>,
    /// True while the room has shown an unacknowledged placeholder
    placeholder_pending: bool,
}

impl RoomActor {
    async fn run(mut self, mut command_rx: mpsc::Receiver<RoomCommand>) {
        while let Some(cmd) = command_rx.recv().await {
            match cmd {
                RoomCommand::Join { reply } => {
                    let events = self.handle_join().await;
                    let _ = reply.send(events);
                }
                RoomCommand::Submit {
                    text,
                    attachment_refs,
                } => {
                    self.handle_submit(text, attachment_refs).await;
                }
            }
        }
    }

    fn broadcast(&self, event: ServerEvent) {
        // No receivers is fine: an empty room still processes submits
        let _ = self.events.send(event);
    }

    async fn handle_join(&mut self) -> Vec<ServerEvent> {
        let mut events = vec![ServerEvent::RoomCreated {
            room: self.room.room_key.clone(),
            ts: now_ts(),
        }];

        let items = self
            .history
            .replay(&self.room.id, &self.room.owner_id, &self.room.room_key)
            .await;

        if items.is_empty() {
            events.push(ServerEvent::System {
                text: PLACEHOLDER_TEXT.to_string(),
                ts: now_ts(),
            });
            self.placeholder_pending = true;
        } else {
            events.push(ServerEvent::History {
                items,
                ts: now_ts(),
            });
        }

        events
    }

    async fn handle_submit(&mut self, text: String, attachment_refs: Vec<String>) {
        let text = text.trim().to_string();
        if text.is_empty() {
            // Blank submissions are dropped, not errored
            debug!(
                component = "room_actor",
                event = "room.submit.blank_dropped",
                room_key = %self.room.room_key,
                "Dropping blank submission"
            );
            return;
        }

        // The placeholder must never coexist with real history in a
        // client's view
        if self.placeholder_pending {
            self.broadcast(ServerEvent::SystemClear { ts: now_ts() });
            self.placeholder_pending = false;
        }

        let user_ts = now_ts();
        self.broadcast(ServerEvent::User {
            text: text.clone(),
            ts: user_ts.clone(),
            room: self.room.room_key.clone(),
            is_image: false,
            attachment_refs: attachment_refs.clone(),
        });
        self.history.record_live(FallbackTurn {
            room_key: self.room.room_key.clone(),
            role: TurnRole::User,
            text: text.clone(),
            is_image: false,
            ts: user_ts,
        });

        let reply = match tokio::time::timeout(self.gateway_timeout, self.gateway.respond(&text))
            .await
        {
            Ok(reply) => reply,
            Err(_) => {
                warn!(
                    component = "room_actor",
                    event = "room.gateway.timeout",
                    room_key = %self.room.room_key,
                    timeout_secs = self.gateway_timeout.as_secs(),
                    "Gateway call timed out, substituting fallback"
                );
                GatewayReply::text(FALLBACK_BUSY)
            }
        };

        let assistant_ts = now_ts();
        self.broadcast(ServerEvent::Assistant {
            text: reply.content.clone(),
            ts: assistant_ts.clone(),
            room: self.room.room_key.clone(),
            is_image: reply.is_image,
            attachment_refs: vec![],
        });
        self.history.record_live(FallbackTurn {
            room_key: self.room.room_key.clone(),
            role: TurnRole::Assistant,
            text: reply.content.clone(),
            is_image: reply.is_image,
            ts: assistant_ts,
        });

        // Persistence after broadcast: the live view is optimistic and
        // is not rolled back if the append fails.
        if let Err(e) = self
            .history
            .append(
                &self.room.id,
                &self.room.owner_id,
                TurnRole::User,
                &text,
                false,
                &attachment_refs,
            )
            .await
        {
            error!(
                component = "room_actor",
                event = "room.persist.user_turn_failed",
                room_key = %self.room.room_key,
                error = %e,
                "User turn was broadcast but not persisted"
            );
        }
        if let Err(e) = self
            .history
            .append(
                &self.room.id,
                &self.room.owner_id,
                TurnRole::Assistant,
                &reply.content,
                reply.is_image,
                &[],
            )
            .await
        {
            error!(
                component = "room_actor",
                event = "room.persist.assistant_turn_failed",
                room_key = %self.room.room_key,
                error = %e,
                "Assistant turn was broadcast but not persisted"
            );
        }

        if let Some(title) = self.directory.retitle_from_context(&self.room).await {
            let mut updated = self.room.clone();
            updated.title = Some(title);
            self.room = updated.clone();
            self.snapshot.store(Arc::new(updated));
        }

        match self.directory.list_rooms(&self.room.owner_id).await {
            Ok(rooms) => self.broadcast(ServerEvent::RoomsUpdated { rooms }),
            Err(e) => {
                warn!(
                    component = "room_actor",
                    event = "room.list_broadcast_failed",
                    room_key = %self.room.room_key,
                    error = %e,
                    "Could not recompute room list"
                );
            }
        }

        info!(
            component = "room_actor",
            event = "room.submit.completed",
            room_key = %self.room.room_key,
            is_image = reply.is_image,
            "Submit sequence completed"
        );
    }
}

/// Stamp used by relay/connection logs
pub fn describe_identity(identity: &Identity) -> String {
    format!("{}({})", identity.username, identity.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::directory::RoomDirectory;
    use crate::gateway::testing::MockGateway;
    use crate::persistence::tests::test_store;

    async fn spawn_test_actor() -> (RoomActorHandle, tempfile::TempDir) {
        let (store, dir) = test_store();
        let gateway = Arc::new(MockGateway::default());
        let directory = Arc::new(RoomDirectory::new(store.clone(), gateway.clone()));
        let history = Arc::new(HistoryStore::new(store.clone(), 2000, 200));
        let room = store
            .resolve_or_create_room("u1", "room-actor")
            .await
            .unwrap();
        let handle = RoomActorHandle::spawn(
            room,
            history,
            directory,
            gateway,
            Duration::from_secs(5),
        );
        (handle, dir)
    }

    #[tokio::test]
    async fn join_on_empty_room_yields_placeholder() {
        let (handle, _dir) = spawn_test_actor().await;

        let (tx, rx) = oneshot::channel();
        handle.send(RoomCommand::Join { reply: tx }).await;
        let events = rx.await.unwrap();

        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], ServerEvent::RoomCreated { .. }));
        match &events[1] {
            ServerEvent::System { text, .. } => assert_eq!(text, PLACEHOLDER_TEXT),
            other => panic!("expected system placeholder, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn snapshot_reflects_retitle_after_submit() {
        let (handle, _dir) = spawn_test_actor().await;
        assert!(handle.snapshot().title.is_none());

        let mut rx = handle.subscribe();
        handle
            .send(RoomCommand::Submit {
                text: "hello".into(),
                attachment_refs: vec![],
            })
            .await;

        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out")
                .expect("broadcast closed");
            if matches!(event, ServerEvent::RoomsUpdated { .. }) {
                break;
            }
        }

        assert_eq!(
            handle.snapshot().title.as_deref(),
            Some("A Test Conversation")
        );
    }
}
