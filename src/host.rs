//! host-side relay: takes `chat` messages off the bridge, runs them against the
//! installed [`Inference`] client and posts back one buffered `chatResponse`.
//!
//! the relay keeps nothing between requests. each request gets its own task;
//! overlapping requests run side by side and may finish in either order.

use std::sync::Arc;

use bevy::prelude::*;
use bevy::tasks::AsyncComputeTaskPool;
use flume::{Receiver, Sender, TryRecvError};

use crate::bridge::{ChatReply, PanelMessage, RequestId, ToHost, ToPanel};
use crate::client::{relay, Inference, ServiceError};

/// on native we keep a tiny tokio runtime to drive `llm` futures.
/// we spawn onto this rt from compute tasks so neither the main thread
/// nor bevy's compute pools block.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Resource, Clone)]
pub struct TokioRt(pub Arc<tokio::runtime::Runtime>);

#[cfg(not(target_arch = "wasm32"))]
impl Default for TokioRt {
    fn default() -> Self {
        info!(target: "bevy_deepchat", "DeepChat: initializing Tokio multi-thread runtime (native)");
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("tokio runtime");
        Self(Arc::new(rt))
    }
}

/// cross-thread inbox for finished replies; relay tasks send, main thread drains.
#[derive(Resource, Clone)]
pub(crate) struct ReplyInbox {
    tx: Sender<ToPanel>,
    rx: Receiver<ToPanel>,
}

impl Default for ReplyInbox {
    fn default() -> Self {
        let (tx, rx) = flume::bounded(256);
        Self { tx, rx }
    }
}

/// send to inbox (ignore full/disconnected)
fn push_inbox(tx: &Sender<ToPanel>, panel: Entity, id: RequestId, reply: ChatReply) {
    let _ = tx.send(ToPanel {
        panel,
        message: PanelMessage::ChatResponse { id, text: reply },
    });
}

/// spawns one relay task per `chat` message.
pub(crate) fn relay_chat_requests(
    mut requests: EventReader<ToHost>,
    inference: Option<Res<Inference>>,
    inbox: Res<ReplyInbox>,

    // native-only: small runtime to drive network futures from `llm`
    #[cfg(not(target_arch = "wasm32"))] rt: Res<TokioRt>,
) {
    for ToHost { panel, message } in requests.read() {
        let panel = *panel;
        let PanelMessage::Chat { id, text } = message else {
            warn!(target: "bevy_deepchat", "relay: ignoring non-chat message {:?} from {:?}", message.id(), panel);
            continue;
        };
        let id = *id;
        if let Err(err) = message.validate() {
            warn!(target: "bevy_deepchat", "relay: rejected request {} from {:?}: {}", id, panel, err);
            push_inbox(&inbox.tx, panel, id, ChatReply::Error(err.to_string()));
            continue;
        }
        let Some(client) = inference.as_ref().map(|i| i.0.clone()) else {
            error!(target: "bevy_deepchat", "relay: no inference client for request {}", id);
            push_inbox(&inbox.tx, panel, id, ChatReply::Error(ServiceError::NoClient.to_string()));
            continue;
        };

        let turns = text.clone();
        info!(
            target: "bevy_deepchat",
            "relay: panel={:?} request={} turns={}", panel, id, turns.len()
        );

        let tx = inbox.tx.clone();
        let run = async move {
            let reply = relay(client.as_ref(), &turns).await;
            debug!(target: "bevy_deepchat", "relay: request {} finished ok={}", id, reply.is_ok());
            push_inbox(&tx, panel, id, reply);
        };

        #[cfg(not(target_arch = "wasm32"))]
        let rt = rt.0.clone();
        AsyncComputeTaskPool::get()
            .spawn(async move {
                #[cfg(target_arch = "wasm32")]
                {
                    run.await;
                }
                #[cfg(not(target_arch = "wasm32"))]
                {
                    let _ = rt.spawn(run).await;
                }
            })
            .detach();
    }
}

/// drains finished replies and emits them as `ToPanel` events.
pub(crate) fn drain_reply_inbox(inbox: Res<ReplyInbox>, mut replies: EventWriter<ToPanel>) {
    // cap per frame to avoid long frames when many panels finish at once
    const MAX_PER_FRAME: usize = 64;
    for _ in 0..MAX_PER_FRAME {
        match inbox.rx.try_recv() {
            Ok(msg) => {
                replies.write(msg);
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::ScriptedClient;
    use crate::conversation::Turn;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn relay_app(client: Option<ScriptedClient>) -> App {
        let mut app = App::new();
        app.add_plugins(MinimalPlugins);
        app.add_event::<ToHost>();
        app.add_event::<ToPanel>();
        app.init_resource::<ReplyInbox>();
        app.init_resource::<TokioRt>();
        if let Some(client) = client {
            app.insert_resource(Inference(Arc::new(client)));
        }
        app.add_systems(Update, (relay_chat_requests, drain_reply_inbox).chain());
        app
    }

    fn wait_for_replies(app: &mut App, want: usize) -> Vec<ToPanel> {
        let mut got = Vec::new();
        for _ in 0..200 {
            app.update();
            got.extend(app.world_mut().resource_mut::<Events<ToPanel>>().drain());
            if got.len() >= want {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        got
    }

    #[test]
    fn buffers_whole_stream_into_one_response() {
        let mut app = relay_app(Some(ScriptedClient::replying(&["Hi", " there!"])));
        let panel = app.world_mut().spawn_empty().id();
        app.world_mut().send_event(ToHost {
            panel,
            message: PanelMessage::Chat { id: RequestId(1), text: vec![Turn::user("Hello")] },
        });

        let replies = wait_for_replies(&mut app, 1);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].panel, panel);
        assert_eq!(
            replies[0].message,
            PanelMessage::ChatResponse { id: RequestId(1), text: ChatReply::Ok("Hi there!".into()) }
        );
    }

    #[test]
    fn missing_client_answers_with_error() {
        let mut app = relay_app(None);
        let panel = app.world_mut().spawn_empty().id();
        app.world_mut().send_event(ToHost {
            panel,
            message: PanelMessage::Chat { id: RequestId(4), text: vec![Turn::user("Hello")] },
        });

        let replies = wait_for_replies(&mut app, 1);
        assert_eq!(
            replies[0].message,
            PanelMessage::ChatResponse {
                id: RequestId(4),
                text: ChatReply::Error(ServiceError::NoClient.to_string()),
            }
        );
    }

    #[test]
    fn invalid_history_is_rejected_before_the_client() {
        let mut app = relay_app(Some(ScriptedClient::replying(&["never"])));
        let panel = app.world_mut().spawn_empty().id();
        app.world_mut().send_event(ToHost {
            panel,
            message: PanelMessage::Chat { id: RequestId(2), text: vec![] },
        });

        let replies = wait_for_replies(&mut app, 1);
        let PanelMessage::ChatResponse { id, text } = &replies[0].message else {
            panic!("expected response");
        };
        assert_eq!(*id, RequestId(2));
        assert!(!text.is_ok());
    }

    #[test]
    fn overlapping_requests_both_complete() {
        let mut app = relay_app(Some(ScriptedClient::replying(&["ok"])));
        let panel = app.world_mut().spawn_empty().id();
        for id in [1, 2] {
            app.world_mut().send_event(ToHost {
                panel,
                message: PanelMessage::Chat { id: RequestId(id), text: vec![Turn::user("Hello")] },
            });
        }

        let replies = wait_for_replies(&mut app, 2);
        let mut ids: Vec<RequestId> = replies.iter().map(|r| r.message.id()).collect();
        ids.sort();
        assert_eq!(ids, vec![RequestId(1), RequestId(2)]);
    }
}
