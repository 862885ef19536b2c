use crate::config::ServerConfig;
use crate::sequencer::outbox::{Outbox, OutboxError};
use crate::xrpc::stream::error_frame;
use crate::SharedSequencer;
use futures::SinkExt;
use rocket::State;
use std::time::Duration;
use tokio::time::timeout;

/// Repository event stream, aka the firehose. A subscriber first receives
/// any buffered events with `seq > cursor`, then every new event as it is
/// emitted. Subscribers that cannot keep up are dropped rather than allowed
/// to stall the writer. Public, no auth.
#[tracing::instrument(skip_all)]
#[rocket::get("/xrpc/com.atproto.sync.subscribeRepos?<cursor>")]
pub async fn subscribe_repos(
    cursor: Option<i64>,
    cfg: &State<ServerConfig>,
    sequencer: &State<SharedSequencer>,
    ws: ws::WebSocket,
) -> ws::Channel<'static> {
    let send_deadline = Duration::from_millis(cfg.firehose.send_deadline_ms);
    let outbox = {
        let lock = sequencer.sequencer.read().await;
        match cursor {
            Some(c) if c > lock.current_seq() => None,
            _ => Some(Outbox::new(&lock, cursor)),
        }
    };
    tracing::debug!(?cursor, "firehose subscriber connected");

    ws.channel(move |mut stream| {
        Box::pin(async move {
            let Some(mut outbox) = outbox else {
                if let Ok(frame) = error_frame("FutureCursor", Some("cursor is in the future")) {
                    let _ = stream.send(ws::Message::Binary(frame)).await;
                }
                let _ = stream.close(None).await;
                return Ok(());
            };
            loop {
                match outbox.next().await {
                    Ok(Some(evt)) => {
                        let frame = match evt.to_frame() {
                            Ok(frame) => frame,
                            Err(err) => {
                                tracing::warn!("could not frame event {}: {err}", evt.seq());
                                continue;
                            }
                        };
                        match timeout(send_deadline, stream.send(ws::Message::Binary(frame))).await
                        {
                            Ok(Ok(())) => (),
                            // write error or blown send deadline: drop them
                            _ => break,
                        }
                    }
                    Ok(None) => break,
                    Err(OutboxError::ConsumerTooSlow) => {
                        if let Ok(frame) =
                            error_frame("ConsumerTooSlow", Some("stream consumer too slow"))
                        {
                            let _ =
                                timeout(send_deadline, stream.send(ws::Message::Binary(frame)))
                                    .await;
                        }
                        break;
                    }
                }
            }
            let _ = stream.close(None).await;
            Ok(())
        })
    })
}
