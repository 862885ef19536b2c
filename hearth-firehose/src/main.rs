use anyhow::Result;
use clap::Parser;
use futures::StreamExt;
use hearth_firehose::firehose::{self, SubscribedEvent};
use hearth_repo::car::read_car;
use std::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use url::Url;

/// Follow an AT Protocol firehose and print repository operations.
#[derive(Parser, Debug)]
#[command(name = "hearth-firehose")]
struct Args {
    /// Origin of the PDS to subscribe to, e.g. wss://pds.example.com
    #[arg(long)]
    url: String,
    /// Port override for the subscription endpoint.
    #[arg(long)]
    port: Option<u16>,
    /// Resume from this sequence number.
    #[arg(long)]
    cursor: Option<i64>,
}

fn subscription_url(args: &Args) -> Result<Url> {
    let mut url = Url::parse(&args.url)?;
    if let Some(port) = args.port {
        url.set_port(Some(port))
            .map_err(|_| anyhow::anyhow!("could not set port on {url}"))?;
    }
    url.set_path("/xrpc/com.atproto.sync.subscribeRepos");
    if let Some(cursor) = args.cursor {
        url.set_query(Some(&format!("cursor={cursor}")));
    }
    Ok(url)
}

fn handle_message(data: &[u8]) {
    match firehose::read(data) {
        Ok(Some((_header, SubscribedEvent::Commit(commit)))) => {
            let block_count = read_car(&commit.blocks)
                .map(|car| car.blocks.size())
                .unwrap_or(0);
            for op in &commit.ops {
                println!(
                    "{} seq={} {} {} cid={} ({} blocks)",
                    commit.repo,
                    commit.seq,
                    op.action,
                    op.path,
                    op.cid.map(|c| c.to_string()).unwrap_or_else(|| "-".into()),
                    block_count,
                );
            }
        }
        Ok(Some((_header, SubscribedEvent::Identity(evt)))) => {
            println!("{} seq={} identity handle={:?}", evt.did, evt.seq, evt.handle);
        }
        Ok(Some((_header, SubscribedEvent::Account(evt)))) => {
            println!(
                "{} seq={} account active={} status={:?}",
                evt.did, evt.seq, evt.active, evt.status
            );
        }
        Ok(Some((_header, SubscribedEvent::Error(err)))) => {
            eprintln!("stream error: {} {:?}", err.error, err.message);
        }
        Ok(None) => (),
        Err(err) => eprintln!("could not decode frame: {err}"),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            std::process::exit(1);
        }
    };
    let url = match subscription_url(&args) {
        Ok(url) => url,
        Err(err) => {
            eprintln!("invalid --url: {err}");
            std::process::exit(1);
        }
    };

    loop {
        println!("connecting to {url}");
        match connect_async(url.clone()).await {
            Ok((mut socket, _response)) => {
                while let Some(message) = socket.next().await {
                    match message {
                        Ok(Message::Binary(data)) => handle_message(&data),
                        Ok(Message::Close(_)) => break,
                        Ok(_) => (),
                        Err(err) => {
                            eprintln!("websocket error: {err}");
                            break;
                        }
                    }
                }
            }
            Err(err) => eprintln!("could not connect: {err}"),
        }
        // reconnect with a little backoff
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_subscription_url() {
        let args = Args {
            url: "wss://pds.example.com".to_string(),
            port: Some(8443),
            cursor: Some(42),
        };
        let url = subscription_url(&args).unwrap();
        assert_eq!(
            url.as_str(),
            "wss://pds.example.com:8443/xrpc/com.atproto.sync.subscribeRepos?cursor=42"
        );
    }
}
