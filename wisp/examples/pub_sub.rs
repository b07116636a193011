//! Publish/subscribe between two processes over a TCP link.
//!
//! Run as two separate terminals:
//!
//! ```bash
//! # Terminal 1 - subscriber side, waits for the link
//! cargo run --example pub_sub -- listen
//!
//! # Terminal 2 - publisher side, dials and publishes ten samples
//! cargo run --example pub_sub -- publish
//! ```
//!
//! The listener accepts one TCP connection, opens a session over it and
//! prints every sample matching `demo/example/**`. The publisher opens a
//! client session against the same address and puts a counter once a
//! second, finishing with a delete.

use std::env;
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use wisp::prelude::*;
use wisp_link::tcp::TcpAcceptor;

const ADDR: &str = "127.0.0.1:7447";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mode = env::args().nth(1).unwrap_or_else(|| "listen".to_string());
    match mode.as_str() {
        "listen" => listen().await,
        "publish" => publish().await,
        other => anyhow::bail!("unknown mode `{other}`, expected `listen` or `publish`"),
    }
}

async fn listen() -> anyhow::Result<()> {
    let acceptor = TcpAcceptor::bind(ADDR.parse()?).await?;
    println!("waiting for a publisher on {ADDR}...");
    let (tx, rx) = acceptor.accept().await?;

    let session = Session::open_with_link(Config::new(), Box::new(tx), Box::new(rx)).await?;
    println!("session {} open", session.zid());

    let subscriber = session
        .declare_subscriber(
            "demo/example/**",
            |sample: Sample| {
                let kind = match sample.kind {
                    SampleKind::Put => "PUT",
                    SampleKind::Delete => "DELETE",
                };
                println!(
                    ">> [{kind}] {} = {:?}",
                    sample.keyexpr,
                    String::from_utf8_lossy(&sample.payload)
                );
            },
            SubscriberOptions::default(),
        )
        .await?;

    // The publisher closes its side when it is done.
    while !session.is_closed() {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    drop(subscriber);
    session.close().await?;
    Ok(())
}

async fn publish() -> anyhow::Result<()> {
    let mut config = Config::new();
    config.insert(keys::CONNECT, format!("tcp/{ADDR}"))?;
    let session = Session::open(config).await?;
    println!("session {} open", session.zid());

    let publisher = session
        .declare_publisher("demo/example/counter", PublisherOptions::default())
        .await?;
    for index in 0..10u32 {
        let payload = format!("count {index}");
        println!("<< {payload}");
        publisher.put(payload).await?;
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    publisher.delete().await?;
    publisher.undeclare().await?;
    session.close().await?;
    Ok(())
}
