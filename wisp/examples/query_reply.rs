//! Query/reply between two processes over a TCP link.
//!
//! Run as two separate terminals:
//!
//! ```bash
//! # Terminal 1 - queryable side, waits for the link
//! cargo run --example query_reply -- serve
//!
//! # Terminal 2 - querier, issues one get per second
//! cargo run --example query_reply -- get
//! ```
//!
//! The server declares a complete queryable on `demo/example/**` and
//! answers every query with a greeting. The querier issues gets with
//! `Consolidation::None` so each reply is printed the moment it lands
//! instead of being held back for the consolidation window.

use std::env;
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use wisp::prelude::*;
use wisp_link::tcp::TcpAcceptor;

const ADDR: &str = "127.0.0.1:7448";
const KEY: &str = "demo/example/greeting";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mode = env::args().nth(1).unwrap_or_else(|| "serve".to_string());
    match mode.as_str() {
        "serve" => serve().await,
        "get" => get().await,
        other => anyhow::bail!("unknown mode `{other}`, expected `serve` or `get`"),
    }
}

async fn serve() -> anyhow::Result<()> {
    let acceptor = TcpAcceptor::bind(ADDR.parse()?).await?;
    println!("waiting for a querier on {ADDR}...");
    let (tx, rx) = acceptor.accept().await?;

    let session = Session::open_with_link(Config::new(), Box::new(tx), Box::new(rx)).await?;
    println!("session {} open", session.zid());

    let queryable = session
        .declare_queryable(
            "demo/example/**",
            |query| {
                println!(">> query {} params={:?}", query.keyexpr(), query.parameters());
                let reply = query.reply(KEY, "hello from the queryable", ReplyOptions::default());
                if let Err(err) = reply {
                    eprintln!("reply failed: {err}");
                }
            },
            QueryableOptions { complete: true },
        )
        .await?;

    // The querier closes its side when it is done.
    while !session.is_closed() {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    drop(queryable);
    session.close().await?;
    Ok(())
}

async fn get() -> anyhow::Result<()> {
    let mut config = Config::new();
    config.insert(keys::CONNECT, format!("tcp/{ADDR}"))?;
    let session = Session::open(config).await?;
    println!("session {} open", session.zid());

    let options = GetOptions {
        consolidation: Consolidation::None,
        timeout: Duration::from_secs(1),
        ..GetOptions::default()
    };
    for round in 0..5u32 {
        println!("<< get demo/example/** (round {round})");
        session
            .get(
                "demo/example/**",
                "",
                |reply: Reply| match reply.result {
                    Ok(sample) => println!(
                        ">> {} = {:?}",
                        sample.keyexpr,
                        String::from_utf8_lossy(&sample.payload)
                    ),
                    Err(err) => println!(">> error: {err}"),
                },
                options,
            )
            .await?;
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    session.close().await?;
    Ok(())
}
