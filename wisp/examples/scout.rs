//! Discover live sessions with a scouting probe.
//!
//! Run as two separate terminals:
//!
//! ```bash
//! # Terminal 1 - a responder that answers probes as a peer
//! cargo run --example scout -- respond
//!
//! # Terminal 2 - probe and print every hello that comes back
//! cargo run --example scout
//! ```
//!
//! The scouting window uses loopback unicast instead of the default
//! multicast group so the demo works on hosts without multicast routing.
//! Zero hellos just means nothing answered inside the window.

use std::env;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tracing_subscriber::EnvFilter;
use wisp::prelude::*;
use wisp_link::{decode_datagram, encode_datagram, Hello, Message, PeerId};

const SCOUT_ADDR: &str = "127.0.0.1:7446";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mode = env::args().nth(1).unwrap_or_else(|| "scout".to_string());
    match mode.as_str() {
        "scout" => run_scout().await,
        "respond" => respond().await,
        other => anyhow::bail!("unknown mode `{other}`, expected `scout` or `respond`"),
    }
}

async fn run_scout() -> anyhow::Result<()> {
    let mut config = Config::new();
    config.insert(keys::SCOUTING_ADDRESS, format!("udp/{SCOUT_ADDR}"))?;

    println!("scouting for routers and peers on {SCOUT_ADDR}...");
    let count = wisp::scout(WhatAmIMatcher::default(), &config, |hello| {
        println!(
            ">> hello from {} ({}) at {:?}",
            hello.zid, hello.whatami, hello.locators
        );
    })
    .await?;
    println!("{count} responder(s) answered");
    Ok(())
}

async fn respond() -> anyhow::Result<()> {
    let socket = UdpSocket::bind(SCOUT_ADDR).await?;
    let zid = PeerId::random();
    println!("answering probes on {SCOUT_ADDR} as peer {zid}");

    let mut buf = vec![0u8; 2048];
    loop {
        let (n, from) = socket.recv_from(&mut buf).await?;
        match decode_datagram(Bytes::copy_from_slice(&buf[..n])) {
            Ok(Message::Scout { what }) if what.matches(WhatAmI::Peer) => {
                println!(">> probe from {from}");
                let hello = encode_datagram(&Message::Hello(Hello {
                    zid,
                    whatami: WhatAmI::Peer,
                    locators: vec![format!("tcp/{SCOUT_ADDR}")],
                }))?;
                socket.send_to(&hello, from).await?;
            }
            Ok(_) => {}
            Err(err) => eprintln!("malformed datagram from {from}: {err}"),
        }
    }
}
