//! Pooled TCP server that answers every message.
//!
//! Demonstrates:
//! - Building a Link from `key=value` arguments
//! - Waiting for debounced `MessageReady` notifications
//! - Replying to the peer that sent the message
//!
//! Usage:
//!   cargo run --example echo_server
//!   cargo run --example echo_server -- type=pool port=4000 max=3
//!   cargo run --example echo_server -- --debug
//!
//! Then connect with e.g. `nc localhost 1234` and type a line.

mod common;

// ============================================================================
// Imports
// ============================================================================

use anyhow::Result;
use common::Args;
use linkport::{Link, LinkData, LinkEvent};
use tracing::info;

// ============================================================================
// Constants
// ============================================================================

const DEFAULT_ARGS: &[&str] = &["type=pool", "port=1234"];

/// `ATA\n\r`
const REPLY: [u8; 5] = [0x41, 0x54, 0x41, 0x0A, 0x0D];

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    common::init_logging(args.debug);

    let link = if args.link_args.is_empty() {
        Link::from_args(DEFAULT_ARGS).await?
    } else {
        Link::from_args(&args.link_args).await?
    };
    info!("Serving on {link}, press Ctrl+C to exit");

    let mut subscription = link.subscribe();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = subscription.recv() => match event {
                Some(LinkEvent::MessageReady) => {
                    while let Some(data) = link.receive_bytes_for(subscription.id()) {
                        info!(from = ?data.identifier, "Received {}", data.hex());
                        reply(&link, &data);
                    }
                }
                Some(LinkEvent::Connected(id)) => info!(peer = %id, "Connected"),
                Some(LinkEvent::Disconnected(id)) => info!(peer = %id, "Disconnected"),
                None => break,
            },
        }
    }

    drop(subscription);
    link.shutdown().await;
    info!("Bye");
    Ok(())
}

fn reply(link: &Link, received: &LinkData) {
    let answer = match received.identifier {
        Some(id) => LinkData::addressed(REPLY.to_vec(), id),
        None => LinkData::new(REPLY.to_vec()),
    };
    link.send_data(answer);
}
