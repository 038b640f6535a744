//! Frame relay queuing and handshake.
//!
//! Demonstrates:
//! - Buffering outbound messages before the privileged frame is ready
//! - FIFO flush on the readiness sentinel, then direct sends
//! - The init probe handshake against a slow host
//! - Correlated request/response over the relay
//!
//! Usage:
//!   cargo run --example 003_frame_relay
//!   cargo run --example 003_frame_relay -- --debug

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::time::sleep;

use adblock_messaging::transport::Channel;
use adblock_messaging::{FrameRelay, HandshakeConfig, RelayHost, Reply, Result};

// ============================================================================
// Constants
// ============================================================================

const HOST_STARTUP_DELAY: Duration = Duration::from_millis(50);

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = common::Args::parse();
    common::init_logging(args.debug);

    if let Err(e) = run().await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    println!("=== 003: Frame Relay ===\n");

    // ========================================================================
    // Setup
    // ========================================================================

    println!("[Setup] Attaching relay; the privileged frame is not up yet...");

    let (relay_end, host_end) = Channel::duplex();
    let relay = FrameRelay::attach(relay_end);

    println!("        ✓ Relay attached\n");

    // ========================================================================
    // Queue Before Readiness
    // ========================================================================

    println!("[1] Posting port frames before readiness...");

    relay.post_port("composer", json!({"action": "highlight", "n": 1}))?;
    relay.post_port("composer", json!({"action": "highlight", "n": 2}))?;

    println!("    ✓ Queued: {} (nothing sent yet)", relay.queued_count());
    assert_eq!(relay.queued_count(), 2);
    assert!(!relay.is_ready());
    println!();

    // ========================================================================
    // Late Host Start
    // ========================================================================

    println!("[2] Starting the privileged frame after a delay...");

    let host = RelayHost::new();
    host.router().on(
        "dialog.get",
        Arc::new(|_, _| Ok(Reply::value(json!({"title": "Block element"})))),
    );

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);
    host.on_port(Arc::new(move |(name, payload): &(String, Value)| {
        seen_clone.lock().push((name.clone(), payload["n"].clone()));
    }));

    sleep(HOST_STARTUP_DELAY).await;
    host.start(host_end);

    common::settle(|| relay.is_ready()).await;
    println!("    ✓ Readiness seen, queue flushed FIFO");
    assert_eq!(relay.queued_count(), 0);
    println!();

    // ========================================================================
    // Handshake
    // ========================================================================

    println!("[3] Running the init handshake...");

    relay.handshake(&HandshakeConfig::default()).await?;
    println!("    ✓ Host acknowledged init\n");

    // ========================================================================
    // Direct Traffic
    // ========================================================================

    println!("[4] Request/response over the relay...");

    let reply = relay.request(json!({"type": "dialog.get"})).await?;
    println!("    ✓ Reply: {reply}");
    assert_eq!(reply["title"], "Block element");
    assert_eq!(relay.pending_count(), 0, "one-time listener removed");
    println!();

    println!("[5] Port frame after readiness goes out directly...");

    relay.post_port("composer", json!({"action": "highlight", "n": 3}))?;
    common::settle(|| seen.lock().len() == 3).await;

    let seen = seen.lock();
    println!("    ✓ Host saw: {seen:?}");
    assert_eq!(
        seen.iter().map(|(_, n)| n.clone()).collect::<Vec<_>>(),
        vec![json!(1), json!(2), json!(3)],
        "original order preserved"
    );

    println!("\n=== Relay delivered everything in order ===");

    Ok(())
}
