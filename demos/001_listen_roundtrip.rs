//! Subscription round-trip and worker eviction.
//!
//! Demonstrates:
//! - Starting a hub over the in-process transport
//! - Declaring a subscription from a UI context
//! - Event fan-out to the subscribed listener
//! - Eviction and automatic re-declaration on reconnect
//!
//! Usage:
//!   cargo run --example 001_listen_roundtrip
//!   cargo run --example 001_listen_roundtrip -- --debug

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;

use adblock_messaging::transport::memory;
use adblock_messaging::{ConnectionManager, Envelope, ListenRequest, MessageHub, listen};

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = common::Args::parse();
    common::init_logging(args.debug);

    run().await;
}

async fn run() {
    println!("=== 001: Listen Round-Trip ===\n");

    // ========================================================================
    // Setup
    // ========================================================================

    println!("[Setup] Starting hub...");

    let (connector, accepts) = memory::listener();
    let hub = MessageHub::new();
    hub.run(accepts);

    println!("        ✓ Hub running\n");

    // ========================================================================
    // Declare a Subscription
    // ========================================================================

    println!("[1] Declaring filters subscription...");

    let manager = ConnectionManager::new("options", Arc::new(connector));
    listen(
        &manager,
        ListenRequest::new("filters", ["added", "removed"]),
    )
    .await;

    common::settle(|| hub.subscription_count("filters") == 1).await;
    println!("    ✓ Hub sees 1 subscriber\n");

    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&delivered);
    manager.add_message_listener(Arc::new(move |envelope: &Envelope| {
        if let Envelope::Event { action, args, .. } = envelope {
            println!("    event: filters.{action} {args:?}");
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }));

    // ========================================================================
    // Publish
    // ========================================================================

    println!("[2] Publishing filters.added...");

    hub.publish(
        "filters",
        "added",
        vec![json!({"text": "||ads.example^"})],
    );

    common::settle(|| delivered.load(Ordering::SeqCst) == 1).await;
    println!("    ✓ Delivered\n");

    // ========================================================================
    // Evict and Resubscribe
    // ========================================================================

    println!("[3] Evicting the hub's clients...");

    hub.evict();
    assert_eq!(hub.client_count(), 0, "all clients dropped");
    println!("    ✓ All state forgotten");

    // The manager reconnects after its cooldown and re-declares on its own.
    common::settle(|| hub.subscription_count("filters") == 1).await;
    println!("    ✓ Subscription re-declared automatically\n");

    println!("[4] Publishing after eviction...");

    hub.publish("filters", "removed", vec![json!({"text": "||ads.example^"})]);

    common::settle(|| delivered.load(Ordering::SeqCst) == 2).await;
    println!("    ✓ Delivered to the reconnected subscriber\n");

    println!("=== Subscription survived the eviction ===");
}
