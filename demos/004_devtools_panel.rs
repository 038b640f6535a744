//! Devtools panel record deduplication.
//!
//! Demonstrates:
//! - Opening a DevtoolsBridge for one inspected tab
//! - add-record followed by update-record at the original index
//! - CSP records with distinct filter text staying separate
//! - Panel reset on inspected-page reload
//!
//! Usage:
//!   cargo run --example 004_devtools_panel
//!   cargo run --example 004_devtools_panel -- --debug

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use adblock_messaging::devtools::{HITS_ACTION, REQUESTS_TOPIC, RESET_ACTION};
use adblock_messaging::transport::memory;
use adblock_messaging::{
    ConnectionManager, DevtoolsBridge, FilterHit, ItemType, MessageHub, PanelMessage,
    RequestRecord, TabId,
};

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
    println!("=== 004: Devtools Panel ===\n");

    // ========================================================================
    // Setup
    // ========================================================================

    println!("[Setup] Starting hub and opening the bridge for tab 7...");

    let (connector, accepts) = memory::listener();
    let hub = MessageHub::new();
    hub.run(accepts);

    let manager = ConnectionManager::new("devtools-7", Arc::new(connector));
    let tab = TabId::new(7).expect("non-zero tab id");
    let (bridge, mut updates) = DevtoolsBridge::open(&manager, tab).await;

    common::settle(|| hub.subscription_count(REQUESTS_TOPIC) == 1).await;
    println!("        ✓ Bridge subscribed\n");

    let publish = |record: &RequestRecord| {
        hub.publish_scoped(
            REQUESTS_TOPIC,
            HITS_ACTION,
            vec![serde_json::to_value(record).expect("serialize")],
            Some(tab),
        );
    };

    // ========================================================================
    // Add, Then Update In Place
    // ========================================================================

    println!("[1] Unfiltered request, then the same request with a filter...");

    let banner = RequestRecord::request(
        "https://ads.example/banner.png",
        "news.example",
        ItemType::Image,
    );
    publish(&banner);

    let message = updates.recv().await.expect("panel message");
    println!("    panel: {message:?}");
    assert!(matches!(message, PanelMessage::AddRecord { .. }));

    publish(&banner.clone().with_filter(FilterHit::blocking("||ads.example^")));

    let message = updates.recv().await.expect("panel message");
    println!("    panel: {message:?}");
    assert!(
        matches!(message, PanelMessage::UpdateRecord { index: 0, .. }),
        "same row, original position"
    );
    assert_eq!(bridge.record_count(), 1);
    println!("    ✓ Row updated in place\n");

    // ========================================================================
    // Distinct CSP Filters
    // ========================================================================

    println!("[2] Two CSP filters on the same document...");

    let csp = RequestRecord::request("https://news.example/", "news.example", ItemType::Csp);
    publish(&csp.clone().with_filter(FilterHit::blocking(
        "news.example$csp=script-src 'none'",
    )));
    publish(&csp.with_filter(FilterHit::blocking(
        "news.example$csp=worker-src 'none'",
    )));

    let _first = updates.recv().await.expect("panel message");
    let second = updates.recv().await.expect("panel message");
    assert!(
        matches!(second, PanelMessage::AddRecord { .. }),
        "distinct CSP filter text never merges"
    );
    assert_eq!(bridge.record_count(), 3);
    println!("    ✓ Both rows kept\n");

    // ========================================================================
    // Reset on Reload
    // ========================================================================

    println!("[3] Inspected page reloads...");

    hub.publish_scoped(REQUESTS_TOPIC, RESET_ACTION, vec![], Some(tab));

    let message = updates.recv().await.expect("panel message");
    assert_eq!(message, PanelMessage::Reset);
    assert_eq!(bridge.record_count(), 0);
    println!("    ✓ Table cleared\n");

    println!("=== Panel mirrored every mutation ===");
}
