//! One-shot engine commands.
//!
//! Demonstrates:
//! - Serving commands through the hub's router
//! - Typed command payloads (app.get, filters.importRaw, subscriptions.get)
//! - Bounded waits with send_with_timeout
//!
//! Usage:
//!   cargo run --example 002_one_shot_commands
//!   cargo run --example 002_one_shot_commands -- --debug

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use adblock_messaging::transport::memory;
use adblock_messaging::{
    AppInfo, EngineCommand, MessageHub, Messenger, Reply, Result,
};

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
    println!("=== 002: One-Shot Commands ===\n");

    // ========================================================================
    // Setup
    // ========================================================================

    println!("[Setup] Starting hub with command handlers...");

    let (connector, accepts) = memory::listener();
    let hub = MessageHub::new();
    hub.run(accepts);

    // Handlers stand in for the filtering engine.
    hub.router().on(
        "app.get",
        Arc::new(|payload, _| {
            let reply = match payload["what"].as_str() {
                Some("addonVersion") => json!("0.1.0"),
                Some("platform") => json!("gecko"),
                _ => json!(null),
            };
            Ok(Reply::value(reply))
        }),
    );
    hub.router().on(
        "filters.importRaw",
        Arc::new(|payload, _| {
            let text = payload["text"].as_str().unwrap_or_default();
            let errors: Vec<_> = text
                .lines()
                .filter(|line| line.starts_with('!'))
                .map(|line| json!({"filter": line, "reason": "comment only"}))
                .collect();
            Ok(Reply::value(json!(errors)))
        }),
    );
    hub.router().on(
        "subscriptions.get",
        Arc::new(|_, _| {
            Ok(Reply::deferred(async {
                Ok(json!([{"url": "https://lists.example/easylist.txt", "enabled": true}]))
            }))
        }),
    );

    println!("        ✓ Hub running\n");

    // ========================================================================
    // Connect a Messenger
    // ========================================================================

    println!("[1] Connecting one-shot messenger...");

    let messenger = Messenger::connect(&connector).await?;
    println!("    ✓ Connected (independent of any port)\n");

    // ========================================================================
    // Typed Commands
    // ========================================================================

    println!("[2] app.get addonVersion...");

    let version = messenger
        .send_command(&EngineCommand::AppGet {
            what: AppInfo::AddonVersion,
        })
        .await?;
    println!("    ✓ Version: {version}");
    assert_eq!(version, json!("0.1.0"));
    println!();

    println!("[3] filters.importRaw...");

    let errors = messenger
        .send_command(&EngineCommand::FiltersImportRaw {
            text: "||ads.example^\n##.sponsored".into(),
        })
        .await?;
    println!("    ✓ Import errors: {errors}");
    assert_eq!(errors, json!([]), "empty error list means success");
    println!();

    println!("[4] subscriptions.get (deferred reply)...");

    let subscriptions = messenger
        .send_command(&EngineCommand::SubscriptionsGet {
            ignore_disabled: true,
            downloadable: true,
        })
        .await?;
    println!("    ✓ Subscriptions: {subscriptions}");
    assert_eq!(
        subscriptions[0]["url"],
        "https://lists.example/easylist.txt"
    );
    println!();

    // ========================================================================
    // Bounded Wait
    // ========================================================================

    println!("[5] Unhandled command with a deadline...");

    let reply = messenger
        .send_with_timeout(
            json!({"type": "composer.openDialog"}),
            Duration::from_millis(500),
        )
        .await?;
    println!("    ✓ Unhandled commands reply null: {reply}");
    assert!(reply.is_null());

    println!("\n=== All commands answered ===");

    Ok(())
}
