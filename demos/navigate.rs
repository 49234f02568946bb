//! Navigation lifecycle demonstration.
//!
//! Demonstrates:
//! - Connecting to a running browser's DevTools endpoint
//! - Attaching a flattened session to a page target
//! - Loading the frame tree and navigating with milestone waits
//! - Evaluating in the main world after navigation
//!
//! Start Chrome with `--remote-debugging-port=9222`, then:
//!   cargo run --example navigate -- <browser-ws-url> <page-target-id> [url]
//!   cargo run --example navigate -- <browser-ws-url> <page-target-id> [url] --debug

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use cdp_webdriver::{Connection, FrameManager, LifecycleMilestone, NavigateOptions, TargetId, World};

// ============================================================================
// Constants
// ============================================================================

const DEFAULT_URL: &str = "https://example.com";

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    init_logging(args.iter().any(|a| a == "--debug"));

    if let Err(e) = run(args.into_iter().filter(|a| a != "--debug").collect()).await {
        eprintln!("\n[ERROR] {e:#}");
        std::process::exit(1);
    }
}

async fn run(args: Vec<String>) -> Result<()> {
    let ws_url = args.first().context("missing browser WebSocket URL")?;
    let target = args.get(1).context("missing page target ID")?;
    let url = args.get(2).map_or(DEFAULT_URL, String::as_str);

    println!("=== Navigate ===\n");

    // ========================================================================
    // Setup
    // ========================================================================

    println!("[Setup] Connecting to {ws_url}...");
    let connection = Connection::builder()
        .command_timeout(Duration::from_secs(10))
        .connect(ws_url)
        .await?;

    let session = connection.create_session(&TargetId::new(target.as_str())).await?;
    println!("        ✓ Attached (session={})", session.id());

    let frames = FrameManager::new(Arc::new(session));
    frames.initialize().await?;
    println!("        ✓ {} frame(s) tracked\n", frames.frames().len());

    // ========================================================================
    // Navigate
    // ========================================================================

    let main = frames.main_frame().context("page has no main frame")?;
    let options = NavigateOptions::new()
        .wait_until([LifecycleMilestone::Load, LifecycleMilestone::DomContentLoaded])
        .with_timeout(Duration::from_secs(30));

    println!("[1] Navigate to {url}...");
    let outcome = frames.navigate_frame(&main, url, options).await?;
    println!("    ✓ {outcome:?}");

    for frame in frames.frames() {
        println!("    {} {} {}", frame.key, frame.id, frame.url);
    }

    // ========================================================================
    // Evaluate
    // ========================================================================

    println!("\n[2] Evaluate document.title...");
    let context = frames
        .wait_for_execution_context(main.key, World::Main, Duration::from_secs(5))
        .await?;
    let title = context.evaluate("document.title").await?;
    println!("    Title: {title}");

    connection.close();
    println!("\n=== Done ===");
    Ok(())
}

// ============================================================================
// Logging
// ============================================================================

fn init_logging(debug: bool) {
    let filter = if debug {
        "cdp_webdriver=debug"
    } else {
        "cdp_webdriver=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();
}
