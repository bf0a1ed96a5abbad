//! # Live Feed Smoke Test
//!
//! Runs the weight-governed feed against the real exchange API for a short
//! while and prints what arrives: configuration, value frames, budget
//! telemetry and status changes.
//!
//! Useful for eyeballing the controller: the divider should settle, used
//! weight should stay well below the limit and no cooling pause should occur.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::time::Duration;

use clap::Parser;
use lib_feed::markets::binance::{apicall::DEFAULT_BASE_URL, BinanceApi};
use lib_feed::markets::provider::RemoteApi;
use lib_feed::{FeedManager, GovernorSettings, ResourceKey, SubscriptionId};

/// Command line options.
#[derive(Parser, Debug)]
#[clap(about = "Live smoke run of the weight-governed feed")]
struct Args {
    /// Base URL of the exchange API.
    #[clap(long, default_value = DEFAULT_BASE_URL)]
    base_url: String,
    /// How long to run, in seconds.
    #[clap(long, default_value_t = 20)]
    seconds: u64,
    /// Instruments to follow.
    #[clap(long, default_values_t = vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()])]
    instrument: Vec<String>,
}

/// # Main Test Function
///
/// 1. Fetches the policy directly to show what the governor will work with.
/// 2. Subscribes price and 24h last price for each instrument, plus a
///    duplicate subscription to check that it is served by the same fetch.
/// 3. Prints frames and telemetry until the deadline, then shuts down.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let settings = GovernorSettings::default();
    let api = BinanceApi::new(&args.base_url, Duration::from_millis(settings.call_timeout_ms))?;

    println!("--- Starting Live Feed Test ---");

    // --- TEST 1: Policy ---
    println!("\n[Test 1] Fetching rate-limit policy...");
    let policy = api.fetch_policy().await?;
    println!("[SUCCESS] {} weight per {} ms", policy.limit, policy.interval_ms);

    // --- TEST 2: Subscriptions ---
    println!("\n[Test 2] Subscribing...");
    let feed = FeedManager::new(api, settings)?;
    let mut frames = feed.listen("live-test");
    let mut telemetry = feed.telemetry();
    let mut events = feed.status_events();

    let mut next_id = 1u64;
    for instrument in &args.instrument {
        for metric in ["price", "lastPrice"] {
            let label = feed
                .on_subscription_created(SubscriptionId(next_id), ResourceKey::new(instrument, metric))
                .await?;
            println!("  sub#{} {}/{} -> {}", next_id, instrument, metric, label);
            next_id += 1;
        }
    }
    if let Some(first) = args.instrument.first() {
        feed.on_subscription_created(SubscriptionId(next_id), ResourceKey::new(first, "price"))
            .await?;
        println!("  sub#{} {}/price (duplicate)", next_id, first);
    }

    // --- TEST 3: Run ---
    println!("\n[Test 3] Running for {} s...", args.seconds);
    feed.start();
    let deadline = tokio::time::sleep(Duration::from_secs(args.seconds));
    tokio::pin!(deadline);

    let mut cycles = 0u64;
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            Some(frame) = frames.recv() => {
                if frame.cycle > 0 {
                    cycles += 1;
                }
                println!("[frame {}] {} values", frame.cycle, frame.values.len());
                for (id, value) in &frame.values {
                    println!("    {} = {}", id, value);
                }
            }
            Ok(t) = telemetry.recv() => {
                println!(
                    "[budget] {}/{} per {} s, N={}, next in ~{:.0} ms",
                    t.used_weight, t.weight_limit, t.interval_seconds, t.divider, t.estimated_inter_request_ms
                );
            }
            Ok(event) = events.recv() => {
                println!("[status] {:?} => {}", event, feed.status_label());
            }
        }
    }

    feed.shutdown().await;
    println!("\n--- Finished: {} cycles, final status '{}' ---", cycles, feed.status_label());
    if cycles == 0 {
        anyhow::bail!("no polling cycle completed");
    }
    Ok(())
}
