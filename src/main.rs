//! Turnstay webhook trigger.
//!
//! Loads configuration, emits one signed `payment_intent.succeeded` event
//! to the configured webhook service and reports the delivery outcome. The
//! service's response body is written to stdout. Ctrl-C cancels any
//! in-flight attempt or backoff.

use anyhow::{Context, Result};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use turnstay_delivery::Config;

const EVENT_TYPE: &str = "payment_intent.succeeded";

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    init_tracing(&config.rust_log)?;

    info!(
        base_url = %config.base_url,
        trigger_path = %config.trigger_path,
        signing_secret = config.signing_secret_masked(),
        signing_mode = ?config.signing_mode,
        max_retries = config.max_retries,
        "Configuration loaded"
    );

    let secret = config.to_secret().context("TURNSTAY_SIGNING_SECRET must be set")?;
    let client = config.webhook_client().context("Failed to build webhook client")?;

    let cancellation = CancellationToken::new();
    tokio::spawn({
        let cancellation = cancellation.clone();
        async move {
            shutdown_signal().await;
            warn!("Shutdown signal received, cancelling delivery");
            cancellation.cancel();
        }
    });

    let data = json!({
        "object": {
            "id": "pi_example_123",
            "object": "payment_intent",
            "amount": 5000,
            "currency": "usd",
            "status": "succeeded",
        }
    });
    let options = config.to_trigger_options().with_cancellation(cancellation);

    let result = client
        .trigger(&config.trigger_path, EVENT_TYPE, data, &secret, options)
        .await
        .context("Failed to trigger webhook")?;

    info!(
        event_id = %result.event_id,
        success = result.success,
        attempts = result.attempt_count(),
        "Delivery finished"
    );

    let result = result.into_result().context("Webhook delivery failed")?;
    if let Some(response) = &result.response {
        info!(
            status = response.status_code,
            duration_ms = response.duration.as_millis(),
            "Trigger response received"
        );
        println!("{}", response.body);
    }
    Ok(())
}

/// Initializes tracing with the configured filter.
fn init_tracing(directives: &str) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_new(directives)
        .or_else(|_| EnvFilter::try_new("info,turnstay=debug"))
        .context("Invalid log filter")?;

    let fmt_layer = fmt::layer().with_target(true).with_file(true).with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
    Ok(())
}

/// Waits for Ctrl-C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
