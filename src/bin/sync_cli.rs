use std::sync::Arc;

use clap::Parser;
use site_sync::api::{entity_status, router};
use site_sync::client::{RemoteClient, TimeRange};
use site_sync::config::SyncConfig;
use site_sync::credentials::resolve_credentials;
use site_sync::models::{Business, Credentials, EntityKind, StoreLocal};
use site_sync::report::trigger_response;
use site_sync::sync::SyncEngine;
use tracing::{ info, warn };

#[derive(Parser, Debug)]
#[command(author, version, about = "Reconcile local sites with the remote analytics platform", long_about = None, rename_all = "snake_case")]
struct Args {
    /// Command to execute: backfill_properties, backfill_buildings, backfill_zones, backfill_cameras, backfill_all, retry_failed, purge_tombstones, status, create_business, set_credentials, create_store, demographics, heatmap, serve
    #[arg(short, long)]
    command: String,

    /// Entity kind (property, building, zone, camera) for retry_failed, purge_tombstones and status
    #[arg(long)]
    kind: Option<String>,

    /// Local id of the entity (for status)
    #[arg(long, name = "id_local")]
    id_local: Option<String>,

    /// Local id of the business (for set_credentials, create_store, demographics, heatmap)
    #[arg(long, name = "business_id")]
    business_id: Option<String>,

    /// Name (for create_business and create_store)
    #[arg(long)]
    name: Option<String>,

    /// Remote platform id (for create_business and set_credentials)
    #[arg(long, name = "platform_id")]
    platform_id: Option<String>,

    /// Remote API key (or set REMOTE_API_KEY env var)
    #[arg(long, name = "api_key")]
    api_key: Option<String>,

    /// Business id on the remote platform
    #[arg(long, name = "business_remote_id")]
    business_remote_id: Option<String>,

    /// Zone remote id (for demographics and heatmap)
    #[arg(long, name = "zone_remote_id")]
    zone_remote_id: Option<String>,

    /// Analytics range: today, 7d, 30d, 90d
    #[arg(long, default_value = "7d")]
    range: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

// Example usage:
// REMOTE_PLATFORM_URL=https://vt.example.com/api/ SYNC_DB_PATH=sites.db ./target/release/sync_cli --command backfill_all
// ./target/release/sync_cli --command create_business --name "Acme Malls" --platform_id p-1 --api_key secret --business_remote_id 42
// ./target/release/sync_cli --command status --kind zone --id_local 5b0c...
// ./target/release/sync_cli --command retry_failed --kind camera
// ./target/release/sync_cli --command heatmap --business_id 9f2e... --zone_remote_id Z123 --range 30d
// ./target/release/sync_cli --command serve

fn credentials_from_args(args: &Args) -> Option<Credentials> {
    let api_key = args
        .api_key
        .clone()
        .or_else(|| std::env::var("REMOTE_API_KEY").ok())?;
    Some(Credentials::new(
        args.platform_id.clone()?,
        api_key,
        args.business_remote_id.clone()?,
    ))
}

/// Prints a business without its credentials.
fn business_summary(business: &Business) -> serde_json::Value {
    serde_json::json!({
        "id_local": business.id_local,
        "name": business.name,
        "sync_enabled": resolve_credentials(business).is_some(),
    })
}

fn parse_kind(args: &Args) -> Result<EntityKind, Box<dyn std::error::Error>> {
    let kind = args.kind.as_deref().ok_or("--kind is required for this command")?;
    Ok(kind.parse::<EntityKind>()?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::fmt().with_env_filter(format!("site_sync={}", args.log_level)).init();

    let config = SyncConfig::from_env()?;
    let engine = SyncEngine::from_config(&config)?;

    match args.command.as_str() {
        "backfill_properties" | "backfill_buildings" | "backfill_zones" | "backfill_cameras" => {
            let kind: EntityKind = args.command.trim_start_matches("backfill_").parse()?;
            let result = engine.backfill(kind).await.map(|report| vec![report]);
            let (status, body) = trigger_response(kind.collection(), result);
            println!("{}", serde_json::to_string_pretty(&body)?);
            if status.is_server_error() {
                std::process::exit(1);
            }
        }
        "backfill_all" => {
            let (status, body) = trigger_response("entities", engine.backfill_all().await);
            println!("{}", serde_json::to_string_pretty(&body)?);
            if status.is_server_error() {
                std::process::exit(1);
            }
        }
        "retry_failed" => {
            let report = engine.retry_failed_updates(parse_kind(&args)?).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        "purge_tombstones" => {
            let report = engine.purge_tombstones(parse_kind(&args)?).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        "status" => {
            let id_local = args.id_local.as_deref().ok_or("--id_local is required for status")?;
            let status = entity_status(&engine, parse_kind(&args)?, id_local)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        "create_business" => {
            let name = args.name.clone().ok_or("--name is required for create_business")?;
            let credentials = credentials_from_args(&args);
            if credentials.is_none() {
                warn!("No complete credentials given; remote sync stays disabled for this business");
            }
            let business = engine.storage().insert_business(Business::new(name, credentials))?;
            println!("{}", serde_json::to_string_pretty(&business_summary(&business))?);
        }
        "set_credentials" => {
            let business_id = args
                .business_id
                .as_deref()
                .ok_or("--business_id is required for set_credentials")?;
            let business = engine
                .storage()
                .set_credentials(business_id, credentials_from_args(&args))?
                .ok_or("business not found")?;
            info!(business = %business_id, "Updated credentials");
            println!("{}", serde_json::to_string_pretty(&business_summary(&business))?);
        }
        "create_store" => {
            let business_id = args
                .business_id
                .clone()
                .ok_or("--business_id is required for create_store")?;
            let name = args.name.clone().ok_or("--name is required for create_store")?;
            let store = engine.storage().insert_store(StoreLocal::new(business_id, name))?;
            println!("{}", serde_json::to_string_pretty(&store)?);
        }
        "demographics" | "heatmap" => {
            let business_id = args.business_id.as_deref().ok_or("--business_id is required")?;
            let zone_remote_id = args
                .zone_remote_id
                .as_deref()
                .ok_or("--zone_remote_id is required")?;
            let business: Business = engine.require(business_id)?;
            let credentials =
                resolve_credentials(&business).ok_or("business has no remote credentials")?;

            let client = RemoteClient::from_config(&config)?;
            let range: TimeRange = args.range.parse()?;
            let data = if args.command == "demographics" {
                client.zone_demographics(&credentials, zone_remote_id, range).await?
            } else {
                client.zone_heatmap(&credentials, zone_remote_id, range).await?
            };
            println!("{}", serde_json::to_string_pretty(&data)?);
        }
        "serve" => {
            let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
            info!(addr = %config.bind_addr, "Serving sync trigger API");
            axum::serve(listener, router(Arc::new(engine))).await?;
        }
        other => {
            eprintln!("Unknown command: {}", other);
            std::process::exit(1);
        }
    }

    Ok(())
}
