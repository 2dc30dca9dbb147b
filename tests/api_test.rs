mod common;

use std::sync::Arc;

use common::{fixture, Fixture};
use serde_json::Value;
use site_sync::api::router;

async fn serve(fx: &Fixture) -> String {
    let app = router(Arc::new(fx.engine.clone()));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn post(url: String) -> (u16, Value) {
    let response = reqwest::Client::new().post(url).send().await.unwrap();
    let status = response.status().as_u16();
    (status, response.json().await.unwrap())
}

async fn get(url: String) -> (u16, Value) {
    let response = reqwest::get(url).await.unwrap();
    let status = response.status().as_u16();
    (status, response.json().await.unwrap())
}

#[tokio::test]
async fn test_trigger_without_candidates_is_404() {
    let fx = fixture();
    let base = serve(&fx).await;

    let (status, body) = post(format!("{}/sync/buildings", base)).await;
    assert_eq!(status, 404);
    assert_eq!(body["message"], "No buildings found without remote id");
}

#[tokio::test]
async fn test_trigger_reports_synced_count() {
    let fx = fixture();
    let business = fx.business("acme");
    fx.seed_property(&business, None);
    fx.seed_property(&business, None);
    let base = serve(&fx).await;

    let (status, body) = post(format!("{}/sync/properties", base)).await;
    assert_eq!(status, 200);
    assert_eq!(body["message"], "Successfully synced 2 properties");
    assert_eq!(body["report"]["succeeded"], 2);
    assert_eq!(body["report"]["entity"], "property");
}

#[tokio::test]
async fn test_trigger_partial_failure_is_207() {
    let fx = fixture();
    let business = fx.business("acme");
    let ok = fx.seed_property(&business, None);
    let broken = fx.seed_property(&business, None);
    fx.remote.fail_create_for(&broken);
    let base = serve(&fx).await;

    let (status, body) = post(format!("{}/sync/properties", base)).await;
    assert_eq!(status, 207);
    assert_eq!(body["message"], "Successfully synced 1 properties");
    assert_eq!(body["report"]["synced"][0]["id_local"], ok.as_str());
    assert_eq!(body["report"]["failed"][0]["id_local"], broken.as_str());
}

#[tokio::test]
async fn test_trigger_all_runs_every_kind() {
    let fx = fixture();
    let business = fx.business("acme");
    let property = fx.seed_property(&business, None);
    let building = fx.seed_building(&property, None);
    fx.seed_zone(&building, None);
    let base = serve(&fx).await;

    let (status, body) = post(format!("{}/sync/all", base)).await;
    assert_eq!(status, 200);
    assert_eq!(body["message"], "Successfully synced 3 entities");
    assert_eq!(body["report"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn test_trigger_unknown_kind_is_400() {
    let fx = fixture();
    let base = serve(&fx).await;

    let (status, body) = post(format!("{}/sync/stores", base)).await;
    assert_eq!(status, 400);
    assert!(body["error"].as_str().unwrap().contains("stores"));
}

#[tokio::test]
async fn test_status_endpoint() {
    let fx = fixture();
    let business = fx.business("acme");
    let property = fx.seed_property(&business, None);
    fx.engine
        .backfill(site_sync::models::EntityKind::Property)
        .await
        .unwrap();
    let base = serve(&fx).await;

    let (status, body) = get(format!("{}/sync/status/property/{}", base, property)).await;
    assert_eq!(status, 200);
    assert_eq!(body["remote_id"], "P1");
    assert_eq!(body["status"], "synced");
    assert!(body["last_attempt"].is_string());

    let (status, body) = get(format!("{}/sync/status/zone/{}", base, property)).await;
    assert_eq!(status, 404);
    assert_eq!(body["code"], "NOT_FOUND");
}
