//! HTTP surface tests via `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header::CONTENT_TYPE, Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Duration, Utc};
use levain_core::api::{router, ApiState};
use levain_core::storage::RecalibrationConfig;
use levain_core::{
    Bake, BakePatch, BakeStorage, ManualClock, MemoryBakeStorage, RecalibrationService,
    StaticSensor, StorageError,
};
use tower::ServiceExt;

fn now() -> DateTime<Utc> {
    "2026-03-01T10:00:00Z".parse().unwrap()
}

fn app(storage: Arc<dyn BakeStorage>, sensor: StaticSensor) -> Router {
    let service = RecalibrationService::new(
        storage,
        Arc::new(sensor),
        Arc::new(ManualClock::new(now())),
        RecalibrationConfig::default(),
    );
    router(ApiState { service })
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn stored_bake(storage: &MemoryBakeStorage) {
    storage.insert(Bake {
        id: "b1".into(),
        recipe_name: "Country loaf".into(),
        current_step: 3,
        start_time: now() - Duration::hours(4),
        estimated_end_time: now() + Duration::minutes(120),
        timeline_adjustments: Vec::new(),
    });
}

struct BrokenStorage;

#[async_trait]
impl BakeStorage for BrokenStorage {
    async fn get_bake(&self, _id: &str) -> Result<Option<Bake>, StorageError> {
        Err(StorageError::Backend("disk on fire".into()))
    }

    async fn update_bake(&self, _id: &str, _patch: BakePatch) -> Result<Bake, StorageError> {
        Err(StorageError::Backend("disk on fire".into()))
    }
}

/// Memory storage whose reads take a while, so concurrent runs overlap.
struct SlowStorage(MemoryBakeStorage);

#[async_trait]
impl BakeStorage for SlowStorage {
    async fn get_bake(&self, id: &str) -> Result<Option<Bake>, StorageError> {
        let bake = self.0.get_bake(id).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        bake
    }

    async fn update_bake(&self, id: &str, patch: BakePatch) -> Result<Bake, StorageError> {
        self.0.update_bake(id, patch).await
    }
}

#[tokio::test]
async fn concurrent_recalibrations_both_append() {
    let inner = MemoryBakeStorage::new();
    stored_bake(&inner);
    let storage = Arc::new(SlowStorage(inner));
    let service = RecalibrationService::new(
        storage.clone(),
        Arc::new(StaticSensor {
            temperature: Some(200),
            humidity: Some(50),
        }),
        Arc::new(ManualClock::new(now())),
        RecalibrationConfig::default(),
    );

    let (first, second) = tokio::join!(
        service.recalibrate_bake("b1"),
        service.recalibrate_bake("b1")
    );
    first.unwrap();
    second.unwrap();

    let bake = storage.0.get_bake("b1").await.unwrap().unwrap();
    assert_eq!(bake.timeline_adjustments.len(), 2);
    assert_eq!(bake.estimated_end_time, now() + Duration::minutes(120 + 60));
}

#[tokio::test]
async fn recalibrate_returns_updated_bake() {
    let storage = Arc::new(MemoryBakeStorage::new());
    stored_bake(&storage);
    let app = app(
        storage.clone(),
        StaticSensor {
            temperature: Some(200),
            humidity: Some(65),
        },
    );

    let response = app.oneshot(post("/bakes/b1/recalibrate")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    let expected_end = now() + Duration::minutes(138);
    assert_eq!(
        body["estimatedEndTime"].as_str().unwrap().parse::<DateTime<Utc>>().unwrap(),
        expected_end
    );
    let adjustments = body["timelineAdjustments"].as_array().unwrap();
    assert_eq!(adjustments.len(), 1);
    assert!((adjustments[0]["adjustmentMinutes"].as_f64().unwrap() - 18.0).abs() < 1e-9);

    let stored = storage.get_bake("b1").await.unwrap().unwrap();
    assert_eq!(stored.estimated_end_time, expected_end);
    assert_eq!(stored.current_step, 3);
}

#[tokio::test]
async fn missing_sensor_reading_still_appends() {
    let storage = Arc::new(MemoryBakeStorage::new());
    stored_bake(&storage);
    let app = app(storage, StaticSensor::default());

    let response = app.oneshot(post("/bakes/b1/recalibrate")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let reason = body["timelineAdjustments"][0]["reason"].as_str().unwrap();
    assert!(reason.contains("No sensor reading"));
}

#[tokio::test]
async fn unknown_bake_is_404_problem() {
    let app = app(Arc::new(MemoryBakeStorage::new()), StaticSensor::default());

    let response = app.oneshot(post("/bakes/nope/recalibrate")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        response.headers()[CONTENT_TYPE],
        "application/problem+json"
    );
    let body = json_body(response).await;
    assert_eq!(body["code"], "bake_not_found");
    assert_eq!(body["status"], 404);
}

#[tokio::test]
async fn storage_failure_is_500_without_details() {
    let app = app(Arc::new(BrokenStorage), StaticSensor::default());

    let response = app.oneshot(post("/bakes/b1/recalibrate")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert_eq!(body["code"], "storage_failure");
    assert!(!body["detail"].as_str().unwrap().contains("fire"));
}

#[tokio::test]
async fn healthz_is_ok() {
    let app = app(Arc::new(MemoryBakeStorage::new()), StaticSensor::default());
    let response = app
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "ok");
}

#[tokio::test]
async fn get_on_recalibrate_is_rejected() {
    let app = app(Arc::new(MemoryBakeStorage::new()), StaticSensor::default());
    let response = app
        .oneshot(
            Request::builder()
                .uri("/bakes/b1/recalibrate")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}
