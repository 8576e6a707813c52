mod common;

use common::{manual_body, schedule_body, spawn_test_server, track, TestServer, USER};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;
use tandem_providers::{ServiceHealth, ServiceInfo};
use tandem_server::{AuthorizeResponse, ConnectionsResponse, ErrorBody};
use tandem_sync::{
    JobDetail, ManualSyncAccepted, ScheduleAccepted, ScheduleSummary, SyncConfig,
    SyncStatusReport,
};
use tandem_types::{JobStatus, ServicePair};

async fn error_of(resp: reqwest::Response) -> ErrorBody {
    resp.json().await.unwrap()
}

async fn wait_for_terminal(server: &TestServer, job_id: &str) -> JobDetail {
    for _ in 0..200 {
        let resp = server
            .get(&format!("/sync/jobs/{job_id}"))
            .send()
            .await
            .unwrap();
        // No record exists until a worker picks the job up.
        if resp.status() == 200 {
            let detail: JobDetail = resp.json().await.unwrap();
            if detail.job.status.is_terminal() {
                return detail;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job {job_id} never finished");
}

// ── Health & catalogue ──────────────────────────────────────────

#[tokio::test]
async fn health_endpoint_needs_no_user() {
    let server = spawn_test_server(SyncConfig::default(), false).await;
    let resp = reqwest::get(server.url("/health")).await.unwrap();

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn services_are_listed_by_name() {
    let server = spawn_test_server(SyncConfig::default(), false).await;
    let services: Vec<ServiceInfo> = server
        .get("/services")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let mut names: Vec<_> = services.iter().map(|s| s.name.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["deezer", "spotify"]);
}

#[tokio::test]
async fn supported_pairs_cover_both_directions() {
    let server = spawn_test_server(SyncConfig::default(), false).await;
    let pairs: Vec<ServicePair> = server
        .get("/services/pairs")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(pairs.len(), 6);
    assert!(pairs.iter().any(|p| p.source_service == "spotify" && p.target_service == "deezer"));
    assert!(pairs.iter().any(|p| p.source_service == "deezer" && p.target_service == "spotify"));
}

#[tokio::test]
async fn service_health_reports_each_adapter() {
    let server = spawn_test_server(SyncConfig::default(), false).await;
    let health: Vec<ServiceHealth> = server
        .get("/services/health")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(health.len(), 2);
    assert!(health.iter().all(|h| h.healthy));
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let server = spawn_test_server(SyncConfig::default(), false).await;
    let resp = server.get("/nonexistent").send().await.unwrap();
    assert_eq!(resp.status(), 404);
}

// ── Identity ────────────────────────────────────────────────────

#[tokio::test]
async fn missing_user_header_is_unauthenticated() {
    let server = spawn_test_server(SyncConfig::default(), false).await;
    let resp = server
        .client
        .get(server.url("/sync/status"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 401);
    let body = error_of(resp).await;
    assert_eq!(body.error, "unauthenticated");
    assert!(!body.retryable);
}

#[tokio::test]
async fn blank_user_header_is_unauthenticated() {
    let server = spawn_test_server(SyncConfig::default(), false).await;
    let resp = server
        .client
        .get(server.url("/connections"))
        .header("x-user-id", "   ")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 401);
}

// ── Connections ─────────────────────────────────────────────────

#[tokio::test]
async fn authorize_returns_provider_url() {
    let server = spawn_test_server(SyncConfig::default(), false).await;
    let resp = server
        .get("/connections/spotify/authorize?state=xyz&redirect_uri=http://localhost/cb")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: AuthorizeResponse = resp.json().await.unwrap();
    assert!(body.url.starts_with("memory://spotify/authorize"));
    assert!(body.url.contains("xyz"));
}

#[tokio::test]
async fn authorize_unknown_service_is_404() {
    let server = spawn_test_server(SyncConfig::default(), false).await;
    let resp = server
        .get("/connections/tidal/authorize?state=xyz&redirect_uri=http://localhost/cb")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 404);
    assert_eq!(error_of(resp).await.error, "service_unavailable");
}

#[tokio::test]
async fn connect_list_and_disconnect() {
    let server = spawn_test_server(SyncConfig::default(), false).await;
    server.connect_both().await;

    let connections: ConnectionsResponse = server
        .get("/connections")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let mut services = connections.services;
    services.sort_unstable();
    assert_eq!(services, vec!["deezer", "spotify"]);

    let resp = server.delete("/connections/deezer").send().await.unwrap();
    assert_eq!(resp.status(), 204);

    let resp = server.delete("/connections/deezer").send().await.unwrap();
    assert_eq!(resp.status(), 404);
    assert_eq!(error_of(resp).await.error, "not_found");
}

#[tokio::test]
async fn empty_authorization_code_is_rejected() {
    let server = spawn_test_server(SyncConfig::default(), false).await;
    let resp = server
        .post("/connections/spotify")
        .json(&json!({"code": "", "redirect_uri": "http://localhost/cb"}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    assert_eq!(error_of(resp).await.error, "authorization_failed");
}

// ── Manual sync ─────────────────────────────────────────────────

#[tokio::test]
async fn manual_sync_requires_connected_services() {
    let server = spawn_test_server(SyncConfig::default(), false).await;
    let resp = server
        .post("/sync/manual")
        .json(&manual_body("sync-to"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 409);
    assert_eq!(error_of(resp).await.error, "service_not_connected");
}

#[tokio::test]
async fn manual_sync_with_bad_threshold_is_400() {
    let server = spawn_test_server(SyncConfig::default(), false).await;
    server.connect_both().await;
    let mut body = manual_body("sync-to");
    body["sync_options"]["match_threshold"] = json!(1.5);

    let resp = server.post("/sync/manual").json(&body).send().await.unwrap();

    assert_eq!(resp.status(), 400);
    assert_eq!(error_of(resp).await.error, "validation_error");
}

#[tokio::test]
async fn malformed_body_is_rejected() {
    let server = spawn_test_server(SyncConfig::default(), false).await;
    let resp = server
        .post("/sync/manual")
        .json(&json!({"sync_type": "tracks"}))
        .send()
        .await
        .unwrap();

    assert!(resp.status().is_client_error());
}

#[tokio::test]
async fn manual_sync_runs_to_completion() {
    let server = spawn_test_server(SyncConfig::default(), true).await;
    server
        .spotify
        .add_item(USER, track("s1", "Blue Monday", "New Order"));
    server
        .spotify
        .add_item(USER, track("s2", "Hey Jude", "The Beatles"));
    server.connect_both().await;

    let resp = server
        .post("/sync/manual")
        .json(&manual_body("sync-from"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let accepted: ManualSyncAccepted = resp.json().await.unwrap();
    assert!(accepted.accepted);
    assert_eq!(accepted.total_directions, 1);

    let detail = wait_for_terminal(&server, &accepted.job_id.to_string()).await;
    assert_eq!(detail.job.status, JobStatus::Completed);
    let result = detail.result.unwrap();
    assert_eq!(result.total_items_synced, 2);
    assert_eq!(server.deezer.items(USER).len(), 2);

    let status: SyncStatusReport = server
        .get("/sync/status")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status.recent_jobs.len(), 1);
    assert_eq!(status.stats.completed, 1);
}

#[tokio::test]
async fn full_queue_is_retryable_503() {
    let config = SyncConfig {
        queue_capacity: 1,
        manual_enqueue_timeout_ms: 50,
        ..SyncConfig::default()
    };
    let server = spawn_test_server(config, false).await;
    server.connect_both().await;

    let first = server
        .post("/sync/manual")
        .json(&manual_body("sync-to"))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 202);

    let second = server
        .post("/sync/manual")
        .json(&manual_body("sync-to"))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 503);
    let body = error_of(second).await;
    assert_eq!(body.error, "queue_full");
    assert!(body.retryable);
}

// ── Jobs ────────────────────────────────────────────────────────

#[tokio::test]
async fn malformed_job_id_is_400() {
    let server = spawn_test_server(SyncConfig::default(), false).await;
    let resp = server.get("/sync/jobs/not-a-uuid").send().await.unwrap();

    assert_eq!(resp.status(), 400);
    assert_eq!(error_of(resp).await.error, "bad_request");
}

#[tokio::test]
async fn unknown_job_is_404() {
    let server = spawn_test_server(SyncConfig::default(), false).await;
    let resp = server
        .get("/sync/jobs/0190a5d2-7f3e-7c1a-9b2d-3e4f5a6b7c8d")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 404);
    assert_eq!(error_of(resp).await.error, "job_not_found");
}

#[tokio::test]
async fn queued_job_has_no_record_yet() {
    let server = spawn_test_server(SyncConfig::default(), false).await;
    server.connect_both().await;
    let accepted: ManualSyncAccepted = server
        .post("/sync/manual")
        .json(&manual_body("sync-to"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let resp = server
        .get(&format!("/sync/jobs/{}", accepted.job_id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn finished_jobs_are_private_and_not_cancellable() {
    let server = spawn_test_server(SyncConfig::default(), true).await;
    server.connect_both().await;
    let accepted: ManualSyncAccepted = server
        .post("/sync/manual")
        .json(&manual_body("sync-from"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let detail = wait_for_terminal(&server, &accepted.job_id.to_string()).await;
    assert_eq!(detail.job.status, JobStatus::Completed);

    let resp = server
        .client
        .get(server.url(&format!("/sync/jobs/{}", accepted.job_id)))
        .header("x-user-id", "mallory")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = server
        .post(&format!("/sync/jobs/{}/cancel", accepted.job_id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    assert_eq!(error_of(resp).await.error, "job_not_cancellable");
}

// ── Schedules ───────────────────────────────────────────────────

#[tokio::test]
async fn schedule_below_minimum_frequency_is_400() {
    let server = spawn_test_server(SyncConfig::default(), false).await;
    server.connect_both().await;
    let resp = server
        .post("/sync/schedules")
        .json(&schedule_body(540))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn schedule_lifecycle() {
    let server = spawn_test_server(SyncConfig::default(), false).await;
    server.connect_both().await;

    let resp = server
        .post("/sync/schedules")
        .json(&schedule_body(600))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let accepted: ScheduleAccepted = resp.json().await.unwrap();
    assert!(accepted.next_run.is_some());

    let status: SyncStatusReport = server
        .get("/sync/status")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status.schedules.len(), 1);
    assert_eq!(status.schedules[0].schedule_id, accepted.schedule_id);
    assert_eq!(status.schedules[0].frequency_secs, 600);

    let resp = server
        .patch("/sync/schedules/tracks")
        .json(&json!({"enabled": false, "frequency_secs": 3600}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let summary: ScheduleSummary = resp.json().await.unwrap();
    assert!(!summary.enabled);
    assert_eq!(summary.frequency_secs, 3600);

    let resp = server.delete("/sync/schedules/tracks").send().await.unwrap();
    assert_eq!(resp.status(), 204);

    let resp = server.delete("/sync/schedules/tracks").send().await.unwrap();
    assert_eq!(resp.status(), 404);
    assert_eq!(error_of(resp).await.error, "schedule_not_found");
}

#[tokio::test]
async fn empty_schedule_update_is_400() {
    let server = spawn_test_server(SyncConfig::default(), false).await;
    server.connect_both().await;
    let resp = server
        .post("/sync/schedules")
        .json(&schedule_body(600))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let resp = server
        .patch("/sync/schedules/tracks")
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}
