//! Integration tests for the synchronous conversion API.

mod common;

use std::time::Duration;

use common::{test_config, TestHarness};
use df_convert::{ScriptedConverter, Step};

#[tokio::test]
async fn health_reports_ok() {
    let (h, addr) = TestHarness::with_server().await;
    let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp.headers().contains_key("x-request-id"));
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["status"], "ok");
    h.shutdown().await;
}

#[tokio::test]
async fn formats_lists_sources_and_targets() {
    let (h, addr) = TestHarness::with_server().await;
    let json: serde_json::Value = reqwest::get(format!("http://{addr}/api/formats"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let sources: Vec<&str> = json["sources"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["format"].as_str().unwrap())
        .collect();
    assert!(sources.contains(&"doc"));
    assert!(json["targets"]
        .as_array()
        .unwrap()
        .iter()
        .any(|f| f["mime_type"] == "application/pdf"));
    h.shutdown().await;
}

#[tokio::test]
async fn convert_returns_document_with_headers() {
    let (h, addr) = TestHarness::with_server_converter(
        test_config(),
        ScriptedConverter::new([Step::succeed(b"PK modern document")]),
    )
    .await;

    let resp = reqwest::Client::new()
        .post(format!(
            "http://{addr}/api/convert?from=doc&to=docx&filename=quarterly%20report.doc"
        ))
        .body("legacy bytes")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let headers = resp.headers().clone();
    assert_eq!(
        headers["content-type"],
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
    );
    assert_eq!(
        headers["content-disposition"],
        "attachment; filename=\"quarterly report.docx\""
    );
    assert_eq!(headers["x-docforge-attempts"], "1");
    let job_id = headers["x-docforge-job-id"].to_str().unwrap().to_string();

    assert_eq!(&resp.bytes().await.unwrap()[..], b"PK modern document");

    // The synchronous job is still visible in the registry.
    let job: serde_json::Value = reqwest::get(format!("http://{addr}/api/jobs/{job_id}"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(job["status"], "succeeded");
    assert_eq!(h.ctx.service.workspaces().active(), 0);
    h.shutdown().await;
}

#[tokio::test]
async fn source_format_inferred_from_filename() {
    let (h, addr) = TestHarness::with_server().await;
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/convert?to=pdf&filename=notes.rtf"))
        .body("{\\rtf1 hi}")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "application/pdf");
    h.shutdown().await;
}

#[tokio::test]
async fn unsupported_pair_is_415_and_touches_nothing() {
    let (h, addr) = TestHarness::with_server().await;
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/convert?from=xls&to=docx"))
        .body("spreadsheet")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 415);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["code"], "unsupported_format");
    assert!(json["request_id"].is_string());

    let status = h.ctx.service.status();
    assert_eq!(status.busy_workers, 0);
    assert_eq!(status.active_workspaces, 0);
    assert_eq!(h.converter.calls(), 0);
    h.shutdown().await;
}

#[tokio::test]
async fn empty_body_is_validation_error() {
    let (h, addr) = TestHarness::with_server().await;
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/convert?from=doc&to=docx"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["code"], "validation_error");
    h.shutdown().await;
}

#[tokio::test]
async fn missing_target_is_validation_error() {
    let (h, addr) = TestHarness::with_server().await;
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/convert?from=doc"))
        .body("x")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    h.shutdown().await;
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let mut config = test_config();
    config.server.max_upload_bytes = 16;
    let (h, addr) =
        TestHarness::with_server_converter(config, ScriptedConverter::succeeding()).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/convert?from=doc&to=docx"))
        .body(vec![b'x'; 64])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 413);
    assert_eq!(h.converter.calls(), 0);
    h.shutdown().await;
}

#[tokio::test]
async fn crash_then_success_reports_two_attempts() {
    let (h, addr) = TestHarness::with_server_converter(
        test_config(),
        ScriptedConverter::new([Step::crash(134, "engine aborted"), Step::succeed(b"second")]),
    )
    .await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/convert?from=doc&to=odt"))
        .body("x")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["x-docforge-attempts"], "2");
    assert_eq!(&resp.bytes().await.unwrap()[..], b"second");
    h.shutdown().await;
}

#[tokio::test]
async fn engine_failures_map_to_gateway_statuses() {
    let (h, addr) = TestHarness::with_server_converter(
        test_config(),
        ScriptedConverter::new([
            Step::crash(1, "bad"),
            Step::crash(1, "still bad"),
            Step::NoOutput,
            Step::NoOutput,
            Step::Hang,
            Step::Hang,
        ]),
    )
    .await;
    let client = reqwest::Client::new();
    let url = format!("http://{addr}/api/convert?from=doc&to=docx");

    let resp = client.post(&url).body("x").send().await.unwrap();
    assert_eq!(resp.status(), 502);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["code"], "converter_crashed");
    assert!(json["error"].as_str().unwrap().contains("still bad"));

    let resp = client.post(&url).body("x").send().await.unwrap();
    assert_eq!(resp.status(), 502);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["code"], "conversion_produced_no_output");

    let started = std::time::Instant::now();
    let resp = client.post(&url).body("x").send().await.unwrap();
    assert_eq!(resp.status(), 504);
    assert!(started.elapsed() < Duration::from_secs(5));
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["code"], "timed_out");

    assert_eq!(h.ctx.service.workspaces().active(), 0);
    h.shutdown().await;
}

#[tokio::test]
async fn request_id_is_echoed() {
    let (h, addr) = TestHarness::with_server().await;
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/convert?from=xls&to=docx"))
        .header("x-request-id", "client-supplied-42")
        .body("x")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.headers()["x-request-id"], "client-supplied-42");
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["request_id"], "client-supplied-42");
    h.shutdown().await;
}

#[tokio::test]
async fn openapi_document_is_served() {
    let (h, addr) = TestHarness::with_server().await;
    let json: serde_json::Value = reqwest::get(format!("http://{addr}/api-docs/openapi.json"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(json["info"]["title"], "docforge");
    assert!(json["paths"]["/api/jobs"]["post"].is_object());
    assert!(json["components"]["schemas"]["JobSnapshot"].is_object());
    h.shutdown().await;
}
