use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use runout_console::error::{DeviceError, SaveError};
use runout_console::net::{DeviceApi, HttpDevice};
use runout_console::retry::RetryPolicy;
use runout_console::settings::{Field, FieldValue, SettingsSync};

#[derive(Clone, Default)]
struct FakeDevice {
    bodies: Arc<Mutex<Vec<Value>>>,
    // caps the timeout like firmware that silently clamps
    timeout_cap: Option<u64>,
    fail_writes: bool,
}

async fn get_settings() -> Json<Value> {
    Json(json!({
        "ssid": "workshop",
        "elegooip": "192.168.1.50",
        "timeout": 2500,
        "first_layer_timeout": 5000,
        "start_print_timeout": 12000,
        "ap_mode": false,
        "pause_on_runout": true,
        "enabled": true
    }))
}

async fn update_settings(State(fake): State<FakeDevice>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    fake.bodies.lock().unwrap().push(body.clone());
    let mut timeout = body["timeout"].as_u64().unwrap_or(0);
    if let Some(cap) = fake.timeout_cap {
        timeout = timeout.min(cap);
    }
    let status = if fake.fail_writes {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    (
        status,
        Json(json!({
            "success": !fake.fail_writes,
            "settings": {
                "timeout": timeout,
                "first_layer_timeout": body["first_layer_timeout"],
                "pause_on_runout": body["pause_on_runout"],
                "start_print_timeout": body["start_print_timeout"],
                "enabled": body["enabled"],
                "elegooip": body["elegooip"],
                "ssid": body["ssid"],
                "ap_mode": body["ap_mode"]
            }
        })),
    )
}

async fn sensor_status() -> Json<Value> {
    Json(json!({
        "stopped": true,
        "filamentRunout": false,
        "elegoo": {
            "mainboardID": "mb-1",
            "printStatus": 13,
            "isPrinting": true,
            "currentLayer": 1,
            "totalLayer": 200,
            "progress": 1,
            "currentTicks": 4,
            "totalTicks": 4,
            "PrintSpeedPct": 100,
            "isWebsocketConnected": true,
            "currentZ": 0.2,
            "avgTimeBetweenTicks": 900,
            "minTickTime": 600,
            "maxTickTime": 1300,
            "tickSampleCount": 4,
            "startAvgTickTime": 900,
            "startMinTickTime": 600,
            "startMaxTickTime": 1300,
            "startTickCount": 4,
            "firstLayerAvgTickTime": 900,
            "firstLayerMinTickTime": 600,
            "firstLayerMaxTickTime": 1300,
            "firstLayerTickCount": 4,
            "laterLayersAvgTickTime": 0,
            "laterLayersMinTickTime": 0,
            "laterLayersMaxTickTime": 0,
            "laterLayersTickCount": 0
        },
        "settings": { "timeout": 2500, "first_layer_timeout": 5000, "enabled": true }
    }))
}

async fn serve(fake: FakeDevice) -> String {
    let app = Router::new()
        .route("/get_settings", get(get_settings))
        .route("/update_settings", post(update_settings))
        .route("/sensor_status", get(sensor_status))
        .route("/reset_stats", post(|| async { Json(json!({ "success": true })) }))
        .route(
            "/version",
            get(|| async {
                Json(json!({
                    "firmware_version": "1.4.2",
                    "chip_family": "ESP32-S3",
                    "build_date": "Oct 19 2026",
                    "build_time": "10:00:00"
                }))
            }),
        )
        .route("/logs", get(|| async { Json(json!([{ "message": "boot" }])) }))
        .with_state(fake);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/", addr)
}

fn quick_retries() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(10))
}

#[tokio::test]
async fn reads_every_endpoint() {
    let url = serve(FakeDevice::default()).await;
    let device = HttpDevice::new(reqwest::Client::new(), url.clone());
    assert_eq!(device.base_url(), url.trim_end_matches('/'));

    let settings = device.get_settings().await.unwrap();
    assert_eq!(settings.start_print_timeout, Some(12_000));

    let status = device.sensor_status().await.unwrap();
    assert!(status.stopped);
    assert!(status.elegoo.is_actively_printing());
    assert_eq!(runout_console::status::active_timeout(&status), 5000);

    device.reset_stats().await.unwrap();

    let identity = device.version().await.unwrap();
    assert_eq!(identity.chip_family.as_deref(), Some("ESP32-S3"));

    let logs = device.logs().await.unwrap();
    assert_eq!(logs[0]["message"], "boot");
}

#[tokio::test]
async fn save_posts_integer_payload_and_verifies_echo() {
    let fake = FakeDevice::default();
    let url = serve(fake.clone()).await;
    let device = Arc::new(HttpDevice::new(reqwest::Client::new(), url));
    let sync = SettingsSync::new(device, quick_retries(), Duration::from_secs(3));

    let mut form = sync.load().await.unwrap();
    form.set(Field::Timeout, FieldValue::Text("1800".to_string()));
    sync.save(&mut form).await.unwrap();

    let bodies = fake.bodies.lock().unwrap().clone();
    assert_eq!(bodies.len(), 1);
    let body = &bodies[0];
    assert_eq!(body["timeout"], json!(1800));
    assert_eq!(body["ap_mode"], json!(false));
    assert_eq!(body["passwd"], json!(""));
    assert_eq!(body["start_print_timeout"], json!(12000));
}

#[tokio::test]
async fn clamped_write_is_reported_as_mismatch() {
    let fake = FakeDevice {
        timeout_cap: Some(1000),
        ..FakeDevice::default()
    };
    let url = serve(fake.clone()).await;
    let device = Arc::new(HttpDevice::new(reqwest::Client::new(), url));
    let sync = SettingsSync::new(device, quick_retries(), Duration::from_secs(3));

    let mut form = sync.load().await.unwrap();
    let err = sync.save(&mut form).await.unwrap_err();
    assert_eq!(fake.bodies.lock().unwrap().len(), 3);
    let SaveError::Write(write) = err else {
        panic!("expected a write failure");
    };
    assert_eq!(write.mismatches().len(), 1);
    assert!(write.to_string().contains("timeout (got 1000, expected 2500)"));
}

#[tokio::test]
async fn server_error_status_fails_each_attempt() {
    let fake = FakeDevice {
        fail_writes: true,
        ..FakeDevice::default()
    };
    let url = serve(fake.clone()).await;
    let device = Arc::new(HttpDevice::new(reqwest::Client::new(), url));
    let sync = SettingsSync::new(device, quick_retries(), Duration::from_secs(3));

    let mut form = sync.load().await.unwrap();
    let err = sync.save(&mut form).await.unwrap_err();
    assert_eq!(fake.bodies.lock().unwrap().len(), 3);
    assert!(err.to_string().ends_with("HTTP 500: Internal Server Error"));
}

#[tokio::test]
async fn unreachable_device_is_a_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let device = HttpDevice::new(reqwest::Client::new(), url);
    let err = device.sensor_status().await.unwrap_err();
    assert!(matches!(err, DeviceError::Transport(_)));
}
