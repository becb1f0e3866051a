use httpmock::prelude::*;
use image::{ImageFormat, Rgb, RgbImage};
use serde_json::json;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use whatsapp_broadcaster::{
    broadcast::{hosts, HostEndpoint, UltraMsgClient},
    commands::{self, AppState, BroadcastRequest, Recipient, RecipientType, SessionStatus},
    config::Config,
    database::Database,
    errors::AppError,
    image_processor,
    security::InputValidator,
};

/// Integration tests for the broadcaster backend
/// These run whole broadcasts against mocked gateway hosts

fn recipient(name: &str, phone: &str) -> Recipient {
    Recipient {
        id: String::new(),
        name: name.to_string(),
        phone: phone.to_string(),
    }
}

async fn state_with_hosts(hosts: Vec<HostEndpoint>) -> Arc<AppState> {
    let config = Config {
        hosts,
        poll_interval_ms: 100,
        upload_backoff_ms: 0,
        ..Config::default()
    };
    let gateway = UltraMsgClient::new(Duration::from_secs(5), Duration::from_secs(5)).unwrap();
    let database = Database::connect_in_memory().await.unwrap();
    Arc::new(AppState::with_gateway(config, database, Arc::new(gateway)))
}

fn write_test_png(name: &str) -> std::path::PathBuf {
    let img = RgbImage::from_pixel(4, 4, Rgb([10, 120, 200]));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png).unwrap();
    let path = std::env::temp_dir().join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

#[tokio::test]
async fn test_broadcast_fails_over_to_second_host() {
    let primary = MockServer::start_async().await;
    let secondary = MockServer::start_async().await;

    let primary_mock = primary
        .mock_async(|when, then| {
            when.method(POST).path("/instance55/messages/chat");
            then.status(502).body("Bad Gateway");
        })
        .await;
    let secondary_mock = secondary
        .mock_async(|when, then| {
            when.method(POST).path("/instance55/messages/chat");
            then.status(200).json_body(json!({"sent": "true", "message": "ok"}));
        })
        .await;

    let state = state_with_hosts(vec![
        HostEndpoint::new(&primary.base_url()),
        HostEndpoint::new(&secondary.base_url()),
    ])
    .await;
    let account_id = commands::add_account(&state, "Main".into(), "instance55".into(), "tok-1234".into())
        .await
        .unwrap();

    let session_id = commands::start_broadcast(
        &state,
        BroadcastRequest {
            account_id,
            recipients: vec![recipient("Ali", "+20 100 111 1111"), recipient("Sara", "201002222222")],
            text: "Classes resume on Sunday".to_string(),
            image_path: None,
            recipient_type: RecipientType::Contact,
            delay_ms: Some(0),
        },
    )
    .await
    .unwrap();

    let progress = commands::wait_for_broadcast(&state, &session_id).await.unwrap();
    assert_eq!(progress.status, SessionStatus::Completed);
    assert_eq!((progress.sent, progress.failed), (2, 0));
    primary_mock.assert_hits_async(2).await;
    secondary_mock.assert_hits_async(2).await;

    let deliveries = commands::get_session_deliveries(&state, &session_id).await.unwrap();
    assert_eq!(deliveries.len(), 2);
    assert_eq!(deliveries[0].phone, "201001111111");
    assert_eq!(deliveries[0].host.as_deref(), Some(secondary.base_url().as_str()));
}

#[tokio::test]
async fn test_rejected_recipient_is_recorded_as_failed() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/instance55/messages/chat")
                .body_contains("\"to\":\"201009999999\"");
            then.status(200).json_body(json!({"error": "invalid number"}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/instance55/messages/chat")
                .body_contains("\"to\":\"201001111111\"");
            then.status(200).json_body(json!({"sent": true}));
        })
        .await;

    let state = state_with_hosts(vec![HostEndpoint::new(&server.base_url())]).await;
    let account_id = commands::add_account(&state, "Main".into(), "instance55".into(), "tok-1234".into())
        .await
        .unwrap();

    let session_id = commands::start_broadcast(
        &state,
        BroadcastRequest {
            account_id,
            recipients: vec![recipient("Wrong", "201009999999"), recipient("Ali", "201001111111")],
            text: "hello".to_string(),
            image_path: None,
            recipient_type: RecipientType::Contact,
            delay_ms: Some(0),
        },
    )
    .await
    .unwrap();

    let progress = commands::wait_for_broadcast(&state, &session_id).await.unwrap();
    assert_eq!((progress.sent, progress.failed, progress.total), (1, 1, 2));

    let failed: Vec<_> = progress.failed_deliveries().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].phone, "201009999999");

    let history = commands::get_broadcast_history(&state, 5).await.unwrap();
    assert_eq!((history[0].sent, history[0].failed), (1, 1));
}

#[tokio::test]
async fn test_image_broadcast_uploads_once_then_sends_url() {
    let server = MockServer::start_async().await;
    let upload = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/instance55/media/upload")
                .query_param("token", "tok-1234");
            then.status(200).json_body(json!({"url": "https://files.example/flyer.png"}));
        })
        .await;
    let send = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/instance55/messages/image")
                .body_contains("https://files.example/flyer.png")
                .body_contains("Open day");
            then.status(200).json_body(json!({"sent": "true"}));
        })
        .await;

    let image_path = write_test_png("broadcaster_integration_flyer.png");
    let state = state_with_hosts(vec![HostEndpoint::new(&server.base_url())]).await;
    let account_id = commands::add_account(&state, "Main".into(), "instance55".into(), "tok-1234".into())
        .await
        .unwrap();

    let started = commands::start_broadcast(
        &state,
        BroadcastRequest {
            account_id,
            recipients: vec![
                recipient("Parents", "120363025246125486@g.us"),
                recipient("Teachers", "120363025246125487@g.us"),
            ],
            text: "Open day".to_string(),
            image_path: Some(image_path.to_string_lossy().to_string()),
            recipient_type: RecipientType::Group,
            delay_ms: Some(0),
        },
    )
    .await;
    let _ = std::fs::remove_file(&image_path);

    let progress = commands::wait_for_broadcast(&state, &started.unwrap()).await.unwrap();
    assert_eq!(progress.sent, 2);
    upload.assert_hits_async(1).await;
    send.assert_hits_async(2).await;
}

#[tokio::test]
async fn test_failed_upload_falls_back_to_inline_image() {
    let server = MockServer::start_async().await;
    let upload = server
        .mock_async(|when, then| {
            when.method(POST).path("/instance55/media/upload");
            then.status(500).body("upstream timeout");
        })
        .await;
    let send = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/instance55/messages/image")
                .body_contains("data:image/png;base64,");
            then.status(200).json_body(json!({"sent": true}));
        })
        .await;

    let image_path = write_test_png("broadcaster_integration_inline.png");
    let state = state_with_hosts(vec![HostEndpoint::new(&server.base_url())]).await;
    let account_id = commands::add_account(&state, "Main".into(), "instance55".into(), "tok-1234".into())
        .await
        .unwrap();

    let started = commands::start_broadcast(
        &state,
        BroadcastRequest {
            account_id,
            recipients: vec![recipient("Ali", "201001111111")],
            text: String::new(),
            image_path: Some(image_path.to_string_lossy().to_string()),
            recipient_type: RecipientType::Contact,
            delay_ms: Some(0),
        },
    )
    .await;
    let _ = std::fs::remove_file(&image_path);

    let progress = commands::wait_for_broadcast(&state, &started.unwrap()).await.unwrap();
    assert_eq!(progress.sent, 1);
    upload.assert_hits_async(3).await;
    send.assert_hits_async(1).await;
}

#[tokio::test]
async fn test_upload_failure_without_fallback_does_not_start() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/instance55/media/upload");
            then.status(200).json_body(json!({"error": "file type not allowed"}));
        })
        .await;
    let send = server
        .mock_async(|when, then| {
            when.method(POST).path("/instance55/messages/image");
            then.status(200).json_body(json!({"sent": true}));
        })
        .await;

    let image_path = write_test_png("broadcaster_integration_nofallback.png");
    let config = Config {
        hosts: vec![HostEndpoint::new(&server.base_url())],
        inline_image_fallback: false,
        upload_attempts: 2,
        upload_backoff_ms: 0,
        ..Config::default()
    };
    let gateway = UltraMsgClient::new(Duration::from_secs(5), Duration::from_secs(5)).unwrap();
    let state = Arc::new(AppState::with_gateway(
        config,
        Database::connect_in_memory().await.unwrap(),
        Arc::new(gateway),
    ));
    let account_id = commands::add_account(&state, "Main".into(), "instance55".into(), "tok-1234".into())
        .await
        .unwrap();

    let result = commands::start_broadcast(
        &state,
        BroadcastRequest {
            account_id,
            recipients: vec![recipient("Ali", "201001111111")],
            text: "caption".to_string(),
            image_path: Some(image_path.to_string_lossy().to_string()),
            recipient_type: RecipientType::Contact,
            delay_ms: Some(0),
        },
    )
    .await;
    let _ = std::fs::remove_file(&image_path);

    match result {
        Err(AppError::Gateway { reason, .. }) => assert_eq!(reason, "file type not allowed"),
        other => panic!("expected gateway error, got {:?}", other),
    }
    send.assert_hits_async(0).await;
    assert!(commands::get_broadcast_history(&state, 5).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cancel_right_after_start_stops_broadcast() {
    let server = MockServer::start_async().await;
    let send = server
        .mock_async(|when, then| {
            when.method(POST).path("/instance55/messages/chat");
            then.status(200).json_body(json!({"sent": true}));
        })
        .await;

    let state = state_with_hosts(vec![HostEndpoint::new(&server.base_url())]).await;
    let account_id = commands::add_account(&state, "Main".into(), "instance55".into(), "tok-1234".into())
        .await
        .unwrap();

    let session_id = commands::start_broadcast(
        &state,
        BroadcastRequest {
            account_id,
            recipients: vec![recipient("Ali", "201001111111"), recipient("Sara", "201002222222")],
            text: "hello".to_string(),
            image_path: None,
            recipient_type: RecipientType::Contact,
            delay_ms: Some(200),
        },
    )
    .await
    .unwrap();

    commands::cancel_broadcast(&state, &session_id).unwrap();

    let progress = commands::wait_for_broadcast(&state, &session_id).await.unwrap();
    assert_eq!(progress.status, SessionStatus::Cancelled);
    assert_eq!(progress.sent + progress.failed, 0);
    send.assert_hits_async(0).await;

    let history = commands::get_broadcast_history(&state, 5).await.unwrap();
    assert_eq!(history[0].status, "cancelled");
}

#[test]
fn test_region_hint_orders_hosts() {
    let account = commands::Account::new("instanceHK42", "tok");
    let ordered = hosts::ordered_hosts(&hosts::default_hosts(), &account);
    assert_eq!(ordered[0].base_url, "https://hk.ultramsg.com");
    assert_eq!(ordered[1].base_url, "https://api.ultramsg.com");
    assert_eq!(
        ordered[0].instance_url(&account, "messages/chat"),
        "https://hk.ultramsg.com/instanceHK42/messages/chat"
    );
}

#[tokio::test]
async fn test_media_file_and_validation_workflow() {
    let path = write_test_png("broadcaster_integration_media.png");
    let path_str = path.to_string_lossy().to_string();

    let validation = InputValidator::validate_image_file(&path_str);
    let media = image_processor::load_media_file(&path_str, &Config::default()).await;
    let _ = std::fs::remove_file(&path);

    assert!(validation.is_ok());
    let media = media.unwrap();
    assert_eq!(media.mime_type, "image/png");
    assert!(media.preview.unwrap().starts_with("data:image/png;base64,"));
    assert!(!image_processor::should_compress_image(media.bytes.len() as u64, 16 * 1024 * 1024));
}
