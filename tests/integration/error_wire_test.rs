//! AppError wire representation: JSON round trips and errors crossing the
//! plugin channel.

mod helpers;

use serde_json::{Value, json};

use chathub_core::types::{ChannelId, UserId};
use chathub_core::{AppError, ErrorKind};
use chathub_entity::Post;
use chathub_plugin::hooks::{HookContext, HookName, MessageHasBeenPostedArgs};
use chathub_plugin_sdk::HookTable;

use helpers::TestHost;

fn fully_populated() -> AppError {
    AppError::not_found("Profile image not found")
        .at("api.get_profile_image")
        .with_status(404)
        .caused_by(
            AppError::internal("storage read failed")
                .at("storage.read")
                .with_status(503),
        )
}

#[test]
fn test_roundtrip_with_every_field_populated() {
    let original = fully_populated();
    let encoded = serde_json::to_string(&original).unwrap();
    let decoded: AppError = serde_json::from_str(&encoded).unwrap();
    assert_eq!(decoded, original);
}

#[test]
fn test_roundtrip_keeps_absent_optionals_absent() {
    let original = AppError::validation("bad id").at("api.get_user");
    let encoded = serde_json::to_value(&original).unwrap();
    assert_eq!(encoded["status_code"], Value::Null);
    assert_eq!(encoded["cause"], Value::Null);

    let decoded: AppError = serde_json::from_value(encoded).unwrap();
    assert_eq!(decoded, original);
    assert_eq!(decoded.status_code, None);
}

#[test]
fn test_decoding_requires_kind() {
    let frame = json!({
        "message": "no kind",
        "location": "",
        "status_code": null,
        "cause": null
    });
    assert!(serde_json::from_value::<AppError>(frame).is_err());
}

#[test]
fn test_decoding_requires_optionals_to_be_explicit() {
    let frame = json!({
        "kind": "NOT_FOUND",
        "message": "missing",
        "location": "x"
    });
    assert!(serde_json::from_value::<AppError>(frame).is_err());
}

#[tokio::test]
async fn test_plugin_error_arrives_intact_at_the_server() {
    let host = TestHost::new();
    host.load("failing", &[], || {
        HookTable::new().message_has_been_posted(|_api, _ctx, _post| async {
            Err(fully_populated())
        })
    })
    .await
    .unwrap();

    let args = serde_json::to_value(MessageHasBeenPostedArgs {
        context: HookContext::new(),
        post: Post::new(ChannelId::new(), UserId::new(), "hi"),
    })
    .unwrap();
    let err = host
        .manager
        .dispatcher()
        .invoke("failing", HookName::MessageHasBeenPosted, args)
        .await
        .unwrap_err();

    assert!(!err.is_liveness_failure());
    assert_eq!(err.as_app_error(), Some(&fully_populated()));
    assert_eq!(err.as_app_error().map(|e| e.kind), Some(ErrorKind::NotFound));

    host.manager.unload_all().await.unwrap();
}
