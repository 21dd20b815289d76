//! Plugin-to-server API calls made from inside hooks.

mod helpers;

use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;

use chathub_core::types::{ChannelId, UserId};
use chathub_core::{AppResult, ErrorKind};
use chathub_entity::Post;
use chathub_plugin::api::{ApiPermission, LogLevel};
use chathub_plugin::hooks::{ContentHookReply, HookContext};
use chathub_plugin_sdk::HookTable;

use helpers::{TestHost, WAIT, recv, test_config};

/// Loads a plugin that fetches the author's profile image whenever a post
/// is stored and reports the outcome.
async fn load_avatar_fetcher(
    host: &TestHost,
    permissions: &[ApiPermission],
) -> mpsc::UnboundedReceiver<AppResult<Vec<u8>>> {
    let (tx, rx) = mpsc::unbounded_channel();
    host.load("avatars", permissions, move || {
        let tx = tx.clone();
        HookTable::new().message_has_been_posted(move |api, _ctx, post| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(api.get_profile_image(post.user_id).await);
                Ok(())
            }
        })
    })
    .await
    .unwrap();
    rx
}

async fn post_as(host: &TestHost, user_id: UserId) {
    let post = Post::new(ChannelId::new(), user_id, "hello");
    let result = host
        .manager
        .message_has_been_posted(&HookContext::new().with_user(user_id), &post)
        .await;
    assert_eq!(result.delivered, vec!["avatars".to_string()]);
    assert!(result.failures.is_empty());
}

#[tokio::test]
async fn test_profile_image_of_existing_user() {
    let host = TestHost::new();
    let mut images = load_avatar_fetcher(&host, &[ApiPermission::ReadProfileImages]).await;

    let user = host.add_user("alice");
    host.users
        .set_profile_image(user.id, b"\x89PNG\r\n\x1a\n".to_vec());
    post_as(&host, user.id).await;

    let image = recv(&mut images).await.unwrap();
    assert_eq!(image, b"\x89PNG\r\n\x1a\n".to_vec());

    host.manager.unload_all().await.unwrap();
}

#[tokio::test]
async fn test_profile_image_falls_back_to_generated_avatar() {
    let host = TestHost::new();
    let mut images = load_avatar_fetcher(&host, &[ApiPermission::ReadProfileImages]).await;

    let user = host.add_user("bob");
    post_as(&host, user.id).await;

    let image = recv(&mut images).await.unwrap();
    assert!(!image.is_empty());
    assert!(String::from_utf8(image).unwrap().contains("<svg"));

    host.manager.unload_all().await.unwrap();
}

#[tokio::test]
async fn test_profile_image_of_unknown_user_is_not_found() {
    let host = TestHost::new();
    let mut images = load_avatar_fetcher(&host, &[ApiPermission::ReadProfileImages]).await;

    post_as(&host, UserId::new()).await;

    let err = recv(&mut images).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
    assert_eq!(err.location, "api.get_profile_image");

    host.manager.unload_all().await.unwrap();
}

#[tokio::test]
async fn test_call_without_permission_is_refused() {
    let host = TestHost::new();
    let mut images = load_avatar_fetcher(&host, &[ApiPermission::WriteLogs]).await;

    let user = host.add_user("carol");
    post_as(&host, user.id).await;

    let err = recv(&mut images).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Authorization);

    host.manager.unload_all().await.unwrap();
}

#[tokio::test]
async fn test_hook_calling_back_into_server_completes() {
    let host = TestHost::new();
    host.load("greeter", &[ApiPermission::ReadUsers, ApiPermission::WriteLogs], || {
        HookTable::new().message_will_be_posted(|api, _ctx, mut post| async move {
            let author = api.get_user(post.user_id).await?;
            api.log(LogLevel::Info, format!("{} is posting", author.username))
                .await?;
            post.message = format!("{}: {}", author.username, post.message);
            Ok(ContentHookReply::modified(post))
        })
    })
    .await
    .unwrap();

    let user = host.add_user("dave");
    let post = Post::new(ChannelId::new(), user.id, "hi all");
    let result = tokio::time::timeout(
        WAIT,
        host.manager.message_will_be_posted(&HookContext::new(), post),
    )
    .await
    .expect("reentrant hook call deadlocked");

    assert!(!result.is_rejected());
    assert!(result.failures.is_empty());
    assert_eq!(result.post.message, "dave: hi all");

    host.manager.unload_all().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_reentrant_hooks() {
    let host = TestHost::new();
    host.load("slow-greeter", &[ApiPermission::ReadUsers], || {
        HookTable::new().message_will_be_posted(|api, _ctx, mut post| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let author = api.get_user(post.user_id).await?;
            post.message = format!("[{}] {}", author.username, post.message);
            Ok(ContentHookReply::modified(post))
        })
    })
    .await
    .unwrap();

    let users: Vec<_> = (0..8).map(|i| host.add_user(&format!("user{i}"))).collect();
    let ctx = HookContext::new();
    let calls = users.iter().map(|user| {
        host.manager
            .message_will_be_posted(&ctx, Post::new(ChannelId::new(), user.id, "ping"))
    });
    let results = tokio::time::timeout(WAIT, futures::future::join_all(calls))
        .await
        .expect("concurrent hook calls did not finish");

    for (user, result) in users.iter().zip(results) {
        assert_eq!(result.post.message, format!("[{}] ping", user.username));
    }

    host.manager.unload_all().await.unwrap();
}

#[tokio::test]
async fn test_plugin_reads_its_own_configuration_on_activate() {
    let host = TestHost::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    host.load_with_settings(
        "configured",
        &[ApiPermission::ReadConfiguration],
        json!({ "greeting": "hej" }),
        move || {
            let tx = tx.clone();
            HookTable::new().on_activate(move |api| {
                let tx = tx.clone();
                async move {
                    let blob = api.load_configuration_blob().await?;
                    let _ = tx.send(blob);
                    Ok(())
                }
            })
        },
    )
    .await
    .unwrap();

    let blob = recv(&mut rx).await;
    assert_eq!(blob.revision, 1);
    assert_eq!(blob.config, json!({ "greeting": "hej" }));

    host.manager.unload_all().await.unwrap();
}

#[tokio::test]
async fn test_data_retention_without_enterprise_is_not_implemented() {
    let host = TestHost::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    host.load("retention", &[ApiPermission::ReadDataRetention], move || {
        let tx = tx.clone();
        HookTable::new().on_activate(move |api| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(api.get_data_retention_policy().await);
                Ok(())
            }
        })
    })
    .await
    .unwrap();

    let err = recv(&mut rx).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotImplemented);

    host.manager.unload_all().await.unwrap();
}

#[tokio::test]
async fn test_plugin_receives_configured_call_timeout() {
    let mut config = test_config();
    config.rpc.call_timeout_ms = 1_234;
    let host = TestHost::with_config(config);
    host.load("timed", &[], HookTable::new).await.unwrap();

    let spec = host.launcher.last_spec("timed").unwrap();
    assert_eq!(spec.call_timeout, Duration::from_millis(1_234));

    host.manager.unload_all().await.unwrap();
}
