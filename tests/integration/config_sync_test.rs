//! Configuration changes reaching plugins in order.

mod helpers;

use std::time::Duration;

use futures::future::join_all;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use chathub_core::types::{ChannelId, UserId};
use chathub_core::{AppError, ErrorKind};
use chathub_entity::Post;
use chathub_plugin::api::ApiPermission;
use chathub_plugin::hooks::{ConfigurationChangeArgs, HookContext};
use chathub_plugin_sdk::HookTable;
use plugin_word_filter::{PLUGIN_ID, WordFilterPlugin};

use helpers::{TestHost, recv};

/// A plugin reporting every configuration change. Deliveries of even
/// revisions are slowed down so a reordering would show.
fn config_recorder(seen: mpsc::UnboundedSender<ConfigurationChangeArgs>) -> HookTable {
    HookTable::new()
        .on_configuration_change(move |_api, args: ConfigurationChangeArgs| {
            let seen = seen.clone();
            async move {
                if args.revision % 2 == 0 {
                    tokio::time::sleep(Duration::from_millis(15)).await;
                }
                let _ = seen.send(args);
                Ok(())
            }
        })
        .message_has_been_posted(|_api, _ctx, _post| async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(())
        })
}

#[tokio::test]
async fn test_changes_arrive_in_order_under_concurrent_traffic() {
    let host = TestHost::new();
    let (tx, mut seen) = mpsc::unbounded_channel();
    host.load("ordered", &[], move || config_recorder(tx.clone()))
        .await
        .unwrap();

    let traffic = (0..10).map(|i| {
        let post = Post::new(ChannelId::new(), UserId::new(), format!("noise {i}"));
        let host = &host;
        async move {
            host.manager
                .message_has_been_posted(&HookContext::new(), &post)
                .await
        }
    });
    let noise = join_all(traffic);

    let changes = [json!({ "n": 1 }), json!({ "n": 2 }), json!({ "n": 3 })];
    let mut deliveries = Vec::new();
    for change in &changes {
        deliveries.push(
            host.manager
                .update_configuration("ordered", change.clone())
                .await
                .unwrap(),
        );
    }

    let (noise, outcomes) = tokio::join!(
        noise,
        join_all(deliveries.into_iter().map(|d| d.delivered()))
    );
    assert!(noise.iter().all(|r| r.failures.is_empty()));
    assert!(outcomes.iter().all(Result::is_ok));

    let mut received = Vec::new();
    for _ in 0..changes.len() {
        received.push(recv(&mut seen).await);
    }
    let configs: Vec<Value> = received.iter().map(|a| a.config.clone()).collect();
    assert_eq!(configs, changes.to_vec());

    let revisions: Vec<u64> = received.iter().map(|a| a.revision).collect();
    assert_eq!(revisions, vec![2, 3, 4]);

    host.manager.unload_all().await.unwrap();
}

#[tokio::test]
async fn test_store_holds_latest_revision() {
    let host = TestHost::new();
    let (tx, mut seen) = mpsc::unbounded_channel();
    host.load_with_settings("stored", &[], json!({ "v": 0 }), move || {
        config_recorder(tx.clone())
    })
    .await
    .unwrap();

    let first = host
        .manager
        .update_configuration("stored", json!({ "v": 1 }))
        .await
        .unwrap();
    let second = host
        .manager
        .update_configuration("stored", json!({ "v": 2 }))
        .await
        .unwrap();
    assert!(second.revision > first.revision);
    second.delivered().await.unwrap();

    let stored = host.manager.config_store().get("stored").unwrap();
    assert_eq!(stored.revision, 3);
    assert_eq!(stored.config, json!({ "v": 2 }));

    recv(&mut seen).await;
    recv(&mut seen).await;
    host.manager.unload_all().await.unwrap();
}

#[tokio::test]
async fn test_rejected_change_is_reported_to_caller() {
    let host = TestHost::new();
    host.load("picky", &[], || {
        HookTable::new().on_configuration_change(|_api, args: ConfigurationChangeArgs| async move {
            if args.config.get("port").and_then(Value::as_u64).is_none() {
                return Err(AppError::validation("port is required").at("picky.config"));
            }
            Ok(())
        })
    })
    .await
    .unwrap();

    let bad = host
        .manager
        .update_configuration("picky", json!({}))
        .await
        .unwrap();
    let err = bad.delivered().await.unwrap_err();
    assert_eq!(err.as_app_error().map(|e| e.kind), Some(ErrorKind::Validation));

    let good = host
        .manager
        .update_configuration("picky", json!({ "port": 8080 }))
        .await
        .unwrap();
    good.delivered().await.unwrap();

    host.manager.unload_all().await.unwrap();
}

#[tokio::test]
async fn test_update_for_unknown_plugin_is_not_found() {
    let host = TestHost::new();
    let err = host
        .manager
        .update_configuration("ghost", json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn test_word_filter_follows_configuration_changes() {
    let host = TestHost::new();
    host.load(PLUGIN_ID, &[ApiPermission::ReadConfiguration], || {
        WordFilterPlugin::new().hooks()
    })
    .await
    .unwrap();

    let ctx = HookContext::new();
    let post = || Post::new(ChannelId::new(), UserId::new(), "free crypto here");
    assert!(!host.manager.message_will_be_posted(&ctx, post()).await.is_rejected());

    host.manager
        .update_configuration(PLUGIN_ID, json!({ "blocked_words": ["crypto"] }))
        .await
        .unwrap()
        .delivered()
        .await
        .unwrap();
    assert!(host.manager.message_will_be_posted(&ctx, post()).await.is_rejected());

    host.manager
        .update_configuration(PLUGIN_ID, json!({}))
        .await
        .unwrap()
        .delivered()
        .await
        .unwrap();
    assert!(!host.manager.message_will_be_posted(&ctx, post()).await.is_rejected());

    host.manager.unload_all().await.unwrap();
}
