//! Content hook chains and broadcast hooks across several plugins.

mod helpers;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;

use chathub_core::AppError;
use chathub_core::config::ContentErrorPolicy;
use chathub_core::types::{ChannelId, UserId};
use chathub_entity::Post;
use chathub_plugin::api::ApiPermission;
use chathub_plugin::hooks::{ContentHookReply, HookContext, HookName};
use chathub_plugin::rpc::RpcError;
use chathub_plugin_sdk::HookTable;
use plugin_word_filter::{PLUGIN_ID, WordFilterPlugin};

use helpers::{TestHost, test_config};

/// A content plugin that reports every message it sees, then replies.
fn recording<F>(seen: mpsc::UnboundedSender<(String, String)>, name: &'static str, reply: F) -> HookTable
where
    F: Fn(Post) -> Result<ContentHookReply, AppError> + Send + Sync + Clone + 'static,
{
    HookTable::new().message_will_be_posted(move |_api, _ctx, post| {
        let seen = seen.clone();
        let reply = reply.clone();
        async move {
            let _ = seen.send((name.to_string(), post.message.clone()));
            reply(post)
        }
    })
}

fn new_post(message: &str) -> Post {
    Post::new(ChannelId::new(), UserId::new(), message)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<(String, String)>) -> Vec<(String, String)> {
    let mut seen = Vec::new();
    while let Ok(entry) = rx.try_recv() {
        seen.push(entry);
    }
    seen
}

#[tokio::test]
async fn test_rejection_stops_the_chain() {
    let host = TestHost::new();
    let (tx, mut seen) = mpsc::unbounded_channel();

    let first = tx.clone();
    host.load("first", &[], move || {
        recording(first.clone(), "first", |mut post: Post| {
            post.message.push_str(" [first]");
            Ok(ContentHookReply::modified(post))
        })
    })
    .await
    .unwrap();

    let second = tx.clone();
    host.load("second", &[], move || {
        recording(second.clone(), "second", |_| Ok(ContentHookReply::reject("blocked")))
    })
    .await
    .unwrap();

    let third = tx.clone();
    host.load("third", &[], move || {
        recording(third.clone(), "third", |_| Ok(ContentHookReply::allow()))
    })
    .await
    .unwrap();

    let result = host
        .manager
        .message_will_be_posted(&HookContext::new(), new_post("hello"))
        .await;

    assert_eq!(result.rejection.as_deref(), Some("blocked"));
    assert_eq!(result.rejected_by.as_deref(), Some("second"));
    assert_eq!(result.invoked, vec!["first".to_string(), "second".to_string()]);
    assert_eq!(
        drain(&mut seen),
        vec![
            ("first".to_string(), "hello".to_string()),
            ("second".to_string(), "hello [first]".to_string()),
        ]
    );

    host.manager.unload_all().await.unwrap();
}

#[tokio::test]
async fn test_modifications_accumulate_in_load_order() {
    let host = TestHost::new();
    let (tx, _seen) = mpsc::unbounded_channel();

    for name in ["a", "b", "c"] {
        let tx = tx.clone();
        host.load(name, &[], move || {
            recording(tx.clone(), name, move |mut post: Post| {
                post.message.push_str(name);
                Ok(ContentHookReply::modified(post))
            })
        })
        .await
        .unwrap();
    }

    let result = host
        .manager
        .message_will_be_posted(&HookContext::new(), new_post(">"))
        .await;
    assert!(!result.is_rejected());
    assert_eq!(result.post.message, ">abc");

    host.manager.unload_all().await.unwrap();
}

#[tokio::test]
async fn test_failing_plugin_is_skipped_by_default() {
    let host = TestHost::new();
    let (tx, mut seen) = mpsc::unbounded_channel();

    let broken = tx.clone();
    host.load("broken", &[], move || {
        recording(broken.clone(), "broken", |_| Err(AppError::internal("boom")))
    })
    .await
    .unwrap();

    let after = tx.clone();
    host.load("after", &[], move || {
        recording(after.clone(), "after", |_| Ok(ContentHookReply::allow()))
    })
    .await
    .unwrap();

    let result = host
        .manager
        .message_will_be_posted(&HookContext::new(), new_post("text"))
        .await;

    assert!(!result.is_rejected());
    assert_eq!(result.post.message, "text");
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].plugin_id, "broken");
    assert!(!result.failures[0].error.is_liveness_failure());
    assert_eq!(drain(&mut seen).len(), 2);

    host.manager.unload_all().await.unwrap();
}

#[tokio::test]
async fn test_timed_out_plugin_is_skipped_and_chain_continues() {
    let mut config = test_config();
    config.hooks.content_timeout_ms = 50;
    let host = TestHost::with_config(config);
    let (tx, mut seen) = mpsc::unbounded_channel();

    host.load("stuck", &[], || {
        HookTable::new().message_will_be_posted(|_api, _ctx, mut post| async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            post.message = "too late".to_string();
            Ok(ContentHookReply::modified(post))
        })
    })
    .await
    .unwrap();

    let after = tx.clone();
    host.load("after", &[], move || {
        recording(after.clone(), "after", |_| Ok(ContentHookReply::allow()))
    })
    .await
    .unwrap();

    let result = host
        .manager
        .message_will_be_posted(&HookContext::new(), new_post("original"))
        .await;

    assert!(!result.is_rejected());
    assert_eq!(result.post.message, "original");
    assert_eq!(result.invoked, vec!["stuck".to_string(), "after".to_string()]);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].plugin_id, "stuck");
    assert!(matches!(result.failures[0].error, RpcError::Timeout { .. }));
    assert!(result.failures[0].error.is_liveness_failure());
    assert_eq!(
        drain(&mut seen),
        vec![("after".to_string(), "original".to_string())]
    );

    host.manager.unload_all().await.unwrap();
}

#[tokio::test]
async fn test_failing_plugin_rejects_under_reject_policy() {
    let mut config = test_config();
    config.hooks.content_error_policy = ContentErrorPolicy::Reject;
    let host = TestHost::with_config(config);
    let (tx, mut seen) = mpsc::unbounded_channel();

    let broken = tx.clone();
    host.load("broken", &[], move || {
        recording(broken.clone(), "broken", |_| Err(AppError::internal("boom")))
    })
    .await
    .unwrap();

    let after = tx.clone();
    host.load("after", &[], move || {
        recording(after.clone(), "after", |_| Ok(ContentHookReply::allow()))
    })
    .await
    .unwrap();

    let result = host
        .manager
        .message_will_be_posted(&HookContext::new(), new_post("text"))
        .await;

    assert!(result.is_rejected());
    assert_eq!(result.rejected_by.as_deref(), Some("broken"));
    assert!(result.rejection.unwrap().contains("boom"));
    assert_eq!(drain(&mut seen), vec![("broken".to_string(), "text".to_string())]);

    host.manager.unload_all().await.unwrap();
}

#[tokio::test]
async fn test_update_hook_sees_old_and_new_post() {
    let host = TestHost::new();
    host.load("edit-guard", &[], || {
        HookTable::new().message_will_be_updated(|_api, _ctx, new_post, old_post| async move {
            if new_post.message.len() < old_post.message.len() {
                return Ok(ContentHookReply::reject("Edits may not shorten a post"));
            }
            Ok(ContentHookReply::allow())
        })
    })
    .await
    .unwrap();

    let old = new_post("a long original message");
    let mut shorter = old.clone();
    shorter.message = "short".to_string();
    let mut longer = old.clone();
    longer.message = "a long original message, amended".to_string();

    let ctx = HookContext::new();
    let rejected = host.manager.message_will_be_updated(&ctx, shorter, &old).await;
    assert_eq!(rejected.rejection.as_deref(), Some("Edits may not shorten a post"));

    let accepted = host.manager.message_will_be_updated(&ctx, longer.clone(), &old).await;
    assert!(!accepted.is_rejected());
    assert_eq!(accepted.post, longer);

    host.manager.unload_all().await.unwrap();
}

#[tokio::test]
async fn test_notification_failure_does_not_stop_other_plugins() {
    let host = TestHost::new();
    let delivered = Arc::new(AtomicUsize::new(0));

    host.load("noisy", &[], || {
        HookTable::new().message_has_been_posted(|_api, _ctx, _post| async {
            Err(AppError::internal("cannot index post"))
        })
    })
    .await
    .unwrap();

    let counter = delivered.clone();
    host.load("counter", &[], move || {
        let counter = counter.clone();
        HookTable::new().message_has_been_posted(move |_api, _ctx, _post| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    })
    .await
    .unwrap();

    let result = host
        .manager
        .message_has_been_posted(&HookContext::new(), &new_post("stored"))
        .await;

    assert_eq!(result.delivered, vec!["counter".to_string()]);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].plugin_id, "noisy");
    assert_eq!(delivered.load(Ordering::SeqCst), 1);

    host.manager.unload_all().await.unwrap();
}

#[tokio::test]
async fn test_only_declared_hooks_are_subscribed() {
    let host = TestHost::new();
    host.load("narrow", &[], || {
        HookTable::new().message_has_been_posted(|_api, _ctx, _post| async { Ok(()) })
    })
    .await
    .unwrap();

    let registry = host.manager.hook_registry();
    assert!(registry.implements("narrow", HookName::MessageHasBeenPosted).await);
    assert!(!registry.implements("narrow", HookName::MessageWillBePosted).await);

    let result = host
        .manager
        .message_will_be_posted(&HookContext::new(), new_post("untouched"))
        .await;
    assert!(result.invoked.is_empty());

    host.manager.unload_all().await.unwrap();
    assert!(registry.subscribers(HookName::MessageHasBeenPosted).await.is_empty());
}

#[tokio::test]
async fn test_word_filter_plugin_end_to_end() {
    let host = TestHost::new();
    host.load_with_settings(
        PLUGIN_ID,
        &[ApiPermission::ReadConfiguration],
        json!({
            "blocked_words": ["spam"],
            "replacements": { "teh": "the" },
            "rejection_message": "No {word} please"
        }),
        || WordFilterPlugin::new().hooks(),
    )
    .await
    .unwrap();

    let ctx = HookContext::new();
    let blocked = host
        .manager
        .message_will_be_posted(&ctx, new_post("buy Spam today"))
        .await;
    assert_eq!(blocked.rejection.as_deref(), Some("No Spam please"));

    let fixed = host
        .manager
        .message_will_be_posted(&ctx, new_post("teh end"))
        .await;
    assert!(!fixed.is_rejected());
    assert_eq!(fixed.post.message, "the end");

    host.manager.unload_all().await.unwrap();
}
