//! Plugin crashes, restarts and failed loads.

mod helpers;

use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;

use chathub_core::types::{ChannelId, UserId};
use chathub_core::{AppError, ErrorKind};
use chathub_entity::Post;
use chathub_plugin::hooks::{ContentHookReply, HookContext, HookName, MessageHasBeenPostedArgs};
use chathub_plugin::rpc::RpcError;
use chathub_plugin::supervisor::PluginState;
use chathub_plugin_sdk::HookTable;

use helpers::{TestHost, WAIT, recv, test_config};

/// A plugin whose `MessageHasBeenPosted` never finishes for posts saying
/// "hang", and reports when it got one.
fn hanging_plugin(entered: mpsc::UnboundedSender<()>) -> HookTable {
    HookTable::new()
        .message_has_been_posted(move |_api, _ctx, post| {
            let entered = entered.clone();
            async move {
                if post.message == "hang" {
                    let _ = entered.send(());
                    std::future::pending::<()>().await;
                }
                Ok(())
            }
        })
        .message_will_be_posted(|_api, _ctx, _post| async { Ok(ContentHookReply::allow()) })
}

fn posted_args(message: &str) -> Value {
    serde_json::to_value(MessageHasBeenPostedArgs {
        context: HookContext::new(),
        post: Post::new(ChannelId::new(), UserId::new(), message),
    })
    .unwrap()
}

async fn wait_for_generation(host: &TestHost, plugin_id: &str, generation: u64) {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let status = host.manager.plugin_status(plugin_id).await.unwrap();
        if status.state == PluginState::Running && status.generation >= generation {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "plugin never reached generation {generation}: {status:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_crash_mid_call_is_a_transport_error_and_plugin_restarts() {
    let host = TestHost::new();
    let (tx, mut entered) = mpsc::unbounded_channel();
    host.load("crashy", &[], move || hanging_plugin(tx.clone()))
        .await
        .unwrap();

    let first = host.manager.plugin_status("crashy").await.unwrap();
    assert_eq!(first.generation, 1);
    assert_eq!(first.state, PluginState::Running);

    let dispatcher = host.manager.dispatcher().clone();
    let call = tokio::spawn(async move {
        dispatcher
            .invoke("crashy", HookName::MessageHasBeenPosted, posted_args("hang"))
            .await
    });

    recv(&mut entered).await;
    host.launcher.crash("crashy");

    let err = tokio::time::timeout(WAIT, call)
        .await
        .expect("pending call never resolved")
        .unwrap()
        .unwrap_err();
    assert!(
        matches!(err, RpcError::TransportClosed | RpcError::Transport(_)),
        "unexpected error: {err:?}"
    );

    wait_for_generation(&host, "crashy", 2).await;
    assert_eq!(host.launcher.launches("crashy"), 2);

    let answer = host
        .manager
        .dispatcher()
        .invoke("crashy", HookName::MessageHasBeenPosted, posted_args("fine"))
        .await
        .unwrap();
    assert_eq!(answer, Some(Value::Null));

    let status = host.manager.plugin_status("crashy").await.unwrap();
    assert_eq!(status.generation, 2);
    assert_eq!(status.restarts, 1);
    assert!(status.last_failure.is_some());

    host.manager.unload_all().await.unwrap();
}

#[tokio::test]
async fn test_crash_loop_backs_off_then_marks_plugin_failed() {
    let mut config = test_config();
    config.supervisor.max_restart_attempts = 3;
    config.supervisor.initial_backoff_ms = 40;
    config.supervisor.max_backoff_ms = 400;
    let host = TestHost::with_config(config);
    host.load("loopy", &[], || {
        HookTable::new().message_will_be_posted(|_api, _ctx, _post| async {
            Ok(ContentHookReply::allow())
        })
    })
    .await
    .unwrap();

    let began = std::time::Instant::now();
    for generation in 2..=4 {
        host.launcher.crash("loopy");
        wait_for_generation(&host, "loopy", generation).await;
    }
    // 40 + 80 + 160 ms of backoff before the three restarts.
    assert!(began.elapsed() >= Duration::from_millis(280));

    host.launcher.crash("loopy");
    let deadline = tokio::time::Instant::now() + WAIT;
    let status = loop {
        let status = host.manager.plugin_status("loopy").await.unwrap();
        if status.state == PluginState::Failed {
            break status;
        }
        assert!(tokio::time::Instant::now() < deadline, "plugin never failed: {status:?}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    };

    assert_eq!(status.restarts, 3);
    assert_eq!(status.crash_streak, 4);
    assert_eq!(host.launcher.launches("loopy"), 4);
    assert!(status.last_failure.is_some());

    // Still listed for operators, but no longer subscribed to hooks.
    assert_eq!(host.manager.list_plugins().await.len(), 1);
    let result = host
        .manager
        .message_will_be_posted(
            &HookContext::new(),
            Post::new(ChannelId::new(), UserId::new(), "after the loop"),
        )
        .await;
    assert!(result.invoked.is_empty());

    host.manager.unload_all().await.unwrap();
}

#[tokio::test]
async fn test_crash_of_one_plugin_leaves_others_serving() {
    let host = TestHost::new();
    let (tx, mut entered) = mpsc::unbounded_channel();
    host.load("crashy", &[], move || hanging_plugin(tx.clone()))
        .await
        .unwrap();
    host.load("steady", &[], || {
        HookTable::new().message_will_be_posted(|_api, _ctx, mut post| async move {
            post.message.push('!');
            Ok(ContentHookReply::modified(post))
        })
    })
    .await
    .unwrap();

    let dispatcher = host.manager.dispatcher().clone();
    let hung = tokio::spawn(async move {
        dispatcher
            .invoke("crashy", HookName::MessageHasBeenPosted, posted_args("hang"))
            .await
    });
    recv(&mut entered).await;
    host.launcher.crash("crashy");

    let result = host
        .manager
        .message_will_be_posted(
            &HookContext::new(),
            Post::new(ChannelId::new(), UserId::new(), "still here"),
        )
        .await;
    assert!(!result.is_rejected());
    assert_eq!(result.post.message, "still here!");

    assert!(hung.await.unwrap().is_err());
    wait_for_generation(&host, "crashy", 2).await;

    host.manager.unload_all().await.unwrap();
}

#[tokio::test]
async fn test_failed_activation_unloads_the_plugin() {
    let mut config = test_config();
    config.supervisor.max_restart_attempts = 2;
    let host = TestHost::with_config(config);

    let err = host
        .load("refuses", &[], || {
            HookTable::new().on_activate(|_api| async {
                Err(AppError::configuration("missing API key"))
            })
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Plugin);
    assert_eq!(err.cause.map(|c| c.kind), Some(ErrorKind::Configuration));
    assert!(host.manager.list_plugins().await.is_empty());
    assert!(host.manager.plugin_status("refuses").await.is_err());
    // A refusal is the plugin's answer, not a crash; it is not retried.
    assert_eq!(host.launcher.launches("refuses"), 1);
}

#[tokio::test]
async fn test_unload_runs_deactivate_and_stops_process() {
    let host = TestHost::new();
    let (tx, mut deactivated) = mpsc::unbounded_channel();
    host.load("polite", &[], move || {
        let tx = tx.clone();
        HookTable::new().on_deactivate(move |_api| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(());
                Ok(())
            }
        })
    })
    .await
    .unwrap();

    host.manager.unload_plugin("polite").await.unwrap();
    recv(&mut deactivated).await;

    assert!(host.manager.list_plugins().await.is_empty());
    let err = host
        .manager
        .dispatcher()
        .invoke("polite", HookName::OnDeactivate, Value::Null)
        .await;
    assert!(matches!(err, Ok(None)));
    assert_eq!(host.launcher.launches("polite"), 1);
}

#[tokio::test]
async fn test_loading_same_plugin_twice_conflicts() {
    let host = TestHost::new();
    host.load("once", &[], HookTable::new).await.unwrap();

    let err = host.load("once", &[], HookTable::new).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Conflict);
    assert_eq!(host.manager.list_plugins().await.len(), 1);

    host.manager.unload_all().await.unwrap();
}
