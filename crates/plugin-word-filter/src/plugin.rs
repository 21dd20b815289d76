//! Hook wiring for the word filter.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use chathub_core::{AppError, AppResult};
use chathub_entity::Post;
use chathub_plugin_sdk::HookTable;
use chathub_plugin_sdk::prelude::{ConfigurationChangeArgs, ContentHookReply};

use crate::filter::{FilterConfig, Verdict, WordFilter};

/// Id the plugin ships under.
pub const PLUGIN_ID: &str = "com.chathub.word-filter";

/// The word filter plugin. Cloning shares the active filter.
#[derive(Debug, Clone, Default)]
pub struct WordFilterPlugin {
    filter: Arc<RwLock<WordFilter>>,
}

impl WordFilterPlugin {
    /// Creates the plugin with an empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the active configuration.
    pub async fn apply(&self, config: &FilterConfig) {
        *self.filter.write().await = WordFilter::new(config);
        info!(
            blocked = config.blocked_words.len(),
            replacements = config.replacements.len(),
            "Word filter configuration applied"
        );
    }

    /// Runs a post through the filter.
    pub async fn review(&self, mut post: Post) -> ContentHookReply {
        match self.filter.read().await.check(&post.message) {
            Verdict::Allow => ContentHookReply::allow(),
            Verdict::Rewrite(message) => {
                post.message = message;
                ContentHookReply::modified(post)
            }
            Verdict::Block(reason) => ContentHookReply::reject(reason),
        }
    }

    /// The hooks this plugin implements.
    pub fn hooks(&self) -> HookTable {
        let on_activate = self.clone();
        let on_change = self.clone();
        let on_post = self.clone();
        let on_update = self.clone();

        HookTable::new()
            .on_activate(move |api| {
                let plugin = on_activate.clone();
                async move {
                    let config: FilterConfig = api.load_configuration().await?;
                    plugin.apply(&config).await;
                    Ok(())
                }
            })
            .on_configuration_change(move |_api, args: ConfigurationChangeArgs| {
                let plugin = on_change.clone();
                async move {
                    let config = parse_config(args.config)?;
                    plugin.apply(&config).await;
                    Ok(())
                }
            })
            .message_will_be_posted(move |_api, _ctx, post| {
                let plugin = on_post.clone();
                async move { Ok(plugin.review(post).await) }
            })
            .message_will_be_updated(move |_api, _ctx, new_post, _old_post| {
                let plugin = on_update.clone();
                async move { Ok(plugin.review(new_post).await) }
            })
    }
}

fn parse_config(blob: serde_json::Value) -> AppResult<FilterConfig> {
    serde_json::from_value(blob).map_err(|e| {
        AppError::validation(format!("Invalid word filter configuration: {e}"))
            .at("word_filter.configuration")
    })
}
