use plugin_word_filter::WordFilterPlugin;

use chathub_plugin_sdk::prelude::*;

#[tokio::main]
async fn main() -> Result<(), SdkError> {
    init_logging("info");
    let env = PluginEnvironment::from_env()?;

    let plugin = WordFilterPlugin::new();
    tracing::info!(plugin_id = %env.plugin_id, "Word filter starting");

    let options = env.runtime_options();
    PluginRuntime::new(env.plugin_id, plugin.hooks())
        .with_options(options)
        .serve_stdio()
        .await
}
