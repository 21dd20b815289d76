//! Typed client for the server API, available inside hook handlers.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use chathub_core::einterfaces::DataRetentionPolicy;
use chathub_core::types::UserId;
use chathub_core::{AppError, AppResult};
use chathub_entity::User;
use chathub_plugin::api::{
    ApiMethod, LogLevel, LogMessageArgs, PluginConfigurationReply, ProfileImageReply,
    UserLookupArgs,
};
use chathub_plugin::rpc::RpcPeer;

/// Handle for calling back into the server.
///
/// Calls travel on the same channel the current hook arrived on, so they
/// are attributed to this plugin and are safe to make while the server is
/// waiting on the hook.
#[derive(Debug, Clone)]
pub struct ServerApi {
    peer: Arc<RpcPeer>,
    timeout: Duration,
}

impl ServerApi {
    /// Wraps the channel to the server.
    pub fn new(peer: Arc<RpcPeer>, timeout: Duration) -> Self {
        Self { peer, timeout }
    }

    /// Same client with a different per-call timeout.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            peer: Arc::clone(&self.peer),
            timeout,
        }
    }

    async fn call<A, R>(&self, method: ApiMethod, args: &A) -> AppResult<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.peer
            .call_typed(method.as_str(), args, self.timeout)
            .await
            .map_err(AppError::from)
    }

    /// Fetches a user's profile image. Unknown users fail with `NOT_FOUND`.
    pub async fn get_profile_image(&self, user_id: UserId) -> AppResult<Vec<u8>> {
        let reply: ProfileImageReply = self
            .call(ApiMethod::GetProfileImage, &UserLookupArgs { user_id })
            .await?;
        Ok(reply.image)
    }

    /// Fetches a user record. Unknown users fail with `NOT_FOUND`.
    pub async fn get_user(&self, user_id: UserId) -> AppResult<User> {
        self.call(ApiMethod::GetUser, &UserLookupArgs { user_id })
            .await
    }

    /// Fetches this plugin's raw configuration blob and its revision.
    pub async fn load_configuration_blob(&self) -> AppResult<PluginConfigurationReply> {
        self.call(ApiMethod::LoadPluginConfiguration, &Value::Null)
            .await
    }

    /// Fetches this plugin's configuration into its typed form.
    pub async fn load_configuration<T: DeserializeOwned>(&self) -> AppResult<T> {
        let blob = self.load_configuration_blob().await?;
        serde_json::from_value(blob.config).map_err(|e| {
            AppError::validation(format!("Plugin configuration does not match its schema: {e}"))
                .at("sdk.load_configuration")
        })
    }

    /// Writes a line into the server log.
    pub async fn log(&self, level: LogLevel, message: impl Into<String>) -> AppResult<()> {
        let args = LogMessageArgs {
            level,
            message: message.into(),
            fields: Default::default(),
        };
        let _: Value = self.call(ApiMethod::LogMessage, &args).await?;
        Ok(())
    }

    /// Reads the active data retention policy.
    pub async fn get_data_retention_policy(&self) -> AppResult<DataRetentionPolicy> {
        self.call(ApiMethod::GetDataRetentionPolicy, &Value::Null)
            .await
    }
}
