//! Server-side handlers for plugin-to-server API calls.
//!
//! Every inbound call is:
//! - attributed to the plugin whose channel it arrived on (the handler
//!   table is built per plugin, so a caller cannot claim another identity);
//! - checked against that plugin's granted permissions;
//! - forwarded to the backing service;
//! - answered with a value or an [`AppError`] carrying a stable kind and
//!   the method's location tag.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use chathub_core::einterfaces::{DataRetentionPolicy, Enterprise};
use chathub_core::types::UserId;
use chathub_core::{AppError, AppResult};
use chathub_entity::User;

use super::methods::{
    ApiMethod, ApiPermission, LogLevel, LogMessageArgs, PluginConfigurationReply,
    ProfileImageReply, UserLookupArgs,
};
use super::services::UserService;
use crate::config_sync::PluginConfigStore;
use crate::rpc::{CallContext, HandlerTable, RpcHandler};

/// Permissions granted to one plugin.
#[derive(Debug, Clone)]
pub struct PluginGrant {
    /// The plugin the grant belongs to.
    pub plugin_id: String,
    permissions: HashSet<ApiPermission>,
}

impl PluginGrant {
    /// Creates a grant.
    pub fn new(plugin_id: impl Into<String>, permissions: &[ApiPermission]) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            permissions: permissions.iter().copied().collect(),
        }
    }

    /// Whether the permission is granted.
    pub fn allows(&self, permission: ApiPermission) -> bool {
        self.permissions.contains(&permission)
    }

    /// Fails with an authorization error if `method` is not granted.
    pub fn check(&self, method: ApiMethod) -> AppResult<()> {
        let required = method.required_permission();
        if self.allows(required) {
            return Ok(());
        }
        Err(AppError::authorization(format!(
            "Plugin '{}' lacks permission '{}' required by {}",
            self.plugin_id, required, method
        ))
        .at(method.location()))
    }
}

/// Backing services for the plugin API.
pub struct ApiBridge {
    users: Arc<dyn UserService>,
    configs: Arc<PluginConfigStore>,
    enterprise: Enterprise,
}

impl ApiBridge {
    /// Creates a bridge over the given services.
    pub fn new(
        users: Arc<dyn UserService>,
        configs: Arc<PluginConfigStore>,
        enterprise: Enterprise,
    ) -> Self {
        Self {
            users,
            configs,
            enterprise,
        }
    }

    /// Builds the inbound handler table for one plugin's channel.
    pub fn handler_table(self: &Arc<Self>, grant: PluginGrant) -> Arc<HandlerTable> {
        let grant = Arc::new(grant);
        let table = HandlerTable::new();
        for method in ApiMethod::ALL {
            table.register(
                method.as_str(),
                Arc::new(ApiHandler {
                    bridge: Arc::clone(self),
                    grant: Arc::clone(&grant),
                    method,
                }),
            );
        }
        Arc::new(table)
    }

    /// Fetches a user's profile image.
    pub async fn get_profile_image(&self, user_id: UserId) -> AppResult<Vec<u8>> {
        match self.users.get_profile_image(user_id).await? {
            Some(image) => Ok(image),
            None => Err(AppError::not_found(format!("User '{user_id}' not found"))
                .at(ApiMethod::GetProfileImage.location())),
        }
    }

    /// Fetches a user record.
    pub async fn get_user(&self, user_id: UserId) -> AppResult<User> {
        self.users.get_user(user_id).await?.ok_or_else(|| {
            AppError::not_found(format!("User '{user_id}' not found"))
                .at(ApiMethod::GetUser.location())
        })
    }

    /// The plugin's configuration blob; an empty object if never set.
    pub fn load_plugin_configuration(&self, plugin_id: &str) -> PluginConfigurationReply {
        match self.configs.get(plugin_id) {
            Some(stored) => PluginConfigurationReply {
                revision: stored.revision,
                config: stored.config,
            },
            None => PluginConfigurationReply {
                revision: 0,
                config: Value::Object(Default::default()),
            },
        }
    }

    /// Re-emits a plugin log line into the server log.
    pub fn log_message(&self, plugin_id: &str, args: &LogMessageArgs) {
        let fields = Value::Object(args.fields.clone());
        match args.level {
            LogLevel::Debug => debug!(plugin_id = %plugin_id, fields = %fields, "{}", args.message),
            LogLevel::Info => info!(plugin_id = %plugin_id, fields = %fields, "{}", args.message),
            LogLevel::Warn => warn!(plugin_id = %plugin_id, fields = %fields, "{}", args.message),
            LogLevel::Error => error!(plugin_id = %plugin_id, fields = %fields, "{}", args.message),
        }
    }

    /// The active data retention policy.
    pub async fn get_data_retention_policy(&self) -> AppResult<DataRetentionPolicy> {
        let location = ApiMethod::GetDataRetentionPolicy.location();
        let Some(retention) = &self.enterprise.data_retention else {
            return Err(
                AppError::not_implemented("Data retention is not available").at(location)
            );
        };
        retention.get_policy().await
    }

    async fn dispatch(&self, grant: &PluginGrant, method: ApiMethod, args: Value) -> AppResult<Value> {
        grant.check(method)?;
        match method {
            ApiMethod::GetProfileImage => {
                let args: UserLookupArgs = decode(method, args)?;
                let image = self.get_profile_image(args.user_id).await?;
                encode(method, ProfileImageReply { image })
            }
            ApiMethod::GetUser => {
                let args: UserLookupArgs = decode(method, args)?;
                encode(method, self.get_user(args.user_id).await?)
            }
            ApiMethod::LoadPluginConfiguration => {
                encode(method, self.load_plugin_configuration(&grant.plugin_id))
            }
            ApiMethod::LogMessage => {
                let args: LogMessageArgs = decode(method, args)?;
                self.log_message(&grant.plugin_id, &args);
                Ok(Value::Null)
            }
            ApiMethod::GetDataRetentionPolicy => {
                encode(method, self.get_data_retention_policy().await?)
            }
        }
    }
}

impl std::fmt::Debug for ApiBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiBridge")
            .field("enterprise", &self.enterprise)
            .finish()
    }
}

fn decode<T: DeserializeOwned>(method: ApiMethod, args: Value) -> AppResult<T> {
    serde_json::from_value(args).map_err(|e| {
        AppError::validation(format!("Invalid arguments for {method}: {e}")).at(method.location())
    })
}

fn encode<T: Serialize>(method: ApiMethod, value: T) -> AppResult<Value> {
    serde_json::to_value(value).map_err(|e| AppError::from(e).at(method.location()))
}

/// Handler for one API method on one plugin's channel.
struct ApiHandler {
    bridge: Arc<ApiBridge>,
    grant: Arc<PluginGrant>,
    method: ApiMethod,
}

#[async_trait]
impl RpcHandler for ApiHandler {
    async fn handle(&self, ctx: CallContext, args: Value) -> Result<Value, AppError> {
        debug!(
            plugin_id = %self.grant.plugin_id,
            channel = %ctx.channel_label(),
            method = %self.method,
            "API call"
        );
        self.bridge
            .dispatch(&self.grant, self.method, args)
            .await
            .map_err(|err| {
                if err.location.is_empty() {
                    err.at(self.method.location())
                } else {
                    err
                }
            })
    }
}
