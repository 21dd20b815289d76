//! The closed set of server API methods a plugin may call, their wire
//! argument/reply shapes and the permission each one requires.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use chathub_core::AppError;
use chathub_core::types::UserId;

/// Prefix of every server API method name on the wire.
pub const API_METHOD_PREFIX: &str = "API.";

/// A permission a plugin manifest may grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiPermission {
    /// Read user records.
    ReadUsers,
    /// Read user profile images.
    ReadProfileImages,
    /// Read the plugin's own configuration blob.
    ReadConfiguration,
    /// Write into the server log.
    WriteLogs,
    /// Read the data retention policy.
    ReadDataRetention,
}

impl ApiPermission {
    /// Every permission.
    pub const ALL: [ApiPermission; 5] = [
        Self::ReadUsers,
        Self::ReadProfileImages,
        Self::ReadConfiguration,
        Self::WriteLogs,
        Self::ReadDataRetention,
    ];

    /// Returns the manifest spelling of this permission.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadUsers => "read_users",
            Self::ReadProfileImages => "read_profile_images",
            Self::ReadConfiguration => "read_configuration",
            Self::WriteLogs => "write_logs",
            Self::ReadDataRetention => "read_data_retention",
        }
    }
}

impl fmt::Display for ApiPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiPermission {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| AppError::validation(format!("Unknown API permission: '{s}'")))
    }
}

/// A server API method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiMethod {
    /// Fetch a user's profile image.
    GetProfileImage,
    /// Fetch a user record.
    GetUser,
    /// Load the calling plugin's configuration blob.
    LoadPluginConfiguration,
    /// Write a line into the server log.
    LogMessage,
    /// Read the active data retention policy.
    GetDataRetentionPolicy,
}

impl ApiMethod {
    /// Every method, in registration order.
    pub const ALL: [ApiMethod; 5] = [
        Self::GetProfileImage,
        Self::GetUser,
        Self::LoadPluginConfiguration,
        Self::LogMessage,
        Self::GetDataRetentionPolicy,
    ];

    /// Wire method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetProfileImage => "API.GetProfileImage",
            Self::GetUser => "API.GetUser",
            Self::LoadPluginConfiguration => "API.LoadPluginConfiguration",
            Self::LogMessage => "API.LogMessage",
            Self::GetDataRetentionPolicy => "API.GetDataRetentionPolicy",
        }
    }

    /// Location tag attached to errors produced by this method.
    pub fn location(&self) -> &'static str {
        match self {
            Self::GetProfileImage => "api.get_profile_image",
            Self::GetUser => "api.get_user",
            Self::LoadPluginConfiguration => "api.load_plugin_configuration",
            Self::LogMessage => "api.log_message",
            Self::GetDataRetentionPolicy => "api.get_data_retention_policy",
        }
    }

    /// Permission a plugin needs to call this method.
    pub fn required_permission(&self) -> ApiPermission {
        match self {
            Self::GetProfileImage => ApiPermission::ReadProfileImages,
            Self::GetUser => ApiPermission::ReadUsers,
            Self::LoadPluginConfiguration => ApiPermission::ReadConfiguration,
            Self::LogMessage => ApiPermission::WriteLogs,
            Self::GetDataRetentionPolicy => ApiPermission::ReadDataRetention,
        }
    }

    /// Parses a wire method name.
    pub fn from_method(method: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == method)
    }
}

impl fmt::Display for ApiMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arguments of `API.GetProfileImage` and `API.GetUser`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserLookupArgs {
    /// User to look up.
    pub user_id: UserId,
}

/// Reply of `API.GetProfileImage`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileImageReply {
    /// Raw image bytes, base64-encoded on the wire.
    #[serde(with = "base64_bytes")]
    pub image: Vec<u8>,
}

/// Reply of `API.LoadPluginConfiguration`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginConfigurationReply {
    /// Revision of the blob; 0 if the plugin was never configured.
    pub revision: u64,
    /// The configuration blob.
    pub config: Value,
}

/// Severity of a plugin log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Diagnostic detail, emitted at the server's `debug` level.
    Debug,
    /// Routine plugin activity, emitted at `info`.
    Info,
    /// Something unexpected that the plugin recovered from, emitted at `warn`.
    Warn,
    /// A failure the operator should look at, emitted at `error`.
    Error,
}

/// Arguments of `API.LogMessage`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMessageArgs {
    /// Level the line is logged at on the server.
    pub level: LogLevel,
    /// Message text.
    pub message: String,
    /// Extra key/value context.
    #[serde(default)]
    pub fields: serde_json::Map<String, Value>,
}

/// Serde adapter for byte buffers carried as standard base64 strings.
pub mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    use super::*;

    /// Serializes bytes as base64.
    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    /// Deserializes base64 into bytes.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_method_is_namespaced_and_parses_back() {
        for method in ApiMethod::ALL {
            assert!(method.as_str().starts_with(API_METHOD_PREFIX));
            assert_eq!(ApiMethod::from_method(method.as_str()), Some(method));
        }
        assert_eq!(ApiMethod::from_method("API.DeleteEverything"), None);
    }

    #[test]
    fn test_permission_spelling() {
        let json = serde_json::to_value(ApiPermission::ReadProfileImages).unwrap();
        assert_eq!(json, "read_profile_images");
        assert_eq!(
            "write_logs".parse::<ApiPermission>().unwrap(),
            ApiPermission::WriteLogs
        );
        assert!("root".parse::<ApiPermission>().is_err());
    }

    #[test]
    fn test_profile_image_bytes_are_base64_on_the_wire() {
        let reply = ProfileImageReply {
            image: vec![0x89, b'P', b'N', b'G'],
        };
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["image"], "iVBORw==");
        let back: ProfileImageReply = serde_json::from_value(json).unwrap();
        assert_eq!(back, reply);
    }

    #[test]
    fn test_log_fields_default_to_empty() {
        let args: LogMessageArgs =
            serde_json::from_str(r#"{"level":"warn","message":"disk almost full"}"#).unwrap();
        assert_eq!(args.level, LogLevel::Warn);
        assert!(args.fields.is_empty());
    }
}
