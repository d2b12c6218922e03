// src/core/protocol/connect.rs

//! The options a client negotiates with `CONNECT <json>`.

use serde::{Deserialize, Serialize};

/// Subject allow/deny lists carried by route and leaf-node clients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectPermissions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deny: Option<Vec<String>>,
}

/// The JSON object sent by a client in its CONNECT command.
///
/// Credentials are stored but not enforced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectOptions {
    pub echo: bool,
    pub verbose: bool,
    pub pedantic: bool,
    pub tls_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nkey: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(rename = "pass", default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub name: String,
    pub lang: String,
    pub version: String,
    pub protocol: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_account: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_responders: Option<bool>,
    #[serde(rename = "import", default, skip_serializing_if = "Option::is_none")]
    pub import_permissions: Option<SubjectPermissions>,
    #[serde(rename = "export", default, skip_serializing_if = "Option::is_none")]
    pub export_permissions: Option<SubjectPermissions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_account: Option<String>,
}

impl ConnectOptions {
    /// Deserializes the argument of a CONNECT command.
    pub fn from_json(arg: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(arg)
    }
}
