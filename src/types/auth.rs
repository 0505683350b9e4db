#![allow(missing_docs)]
//! Session credentials and login request types.

use serde::{Deserialize, Serialize};

/// A broker session, as produced by login or `setCredentials`.
///
/// Field names follow what the websocket bridge reads back from
/// `websocketData`, so the serialized form uses `usersession` / `userid`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(
        rename = "usersession",
        alias = "accessToken",
        alias = "token",
        alias = "jKey",
        default
    )]
    pub session_token: String,
    #[serde(
        rename = "userid",
        alias = "userId",
        alias = "clientId",
        alias = "uid",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    #[serde(
        rename = "baseUrl",
        alias = "baseurl",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub base_url: Option<String>,
    #[serde(
        rename = "consumerKey",
        alias = "consumerkey",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub consumer_key: Option<String>,
    #[serde(
        rename = "serverId",
        alias = "serverid",
        alias = "hsServerId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub server_id: Option<String>,
}

impl Credentials {
    pub fn new(session_token: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            session_token: session_token.into(),
            client_id: Some(client_id.into()),
            ..Self::default()
        }
    }

    pub fn has_session(&self) -> bool {
        is_present(&self.session_token)
    }

    pub fn client_id(&self) -> &str {
        self.client_id.as_deref().unwrap_or_default()
    }

    /// Drop blank and `"null"` / `"undefined"` placeholders the browser sends.
    pub fn normalized(mut self) -> Self {
        fn clean(v: Option<String>) -> Option<String> {
            v.filter(|s| is_present(s))
        }
        if !is_present(&self.session_token) {
            self.session_token.clear();
        }
        self.client_id = clean(self.client_id);
        self.sid = clean(self.sid);
        self.base_url = clean(self.base_url);
        self.consumer_key = clean(self.consumer_key);
        self.server_id = clean(self.server_id);
        self
    }

    /// First few characters of the session token, for logs.
    pub fn masked_token(&self) -> String {
        mask(&self.session_token)
    }
}

/// Whether a credential value is usable.
pub fn is_present(value: &str) -> bool {
    let v = value.trim();
    !v.is_empty() && v != "null" && v != "undefined"
}

/// Keep the first 5 characters of a secret.
pub fn mask(secret: &str) -> String {
    let head: String = secret.chars().take(5).collect();
    format!("{head}***")
}

// ---------------------------------------------------------------------------
// Token generation
// ---------------------------------------------------------------------------

/// Flattrade: exchange the OAuth `request_code` for a session token.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlattradeTokenRequest {
    #[serde(alias = "api_key")]
    pub api_key: String,
    #[serde(alias = "request_code", alias = "code")]
    pub request_code: String,
    #[serde(alias = "api_secret", alias = "secretKey")]
    pub api_secret: String,
    #[serde(default, alias = "userId")]
    pub client_id: Option<String>,
}

/// Shoonya: QuickAuth login.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShoonyaLoginRequest {
    #[serde(alias = "uid")]
    pub user_id: String,
    pub password: String,
    #[serde(alias = "factor2")]
    pub totp: String,
    #[serde(alias = "vc")]
    pub vendor_code: String,
    #[serde(alias = "api_key")]
    pub api_key: String,
    #[serde(default = "default_imei")]
    pub imei: String,
}

fn default_imei() -> String {
    "abc1234".to_owned()
}

/// Kotak Neo: two-step TOTP + MPIN login.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KotakLoginRequest {
    #[serde(alias = "accessToken")]
    pub consumer_key: String,
    /// Unique client code.
    #[serde(alias = "ucc")]
    pub user_id: String,
    pub mobile_number: String,
    pub mpin: String,
    pub totp: String,
}

impl KotakLoginRequest {
    /// Mobile number in `+91...` form.
    pub fn international_mobile(&self) -> String {
        let m = self.mobile_number.trim();
        if m.starts_with('+') {
            m.to_owned()
        } else {
            format!("+{m}")
        }
    }
}
