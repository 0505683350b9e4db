//! Per-broker session storage.
//!
//! The server keeps one [`Credentials`] set per broker, written by login /
//! `setCredentials` and read by every adapter call. The websocket bridge reads
//! the same sets back through `websocketData`.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::constants::KOTAK_DEFAULT_BASE_URL;
use crate::error::{Result, SteadfastError};
use crate::types::Broker;
use crate::types::auth::Credentials;

/// What [`SessionStore::sync_kotak`] did with a request's credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The stored session was replaced or completed.
    Adopted,
    /// The request carried a different token without a consumer key while
    /// the stored session has one; the stored session was kept.
    Ignored,
    /// Nothing to do.
    Unchanged,
}

#[derive(Debug, Default)]
struct Inner {
    credentials: HashMap<Broker, Credentials>,
    selected: Option<Broker>,
}

/// Thread-safe credential store shared by the server and the risk monitor.
#[derive(Debug, Default)]
pub struct SessionStore {
    inner: RwLock<Inner>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, broker: Broker) -> Option<Credentials> {
        self.inner.read().await.credentials.get(&broker).cloned()
    }

    /// Stored credentials with a usable session token.
    pub async fn require(&self, broker: Broker) -> Result<Credentials> {
        match self.get(broker).await {
            Some(c) if c.has_session() => Ok(c),
            _ => Err(SteadfastError::MissingCredentials(broker)),
        }
    }

    /// Overwrite a broker's credentials.
    ///
    /// Kotak Neo keeps the stored consumer key and server id when the new set
    /// lacks them, and defaults the base URL.
    pub async fn set(&self, broker: Broker, credentials: Credentials) {
        let mut creds = credentials.normalized();
        let mut inner = self.inner.write().await;
        if broker == Broker::KotakNeo {
            let stored = inner.credentials.get(&broker);
            if creds.consumer_key.is_none() {
                creds.consumer_key = stored.and_then(|s| s.consumer_key.clone());
            }
            if creds.server_id.is_none() {
                creds.server_id = stored.and_then(|s| s.server_id.clone());
            }
            if creds.base_url.is_none() {
                creds.base_url = Some(KOTAK_DEFAULT_BASE_URL.to_owned());
            }
        }
        tracing::info!(%broker, token = %creds.masked_token(), "credentials updated");
        inner.credentials.insert(broker, creds);
    }

    /// Adopt Kotak Neo credentials carried by an ordinary request.
    ///
    /// The request's token is taken when it differs from the stored one or
    /// when it brings a consumer key the store lacks. A request that changes
    /// the token but has no consumer key never replaces a stored session that
    /// has one; such requests come from stale browser state.
    pub async fn sync_kotak(&self, request: Credentials) -> SyncOutcome {
        let request = request.normalized();
        if !request.has_session() {
            return SyncOutcome::Unchanged;
        }

        let mut inner = self.inner.write().await;
        let stored = inner
            .credentials
            .get(&Broker::KotakNeo)
            .cloned()
            .unwrap_or_default();

        let is_new_token = stored.session_token != request.session_token;
        let fills_missing_key = stored.consumer_key.is_none() && request.consumer_key.is_some();

        if is_new_token && stored.consumer_key.is_some() && request.consumer_key.is_none() {
            tracing::warn!(
                stored = %stored.masked_token(),
                incoming = %request.masked_token(),
                "ignoring Kotak Neo credentials without consumer key"
            );
            return SyncOutcome::Ignored;
        }
        if !is_new_token && !fills_missing_key {
            return SyncOutcome::Unchanged;
        }

        let merged = Credentials {
            session_token: request.session_token,
            client_id: request.client_id.or(stored.client_id),
            sid: request.sid.or(stored.sid),
            base_url: request
                .base_url
                .or(stored.base_url)
                .or_else(|| Some(KOTAK_DEFAULT_BASE_URL.to_owned())),
            consumer_key: request.consumer_key.or(stored.consumer_key),
            server_id: request.server_id.or(stored.server_id),
        };
        tracing::info!(
            token_changed = is_new_token,
            key_recovered = fills_missing_key,
            has_consumer_key = merged.consumer_key.is_some(),
            "synced Kotak Neo credentials from request"
        );
        inner.credentials.insert(Broker::KotakNeo, merged);
        SyncOutcome::Adopted
    }

    /// Live brokers that currently have a session.
    pub async fn active_brokers(&self) -> Vec<(Broker, Credentials)> {
        let inner = self.inner.read().await;
        Broker::LIVE
            .iter()
            .filter_map(|b| {
                inner
                    .credentials
                    .get(b)
                    .filter(|c| c.has_session())
                    .map(|c| (*b, c.clone()))
            })
            .collect()
    }

    pub async fn select(&self, broker: Broker) {
        self.inner.write().await.selected = Some(broker);
    }

    pub async fn selected(&self) -> Option<Broker> {
        self.inner.read().await.selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kotak(token: &str, key: Option<&str>) -> Credentials {
        Credentials {
            session_token: token.into(),
            sid: Some("sid-1".into()),
            consumer_key: key.map(str::to_owned),
            ..Credentials::default()
        }
    }

    #[tokio::test]
    async fn stale_request_without_key_is_ignored() {
        let store = SessionStore::new();
        store.set(Broker::KotakNeo, kotak("fresh", Some("ck"))).await;

        let outcome = store.sync_kotak(kotak("stale", None)).await;
        assert_eq!(outcome, SyncOutcome::Ignored);
        let stored = store.get(Broker::KotakNeo).await.unwrap();
        assert_eq!(stored.session_token, "fresh");
        assert_eq!(stored.consumer_key.as_deref(), Some("ck"));
    }

    #[tokio::test]
    async fn new_token_with_key_is_adopted() {
        let store = SessionStore::new();
        store.set(Broker::KotakNeo, kotak("old", Some("ck"))).await;

        let outcome = store.sync_kotak(kotak("new", Some("ck2"))).await;
        assert_eq!(outcome, SyncOutcome::Adopted);
        let stored = store.get(Broker::KotakNeo).await.unwrap();
        assert_eq!(stored.session_token, "new");
        assert_eq!(stored.consumer_key.as_deref(), Some("ck2"));
    }

    #[tokio::test]
    async fn missing_key_is_recovered_and_repeat_is_noop() {
        let store = SessionStore::new();
        store.set(Broker::KotakNeo, kotak("tok", None)).await;

        assert_eq!(store.sync_kotak(kotak("tok", Some("ck"))).await, SyncOutcome::Adopted);
        assert_eq!(store.sync_kotak(kotak("tok", Some("ck"))).await, SyncOutcome::Unchanged);
        assert_eq!(store.sync_kotak(kotak("", Some("ck"))).await, SyncOutcome::Unchanged);
    }

    #[tokio::test]
    async fn set_keeps_kotak_consumer_key() {
        let store = SessionStore::new();
        let mut first = kotak("a", Some("ck"));
        first.server_id = Some("srv".into());
        store.set(Broker::KotakNeo, first).await;
        store.set(Broker::KotakNeo, kotak("b", Some("undefined"))).await;

        let stored = store.get(Broker::KotakNeo).await.unwrap();
        assert_eq!(stored.session_token, "b");
        assert_eq!(stored.consumer_key.as_deref(), Some("ck"));
        assert_eq!(stored.server_id.as_deref(), Some("srv"));
        assert_eq!(stored.base_url.as_deref(), Some(KOTAK_DEFAULT_BASE_URL));
    }

    #[tokio::test]
    async fn require_reports_missing_session() {
        let store = SessionStore::new();
        assert!(matches!(
            store.require(Broker::Shoonya).await,
            Err(SteadfastError::MissingCredentials(Broker::Shoonya))
        ));
        store.set(Broker::Shoonya, Credentials::new("tok", "FA01")).await;
        assert!(store.require(Broker::Shoonya).await.is_ok());
        assert_eq!(store.active_brokers().await.len(), 1);
    }
}
