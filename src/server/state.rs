//! Shared state handed to every route.

use std::sync::Arc;

use crate::client::BrokerHttp;
use crate::config::ServerConfig;
use crate::error::Result;
use crate::instruments::SymbolResolver;
use crate::orders::{InstrumentSpecs, OrderOrchestrator};
use crate::risk::{RiskMonitor, RiskSettings};
use crate::session::SessionStore;

/// Handles to the long-lived services; cheap to clone.
#[derive(Debug, Clone)]
pub struct AppState {
    pub sessions: Arc<SessionStore>,
    pub orchestrator: Arc<OrderOrchestrator>,
    pub resolver: Arc<SymbolResolver>,
    pub risk: Arc<RiskMonitor>,
}

impl AppState {
    /// Live adapters for every broker, configured from `config`.
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let http = BrokerHttp::with_settings(config.http_timeout, config.retry)?;
        let sessions = Arc::new(SessionStore::new());
        let orchestrator = OrderOrchestrator::live(http.clone(), Arc::clone(&sessions), InstrumentSpecs::default());
        orchestrator.set_paper_trading(config.paper_trading);
        let resolver = SymbolResolver::new(
            config.symbols_dir.clone(),
            config.symbol_cache_ttl,
            http,
            Arc::clone(&sessions),
        );
        Ok(Self::from_parts(sessions, Arc::new(orchestrator), Arc::new(resolver)))
    }

    /// Assemble from prebuilt services; the risk monitor starts with default
    /// settings.
    pub fn from_parts(
        sessions: Arc<SessionStore>,
        orchestrator: Arc<OrderOrchestrator>,
        resolver: Arc<SymbolResolver>,
    ) -> Self {
        let risk = Arc::new(RiskMonitor::new(Arc::clone(&orchestrator), RiskSettings::default()));
        Self {
            sessions,
            orchestrator,
            resolver,
            risk,
        }
    }
}
