use std::sync::Arc;
use curator_core::{
    Authenticator, Config, GatewayContext, RetryCancelManager, SanitizedConfig, UpdateHub,
    UploadStore, UploadWorkers,
};

use crate::services::Services;

/// Shared application state
pub struct AppState {
    config: Config,
    authenticator: Arc<dyn Authenticator>,
    services: Services,
}

impl AppState {
    pub fn new(config: Config, authenticator: Arc<dyn Authenticator>, services: Services) -> Self {
        Self {
            config,
            authenticator,
            services,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn authenticator(&self) -> &dyn Authenticator {
        self.authenticator.as_ref()
    }

    pub fn store(&self) -> &Arc<dyn UploadStore> {
        &self.services.gateway.store
    }

    pub fn manager(&self) -> &Arc<RetryCancelManager> {
        &self.services.gateway.manager
    }

    /// Services handed to every WebSocket session.
    pub fn gateway(&self) -> &GatewayContext {
        &self.services.gateway
    }

    pub fn hub(&self) -> &UpdateHub {
        &self.services.hub
    }

    pub fn workers(&self) -> &Arc<UploadWorkers> {
        &self.services.workers
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use curator_core::testing::{MockPublishClient, MockSourceHandler};
    use curator_core::{
        config::AuthConfig, create_authenticator, load_config_from_str, SourceRegistry,
        SqliteUploadStore,
    };

    /// State backed by an in-memory store and mock clients.
    pub fn state_with_auth(auth: AuthConfig) -> Arc<AppState> {
        let mut config = load_config_from_str("[auth]\nmethod = \"none\"\n").unwrap();
        config.auth = auth;

        let authenticator: Arc<dyn Authenticator> =
            Arc::from(create_authenticator(&config.auth).unwrap());
        let services = Services::build(
            &config,
            Arc::new(SqliteUploadStore::in_memory().unwrap()),
            Arc::new(SourceRegistry::new().with_handler(Arc::new(MockSourceHandler::new()))),
            Arc::new(MockPublishClient::new()),
        )
        .unwrap();

        Arc::new(AppState::new(config, authenticator, services))
    }
}
