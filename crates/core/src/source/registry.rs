use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use super::flickr::FlickrHandler;
use super::mapillary::MapillaryHandler;
use super::traits::SourceHandler;
use super::types::{SourceError, SourceKind};
use crate::config::SourcesConfig;

/// Source handlers keyed by provider.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    handlers: HashMap<SourceKind, Arc<dyn SourceHandler>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from configuration. Providers without a section are skipped.
    pub fn from_config(config: &SourcesConfig) -> Result<Self, SourceError> {
        let mut registry = Self::new();
        if let Some(mapillary) = &config.mapillary {
            info!("Registering Mapillary source handler");
            registry.register(Arc::new(MapillaryHandler::new(mapillary.clone())?));
        }
        if let Some(flickr) = &config.flickr {
            info!("Registering Flickr source handler");
            registry.register(Arc::new(FlickrHandler::new(flickr.clone())?));
        }
        Ok(registry)
    }

    pub fn register(&mut self, handler: Arc<dyn SourceHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    pub fn with_handler(mut self, handler: Arc<dyn SourceHandler>) -> Self {
        self.register(handler);
        self
    }

    pub fn get(&self, kind: SourceKind) -> Result<Arc<dyn SourceHandler>, SourceError> {
        self.handlers
            .get(&kind)
            .cloned()
            .ok_or(SourceError::NotConfigured(kind))
    }

    pub fn kinds(&self) -> Vec<SourceKind> {
        self.handlers.keys().copied().collect()
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockSourceHandler;

    #[test]
    fn test_get_unregistered_kind() {
        let registry = SourceRegistry::new();
        assert!(matches!(
            registry.get(SourceKind::Mapillary),
            Err(SourceError::NotConfigured(SourceKind::Mapillary))
        ));
    }

    #[test]
    fn test_register_and_get() {
        let registry = SourceRegistry::new().with_handler(Arc::new(MockSourceHandler::new()));
        let handler = registry.get(SourceKind::Mapillary).unwrap();
        assert_eq!(handler.kind(), SourceKind::Mapillary);
        assert_eq!(registry.kinds(), vec![SourceKind::Mapillary]);
    }

    #[test]
    fn test_from_empty_config() {
        let registry = SourceRegistry::from_config(&SourcesConfig::default()).unwrap();
        assert!(registry.kinds().is_empty());
    }

    #[test]
    fn test_from_config_registers_both_providers() {
        let config = SourcesConfig {
            mapillary: Some(crate::source::MapillaryConfig::default()),
            flickr: Some(crate::source::FlickrConfig::default()),
        };
        let registry = SourceRegistry::from_config(&config).unwrap();

        let mut kinds = registry.kinds();
        kinds.sort_by_key(|k| k.as_str());
        assert_eq!(kinds, vec![SourceKind::Flickr, SourceKind::Mapillary]);
        assert_eq!(registry.get(SourceKind::Flickr).unwrap().kind(), SourceKind::Flickr);
    }
}
