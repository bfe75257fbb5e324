//! Concrete backends and the default registry set.

pub mod categorization;
pub mod date_proxy;
pub mod delegate;
pub mod http;
pub mod local;
pub mod pseudomanifest;
pub mod static_;

use std::sync::Arc;

use crate::base::BackendRegistry;

/// Backend types that take a `reference-container` parameter and need
/// their inner backend resolved before construction.
pub const REFERENCE_HOLDING_TYPES: [&str; 3] =
    [delegate::TYPE, date_proxy::TYPE, categorization::TYPE];

pub fn register_defaults(registry: &mut BackendRegistry) {
    registry.register(local::TYPE, |init| {
        Ok(Arc::new(local::LocalBackend::new(init)?))
    });
    registry.register(static_::TYPE, |init| {
        Ok(Arc::new(static_::StaticBackend::new(init)?))
    });
    registry.register(delegate::TYPE, |init| {
        Ok(Arc::new(delegate::DelegateBackend::new(init)?))
    });
    registry.register(date_proxy::TYPE, |init| {
        Ok(Arc::new(date_proxy::DateProxyBackend::new(init)?))
    });
    registry.register(categorization::TYPE, |init| {
        Ok(Arc::new(categorization::CategorizationBackend::new(init)?))
    });
    registry.register(http::TYPE, |init| {
        Ok(Arc::new(http::HttpBackend::new(init)?))
    });
    registry.register(pseudomanifest::TYPE, |init| {
        Ok(Arc::new(pseudomanifest::PseudomanifestBackend::new(init)?))
    });
}

/// Does this storage type need a resolved reference container?
pub fn needs_reference(storage_type: &str) -> bool {
    REFERENCE_HOLDING_TYPES.contains(&storage_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::{BackendInit, BackendRegistry};
    use serde_yaml::Mapping;

    #[test]
    fn test_registry_dispatch() {
        let registry = BackendRegistry::with_defaults();
        assert!(registry.is_type_supported("local"));
        assert!(registry.is_type_supported("date-proxy"));
        assert!(!registry.is_type_supported("teleport"));

        let mut params = Mapping::new();
        params.insert("type".into(), "static".into());
        let backend = registry.construct(BackendInit::new(params)).unwrap();
        assert_eq!(backend.backend_type(), "static");
    }

    #[test]
    fn test_reference_holding_types() {
        assert!(needs_reference("delegate"));
        assert!(needs_reference("categorization"));
        assert!(!needs_reference("local"));
    }
}
