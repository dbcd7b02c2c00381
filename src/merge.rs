//! Configuration merger.
//!
//! Turns one registry snapshot into a fresh `FlatConfig`. The merge is pure:
//! it reads the snapshot and the rules, and builds a new map every call.
//!
//! Order of application:
//! 1. service mappings, in declared order (an unregistered service is skipped)
//! 2. key-tree mappings, in declared order
//! 3. key-item mappings, in declared order (an absent key is omitted)
//!
//! Later writes overwrite earlier ones on a case-insensitive key collision.

use crate::error::MergeError;
use crate::flat::FlatConfig;
use crate::registry::RegistrySnapshot;
use crate::rules::{KeyItemMapping, KeyTreeMapping, ServiceMapping};

/// Merges `snapshot` through the three rule collections.
///
/// # Errors
/// Returns the first bind failure. Nothing partial is returned.
pub fn merge(
    snapshot: &RegistrySnapshot,
    services: &[ServiceMapping],
    trees: &[KeyTreeMapping],
    items: &[KeyItemMapping],
) -> Result<FlatConfig, MergeError> {
    let mut out = FlatConfig::new();

    for rule in services {
        let Some(registration) = snapshot.service(rule.service_name()) else {
            continue;
        };
        out.extend(rule.bind(registration)?);
    }

    for rule in trees {
        for (relative, value) in snapshot.kv().prefix(rule.key_prefix()) {
            // Folder placeholders carry no value of their own.
            if relative.is_empty() || relative.ends_with('/') {
                continue;
            }
            out.insert(rule.config_key(relative), value);
        }
    }

    for rule in items {
        if let Some(value) = snapshot.kv().get(rule.key()) {
            out.insert(rule.config_key(), value);
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ServiceInstance, ServiceRegistration};
    use crate::rules::MappingRules;

    fn api_snapshot() -> RegistrySnapshot {
        RegistrySnapshot::new()
            .with_service(
                ServiceRegistration::new("api").with_instance(ServiceInstance::new("api-1", "10.0.0.1", 8080)),
            )
            .with_key("feature/x", "on")
            .with_key("feature/y", "off")
    }

    #[test]
    fn test_empty_rules_yield_empty_config() {
        let cfg = MappingRules::new().merge(&api_snapshot()).unwrap();
        assert!(cfg.is_empty());
    }

    #[test]
    fn test_service_and_tree_scenario() {
        let rules = MappingRules::new()
            .service(ServiceMapping::endpoint("api", "Api:Endpoint"))
            .tree(KeyTreeMapping::nested("feature/", "Feature"));

        let cfg = rules.merge(&api_snapshot()).unwrap();

        let expected: FlatConfig = [
            ("Api:Endpoint", "10.0.0.1:8080"),
            ("Feature:x", "on"),
            ("Feature:y", "off"),
        ]
        .into_iter()
        .collect();
        assert_eq!(cfg, expected);
    }

    #[test]
    fn test_item_overwrites_service_on_collision() {
        let snapshot = api_snapshot().with_key("override/endpoint", "127.0.0.1:9000");
        let rules = MappingRules::new()
            .service(ServiceMapping::endpoint("api", "Api:Endpoint"))
            .item(KeyItemMapping::new("override/endpoint", "api:endpoint"));

        let cfg = rules.merge(&snapshot).unwrap();
        assert_eq!(cfg.len(), 1);
        assert_eq!(cfg.get("Api:Endpoint"), Some("127.0.0.1:9000"));
    }

    #[test]
    fn test_later_rule_in_collection_wins() {
        let snapshot = RegistrySnapshot::new().with_key("a", "first").with_key("b", "second");
        let rules = MappingRules::new()
            .item(KeyItemMapping::new("a", "Key"))
            .item(KeyItemMapping::new("b", "KEY"));
        let cfg = rules.merge(&snapshot).unwrap();
        assert_eq!(cfg.get("key"), Some("second"));
    }

    #[test]
    fn test_tree_overwrites_service() {
        let snapshot = api_snapshot().with_key("cfg/Api/Endpoint", "from-kv");
        let rules = MappingRules::new()
            .service(ServiceMapping::endpoint("api", "Api:Endpoint"))
            .tree(KeyTreeMapping::nested("cfg/", ""));
        let cfg = rules.merge(&snapshot).unwrap();
        assert_eq!(cfg.get("api:endpoint"), Some("from-kv"));
    }

    #[test]
    fn test_missing_service_is_skipped() {
        let rules = MappingRules::new().service(ServiceMapping::endpoint("billing", "Billing:Endpoint"));
        let cfg = rules.merge(&api_snapshot()).unwrap();
        assert!(cfg.is_empty());
    }

    #[test]
    fn test_missing_item_key_is_omitted() {
        let rules = MappingRules::new().item(KeyItemMapping::new("absent", "Absent"));
        let cfg = rules.merge(&api_snapshot()).unwrap();
        assert!(!cfg.contains_key("Absent"));
    }

    #[test]
    fn test_folder_placeholders_are_skipped() {
        let snapshot = RegistrySnapshot::new()
            .with_key("feature/", "")
            .with_key("feature/group/", "")
            .with_key("feature/group/z", "1");
        let rules = MappingRules::new().tree(KeyTreeMapping::nested("feature/", "Feature"));
        let cfg = rules.merge(&snapshot).unwrap();
        assert_eq!(cfg.len(), 1);
        assert_eq!(cfg.get("Feature:group:z"), Some("1"));
    }

    #[test]
    fn test_bind_error_propagates() {
        let rules = MappingRules::new().service(ServiceMapping::new("api", |reg| {
            Err(MergeError::bind(reg.name.clone(), "unsupported"))
        }));
        let err = rules.merge(&api_snapshot()).unwrap_err();
        assert!(matches!(err, MergeError::Bind { .. }));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let rules = MappingRules::new()
            .service(ServiceMapping::endpoint("api", "Api:Endpoint"))
            .tree(KeyTreeMapping::nested("feature/", "Feature"));
        let snapshot = api_snapshot();
        let first = rules.merge(&snapshot).unwrap();
        let second = rules.merge(&snapshot).unwrap();
        assert_eq!(first, second);
        assert_eq!(second.len(), 3);
    }
}
