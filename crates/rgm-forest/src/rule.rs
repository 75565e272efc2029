//! Resource rules: the schema each resource instance is validated against.

use std::collections::HashSet;

use rgm_error::RgmError;

/// A resource type's schema: which attributes it takes, which of them are
/// required, and which child types it may contain, in what order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// The type name resources reference (e.g. `"service"`, `"ip"`, `"fs"`).
    pub type_name: String,
    /// Attributes every instance of this type must carry.
    pub required_attrs: Vec<String>,
    /// Attributes an instance of this type may carry but need not.
    pub optional_attrs: Vec<String>,
    /// Child type names this rule accepts, in the order children of that
    /// type are placed among siblings.
    pub child_types_in_order: Vec<String>,
    /// Whether a resource of this type may head a tree (a resource group).
    pub is_root: bool,
}

impl Rule {
    /// Checks that `attrs` satisfies this rule's required attributes and
    /// contains no attribute outside required ∪ optional.
    pub fn validate_attrs(&self, attrs: &[(String, String)]) -> Result<(), RgmError> {
        let present: HashSet<&str> = attrs.iter().map(|(k, _)| k.as_str()).collect();

        for required in &self.required_attrs {
            if !present.contains(required.as_str()) {
                return Err(RgmError::Configuration(format!(
                    "resource of type '{}' is missing required attribute '{required}'",
                    self.type_name
                )));
            }
        }

        let known: HashSet<&str> = self
            .required_attrs
            .iter()
            .chain(self.optional_attrs.iter())
            .map(String::as_str)
            .collect();
        for (key, _) in attrs {
            if !known.contains(key.as_str()) {
                return Err(RgmError::Configuration(format!(
                    "resource of type '{}' has unknown attribute '{key}'",
                    self.type_name
                )));
            }
        }

        Ok(())
    }

    /// Position of `child_type` among this rule's declared child types, used
    /// to keep siblings in rule order rather than load order.
    #[must_use]
    pub fn child_order_index(&self, child_type: &str) -> Option<usize> {
        self.child_types_in_order.iter().position(|t| t == child_type)
    }

    /// Whether a child of `child_type` is permitted under this rule.
    #[must_use]
    pub fn accepts_child(&self, child_type: &str) -> bool {
        self.child_order_index(child_type).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn service_rule() -> Rule {
        Rule {
            type_name: "service".into(),
            required_attrs: vec!["name".into()],
            optional_attrs: vec!["domain".into(), "autostart".into()],
            child_types_in_order: vec!["ip".into(), "fs".into(), "script".into()],
            is_root: true,
        }
    }

    #[test]
    fn validate_attrs_requires_required() {
        let rule = service_rule();
        let err = rule.validate_attrs(&[]).unwrap_err();
        assert!(matches!(err, RgmError::Configuration(_)));
    }

    #[test]
    fn validate_attrs_rejects_unknown() {
        let rule = service_rule();
        let attrs = vec![("name".into(), "web".into()), ("bogus".into(), "x".into())];
        assert!(rule.validate_attrs(&attrs).is_err());
    }

    #[test]
    fn validate_attrs_accepts_required_and_optional() {
        let rule = service_rule();
        let attrs = vec![("name".into(), "web".into()), ("domain".into(), "prefer-node1".into())];
        assert!(rule.validate_attrs(&attrs).is_ok());
    }

    #[test]
    fn child_order_index_follows_declaration_order() {
        let rule = service_rule();
        assert_eq!(rule.child_order_index("ip"), Some(0));
        assert_eq!(rule.child_order_index("script"), Some(2));
        assert_eq!(rule.child_order_index("nfsexport"), None);
        assert!(!rule.accepts_child("nfsexport"));
    }

    #[rstest::rstest]
    #[case("ip", Some(0))]
    #[case("fs", Some(1))]
    #[case("script", Some(2))]
    #[case("nfsexport", None)]
    #[case("", None)]
    fn child_order_index_matches_declared_position(#[case] child_type: &str, #[case] expected: Option<usize>) {
        let rule = service_rule();
        assert_eq!(rule.child_order_index(child_type), expected);
        assert_eq!(rule.accepts_child(child_type), expected.is_some());
    }
}
