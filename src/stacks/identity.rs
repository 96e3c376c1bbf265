//! Identity stack: the externally managed user pool, imported by id.

use crate::core::graph::*;
use crate::core::types::IdentitySpec;

pub const USER_POOL_LOGICAL_ID: &str = "UserPool";

/// Composed identity stack.
#[derive(Debug, Clone)]
pub struct IdentityStack {
    pub template: StackTemplate,
    /// User pool (name attribute resolves to the pool id)
    pub user_pool: ResourceRef,
}

pub fn compose(stack_id: &str, spec: &IdentitySpec) -> IdentityStack {
    let mut template = StackTemplate::new(stack_id, StackKind::Identity);
    let mut node = ResourceNode::new(USER_POOL_LOGICAL_ID, ResourceKind::UserPool)
        .prop("UserPoolId", spec.user_pool_id.as_str());
    if let Some(ref client) = spec.client_id {
        node = node.prop("ClientId", client.as_str());
    }
    let user_pool = template.add(node, Attribute::Name);
    template.outputs.insert(
        "UserPoolId".to_string(),
        Output {
            value: PropValue::Ref(user_pool.clone()),
            export_name: None,
        },
    );
    IdentityStack {
        template,
        user_pool,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_imports_pool() {
        let spec = IdentitySpec {
            user_pool_id: "eu-west-1_abc".to_string(),
            client_id: Some("client".to_string()),
        };
        let s = compose("IdentityStack", &spec);
        let pool = &s.template.resources[USER_POOL_LOGICAL_ID];
        assert!(pool.kind.is_external());
        assert_eq!(pool.str_prop("UserPoolId"), Some("eu-west-1_abc"));
        assert_eq!(pool.str_prop("ClientId"), Some("client"));
        assert_eq!(s.user_pool.stack, "IdentityStack");
    }
}
