//! Stack ids, logical ids, and physical identifiers.
//!
//! Physical names are deterministic: a fixed name when the declaration gives
//! one, otherwise `{stack}-{logical}-{SUFFIX}` where the suffix is the first
//! 12 hex digits of BLAKE3 over the stack and logical id. ARNs are derived
//! from the target account and region.

use super::graph::{ResourceKind, ResourceNode};
use super::types::Target;

/// Maximum physical name length accepted by the provider for most kinds.
const MAX_NAME_LEN: usize = 64;

/// `fridge_mgr` → `FridgeMgr`.
pub fn pascal_case(id: &str) -> String {
    id.split(['_', '-', ' '])
        .filter(|p| !p.is_empty())
        .map(|p| {
            let mut chars = p.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

pub fn storage_stack_id(prefix: &str) -> String {
    format!("{}StorageStack", prefix)
}

pub fn identity_stack_id(prefix: &str) -> String {
    format!("{}IdentityStack", prefix)
}

/// Stack id for a function (compute or scheduled).
pub fn function_stack_id(prefix: &str, function_id: &str) -> String {
    format!("{}{}LambdaStack", prefix, pascal_case(function_id))
}

pub fn gateway_stack_id(prefix: &str) -> String {
    format!("{}EcsStack", prefix)
}

/// Logical id of a function resource.
pub fn function_logical_id(prefix: &str, function_id: &str) -> String {
    format!("{}{}Lambda", prefix, pascal_case(function_id))
}

/// Logical id of a table resource.
pub fn table_logical_id(table_id: &str) -> String {
    format!("{}Table", pascal_case(table_id))
}

/// Resolved identifiers of a deployed resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalIds {
    pub name: String,
    pub arn: String,
}

/// Generated physical name for a resource without a fixed one.
pub fn generated_name(stack: &str, logical_id: &str) -> String {
    let digest = blake3::hash(format!("{}/{}", stack, logical_id).as_bytes()).to_hex();
    let suffix = digest.as_str()[..12].to_uppercase();
    let budget = MAX_NAME_LEN - suffix.len() - 2;
    let mut base = format!("{}-{}", stack, logical_id);
    if base.len() > budget {
        base.truncate(budget);
    }
    format!("{}-{}", base, suffix)
}

/// Property holding a fixed physical name for a kind, if any.
fn name_property(kind: ResourceKind) -> Option<&'static str> {
    match kind {
        ResourceKind::Table => Some("TableName"),
        ResourceKind::Bucket => Some("BucketName"),
        ResourceKind::UserPool => Some("UserPoolId"),
        ResourceKind::Function => Some("FunctionName"),
        ResourceKind::Repository => Some("RepositoryName"),
        _ => None,
    }
}

/// Resolve the physical name and ARN of a resource.
pub fn physical_ids(stack: &str, node: &ResourceNode, target: &Target) -> PhysicalIds {
    let name = name_property(node.kind)
        .and_then(|p| node.str_prop(p))
        .map(str::to_string)
        .unwrap_or_else(|| generated_name(stack, &node.logical_id));

    let region = &target.region;
    let account = &target.account;
    let arn = match node.kind {
        ResourceKind::Bucket => node
            .str_prop("Arn")
            .map(str::to_string)
            .unwrap_or_else(|| format!("arn:aws:s3:::{}", name)),
        ResourceKind::Table => format!("arn:aws:dynamodb:{}:{}:table/{}", region, account, name),
        ResourceKind::Function => {
            format!("arn:aws:lambda:{}:{}:function:{}", region, account, name)
        }
        ResourceKind::UserPool => format!(
            "arn:aws:cognito-idp:{}:{}:userpool/{}",
            region, account, name
        ),
        ResourceKind::Role => format!("arn:aws:iam::{}:role/{}", account, name),
        ResourceKind::Policy => format!("arn:aws:iam::{}:policy/{}", account, name),
        ResourceKind::Rule => format!("arn:aws:events:{}:{}:rule/{}", region, account, name),
        ResourceKind::Repository => {
            format!("arn:aws:ecr:{}:{}:repository/{}", region, account, name)
        }
        other => format!(
            "arn:aws:{}:{}:{}:{}/{}",
            other.arn_service(),
            region,
            account,
            other,
            name
        ),
    };

    PhysicalIds { name, arn }
}
