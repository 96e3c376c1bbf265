//! Storage stack: shared tables and the pre-existing code bucket.

use crate::core::graph::*;
use crate::core::naming;
use crate::core::types::{StorageSpec, TableSpec};
use indexmap::IndexMap;

/// Logical id of the referenced code bucket.
pub const BUCKET_LOGICAL_ID: &str = "CodeBucket";

/// Composed storage stack and the references it hands out.
#[derive(Debug, Clone)]
pub struct StorageStack {
    pub template: StackTemplate,
    /// Code bucket (name attribute)
    pub bucket: ResourceRef,
    /// Table id → table (name attribute)
    pub tables: IndexMap<String, ResourceRef>,
}

fn key_attribute(name: &str) -> PropValue {
    PropValue::Map(IndexMap::from([
        ("Name".to_string(), PropValue::str(name)),
        ("Type".to_string(), PropValue::str("S")),
    ]))
}

fn table_node(id: &str, spec: &TableSpec) -> ResourceNode {
    let mut key_schema = IndexMap::from([("PartitionKey".to_string(), key_attribute(&spec.partition_key))]);
    if let Some(ref sort) = spec.sort_key {
        key_schema.insert("SortKey".to_string(), key_attribute(sort));
    }

    let mut node = ResourceNode::new(&naming::table_logical_id(id), ResourceKind::Table)
        .prop("KeySchema", PropValue::Map(key_schema))
        .prop("BillingMode", "PROVISIONED")
        .prop("DeletionPolicy", spec.removal.to_string());
    if let Some(ref name) = spec.table_name {
        node = node.prop("TableName", name.as_str());
    }
    node
}

/// Compose the storage stack.
pub fn compose(stack_id: &str, spec: &StorageSpec) -> StorageStack {
    let mut template = StackTemplate::new(stack_id, StackKind::Storage);

    let mut tables = IndexMap::new();
    for (id, table) in &spec.tables {
        let r = template.add(table_node(id, table), Attribute::Name);
        template.outputs.insert(
            format!("{}Name", r.logical_id),
            Output {
                value: PropValue::Ref(r.clone()),
                export_name: None,
            },
        );
        tables.insert(id.clone(), r);
    }

    let bucket = template.add(
        ResourceNode::new(BUCKET_LOGICAL_ID, ResourceKind::Bucket)
            .prop("BucketName", spec.bucket.name.as_str())
            .prop("Arn", spec.bucket.resolved_arn()),
        Attribute::Name,
    );

    StorageStack {
        template,
        bucket,
        tables,
    }
}
