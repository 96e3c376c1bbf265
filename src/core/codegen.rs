//! Template generation: stacks rendered as provider template documents.
//!
//! Each stack renders to `Resources` + `Outputs`. Grants become one policy
//! resource per principal role. References render either symbolically
//! (intrinsics, stable across deploys, used for hashing and `synth`) or
//! resolved to physical names and ARNs (written by `deploy`).

use super::graph::*;
use super::naming::{self, PhysicalIds};
use super::types::{ExportRegistry, Target};
use indexmap::IndexMap;
use serde_json::{json, Value};
use std::collections::HashMap;

/// Physical identifiers and published exports used by resolved rendering.
#[derive(Debug, Clone, Default)]
pub struct Resolutions {
    /// (stack, logical id) → identifiers
    pub physical: HashMap<(String, String), PhysicalIds>,
    /// Export name → published value
    pub exports: IndexMap<String, String>,
}

impl Resolutions {
    /// Resolve every node of the graph against a target and the export registry.
    pub fn for_graph(graph: &ResourceGraph, target: &Target, registry: &ExportRegistry) -> Self {
        let mut physical = HashMap::new();
        for stack in graph.stacks.values() {
            for node in stack.resources.values() {
                physical.insert(
                    (stack.id.clone(), node.logical_id.clone()),
                    naming::physical_ids(&stack.id, node, target),
                );
            }
        }
        let exports = registry
            .exports
            .iter()
            .map(|(k, v)| (k.clone(), v.value.clone()))
            .collect();
        Self { physical, exports }
    }

    pub fn lookup(&self, r: &ResourceRef) -> Option<&PhysicalIds> {
        self.physical.get(&(r.stack.clone(), r.logical_id.clone()))
    }
}

/// How references render.
#[derive(Debug, Clone, Copy)]
pub enum RenderMode<'a> {
    Symbolic,
    Resolved(&'a Resolutions),
}

/// A resource as it appears in a rendered template.
#[derive(Debug, Clone)]
pub struct RenderedResource {
    pub kind: ResourceKind,
    pub body: Value,
}

/// Logical id of the policy attached to a principal.
pub fn policy_logical_id(principal: &str) -> String {
    format!("{}DefaultPolicy", principal)
}

fn render_ref(r: &ResourceRef, stack: &str, mode: RenderMode<'_>) -> Result<Value, String> {
    match mode {
        RenderMode::Symbolic if r.stack == stack => Ok(match r.attribute {
            Attribute::Name => json!({ "Ref": r.logical_id }),
            Attribute::Arn => json!({ "Fn::GetAtt": [r.logical_id, "Arn"] }),
        }),
        RenderMode::Symbolic => Ok(json!({
            "Stackwright::Ref": format!("{}/{}.{}", r.stack, r.logical_id, r.attribute)
        })),
        RenderMode::Resolved(res) => {
            let ids = res
                .lookup(r)
                .ok_or_else(|| format!("unresolved reference {}", r))?;
            Ok(Value::String(match r.attribute {
                Attribute::Name => ids.name.clone(),
                Attribute::Arn => ids.arn.clone(),
            }))
        }
    }
}

/// Render a property value.
pub fn render_value(value: &PropValue, stack: &str, mode: RenderMode<'_>) -> Result<Value, String> {
    match value {
        PropValue::Str(s) => Ok(Value::String(s.clone())),
        PropValue::Num(n) => Ok(json!(n)),
        PropValue::Bool(b) => Ok(Value::Bool(*b)),
        PropValue::List(items) => items
            .iter()
            .map(|v| render_value(v, stack, mode))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        PropValue::Map(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                out.insert(k.clone(), render_value(v, stack, mode)?);
            }
            Ok(Value::Object(out))
        }
        PropValue::Join(parts) => {
            let rendered = parts
                .iter()
                .map(|v| render_value(v, stack, mode))
                .collect::<Result<Vec<_>, _>>()?;
            match mode {
                RenderMode::Symbolic => Ok(json!({ "Fn::Join": ["", rendered] })),
                RenderMode::Resolved(_) => {
                    let mut joined = String::new();
                    for part in rendered {
                        match part {
                            Value::String(s) => joined.push_str(&s),
                            other => joined.push_str(&other.to_string()),
                        }
                    }
                    Ok(Value::String(joined))
                }
            }
        }
        PropValue::Ref(r) => render_ref(r, stack, mode),
        PropValue::Import(name) => match mode {
            RenderMode::Symbolic => Ok(json!({ "Fn::ImportValue": name })),
            RenderMode::Resolved(res) => res
                .exports
                .get(name)
                .map(|v| Value::String(v.clone()))
                .ok_or_else(|| format!("import '{}' has not been published", name)),
        },
    }
}

fn render_policy(
    stack: &StackTemplate,
    principal: &str,
    mode: RenderMode<'_>,
) -> Result<RenderedResource, String> {
    let mut statements = Vec::new();
    for grant in stack.grants_for(principal) {
        let p = &grant.permission;
        statements.push(json!({
            "Sid": p.label(),
            "Effect": "Allow",
            "Action": p.actions(),
            "Resource": render_value(&p.resource(), &stack.id, mode)?,
        }));
    }
    let role = ResourceRef::new(&stack.id, principal, Attribute::Name);
    Ok(RenderedResource {
        kind: ResourceKind::Policy,
        body: json!({
            "Type": ResourceKind::Policy.provider_type(),
            "Properties": {
                "PolicyDocument": { "Version": "2012-10-17", "Statement": statements },
                "Roles": [render_ref(&role, &stack.id, mode)?],
            }
        }),
    })
}

/// Render every resource of a stack, policies last.
pub fn render_resources(
    stack: &StackTemplate,
    mode: RenderMode<'_>,
) -> Result<IndexMap<String, RenderedResource>, String> {
    let mut out = IndexMap::new();
    for node in stack.resources.values() {
        let mut props = serde_json::Map::new();
        for (k, v) in &node.properties {
            props.insert(k.clone(), render_value(v, &stack.id, mode)?);
        }
        out.insert(
            node.logical_id.clone(),
            RenderedResource {
                kind: node.kind,
                body: json!({
                    "Type": node.kind.provider_type(),
                    "Properties": Value::Object(props),
                }),
            },
        );
    }

    let mut principals: Vec<&str> = Vec::new();
    for g in &stack.grants {
        if !principals.contains(&g.principal.as_str()) {
            principals.push(&g.principal);
        }
    }
    for principal in principals {
        out.insert(
            policy_logical_id(principal),
            render_policy(stack, principal, mode)?,
        );
    }
    Ok(out)
}

/// Render outputs: `{ name: { Value, Export? } }`.
pub fn render_outputs(
    stack: &StackTemplate,
    mode: RenderMode<'_>,
) -> Result<serde_json::Map<String, Value>, String> {
    let mut out = serde_json::Map::new();
    for (name, output) in &stack.outputs {
        let mut entry = serde_json::Map::new();
        entry.insert("Value".to_string(), render_value(&output.value, &stack.id, mode)?);
        if let Some(ref export) = output.export_name {
            entry.insert("Export".to_string(), json!({ "Name": export }));
        }
        out.insert(name.clone(), Value::Object(entry));
    }
    Ok(out)
}

/// Render a whole stack template document.
pub fn render_template(stack: &StackTemplate, mode: RenderMode<'_>) -> Result<Value, String> {
    let mut resources = serde_json::Map::new();
    for (id, r) in render_resources(stack, mode)? {
        resources.insert(id, r.body);
    }
    Ok(json!({
        "Description": format!("{} stack {}", stack.kind, stack.id),
        "Resources": resources,
        "Outputs": render_outputs(stack, mode)?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack() -> StackTemplate {
        let mut s = StackTemplate::new("Fn", StackKind::Compute);
        let role = s.add(ResourceNode::new("Role", ResourceKind::Role), Attribute::Arn);
        let f = s.add(
            ResourceNode::new("Func", ResourceKind::Function)
                .prop("Role", PropValue::Ref(role))
                .prop(
                    "Table",
                    PropValue::Ref(ResourceRef::new("Storage", "MasterTable", Attribute::Name)),
                )
                .prop("Token", PropValue::Import("TokenArn".to_string()))
                .prop(
                    "Label",
                    PropValue::Join(vec![
                        PropValue::str("t-"),
                        PropValue::Ref(ResourceRef::new("Storage", "MasterTable", Attribute::Name)),
                    ]),
                ),
            Attribute::Arn,
        );
        s.grant("Role", Permission::SendEmail);
        s.grant(
            "Role",
            Permission::TableReadWrite {
                table: ResourceRef::new("Storage", "MasterTable", Attribute::Name),
            },
        );
        s.outputs.insert(
            "FuncArn".to_string(),
            Output {
                value: PropValue::Ref(f),
                export_name: Some("FuncArnExport".to_string()),
            },
        );
        s
    }

    fn resolutions() -> Resolutions {
        let mut graph = ResourceGraph::new("t");
        let mut storage = StackTemplate::new("Storage", StackKind::Storage);
        storage.add(
            ResourceNode::new("MasterTable", ResourceKind::Table).prop("TableName", "master"),
            Attribute::Name,
        );
        graph.insert(storage);
        graph.insert(stack());
        let mut registry = ExportRegistry::default();
        registry.publish("TokenArn", "arn:token", "Token", "now");
        Resolutions::for_graph(&graph, &Target::default(), &registry)
    }

    #[test]
    fn test_codegen_symbolic_refs() {
        let s = stack();
        let r = render_resources(&s, RenderMode::Symbolic).unwrap();
        let props = &r["Func"].body["Properties"];
        assert_eq!(props["Role"], json!({ "Fn::GetAtt": ["Role", "Arn"] }));
        assert_eq!(
            props["Table"],
            json!({ "Stackwright::Ref": "Storage/MasterTable.Name" })
        );
        assert_eq!(props["Token"], json!({ "Fn::ImportValue": "TokenArn" }));
        assert_eq!(r["Func"].body["Type"], "AWS::Lambda::Function");
    }

    #[test]
    fn test_codegen_policy_per_principal() {
        let s = stack();
        let r = render_resources(&s, RenderMode::Symbolic).unwrap();
        let policy = &r["RoleDefaultPolicy"];
        assert_eq!(policy.kind, ResourceKind::Policy);
        let statements = policy.body["Properties"]["PolicyDocument"]["Statement"]
            .as_array()
            .unwrap();
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0]["Action"], json!(["ses:SendEmail", "ses:SendRawEmail"]));
        assert_eq!(statements[0]["Resource"], "*");
        assert_eq!(r.len(), 3);
    }

    #[test]
    fn test_codegen_resolved() {
        let s = stack();
        let res = resolutions();
        let r = render_resources(&s, RenderMode::Resolved(&res)).unwrap();
        let props = &r["Func"].body["Properties"];
        assert_eq!(props["Table"], "master");
        assert_eq!(props["Token"], "arn:token");
        assert_eq!(props["Label"], "t-master");
        assert!(props["Role"].as_str().unwrap().starts_with("arn:aws:iam::000000000000:role/"));
    }

    #[test]
    fn test_codegen_unpublished_import_fails() {
        let s = stack();
        let res = Resolutions::default();
        let err = render_resources(&s, RenderMode::Resolved(&res)).unwrap_err();
        assert!(err.contains("unresolved reference") || err.contains("has not been published"));
    }

    #[test]
    fn test_codegen_outputs_and_template() {
        let s = stack();
        let doc = render_template(&s, RenderMode::Symbolic).unwrap();
        assert_eq!(doc["Outputs"]["FuncArn"]["Export"]["Name"], "FuncArnExport");
        assert_eq!(doc["Description"], "compute stack Fn");
        assert!(doc["Resources"]["RoleDefaultPolicy"].is_object());
    }
}
