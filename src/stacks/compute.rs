//! Compute stack: one packaged function with read-write access to a table.
//!
//! This is the only composition that creates functions; the scheduled
//! trigger wraps it.

use super::environment_block;
use crate::core::graph::*;
use crate::core::types::{FunctionSpec, FUNCTION_TIMEOUT_SECS};
use indexmap::IndexMap;

/// Inputs to a compute composition.
#[derive(Debug, Clone)]
pub struct FunctionDef<'a> {
    pub stack_id: String,
    pub kind: StackKind,
    pub logical_id: String,
    pub spec: &'a FunctionSpec,
    /// Code bucket holding `spec.source`
    pub bucket: &'a ResourceRef,
    /// Table granted read-write access
    pub table: ResourceRef,
    /// Resolved environment (without the table pointer)
    pub environment: IndexMap<String, PropValue>,
}

/// Composed compute stack.
#[derive(Debug, Clone)]
pub struct ComputeStack {
    pub template: StackTemplate,
    /// Function (ARN attribute)
    pub function: ResourceRef,
    /// Logical id of the execution role holding the grants
    pub role: String,
}

pub fn role_logical_id(function_logical_id: &str) -> String {
    format!("{}ServiceRole", function_logical_id)
}

/// Compose a function, its role and grants.
pub fn compose(def: FunctionDef<'_>) -> ComputeStack {
    let mut template = StackTemplate::new(&def.stack_id, def.kind);

    let role_id = role_logical_id(&def.logical_id);
    let role = template.add(
        ResourceNode::new(&role_id, ResourceKind::Role)
            .prop("AssumeRolePolicyService", "lambda.amazonaws.com"),
        Attribute::Arn,
    );

    let mut environment = def.environment;
    if !environment.contains_key(&def.spec.table_env) {
        environment.insert(
            def.spec.table_env.clone(),
            PropValue::Ref(def.table.with_attribute(Attribute::Name)),
        );
    }

    let code = PropValue::Map(IndexMap::from([
        (
            "S3Bucket".to_string(),
            PropValue::Ref(def.bucket.with_attribute(Attribute::Name)),
        ),
        ("S3Key".to_string(), PropValue::str(&def.spec.source)),
    ]));

    let mut node = ResourceNode::new(&def.logical_id, ResourceKind::Function)
        .prop("Runtime", def.spec.runtime.as_str())
        .prop("Handler", def.spec.handler.as_str())
        .prop("Code", code)
        .prop("Timeout", FUNCTION_TIMEOUT_SECS)
        .prop("Role", PropValue::Ref(role))
        .prop("Environment", environment_block(&environment));
    if let Some(ref name) = def.spec.function_name {
        node = node.prop("FunctionName", name.as_str());
    }
    let function = template.add(node, Attribute::Arn);

    if def.spec.send_email {
        template.grant(&role_id, Permission::SendEmail);
    }
    template.grant(
        &role_id,
        Permission::TableReadWrite {
            table: def.table.clone(),
        },
    );

    template.outputs.insert(
        "FunctionArn".to_string(),
        Output {
            value: PropValue::Ref(function.clone()),
            export_name: None,
        },
    );
    template.outputs.insert(
        "FunctionName".to_string(),
        Output {
            value: PropValue::Ref(function.with_attribute(Attribute::Name)),
            export_name: None,
        },
    );

    ComputeStack {
        template,
        function,
        role: role_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stacks::environment_variables;

    fn spec(send_email: bool) -> FunctionSpec {
        let mut f: FunctionSpec = serde_yaml_ng::from_str("source: health_report_mgr.zip").unwrap();
        f.send_email = send_email;
        f
    }

    fn build(spec: &FunctionSpec, environment: IndexMap<String, PropValue>) -> ComputeStack {
        let bucket = ResourceRef::new("Storage", "CodeBucket", Attribute::Name);
        let table = ResourceRef::new("Storage", "MasterTable", Attribute::Name);
        compose(FunctionDef {
            stack_id: "HealthStack".to_string(),
            kind: StackKind::Compute,
            logical_id: "HealthLambda".to_string(),
            spec,
            bucket: &bucket,
            table,
            environment,
        })
    }

    #[test]
    fn test_compute_function_properties() {
        let spec = spec(false);
        let c = build(&spec, IndexMap::new());
        let f = &c.template.resources["HealthLambda"];
        assert_eq!(f.kind, ResourceKind::Function);
        assert_eq!(f.get("Timeout"), Some(&PropValue::Num(10)));
        assert_eq!(f.str_prop("Runtime"), Some("python3.9"));
        assert_eq!(f.str_prop("Handler"), Some("src/index.handler"));
        assert_eq!(c.function.attribute, Attribute::Arn);
        assert_eq!(c.role, "HealthLambdaServiceRole");
    }

    #[test]
    fn test_compute_env_contains_table_name() {
        let spec = spec(false);
        let c = build(&spec, IndexMap::new());
        let env = environment_variables(c.template.resources["HealthLambda"].get("Environment").unwrap())
            .unwrap();
        assert_eq!(
            env.get("MASTER_DB"),
            Some(&PropValue::Ref(ResourceRef::new(
                "Storage",
                "MasterTable",
                Attribute::Name
            )))
        );
    }

    #[test]
    fn test_compute_env_declared_key_kept() {
        let spec = spec(false);
        let env = IndexMap::from([("MASTER_DB".to_string(), PropValue::str("override"))]);
        let c = build(&spec, env);
        let vars = environment_variables(c.template.resources["HealthLambda"].get("Environment").unwrap())
            .unwrap();
        assert_eq!(vars.get("MASTER_DB"), Some(&PropValue::str("override")));
        assert_eq!(vars.len(), 1);
    }

    #[test]
    fn test_compute_mail_statement_iff_flag() {
        for flag in [true, false] {
            let spec = spec(flag);
            let c = build(&spec, IndexMap::new());
            let has_mail = c
                .template
                .grants
                .iter()
                .any(|g| g.permission == Permission::SendEmail);
            assert_eq!(has_mail, flag);
        }
    }

    #[test]
    fn test_compute_always_table_rw() {
        let spec = spec(true);
        let c = build(&spec, IndexMap::new());
        let rw: Vec<_> = c
            .template
            .grants_for(&c.role)
            .filter(|g| matches!(g.permission, Permission::TableReadWrite { .. }))
            .collect();
        assert_eq!(rw.len(), 1);
        assert_eq!(c.template.dependencies(), vec!["Storage"]);
    }
}
