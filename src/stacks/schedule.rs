//! Scheduled-trigger stack: a compute composition fired once a day.

use super::compute::{self, FunctionDef};
use crate::core::graph::*;
use crate::core::types::SCHEDULE_RATE_DAYS;
use indexmap::IndexMap;

/// Composed scheduled-trigger stack.
#[derive(Debug, Clone)]
pub struct ScheduleStack {
    pub template: StackTemplate,
    /// The wrapped function (ARN attribute)
    pub function: ResourceRef,
    pub rule: String,
}

pub fn rule_logical_id(function_logical_id: &str) -> String {
    format!("{}DailyRunRule", function_logical_id)
}

/// `rate(1 day)` / `rate(n days)`.
pub fn schedule_expression(days: i64) -> String {
    if days == 1 {
        "rate(1 day)".to_string()
    } else {
        format!("rate({} days)", days)
    }
}

/// Wrap a function with a daily rule, invoke grants, and optional
/// identity-pool access.
pub fn compose(
    def: FunctionDef<'_>,
    invokes: Vec<PropValue>,
    user_pool: Option<&ResourceRef>,
) -> ScheduleStack {
    let logical_id = def.logical_id.clone();
    let compute = compute::compose(FunctionDef {
        kind: StackKind::Schedule,
        ..def
    });
    let mut template = compute.template;

    let rule_id = rule_logical_id(&logical_id);
    let target = PropValue::Map(IndexMap::from([
        ("Id".to_string(), PropValue::str("Target0")),
        ("Arn".to_string(), PropValue::Ref(compute.function.clone())),
    ]));
    template.add(
        ResourceNode::new(&rule_id, ResourceKind::Rule)
            .prop("ScheduleExpression", schedule_expression(SCHEDULE_RATE_DAYS))
            .prop("State", "ENABLED")
            .prop("Targets", PropValue::List(vec![target])),
        Attribute::Arn,
    );

    for function in invokes {
        template.grant(&compute.role, Permission::Invoke { function });
    }
    if let Some(pool) = user_pool {
        template.grant(
            &compute.role,
            Permission::IdentityPoolAccess {
                user_pool: pool.clone(),
            },
        );
    }

    ScheduleStack {
        template,
        function: compute.function,
        rule: rule_id,
    }
}

/// Functions targeted by a rule's `Targets`.
pub fn rule_targets(rule: &ResourceNode) -> Vec<&ResourceRef> {
    let mut refs = Vec::new();
    if let Some(PropValue::List(targets)) = rule.get("Targets") {
        for t in targets {
            if let PropValue::Map(m) = t {
                if let Some(PropValue::Ref(r)) = m.get("Arn") {
                    refs.push(r);
                }
            }
        }
    }
    refs
}
