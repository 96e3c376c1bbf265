//! Root composition: declaration → resource graph.
//!
//! Instantiates storage, identity, one compute stack per function, the
//! scheduled trigger and the gateway, wiring each composition's handles into
//! the next. Exports attach as outputs of the stack owning the referenced
//! resource.

use super::graph::*;
use super::naming;
use super::parser::ValidationError;
use super::resolver::{self, ResolveCtx};
use super::types::*;
use crate::stacks::compute::{self, FunctionDef};
use crate::stacks::{environment_variables, gateway, identity, schedule, storage};
use indexmap::IndexMap;

/// Compose the full resource graph of a declaration.
pub fn compose(config: &StackwrightConfig) -> Result<ResourceGraph, String> {
    let prefix = &config.prefix;
    let mut graph = ResourceGraph::new(&config.name);
    let mut ctx = ResolveCtx::new(config);

    let store = storage::compose(&naming::storage_stack_id(prefix), &config.storage);
    ctx.tables = store.tables.clone();
    let bucket = store.bucket.clone();
    graph.insert(store.template);

    if let Some(ref spec) = config.identity {
        let ident = identity::compose(&naming::identity_stack_id(prefix), spec);
        ctx.user_pool = Some(ident.user_pool.clone());
        graph.insert(ident.template);
    }

    // Function ids are deterministic, so any function may name any other
    ctx.functions = function_refs(config);

    for (id, spec) in &config.functions {
        let def = function_def(config, &ctx, id, spec, &bucket, StackKind::Compute)?;
        let stack = compute::compose(def);
        graph.insert(stack.template);
    }

    if let Some(ref sched) = config.schedule {
        let def = function_def(config, &ctx, &sched.id, &sched.function, &bucket, StackKind::Schedule)?;
        let invokes = sched
            .invokes
            .iter()
            .map(|target| invoke_target(config, &ctx, target, true))
            .collect::<Result<Vec<_>, _>>()?;
        let pool = identity_grant(&ctx, sched.identity_pool, "schedule")?;
        let stack = schedule::compose(def, invokes, pool);
        graph.insert(stack.template);
    }

    if let Some(ref gw) = config.gateway {
        let environment = resolve_environment(&gw.environment, &ctx, "gateway")?;
        let invokes = gw
            .invokes
            .iter()
            .map(|target| invoke_target(config, &ctx, target, false))
            .collect::<Result<Vec<_>, _>>()?;
        let pool = identity_grant(&ctx, gw.identity_pool, "gateway")?;
        graph.insert(gateway::compose(gateway::GatewayDef {
            stack_id: naming::gateway_stack_id(prefix),
            spec: gw,
            environment,
            invokes,
            user_pool: pool,
        }));
    }

    attach_exports(config, &ctx, &mut graph)?;
    Ok(graph)
}

/// Reference (ARN attribute) of every declared function, the trigger's included.
pub fn function_refs(config: &StackwrightConfig) -> IndexMap<String, ResourceRef> {
    let ids = config
        .functions
        .keys()
        .chain(config.schedule.as_ref().map(|s| &s.id));
    ids.map(|id| {
        let stack = naming::function_stack_id(&config.prefix, id);
        let logical = naming::function_logical_id(&config.prefix, id);
        (id.clone(), ResourceRef::new(&stack, &logical, Attribute::Arn))
    })
    .collect()
}

fn function_def<'a>(
    config: &StackwrightConfig,
    ctx: &ResolveCtx,
    id: &str,
    spec: &'a FunctionSpec,
    bucket: &'a ResourceRef,
    kind: StackKind,
) -> Result<FunctionDef<'a>, String> {
    let table = ctx
        .tables
        .get(&spec.table)
        .cloned()
        .ok_or_else(|| format!("function '{}' references unknown table '{}'", id, spec.table))?;
    let environment = resolve_environment(&spec.environment, ctx, &format!("function '{}'", id))?;
    Ok(FunctionDef {
        stack_id: naming::function_stack_id(&config.prefix, id),
        kind,
        logical_id: naming::function_logical_id(&config.prefix, id),
        spec,
        bucket,
        table,
        environment,
    })
}

fn resolve_environment(
    environment: &IndexMap<String, String>,
    ctx: &ResolveCtx,
    context: &str,
) -> Result<IndexMap<String, PropValue>, String> {
    let mut out = IndexMap::new();
    for (key, template) in environment {
        let value = resolver::resolve_template(template, ctx)
            .map_err(|e| format!("{} env {}: {}", context, key, e))?;
        out.insert(key.clone(), value);
    }
    Ok(out)
}

fn identity_grant<'c>(
    ctx: &'c ResolveCtx,
    requested: bool,
    context: &str,
) -> Result<Option<&'c ResourceRef>, String> {
    if !requested {
        return Ok(None);
    }
    ctx.user_pool
        .as_ref()
        .map(Some)
        .ok_or_else(|| format!("{} requests identity-pool access but no identity is declared", context))
}

/// Export name publishing exactly `{{function.<id>.arn}}`, if any.
fn export_of_function<'c>(config: &'c StackwrightConfig, id: &str) -> Option<&'c str> {
    let wanted = format!("function.{}.arn", id);
    config.exports.iter().find_map(|(name, template)| {
        let inner = template.trim().strip_prefix("{{")?.strip_suffix("}}")?.trim();
        (inner == wanted).then_some(name.as_str())
    })
}

/// How an invoke grant names its target. The trigger goes through the
/// export when running two-phase and the target's ARN is exported; every
/// other grant is a direct reference.
fn invoke_target(
    config: &StackwrightConfig,
    ctx: &ResolveCtx,
    id: &str,
    via_exports: bool,
) -> Result<PropValue, String> {
    if via_exports && ctx.resolution == Resolution::TwoPhase {
        if let Some(name) = export_of_function(config, id) {
            return Ok(PropValue::Import(name.to_string()));
        }
    }
    ctx.functions
        .get(id)
        .map(|r| PropValue::Ref(r.with_attribute(Attribute::Arn)))
        .ok_or_else(|| format!("invoke target '{}' is not a composed function", id))
}

fn attach_exports(
    config: &StackwrightConfig,
    ctx: &ResolveCtx,
    graph: &mut ResourceGraph,
) -> Result<(), String> {
    let direct = ResolveCtx {
        resolution: Resolution::SinglePass,
        ..ctx.clone()
    };
    for (name, template) in &config.exports {
        let value = resolver::resolve_template(template, &direct)
            .map_err(|e| format!("export '{}': {}", name, e))?;
        let PropValue::Ref(ref r) = value else {
            return Err(format!(
                "export '{}' must resolve to a single resource reference",
                name
            ));
        };
        let stack = graph
            .stacks
            .get_mut(&r.stack)
            .ok_or_else(|| format!("export '{}' points at unknown stack '{}'", name, r.stack))?;
        stack.outputs.insert(
            name.clone(),
            Output {
                value: value.clone(),
                export_name: Some(name.clone()),
            },
        );
    }
    Ok(())
}

/// Check the composed graph against the declaration's guarantees.
///
/// - every function's environment carries its table's name
/// - mail-send is granted iff requested
/// - the trigger fires daily and targets only its own function
/// - the trigger and the gateway invoke exactly the declared functions
pub fn check_invariants(config: &StackwrightConfig, graph: &ResourceGraph) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let prefix = &config.prefix;

    let mut functions: Vec<(&str, &FunctionSpec)> = config
        .functions
        .iter()
        .map(|(id, f)| (id.as_str(), f))
        .collect();
    if let Some(ref s) = config.schedule {
        functions.push((s.id.as_str(), &s.function));
    }

    for (id, spec) in functions {
        let stack_id = naming::function_stack_id(prefix, id);
        let logical = naming::function_logical_id(prefix, id);
        let Some(stack) = graph.stacks.get(&stack_id) else {
            errors.push(ValidationError::new(format!("function '{}' has no stack", id)));
            continue;
        };
        let Some(node) = stack.resources.get(&logical) else {
            errors.push(ValidationError::new(format!("function '{}' has no resource", id)));
            continue;
        };

        let env_ok = node
            .get("Environment")
            .and_then(environment_variables)
            .is_some_and(|vars| vars.contains_key(&spec.table_env));
        if !env_ok {
            errors.push(ValidationError::new(format!(
                "function '{}' environment lacks {}",
                id, spec.table_env
            )));
        }

        let role = compute::role_logical_id(&logical);
        let mail = stack
            .grants_for(&role)
            .any(|g| g.permission == Permission::SendEmail);
        if mail != spec.send_email {
            errors.push(ValidationError::new(format!(
                "function '{}' mail-send grant is {} but declared {}",
                id, mail, spec.send_email
            )));
        }
        let rw = stack
            .grants_for(&role)
            .any(|g| matches!(g.permission, Permission::TableReadWrite { .. }));
        if !rw {
            errors.push(ValidationError::new(format!(
                "function '{}' has no table read-write grant",
                id
            )));
        }
    }

    if let Some(ref s) = config.schedule {
        let stack_id = naming::function_stack_id(prefix, &s.id);
        let logical = naming::function_logical_id(prefix, &s.id);
        let rule_id = schedule::rule_logical_id(&logical);
        match graph.stacks.get(&stack_id).and_then(|st| st.resources.get(&rule_id)) {
            Some(rule) => {
                let targets = schedule::rule_targets(rule);
                let own = targets.len() == 1
                    && targets[0].stack == stack_id
                    && targets[0].logical_id == logical;
                if !own {
                    errors.push(ValidationError::new(format!(
                        "schedule '{}' must target exactly its own function",
                        s.id
                    )));
                }
                if rule.str_prop("ScheduleExpression")
                    != Some(schedule::schedule_expression(SCHEDULE_RATE_DAYS).as_str())
                {
                    errors.push(ValidationError::new(format!(
                        "schedule '{}' is not daily",
                        s.id
                    )));
                }
            }
            None => errors.push(ValidationError::new(format!(
                "schedule '{}' has no rule",
                s.id
            ))),
        }
    }

    let mut ctx = ResolveCtx::new(config);
    ctx.functions = function_refs(config);

    if let Some(ref s) = config.schedule {
        let stack_id = naming::function_stack_id(prefix, &s.id);
        let role = compute::role_logical_id(&naming::function_logical_id(prefix, &s.id));
        if let Some(stack) = graph.stacks.get(&stack_id) {
            let granted = invoke_grants(stack, &role);
            let who = format!("schedule '{}'", s.id);
            let target = |id: &str| invoke_target(config, &ctx, id, true);
            check_invokes(&who, &granted, &s.invokes, target, &mut errors);
        }
    }

    if let Some(ref gw) = config.gateway {
        if let Some(stack) = graph.stacks.get(&naming::gateway_stack_id(prefix)) {
            let granted = gateway::invoke_targets(stack);
            let target = |id: &str| invoke_target(config, &ctx, id, false);
            check_invokes("gateway", &granted, &gw.invokes, target, &mut errors);
        }
    }

    errors
}

fn invoke_grants<'s>(stack: &'s StackTemplate, principal: &'s str) -> Vec<&'s PropValue> {
    stack
        .grants_for(principal)
        .filter_map(|g| match &g.permission {
            Permission::Invoke { function } => Some(function),
            _ => None,
        })
        .collect()
}

fn describe_target(value: &PropValue) -> String {
    match value {
        PropValue::Ref(r) => r.to_string(),
        PropValue::Import(name) => format!("import {}", name),
        other => format!("{:?}", other),
    }
}

/// Invoke grants must equal the declared targets: none missing, none extra.
fn check_invokes(
    who: &str,
    granted: &[&PropValue],
    declared: &[String],
    target: impl Fn(&str) -> Result<PropValue, String>,
    errors: &mut Vec<ValidationError>,
) {
    let mut expected: Vec<PropValue> = Vec::new();
    for id in declared {
        match target(id.as_str()) {
            Ok(value) => {
                if !granted.contains(&&value) {
                    errors.push(ValidationError::new(format!(
                        "{} lacks invoke access to '{}'",
                        who, id
                    )));
                }
                expected.push(value);
            }
            Err(e) => errors.push(ValidationError::new(format!("{}: {}", who, e))),
        }
    }

    let mut seen: Vec<&PropValue> = Vec::new();
    for &got in granted {
        if !expected.contains(got) {
            errors.push(ValidationError::new(format!(
                "{} has undeclared invoke access to {}",
                who,
                describe_target(got)
            )));
        } else if seen.contains(&got) {
            errors.push(ValidationError::new(format!(
                "{} grants invoke access to {} more than once",
                who,
                describe_target(got)
            )));
        }
        seen.push(got);
    }
}
