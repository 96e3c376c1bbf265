//! Template resolution, stack ordering, and deploy phases.
//!
//! Resolves `{{params.key}}`, `{{target.*}}`, `{{identity.user_pool_id}}`,
//! `{{table.<id>.name|arn}}`, `{{function.<id>.name|arn}}` and
//! `{{import.<Export>}}` into property values. Builds the stack DAG from
//! cross-stack references and computes topological order using Kahn's
//! algorithm with deterministic (alphabetical) tie-breaking.

use super::graph::{Attribute, PropValue, ResourceGraph, ResourceRef};
use super::types::*;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet, VecDeque};

/// A variable inside `{{ }}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateVar {
    Param(String),
    Account,
    Region,
    UserPoolId,
    Table { id: String, attribute: Attribute },
    Function { id: String, attribute: Attribute },
    Import(String),
}

/// A parsed piece of a template string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Var(TemplateVar),
}

fn parse_attribute(field: &str, key: &str) -> Result<Attribute, String> {
    match field {
        "name" => Ok(Attribute::Name),
        "arn" => Ok(Attribute::Arn),
        _ => Err(format!("unknown attribute '{}' in {}", field, key)),
    }
}

fn parse_var(key: &str) -> Result<TemplateVar, String> {
    if let Some(param) = key.strip_prefix("params.") {
        return Ok(TemplateVar::Param(param.to_string()));
    }
    if let Some(name) = key.strip_prefix("import.") {
        if name.is_empty() {
            return Err("empty import name".to_string());
        }
        return Ok(TemplateVar::Import(name.to_string()));
    }
    match key {
        "target.account" => return Ok(TemplateVar::Account),
        "target.region" => return Ok(TemplateVar::Region),
        "identity.user_pool_id" => return Ok(TemplateVar::UserPoolId),
        _ => {}
    }

    let parts: Vec<&str> = key.splitn(3, '.').collect();
    match parts.as_slice() {
        ["table", id, field] => Ok(TemplateVar::Table {
            id: id.to_string(),
            attribute: parse_attribute(field, key)?,
        }),
        ["function", id, field] => Ok(TemplateVar::Function {
            id: id.to_string(),
            attribute: parse_attribute(field, key)?,
        }),
        _ => Err(format!("unknown template variable: {}", key)),
    }
}

/// Split a template into literal text and variables.
pub fn parse_template(template: &str) -> Result<Vec<Segment>, String> {
    let mut segments = Vec::new();
    let mut rest = template;
    let mut offset = 0;

    while let Some(open) = rest.find("{{") {
        let close = rest[open..]
            .find("}}")
            .ok_or_else(|| format!("unclosed template at position {}", offset + open))?;
        if open > 0 {
            segments.push(Segment::Literal(rest[..open].to_string()));
        }
        let key = rest[open + 2..open + close].trim();
        segments.push(Segment::Var(parse_var(key)?));
        let consumed = open + close + 2;
        offset += consumed;
        rest = &rest[consumed..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Literal(rest.to_string()));
    }
    Ok(segments)
}

/// Everything a template may resolve against while the graph is composed.
#[derive(Debug, Clone)]
pub struct ResolveCtx<'a> {
    pub params: &'a HashMap<String, serde_yaml_ng::Value>,
    pub target: &'a Target,
    /// Declared exports: name → reference template
    pub exports: &'a IndexMap<String, String>,
    pub resolution: Resolution,
    /// The imported identity pool, once composed
    pub user_pool: Option<ResourceRef>,
    /// Table id → reference, once composed
    pub tables: IndexMap<String, ResourceRef>,
    /// Function id → reference
    pub functions: IndexMap<String, ResourceRef>,
}

impl<'a> ResolveCtx<'a> {
    pub fn new(config: &'a StackwrightConfig) -> Self {
        Self {
            params: &config.params,
            target: &config.target,
            exports: &config.exports,
            resolution: config.policy.resolution,
            user_pool: None,
            tables: IndexMap::new(),
            functions: IndexMap::new(),
        }
    }

    fn resolve_var(&self, var: &TemplateVar, depth: usize) -> Result<PropValue, String> {
        match var {
            TemplateVar::Param(key) => self
                .params
                .get(key)
                .map(|v| PropValue::Str(yaml_value_to_string(v)))
                .ok_or_else(|| format!("unknown param: {}", key)),
            TemplateVar::Account => Ok(PropValue::str(&self.target.account)),
            TemplateVar::Region => Ok(PropValue::str(&self.target.region)),
            TemplateVar::UserPoolId => self
                .user_pool
                .as_ref()
                .map(|r| PropValue::Ref(r.with_attribute(Attribute::Name)))
                .ok_or_else(|| "identity.user_pool_id used but no identity is declared".to_string()),
            TemplateVar::Table { id, attribute } => self
                .tables
                .get(id)
                .map(|r| PropValue::Ref(r.with_attribute(*attribute)))
                .ok_or_else(|| format!("unknown table: {}", id)),
            TemplateVar::Function { id, attribute } => self
                .functions
                .get(id)
                .map(|r| PropValue::Ref(r.with_attribute(*attribute)))
                .ok_or_else(|| format!("unknown function: {}", id)),
            TemplateVar::Import(name) => self.resolve_import(name, depth),
        }
    }

    /// Single-pass mode rewrites imports of graph-local exports to references.
    fn resolve_import(&self, name: &str, depth: usize) -> Result<PropValue, String> {
        if self.resolution == Resolution::TwoPhase {
            return Ok(PropValue::Import(name.to_string()));
        }
        match self.exports.get(name) {
            Some(template) => {
                if depth > 8 {
                    return Err(format!("export '{}' resolves through too many imports", name));
                }
                self.resolve_at(template, depth + 1)
            }
            None => Ok(PropValue::Import(name.to_string())),
        }
    }

    fn resolve_at(&self, template: &str, depth: usize) -> Result<PropValue, String> {
        let mut parts: Vec<PropValue> = Vec::new();
        for segment in parse_template(template)? {
            let value = match segment {
                Segment::Literal(text) => PropValue::Str(text),
                Segment::Var(var) => self.resolve_var(&var, depth)?,
            };
            match value {
                PropValue::Str(next) => match parts.last_mut() {
                    Some(PropValue::Str(prev)) => prev.push_str(&next),
                    _ => parts.push(PropValue::Str(next)),
                },
                other => parts.push(other),
            }
        }
        Ok(match parts.len() {
            0 => PropValue::str(""),
            1 => parts.remove(0),
            _ => PropValue::Join(parts),
        })
    }
}

/// Resolve a template string into a property value.
///
/// A template that is exactly one reference yields `Ref`/`Import`; literal
/// text around references yields `Join`; plain text stays `Str`.
pub fn resolve_template(template: &str, ctx: &ResolveCtx) -> Result<PropValue, String> {
    ctx.resolve_at(template, 0)
}

/// Build a topological stack order from cross-stack references.
/// Uses Kahn's algorithm with alphabetical tie-breaking for determinism.
pub fn build_stack_order(graph: &ResourceGraph) -> Result<Vec<String>, String> {
    let stack_ids: Vec<String> = graph.stacks.keys().cloned().collect();
    let mut in_degree: HashMap<String, usize> = HashMap::new();
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();

    for id in &stack_ids {
        in_degree.insert(id.clone(), 0);
        adjacency.insert(id.clone(), Vec::new());
    }

    for (id, stack) in &graph.stacks {
        for dep in stack.dependencies() {
            let Some(dependents) = adjacency.get_mut(&dep) else {
                return Err(format!("stack '{}' references unknown stack '{}'", id, dep));
            };
            dependents.push(id.clone());
            if let Some(degree) = in_degree.get_mut(id) {
                *degree += 1;
            }
        }
    }

    let mut queue: VecDeque<String> = VecDeque::new();
    let mut zero_degree: Vec<String> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(id, _)| id.clone())
        .collect();
    zero_degree.sort();
    queue.extend(zero_degree);

    let mut order = Vec::new();
    while let Some(current) = queue.pop_front() {
        let mut next_ready: Vec<String> = Vec::new();
        if let Some(neighbors) = adjacency.get(&current) {
            for neighbor in neighbors {
                if let Some(degree) = in_degree.get_mut(neighbor) {
                    *degree -= 1;
                    if *degree == 0 {
                        next_ready.push(neighbor.clone());
                    }
                }
            }
        }
        order.push(current);
        next_ready.sort();
        queue.extend(next_ready);
    }

    if order.len() != stack_ids.len() {
        let ordered: HashSet<&String> = order.iter().collect();
        let mut cycle_members: Vec<&str> = stack_ids
            .iter()
            .filter(|id| !ordered.contains(id))
            .map(String::as_str)
            .collect();
        cycle_members.sort();
        return Err(format!(
            "dependency cycle detected involving: {}",
            cycle_members.join(", ")
        ));
    }

    Ok(order)
}

/// Assign each stack a deploy phase.
///
/// A stack that consumes an import, or depends on one that does, deploys in
/// the consume phase; everything else publishes first. An export produced by
/// a consume-phase stack cannot be imported by another consume-phase stack.
pub fn classify_phases(
    graph: &ResourceGraph,
    order: &[String],
) -> Result<IndexMap<String, DeployPhase>, String> {
    let mut phases: IndexMap<String, DeployPhase> = IndexMap::new();
    for id in order {
        let stack = graph
            .stacks
            .get(id)
            .ok_or_else(|| format!("unknown stack in order: {}", id))?;
        let consumes = !stack.imports().is_empty()
            || stack
                .dependencies()
                .iter()
                .any(|d| phases.get(d) == Some(&DeployPhase::Consume));
        let phase = if consumes {
            DeployPhase::Consume
        } else {
            DeployPhase::Publish
        };
        phases.insert(id.clone(), phase);
    }

    let exports = graph.exports();
    for (id, stack) in &graph.stacks {
        if phases.get(id) != Some(&DeployPhase::Consume) {
            continue;
        }
        for name in stack.imports() {
            if let Some((producer, _)) = exports.get(&name) {
                if phases.get(producer) == Some(&DeployPhase::Consume) {
                    return Err(format!(
                        "stack '{}' imports '{}' which stack '{}' only publishes in the consume phase",
                        id, name, producer
                    ));
                }
            }
        }
    }

    Ok(phases)
}
