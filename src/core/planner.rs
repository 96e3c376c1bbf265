//! Plan generation: diff the composed graph against recorded stack locks.

use super::codegen::{self, RenderMode};
use super::graph::{ResourceGraph, ResourceKind, StackTemplate};
use super::types::*;
use crate::tripwire::hasher;
use indexmap::IndexMap;
use std::collections::HashMap;

/// Lock detail key recording what happens when a resource leaves the graph.
pub const REMOVAL_DETAIL: &str = "removal";

/// Desired-state hash of every rendered resource of a stack, policies included.
///
/// Hashes use the symbolic rendering, so they change only when the declaration
/// does, never when physical identifiers are resolved differently.
pub fn desired_hashes(stack: &StackTemplate) -> Result<IndexMap<String, (ResourceKind, String)>, String> {
    let rendered = codegen::render_resources(stack, RenderMode::Symbolic)?;
    Ok(rendered
        .into_iter()
        .map(|(id, r)| {
            let hash = hasher::hash_json(&r.body);
            (id, (r.kind, hash))
        })
        .collect())
}

/// Generate an execution plan by comparing the graph to lock state.
pub fn plan(
    graph: &ResourceGraph,
    stack_order: &[String],
    phases: &IndexMap<String, DeployPhase>,
    locks: &HashMap<String, StackLock>,
) -> Result<ExecutionPlan, String> {
    let mut changes = Vec::new();

    for stack_id in stack_order {
        let stack = match graph.stacks.get(stack_id) {
            Some(s) => s,
            None => continue,
        };
        let desired = desired_hashes(stack)?;
        let lock = locks.get(stack_id);

        for (resource_id, (kind, hash)) in &desired {
            let action = determine_action(resource_id, hash, lock);
            changes.push(PlannedChange {
                stack: stack_id.clone(),
                resource_id: resource_id.clone(),
                kind: *kind,
                description: describe_action(resource_id, *kind, &action),
                action,
            });
        }

        if let Some(lock) = lock {
            for (resource_id, rl) in &lock.resources {
                if !desired.contains_key(resource_id) {
                    changes.push(removal(stack_id, resource_id, rl));
                }
            }
        }
    }

    // Stacks that left the graph entirely
    let mut departed: Vec<&String> = locks
        .keys()
        .filter(|id| !graph.stacks.contains_key(*id))
        .collect();
    departed.sort();
    for stack_id in departed {
        for (resource_id, rl) in &locks[stack_id].resources {
            changes.push(removal(stack_id, resource_id, rl));
        }
    }

    let count = |a: PlanAction| changes.iter().filter(|c| c.action == a).count() as u32;
    Ok(ExecutionPlan {
        name: graph.name.clone(),
        to_create: count(PlanAction::Create),
        to_update: count(PlanAction::Update),
        to_destroy: count(PlanAction::Destroy),
        orphaned: count(PlanAction::Orphan),
        unchanged: count(PlanAction::NoOp),
        changes,
        stack_order: stack_order.to_vec(),
        phases: phases.clone(),
    })
}

/// Determine what action to take for a resource present in the graph.
fn determine_action(resource_id: &str, desired_hash: &str, lock: Option<&StackLock>) -> PlanAction {
    match lock.and_then(|l| l.resources.get(resource_id)) {
        None => PlanAction::Create,
        Some(rl) if rl.status == ResourceStatus::Converged && rl.hash == desired_hash => {
            PlanAction::NoOp
        }
        // Hash changed, or previously failed or drifted
        Some(_) => PlanAction::Update,
    }
}

fn is_retained(rl: &ResourceLock) -> bool {
    matches!(
        rl.details.get(REMOVAL_DETAIL),
        Some(serde_yaml_ng::Value::String(s)) if s == "retain"
    )
}

fn removal(stack: &str, resource_id: &str, rl: &ResourceLock) -> PlannedChange {
    let action = if is_retained(rl) {
        PlanAction::Orphan
    } else {
        PlanAction::Destroy
    };
    PlannedChange {
        stack: stack.to_string(),
        resource_id: resource_id.to_string(),
        kind: rl.kind,
        description: describe_action(resource_id, rl.kind, &action),
        action,
    }
}

/// Generate a human-readable description of a planned action.
fn describe_action(resource_id: &str, kind: ResourceKind, action: &PlanAction) -> String {
    match action {
        PlanAction::Create if kind.is_external() => {
            format!("{}: reference existing {}", resource_id, kind)
        }
        PlanAction::Create => format!("{}: create {}", resource_id, kind),
        PlanAction::Update => format!("{}: update (definition changed)", resource_id),
        PlanAction::Destroy => format!("{}: destroy {}", resource_id, kind),
        PlanAction::Orphan => format!("{}: retain (left the graph)", resource_id),
        PlanAction::NoOp => format!("{}: no changes", resource_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::{Attribute, ResourceNode, StackKind};
    use crate::core::state::new_lock;

    fn graph() -> ResourceGraph {
        let mut g = ResourceGraph::new("t");
        let mut storage = StackTemplate::new("Storage", StackKind::Storage);
        storage.add(
            ResourceNode::new("MasterTable", ResourceKind::Table).prop("DeletionPolicy", "Retain"),
            Attribute::Name,
        );
        storage.add(
            ResourceNode::new("CodeBucket", ResourceKind::Bucket).prop("BucketName", "code"),
            Attribute::Name,
        );
        g.insert(storage);
        g
    }

    fn order() -> Vec<String> {
        vec!["Storage".to_string()]
    }

    fn phases() -> IndexMap<String, DeployPhase> {
        let mut p = IndexMap::new();
        p.insert("Storage".to_string(), DeployPhase::Publish);
        p
    }

    fn lock_entry(kind: ResourceKind, hash: &str, retain: bool) -> ResourceLock {
        let mut details = HashMap::new();
        if retain {
            details.insert(
                REMOVAL_DETAIL.to_string(),
                serde_yaml_ng::Value::String("retain".to_string()),
            );
        }
        ResourceLock {
            kind,
            status: ResourceStatus::Converged,
            applied_at: None,
            duration_seconds: None,
            hash: hash.to_string(),
            physical_id: None,
            arn: None,
            details,
        }
    }

    fn converged_locks(g: &ResourceGraph) -> HashMap<String, StackLock> {
        let mut lock = new_lock("Storage");
        for (id, (kind, hash)) in desired_hashes(&g.stacks["Storage"]).unwrap() {
            lock.resources.insert(id, lock_entry(kind, &hash, false));
        }
        let mut locks = HashMap::new();
        locks.insert("Storage".to_string(), lock);
        locks
    }

    #[test]
    fn test_planner_all_create() {
        let g = graph();
        let plan = plan(&g, &order(), &phases(), &HashMap::new()).unwrap();
        assert_eq!(plan.to_create, 2);
        assert_eq!(plan.unchanged, 0);
        assert!(plan.changes.iter().all(|c| c.action == PlanAction::Create));
        let bucket = plan.changes.iter().find(|c| c.resource_id == "CodeBucket").unwrap();
        assert!(bucket.description.contains("reference existing"));
    }

    #[test]
    fn test_planner_all_unchanged() {
        let g = graph();
        let locks = converged_locks(&g);
        let plan = plan(&g, &order(), &phases(), &locks).unwrap();
        assert_eq!(plan.unchanged, 2);
        assert_eq!(plan.to_create + plan.to_update + plan.to_destroy, 0);
    }

    #[test]
    fn test_planner_update_on_hash_mismatch() {
        let g = graph();
        let mut locks = converged_locks(&g);
        locks.get_mut("Storage").unwrap().resources["MasterTable"].hash =
            "blake3:stale".to_string();
        let plan = plan(&g, &order(), &phases(), &locks).unwrap();
        assert_eq!(plan.to_update, 1);
        assert_eq!(plan.unchanged, 1);
    }

    #[test]
    fn test_planner_update_after_failure() {
        let g = graph();
        let mut locks = converged_locks(&g);
        locks.get_mut("Storage").unwrap().resources["MasterTable"].status =
            ResourceStatus::Failed;
        let plan = plan(&g, &order(), &phases(), &locks).unwrap();
        assert_eq!(plan.to_update, 1);
    }

    #[test]
    fn test_planner_destroy_and_orphan() {
        let g = graph();
        let mut locks = converged_locks(&g);
        let storage = locks.get_mut("Storage").unwrap();
        storage
            .resources
            .insert("OldTable".to_string(), lock_entry(ResourceKind::Table, "blake3:a", true));
        storage
            .resources
            .insert("Scratch".to_string(), lock_entry(ResourceKind::Table, "blake3:b", false));
        let plan = plan(&g, &order(), &phases(), &locks).unwrap();
        assert_eq!(plan.orphaned, 1);
        assert_eq!(plan.to_destroy, 1);
        let orphan = plan.changes.iter().find(|c| c.action == PlanAction::Orphan).unwrap();
        assert_eq!(orphan.resource_id, "OldTable");
    }

    #[test]
    fn test_planner_departed_stack() {
        let g = graph();
        let mut locks = converged_locks(&g);
        let mut gone = new_lock("GoneLambdaStack");
        gone.resources
            .insert("GoneFn".to_string(), lock_entry(ResourceKind::Function, "blake3:c", false));
        locks.insert("GoneLambdaStack".to_string(), gone);
        let plan = plan(&g, &order(), &phases(), &locks).unwrap();
        assert_eq!(plan.to_destroy, 1);
        let change = plan.changes.last().unwrap();
        assert_eq!(change.stack, "GoneLambdaStack");
        assert_eq!(change.action, PlanAction::Destroy);
    }

    #[test]
    fn test_planner_hash_ignores_target() {
        let g = graph();
        let a = desired_hashes(&g.stacks["Storage"]).unwrap();
        let b = desired_hashes(&g.clone().stacks["Storage"]).unwrap();
        assert_eq!(a["MasterTable"].1, b["MasterTable"].1);
    }

    #[test]
    fn test_planner_full_declaration() {
        let config = crate::core::parser::parse_config(crate::cli::EXAMPLE_CONFIG).unwrap();
        let g = crate::core::compose::compose(&config).unwrap();
        let order = crate::core::resolver::build_stack_order(&g).unwrap();
        let phases = crate::core::resolver::classify_phases(&g, &order).unwrap();
        let plan = plan(&g, &order, &phases, &HashMap::new()).unwrap();
        assert_eq!(plan.stack_order.len(), 9);
        assert!(plan.to_create as usize > g.resource_count());
        assert_eq!(plan.changes[0].stack, order[0]);
    }
}
