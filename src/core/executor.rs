//! Executor: orchestration loop for deploy.
//!
//! Deploys stacks in topological order, publish phase first:
//! parse → validate → compose → order → plan → for each stack: resolve → render
//! → write template → hash → lock → exports → events

use super::codegen::{self, RenderMode, Resolutions};
use super::compose;
use super::graph::{ResourceGraph, ResourceKind, StackTemplate};
use super::parser;
use super::planner::{self, REMOVAL_DETAIL};
use super::resolver;
use super::state;
use super::types::*;
use crate::tripwire::{eventlog, hasher};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

/// Which deploy phases to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PhaseSelect {
    #[default]
    All,
    Publish,
    Consume,
}

impl PhaseSelect {
    fn includes(self, phase: DeployPhase) -> bool {
        match self {
            Self::All => true,
            Self::Publish => phase == DeployPhase::Publish,
            Self::Consume => phase == DeployPhase::Consume,
        }
    }
}

/// Configuration for a deploy run.
pub struct DeployConfig<'a> {
    pub config: &'a StackwrightConfig,
    pub state_dir: &'a Path,
    /// Directory receiving `<stack>.template.json`
    pub out_dir: &'a Path,
    pub phase: PhaseSelect,
    pub force: bool,
    pub dry_run: bool,
    pub stack_filter: Option<&'a str>,
}

/// Load every existing lock for the given stack ids plus stacks already on disk.
pub fn load_locks(state_dir: &Path, graph: &ResourceGraph) -> Result<HashMap<String, StackLock>, String> {
    let mut ids: Vec<String> = graph.stacks.keys().cloned().collect();
    for id in state::locked_stacks(state_dir)? {
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    let mut locks = HashMap::new();
    for id in ids {
        if let Some(lock) = state::load_lock(state_dir, &id)? {
            locks.insert(id, lock);
        }
    }
    Ok(locks)
}

/// Compose, check and order the declaration.
pub fn prepare(
    config: &StackwrightConfig,
) -> Result<(ResourceGraph, Vec<String>, IndexMap<String, DeployPhase>), String> {
    let errors = parser::validate_config(config);
    if !errors.is_empty() {
        return Err(join_errors("validation failed", &errors));
    }
    let graph = compose::compose(config)?;
    let violations = compose::check_invariants(config, &graph);
    if !violations.is_empty() {
        return Err(join_errors("composition invariants violated", &violations));
    }
    let order = resolver::build_stack_order(&graph)?;
    let phases = resolver::classify_phases(&graph, &order)?;
    Ok((graph, order, phases))
}

fn join_errors(what: &str, errors: &[parser::ValidationError]) -> String {
    let lines: Vec<String> = errors.iter().map(|e| format!("  - {}", e)).collect();
    format!("{}:\n{}", what, lines.join("\n"))
}

/// Execute the deploy loop.
pub fn deploy(cfg: &DeployConfig) -> Result<Vec<DeployResult>, String> {
    let (graph, order, phases) = prepare(cfg.config)?;
    let mut locks = load_locks(cfg.state_dir, &graph)?;
    let plan = planner::plan(&graph, &order, &phases, &locks)?;

    if let Some(filter) = cfg.stack_filter {
        if !graph.stacks.contains_key(filter) {
            return Err(format!("unknown stack '{}'", filter));
        }
    }

    let phase_of = &phases;
    let selected: Vec<&String> = [DeployPhase::Publish, DeployPhase::Consume]
        .iter()
        .filter(|p| cfg.phase.includes(**p))
        .flat_map(|p| order.iter().filter(move |id| phase_of.get(*id) == Some(p)))
        .filter(|id| cfg.stack_filter.is_none_or(|f| f == id.as_str()))
        .collect();

    if cfg.dry_run {
        return Ok(selected
            .iter()
            .map(|id| DeployResult {
                stack: (*id).clone(),
                phase: phases[*id],
                resources_converged: 0,
                resources_unchanged: plan
                    .changes
                    .iter()
                    .filter(|c| &c.stack == *id && c.action == PlanAction::NoOp)
                    .count() as u32,
                resources_failed: 0,
                exports_published: 0,
                total_duration: std::time::Duration::ZERO,
            })
            .collect());
    }

    let mut registry = state::load_exports(cfg.state_dir)?;
    let mut resolutions = Resolutions::for_graph(&graph, &cfg.config.target, &registry);
    let producers: HashMap<String, String> = graph
        .exports()
        .into_iter()
        .map(|(name, (stack, _))| (name, stack))
        .collect();

    let mut results = Vec::new();
    let mut broken: HashSet<String> = HashSet::new();

    for stack_id in selected {
        let stack = &graph.stacks[stack_id];
        let upstream_broken = stack
            .dependencies()
            .iter()
            .chain(stack.imports().iter().filter_map(|i| producers.get(i)))
            .any(|dep| broken.contains(dep));
        if upstream_broken {
            warn!(stack = %stack_id, "skipped: an upstream stack failed");
            broken.insert(stack_id.clone());
            continue;
        }

        let mut ctx = StackCtx {
            cfg,
            stack,
            phase: phases[stack_id],
            plan: &plan,
            resolutions: &mut resolutions,
            registry: &mut registry,
        };
        let result = deploy_stack(&mut ctx, &mut locks)?;
        let failed = result.resources_failed > 0;
        results.push(result);

        if failed {
            broken.insert(stack_id.clone());
            if cfg.config.policy.failure == FailurePolicy::StopOnFirst {
                eprintln!("JIDOKA: stopping after failure on stack {}", stack_id);
                return Ok(results);
            }
        }
    }

    if cfg.phase == PhaseSelect::All && cfg.stack_filter.is_none() {
        retire_departed(cfg, &graph, &locks)?;
    }

    Ok(results)
}

/// Shared context for deploying one stack.
struct StackCtx<'a, 'b> {
    cfg: &'a DeployConfig<'a>,
    stack: &'a StackTemplate,
    phase: DeployPhase,
    plan: &'a ExecutionPlan,
    resolutions: &'b mut Resolutions,
    registry: &'b mut ExportRegistry,
}

fn log_tripwire(cfg: &DeployConfig, stack: &str, event: ProvenanceEvent) {
    if cfg.config.policy.tripwire {
        if let Err(e) = eventlog::append_event(cfg.state_dir, stack, event) {
            warn!(stack, error = %e, "cannot append provenance event");
        }
    }
}

fn removal_detail(stack: &StackTemplate, resource_id: &str) -> Option<&'static str> {
    let node = stack.resources.get(resource_id)?;
    if node.kind.is_external() || node.str_prop("DeletionPolicy") == Some("Retain") {
        Some("retain")
    } else {
        Some("delete")
    }
}

fn build_resource_details(
    stack: &StackTemplate,
    resource_id: &str,
    resolved_body: &serde_json::Value,
) -> HashMap<String, serde_yaml_ng::Value> {
    let mut details = HashMap::new();
    details.insert(
        "resolved_hash".to_string(),
        serde_yaml_ng::Value::String(hasher::hash_json(resolved_body)),
    );
    if let Some(removal) = removal_detail(stack, resource_id) {
        details.insert(
            REMOVAL_DETAIL.to_string(),
            serde_yaml_ng::Value::String(removal.to_string()),
        );
    }
    details
}

/// Record a stack-wide failure into the lock and event log.
fn record_failure(ctx: &StackCtx, lock: &mut StackLock, changes: &[&PlannedChange], error: &str) -> u32 {
    let mut failed = 0;
    for change in changes {
        if matches!(change.action, PlanAction::Destroy | PlanAction::Orphan) {
            continue;
        }
        if change.action == PlanAction::NoOp && !ctx.cfg.force {
            continue;
        }
        lock.resources.insert(
            change.resource_id.clone(),
            ResourceLock {
                kind: change.kind,
                status: ResourceStatus::Failed,
                applied_at: Some(eventlog::now_iso8601()),
                duration_seconds: None,
                hash: String::new(),
                physical_id: None,
                arn: None,
                details: HashMap::new(),
            },
        );
        log_tripwire(
            ctx.cfg,
            &ctx.stack.id,
            ProvenanceEvent::ResourceFailed {
                stack: ctx.stack.id.clone(),
                resource: change.resource_id.clone(),
                error: error.to_string(),
            },
        );
        failed += 1;
    }
    failed.max(1)
}

/// Publish the stack's exported outputs. Returns how many values changed.
fn publish_exports(ctx: &mut StackCtx, lock: &mut StackLock) -> Result<u32, String> {
    let mut published = 0;
    let now = eventlog::now_iso8601();
    for (name, output) in &ctx.stack.outputs {
        let rendered = codegen::render_value(
            &output.value,
            &ctx.stack.id,
            RenderMode::Resolved(&*ctx.resolutions),
        )?;
        let value = match rendered {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        lock.outputs.insert(name.clone(), value.clone());

        let Some(ref export) = output.export_name else {
            continue;
        };
        if ctx.registry.value(export) == Some(value.as_str()) {
            continue;
        }
        ctx.registry.publish(export, &value, &ctx.stack.id, &now);
        ctx.resolutions.exports.insert(export.clone(), value.clone());
        info!(stack = %ctx.stack.id, export = %export, "export published");
        log_tripwire(
            ctx.cfg,
            &ctx.stack.id,
            ProvenanceEvent::ExportPublished {
                stack: ctx.stack.id.clone(),
                export: export.clone(),
                value,
            },
        );
        published += 1;
    }
    if published > 0 && ctx.cfg.config.policy.lock_file {
        state::save_exports(ctx.cfg.state_dir, ctx.registry)?;
    }
    Ok(published)
}

fn deploy_stack(ctx: &mut StackCtx, locks: &mut HashMap<String, StackLock>) -> Result<DeployResult, String> {
    let stack_start = Instant::now();
    let run_id = eventlog::generate_run_id();
    let stack_id = ctx.stack.id.clone();
    info!(stack = %stack_id, phase = %ctx.phase, "deploying stack");

    let mut lock = locks
        .remove(&stack_id)
        .unwrap_or_else(|| state::new_lock(&stack_id));

    log_tripwire(
        ctx.cfg,
        &stack_id,
        ProvenanceEvent::DeployStarted {
            stack: stack_id.clone(),
            run_id: run_id.clone(),
            phase: ctx.phase,
            stackwright_version: env!("CARGO_PKG_VERSION").to_string(),
        },
    );

    let changes: Vec<&PlannedChange> = ctx
        .plan
        .changes
        .iter()
        .filter(|c| c.stack == stack_id)
        .collect();

    let mut converged = 0u32;
    let mut unchanged = 0u32;
    let mut failed = 0u32;
    let mut exports_published = 0u32;

    match codegen::render_template(ctx.stack, RenderMode::Resolved(&*ctx.resolutions)) {
        Err(e) => {
            warn!(stack = %stack_id, error = %e, "stack failed to resolve");
            failed = record_failure(ctx, &mut lock, &changes, &e);
        }
        Ok(doc) => {
            let path = state::template_path(ctx.cfg.out_dir, &stack_id);
            let content = serde_json::to_string_pretty(&doc)
                .map_err(|e| format!("JSON serialize error: {}", e))?;
            state::write_atomic(&path, &format!("{}\n", content))?;
            lock.template_path = Some(path.display().to_string());
            lock.template_hash = Some(hasher::hash_file(&path)?);
            let desired = planner::desired_hashes(ctx.stack)?;

            for change in &changes {
                let resource_start = Instant::now();
                match change.action {
                    PlanAction::Destroy | PlanAction::Orphan => {
                        let retained = change.action == PlanAction::Orphan;
                        lock.resources.shift_remove(&change.resource_id);
                        log_tripwire(
                            ctx.cfg,
                            &stack_id,
                            ProvenanceEvent::ResourceRemoved {
                                stack: stack_id.clone(),
                                resource: change.resource_id.clone(),
                                retained,
                            },
                        );
                        continue;
                    }
                    _ => {}
                }

                let body = &doc["Resources"][&change.resource_id];
                let details = build_resource_details(ctx.stack, &change.resource_id, body);

                if change.action == PlanAction::NoOp && !ctx.cfg.force {
                    if let Some(rl) = lock.resources.get_mut(&change.resource_id) {
                        rl.details = details;
                    }
                    unchanged += 1;
                    continue;
                }

                log_tripwire(
                    ctx.cfg,
                    &stack_id,
                    ProvenanceEvent::ResourceStarted {
                        stack: stack_id.clone(),
                        resource: change.resource_id.clone(),
                        action: change.action.to_string(),
                    },
                );

                let ids = ctx.stack.resources.get(&change.resource_id).and_then(|node| {
                    ctx.resolutions.lookup(&super::graph::ResourceRef::new(
                        &stack_id,
                        &node.logical_id,
                        super::graph::Attribute::Name,
                    ))
                });
                let desired_hash = desired
                    .get(&change.resource_id)
                    .map(|(_, h)| h.clone())
                    .unwrap_or_default();
                let duration = resource_start.elapsed().as_secs_f64();

                lock.resources.insert(
                    change.resource_id.clone(),
                    ResourceLock {
                        kind: change.kind,
                        status: ResourceStatus::Converged,
                        applied_at: Some(eventlog::now_iso8601()),
                        duration_seconds: Some(duration),
                        hash: desired_hash.clone(),
                        physical_id: ids.map(|i| i.name.clone()),
                        arn: ids
                            .filter(|_| change.kind != ResourceKind::Policy)
                            .map(|i| i.arn.clone()),
                        details,
                    },
                );
                log_tripwire(
                    ctx.cfg,
                    &stack_id,
                    ProvenanceEvent::ResourceConverged {
                        stack: stack_id.clone(),
                        resource: change.resource_id.clone(),
                        duration_seconds: duration,
                        hash: desired_hash,
                    },
                );
                converged += 1;
            }

            exports_published = publish_exports(ctx, &mut lock)?;
        }
    }

    lock.generated_at = eventlog::now_iso8601();
    if ctx.cfg.config.policy.lock_file {
        state::save_lock(ctx.cfg.state_dir, &lock)?;
    }
    locks.insert(stack_id.clone(), lock);

    log_tripwire(
        ctx.cfg,
        &stack_id,
        ProvenanceEvent::DeployCompleted {
            stack: stack_id.clone(),
            run_id,
            resources_converged: converged,
            resources_unchanged: unchanged,
            resources_failed: failed,
            total_seconds: stack_start.elapsed().as_secs_f64(),
        },
    );

    Ok(DeployResult {
        stack: stack_id,
        phase: ctx.phase,
        resources_converged: converged,
        resources_unchanged: unchanged,
        resources_failed: failed,
        exports_published,
        total_duration: stack_start.elapsed(),
    })
}

/// Remove state of stacks that left the graph.
fn retire_departed(
    cfg: &DeployConfig,
    graph: &ResourceGraph,
    locks: &HashMap<String, StackLock>,
) -> Result<(), String> {
    let mut departed: Vec<&StackLock> = locks
        .values()
        .filter(|l| !graph.stacks.contains_key(&l.stack))
        .collect();
    departed.sort_by(|a, b| a.stack.cmp(&b.stack));

    for lock in departed {
        info!(stack = %lock.stack, "stack left the graph");
        for (resource_id, rl) in &lock.resources {
            let retained = matches!(
                rl.details.get(REMOVAL_DETAIL),
                Some(serde_yaml_ng::Value::String(s)) if s == "retain"
            );
            log_tripwire(
                cfg,
                &lock.stack,
                ProvenanceEvent::ResourceRemoved {
                    stack: lock.stack.clone(),
                    resource: resource_id.clone(),
                    retained,
                },
            );
        }
        if let Some(ref path) = lock.template_path {
            let path = Path::new(path);
            if path.exists() {
                std::fs::remove_file(path)
                    .map_err(|e| format!("cannot remove {}: {}", path.display(), e))?;
            }
        }
        if cfg.config.policy.lock_file {
            state::remove_lock(cfg.state_dir, &lock.stack)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::EXAMPLE_CONFIG;
    use crate::core::parser::parse_config;

    fn example(resolution: Resolution) -> StackwrightConfig {
        let mut config = parse_config(EXAMPLE_CONFIG).unwrap();
        config.policy.resolution = resolution;
        config
    }

    fn run(
        config: &StackwrightConfig,
        dir: &Path,
        phase: PhaseSelect,
        force: bool,
    ) -> Result<Vec<DeployResult>, String> {
        let out = dir.join("out");
        let cfg = DeployConfig {
            config,
            state_dir: &dir.join("state"),
            out_dir: &out,
            phase,
            force,
            dry_run: false,
            stack_filter: None,
        };
        deploy(&cfg)
    }

    #[test]
    fn test_executor_dry_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = example(Resolution::SinglePass);
        let state_dir = dir.path().join("state");
        let out = dir.path().join("out");
        let cfg = DeployConfig {
            config: &config,
            state_dir: &state_dir,
            out_dir: &out,
            phase: PhaseSelect::All,
            force: false,
            dry_run: true,
            stack_filter: None,
        };
        let results = deploy(&cfg).unwrap();
        assert_eq!(results.len(), 9);
        assert!(!state_dir.exists());
        assert!(!out.exists());
    }

    #[test]
    fn test_executor_deploy_single_pass() {
        let dir = tempfile::tempdir().unwrap();
        let config = example(Resolution::SinglePass);
        let results = run(&config, dir.path(), PhaseSelect::All, false).unwrap();
        assert_eq!(results.len(), 9);
        assert!(results.iter().all(|r| r.resources_failed == 0));
        assert!(results.iter().all(|r| r.phase == DeployPhase::Publish));

        let state_dir = dir.path().join("state");
        let lock = state::load_lock(&state_dir, "AnalysisAndDesignStorageStack")
            .unwrap()
            .unwrap();
        let sessions = &lock.resources["SessionsTable"];
        assert_eq!(sessions.physical_id.as_deref(), Some("analysis-and-design-ecs-session-table"));
        assert!(lock.template_hash.as_deref().unwrap().starts_with("blake3:"));

        let registry = state::load_exports(&state_dir).unwrap();
        assert_eq!(registry.exports.len(), 3);
        assert!(registry
            .value("TokenMgrFunctionArn")
            .unwrap()
            .starts_with("arn:aws:lambda:eu-west-1:000000000000:function:"));

        let events = eventlog::read_events(&state_dir, "AnalysisAndDesignEcsStack").unwrap();
        assert!(matches!(events[0].event, ProvenanceEvent::DeployStarted { .. }));
        assert!(matches!(
            events.last().unwrap().event,
            ProvenanceEvent::DeployCompleted { resources_failed: 0, .. }
        ));
    }

    #[test]
    fn test_executor_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let config = example(Resolution::SinglePass);
        run(&config, dir.path(), PhaseSelect::All, false).unwrap();
        let second = run(&config, dir.path(), PhaseSelect::All, false).unwrap();
        assert!(second.iter().all(|r| r.resources_converged == 0));
        assert!(second.iter().all(|r| r.exports_published == 0));
        assert!(second.iter().map(|r| r.resources_unchanged).sum::<u32>() > 0);
    }

    #[test]
    fn test_executor_force_redeploys() {
        let dir = tempfile::tempdir().unwrap();
        let config = example(Resolution::SinglePass);
        run(&config, dir.path(), PhaseSelect::All, false).unwrap();
        let forced = run(&config, dir.path(), PhaseSelect::All, true).unwrap();
        assert!(forced.iter().all(|r| r.resources_unchanged == 0));
        assert!(forced.iter().all(|r| r.resources_converged > 0));
    }

    #[test]
    fn test_executor_two_phase_consume_before_publish_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = example(Resolution::TwoPhase);
        let results = run(&config, dir.path(), PhaseSelect::Consume, false).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].resources_failed > 0);
        assert_eq!(results[0].phase, DeployPhase::Consume);
    }

    #[test]
    fn test_executor_two_phase_in_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let config = example(Resolution::TwoPhase);
        let publish = run(&config, dir.path(), PhaseSelect::Publish, false).unwrap();
        assert_eq!(publish.len(), 8);
        assert!(publish.iter().all(|r| r.phase == DeployPhase::Publish));

        let consume = run(&config, dir.path(), PhaseSelect::Consume, false).unwrap();
        assert_eq!(consume.len(), 1);
        assert_eq!(consume[0].resources_failed, 0);

        let registry = state::load_exports(&dir.path().join("state")).unwrap();
        let template = std::fs::read_to_string(
            dir.path()
                .join("out")
                .join("AnalysisAndDesignUpdateOrdersLambdaStack.template.json"),
        )
        .unwrap();
        assert!(template.contains(registry.value("TokenMgrFunctionArn").unwrap()));
    }

    #[test]
    fn test_executor_stack_filter() {
        let dir = tempfile::tempdir().unwrap();
        let config = example(Resolution::SinglePass);
        let state_dir = dir.path().join("state");
        let out = dir.path().join("out");
        let cfg = DeployConfig {
            config: &config,
            state_dir: &state_dir,
            out_dir: &out,
            phase: PhaseSelect::All,
            force: false,
            dry_run: false,
            stack_filter: Some("AnalysisAndDesignStorageStack"),
        };
        let results = deploy(&cfg).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(state::locked_stacks(&state_dir).unwrap().len(), 1);

        let bad = DeployConfig {
            stack_filter: Some("Nope"),
            ..cfg
        };
        assert!(deploy(&bad).unwrap_err().contains("unknown stack"));
    }

    #[test]
    fn test_executor_departed_stack_retired() {
        let dir = tempfile::tempdir().unwrap();
        let config = example(Resolution::SinglePass);
        run(&config, dir.path(), PhaseSelect::All, false).unwrap();

        let mut smaller = config.clone();
        smaller.gateway = None;
        run(&smaller, dir.path(), PhaseSelect::All, false).unwrap();
        let state_dir = dir.path().join("state");
        let stacks = state::locked_stacks(&state_dir).unwrap();
        assert!(!stacks.contains(&"AnalysisAndDesignEcsStack".to_string()));
        assert!(!dir.path().join("out/AnalysisAndDesignEcsStack.template.json").exists());
        let events = eventlog::read_events(&state_dir, "AnalysisAndDesignEcsStack").unwrap();
        assert!(matches!(
            events.last().unwrap().event,
            ProvenanceEvent::ResourceRemoved { .. }
        ));
    }

    #[test]
    fn test_executor_no_lock_file_policy() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = example(Resolution::SinglePass);
        config.policy.lock_file = false;
        config.policy.tripwire = false;
        run(&config, dir.path(), PhaseSelect::All, false).unwrap();
        assert!(state::locked_stacks(&dir.path().join("state")).unwrap().is_empty());
        assert!(dir.path().join("out").exists());
    }

    #[test]
    fn test_executor_invalid_declaration() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = example(Resolution::SinglePass);
        config.functions["token_mgr"].table = "missing".to_string();
        let err = run(&config, dir.path(), PhaseSelect::All, false).unwrap_err();
        assert!(err.starts_with("validation failed"));
    }
}
