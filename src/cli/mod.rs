//! CLI subcommands: init, validate, graph, synth, plan, deploy, status, exports, grants, drift.

use crate::core::codegen::{self, RenderMode};
use crate::core::executor::{self, PhaseSelect};
use crate::core::graph::ResourceGraph;
use crate::core::types::{self, PlanAction, ProvenanceEvent, ResourceStatus};
use crate::core::{compose, parser, planner, resolver, state};
use crate::tripwire::{drift, eventlog};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

/// Declaration written by `stackwright init`.
pub const EXAMPLE_CONFIG: &str = include_str!("stackwright.example.yaml");

const DEFAULT_FILE: &str = "stackwright.yaml";

#[derive(Parser, Debug)]
#[command(
    name = "stackwright",
    version,
    about = "Typed cloud stack composition: synthesize, plan and deploy stack graphs from one declaration"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Deploy phase selector.
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum PhaseArg {
    #[default]
    All,
    Publish,
    Consume,
}

impl From<PhaseArg> for PhaseSelect {
    fn from(p: PhaseArg) -> Self {
        match p {
            PhaseArg::All => PhaseSelect::All,
            PhaseArg::Publish => PhaseSelect::Publish,
            PhaseArg::Consume => PhaseSelect::Consume,
        }
    }
}

/// Graph output format.
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum GraphFormat {
    #[default]
    Text,
    Dot,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new stackwright project
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate stackwright.yaml and the composed graph
    Validate {
        /// Path to stackwright.yaml
        #[arg(short, long, default_value = DEFAULT_FILE)]
        file: PathBuf,
    },

    /// Show stacks in deploy order with their dependencies
    Graph {
        #[arg(short, long, default_value = DEFAULT_FILE)]
        file: PathBuf,

        #[arg(long, value_enum, default_value_t = GraphFormat::Text)]
        format: GraphFormat,
    },

    /// Render symbolic stack templates
    Synth {
        #[arg(short, long, default_value = DEFAULT_FILE)]
        file: PathBuf,

        /// Print a single stack's template to stdout
        #[arg(short, long)]
        stack: Option<String>,

        /// Output directory
        #[arg(long, default_value = "synth.out")]
        out: PathBuf,
    },

    /// Show execution plan (diff declaration vs recorded state)
    Plan {
        #[arg(short, long, default_value = DEFAULT_FILE)]
        file: PathBuf,

        /// Target specific stack
        #[arg(short, long)]
        stack: Option<String>,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Resolve, write and record stack templates
    Deploy {
        #[arg(short, long, default_value = DEFAULT_FILE)]
        file: PathBuf,

        /// Target specific stack
        #[arg(short, long)]
        stack: Option<String>,

        /// Deploy phase (two_phase resolution)
        #[arg(long, value_enum, default_value_t = PhaseArg::All)]
        phase: PhaseArg,

        /// Force redeploy of unchanged resources
        #[arg(long)]
        force: bool,

        /// Show what would be deployed without writing anything
        #[arg(long)]
        dry_run: bool,

        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Directory receiving resolved templates
        #[arg(long, default_value = "out")]
        out: PathBuf,
    },

    /// Show current state from lock files
    Status {
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        #[arg(short, long)]
        stack: Option<String>,
    },

    /// List published exports
    Exports {
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// List permission grants per role
    Grants {
        #[arg(short, long, default_value = DEFAULT_FILE)]
        file: PathBuf,

        #[arg(short, long)]
        stack: Option<String>,
    },

    /// Detect edits to deployed templates (tripwire)
    Drift {
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        #[arg(short, long)]
        stack: Option<String>,

        /// Exit non-zero on any drift (for CI/cron)
        #[arg(long)]
        tripwire: bool,
    },

    /// Print the JSON Schema of stackwright.yaml
    Schema,

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Graph { file, format } => cmd_graph(&file, format),
        Commands::Synth { file, stack, out } => cmd_synth(&file, stack.as_deref(), &out),
        Commands::Plan {
            file,
            stack,
            state_dir,
        } => cmd_plan(&file, &state_dir, stack.as_deref()),
        Commands::Deploy {
            file,
            stack,
            phase,
            force,
            dry_run,
            state_dir,
            out,
        } => cmd_deploy(
            &file,
            &state_dir,
            &out,
            stack.as_deref(),
            phase.into(),
            force,
            dry_run,
        ),
        Commands::Status { state_dir, stack } => cmd_status(&state_dir, stack.as_deref()),
        Commands::Exports { state_dir } => cmd_exports(&state_dir),
        Commands::Grants { file, stack } => cmd_grants(&file, stack.as_deref()),
        Commands::Drift {
            state_dir,
            stack,
            tripwire,
        } => cmd_drift(&state_dir, stack.as_deref(), tripwire),
        Commands::Schema => cmd_schema(),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "stackwright", &mut std::io::stdout());
            Ok(())
        }
    }
}

fn cmd_init(path: &Path) -> Result<(), String> {
    let config_path = path.join(DEFAULT_FILE);
    if config_path.exists() {
        return Err(format!("{} already exists", config_path.display()));
    }

    let state_dir = path.join("state");
    std::fs::create_dir_all(&state_dir).map_err(|e| format!("cannot create state dir: {}", e))?;
    std::fs::write(&config_path, EXAMPLE_CONFIG)
        .map_err(|e| format!("cannot write {}: {}", config_path.display(), e))?;

    println!("Initialized stackwright project at {}", path.display());
    println!("  Created: {}", config_path.display());
    println!("  Created: {}/", state_dir.display());
    Ok(())
}

/// Parse a declaration, apply environment overrides and validate it.
fn parse_and_validate(file: &Path) -> Result<types::StackwrightConfig, String> {
    let mut config = parser::parse_config_file(file)?;
    parser::apply_env_overrides(&mut config);
    let errors = parser::validate_config(&config);
    if errors.is_empty() {
        return Ok(config);
    }
    for e in &errors {
        eprintln!("  ERROR: {}", e);
    }
    Err(format!("{} validation error(s)", errors.len()))
}

fn compose_checked(config: &types::StackwrightConfig) -> Result<ResourceGraph, String> {
    let graph = compose::compose(config)?;
    let violations = compose::check_invariants(config, &graph);
    if violations.is_empty() {
        return Ok(graph);
    }
    for v in &violations {
        eprintln!("  INVARIANT: {}", v);
    }
    Err(format!("{} invariant violation(s)", violations.len()))
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let config = parse_and_validate(file)?;
    let graph = compose_checked(&config)?;
    let order = resolver::build_stack_order(&graph)?;
    resolver::classify_phases(&graph, &order)?;
    println!(
        "OK: {} ({} stacks, {} resources, {} exports)",
        config.name,
        graph.stacks.len(),
        graph.resource_count(),
        graph.exports().len()
    );
    Ok(())
}

fn cmd_graph(file: &Path, format: GraphFormat) -> Result<(), String> {
    let config = parse_and_validate(file)?;
    let graph = compose_checked(&config)?;
    let order = resolver::build_stack_order(&graph)?;
    let phases = resolver::classify_phases(&graph, &order)?;
    print!("{}", render_graph(&graph, &order, &phases, format));
    Ok(())
}

fn render_graph(
    graph: &ResourceGraph,
    order: &[String],
    phases: &indexmap::IndexMap<String, types::DeployPhase>,
    format: GraphFormat,
) -> String {
    let mut out = String::new();
    match format {
        GraphFormat::Text => {
            for (i, id) in order.iter().enumerate() {
                let stack = &graph.stacks[id];
                out.push_str(&format!(
                    "{:>2}. {} [{}, {}]\n",
                    i + 1,
                    id,
                    stack.kind,
                    phases[id]
                ));
                for dep in stack.dependencies() {
                    out.push_str(&format!("      <- {}\n", dep));
                }
                for import in stack.imports() {
                    out.push_str(&format!("      <- import {}\n", import));
                }
            }
        }
        GraphFormat::Dot => {
            out.push_str(&format!("digraph \"{}\" {{\n", graph.name));
            for id in order {
                out.push_str(&format!("  \"{}\";\n", id));
            }
            for id in order {
                for dep in graph.stacks[id].dependencies() {
                    out.push_str(&format!("  \"{}\" -> \"{}\";\n", dep, id));
                }
            }
            out.push_str("}\n");
        }
    }
    out
}

fn cmd_synth(file: &Path, stack_filter: Option<&str>, out: &Path) -> Result<(), String> {
    let config = parse_and_validate(file)?;
    let graph = compose_checked(&config)?;

    if let Some(id) = stack_filter {
        let stack = graph
            .stacks
            .get(id)
            .ok_or_else(|| format!("unknown stack '{}'", id))?;
        let doc = codegen::render_template(stack, RenderMode::Symbolic)?;
        let json = serde_json::to_string_pretty(&doc)
            .map_err(|e| format!("JSON serialize error: {}", e))?;
        println!("{}", json);
        return Ok(());
    }

    for (id, stack) in &graph.stacks {
        let doc = codegen::render_template(stack, RenderMode::Symbolic)?;
        let json = serde_json::to_string_pretty(&doc)
            .map_err(|e| format!("JSON serialize error: {}", e))?;
        let path = state::template_path(out, id);
        state::write_atomic(&path, &format!("{}\n", json))?;
        println!("  {}", path.display());
    }
    println!("Synthesized {} stack(s) into {}", graph.stacks.len(), out.display());
    Ok(())
}

fn cmd_plan(file: &Path, state_dir: &Path, stack_filter: Option<&str>) -> Result<(), String> {
    let config = parse_and_validate(file)?;
    let (graph, order, phases) = executor::prepare(&config)?;
    let locks = executor::load_locks(state_dir, &graph)?;
    let plan = planner::plan(&graph, &order, &phases, &locks)?;
    print_plan(&plan, stack_filter);
    Ok(())
}

/// Display a plan to stdout.
fn print_plan(plan: &types::ExecutionPlan, stack_filter: Option<&str>) {
    println!("Planning: {} ({} resources)", plan.name, plan.changes.len());
    println!();

    let mut current_stack = String::new();
    for change in &plan.changes {
        if stack_filter.is_some_and(|f| f != change.stack) {
            continue;
        }
        if change.stack != current_stack {
            current_stack.clone_from(&change.stack);
            match plan.phases.get(&current_stack) {
                Some(phase) => println!("{} ({}):", current_stack, phase),
                None => println!("{} (removed):", current_stack),
            }
        }
        let symbol = match change.action {
            PlanAction::Create => "+",
            PlanAction::Update => "~",
            PlanAction::Destroy => "-",
            PlanAction::Orphan => "!",
            PlanAction::NoOp => " ",
        };
        println!("  {} {}", symbol, change.description);
    }

    println!();
    println!(
        "Plan: {} to add, {} to change, {} to destroy, {} to retain, {} unchanged.",
        plan.to_create, plan.to_update, plan.to_destroy, plan.orphaned, plan.unchanged
    );
}

fn cmd_deploy(
    file: &Path,
    state_dir: &Path,
    out: &Path,
    stack_filter: Option<&str>,
    phase: PhaseSelect,
    force: bool,
    dry_run: bool,
) -> Result<(), String> {
    let config = parse_and_validate(file)?;

    let cfg = executor::DeployConfig {
        config: &config,
        state_dir,
        out_dir: out,
        phase,
        force,
        dry_run,
        stack_filter,
    };

    let results = executor::deploy(&cfg)?;

    if dry_run {
        for result in &results {
            println!("{} ({}): would deploy", result.stack, result.phase);
        }
        println!("Dry run: no changes deployed.");
        return Ok(());
    }

    let mut total_converged = 0;
    let mut total_unchanged = 0;
    let mut total_failed = 0;

    for result in &results {
        println!(
            "{} ({}): {} converged, {} unchanged, {} failed, {} exported ({:.1}s)",
            result.stack,
            result.phase,
            result.resources_converged,
            result.resources_unchanged,
            result.resources_failed,
            result.exports_published,
            result.total_duration.as_secs_f64()
        );
        total_converged += result.resources_converged;
        total_unchanged += result.resources_unchanged;
        total_failed += result.resources_failed;
    }

    println!();
    if total_failed > 0 {
        println!(
            "Deploy completed with errors: {} converged, {} unchanged, {} FAILED",
            total_converged, total_unchanged, total_failed
        );
        return Err(format!("{} resource(s) failed", total_failed));
    }

    println!(
        "Deploy complete: {} converged, {} unchanged.",
        total_converged, total_unchanged
    );
    Ok(())
}

fn selected_stacks(state_dir: &Path, stack_filter: Option<&str>) -> Result<Vec<String>, String> {
    Ok(state::locked_stacks(state_dir)?
        .into_iter()
        .filter(|s| stack_filter.is_none_or(|f| f == s.as_str()))
        .collect())
}

fn cmd_status(state_dir: &Path, stack_filter: Option<&str>) -> Result<(), String> {
    let mut found = false;

    for name in selected_stacks(state_dir, stack_filter)? {
        let Some(lock) = state::load_lock(state_dir, &name)? else {
            continue;
        };
        found = true;
        println!("Stack: {}", lock.stack);
        println!("  Generated: {}", lock.generated_at);
        println!("  Generator: {}", lock.generator);
        if let Some(ref path) = lock.template_path {
            println!("  Template:  {}", path);
        }
        println!("  Resources: {}", lock.resources.len());

        for (id, rl) in &lock.resources {
            let duration = rl
                .duration_seconds
                .map(|d| format!(" ({:.3}s)", d))
                .unwrap_or_default();
            let physical = rl
                .physical_id
                .as_deref()
                .map(|p| format!(" -> {}", p))
                .unwrap_or_default();
            println!("    {}: {} [{}]{}{}", id, rl.status, rl.kind, physical, duration);
        }
        for (name, value) in &lock.outputs {
            println!("  Output {} = {}", name, value);
        }
        println!();
    }

    if !found {
        println!("No state found. Run `stackwright deploy` first.");
    }

    Ok(())
}

fn cmd_exports(state_dir: &Path) -> Result<(), String> {
    let registry = state::load_exports(state_dir)?;
    if registry.exports.is_empty() {
        println!("No exports published.");
        return Ok(());
    }
    for (name, entry) in &registry.exports {
        println!("{} = {}", name, entry.value);
        println!("  from {} at {}", entry.stack, entry.published_at);
    }
    Ok(())
}

fn cmd_grants(file: &Path, stack_filter: Option<&str>) -> Result<(), String> {
    let config = parse_and_validate(file)?;
    let graph = compose_checked(&config)?;
    for (id, stack) in &graph.stacks {
        if stack_filter.is_some_and(|f| f != id.as_str()) || stack.grants.is_empty() {
            continue;
        }
        println!("{}:", id);
        for grant in &stack.grants {
            let resource =
                codegen::render_value(&grant.permission.resource(), id, RenderMode::Symbolic)?;
            println!(
                "  {} {} [{}] on {}",
                grant.principal,
                grant.permission.label(),
                grant.permission.actions().join(", "),
                resource
            );
        }
    }
    Ok(())
}

fn cmd_drift(state_dir: &Path, stack_filter: Option<&str>, tripwire_mode: bool) -> Result<(), String> {
    if !state_dir.exists() {
        return Err(format!("cannot read state dir {}", state_dir.display()));
    }
    let mut total_drift = 0;

    for name in selected_stacks(state_dir, stack_filter)? {
        let Some(mut lock) = state::load_lock(state_dir, &name)? else {
            continue;
        };
        println!("Checking {} ({} resources)...", name, lock.resources.len());
        let findings = drift::detect_drift(&lock);

        if findings.is_empty() {
            println!("  No drift detected.");
            continue;
        }
        for f in &findings {
            println!("  DRIFTED: {} ({})", f.resource_id, f.detail);
            println!("    Expected: {}", f.expected_hash);
            println!("    Actual:   {}", f.actual_hash);
            eventlog::append_event(
                state_dir,
                &name,
                ProvenanceEvent::DriftDetected {
                    stack: name.clone(),
                    resource: f.resource_id.clone(),
                    expected_hash: f.expected_hash.clone(),
                    actual_hash: f.actual_hash.clone(),
                },
            )?;
            if let Some(rl) = lock.resources.get_mut(&f.resource_id) {
                rl.status = ResourceStatus::Drifted;
            }
        }
        state::save_lock(state_dir, &lock)?;
        total_drift += findings.len();
    }

    if total_drift > 0 {
        println!();
        println!("Drift detected: {} finding(s)", total_drift);
        if tripwire_mode {
            return Err(format!("{} drift finding(s)", total_drift));
        }
    } else {
        println!("No drift detected.");
    }

    Ok(())
}

fn cmd_schema() -> Result<(), String> {
    let schema = schemars::schema_for!(types::StackwrightConfig);
    let json =
        serde_json::to_string_pretty(&schema).map_err(|e| format!("JSON serialize error: {}", e))?;
    println!("{}", json);
    Ok(())
}
