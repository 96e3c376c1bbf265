//! Declaration schema, lock state, plan, and provenance types.
//!
//! Everything a `stackwright.yaml` can say lives here, together with the
//! per-stack lock files and the export registry written by deploys.
//! All declaration types derive Serialize/Deserialize for YAML roundtripping
//! and JsonSchema for `stackwright schema`.

use crate::core::graph::ResourceKind;
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Execution timeout applied to every function.
pub const FUNCTION_TIMEOUT_SECS: i64 = 10;

/// Period of the scheduled trigger, in days.
pub const SCHEDULE_RATE_DAYS: i64 = 1;

// ============================================================================
// Top-level stackwright.yaml
// ============================================================================

/// Root declaration: the desired composition of stacks.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StackwrightConfig {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Human-readable application name
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Prefix prepended to every stack id (e.g. "AnalysisAndDesign")
    #[serde(default)]
    pub prefix: String,

    /// Global parameters (templatable)
    #[serde(default)]
    #[schemars(with = "HashMap<String, serde_json::Value>")]
    pub params: HashMap<String, serde_yaml_ng::Value>,

    /// Account and region the graph is deployed into
    #[serde(default)]
    pub target: Target,

    /// Shared tables and the code bucket
    pub storage: StorageSpec,

    /// Externally managed identity pool
    #[serde(default)]
    pub identity: Option<IdentitySpec>,

    /// Per-function compute stacks (order-preserving)
    #[serde(default)]
    pub functions: IndexMap<String, FunctionSpec>,

    /// Published identifiers: export name → reference template
    #[serde(default)]
    pub exports: IndexMap<String, String>,

    /// Scheduled trigger wrapping one more function
    #[serde(default)]
    pub schedule: Option<ScheduleSpec>,

    /// Container-hosted gateway
    #[serde(default)]
    pub gateway: Option<GatewaySpec>,

    /// Deploy policy
    #[serde(default)]
    pub policy: Policy,
}

/// Deployment target.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Target {
    #[serde(default = "default_account")]
    pub account: String,

    #[serde(default = "default_region")]
    pub region: String,
}

impl Default for Target {
    fn default() -> Self {
        Self {
            account: default_account(),
            region: default_region(),
        }
    }
}

fn default_account() -> String {
    "000000000000".to_string()
}

fn default_region() -> String {
    "eu-west-1".to_string()
}

// ============================================================================
// Storage
// ============================================================================

/// Storage stack declaration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StorageSpec {
    /// Pre-existing code bucket (referenced, never created)
    pub bucket: BucketRef,

    /// Tables keyed by id (e.g. "master", "sessions")
    pub tables: IndexMap<String, TableSpec>,
}

/// Reference to an externally owned object store.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BucketRef {
    pub name: String,

    /// Defaults to `arn:aws:s3:::{name}`
    #[serde(default)]
    pub arn: Option<String>,
}

impl BucketRef {
    pub fn resolved_arn(&self) -> String {
        self.arn
            .clone()
            .unwrap_or_else(|| format!("arn:aws:s3:::{}", self.name))
    }
}

/// Key-value table descriptor.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TableSpec {
    pub partition_key: String,

    #[serde(default)]
    pub sort_key: Option<String>,

    /// Fixed physical name; generated when absent
    #[serde(default)]
    pub table_name: Option<String>,

    #[serde(default)]
    pub removal: RemovalPolicy,
}

/// What happens to a table when it leaves the graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RemovalPolicy {
    #[default]
    Retain,
    Destroy,
}

impl fmt::Display for RemovalPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retain => write!(f, "Retain"),
            Self::Destroy => write!(f, "Delete"),
        }
    }
}

// ============================================================================
// Identity
// ============================================================================

/// Imported identity pool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IdentitySpec {
    pub user_pool_id: String,

    #[serde(default)]
    pub client_id: Option<String>,
}

// ============================================================================
// Compute
// ============================================================================

/// A packaged function deployed from the code bucket.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FunctionSpec {
    /// Fixed physical function name; generated when absent
    #[serde(default)]
    pub function_name: Option<String>,

    /// Object key of the zip in the code bucket
    pub source: String,

    #[serde(default = "default_runtime")]
    pub runtime: String,

    #[serde(default = "default_handler")]
    pub handler: String,

    /// Table id granted read-write access
    #[serde(default = "default_table")]
    pub table: String,

    /// Environment key that receives the table's resolved name
    #[serde(default = "default_table_env")]
    pub table_env: String,

    /// Attach outbound mail permission
    #[serde(default)]
    pub send_email: bool,

    /// Extra environment (templatable)
    #[serde(default)]
    pub environment: IndexMap<String, String>,
}

fn default_runtime() -> String {
    "python3.9".to_string()
}

fn default_handler() -> String {
    "src/index.handler".to_string()
}

fn default_table() -> String {
    "master".to_string()
}

fn default_table_env() -> String {
    "MASTER_DB".to_string()
}

// ============================================================================
// Schedule
// ============================================================================

/// Once-daily trigger bound to one function.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ScheduleSpec {
    /// Id of the wrapped function (e.g. "update_orders")
    pub id: String,

    pub function: FunctionSpec,

    /// Function ids the triggered function may invoke
    #[serde(default)]
    pub invokes: Vec<String>,

    /// Attach identity-pool-wide access to the function's role
    #[serde(default)]
    pub identity_pool: bool,
}

// ============================================================================
// Gateway
// ============================================================================

/// Load-balanced container service.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GatewaySpec {
    #[serde(default = "default_max_azs")]
    pub max_azs: u8,

    #[serde(default = "default_instance_type")]
    pub instance_type: String,

    #[serde(default)]
    pub capacity: Capacity,

    pub image: ImageRef,

    #[serde(default = "default_memory_mib")]
    pub memory_mib: u32,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Container environment (templatable)
    #[serde(default)]
    pub environment: IndexMap<String, String>,

    /// Function ids the container may invoke
    #[serde(default)]
    pub invokes: Vec<String>,

    /// Attach identity-pool-wide access to the task role
    #[serde(default)]
    pub identity_pool: bool,
}

fn default_max_azs() -> u8 {
    2
}

fn default_instance_type() -> String {
    "t4g.nano".to_string()
}

fn default_memory_mib() -> u32 {
    256
}

fn default_port() -> u16 {
    80
}

/// Manually sized cluster capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Capacity {
    pub min: u32,
    pub max: u32,
    pub desired: u32,
}

impl Default for Capacity {
    fn default() -> Self {
        Self {
            min: 1,
            max: 2,
            desired: 1,
        }
    }
}

/// Image in an existing registry repository.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ImageRef {
    pub repository: String,

    #[serde(default = "default_tag")]
    pub tag: String,
}

fn default_tag() -> String {
    "latest".to_string()
}

// ============================================================================
// Policy
// ============================================================================

/// Deploy policy.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Policy {
    /// How `{{import.X}}` references are resolved
    #[serde(default)]
    pub resolution: Resolution,

    /// Failure handling
    #[serde(default)]
    pub failure: FailurePolicy,

    /// Append provenance events on every deploy
    #[serde(default = "default_true")]
    pub tripwire: bool,

    /// Persist BLAKE3 state after deploy
    #[serde(default = "default_true")]
    pub lock_file: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            resolution: Resolution::default(),
            failure: FailurePolicy::default(),
            tripwire: true,
            lock_file: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Import resolution mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Imports of exports produced in the same graph become direct references
    #[default]
    SinglePass,
    /// Exports are published in phase 1 and consumed in phase 2
    TwoPhase,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SinglePass => write!(f, "single_pass"),
            Self::TwoPhase => write!(f, "two_phase"),
        }
    }
}

/// Failure handling strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    StopOnFirst,
    ContinueIndependent,
}

// ============================================================================
// State / Lock file
// ============================================================================

/// Per-stack state lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackLock {
    /// Schema version
    pub schema: String,

    /// Stack id
    pub stack: String,

    /// When the lock was generated
    pub generated_at: String,

    /// Generator version
    pub generator: String,

    /// BLAKE3 version
    pub blake3_version: String,

    /// Template file written on the last deploy
    #[serde(default)]
    pub template_path: Option<String>,

    /// BLAKE3 of that template file
    #[serde(default)]
    pub template_hash: Option<String>,

    /// Per-resource state
    pub resources: IndexMap<String, ResourceLock>,

    /// Resolved output values
    #[serde(default)]
    pub outputs: IndexMap<String, String>,
}

/// Per-resource lock entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLock {
    /// Resource kind
    #[serde(rename = "type")]
    pub kind: ResourceKind,

    /// Convergence status
    pub status: ResourceStatus,

    /// When the resource was last deployed
    #[serde(default)]
    pub applied_at: Option<String>,

    /// Duration of last deploy in seconds
    #[serde(default)]
    pub duration_seconds: Option<f64>,

    /// BLAKE3 hash of the resource's desired definition
    pub hash: String,

    /// Resolved physical name
    #[serde(default)]
    pub physical_id: Option<String>,

    /// Resolved ARN
    #[serde(default)]
    pub arn: Option<String>,

    /// Resource-specific details
    #[serde(default)]
    pub details: HashMap<String, serde_yaml_ng::Value>,
}

/// Resource convergence status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Converged,
    Failed,
    Drifted,
    Unknown,
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Converged => write!(f, "CONVERGED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Drifted => write!(f, "DRIFTED"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Values published by phase-1 stacks for phase-2 consumers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportRegistry {
    #[serde(default)]
    pub exports: IndexMap<String, ExportEntry>,
}

/// One published export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportEntry {
    pub value: String,
    pub stack: String,
    pub published_at: String,
}

impl ExportRegistry {
    /// Publish (or overwrite) an export.
    pub fn publish(&mut self, name: &str, value: &str, stack: &str, at: &str) {
        self.exports.insert(
            name.to_string(),
            ExportEntry {
                value: value.to_string(),
                stack: stack.to_string(),
                published_at: at.to_string(),
            },
        );
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.exports.get(name).map(|e| e.value.as_str())
    }
}

// ============================================================================
// Plan
// ============================================================================

/// Action to take on a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanAction {
    Create,
    Update,
    Destroy,
    /// Leaves the graph but is retained by its removal policy
    Orphan,
    NoOp,
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Update => write!(f, "UPDATE"),
            Self::Destroy => write!(f, "DESTROY"),
            Self::Orphan => write!(f, "ORPHAN"),
            Self::NoOp => write!(f, "NO-OP"),
        }
    }
}

/// Deploy phase of a stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployPhase {
    /// Publishes identifiers; consumes no imports
    Publish,
    /// Consumes identifiers published earlier
    Consume,
}

impl fmt::Display for DeployPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Publish => write!(f, "publish"),
            Self::Consume => write!(f, "consume"),
        }
    }
}

/// A single planned change.
#[derive(Debug, Clone)]
pub struct PlannedChange {
    /// Stack id
    pub stack: String,

    /// Logical resource id
    pub resource_id: String,

    pub kind: ResourceKind,

    /// Action to take
    pub action: PlanAction,

    /// Human-readable description
    pub description: String,
}

/// Full execution plan.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// Config name
    pub name: String,

    /// Planned changes in stack order
    pub changes: Vec<PlannedChange>,

    /// Topological stack order
    pub stack_order: Vec<String>,

    /// Phase of each stack
    pub phases: IndexMap<String, DeployPhase>,

    /// Summary counts
    pub to_create: u32,
    pub to_update: u32,
    pub to_destroy: u32,
    pub orphaned: u32,
    pub unchanged: u32,
}

// ============================================================================
// Provenance events
// ============================================================================

/// Provenance event for the JSONL event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProvenanceEvent {
    DeployStarted {
        stack: String,
        run_id: String,
        phase: DeployPhase,
        stackwright_version: String,
    },
    ResourceStarted {
        stack: String,
        resource: String,
        action: String,
    },
    ResourceConverged {
        stack: String,
        resource: String,
        duration_seconds: f64,
        hash: String,
    },
    ResourceFailed {
        stack: String,
        resource: String,
        error: String,
    },
    ResourceRemoved {
        stack: String,
        resource: String,
        retained: bool,
    },
    ExportPublished {
        stack: String,
        export: String,
        value: String,
    },
    DeployCompleted {
        stack: String,
        run_id: String,
        resources_converged: u32,
        resources_unchanged: u32,
        resources_failed: u32,
        total_seconds: f64,
    },
    DriftDetected {
        stack: String,
        resource: String,
        expected_hash: String,
        actual_hash: String,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: ProvenanceEvent,
}

// ============================================================================
// Deploy result
// ============================================================================

/// Result of deploying a single stack.
#[derive(Debug, Clone)]
pub struct DeployResult {
    pub stack: String,
    pub phase: DeployPhase,
    pub resources_converged: u32,
    pub resources_unchanged: u32,
    pub resources_failed: u32,
    pub exports_published: u32,
    pub total_duration: std::time::Duration,
}

// ============================================================================
// Template helper
// ============================================================================

/// Convert a serde_yaml_ng::Value to a string for template resolution.
pub fn yaml_value_to_string(val: &serde_yaml_ng::Value) -> String {
    match val {
        serde_yaml_ng::Value::String(s) => s.clone(),
        serde_yaml_ng::Value::Number(n) => n.to_string(),
        serde_yaml_ng::Value::Bool(b) => b.to_string(),
        serde_yaml_ng::Value::Null => String::new(),
        other => format!("{:?}", other),
    }
}

// ============================================================================
// Tests
// ============================================================================
