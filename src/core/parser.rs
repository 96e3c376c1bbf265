//! YAML parsing and validation.
//!
//! Parses stackwright.yaml and validates structural constraints:
//! - Version must be "1.0"
//! - Every function's table exists in storage
//! - Invoke targets, exports and template references name known functions/tables
//! - Invoke lists carry no duplicates
//! - Identity-pool access requires an identity section
//! - Gateway capacity satisfies min <= desired <= max

use super::resolver::{self, TemplateVar};
use super::types::*;
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

/// Environment variable overriding `target.account`.
pub const ENV_ACCOUNT: &str = "STACKWRIGHT_ACCOUNT";
/// Environment variable overriding `target.region`.
pub const ENV_REGION: &str = "STACKWRIGHT_REGION";

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl ValidationError {
    pub fn new(message: String) -> Self {
        Self { message }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a stackwright.yaml file from disk.
pub fn parse_config_file(path: &Path) -> Result<StackwrightConfig, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_config(&content)
}

/// Parse a stackwright.yaml from a string.
pub fn parse_config(yaml: &str) -> Result<StackwrightConfig, String> {
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

/// Apply `STACKWRIGHT_ACCOUNT` / `STACKWRIGHT_REGION` overrides.
pub fn apply_env_overrides(config: &mut StackwrightConfig) {
    apply_overrides(
        config,
        std::env::var(ENV_ACCOUNT).ok(),
        std::env::var(ENV_REGION).ok(),
    );
}

fn apply_overrides(config: &mut StackwrightConfig, account: Option<String>, region: Option<String>) {
    if let Some(account) = account.filter(|a| !a.is_empty()) {
        info!("{ENV_ACCOUNT} set, deploying into account {account}");
        config.target.account = account;
    }
    if let Some(region) = region.filter(|r| !r.is_empty()) {
        info!("{ENV_REGION} set, deploying into region {region}");
        config.target.region = region;
    }
}

/// Validate a parsed config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &StackwrightConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(ValidationError::new(format!(
            "version must be \"1.0\", got \"{}\"",
            config.version
        )));
    }

    if config.name.is_empty() {
        errors.push(ValidationError::new("name must not be empty".to_string()));
    }

    validate_storage(config, &mut errors);

    for (id, function) in &config.functions {
        validate_function(config, id, function, &mut errors);
    }

    if let Some(ref schedule) = config.schedule {
        validate_schedule(config, schedule, &mut errors);
    }

    if let Some(ref gateway) = config.gateway {
        validate_gateway(config, gateway, &mut errors);
    }

    for (name, template) in &config.exports {
        validate_export(config, name, template, &mut errors);
    }

    errors
}

fn validate_storage(config: &StackwrightConfig, errors: &mut Vec<ValidationError>) {
    if config.storage.bucket.name.is_empty() {
        errors.push(ValidationError::new("storage bucket has no name".to_string()));
    }
    if config.storage.tables.is_empty() {
        errors.push(ValidationError::new("storage declares no tables".to_string()));
    }
    for (id, table) in &config.storage.tables {
        if table.partition_key.is_empty() {
            errors.push(ValidationError::new(format!(
                "table '{}' has no partition key",
                id
            )));
        }
        if table.sort_key.as_deref() == Some(table.partition_key.as_str()) {
            errors.push(ValidationError::new(format!(
                "table '{}' uses '{}' as both partition and sort key",
                id, table.partition_key
            )));
        }
    }
}

fn validate_function(
    config: &StackwrightConfig,
    id: &str,
    function: &FunctionSpec,
    errors: &mut Vec<ValidationError>,
) {
    if function.source.is_empty() {
        errors.push(ValidationError::new(format!(
            "function '{}' has no source key",
            id
        )));
    }
    if !config.storage.tables.contains_key(&function.table) {
        errors.push(ValidationError::new(format!(
            "function '{}' references unknown table '{}'",
            id, function.table
        )));
    }
    if function.table_env.is_empty() {
        errors.push(ValidationError::new(format!(
            "function '{}' has an empty table_env key",
            id
        )));
    }
    for (key, template) in &function.environment {
        validate_template(config, &format!("function '{}' env {}", id, key), template, errors);
    }
}

fn validate_schedule(
    config: &StackwrightConfig,
    schedule: &ScheduleSpec,
    errors: &mut Vec<ValidationError>,
) {
    if config.functions.contains_key(&schedule.id) {
        errors.push(ValidationError::new(format!(
            "schedule id '{}' collides with a function id",
            schedule.id
        )));
    }
    validate_function(config, &schedule.id, &schedule.function, errors);
    let mut seen = HashSet::new();
    for target in &schedule.invokes {
        if !config.functions.contains_key(target) {
            errors.push(ValidationError::new(format!(
                "schedule '{}' invokes unknown function '{}'",
                schedule.id, target
            )));
        }
        if !seen.insert(target) {
            errors.push(ValidationError::new(format!(
                "schedule '{}' invokes '{}' more than once",
                schedule.id, target
            )));
        }
    }
    if schedule.identity_pool && config.identity.is_none() {
        errors.push(ValidationError::new(format!(
            "schedule '{}' requests identity-pool access but no identity is declared",
            schedule.id
        )));
    }
}

fn validate_gateway(
    config: &StackwrightConfig,
    gateway: &GatewaySpec,
    errors: &mut Vec<ValidationError>,
) {
    let c = &gateway.capacity;
    if c.max == 0 || c.min > c.desired || c.desired > c.max {
        errors.push(ValidationError::new(format!(
            "gateway capacity must satisfy min <= desired <= max and max > 0 (got {}/{}/{})",
            c.min, c.desired, c.max
        )));
    }
    if gateway.max_azs == 0 {
        errors.push(ValidationError::new("gateway max_azs must be at least 1".to_string()));
    }
    if gateway.port == 0 {
        errors.push(ValidationError::new("gateway port must be non-zero".to_string()));
    }
    if gateway.memory_mib == 0 {
        errors.push(ValidationError::new("gateway memory_mib must be non-zero".to_string()));
    }
    if gateway.image.repository.is_empty() {
        errors.push(ValidationError::new("gateway image has no repository".to_string()));
    }
    let mut seen = HashSet::new();
    for target in &gateway.invokes {
        if !is_function_id(config, target) {
            errors.push(ValidationError::new(format!(
                "gateway invokes unknown function '{}'",
                target
            )));
        }
        if !seen.insert(target) {
            errors.push(ValidationError::new(format!(
                "gateway invokes '{}' more than once",
                target
            )));
        }
    }
    if gateway.identity_pool && config.identity.is_none() {
        errors.push(ValidationError::new(
            "gateway requests identity-pool access but no identity is declared".to_string(),
        ));
    }
    for (key, template) in &gateway.environment {
        validate_template(config, &format!("gateway env {}", key), template, errors);
    }
}

fn validate_export(
    config: &StackwrightConfig,
    name: &str,
    template: &str,
    errors: &mut Vec<ValidationError>,
) {
    match resolver::parse_template(template) {
        Ok(segments) => {
            let single_ref = matches!(
                segments.as_slice(),
                [resolver::Segment::Var(TemplateVar::Table { .. })]
                    | [resolver::Segment::Var(TemplateVar::Function { .. })]
            );
            if !single_ref {
                errors.push(ValidationError::new(format!(
                    "export '{}' must be a single table or function reference",
                    name
                )));
            }
        }
        Err(e) => errors.push(ValidationError::new(format!("export '{}': {}", name, e))),
    }
    validate_template(config, &format!("export '{}'", name), template, errors);
}

fn is_function_id(config: &StackwrightConfig, id: &str) -> bool {
    config.functions.contains_key(id)
        || config.schedule.as_ref().is_some_and(|s| s.id == id)
}

/// Check every variable in a template names something declared.
fn validate_template(
    config: &StackwrightConfig,
    context: &str,
    template: &str,
    errors: &mut Vec<ValidationError>,
) {
    let segments = match resolver::parse_template(template) {
        Ok(s) => s,
        Err(e) => {
            errors.push(ValidationError::new(format!("{}: {}", context, e)));
            return;
        }
    };

    for segment in segments {
        let var = match segment {
            resolver::Segment::Var(v) => v,
            resolver::Segment::Literal(_) => continue,
        };
        let problem = match var {
            TemplateVar::Param(ref key) if !config.params.contains_key(key) => {
                Some(format!("unknown param '{}'", key))
            }
            TemplateVar::Table { ref id, .. } if !config.storage.tables.contains_key(id) => {
                Some(format!("unknown table '{}'", id))
            }
            TemplateVar::Function { ref id, .. } if !is_function_id(config, id) => {
                Some(format!("unknown function '{}'", id))
            }
            TemplateVar::UserPoolId if config.identity.is_none() => {
                Some("identity.user_pool_id used but no identity is declared".to_string())
            }
            _ => None,
        };
        if let Some(p) = problem {
            errors.push(ValidationError::new(format!("{}: {}", context, p)));
        }
    }
}
