//! Resource graph: stacks of typed resource nodes, grants, and outputs.
//!
//! Property values may point at other resources (`Ref`) or at values
//! published by another deploy pass (`Import`). Cross-stack `Ref`s are the
//! edges of the stack dependency DAG; `Import`s are not.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Table,
    Bucket,
    UserPool,
    Function,
    Role,
    Policy,
    Rule,
    Vpc,
    Subnet,
    Cluster,
    AutoScalingGroup,
    Repository,
    TaskDefinition,
    Service,
    LoadBalancer,
    Listener,
    TargetGroup,
}

impl ResourceKind {
    /// Provider resource type name.
    pub fn provider_type(&self) -> &'static str {
        match self {
            Self::Table => "AWS::DynamoDB::Table",
            Self::Bucket => "AWS::S3::Bucket",
            Self::UserPool => "AWS::Cognito::UserPool",
            Self::Function => "AWS::Lambda::Function",
            Self::Role => "AWS::IAM::Role",
            Self::Policy => "AWS::IAM::Policy",
            Self::Rule => "AWS::Events::Rule",
            Self::Vpc => "AWS::EC2::VPC",
            Self::Subnet => "AWS::EC2::Subnet",
            Self::Cluster => "AWS::ECS::Cluster",
            Self::AutoScalingGroup => "AWS::AutoScaling::AutoScalingGroup",
            Self::Repository => "AWS::ECR::Repository",
            Self::TaskDefinition => "AWS::ECS::TaskDefinition",
            Self::Service => "AWS::ECS::Service",
            Self::LoadBalancer => "AWS::ElasticLoadBalancingV2::LoadBalancer",
            Self::Listener => "AWS::ElasticLoadBalancingV2::Listener",
            Self::TargetGroup => "AWS::ElasticLoadBalancingV2::TargetGroup",
        }
    }

    /// Service segment of the resource's ARN.
    pub fn arn_service(&self) -> &'static str {
        match self {
            Self::Table => "dynamodb",
            Self::Bucket => "s3",
            Self::UserPool => "cognito-idp",
            Self::Function => "lambda",
            Self::Role | Self::Policy => "iam",
            Self::Rule => "events",
            Self::Vpc | Self::Subnet => "ec2",
            Self::Cluster | Self::TaskDefinition | Self::Service => "ecs",
            Self::AutoScalingGroup => "autoscaling",
            Self::Repository => "ecr",
            Self::LoadBalancer | Self::Listener | Self::TargetGroup => "elasticloadbalancing",
        }
    }

    /// Referenced by identifier, never created by a deploy.
    pub fn is_external(&self) -> bool {
        matches!(self, Self::Bucket | Self::UserPool | Self::Repository)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Table => "table",
            Self::Bucket => "bucket",
            Self::UserPool => "user_pool",
            Self::Function => "function",
            Self::Role => "role",
            Self::Policy => "policy",
            Self::Rule => "rule",
            Self::Vpc => "vpc",
            Self::Subnet => "subnet",
            Self::Cluster => "cluster",
            Self::AutoScalingGroup => "auto_scaling_group",
            Self::Repository => "repository",
            Self::TaskDefinition => "task_definition",
            Self::Service => "service",
            Self::LoadBalancer => "load_balancer",
            Self::Listener => "listener",
            Self::TargetGroup => "target_group",
        };
        write!(f, "{}", s)
    }
}

/// Attribute of a resource another resource can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    Name,
    Arn,
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name => write!(f, "Name"),
            Self::Arn => write!(f, "Arn"),
        }
    }
}

/// Pointer at an attribute of a resource in some stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    pub stack: String,
    pub logical_id: String,
    pub attribute: Attribute,
}

impl ResourceRef {
    pub fn new(stack: &str, logical_id: &str, attribute: Attribute) -> Self {
        Self {
            stack: stack.to_string(),
            logical_id: logical_id.to_string(),
            attribute,
        }
    }

    /// Same resource, different attribute.
    pub fn with_attribute(&self, attribute: Attribute) -> Self {
        Self {
            attribute,
            ..self.clone()
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}.{}", self.stack, self.logical_id, self.attribute)
    }
}

/// A property value in a resource definition.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    Str(String),
    Num(i64),
    Bool(bool),
    List(Vec<PropValue>),
    Map(IndexMap<String, PropValue>),
    /// Concatenation of parts (literal text around references)
    Join(Vec<PropValue>),
    Ref(ResourceRef),
    /// Value published under an export name by another pass
    Import(String),
}

impl PropValue {
    pub fn str(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }

    /// Collect every resource reference inside this value.
    pub fn collect_refs<'a>(&'a self, out: &mut Vec<&'a ResourceRef>) {
        match self {
            Self::Ref(r) => out.push(r),
            Self::List(items) | Self::Join(items) => {
                for item in items {
                    item.collect_refs(out);
                }
            }
            Self::Map(map) => {
                for v in map.values() {
                    v.collect_refs(out);
                }
            }
            Self::Str(_) | Self::Num(_) | Self::Bool(_) | Self::Import(_) => {}
        }
    }

    /// Collect every import name inside this value.
    pub fn collect_imports<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Import(name) => out.push(name),
            Self::List(items) | Self::Join(items) => {
                for item in items {
                    item.collect_imports(out);
                }
            }
            Self::Map(map) => {
                for v in map.values() {
                    v.collect_imports(out);
                }
            }
            Self::Str(_) | Self::Num(_) | Self::Bool(_) | Self::Ref(_) => {}
        }
    }
}

impl From<&str> for PropValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for PropValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for PropValue {
    fn from(n: i64) -> Self {
        Self::Num(n)
    }
}

impl From<bool> for PropValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<ResourceRef> for PropValue {
    fn from(r: ResourceRef) -> Self {
        Self::Ref(r)
    }
}

/// A resource declared in a stack.
#[derive(Debug, Clone)]
pub struct ResourceNode {
    pub logical_id: String,
    pub kind: ResourceKind,
    pub properties: IndexMap<String, PropValue>,
}

impl ResourceNode {
    pub fn new(logical_id: &str, kind: ResourceKind) -> Self {
        Self {
            logical_id: logical_id.to_string(),
            kind,
            properties: IndexMap::new(),
        }
    }

    /// Builder-style property setter.
    pub fn prop(mut self, key: &str, value: impl Into<PropValue>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&PropValue> {
        self.properties.get(key)
    }

    /// Literal string property, if set to one.
    pub fn str_prop(&self, key: &str) -> Option<&str> {
        match self.properties.get(key) {
            Some(PropValue::Str(s)) => Some(s),
            _ => None,
        }
    }
}

/// A permission granted to a principal role.
#[derive(Debug, Clone, PartialEq)]
pub enum Permission {
    /// Read-write data access on a table
    TableReadWrite { table: ResourceRef },
    /// Outbound transactional email to any recipient
    SendEmail,
    /// Invoke another function (by ARN reference or import)
    Invoke { function: PropValue },
    /// Any identity-pool operation on the pool
    IdentityPoolAccess { user_pool: ResourceRef },
}

impl Permission {
    pub fn actions(&self) -> &'static [&'static str] {
        match self {
            Self::TableReadWrite { .. } => &[
                "dynamodb:BatchGetItem",
                "dynamodb:GetRecords",
                "dynamodb:GetShardIterator",
                "dynamodb:Query",
                "dynamodb:GetItem",
                "dynamodb:Scan",
                "dynamodb:ConditionCheckItem",
                "dynamodb:BatchWriteItem",
                "dynamodb:PutItem",
                "dynamodb:UpdateItem",
                "dynamodb:DeleteItem",
                "dynamodb:DescribeTable",
            ],
            Self::SendEmail => &["ses:SendEmail", "ses:SendRawEmail"],
            Self::Invoke { .. } => &["lambda:InvokeFunction"],
            Self::IdentityPoolAccess { .. } => &["cognito-idp:*"],
        }
    }

    /// Resource the statement applies to.
    pub fn resource(&self) -> PropValue {
        match self {
            Self::TableReadWrite { table } => PropValue::Ref(table.with_attribute(Attribute::Arn)),
            Self::SendEmail => PropValue::str("*"),
            Self::Invoke { function } => function.clone(),
            Self::IdentityPoolAccess { user_pool } => {
                PropValue::Ref(user_pool.with_attribute(Attribute::Arn))
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::TableReadWrite { .. } => "table-read-write",
            Self::SendEmail => "send-email",
            Self::Invoke { .. } => "invoke",
            Self::IdentityPoolAccess { .. } => "identity-pool",
        }
    }
}

/// A permission attached to a role in the same stack.
#[derive(Debug, Clone, PartialEq)]
pub struct Grant {
    /// Logical id of the principal role
    pub principal: String,
    pub permission: Permission,
}

/// A stack output, optionally exported under a global name.
#[derive(Debug, Clone)]
pub struct Output {
    pub value: PropValue,
    pub export_name: Option<String>,
}

/// Which composition produced a stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackKind {
    Storage,
    Identity,
    Compute,
    Schedule,
    Gateway,
}

impl fmt::Display for StackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage => write!(f, "storage"),
            Self::Identity => write!(f, "identity"),
            Self::Compute => write!(f, "compute"),
            Self::Schedule => write!(f, "schedule"),
            Self::Gateway => write!(f, "gateway"),
        }
    }
}

/// One deployable stack.
#[derive(Debug, Clone)]
pub struct StackTemplate {
    pub id: String,
    pub kind: StackKind,
    pub resources: IndexMap<String, ResourceNode>,
    pub grants: Vec<Grant>,
    pub outputs: IndexMap<String, Output>,
}

impl StackTemplate {
    pub fn new(id: &str, kind: StackKind) -> Self {
        Self {
            id: id.to_string(),
            kind,
            resources: IndexMap::new(),
            grants: Vec::new(),
            outputs: IndexMap::new(),
        }
    }

    /// Add a resource, returning a reference to its given attribute.
    pub fn add(&mut self, node: ResourceNode, attribute: Attribute) -> ResourceRef {
        let r = ResourceRef::new(&self.id, &node.logical_id, attribute);
        self.resources.insert(node.logical_id.clone(), node);
        r
    }

    pub fn grant(&mut self, principal: &str, permission: Permission) {
        self.grants.push(Grant {
            principal: principal.to_string(),
            permission,
        });
    }

    /// Grants held by one principal.
    pub fn grants_for<'a>(&'a self, principal: &'a str) -> impl Iterator<Item = &'a Grant> + 'a {
        self.grants.iter().filter(move |g| g.principal == principal)
    }

    /// Every reference made anywhere in this stack.
    pub fn references(&self) -> Vec<&ResourceRef> {
        let mut refs = Vec::new();
        for node in self.resources.values() {
            for v in node.properties.values() {
                v.collect_refs(&mut refs);
            }
        }
        for g in &self.grants {
            match &g.permission {
                Permission::TableReadWrite { table } => refs.push(table),
                Permission::IdentityPoolAccess { user_pool } => refs.push(user_pool),
                Permission::Invoke { function } => function.collect_refs(&mut refs),
                Permission::SendEmail => {}
            }
        }
        for o in self.outputs.values() {
            o.value.collect_refs(&mut refs);
        }
        refs
    }

    /// Import names consumed by this stack (deduplicated, first-seen order).
    pub fn imports(&self) -> Vec<String> {
        let mut names: Vec<&str> = Vec::new();
        for node in self.resources.values() {
            for v in node.properties.values() {
                v.collect_imports(&mut names);
            }
        }
        for g in &self.grants {
            if let Permission::Invoke { function } = &g.permission {
                function.collect_imports(&mut names);
            }
        }
        let mut out: Vec<String> = Vec::new();
        for n in names {
            if !out.iter().any(|e| e == n) {
                out.push(n.to_string());
            }
        }
        out
    }

    /// Other stacks this stack references (sorted, deduplicated).
    pub fn dependencies(&self) -> Vec<String> {
        let mut deps: Vec<String> = self
            .references()
            .into_iter()
            .filter(|r| r.stack != self.id)
            .map(|r| r.stack.clone())
            .collect();
        deps.sort();
        deps.dedup();
        deps
    }
}

/// The composed graph of all stacks.
#[derive(Debug, Clone)]
pub struct ResourceGraph {
    pub name: String,
    pub stacks: IndexMap<String, StackTemplate>,
}

impl ResourceGraph {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            stacks: IndexMap::new(),
        }
    }

    pub fn insert(&mut self, stack: StackTemplate) {
        self.stacks.insert(stack.id.clone(), stack);
    }

    pub fn resource(&self, r: &ResourceRef) -> Option<&ResourceNode> {
        self.stacks.get(&r.stack)?.resources.get(&r.logical_id)
    }

    /// Export name → (owning stack, value) for every exported output.
    pub fn exports(&self) -> IndexMap<String, (String, PropValue)> {
        let mut out = IndexMap::new();
        for stack in self.stacks.values() {
            for o in stack.outputs.values() {
                if let Some(ref name) = o.export_name {
                    out.insert(name.clone(), (stack.id.clone(), o.value.clone()));
                }
            }
        }
        out
    }

    /// Total resource count across stacks.
    pub fn resource_count(&self) -> usize {
        self.stacks.values().map(|s| s.resources.len()).sum()
    }
}
