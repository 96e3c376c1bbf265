//! Gateway stack: load-balanced container service on a small ARM cluster.
//!
//! Network is public subnets only across `max_azs` zones. The task role
//! receives invoke grants on every function passed in.

use super::environment_block;
use crate::core::graph::*;
use crate::core::types::GatewaySpec;
use indexmap::IndexMap;

pub const TASK_ROLE_LOGICAL_ID: &str = "TaskRole";
pub const CONTAINER_NAME: &str = "GatewayContainer";

/// Machine image family for the cluster's instances.
pub const MACHINE_IMAGE: &str = "amazon-linux-2-ecs-optimized-arm64";

/// Inputs to the gateway composition.
#[derive(Debug, Clone)]
pub struct GatewayDef<'a> {
    pub stack_id: String,
    pub spec: &'a GatewaySpec,
    /// Resolved container environment
    pub environment: IndexMap<String, PropValue>,
    /// Functions the container may invoke
    pub invokes: Vec<PropValue>,
    pub user_pool: Option<&'a ResourceRef>,
}

fn port_mapping(port: u16) -> PropValue {
    PropValue::Map(IndexMap::from([
        ("ContainerPort".to_string(), PropValue::Num(i64::from(port))),
        ("HostPort".to_string(), PropValue::Num(i64::from(port))),
        ("Protocol".to_string(), PropValue::str("tcp")),
    ]))
}

pub fn compose(def: GatewayDef<'_>) -> StackTemplate {
    let spec = def.spec;
    let port = i64::from(spec.port);
    let mut t = StackTemplate::new(&def.stack_id, StackKind::Gateway);

    let vpc = t.add(
        ResourceNode::new("Vpc", ResourceKind::Vpc)
            .prop("MaxAzs", i64::from(spec.max_azs))
            .prop("NatGateways", 0i64),
        Attribute::Name,
    );

    let mut subnets = Vec::new();
    for az in 0..spec.max_azs {
        let subnet = t.add(
            ResourceNode::new(&format!("PublicSubnet{}", az + 1), ResourceKind::Subnet)
                .prop("VpcId", PropValue::Ref(vpc.clone()))
                .prop("AvailabilityZoneIndex", i64::from(az))
                .prop("MapPublicIpOnLaunch", true),
            Attribute::Name,
        );
        subnets.push(PropValue::Ref(subnet));
    }

    let cluster = t.add(ResourceNode::new("Cluster", ResourceKind::Cluster), Attribute::Name);

    t.add(
        ResourceNode::new("ClusterCapacity", ResourceKind::AutoScalingGroup)
            .prop("InstanceType", spec.instance_type.as_str())
            .prop("MachineImage", MACHINE_IMAGE)
            .prop("MinSize", i64::from(spec.capacity.min))
            .prop("MaxSize", i64::from(spec.capacity.max))
            .prop("DesiredCapacity", i64::from(spec.capacity.desired))
            .prop("VPCZoneIdentifier", PropValue::List(subnets.clone()))
            .prop("Cluster", PropValue::Ref(cluster.clone())),
        Attribute::Name,
    );

    let repository = t.add(
        ResourceNode::new("Repository", ResourceKind::Repository)
            .prop("RepositoryName", spec.image.repository.as_str()),
        Attribute::Name,
    );

    let task_role = t.add(
        ResourceNode::new(TASK_ROLE_LOGICAL_ID, ResourceKind::Role)
            .prop("AssumeRolePolicyService", "ecs-tasks.amazonaws.com"),
        Attribute::Arn,
    );

    let image = PropValue::Join(vec![
        PropValue::Ref(repository),
        PropValue::Str(format!(":{}", spec.image.tag)),
    ]);
    let container = PropValue::Map(IndexMap::from([
        ("Name".to_string(), PropValue::str(CONTAINER_NAME)),
        ("Image".to_string(), image),
        ("Memory".to_string(), PropValue::Num(i64::from(spec.memory_mib))),
        ("PortMappings".to_string(), PropValue::List(vec![port_mapping(spec.port)])),
        ("Environment".to_string(), environment_block(&def.environment)),
    ]));
    let task = t.add(
        ResourceNode::new("TaskDefinition", ResourceKind::TaskDefinition)
            .prop("TaskRoleArn", PropValue::Ref(task_role))
            .prop("ContainerDefinitions", PropValue::List(vec![container])),
        Attribute::Arn,
    );

    let target_group = t.add(
        ResourceNode::new("ServiceTargetGroup", ResourceKind::TargetGroup)
            .prop("Port", port)
            .prop("Protocol", "HTTP")
            .prop("VpcId", PropValue::Ref(vpc)),
        Attribute::Arn,
    );

    let load_balancer = t.add(
        ResourceNode::new("LoadBalancer", ResourceKind::LoadBalancer)
            .prop("Scheme", "internet-facing")
            .prop("Subnets", PropValue::List(subnets)),
        Attribute::Arn,
    );

    let forward = PropValue::Map(IndexMap::from([
        ("Type".to_string(), PropValue::str("forward")),
        ("TargetGroupArn".to_string(), PropValue::Ref(target_group.clone())),
    ]));
    t.add(
        ResourceNode::new("Listener", ResourceKind::Listener)
            .prop("LoadBalancerArn", PropValue::Ref(load_balancer.clone()))
            .prop("Port", port)
            .prop("Protocol", "HTTP")
            .prop("DefaultActions", PropValue::List(vec![forward])),
        Attribute::Arn,
    );

    let lb_binding = PropValue::Map(IndexMap::from([
        ("ContainerName".to_string(), PropValue::str(CONTAINER_NAME)),
        ("ContainerPort".to_string(), PropValue::Num(port)),
        ("TargetGroupArn".to_string(), PropValue::Ref(target_group)),
    ]));
    t.add(
        ResourceNode::new("Service", ResourceKind::Service)
            .prop("Cluster", PropValue::Ref(cluster))
            .prop("TaskDefinition", PropValue::Ref(task))
            .prop("DesiredCount", 1i64)
            .prop("LoadBalancers", PropValue::List(vec![lb_binding])),
        Attribute::Name,
    );

    for function in def.invokes {
        t.grant(TASK_ROLE_LOGICAL_ID, Permission::Invoke { function });
    }
    if let Some(pool) = def.user_pool {
        t.grant(
            TASK_ROLE_LOGICAL_ID,
            Permission::IdentityPoolAccess {
                user_pool: pool.clone(),
            },
        );
    }

    t.outputs.insert(
        "LoadBalancerDns".to_string(),
        Output {
            value: PropValue::Ref(load_balancer.with_attribute(Attribute::Name)),
            export_name: None,
        },
    );
    t
}

/// Invoke targets granted to the task role.
pub fn invoke_targets(template: &StackTemplate) -> Vec<&PropValue> {
    template
        .grants_for(TASK_ROLE_LOGICAL_ID)
        .filter_map(|g| match &g.permission {
            Permission::Invoke { function } => Some(function),
            _ => None,
        })
        .collect()
}
