//! Deterministic derivation of a tenant's remote resources.
//!
//! Every name, label and port here is a pure function of `(user_id, plan_type)`.
//! Re-running a create for the same tenant therefore always targets the same
//! remote containers, network and volume.

use crate::{PlanType, UserId};
use serde::{Deserialize, Serialize};

pub const USER_IMAGE: &str = "cuwhapp/multi-service:latest";
pub const NAME_PREFIX: &str = "cuwhapp-user";

pub const LABEL_ROLE: &str = "cuwhapp.role";
pub const LABEL_USER: &str = "cuwhapp.user";
pub const LABEL_SERVICE: &str = "cuwhapp.service";
pub const ROLE_USER: &str = "user";

/// Width of each service's host port range
pub const PORT_SLOTS: u16 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Api,
    Warmer,
    Campaign,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 3] = [ServiceKind::Api, ServiceKind::Warmer, ServiceKind::Campaign];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Api => "api",
            ServiceKind::Warmer => "warmer",
            ServiceKind::Campaign => "campaign",
        }
    }

    pub fn container_port(&self) -> u16 {
        match self {
            ServiceKind::Api => 8000,
            ServiceKind::Warmer => 20000,
            ServiceKind::Campaign => 30000,
        }
    }

    fn host_port_base(&self) -> u16 {
        match self {
            ServiceKind::Api => 40000,
            ServiceKind::Warmer => 20000,
            ServiceKind::Campaign => 30000,
        }
    }

    /// Environment variable the multi-service image reads its listen port from
    pub fn port_env(&self) -> &'static str {
        match self {
            ServiceKind::Api => "API_PORT",
            ServiceKind::Warmer => "WARMER_PORT",
            ServiceKind::Campaign => "CAMPAIGN_PORT",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == raw)
    }
}

/// CPU and memory ceiling applied to every service container of a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub cpu_millis: u32,
    pub memory_mib: u32,
}

impl ResourceLimits {
    pub fn for_plan(plan: PlanType) -> Self {
        match plan {
            PlanType::Free => Self {
                cpu_millis: 500,
                memory_mib: 512,
            },
            PlanType::Basic => Self {
                cpu_millis: 1000,
                memory_mib: 1024,
            },
            PlanType::Pro => Self {
                cpu_millis: 2000,
                memory_mib: 2048,
            },
            PlanType::Enterprise => Self {
                cpu_millis: 4000,
                memory_mib: 4096,
            },
        }
    }

    /// Value for `docker run --cpus`
    pub fn cpus_arg(&self) -> String {
        format!("{}.{:03}", self.cpu_millis / 1000, self.cpu_millis % 1000)
    }

    /// Value for `docker run --memory`
    pub fn memory_arg(&self) -> String {
        format!("{}m", self.memory_mib)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub kind: ServiceKind,
    pub container_name: String,
    pub host_port: u16,
    pub container_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerSpec {
    pub user_id: UserId,
    pub plan_type: PlanType,
    pub image: String,
    pub network: String,
    pub volume: String,
    pub restart_policy: &'static str,
    pub limits: ResourceLimits,
    pub services: Vec<ServiceSpec>,
}

impl ContainerSpec {
    pub fn derive(user_id: &UserId, plan_type: PlanType) -> Self {
        let slot = port_slot(user_id);
        let services = ServiceKind::ALL
            .into_iter()
            .map(|kind| ServiceSpec {
                kind,
                container_name: service_container_name(user_id, kind),
                host_port: kind.host_port_base() + slot,
                container_port: kind.container_port(),
            })
            .collect();

        Self {
            user_id: user_id.clone(),
            plan_type,
            image: USER_IMAGE.to_string(),
            network: network_name(user_id),
            volume: volume_name(user_id),
            restart_policy: restart_policy(plan_type),
            limits: ResourceLimits::for_plan(plan_type),
            services,
        }
    }

    pub fn service(&self, kind: ServiceKind) -> Option<&ServiceSpec> {
        self.services.iter().find(|s| s.kind == kind)
    }

    pub fn container_names(&self) -> Vec<&str> {
        self.services
            .iter()
            .map(|s| s.container_name.as_str())
            .collect()
    }
}

pub fn service_container_name(user_id: &UserId, kind: ServiceKind) -> String {
    format!("{}-{}-{}", NAME_PREFIX, user_id, kind.as_str())
}

pub fn network_name(user_id: &UserId) -> String {
    format!("{}-{}-net", NAME_PREFIX, user_id)
}

pub fn volume_name(user_id: &UserId) -> String {
    format!("{}-{}-data", NAME_PREFIX, user_id)
}

/// Resolves a container name back to its service, if it belongs to `user_id`
pub fn parse_service_container_name(user_id: &UserId, name: &str) -> Option<ServiceKind> {
    let prefix = format!("{}-{}-", NAME_PREFIX, user_id);
    name.strip_prefix(&prefix).and_then(ServiceKind::parse)
}

fn restart_policy(plan: PlanType) -> &'static str {
    if plan.is_paid() {
        "unless-stopped"
    } else {
        "no"
    }
}

/// Host port offset shared by the three service ranges.
///
/// The slot is the md5 of the user id folded into `PORT_SLOTS` values, so two
/// user ids can land on the same slot. The second of them then fails to bind
/// its ports on create; names, network and volume never collide.
pub fn port_slot(user_id: &UserId) -> u16 {
    let digest = md5::compute(user_id.as_str().as_bytes());
    let value = u16::from_be_bytes([digest[0], digest[1]]);
    value % PORT_SLOTS
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn user(raw: &str) -> UserId {
        UserId::parse(raw).unwrap()
    }

    #[test]
    fn test_names_follow_convention() {
        let spec = ContainerSpec::derive(&user("tenant-1"), PlanType::Free);
        assert_eq!(
            spec.container_names(),
            vec![
                "cuwhapp-user-tenant-1-api",
                "cuwhapp-user-tenant-1-warmer",
                "cuwhapp-user-tenant-1-campaign",
            ]
        );
        assert_eq!(spec.network, "cuwhapp-user-tenant-1-net");
        assert_eq!(spec.volume, "cuwhapp-user-tenant-1-data");
    }

    #[test]
    fn test_ports_share_one_slot_across_ranges() {
        let id = user("tenant-1");
        let slot = port_slot(&id);
        let spec = ContainerSpec::derive(&id, PlanType::Pro);

        assert_eq!(spec.service(ServiceKind::Api).unwrap().host_port, 40000 + slot);
        assert_eq!(spec.service(ServiceKind::Warmer).unwrap().host_port, 20000 + slot);
        assert_eq!(
            spec.service(ServiceKind::Campaign).unwrap().host_port,
            30000 + slot
        );
        assert_eq!(spec.service(ServiceKind::Api).unwrap().container_port, 8000);
    }

    #[test]
    fn test_restart_policy_and_limits_follow_plan() {
        let id = user("tenant-1");
        let free = ContainerSpec::derive(&id, PlanType::Free);
        let pro = ContainerSpec::derive(&id, PlanType::Pro);

        assert_eq!(free.restart_policy, "no");
        assert_eq!(pro.restart_policy, "unless-stopped");
        assert_eq!(free.limits.cpus_arg(), "0.500");
        assert_eq!(pro.limits.cpus_arg(), "2.000");
        assert_eq!(pro.limits.memory_arg(), "2048m");
    }

    #[test]
    fn test_parse_service_container_name_is_scoped_to_user() {
        let short = user("abc");
        assert_eq!(
            parse_service_container_name(&short, "cuwhapp-user-abc-api"),
            Some(ServiceKind::Api)
        );
        // Another tenant whose id extends this one must not match.
        assert_eq!(
            parse_service_container_name(&short, "cuwhapp-user-abc-def-api"),
            None
        );
    }

    #[test]
    fn test_distinct_users_can_share_a_port_slot() {
        let mut seen: HashMap<u16, UserId> = HashMap::new();
        let (first, second) = (0..=PORT_SLOTS as u32)
            .map(|i| user(&format!("tenant-{i}")))
            .find_map(|id| seen.insert(port_slot(&id), id.clone()).map(|previous| (previous, id)))
            .unwrap();

        let a = ContainerSpec::derive(&first, PlanType::Free);
        let b = ContainerSpec::derive(&second, PlanType::Free);
        assert_ne!(first, second);
        assert_eq!(
            a.service(ServiceKind::Api).unwrap().host_port,
            b.service(ServiceKind::Api).unwrap().host_port
        );
        assert_ne!(a.container_names(), b.container_names());
    }

    fn user_id_strategy() -> impl Strategy<Value = UserId> {
        "[a-zA-Z0-9][a-zA-Z0-9_-]{0,63}".prop_map(|raw| UserId::parse(&raw).unwrap())
    }

    fn plan_strategy() -> impl Strategy<Value = PlanType> {
        prop_oneof![
            Just(PlanType::Free),
            Just(PlanType::Basic),
            Just(PlanType::Pro),
            Just(PlanType::Enterprise),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn property_spec_derivation_is_pure(id in user_id_strategy(), plan in plan_strategy()) {
            prop_assert_eq!(ContainerSpec::derive(&id, plan), ContainerSpec::derive(&id, plan));
        }

        #[test]
        fn property_names_are_collision_free(a in user_id_strategy(), b in user_id_strategy()) {
            prop_assume!(a != b);
            let spec_a = ContainerSpec::derive(&a, PlanType::Free);
            let spec_b = ContainerSpec::derive(&b, PlanType::Free);

            for name in spec_a.container_names() {
                prop_assert!(!spec_b.container_names().contains(&name));
            }
            prop_assert_ne!(spec_a.network, spec_b.network);
            prop_assert_ne!(spec_a.volume, spec_b.volume);
        }

        #[test]
        fn property_ports_stay_in_range(id in user_id_strategy()) {
            let spec = ContainerSpec::derive(&id, PlanType::Basic);
            let api = spec.service(ServiceKind::Api).unwrap().host_port;
            let warmer = spec.service(ServiceKind::Warmer).unwrap().host_port;
            let campaign = spec.service(ServiceKind::Campaign).unwrap().host_port;
            prop_assert!((40000..50000).contains(&api));
            prop_assert!((20000..30000).contains(&warmer));
            prop_assert!((30000..40000).contains(&campaign));
        }
    }
}
