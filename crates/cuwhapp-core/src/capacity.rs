//! Capacity accounting and instance selection policy.
//!
//! Everything in this module is pure: it works on a snapshot of instances
//! that the caller has just re-queried from the WAHA host.

use crate::waha::{WahaInstance, DEFAULT_MAX_SESSIONS};
use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::debug;

/// Session usage of one instance as last observed on the remote host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capacity {
    pub used: u32,
    pub max: u32,
}

impl Capacity {
    pub fn remaining(&self) -> u32 {
        self.max.saturating_sub(self.used)
    }

    pub fn is_overcommitted(&self) -> bool {
        self.used > self.max
    }

    pub fn can_absorb(&self, sessions: u32) -> bool {
        self.remaining() >= sessions
    }
}

impl From<&WahaInstance> for Capacity {
    fn from(instance: &WahaInstance) -> Self {
        Self {
            used: instance.used_sessions,
            max: instance.max_sessions,
        }
    }
}

/// Validated, strictly positive session demand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionRequest(u32);

impl SessionRequest {
    pub fn new(sessions_needed: i64) -> Result<Self> {
        if sessions_needed <= 0 {
            return Err(CoreError::InvalidSessionCount(format!(
                "sessions_needed must be positive, got {}",
                sessions_needed
            )));
        }
        u32::try_from(sessions_needed)
            .map(Self)
            .map_err(|_| {
                CoreError::InvalidSessionCount(format!(
                    "sessions_needed {} is out of range",
                    sessions_needed
                ))
            })
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Smallest sufficient remaining capacity wins
    #[default]
    BestFit,
    /// Lowest id with sufficient remaining capacity wins
    FirstFit,
}

impl FromStr for SelectionStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "best_fit" => Ok(SelectionStrategy::BestFit),
            "first_fit" => Ok(SelectionStrategy::FirstFit),
            other => Err(format!("unknown selection strategy: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SelectionPolicy {
    pub strategy: SelectionStrategy,
    /// Sessions that must stay free on an instance after placing the request
    pub headroom: u32,
}

impl SelectionPolicy {
    pub fn best_fit() -> Self {
        Self::default()
    }

    pub fn with_headroom(mut self, headroom: u32) -> Self {
        self.headroom = headroom;
        self
    }

    pub fn required_free(&self, request: SessionRequest) -> u32 {
        request.get().saturating_add(self.headroom)
    }
}

/// Instruction to provision a new instance instead of placing on an existing one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateNewDirective {
    /// Smallest `max_sessions` that would satisfy the request
    pub min_max_sessions: u32,
    pub suggested_max_sessions: u32,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Instance(WahaInstance),
    CreateNew(CreateNewDirective),
}

pub fn select_instance(
    instances: &[WahaInstance],
    request: SessionRequest,
    policy: SelectionPolicy,
) -> Selection {
    let required = policy.required_free(request);
    let mut candidates: Vec<&WahaInstance> = instances
        .iter()
        .filter(|instance| instance.remaining() >= required)
        .collect();

    match policy.strategy {
        SelectionStrategy::BestFit => candidates.sort_by_key(|i| (i.remaining(), i.id)),
        SelectionStrategy::FirstFit => candidates.sort_by_key(|i| i.id),
    }

    match candidates.first() {
        Some(chosen) => {
            debug!(
                id = chosen.id,
                remaining = chosen.remaining(),
                required,
                candidates = candidates.len(),
                strategy = ?policy.strategy,
                "Instance selected"
            );
            Selection::Instance((*chosen).clone())
        }
        None => {
            debug!(required, instances = instances.len(), "No instance can absorb the request");
            Selection::CreateNew(CreateNewDirective {
                min_max_sessions: required,
                suggested_max_sessions: required.max(DEFAULT_MAX_SESSIONS),
                reason: format!(
                    "Need {} sessions but no instance has enough space",
                    request.get()
                ),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn instance(id: u32, max: u32, used: u32) -> WahaInstance {
        WahaInstance {
            id,
            host_port: 4499 + id as u16,
            max_sessions: max,
            used_sessions: used,
        }
    }

    fn fleet() -> Vec<WahaInstance> {
        vec![instance(1, 100, 95), instance(2, 50, 10)]
    }

    fn request(n: i64) -> SessionRequest {
        SessionRequest::new(n).unwrap()
    }

    #[test]
    fn test_best_fit_prefers_tightest_instance() {
        let selection = select_instance(&fleet(), request(5), SelectionPolicy::best_fit());
        match selection {
            Selection::Instance(chosen) => assert_eq!(chosen.id, 1),
            other => panic!("expected instance, got {other:?}"),
        }
    }

    #[test]
    fn test_first_fit_prefers_lowest_id() {
        let policy = SelectionPolicy {
            strategy: SelectionStrategy::FirstFit,
            headroom: 0,
        };
        let instances = vec![instance(2, 100, 0), instance(1, 100, 99), instance(3, 10, 0)];
        match select_instance(&instances, request(5), policy) {
            Selection::Instance(chosen) => assert_eq!(chosen.id, 2),
            other => panic!("expected instance, got {other:?}"),
        }
    }

    #[test]
    fn test_no_fit_escalates_to_create_directive() {
        match select_instance(&fleet(), request(60), SelectionPolicy::best_fit()) {
            Selection::CreateNew(directive) => {
                assert!(directive.min_max_sessions >= 60);
                assert!(directive.suggested_max_sessions >= directive.min_max_sessions);
                assert!(directive.reason.contains("60"));
            }
            other => panic!("expected directive, got {other:?}"),
        }
    }

    #[test]
    fn test_headroom_excludes_nearly_full_instances() {
        let policy = SelectionPolicy::best_fit().with_headroom(5);
        match select_instance(&fleet(), request(5), policy) {
            Selection::Instance(chosen) => assert_eq!(chosen.id, 2),
            other => panic!("expected instance, got {other:?}"),
        }
    }

    #[test]
    fn test_ties_break_on_lowest_id() {
        let instances = vec![instance(7, 20, 10), instance(3, 30, 20)];
        match select_instance(&instances, request(4), SelectionPolicy::best_fit()) {
            Selection::Instance(chosen) => assert_eq!(chosen.id, 3),
            other => panic!("expected instance, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_fleet_yields_directive() {
        let selection = select_instance(&[], request(1), SelectionPolicy::best_fit());
        assert!(matches!(selection, Selection::CreateNew(_)));
    }

    #[test]
    fn test_session_request_rejects_non_positive() {
        assert!(SessionRequest::new(0).is_err());
        assert!(SessionRequest::new(-4).is_err());
        assert!(SessionRequest::new(i64::MAX).is_err());
        assert_eq!(SessionRequest::new(12).unwrap().get(), 12);
    }

    #[test]
    fn test_capacity_helpers() {
        let capacity = Capacity { used: 101, max: 100 };
        assert!(capacity.is_overcommitted());
        assert_eq!(capacity.remaining(), 0);
        assert!(!capacity.can_absorb(1));
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("first_fit".parse(), Ok(SelectionStrategy::FirstFit));
        assert!("worst_fit".parse::<SelectionStrategy>().is_err());
    }

    fn fleet_strategy() -> impl Strategy<Value = Vec<WahaInstance>> {
        prop::collection::vec((1u32..200, 0u32..200), 0..20).prop_map(|pairs| {
            pairs
                .into_iter()
                .enumerate()
                .map(|(idx, (max, used))| instance(idx as u32 + 1, max, used.min(max)))
                .collect()
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn property_best_fit_is_minimal_sufficient(fleet in fleet_strategy(), needed in 1i64..150) {
            let req = request(needed);
            match select_instance(&fleet, req, SelectionPolicy::best_fit()) {
                Selection::Instance(chosen) => {
                    prop_assert!(chosen.remaining() >= req.get());
                    for other in fleet.iter().filter(|i| i.remaining() >= req.get()) {
                        prop_assert!(chosen.remaining() <= other.remaining());
                    }
                }
                Selection::CreateNew(directive) => {
                    prop_assert!(fleet.iter().all(|i| i.remaining() < req.get()));
                    prop_assert!(directive.min_max_sessions >= req.get());
                }
            }
        }
    }
}
