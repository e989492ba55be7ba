//! WAHA instance descriptors and naming.

use serde::{Deserialize, Serialize};

pub const WAHA_IMAGE: &str = "devlikeapro/waha-plus:latest";
pub const WAHA_NETWORK: &str = "cuwhapp-network";
pub const WAHA_NAME_PREFIX: &str = "cuwhapp-waha-";
pub const WAHA_CONTAINER_PORT: u16 = 3000;
pub const WAHA_PORT_BASE: u16 = 4500;
pub const WAHA_MAX_ID: u32 = 1001;

/// Capacity assumed for instances created before capacity labels existed
pub const DEFAULT_MAX_SESSIONS: u32 = 100;

pub const LABEL_ROLE_WAHA: &str = "waha";
pub const LABEL_WAHA_ID: &str = "cuwhapp.waha.id";
pub const LABEL_WAHA_MAX_SESSIONS: &str = "cuwhapp.waha.max_sessions";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WahaInstance {
    pub id: u32,
    pub host_port: u16,
    pub max_sessions: u32,
    pub used_sessions: u32,
}

impl WahaInstance {
    pub fn remaining(&self) -> u32 {
        self.max_sessions.saturating_sub(self.used_sessions)
    }

    pub fn container_name(&self) -> String {
        container_name(self.id)
    }
}

pub fn container_name(id: u32) -> String {
    format!("{}{}", WAHA_NAME_PREFIX, id)
}

pub fn sessions_volume(id: u32) -> String {
    format!("waha_sessions_{}", id)
}

pub fn files_volume(id: u32) -> String {
    format!("waha_files_{}", id)
}

/// Host port bound to instance `id`; `None` outside the allocatable id range
pub fn host_port(id: u32) -> Option<u16> {
    if id == 0 || id > WAHA_MAX_ID {
        return None;
    }
    u16::try_from(id - 1)
        .ok()
        .and_then(|offset| WAHA_PORT_BASE.checked_add(offset))
}

pub fn parse_container_name(name: &str) -> Option<u32> {
    name.trim_start_matches('/')
        .strip_prefix(WAHA_NAME_PREFIX)
        .and_then(|suffix| suffix.parse::<u32>().ok())
        .filter(|id| *id >= 1)
}

/// Lowest integer id >= 1 that is not taken
pub fn lowest_free_id(taken: impl IntoIterator<Item = u32>) -> Option<u32> {
    let mut taken: Vec<u32> = taken.into_iter().collect();
    taken.sort_unstable();
    taken.dedup();

    let mut candidate = 1u32;
    for id in taken {
        if id == candidate {
            candidate += 1;
        } else if id > candidate {
            break;
        }
    }

    (candidate <= WAHA_MAX_ID).then_some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_port_mapping() {
        assert_eq!(host_port(1), Some(4500));
        assert_eq!(host_port(12), Some(4511));
        assert_eq!(host_port(WAHA_MAX_ID), Some(5500));
        assert_eq!(host_port(0), None);
        assert_eq!(host_port(WAHA_MAX_ID + 1), None);
    }

    #[test]
    fn test_parse_container_name() {
        assert_eq!(parse_container_name("cuwhapp-waha-3"), Some(3));
        assert_eq!(parse_container_name("/cuwhapp-waha-17"), Some(17));
        assert_eq!(parse_container_name("cuwhapp-waha-0"), None);
        assert_eq!(parse_container_name("cuwhapp-waha-x"), None);
        assert_eq!(parse_container_name("cuwhapp-user-3-api"), None);
    }

    #[test]
    fn test_lowest_free_id_fills_gaps() {
        assert_eq!(lowest_free_id([]), Some(1));
        assert_eq!(lowest_free_id([1, 2, 3]), Some(4));
        assert_eq!(lowest_free_id([3, 1, 5]), Some(2));
        assert_eq!(lowest_free_id([2, 2, 3]), Some(1));
    }

    #[test]
    fn test_lowest_free_id_exhausted() {
        assert_eq!(lowest_free_id(1..=WAHA_MAX_ID), None);
    }

    #[test]
    fn test_remaining_saturates() {
        let instance = WahaInstance {
            id: 1,
            host_port: 4500,
            max_sessions: 10,
            used_sessions: 12,
        };
        assert_eq!(instance.remaining(), 0);
        assert_eq!(instance.container_name(), "cuwhapp-waha-1");
    }
}
