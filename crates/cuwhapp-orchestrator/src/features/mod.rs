pub mod capacity_selection;
pub mod command_routing;
pub mod container_lifecycle;
pub mod observability;
pub mod remote_execution;
pub mod waha_registry;
