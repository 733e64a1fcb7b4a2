//! HTTP middleware components.

pub mod permission;

pub use permission::enforce_route_permissions;
