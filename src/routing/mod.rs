//! 后端路由：级联选择本地 / 远程后端，必要时安全改写

pub mod router;
pub mod safety;

pub use router::{BackendRouter, LocalRoute, RemoteRoute, RouteDecision, RouteError, Routed};
pub use safety::{enforce_simulation_mode, SafetyRewriter, SIMULATION_HEADER};
