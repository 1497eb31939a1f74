pub mod action;
pub mod auth;
pub mod result;

pub use action::{Action, ActionOptions, ActionType, ResourceType};
pub use auth::{AuthContext, ADMIN_WILDCARD};
pub use result::{ActionError, ActionResult, ActionStatus, ErrorCode};
