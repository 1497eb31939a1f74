pub mod audit;
pub mod config;
pub mod correlation;
pub mod domain;
pub mod errors;
pub mod executor;
pub mod policy;
pub mod rate_limit;
pub mod telemetry;
pub mod validation;

pub use audit::{
    AuditCategory, AuditEvent, AuditEventType, AuditSink, FanoutAuditSink, InMemoryAuditSink,
    TracingAuditSink,
};
pub use correlation::CorrelationContext;
pub use domain::action::{Action, ActionOptions, ActionType, ResourceType};
pub use domain::auth::{AuthContext, ADMIN_WILDCARD};
pub use domain::result::{ActionError, ActionResult, ActionStatus, ErrorCode};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use executor::{ActionExecutor, HandlerError, HandlerRegistry, RegistryError, ResourceHandler};
pub use policy::{AuthorizationError, EnvironmentMode, PolicyEngine};
pub use rate_limit::{RateLimitConfig, RateLimitDecision, RateLimiter};
pub use validation::{SecurityReport, SecurityScanner, ValidationIssue, ValidationReport};
