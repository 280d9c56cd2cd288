//! Input security subsystem.
//!
//! # Data Flow
//! ```text
//! Lookup key / document from caller:
//!     → payload.rs (convert to typed Payload)
//!     → validator.rs (walk keys and values)
//!     → rules.rs (injection, traversal, null-byte, structural checks)
//!     → CleanPayload admitted, or ValidationError returned
//! ```
//!
//! # Design Decisions
//! - Fail closed: any matching rule rejects the payload
//! - No trust in client input, including map keys
//! - Validation has no side effects beyond logs and metrics

pub mod payload;
pub mod rules;
pub mod validator;

pub use payload::{CleanPayload, Payload};
pub use rules::{Rule, RuleCategory, RuleError, RuleSet, RuleTarget, Severity};
pub use validator::{FindingLocation, InputValidator, ValidationError, ValidationFinding};
