//! Command/response protocol
//!
//! Templates and patterns live in the [`registry::CommandRegistry`]; a
//! [`session::ProtocolSession`] runs one exchange at a time over a channel,
//! and the [`serializer::TaskSerializer`] admits concurrent callers to it in
//! arrival order.

pub mod matcher;
pub mod registry;
pub mod serializer;
pub mod session;
pub mod template;

pub use matcher::{MatchOutcome, ResponsePattern, VALUE_GROUP};
pub use registry::CommandRegistry;
pub use serializer::TaskSerializer;
pub use session::{ExchangeResult, ProtocolSession, SessionState, DEFAULT_TIMEOUT};
pub use template::{CommandTemplate, TemplateValue, TemplateVars};
