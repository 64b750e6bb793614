//! # GCodeLink Communication
//!
//! Line-oriented channels (TCP and serial), the command registry, the
//! protocol session and the driver built on top of them. Includes a
//! scripted loopback server for exercising a dialect without hardware.

pub mod communication;
pub mod driver;
pub mod protocol;
pub mod simulator;

pub use communication::{
    open_channel, Channel, ConnectionDriver, ConnectionParams, LineStream, SerialChannel,
    SerialParity, StreamChannel, TcpChannel,
};
pub use driver::{DriverSettings, DriverState, GcodeDriver, MoveTarget};
pub use protocol::{
    CommandRegistry, CommandTemplate, ExchangeResult, MatchOutcome, ProtocolSession,
    ResponsePattern, SessionState, TaskSerializer, TemplateValue, TemplateVars,
};
pub use simulator::{GcodeServer, ServerEvent};
