//! RESP control endpoint for the rule store.
//!
//! Any Redis client can manage rules through it:
//!
//! ```text
//! RULEADD slow_get delay=200 command=GET
//! RULELIST
//! RULECOUNTERS
//! RULEDEL slow_get
//! ```

mod commands;
mod resp;
mod server;

pub use commands::{dispatch, parse_rule_arg, ControlError};
pub use resp::{read_command, ProtocolError, Reply};
pub use server::ControlServer;
