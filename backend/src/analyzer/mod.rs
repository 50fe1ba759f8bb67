pub mod contract;
pub mod invoker;

pub use contract::{ParseError, ParsedResult, parse_output};
pub use invoker::{InvokeError, ProcessInvocation, ProcessInvoker};
