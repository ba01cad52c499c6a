pub mod channel;
pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod protocol;

pub use channel::{BoxedReader, BoxedWriter, Channel, MessageReader};
pub use config::*;
pub use errors::*;
pub use logging::{init_logging, LogFormat, LogLevel};
pub use models::*;
pub use protocol::{Message, Received};
