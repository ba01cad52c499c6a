pub mod dispatcher_client;
pub mod heartbeat_manager;
pub mod inbound_handler;
pub mod task_execution;

pub use dispatcher_client::DispatcherClient;
pub use heartbeat_manager::{HeartbeatManager, HeartbeatSchedule};
pub use inbound_handler::InboundHandler;
pub use task_execution::TaskExecutionManager;
