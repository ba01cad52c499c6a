//! 调度器
//!
//! 接受worker连接，维护通道集合与任务注册表，并运行存活检测和派发扫描两个周期循环。

pub mod connection_handler;
pub mod controller;
pub mod registry;
pub mod scheduler;
pub mod strategies;
pub mod worker_failure_detector;

pub use controller::TaskController;
pub use registry::TaskRegistry;
pub use scheduler::{DispatchOutcome, Scheduler};
pub use strategies::{FirstReadyStrategy, TaskDispatchStrategy};
pub use worker_failure_detector::WorkerFailureDetector;
