//! # 数据模型
//!
//! 控制平面的核心数据结构：任务、通道状态以及任务控制操作的返回值。
//!
//! ## 任务状态流转
//!
//! ```text
//! created --派发成功--> running
//! running --worker上报完成--> finished
//! running --worker上报失败--> failed
//! running --管理端停止-->     stopped
//! stopped --管理端启动-->     running  (重新派发)
//! ```
//!
//! `finished` 与 `failed` 为终态，注册表不会自动重启它们。
//!
//! ## 通道状态
//!
//! ```text
//! ready --派发任务--> busy --任务进入终态--> ready
//!   \________________ 管理端关闭 ______________> stopped
//! ```

pub mod control;
pub mod task;
pub mod worker;

pub use control::*;
pub use task::*;
pub use worker::*;
