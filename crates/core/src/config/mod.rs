//! 配置管理
//!
//! 配置按以下顺序合并，后者覆盖前者：
//!
//! 1. 内置默认值
//! 2. TOML 配置文件
//! 3. 环境变量 (前缀 `TASKPLANE`，层级分隔符 `__`，如 `TASKPLANE_WORKER__PORT=6000`)
//!
//! 命令行参数在二进制入口处再覆盖一次。

pub mod models;

pub use models::*;
