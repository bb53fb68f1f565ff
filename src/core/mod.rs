//! 核心模块
//!
//! 包含绑定层共享的基础设施：
//! - `error` - 错误类型定义

pub mod error;

// 重新导出错误类型
pub use error::{BindingError, BindingResult, EngineErrorCode};
