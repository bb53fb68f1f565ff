//! ABI 表
//!
//! 引擎在加载时提供的进程级函数指针向量：分配器钩子、对象构造/销毁/方法调用/单例获取、
//! Variant 构造/复制/销毁/类型读取/转换、字符串与容器操作、ClassDB 查询。

pub mod library;
pub mod sys;
pub mod table;

pub use library::EngineLibrary;
pub use table::{get, init, is_initialized, reset, AbiTable, REQUIRED_SYMBOLS};

use crate::core::BindingResult;
use std::ffi::c_void;

/// 通过引擎分配器分配内存
pub fn alloc(size: usize) -> BindingResult<*mut c_void> {
    let abi = get()?;
    Ok(unsafe { (abi.mem_alloc)(size) })
}

/// 释放引擎分配器分配的内存
///
/// # Safety
/// `ptr` 必须来自 [`alloc`] 且尚未释放。
pub unsafe fn free(ptr: *mut c_void) -> BindingResult<()> {
    let abi = get()?;
    (abi.mem_free)(ptr);
    Ok(())
}

/// 把一条错误同时写入日志和引擎错误输出
#[macro_export]
macro_rules! engine_error {
    ($($arg:tt)*) => {{
        let message = format!($($arg)*);
        tracing::error!(target: "dispatch", "{}", message);
        if let Ok(abi) = $crate::abi::get() {
            abi.report_error(&message, module_path!(), file!(), line!());
        }
    }};
}
