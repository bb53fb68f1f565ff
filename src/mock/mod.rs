//! 进程内模拟引擎
//!
//! 实现绑定层用到的全部 ABI 符号，让测试和基准不依赖真实引擎运行：
//!
//! ```ignore
//! let engine = MockEngine::install();
//! let db = ClassDB::singleton()?;
//! assert_eq!(engine.singleton_lookups(), 1);
//! ```
//!
//! [`MockEngine::install`] 持有进程级测试锁，重置全部全局状态，然后像引擎一样
//! 调用 [`binding_library_init`](crate::entry::binding_library_init) 并逐层初始化。

mod objects;
mod values;

use crate::abi::sys::*;
use crate::core::BindingResult;
use crate::handle::EngineHandle;
use std::ffi::{c_char, CStr};
use std::sync::{Mutex, MutexGuard};

/// 模拟引擎交给宿主的库令牌
pub const LIBRARY_TOKEN: usize = 0x11b_0000;

/// 按符号名解析到本模块的实现
macro_rules! resolve {
    ($name:expr, $($module:ident :: $symbol:ident),* $(,)?) => {
        match $name {
            $(stringify!($symbol) => Some($module::$symbol as *const ()),)*
            _ => None,
        }
    };
}

fn hidden() -> MutexGuard<'static, Vec<String>> {
    static HIDDEN: Mutex<Vec<String>> = Mutex::new(Vec::new());
    HIDDEN.lock().unwrap_or_else(|e| e.into_inner())
}

/// 让查找过程对某个符号返回空，模拟不完整的引擎
pub fn hide_symbol(name: &str) {
    hidden().push(name.to_string());
}

pub fn reveal_symbols() {
    hidden().clear();
}

unsafe extern "C" fn lookup(name: *const c_char) -> Option<InterfaceFunctionPtr> {
    if name.is_null() {
        return None;
    }
    let name = CStr::from_ptr(name).to_str().ok()?;
    if hidden().iter().any(|h| h == name) {
        return None;
    }
    let address = resolve!(
        name,
        objects::mem_alloc,
        objects::mem_free,
        objects::print_error,
        objects::print_warning,
        objects::classdb_construct_object,
        objects::classdb_get_method_bind,
        objects::classdb_get_parent_class,
        objects::classdb_register_extension_class,
        objects::classdb_unregister_extension_class,
        objects::object_destroy,
        objects::object_get_singleton,
        objects::object_get_class_name,
        objects::object_get_instance_id,
        objects::object_get_instance_from_id,
        objects::object_set_instance,
        objects::object_method_bind_ptrcall,
        objects::refcounted_reference,
        objects::refcounted_unreference,
        values::variant_new_copy,
        values::variant_new_nil,
        values::variant_destroy,
        values::variant_get_type,
        values::get_variant_from_type_constructor,
        values::get_variant_to_type_constructor,
        values::variant_get_ptr_constructor,
        values::variant_get_ptr_destructor,
        values::variant_get_ptr_builtin_method,
        values::string_new_with_utf8_chars_and_len,
        values::string_to_utf8_chars,
        values::string_name_new_with_utf8_chars_and_len,
        values::array_operator_index,
        values::array_operator_index_const,
        values::array_set_typed,
        values::dictionary_operator_index,
        values::dictionary_operator_index_const,
        values::packed_array_operator_index,
        values::packed_array_operator_index_const,
        values::packed_array_data,
        values::callable_custom_create,
        values::callable_custom_get_userdata,
    )?;
    Some(std::mem::transmute::<*const (), InterfaceFunctionPtr>(address))
}

/// 模拟引擎的符号查找过程
pub fn lookup_fn() -> InterfaceLookupFn {
    lookup
}

/// 串行化依赖全局状态的测试；前一个测试 panic 时照常取锁
pub fn test_lock() -> MutexGuard<'static, ()> {
    static LOCK: Mutex<()> = Mutex::new(());
    LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

/// 已安装的模拟引擎；析构时逐层反初始化并清空全部全局状态
pub struct MockEngine {
    info: InitializationInfo,
    _lock: MutexGuard<'static, ()>,
}

impl MockEngine {
    pub fn install() -> Self {
        Self::install_with(|| Ok(()))
    }

    /// 安装并在 Scene 层初始化时执行 `setup`（注册扩展类的时机）
    pub fn install_with<F>(setup: F) -> Self
    where
        F: Fn() -> BindingResult<()> + Send + Sync + 'static,
    {
        let lock = test_lock();
        crate::entry::reset();
        objects::reset();
        reveal_symbols();

        crate::entry::on_initialize(InitLevel::Scene, move |_| setup());
        let mut info = InitializationInfo::default();
        let accepted = unsafe {
            crate::entry::binding_library_init(Some(lookup), LIBRARY_TOKEN as ClassLibraryPtr, &mut info)
        };
        assert_eq!(accepted, TRUE, "binding_library_init rejected the mock engine");
        if let Some(initialize) = info.initialize {
            for level in [InitLevel::Core, InitLevel::Servers, InitLevel::Scene] {
                unsafe { initialize(info.userdata, level as u32) };
            }
        }
        tracing::debug!(target: "mock", "Mock engine installed");
        Self { info, _lock: lock }
    }

    /// 模拟引擎进入主循环
    pub fn start_main_loop(&self) {
        if let Some(started) = self.info.main_loop_started {
            unsafe { started(self.info.userdata) };
        }
    }

    /// `object_get_singleton` 被调用的次数
    pub fn singleton_lookups(&self) -> usize {
        objects::singleton_lookups()
    }

    pub fn destroy_count(&self) -> usize {
        objects::destroy_count()
    }

    /// 引擎侧的引用计数；对象不存在时为 `None`
    pub fn reference_count(&self, handle: EngineHandle) -> Option<i64> {
        objects::reference_count(handle.addr())
    }

    pub fn is_alive(&self, handle: EngineHandle) -> bool {
        objects::is_alive(handle.addr())
    }

    pub fn object_count(&self) -> usize {
        objects::object_count()
    }

    pub fn connection_count(&self, handle: EngineHandle, signal: &str) -> usize {
        objects::connection_count(handle.addr(), signal)
    }

    /// 经 `print_error` 报告给引擎的消息
    pub fn errors(&self) -> Vec<String> {
        objects::errors()
    }

    pub fn warnings(&self) -> Vec<String> {
        objects::warnings()
    }

    /// 经 `mem_alloc` 分配且尚未释放的块数
    pub fn live_allocations(&self) -> usize {
        objects::live_allocations()
    }
}

impl Drop for MockEngine {
    fn drop(&mut self) {
        if let Some(deinitialize) = self.info.deinitialize {
            for level in [InitLevel::Scene, InitLevel::Servers, InitLevel::Core] {
                unsafe { deinitialize(self.info.userdata, level as u32) };
            }
        }
        crate::entry::reset();
        objects::reset();
        tracing::debug!(target: "mock", "Mock engine removed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi;

    #[test]
    fn test_lookup_resolves_every_required_symbol() {
        for symbol in abi::REQUIRED_SYMBOLS {
            let name = std::ffi::CString::new(*symbol).unwrap();
            assert!(unsafe { lookup(name.as_ptr()) }.is_some(), "missing {}", symbol);
        }
    }

    #[test]
    fn test_install_initializes_abi() {
        let engine = MockEngine::install();
        assert!(abi::is_initialized());
        assert_eq!(engine.singleton_lookups(), 0);
        assert!(engine.errors().is_empty(), "{:?}", engine.errors());
    }

    #[test]
    fn test_drop_resets_globals() {
        {
            let _engine = MockEngine::install();
            assert!(abi::is_initialized());
        }
        let _lock = test_lock();
        assert!(!abi::is_initialized());
    }

    #[test]
    fn test_mem_alloc_round_trip() {
        let engine = MockEngine::install();
        let before = engine.live_allocations();
        let ptr = abi::alloc(24).unwrap();
        assert_eq!(engine.live_allocations(), before + 1);
        unsafe { abi::free(ptr).unwrap() };
        assert_eq!(engine.live_allocations(), before);
    }
}
