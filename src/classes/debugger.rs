//! 引擎调试器与性能分析器

use super::{call, Object, RefCounted};
use crate::core::BindingResult;
use crate::engine_class;
use crate::values::{Array, StringName};

engine_class! {
    /// 调试器单例，管理已注册的性能分析器
    EngineDebugger: Object
}

engine_class! {
    /// 性能分析器基类；宿主扩展类覆盖 `_toggle`、`_add_frame`、`_tick`
    EngineProfiler: RefCounted, Object
}

/// `EngineProfiler` 的虚方法名
pub mod virtuals {
    pub const TOGGLE: &str = "_toggle";
    pub const ADD_FRAME: &str = "_add_frame";
    pub const TICK: &str = "_tick";
}

impl EngineDebugger {
    pub fn singleton() -> BindingResult<Self> {
        crate::singleton::singleton()
    }

    pub fn register_profiler(&self, name: impl Into<StringName>, profiler: &EngineProfiler) -> BindingResult<()> {
        let name = name.into();
        let profiler = profiler.handle.get()?;
        call!(self, "register_profiler", 3651669560 => (); &name, &profiler)
    }

    pub fn unregister_profiler(&self, name: impl Into<StringName>) -> BindingResult<()> {
        let name = name.into();
        call!(self, "unregister_profiler", 3304788590 => (); &name)
    }

    /// 开关分析器，引擎随后调用其 `_toggle(enable, arguments)`
    pub fn profiler_enable(&self, name: impl Into<StringName>, enable: bool, arguments: &Array) -> BindingResult<()> {
        let name = name.into();
        call!(self, "profiler_enable", 3192561009 => (); &name, &enable, arguments)
    }

    pub fn has_profiler(&self, name: impl Into<StringName>) -> BindingResult<bool> {
        let name = name.into();
        call!(self, "has_profiler", 2041966384 => bool; &name)
    }

    pub fn is_profiling(&self, name: impl Into<StringName>) -> BindingResult<bool> {
        let name = name.into();
        call!(self, "is_profiling", 2041966384 => bool; &name)
    }
}

impl EngineProfiler {
    pub fn new() -> BindingResult<Self> {
        super::construct()
    }

    /// 构造一个派生自 `EngineProfiler` 的宿主扩展类实例
    pub fn new_extension(class_name: &str) -> BindingResult<Self> {
        super::construct_as(class_name)
    }
}
