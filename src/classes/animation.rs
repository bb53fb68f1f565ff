//! 动画资源

use super::{call, wrap_returned, Object, RefCounted, Resource};
use crate::core::{BindingResult, EngineErrorCode};
use crate::engine_class;
use crate::handle::{EngineHandle, Transfer};
use crate::registry::Inherits;
use crate::values::{Array, Callable, StringName, Variant};

engine_class! {
    /// 动画片段
    Animation: Resource, RefCounted, Object
}

engine_class! {
    /// 按名字保存动画的资源
    AnimationLibrary: Resource, RefCounted, Object
}

impl Animation {
    pub fn new() -> BindingResult<Self> {
        super::construct()
    }

    pub fn set_length(&self, time_sec: f32) -> BindingResult<()> {
        call!(self, "set_length", 373806689 => (); &time_sec)
    }

    pub fn get_length(&self) -> BindingResult<f32> {
        call!(self, "get_length", 1740695150 => f32)
    }
}

/// `AnimationLibrary` 的信号
pub mod signals {
    pub const ANIMATION_ADDED: &str = "animation_added";
    pub const ANIMATION_REMOVED: &str = "animation_removed";
    pub const ANIMATION_CHANGED: &str = "animation_changed";
}

impl AnimationLibrary {
    pub fn new() -> BindingResult<Self> {
        super::construct()
    }

    pub fn add_animation(&self, name: impl Into<StringName>, animation: &Animation) -> BindingResult<()> {
        let name = name.into();
        let animation = animation.handle.get()?;
        let code: EngineErrorCode = call!(self, "add_animation", 1811855551 => EngineErrorCode; &name, &animation)?;
        code.into_result()
    }

    pub fn remove_animation(&self, name: impl Into<StringName>) -> BindingResult<()> {
        let name = name.into();
        call!(self, "remove_animation", 3304788590 => (); &name)
    }

    pub fn has_animation(&self, name: impl Into<StringName>) -> BindingResult<bool> {
        let name = name.into();
        call!(self, "has_animation", 2619796661 => bool; &name)
    }

    /// 引用计数对象，返回 Shared 句柄
    pub fn get_animation(&self, name: impl Into<StringName>) -> BindingResult<Option<Animation>> {
        let name = name.into();
        let handle: EngineHandle = call!(self, "get_animation", 2933122410 => EngineHandle; &name)?;
        wrap_returned(handle, Transfer::Borrow)
    }

    /// StringName 类型化数组
    pub fn get_animation_list(&self) -> BindingResult<Array> {
        call!(self, "get_animation_list", 3995934104 => Array)
    }

    /// 订阅 `animation_added`；返回的 Callable 用于断开
    pub fn on_animation_added<F>(&self, f: F) -> BindingResult<Callable>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.subscribe(signals::ANIMATION_ADDED, f)
    }

    pub fn on_animation_removed<F>(&self, f: F) -> BindingResult<Callable>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.subscribe(signals::ANIMATION_REMOVED, f)
    }

    pub fn on_animation_changed<F>(&self, f: F) -> BindingResult<Callable>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.subscribe(signals::ANIMATION_CHANGED, f)
    }

    fn subscribe<F>(&self, signal: &'static str, f: F) -> BindingResult<Callable>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let callable = Callable::from_fn(signal, move |args| {
            let name = match args.first() {
                Some(Variant::StringName(name)) => name.to_utf8()?,
                Some(other) => other.try_to::<String>()?,
                None => String::new(),
            };
            f(&name);
            Ok(Variant::Nil)
        })
        .to_engine_backed()?;
        let object: Object = self.view()?;
        object.connect(signal, &callable, 0)?;
        Ok(callable)
    }
}
