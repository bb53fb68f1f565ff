//! 对象层级的根部类

use super::call;
use crate::core::{BindingResult, EngineErrorCode};
use crate::engine_class;
use crate::values::{Callable, GString, StringName};
use glam::Vec2;

engine_class! {
    /// 所有引擎类的根
    Object
}

engine_class! {
    /// 引用计数对象
    RefCounted: Object
}

engine_class! {
    Resource: RefCounted, Object
}

engine_class! {
    /// 场景树节点
    Node: Object
}

engine_class! {
    CanvasItem: Node, Object
}

engine_class! {
    Node2D: CanvasItem, Node, Object
}

/// `Object.connect` 的标志位
pub mod connect_flags {
    pub const DEFERRED: i64 = 1;
    pub const PERSIST: i64 = 2;
    pub const ONE_SHOT: i64 = 4;
    pub const REFERENCE_COUNTED: i64 = 8;
}

impl Object {
    pub fn get_class(&self) -> BindingResult<String> {
        let name: GString = call!(self, "get_class", 201670096 => GString)?;
        name.to_utf8()
    }

    pub fn get_instance_id(&self) -> BindingResult<i64> {
        call!(self, "get_instance_id", 3905245786 => i64)
    }

    /// 把 Callable 连接到本对象的信号
    pub fn connect(&self, signal: impl Into<StringName>, callable: &Callable, flags: i64) -> BindingResult<()> {
        let signal = signal.into();
        let code: EngineErrorCode = call!(self, "connect", 1518946055 => EngineErrorCode; &signal, callable, &flags)?;
        code.into_result()
    }

    pub fn disconnect(&self, signal: impl Into<StringName>, callable: &Callable) -> BindingResult<()> {
        let signal = signal.into();
        call!(self, "disconnect", 1874754934 => (); &signal, callable)
    }

    pub fn is_connected(&self, signal: impl Into<StringName>, callable: &Callable) -> BindingResult<bool> {
        let signal = signal.into();
        call!(self, "is_connected", 768136979 => bool; &signal, callable)
    }
}

impl RefCounted {
    pub fn get_reference_count(&self) -> BindingResult<i64> {
        call!(self, "get_reference_count", 3905245786 => i64)
    }
}

impl Resource {
    pub fn set_name(&self, name: &str) -> BindingResult<()> {
        let name = GString::from(name);
        call!(self, "set_name", 83702148 => (); &name)
    }

    pub fn get_name(&self) -> BindingResult<String> {
        call!(self, "get_name", 201670096 => GString)?.to_utf8()
    }
}

impl Node {
    pub fn set_name(&self, name: impl Into<StringName>) -> BindingResult<()> {
        let name = name.into();
        call!(self, "set_name", 3304788590 => (); &name)
    }

    pub fn get_name(&self) -> BindingResult<StringName> {
        call!(self, "get_name", 2002593661 => StringName)
    }
}

impl Node2D {
    pub fn set_position(&self, position: Vec2) -> BindingResult<()> {
        call!(self, "set_position", 743155724 => (); &position)
    }

    pub fn get_position(&self) -> BindingResult<Vec2> {
        call!(self, "get_position", 3341600327 => Vec2)
    }
}
