//! 引擎类包装
//!
//! 与生成器输出同形的包装：每个类一个持有受管句柄的结构体，方法经方法绑定缓存
//! 与调用帧转发到引擎，返回的对象句柄按入站所有权规则封装，祖先链生成
//! [`Inherits`](crate::registry::Inherits) 实现。

pub mod animation;
pub mod class_db;
pub mod debugger;
pub mod object;

pub use animation::{Animation, AnimationLibrary};
pub use class_db::ClassDB;
pub use debugger::{EngineDebugger, EngineProfiler};
pub use object::{CanvasItem, Node, Node2D, Object, RefCounted, Resource};

use crate::abi;
use crate::core::{BindingError, BindingResult};
use crate::handle::{EngineHandle, ManagedHandle, Transfer};
use crate::registry::EngineClass;

/// 生成一个引擎类包装
///
/// ```ignore
/// engine_class! {
///     /// 动画资源
///     Animation: Resource, RefCounted, Object
/// }
/// ```
#[macro_export]
macro_rules! engine_class {
    ($(#[$doc:meta])* $name:ident $(: $($ancestor:ident),+)?) => {
        $(#[$doc])*
        #[derive(Debug)]
        pub struct $name {
            handle: $crate::handle::ManagedHandle,
        }

        impl $crate::registry::EngineClass for $name {
            const CLASS_NAME: &'static str = stringify!($name);

            fn from_managed(handle: $crate::handle::ManagedHandle) -> Self {
                Self { handle }
            }

            fn managed(&self) -> &$crate::handle::ManagedHandle {
                &self.handle
            }

            fn into_managed(self) -> $crate::handle::ManagedHandle {
                self.handle
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.handle == other.handle
            }
        }

        $($(impl $crate::registry::Inherits<$ancestor> for $name {})+)?
    };
}

/// 构造一个引擎对象，按其类决定所有权
pub fn construct<T: EngineClass>() -> BindingResult<T> {
    construct_as(T::CLASS_NAME)
}

/// 按类名构造（可以是宿主扩展类），包装为 `T`
///
/// 引用计数类得到 Shared 句柄，其余为 Host 句柄。
pub fn construct_as<T: EngineClass>(class_name: &str) -> BindingResult<T> {
    if !crate::registry::inherits(class_name, T::CLASS_NAME)? {
        return Err(BindingError::type_mismatch(T::CLASS_NAME, class_name));
    }
    let abi = abi::get()?;
    let ptr = abi.with_name(class_name, |name| unsafe { (abi.classdb_construct_object)(name) })?;
    let handle = EngineHandle::from_ptr(ptr);
    let managed = ManagedHandle::from_engine(handle, Transfer::ToHost)?
        .ok_or_else(|| BindingError::ClassNotFound(class_name.to_string()))?;
    tracing::debug!(target: "registry", class = class_name, ownership = ?managed.ownership(), "Object constructed");
    Ok(T::from_managed(managed))
}

/// 方法返回的对象句柄
pub(crate) fn wrap_returned<T: EngineClass>(handle: EngineHandle, transfer: Transfer) -> BindingResult<Option<T>> {
    Ok(ManagedHandle::from_engine(handle, transfer)?.map(T::from_managed))
}

/// 对象方法调用的公共形态
///
/// `call!(self, "method", hash => ReturnType; arg0, arg1)`
macro_rules! call {
    ($this:expr, $method:literal, $hash:literal => $ret:ty $(; $($arg:expr),*)?) => {{
        let bind = $crate::registry::method_bind(
            <Self as $crate::registry::EngineClass>::CLASS_NAME,
            $method,
            $hash,
        )?;
        let object = $crate::registry::EngineClass::handle($this)?;
        #[allow(unused_mut)]
        let mut frame = $crate::frame::CallFrame::new();
        $($(frame.arg($arg)?;)*)?
        frame.ptrcall::<$ret>(bind, object)
    }};
}

pub(crate) use call;
