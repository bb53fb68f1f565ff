//! 跨继承层级的转换
//!
//! 包装类型只是带类名的受管句柄。向上转换沿注册表的父类链校验后直接
//! 重新解释句柄；向下转换先向引擎查询对象的实际类，再做同样的校验。

use crate::core::{BindingError, BindingResult};
use crate::handle::{EngineHandle, ManagedHandle};

/// 引擎类包装
pub trait EngineClass: Sized {
    const CLASS_NAME: &'static str;

    /// 把受管句柄重新解释为本类型，不做校验
    fn from_managed(handle: ManagedHandle) -> Self;

    fn managed(&self) -> &ManagedHandle;

    fn into_managed(self) -> ManagedHandle;

    /// 当前句柄；已结束时返回 `UseAfterFree`
    fn handle(&self) -> BindingResult<EngineHandle> {
        self.managed().get()
    }

    fn class_name(&self) -> &'static str {
        Self::CLASS_NAME
    }

    /// 转换为祖先类包装；`P` 不是祖先时原样交还
    fn as_parent<P: EngineClass>(self) -> Result<P, Self> {
        match super::inherits(Self::CLASS_NAME, P::CLASS_NAME) {
            Ok(true) => Ok(P::from_managed(self.into_managed())),
            _ => Err(self),
        }
    }

    /// 按对象的实际类转换为子类包装；不匹配时原样交还
    fn as_child<C: EngineClass>(self) -> Result<C, Self> {
        let actual = match self.handle().and_then(super::class_name_of) {
            Ok(actual) => actual,
            Err(e) => {
                tracing::debug!(target: "registry", from = Self::CLASS_NAME, to = C::CLASS_NAME, "as_child failed: {}", e);
                return Err(self);
            }
        };
        match super::inherits(&actual, C::CLASS_NAME) {
            Ok(true) => Ok(C::from_managed(self.into_managed())),
            _ => Err(self),
        }
    }

    /// 任意方向的转换；无关的类返回 `TypeMismatch`
    fn cast<T: EngineClass>(self) -> BindingResult<T> {
        if super::inherits(Self::CLASS_NAME, T::CLASS_NAME)? {
            return Ok(T::from_managed(self.into_managed()));
        }
        self.as_child::<T>()
            .map_err(|original| BindingError::type_mismatch(T::CLASS_NAME, original.class_name()))
    }
}

/// 静态继承关系，由包装宏沿祖先链生成
pub trait Inherits<P: EngineClass>: EngineClass {
    fn upcast(self) -> P {
        P::from_managed(self.into_managed())
    }

    /// 以祖先类型借用同一对象（Engine 所有权，不得比原包装活得更久）
    fn view(&self) -> BindingResult<P> {
        self.managed().borrow().map(P::from_managed)
    }
}

/// 无需运行时校验的向上转换
pub fn upcast<C, P>(wrapper: C) -> P
where
    C: Inherits<P>,
    P: EngineClass,
{
    wrapper.upcast()
}
