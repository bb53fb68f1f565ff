//! ClassDB 单例

use super::{call, Object};
use crate::core::{BindingError, BindingResult};
use crate::engine_class;
use crate::handle::{ManagedHandle, Transfer};
use crate::values::{StringName, Variant};

engine_class! {
    /// 引擎类数据库
    ClassDB: Object
}

impl ClassDB {
    /// 缓存的单例
    pub fn singleton() -> BindingResult<Self> {
        crate::singleton::singleton()
    }

    /// 按类名实例化；对象装在 Variant 里返回
    pub fn instantiate(&self, class: impl Into<StringName>) -> BindingResult<Variant> {
        let class = class.into();
        call!(self, "instantiate", 2760726917 => Variant; &class)
    }

    /// 实例化并接管返回的对象：新对象的所有权转移给宿主
    pub fn instantiate_managed(&self, class: impl Into<StringName>) -> BindingResult<ManagedHandle> {
        let class = class.into();
        let value = self.instantiate(class.clone())?;
        let handle = value
            .as_object()?
            .ok_or_else(|| BindingError::ClassNotFound(class.to_string()))?;
        ManagedHandle::from_engine(handle, Transfer::ToHost)?
            .ok_or_else(|| BindingError::ClassNotFound(class.to_string()))
    }

    pub fn class_exists(&self, class: impl Into<StringName>) -> BindingResult<bool> {
        let class = class.into();
        call!(self, "class_exists", 2619796661 => bool; &class)
    }

    pub fn get_parent_class(&self, class: impl Into<StringName>) -> BindingResult<StringName> {
        let class = class.into();
        call!(self, "get_parent_class", 1965194235 => StringName; &class)
    }

    pub fn is_parent_class(
        &self,
        class: impl Into<StringName>,
        inherits: impl Into<StringName>,
    ) -> BindingResult<bool> {
        let class = class.into();
        let inherits = inherits.into();
        call!(self, "is_parent_class", 471820014 => bool; &class, &inherits)
    }
}
