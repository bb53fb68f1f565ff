//! 引擎后端的 Variant
//!
//! 24 字节的引擎 Variant 存储。构造、复制、销毁和标签读取都经过 ABI 表。

use super::builtin::Backend;
use super::variant::{Variant, VariantProxy};
use super::VariantType;
use crate::abi::{self, sys::*};
use crate::core::{BindingError, BindingResult};
use crate::frame::ArgSlot;
use std::fmt;

pub struct EngineVariant {
    raw: RawVariant,
    owned: bool,
}

impl EngineVariant {
    /// 构造 Nil
    pub fn nil() -> BindingResult<Self> {
        let abi = abi::get()?;
        let mut raw = RawVariant::default();
        unsafe { (abi.variant_new_nil)(raw.as_mut_ptr()) };
        Ok(Self { raw, owned: true })
    }

    /// 由宿主值构造（经由引擎的 from-type 转换）
    pub fn from_host(value: &Variant) -> BindingResult<Self> {
        let ty = value.variant_type();
        if ty == VariantType::Nil {
            return Self::nil();
        }
        let abi = abi::get()?;
        let convert = unsafe { (abi.get_variant_from_type_constructor)(ty as u32) }.ok_or_else(|| {
            BindingError::MethodNotFound {
                class: "Variant".to_string(),
                method: format!("from {}", ty),
                hash: 0,
            }
        })?;
        let mut raw = RawVariant::default();
        value.with_type_ptr(|ptr| unsafe { convert(raw.as_mut_ptr(), ptr as TypePtr) })?;
        Ok(Self { raw, owned: true })
    }

    /// 借用引擎内存里的 Variant
    ///
    /// # Safety
    /// `ptr` 必须指向有效的 Variant，且在视图存活期间保持有效。
    pub unsafe fn borrowed(ptr: ConstVariantPtr) -> Self {
        Self {
            raw: RawVariant::read_from(ptr),
            owned: false,
        }
    }

    /// 接管引擎构造好的 Variant
    ///
    /// # Safety
    /// `raw` 必须没有其他所有者。
    pub unsafe fn from_raw_owned(raw: RawVariant) -> Self {
        Self { raw, owned: true }
    }

    pub fn as_ptr(&self) -> ConstVariantPtr {
        self.raw.as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> VariantPtr {
        self.raw.as_mut_ptr()
    }

    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// 交出存储，不再负责销毁
    pub fn into_raw(self) -> RawVariant {
        let raw = self.raw;
        std::mem::forget(self);
        raw
    }

    /// 交出 owned 存储；借用视图先复制
    pub fn into_owned_raw(self) -> BindingResult<RawVariant> {
        if self.owned {
            Ok(self.into_raw())
        } else {
            Ok(self.try_clone()?.into_raw())
        }
    }

    pub fn variant_type(&self) -> BindingResult<VariantType> {
        let abi = abi::get()?;
        let raw = unsafe { (abi.variant_get_type)(self.as_ptr()) };
        VariantType::from_raw(raw).ok_or_else(|| BindingError::type_mismatch("variant type tag", raw))
    }

    /// 转换为宿主值；引擎值负载得到 owned 的引擎后端代理
    pub fn to_host(&self) -> BindingResult<Variant> {
        let ty = self.variant_type()?;
        if ty == VariantType::Nil {
            return Ok(Variant::Nil);
        }
        let abi = abi::get()?;
        let convert = unsafe { (abi.get_variant_to_type_constructor)(ty as u32) }.ok_or_else(|| {
            BindingError::MethodNotFound {
                class: "Variant".to_string(),
                method: format!("to {}", ty),
                hash: 0,
            }
        })?;
        let mut slot = ArgSlot::ZERO;
        unsafe {
            convert(slot.as_mut_ptr(), self.raw.as_ptr() as VariantPtr);
            Variant::read_type_ptr(ty, slot.as_ptr(), true)
        }
    }

    pub fn try_clone(&self) -> BindingResult<Self> {
        let abi = abi::get()?;
        let mut raw = RawVariant::default();
        unsafe { (abi.variant_new_copy)(raw.as_mut_ptr(), self.as_ptr()) };
        Ok(Self { raw, owned: true })
    }
}

impl Drop for EngineVariant {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        match abi::get() {
            Ok(abi) => unsafe { (abi.variant_destroy)(self.raw.as_mut_ptr()) },
            Err(e) => tracing::warn!(target: "values", "Leaking engine variant: {}", e),
        }
    }
}

impl Clone for EngineVariant {
    fn clone(&self) -> Self {
        self.try_clone().unwrap_or_else(|e| {
            tracing::warn!(target: "values", "Variant copy failed, returning borrowed view: {}", e);
            Self {
                raw: self.raw,
                owned: false,
            }
        })
    }
}

impl fmt::Debug for EngineVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("EngineVariant");
        match self.variant_type() {
            Ok(ty) => s.field("type", &ty),
            Err(_) => s.field("raw", &self.raw),
        };
        s.field("owned", &self.owned).finish()
    }
}

impl VariantProxy for EngineVariant {
    fn backend(&self) -> Backend {
        Backend::Engine
    }

    fn variant_type(&self) -> BindingResult<VariantType> {
        EngineVariant::variant_type(self)
    }

    fn to_host(&self) -> BindingResult<Variant> {
        EngineVariant::to_host(self)
    }

    fn to_engine(&self) -> BindingResult<EngineVariant> {
        self.try_clone()
    }
}
