//! 可调用对象 Callable
//!
//! 三种形态：无效值、对象加方法名、宿主闭包。宿主闭包交给引擎时包装成自定义
//! Callable，引擎在最后一个引用消失时通过释放回调归还闭包。

use super::builtin::{ctor, Backend, CallableKind, EngineBuiltin, EngineValue};
use super::string_name::engine_string_name;
use super::{Array, EngineVariant, StringName, Variant};
use crate::abi::{self, sys::*};
use crate::core::{BindingError, BindingResult};
use crate::handle::EngineHandle;
use std::ffi::c_void;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

pub(crate) mod hash {
    pub const CALLV: i64 = 413578926;
    pub const IS_VALID: i64 = 3918633141;
    pub const GET_OBJECT: i64 = 4008621732;
    pub const GET_METHOD: i64 = 1825232092;
}

type HostFnBody = dyn Fn(&[Variant]) -> BindingResult<Variant> + Send + Sync;

/// 宿主闭包
pub struct HostFn {
    name: String,
    func: Box<HostFnBody>,
}

impl HostFn {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn invoke(&self, args: &[Variant]) -> BindingResult<Variant> {
        (self.func)(args)
    }
}

impl fmt::Debug for HostFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostFn({})", self.name)
    }
}

/// 比较用的身份
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallableIdentity {
    Invalid,
    /// 自定义 Callable 的用户数据地址
    Custom(usize),
    /// 对象地址加方法名
    Method(usize, String),
}

/// Callable 的代理接口
pub trait CallableProxy: Send + Sync + fmt::Debug {
    fn backend(&self) -> Backend;

    fn is_valid(&self) -> BindingResult<bool>;

    fn call(&self, args: &[Variant]) -> BindingResult<Variant>;

    fn identity(&self) -> BindingResult<CallableIdentity>;

    fn share(&self) -> Box<dyn CallableProxy>;

    fn engine_ptr(&self) -> Option<ConstTypePtr>;

    fn to_engine(&self) -> BindingResult<EngineBuiltin<CallableKind>>;
}

// ============================================================================
// 引擎实现
// ============================================================================

#[derive(Debug, Clone)]
pub struct EngineCallable(EngineBuiltin<CallableKind>);

impl CallableProxy for EngineCallable {
    fn backend(&self) -> Backend {
        Backend::Engine
    }

    fn is_valid(&self) -> BindingResult<bool> {
        self.0.call("is_valid", hash::IS_VALID, &[])
    }

    fn call(&self, args: &[Variant]) -> BindingResult<Variant> {
        let args: Array = args.iter().cloned().collect();
        let args = args.to_engine()?;
        self.0.call("callv", hash::CALLV, &[args.as_type_ptr()])
    }

    fn identity(&self) -> BindingResult<CallableIdentity> {
        let abi = abi::get()?;
        let userdata =
            unsafe { (abi.callable_custom_get_userdata)(self.0.as_type_ptr(), abi.library()) };
        if !userdata.is_null() {
            return Ok(CallableIdentity::Custom(userdata as usize));
        }
        let object: EngineHandle = self.0.call("get_object", hash::GET_OBJECT, &[])?;
        let method: StringName = self.0.call("get_method", hash::GET_METHOD, &[])?;
        if object.is_null() {
            return Ok(CallableIdentity::Invalid);
        }
        Ok(CallableIdentity::Method(object.addr(), method.to_utf8()?))
    }

    fn share(&self) -> Box<dyn CallableProxy> {
        Box::new(self.clone())
    }

    fn engine_ptr(&self) -> Option<ConstTypePtr> {
        Some(self.0.as_type_ptr())
    }

    fn to_engine(&self) -> BindingResult<EngineBuiltin<CallableKind>> {
        self.0.try_clone()
    }
}

// ============================================================================
// 宿主实现
// ============================================================================

#[derive(Debug, Clone, Default)]
pub enum HostCallable {
    #[default]
    Invalid,
    Function(Arc<HostFn>),
    Method {
        object: EngineHandle,
        method: StringName,
    },
}

impl CallableProxy for HostCallable {
    fn backend(&self) -> Backend {
        Backend::Host
    }

    fn is_valid(&self) -> BindingResult<bool> {
        Ok(!matches!(self, Self::Invalid))
    }

    fn call(&self, args: &[Variant]) -> BindingResult<Variant> {
        match self {
            Self::Invalid => Err(BindingError::CallFailed("invalid callable".to_string())),
            Self::Function(f) => f.invoke(args),
            Self::Method { .. } => EngineCallable(self.to_engine()?).call(args),
        }
    }

    fn identity(&self) -> BindingResult<CallableIdentity> {
        Ok(match self {
            Self::Invalid => CallableIdentity::Invalid,
            Self::Function(f) => CallableIdentity::Custom(Arc::as_ptr(f) as usize),
            Self::Method { object, method } => CallableIdentity::Method(object.addr(), method.to_utf8()?),
        })
    }

    fn share(&self) -> Box<dyn CallableProxy> {
        Box::new(self.clone())
    }

    fn engine_ptr(&self) -> Option<ConstTypePtr> {
        None
    }

    fn to_engine(&self) -> BindingResult<EngineBuiltin<CallableKind>> {
        match self {
            Self::Invalid => EngineBuiltin::new_default(),
            Self::Method { object, method } => {
                let name = engine_string_name(&method.to_utf8()?)?;
                let addr = object.addr();
                EngineBuiltin::construct(
                    ctor::FROM_OTHER,
                    &[&addr as *const usize as ConstTypePtr, name.as_type_ptr()],
                )
            }
            Self::Function(f) => {
                let abi = abi::get()?;
                let info = CallableCustomInfo {
                    callable_userdata: Arc::into_raw(f.clone()) as *mut c_void,
                    token: abi.library(),
                    object_id: 0,
                    call_func: Some(call_host_fn),
                    free_func: Some(free_host_fn),
                };
                let mut raw = Opaque16::default();
                unsafe {
                    (abi.callable_custom_create)(raw.as_mut_ptr(), &info);
                    Ok(EngineBuiltin::from_raw_owned(raw))
                }
            }
        }
    }
}

unsafe extern "C" fn call_host_fn(
    userdata: *mut c_void,
    args: *const ConstVariantPtr,
    argc: EngineInt,
    ret: VariantPtr,
    error: *mut CallError,
) {
    let result = catch_unwind(AssertUnwindSafe(|| {
        let func = &*(userdata as *const HostFn);
        let args = (0..argc.max(0) as usize)
            .map(|i| EngineVariant::borrowed(*args.add(i)).to_host())
            .collect::<BindingResult<Vec<_>>>()?;
        let value = func.invoke(&args)?;
        EngineVariant::from_host(&value)?.into_owned_raw()
    }));
    let failure = match result {
        Ok(Ok(raw)) => {
            if !ret.is_null() {
                std::ptr::write_unaligned(ret as *mut RawVariant, raw);
            } else {
                drop(EngineVariant::from_raw_owned(raw));
            }
            if !error.is_null() {
                (*error).error = CallError::OK;
            }
            return;
        }
        Ok(Err(e)) => e.to_string(),
        Err(_) => "host callable panicked".to_string(),
    };
    crate::engine_error!("Host callable failed: {}", failure);
    if let Ok(abi) = abi::get() {
        if !ret.is_null() {
            (abi.variant_new_nil)(ret);
        }
    }
    if !error.is_null() {
        (*error).error = CallError::INVALID_METHOD;
    }
}

unsafe extern "C" fn free_host_fn(userdata: *mut c_void) {
    if !userdata.is_null() {
        drop(Arc::from_raw(userdata as *const HostFn));
    }
}

// ============================================================================
// 包装
// ============================================================================

/// 引擎 Callable 值
pub struct Callable {
    proxy: Box<dyn CallableProxy>,
}

impl Callable {
    /// 无效值
    pub fn invalid() -> Self {
        Self::from_proxy(Box::new(HostCallable::Invalid))
    }

    /// 包装一个宿主闭包
    pub fn from_fn<F>(name: &str, func: F) -> Self
    where
        F: Fn(&[Variant]) -> BindingResult<Variant> + Send + Sync + 'static,
    {
        Self::from_proxy(Box::new(HostCallable::Function(Arc::new(HostFn {
            name: name.to_string(),
            func: Box::new(func),
        }))))
    }

    /// 对象上的方法
    pub fn from_object_method(object: EngineHandle, method: impl Into<StringName>) -> Self {
        Self::from_proxy(Box::new(HostCallable::Method {
            object,
            method: method.into(),
        }))
    }

    pub fn from_proxy(proxy: Box<dyn CallableProxy>) -> Self {
        Self { proxy }
    }

    pub fn is_valid(&self) -> BindingResult<bool> {
        self.proxy.is_valid()
    }

    pub fn call(&self, args: &[Variant]) -> BindingResult<Variant> {
        self.proxy.call(args)
    }

    pub fn identity(&self) -> BindingResult<CallableIdentity> {
        self.proxy.identity()
    }

    pub fn to_engine_backed(&self) -> BindingResult<Self> {
        Ok(Self::from_engine(self.proxy.to_engine()?))
    }
}

impl EngineValue for Callable {
    type Kind = CallableKind;

    fn backend(&self) -> Backend {
        self.proxy.backend()
    }

    fn engine_ptr(&self) -> Option<ConstTypePtr> {
        self.proxy.engine_ptr()
    }

    fn to_engine(&self) -> BindingResult<EngineBuiltin<CallableKind>> {
        self.proxy.to_engine()
    }

    fn from_engine(value: EngineBuiltin<CallableKind>) -> Self {
        Self::from_proxy(Box::new(EngineCallable(value)))
    }
}

impl Default for Callable {
    fn default() -> Self {
        Self::invalid()
    }
}

impl Clone for Callable {
    fn clone(&self) -> Self {
        Self {
            proxy: self.proxy.share(),
        }
    }
}

impl PartialEq for Callable {
    fn eq(&self, other: &Self) -> bool {
        match (self.identity(), other.identity()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Callable").field(&self.proxy).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_fn_call_and_identity() {
        let add = Callable::from_fn("add", |args| {
            let a = args.first().map(|v| v.try_to::<i64>()).transpose()?.unwrap_or(0);
            let b = args.get(1).map(|v| v.try_to::<i64>()).transpose()?.unwrap_or(0);
            Ok(Variant::from(a + b))
        });
        assert!(add.is_valid().unwrap());
        assert_eq!(add.call(&[Variant::from(2i64), Variant::from(3i64)]).unwrap(), Variant::Int(5));
        assert_eq!(add, add.clone());
        assert_ne!(add, Callable::from_fn("add", |_| Ok(Variant::Nil)));
    }

    #[test]
    fn test_invalid_callable() {
        let c = Callable::default();
        assert!(!c.is_valid().unwrap());
        assert!(c.call(&[]).is_err());
    }
}
