//! 信号 Signal
//!
//! 对象加信号名。绑定到对象的信号经由引擎连接和发射；没有对象的宿主信号
//! 在本地维护订阅列表，发射时按连接顺序调用。

use super::builtin::{ctor, Backend, EngineBuiltin, EngineValue, SignalKind};
use super::string_name::engine_string_name;
use super::{Callable, EngineVariant, StringName, Variant};
use crate::abi::sys::*;
use crate::core::{BindingError, BindingResult, EngineErrorCode};
use crate::handle::EngineHandle;
use std::fmt;
use std::sync::{Arc, Mutex};

pub(crate) mod hash {
    pub const CONNECT: i64 = 979702392;
    pub const DISCONNECT: i64 = 3470848906;
    pub const IS_CONNECTED: i64 = 4129521963;
    pub const EMIT: i64 = 3286317445;
    pub const GET_OBJECT: i64 = 4008621732;
    pub const GET_NAME: i64 = 1825232092;
}

/// Signal 的代理接口
pub trait SignalProxy: Send + Sync + fmt::Debug {
    fn backend(&self) -> Backend;

    fn object(&self) -> BindingResult<Option<EngineHandle>>;

    fn name(&self) -> BindingResult<String>;

    fn connect(&self, callable: &Callable, flags: u32) -> BindingResult<()>;

    fn disconnect(&self, callable: &Callable) -> BindingResult<()>;

    fn is_connected(&self, callable: &Callable) -> BindingResult<bool>;

    fn emit(&self, args: &[Variant]) -> BindingResult<()>;

    fn share(&self) -> Box<dyn SignalProxy>;

    fn engine_ptr(&self) -> Option<ConstTypePtr>;

    fn to_engine(&self) -> BindingResult<EngineBuiltin<SignalKind>>;
}

fn with_callable<R>(callable: &Callable, f: impl FnOnce(ConstTypePtr) -> R) -> BindingResult<R> {
    if let Some(ptr) = callable.engine_ptr() {
        return Ok(f(ptr));
    }
    let temp = callable.to_engine()?;
    Ok(f(temp.as_type_ptr()))
}

// ============================================================================
// 引擎实现
// ============================================================================

#[derive(Debug, Clone)]
pub struct EngineSignal(EngineBuiltin<SignalKind>);

impl SignalProxy for EngineSignal {
    fn backend(&self) -> Backend {
        Backend::Engine
    }

    fn object(&self) -> BindingResult<Option<EngineHandle>> {
        let object: EngineHandle = self.0.call("get_object", hash::GET_OBJECT, &[])?;
        Ok(object.non_null())
    }

    fn name(&self) -> BindingResult<String> {
        let name: StringName = self.0.call("get_name", hash::GET_NAME, &[])?;
        name.to_utf8()
    }

    fn connect(&self, callable: &Callable, flags: u32) -> BindingResult<()> {
        let flags = flags as i64;
        let code: EngineErrorCode = with_callable(callable, |ptr| {
            self.0.call(
                "connect",
                hash::CONNECT,
                &[ptr, &flags as *const i64 as ConstTypePtr],
            )
        })??;
        code.into_result()
    }

    fn disconnect(&self, callable: &Callable) -> BindingResult<()> {
        with_callable(callable, |ptr| {
            self.0.call::<()>("disconnect", hash::DISCONNECT, &[ptr])
        })?
    }

    fn is_connected(&self, callable: &Callable) -> BindingResult<bool> {
        with_callable(callable, |ptr| {
            self.0.call("is_connected", hash::IS_CONNECTED, &[ptr])
        })?
    }

    fn emit(&self, args: &[Variant]) -> BindingResult<()> {
        let args = args
            .iter()
            .map(EngineVariant::from_host)
            .collect::<BindingResult<Vec<_>>>()?;
        let ptrs: Vec<ConstTypePtr> = args.iter().map(EngineVariant::as_ptr).collect();
        self.0.call::<()>("emit", hash::EMIT, &ptrs)
    }

    fn share(&self) -> Box<dyn SignalProxy> {
        Box::new(self.clone())
    }

    fn engine_ptr(&self) -> Option<ConstTypePtr> {
        Some(self.0.as_type_ptr())
    }

    fn to_engine(&self) -> BindingResult<EngineBuiltin<SignalKind>> {
        self.0.try_clone()
    }
}

// ============================================================================
// 宿主实现
// ============================================================================

#[derive(Debug, Clone)]
pub struct HostSignal {
    object: Option<EngineHandle>,
    name: StringName,
    local: Arc<Mutex<Vec<Callable>>>,
}

impl HostSignal {
    fn engine(&self) -> BindingResult<EngineSignal> {
        Ok(EngineSignal(self.to_engine()?))
    }

    fn subscribers(&self) -> Vec<Callable> {
        self.local.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl SignalProxy for HostSignal {
    fn backend(&self) -> Backend {
        Backend::Host
    }

    fn object(&self) -> BindingResult<Option<EngineHandle>> {
        Ok(self.object)
    }

    fn name(&self) -> BindingResult<String> {
        self.name.to_utf8()
    }

    fn connect(&self, callable: &Callable, flags: u32) -> BindingResult<()> {
        if self.object.is_some() {
            return self.engine()?.connect(callable, flags);
        }
        let mut local = self.local.lock().unwrap_or_else(|e| e.into_inner());
        if local.contains(callable) {
            return Err(BindingError::Engine(EngineErrorCode::InvalidParameter));
        }
        local.push(callable.clone());
        Ok(())
    }

    fn disconnect(&self, callable: &Callable) -> BindingResult<()> {
        if self.object.is_some() {
            return self.engine()?.disconnect(callable);
        }
        self.local
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|c| c != callable);
        Ok(())
    }

    fn is_connected(&self, callable: &Callable) -> BindingResult<bool> {
        if self.object.is_some() {
            return self.engine()?.is_connected(callable);
        }
        Ok(self.subscribers().contains(callable))
    }

    fn emit(&self, args: &[Variant]) -> BindingResult<()> {
        if self.object.is_some() {
            return self.engine()?.emit(args);
        }
        for callable in self.subscribers() {
            callable.call(args)?;
        }
        Ok(())
    }

    fn share(&self) -> Box<dyn SignalProxy> {
        Box::new(self.clone())
    }

    fn engine_ptr(&self) -> Option<ConstTypePtr> {
        None
    }

    fn to_engine(&self) -> BindingResult<EngineBuiltin<SignalKind>> {
        let Some(object) = self.object else {
            return EngineBuiltin::new_default();
        };
        let name = engine_string_name(&self.name.to_utf8()?)?;
        let addr = object.addr();
        EngineBuiltin::construct(
            ctor::FROM_OTHER,
            &[&addr as *const usize as ConstTypePtr, name.as_type_ptr()],
        )
    }
}

// ============================================================================
// 包装
// ============================================================================

/// 引擎 Signal 值
pub struct Signal {
    proxy: Box<dyn SignalProxy>,
}

impl Signal {
    /// 对象上的信号
    pub fn new(object: EngineHandle, name: impl Into<StringName>) -> Self {
        Self::from_proxy(Box::new(HostSignal {
            object: object.non_null(),
            name: name.into(),
            local: Arc::default(),
        }))
    }

    /// 只在宿主侧分发的信号
    pub fn local(name: impl Into<StringName>) -> Self {
        Self::from_proxy(Box::new(HostSignal {
            object: None,
            name: name.into(),
            local: Arc::default(),
        }))
    }

    pub fn from_proxy(proxy: Box<dyn SignalProxy>) -> Self {
        Self { proxy }
    }

    pub fn object(&self) -> BindingResult<Option<EngineHandle>> {
        self.proxy.object()
    }

    pub fn name(&self) -> BindingResult<String> {
        self.proxy.name()
    }

    pub fn connect(&self, callable: &Callable, flags: u32) -> BindingResult<()> {
        self.proxy.connect(callable, flags)
    }

    pub fn disconnect(&self, callable: &Callable) -> BindingResult<()> {
        self.proxy.disconnect(callable)
    }

    pub fn is_connected(&self, callable: &Callable) -> BindingResult<bool> {
        self.proxy.is_connected(callable)
    }

    pub fn emit(&self, args: &[Variant]) -> BindingResult<()> {
        self.proxy.emit(args)
    }
}

impl EngineValue for Signal {
    type Kind = SignalKind;

    fn backend(&self) -> Backend {
        self.proxy.backend()
    }

    fn engine_ptr(&self) -> Option<ConstTypePtr> {
        self.proxy.engine_ptr()
    }

    fn to_engine(&self) -> BindingResult<EngineBuiltin<SignalKind>> {
        self.proxy.to_engine()
    }

    fn from_engine(value: EngineBuiltin<SignalKind>) -> Self {
        Self::from_proxy(Box::new(EngineSignal(value)))
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::local("")
    }
}

impl Clone for Signal {
    fn clone(&self) -> Self {
        Self {
            proxy: self.proxy.share(),
        }
    }
}

impl PartialEq for Signal {
    fn eq(&self, other: &Self) -> bool {
        match (self.object(), other.object(), self.name(), other.name()) {
            (Ok(a), Ok(b), Ok(x), Ok(y)) => a == b && x == y,
            _ => false,
        }
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Signal").field(&self.proxy).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    #[test]
    fn test_local_signal_dispatch() {
        let total = Arc::new(AtomicI64::new(0));
        let sink = total.clone();
        let on_hit = Callable::from_fn("on_hit", move |args| {
            sink.fetch_add(args[0].try_to::<i64>()?, Ordering::SeqCst);
            Ok(Variant::Nil)
        });

        let hit = Signal::local("hit");
        hit.connect(&on_hit, 0).unwrap();
        assert!(hit.is_connected(&on_hit).unwrap());
        assert!(hit.connect(&on_hit, 0).is_err());

        hit.emit(&[Variant::from(4i64)]).unwrap();
        hit.clone().emit(&[Variant::from(6i64)]).unwrap();
        assert_eq!(total.load(Ordering::SeqCst), 10);

        hit.disconnect(&on_hit).unwrap();
        hit.emit(&[Variant::from(100i64)]).unwrap();
        assert_eq!(total.load(Ordering::SeqCst), 10);
    }
}
