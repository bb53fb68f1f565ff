//! 驻留字符串 StringName
//!
//! 相等性按驻留标识比较，不比较内容。构造时驻留，销毁时减少驻留引用计数。
//! 宿主实现维护自己的驻留表；引擎实现的标识就是引擎驻留指针。

use super::builtin::{ctor, Backend, EngineBuiltin, EngineValue, StringNameKind};
use super::string::{read_engine_string, string_from_name};
use crate::abi::{self, sys::*};
use crate::core::BindingResult;
use std::collections::HashMap;
use std::ffi::c_char;
use std::fmt;
use std::sync::{Arc, Mutex};

// ============================================================================
// 宿主驻留表
// ============================================================================

#[derive(Default)]
struct Interner {
    ids: HashMap<Arc<str>, u64>,
    entries: HashMap<u64, (Arc<str>, usize)>,
    next_id: u64,
}

static INTERNER: Mutex<Option<Interner>> = Mutex::new(None);

fn with_interner<R>(f: impl FnOnce(&mut Interner) -> R) -> R {
    let mut guard = INTERNER.lock().unwrap_or_else(|e| e.into_inner());
    f(guard.get_or_insert_with(Interner::default))
}

fn intern(name: &str) -> (u64, Arc<str>) {
    with_interner(|interner| {
        if let Some(&id) = interner.ids.get(name) {
            if let Some(entry) = interner.entries.get_mut(&id) {
                entry.1 += 1;
                return (id, entry.0.clone());
            }
        }
        interner.next_id += 1;
        let id = interner.next_id;
        let text: Arc<str> = Arc::from(name);
        interner.ids.insert(text.clone(), id);
        interner.entries.insert(id, (text.clone(), 1));
        (id, text)
    })
}

fn retain(id: u64) {
    with_interner(|interner| {
        if let Some(entry) = interner.entries.get_mut(&id) {
            entry.1 += 1;
        }
    });
}

fn release(id: u64) {
    with_interner(|interner| {
        let remove = match interner.entries.get_mut(&id) {
            Some(entry) => {
                entry.1 = entry.1.saturating_sub(1);
                entry.1 == 0
            }
            None => false,
        };
        if remove {
            if let Some((text, _)) = interner.entries.remove(&id) {
                interner.ids.remove(&text);
            }
        }
    });
}

/// 宿主驻留表中某名字的引用计数（未驻留为 0）
pub fn host_intern_count(name: &str) -> usize {
    with_interner(|interner| {
        interner
            .ids
            .get(name)
            .and_then(|id| interner.entries.get(id))
            .map(|entry| entry.1)
            .unwrap_or(0)
    })
}

// ============================================================================
// 代理
// ============================================================================

/// StringName 的代理接口
pub trait StringNameProxy: Send + Sync + fmt::Debug {
    fn backend(&self) -> Backend;

    /// 驻留标识；同一后端内相等当且仅当标识相等
    fn id(&self) -> u64;

    fn to_utf8(&self) -> BindingResult<String>;

    fn engine_ptr(&self) -> Option<ConstTypePtr>;

    fn to_engine(&self) -> BindingResult<EngineBuiltin<StringNameKind>>;

    fn share(&self) -> Box<dyn StringNameProxy>;
}

/// 用 UTF-8 内容在引擎中驻留
pub(crate) fn engine_string_name(text: &str) -> BindingResult<EngineBuiltin<StringNameKind>> {
    let abi = abi::get()?;
    let mut raw = Opaque8::default();
    unsafe {
        (abi.string_name_new_with_utf8_chars_and_len)(
            raw.as_mut_ptr(),
            text.as_ptr() as *const c_char,
            text.len() as EngineInt,
        );
        Ok(EngineBuiltin::from_raw_owned(raw))
    }
}

#[derive(Debug, Clone)]
pub struct EngineStringName(EngineBuiltin<StringNameKind>);

impl StringNameProxy for EngineStringName {
    fn backend(&self) -> Backend {
        Backend::Engine
    }

    fn id(&self) -> u64 {
        self.0.raw().0[0]
    }

    fn to_utf8(&self) -> BindingResult<String> {
        let string = string_from_name(&self.0)?;
        read_engine_string(string.as_type_ptr())
    }

    fn engine_ptr(&self) -> Option<ConstTypePtr> {
        Some(self.0.as_type_ptr())
    }

    fn to_engine(&self) -> BindingResult<EngineBuiltin<StringNameKind>> {
        self.0.try_clone()
    }

    fn share(&self) -> Box<dyn StringNameProxy> {
        Box::new(self.clone())
    }
}

#[derive(Debug)]
pub struct HostStringName {
    id: u64,
    text: Arc<str>,
}

impl HostStringName {
    pub fn new(text: &str) -> Self {
        let (id, text) = intern(text);
        Self { id, text }
    }
}

impl Clone for HostStringName {
    fn clone(&self) -> Self {
        retain(self.id);
        Self {
            id: self.id,
            text: self.text.clone(),
        }
    }
}

impl Drop for HostStringName {
    fn drop(&mut self) {
        release(self.id);
    }
}

impl StringNameProxy for HostStringName {
    fn backend(&self) -> Backend {
        Backend::Host
    }

    fn id(&self) -> u64 {
        self.id
    }

    fn to_utf8(&self) -> BindingResult<String> {
        Ok(self.text.to_string())
    }

    fn engine_ptr(&self) -> Option<ConstTypePtr> {
        None
    }

    fn to_engine(&self) -> BindingResult<EngineBuiltin<StringNameKind>> {
        engine_string_name(&self.text)
    }

    fn share(&self) -> Box<dyn StringNameProxy> {
        Box::new(self.clone())
    }
}

/// 引擎 StringName 值
pub struct StringName {
    proxy: Box<dyn StringNameProxy>,
}

impl StringName {
    /// 在宿主驻留表中驻留
    pub fn new(text: &str) -> Self {
        Self::from_proxy(Box::new(HostStringName::new(text)))
    }

    /// 在引擎中驻留
    pub fn new_engine(text: &str) -> BindingResult<Self> {
        Ok(Self::from_engine(engine_string_name(text)?))
    }

    /// 由引擎字符串构造
    pub fn from_gstring(text: &super::GString) -> BindingResult<Self> {
        let string = text.to_engine()?;
        Ok(Self::from_engine(EngineBuiltin::construct(
            ctor::FROM_OTHER,
            &[string.as_type_ptr()],
        )?))
    }

    pub fn from_proxy(proxy: Box<dyn StringNameProxy>) -> Self {
        Self { proxy }
    }

    pub fn id(&self) -> u64 {
        self.proxy.id()
    }

    pub fn to_utf8(&self) -> BindingResult<String> {
        self.proxy.to_utf8()
    }

    pub fn to_gstring(&self) -> BindingResult<super::GString> {
        match self.proxy.backend() {
            Backend::Host => Ok(super::GString::from(self.to_utf8()?)),
            Backend::Engine => {
                let name = self.proxy.to_engine()?;
                Ok(super::GString::from_engine(string_from_name(&name)?))
            }
        }
    }

    /// 引擎驻留标识（宿主后端会先在引擎中驻留）
    fn engine_id(&self) -> BindingResult<u64> {
        match self.proxy.engine_ptr() {
            Some(_) => Ok(self.proxy.id()),
            None => Ok(self.proxy.to_engine()?.raw().0[0]),
        }
    }
}

impl EngineValue for StringName {
    type Kind = StringNameKind;

    fn backend(&self) -> Backend {
        self.proxy.backend()
    }

    fn engine_ptr(&self) -> Option<ConstTypePtr> {
        self.proxy.engine_ptr()
    }

    fn to_engine(&self) -> BindingResult<EngineBuiltin<StringNameKind>> {
        self.proxy.to_engine()
    }

    fn from_engine(value: EngineBuiltin<StringNameKind>) -> Self {
        Self::from_proxy(Box::new(EngineStringName(value)))
    }
}

impl Clone for StringName {
    fn clone(&self) -> Self {
        Self {
            proxy: self.proxy.share(),
        }
    }
}

impl Default for StringName {
    fn default() -> Self {
        Self::new("")
    }
}

impl PartialEq for StringName {
    fn eq(&self, other: &Self) -> bool {
        if self.proxy.backend() == other.proxy.backend() {
            return self.id() == other.id();
        }
        match (self.engine_id(), other.engine_id()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for StringName {}

impl fmt::Debug for StringName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_utf8() {
            Ok(text) => write!(f, "&{:?}", text),
            Err(_) => write!(f, "StringName(#{})", self.id()),
        }
    }
}

impl fmt::Display for StringName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_utf8() {
            Ok(text) => f.write_str(&text),
            Err(_) => write!(f, "#{}", self.id()),
        }
    }
}

impl From<&str> for StringName {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_is_by_identity() {
        let a = StringName::new("interning_identity_a");
        let b = StringName::new("interning_identity_a");
        let c = StringName::new("interning_identity_c");
        assert_eq!(a.id(), b.id());
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_drop_releases_intern_refcount() {
        let name = "interning_refcount_check";
        assert_eq!(host_intern_count(name), 0);
        let a = StringName::new(name);
        let b = a.clone();
        assert_eq!(host_intern_count(name), 2);
        drop(a);
        assert_eq!(host_intern_count(name), 1);
        drop(b);
        assert_eq!(host_intern_count(name), 0);
    }
}
