//! 引擎字符串 String
//!
//! 两种实现：`EngineString` 持有引擎字符串，`HostString` 持有宿主侧 UTF-8 缓冲。
//! 两者都能编组进调用帧，宿主实现在需要时物化为临时引擎值。

use super::builtin::{ctor, Backend, EngineBuiltin, EngineValue, NodePathKind, StringKind, StringNameKind};
use crate::abi::{self, sys::*};
use crate::core::{BindingError, BindingResult};
use std::ffi::c_char;
use std::fmt;
use std::sync::Arc;

/// String 的代理接口
pub trait StringProxy: Send + Sync + fmt::Debug {
    fn backend(&self) -> Backend;

    fn to_utf8(&self) -> BindingResult<String>;

    fn engine_ptr(&self) -> Option<ConstTypePtr>;

    fn to_engine(&self) -> BindingResult<EngineBuiltin<StringKind>>;

    fn share(&self) -> Box<dyn StringProxy>;
}

/// 用 UTF-8 内容构造引擎字符串
pub(crate) fn engine_string(text: &str) -> BindingResult<EngineBuiltin<StringKind>> {
    let abi = abi::get()?;
    let mut raw = Opaque8::default();
    unsafe {
        (abi.string_new_with_utf8_chars_and_len)(
            raw.as_mut_ptr(),
            text.as_ptr() as *const c_char,
            text.len() as EngineInt,
        );
        Ok(EngineBuiltin::from_raw_owned(raw))
    }
}

/// 读取引擎字符串的 UTF-8 内容
pub(crate) fn read_engine_string(string: ConstStringPtr) -> BindingResult<String> {
    let abi = abi::get()?;
    let len = unsafe { (abi.string_to_utf8_chars)(string, std::ptr::null_mut(), 0) };
    let mut buf = vec![0u8; len.max(0) as usize];
    if !buf.is_empty() {
        unsafe { (abi.string_to_utf8_chars)(string, buf.as_mut_ptr() as *mut c_char, len) };
    }
    String::from_utf8(buf).map_err(|e| BindingError::type_mismatch("UTF-8 string", e))
}

/// StringName 转成引擎字符串
pub(crate) fn string_from_name(name: &EngineBuiltin<StringNameKind>) -> BindingResult<EngineBuiltin<StringKind>> {
    EngineBuiltin::construct(ctor::FROM_OTHER, &[name.as_type_ptr()])
}

/// NodePath 转成引擎字符串
pub(crate) fn string_from_path(path: &EngineBuiltin<NodePathKind>) -> BindingResult<EngineBuiltin<StringKind>> {
    EngineBuiltin::construct(ctor::FROM_NODE_PATH, &[path.as_type_ptr()])
}

#[derive(Debug, Clone)]
pub struct EngineString(EngineBuiltin<StringKind>);

impl EngineString {
    pub fn new(text: &str) -> BindingResult<Self> {
        engine_string(text).map(Self)
    }
}

impl StringProxy for EngineString {
    fn backend(&self) -> Backend {
        Backend::Engine
    }

    fn to_utf8(&self) -> BindingResult<String> {
        read_engine_string(self.0.as_type_ptr())
    }

    fn engine_ptr(&self) -> Option<ConstTypePtr> {
        Some(self.0.as_type_ptr())
    }

    fn to_engine(&self) -> BindingResult<EngineBuiltin<StringKind>> {
        self.0.try_clone()
    }

    fn share(&self) -> Box<dyn StringProxy> {
        Box::new(self.clone())
    }
}

#[derive(Debug, Clone)]
pub struct HostString(Arc<str>);

impl StringProxy for HostString {
    fn backend(&self) -> Backend {
        Backend::Host
    }

    fn to_utf8(&self) -> BindingResult<String> {
        Ok(self.0.to_string())
    }

    fn engine_ptr(&self) -> Option<ConstTypePtr> {
        None
    }

    fn to_engine(&self) -> BindingResult<EngineBuiltin<StringKind>> {
        engine_string(&self.0)
    }

    fn share(&self) -> Box<dyn StringProxy> {
        Box::new(self.clone())
    }
}

/// 引擎 String 值
pub struct GString {
    proxy: Box<dyn StringProxy>,
}

impl GString {
    /// 宿主后端字符串
    pub fn new(text: &str) -> Self {
        Self::from_proxy(Box::new(HostString(Arc::from(text))))
    }

    /// 引擎后端字符串
    pub fn new_engine(text: &str) -> BindingResult<Self> {
        Ok(Self::from_proxy(Box::new(EngineString::new(text)?)))
    }

    pub fn from_proxy(proxy: Box<dyn StringProxy>) -> Self {
        Self { proxy }
    }

    pub fn to_utf8(&self) -> BindingResult<String> {
        self.proxy.to_utf8()
    }

    /// 字符数
    pub fn len(&self) -> BindingResult<usize> {
        Ok(self.to_utf8()?.chars().count())
    }

    pub fn is_empty(&self) -> BindingResult<bool> {
        Ok(self.to_utf8()?.is_empty())
    }

    /// 换成引擎后端
    pub fn to_engine_backed(&self) -> BindingResult<Self> {
        Ok(Self::from_engine(self.proxy.to_engine()?))
    }
}

impl EngineValue for GString {
    type Kind = StringKind;

    fn backend(&self) -> Backend {
        self.proxy.backend()
    }

    fn engine_ptr(&self) -> Option<ConstTypePtr> {
        self.proxy.engine_ptr()
    }

    fn to_engine(&self) -> BindingResult<EngineBuiltin<StringKind>> {
        self.proxy.to_engine()
    }

    fn from_engine(value: EngineBuiltin<StringKind>) -> Self {
        Self::from_proxy(Box::new(EngineString(value)))
    }
}

impl Clone for GString {
    fn clone(&self) -> Self {
        Self {
            proxy: self.proxy.share(),
        }
    }
}

impl Default for GString {
    fn default() -> Self {
        Self::new("")
    }
}

impl PartialEq for GString {
    fn eq(&self, other: &Self) -> bool {
        match (self.to_utf8(), other.to_utf8()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialEq<str> for GString {
    fn eq(&self, other: &str) -> bool {
        self.to_utf8().map(|s| s == other).unwrap_or(false)
    }
}

impl PartialEq<&str> for GString {
    fn eq(&self, other: &&str) -> bool {
        self == *other
    }
}

impl fmt::Debug for GString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_utf8() {
            Ok(text) => write!(f, "GString({:?}, {:?})", text, self.proxy.backend()),
            Err(_) => write!(f, "GString(<unreadable>, {:?})", self.proxy.backend()),
        }
    }
}

impl fmt::Display for GString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_utf8() {
            Ok(text) => f.write_str(&text),
            Err(_) => f.write_str("<unreadable>"),
        }
    }
}

impl From<&str> for GString {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for GString {
    fn from(text: String) -> Self {
        Self::from_proxy(Box::new(HostString(Arc::from(text))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_string_without_engine() {
        let s = GString::from("héllo");
        assert_eq!(s.backend(), Backend::Host);
        assert_eq!(s.len().unwrap(), 5);
        assert!(s.engine_ptr().is_none());
        assert_eq!(s, "héllo");
        assert_eq!(s.clone(), s);
        assert!(GString::default().is_empty().unwrap());
    }
}
