//! 字典 Dictionary
//!
//! Variant 到 Variant 的映射，按插入顺序遍历。共享与复制语义同 Array。

use super::builtin::{Backend, DictionaryKind, EngineBuiltin, EngineValue};
use super::{Array, EngineVariant, Variant};
use crate::abi::{self, sys::*};
use crate::core::{BindingError, BindingResult};
use std::fmt;
use std::sync::Arc;

pub(crate) mod hash {
    pub const SIZE: i64 = 3173160232;
    pub const HAS: i64 = 3680194679;
    pub const ERASE: i64 = 1776646889;
    pub const KEYS: i64 = 4144163970;
    pub const CLEAR: i64 = 3218959716;
    pub const DUPLICATE: i64 = 830099069;
}

/// Dictionary 的代理接口
pub trait DictionaryProxy: Send + Sync + fmt::Debug {
    fn backend(&self) -> Backend;

    fn len(&self) -> BindingResult<usize>;

    fn has(&self, key: &Variant) -> BindingResult<bool>;

    fn get(&self, key: &Variant) -> BindingResult<Option<Variant>>;

    fn set(&mut self, key: Variant, value: Variant) -> BindingResult<()>;

    /// 删除并返回旧值
    fn remove(&mut self, key: &Variant) -> BindingResult<Option<Variant>>;

    fn clear(&mut self) -> BindingResult<()>;

    /// 按插入顺序的键
    fn keys(&self) -> BindingResult<Vec<Variant>>;

    fn duplicate(&self, deep: bool) -> BindingResult<Box<dyn DictionaryProxy>>;

    fn share(&self) -> Box<dyn DictionaryProxy>;

    fn engine_ptr(&self) -> Option<ConstTypePtr>;

    fn to_engine(&self) -> BindingResult<EngineBuiltin<DictionaryKind>>;
}

// ============================================================================
// 引擎实现
// ============================================================================

#[derive(Debug, Clone)]
pub struct EngineDictionary(EngineBuiltin<DictionaryKind>);

impl DictionaryProxy for EngineDictionary {
    fn backend(&self) -> Backend {
        Backend::Engine
    }

    fn len(&self) -> BindingResult<usize> {
        let size: i64 = self.0.call("size", hash::SIZE, &[])?;
        Ok(size.max(0) as usize)
    }

    fn has(&self, key: &Variant) -> BindingResult<bool> {
        let key = EngineVariant::from_host(key)?;
        self.0.call("has", hash::HAS, &[key.as_ptr()])
    }

    fn get(&self, key: &Variant) -> BindingResult<Option<Variant>> {
        let key = EngineVariant::from_host(key)?;
        let abi = abi::get()?;
        let ptr = unsafe { (abi.dictionary_operator_index_const)(self.0.as_type_ptr(), key.as_ptr()) };
        if ptr.is_null() {
            return Ok(None);
        }
        unsafe { EngineVariant::borrowed(ptr) }.to_host().map(Some)
    }

    fn set(&mut self, key: Variant, value: Variant) -> BindingResult<()> {
        let key = EngineVariant::from_host(&key)?;
        let new = EngineVariant::from_host(&value)?.into_owned_raw()?;
        let abi = abi::get()?;
        unsafe {
            // 不存在的键由引擎插入 Nil 后返回其地址
            let slot = (abi.dictionary_operator_index)(self.0.as_mut_type_ptr(), key.as_ptr());
            if slot.is_null() {
                drop(EngineVariant::from_raw_owned(new));
                return Err(BindingError::CallFailed(
                    "dictionary refused key".to_string(),
                ));
            }
            (abi.variant_destroy)(slot);
            std::ptr::write_unaligned(slot as *mut RawVariant, new);
        }
        Ok(())
    }

    fn remove(&mut self, key: &Variant) -> BindingResult<Option<Variant>> {
        let old = self.get(key)?;
        if old.is_some() {
            let key = EngineVariant::from_host(key)?;
            let _: bool = self.0.call_mut("erase", hash::ERASE, &[key.as_ptr()])?;
        }
        Ok(old)
    }

    fn clear(&mut self) -> BindingResult<()> {
        self.0.call_mut("clear", hash::CLEAR, &[])
    }

    fn keys(&self) -> BindingResult<Vec<Variant>> {
        let keys: Array = self.0.call("keys", hash::KEYS, &[])?;
        keys.to_vec()
    }

    fn duplicate(&self, deep: bool) -> BindingResult<Box<dyn DictionaryProxy>> {
        let flag = to_engine_bool(deep);
        let copy: EngineBuiltin<DictionaryKind> =
            self.0
                .call("duplicate", hash::DUPLICATE, &[&flag as *const EngineBool as ConstTypePtr])?;
        Ok(Box::new(EngineDictionary(copy)))
    }

    fn share(&self) -> Box<dyn DictionaryProxy> {
        Box::new(self.clone())
    }

    fn engine_ptr(&self) -> Option<ConstTypePtr> {
        Some(self.0.as_type_ptr())
    }

    fn to_engine(&self) -> BindingResult<EngineBuiltin<DictionaryKind>> {
        self.0.try_clone()
    }
}

// ============================================================================
// 宿主实现
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct HostDictionary {
    entries: Arc<Vec<(Variant, Variant)>>,
}

impl HostDictionary {
    fn position(&self, key: &Variant) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k == key)
    }
}

impl DictionaryProxy for HostDictionary {
    fn backend(&self) -> Backend {
        Backend::Host
    }

    fn len(&self) -> BindingResult<usize> {
        Ok(self.entries.len())
    }

    fn has(&self, key: &Variant) -> BindingResult<bool> {
        Ok(self.position(key).is_some())
    }

    fn get(&self, key: &Variant) -> BindingResult<Option<Variant>> {
        Ok(self.position(key).map(|i| self.entries[i].1.clone()))
    }

    fn set(&mut self, key: Variant, value: Variant) -> BindingResult<()> {
        match self.position(&key) {
            Some(i) => Arc::make_mut(&mut self.entries)[i].1 = value,
            None => Arc::make_mut(&mut self.entries).push((key, value)),
        }
        Ok(())
    }

    fn remove(&mut self, key: &Variant) -> BindingResult<Option<Variant>> {
        Ok(self
            .position(key)
            .map(|i| Arc::make_mut(&mut self.entries).remove(i).1))
    }

    fn clear(&mut self) -> BindingResult<()> {
        Arc::make_mut(&mut self.entries).clear();
        Ok(())
    }

    fn keys(&self) -> BindingResult<Vec<Variant>> {
        Ok(self.entries.iter().map(|(k, _)| k.clone()).collect())
    }

    fn duplicate(&self, deep: bool) -> BindingResult<Box<dyn DictionaryProxy>> {
        let entries = if deep {
            self.entries
                .iter()
                .map(|(k, v)| Ok((k.duplicate(true)?, v.duplicate(true)?)))
                .collect::<BindingResult<Vec<_>>>()?
        } else {
            self.entries.as_ref().clone()
        };
        Ok(Box::new(HostDictionary {
            entries: Arc::new(entries),
        }))
    }

    fn share(&self) -> Box<dyn DictionaryProxy> {
        Box::new(self.clone())
    }

    fn engine_ptr(&self) -> Option<ConstTypePtr> {
        None
    }

    fn to_engine(&self) -> BindingResult<EngineBuiltin<DictionaryKind>> {
        let mut dict = EngineDictionary(EngineBuiltin::new_default()?);
        for (key, value) in self.entries.iter() {
            dict.set(key.clone(), value.clone())?;
        }
        Ok(dict.0)
    }
}

// ============================================================================
// 包装
// ============================================================================

/// 引擎 Dictionary 值
pub struct Dictionary {
    proxy: Box<dyn DictionaryProxy>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::from_proxy(Box::new(HostDictionary::default()))
    }

    pub fn new_engine() -> BindingResult<Self> {
        Ok(Self::from_engine(EngineBuiltin::new_default()?))
    }

    pub fn from_proxy(proxy: Box<dyn DictionaryProxy>) -> Self {
        Self { proxy }
    }

    pub fn len(&self) -> BindingResult<usize> {
        self.proxy.len()
    }

    pub fn is_empty(&self) -> BindingResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn has(&self, key: impl Into<Variant>) -> BindingResult<bool> {
        self.proxy.has(&key.into())
    }

    pub fn get(&self, key: impl Into<Variant>) -> BindingResult<Option<Variant>> {
        self.proxy.get(&key.into())
    }

    pub fn set(&mut self, key: impl Into<Variant>, value: impl Into<Variant>) -> BindingResult<()> {
        self.proxy.set(key.into(), value.into())
    }

    pub fn remove(&mut self, key: impl Into<Variant>) -> BindingResult<Option<Variant>> {
        self.proxy.remove(&key.into())
    }

    pub fn clear(&mut self) -> BindingResult<()> {
        self.proxy.clear()
    }

    pub fn keys(&self) -> BindingResult<Vec<Variant>> {
        self.proxy.keys()
    }

    pub fn values(&self) -> BindingResult<Vec<Variant>> {
        Ok(self.entries()?.into_iter().map(|(_, v)| v).collect())
    }

    /// 按插入顺序的键值对
    pub fn entries(&self) -> BindingResult<Vec<(Variant, Variant)>> {
        self.keys()?
            .into_iter()
            .map(|key| {
                let value = self.proxy.get(&key)?.unwrap_or_default();
                Ok((key, value))
            })
            .collect()
    }

    pub fn iter(&self) -> BindingResult<std::vec::IntoIter<(Variant, Variant)>> {
        Ok(self.entries()?.into_iter())
    }

    pub fn duplicate(&self, deep: bool) -> BindingResult<Self> {
        Ok(Self::from_proxy(self.proxy.duplicate(deep)?))
    }

    pub fn to_engine_backed(&self) -> BindingResult<Self> {
        Ok(Self::from_engine(self.proxy.to_engine()?))
    }
}

impl EngineValue for Dictionary {
    type Kind = DictionaryKind;

    fn backend(&self) -> Backend {
        self.proxy.backend()
    }

    fn engine_ptr(&self) -> Option<ConstTypePtr> {
        self.proxy.engine_ptr()
    }

    fn to_engine(&self) -> BindingResult<EngineBuiltin<DictionaryKind>> {
        self.proxy.to_engine()
    }

    fn from_engine(value: EngineBuiltin<DictionaryKind>) -> Self {
        Self::from_proxy(Box::new(EngineDictionary(value)))
    }
}

impl Default for Dictionary {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Dictionary {
    fn clone(&self) -> Self {
        Self {
            proxy: self.proxy.share(),
        }
    }
}

impl PartialEq for Dictionary {
    fn eq(&self, other: &Self) -> bool {
        match (self.entries(), other.entries()) {
            (Ok(a), Ok(b)) => a.len() == b.len() && a.iter().all(|entry| b.contains(entry)),
            _ => false,
        }
    }
}

impl fmt::Debug for Dictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.entries() {
            Ok(entries) => f.debug_map().entries(entries).finish(),
            Err(e) => write!(f, "Dictionary(<{}>)", e),
        }
    }
}

impl<K: Into<Variant>, V: Into<Variant>> FromIterator<(K, V)> for Dictionary {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut dict = HostDictionary::default();
        for (key, value) in iter {
            let _ = dict.set(key.into(), value.into());
        }
        Self::from_proxy(Box::new(dict))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insertion_order_and_overwrite() {
        let mut d = Dictionary::new();
        d.set("b", 1i64).unwrap();
        d.set("a", 2i64).unwrap();
        d.set("b", 3i64).unwrap();
        assert_eq!(d.len().unwrap(), 2);
        assert_eq!(d.keys().unwrap(), vec![Variant::from("b"), Variant::from("a")]);
        assert_eq!(d.get("b").unwrap(), Some(Variant::Int(3)));
        assert_eq!(d.get("missing").unwrap(), None);
    }

    #[test]
    fn test_shared_until_mutation() {
        let mut a: Dictionary = vec![("k", 1i64)].into_iter().collect();
        let b = a.clone();
        assert_eq!(a.remove("k").unwrap(), Some(Variant::Int(1)));
        assert!(!a.has("k").unwrap());
        assert!(b.has("k").unwrap());
    }

    #[test]
    fn test_equality_ignores_order() {
        let a: Dictionary = vec![("x", 1i64), ("y", 2i64)].into_iter().collect();
        let b: Dictionary = vec![("y", 2i64), ("x", 1i64)].into_iter().collect();
        assert_eq!(a, b);
    }
}
