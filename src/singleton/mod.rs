//! 单例缓存
//!
//! 每个引擎单例只解析一次。首次并发调用在该名字自己的锁上串行化，
//! 保证 `object_get_singleton` 恰好被调用一次；不同名字互不阻塞。

use crate::abi;
use crate::core::{BindingError, BindingResult};
use crate::handle::{EngineHandle, ManagedHandle, Ownership};
use crate::registry::EngineClass;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

type Slot = Arc<Mutex<Option<EngineHandle>>>;

fn slots() -> &'static Mutex<HashMap<String, Slot>> {
    static SLOTS: OnceLock<Mutex<HashMap<String, Slot>>> = OnceLock::new();
    SLOTS.get_or_init(|| Mutex::new(HashMap::new()))
}

fn slot(name: &str) -> Slot {
    slots()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .entry(name.to_string())
        .or_default()
        .clone()
}

/// 查找失败时移除空槽位，未知名字不留在表里
fn forget(name: &str, slot: &Slot) {
    let mut slots = slots().lock().unwrap_or_else(|e| e.into_inner());
    if slots.get(name).is_some_and(|current| Arc::ptr_eq(current, slot)) {
        slots.remove(name);
    }
}

fn lookup(name: &str) -> BindingResult<EngineHandle> {
    let abi = abi::get()?;
    let ptr = abi.with_name(name, |name| unsafe { (abi.object_get_singleton)(name) })?;
    let handle = EngineHandle::from_ptr(ptr);
    if handle.is_null() {
        return Err(BindingError::SingletonNotFound(name.to_string()));
    }
    Ok(handle)
}

/// 解析（或取缓存的）单例句柄，Engine 所有权
pub fn once(name: &str) -> BindingResult<ManagedHandle> {
    let slot = slot(name);
    let mut cached = slot.lock().unwrap_or_else(|e| e.into_inner());
    let handle = match *cached {
        Some(handle) => handle,
        None => match lookup(name) {
            Ok(handle) => {
                tracing::debug!(target: "singleton", name, ?handle, "Singleton resolved");
                *cached = Some(handle);
                handle
            }
            Err(e) => {
                forget(name, &slot);
                return Err(e);
            }
        },
    };
    ManagedHandle::pack(handle, Ownership::Engine)
}

/// 类型化的单例访问
pub fn singleton<T: EngineClass>() -> BindingResult<T> {
    once(T::CLASS_NAME).map(T::from_managed)
}

/// 已缓存的句柄，不触发查找
pub fn cached(name: &str) -> Option<EngineHandle> {
    let slot = slots()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .get(name)
        .cloned()?;
    let cached = *slot.lock().unwrap_or_else(|e| e.into_inner());
    cached
}

/// 当前缓存槽位数
pub fn slot_count() -> usize {
    slots().lock().unwrap_or_else(|e| e.into_inner()).len()
}

/// 清空缓存（引擎卸载或测试之间）
pub fn reset() {
    slots().lock().unwrap_or_else(|e| e.into_inner()).clear();
    tracing::debug!(target: "singleton", "Singleton cache cleared");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cached_is_empty_after_reset() {
        let _lock = crate::mock::test_lock();
        reset();
        assert!(cached("ClassDB").is_none());
    }

    #[test]
    fn test_once_without_abi_is_not_ready() {
        let _lock = crate::mock::test_lock();
        reset();
        abi::reset();
        assert!(matches!(once("ClassDB"), Err(BindingError::NotReady(_))));
        assert!(cached("ClassDB").is_none());
    }

    #[test]
    fn test_unknown_names_leave_no_slots() {
        let _engine = crate::mock::MockEngine::install();
        reset();
        for i in 0..16 {
            let name = format!("NoSuchSingleton{}", i);
            assert!(matches!(once(&name), Err(BindingError::SingletonNotFound(_))));
        }
        assert_eq!(slot_count(), 0);

        once("ClassDB").unwrap();
        assert_eq!(slot_count(), 1);
        assert!(cached("ClassDB").is_some());
    }
}
