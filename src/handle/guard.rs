//! 释放环检测
//!
//! 每个线程维护一个“正在释放”的句柄集合。`end` 在释放期间再次进入同一句柄时
//! 返回 `RecursiveRelease`，而不是无限递归。可通过配置关闭。

use super::EngineHandle;
use crate::config::runtime::cycle_guard_enabled;
use crate::core::{BindingError, BindingResult};
use std::cell::RefCell;
use std::collections::HashSet;

thread_local! {
    static RELEASING: RefCell<HashSet<usize>> = RefCell::new(HashSet::new());
}

/// 释放作用域；离开作用域时把句柄移出集合
#[derive(Debug)]
pub struct CycleGuard {
    addr: usize,
}

impl CycleGuard {
    /// 标记句柄进入释放流程
    ///
    /// 关闭检测时返回 `Ok(None)`。
    pub fn enter(handle: EngineHandle) -> BindingResult<Option<Self>> {
        if !cycle_guard_enabled() {
            return Ok(None);
        }
        let addr = handle.addr();
        let inserted = RELEASING.with(|set| set.borrow_mut().insert(addr));
        if !inserted {
            tracing::error!(target: "handle", addr = format_args!("{:#x}", addr), "Recursive release detected");
            return Err(BindingError::RecursiveRelease(addr));
        }
        Ok(Some(Self { addr }))
    }

    /// 当前线程是否正在释放该句柄
    pub fn is_releasing(handle: EngineHandle) -> bool {
        RELEASING.with(|set| set.borrow().contains(&handle.addr()))
    }
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        RELEASING.with(|set| {
            set.borrow_mut().remove(&self.addr);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_enter_is_rejected() {
        if !cycle_guard_enabled() {
            return;
        }
        let handle = EngineHandle::from_addr(0xdead_0000);
        let outer = CycleGuard::enter(handle).unwrap();
        assert!(CycleGuard::is_releasing(handle));
        assert_eq!(
            CycleGuard::enter(handle).unwrap_err(),
            BindingError::RecursiveRelease(0xdead_0000)
        );
        drop(outer);
        assert!(!CycleGuard::is_releasing(handle));
        assert!(CycleGuard::enter(handle).unwrap().is_some());
    }

    #[test]
    fn test_guard_is_per_thread() {
        if !cycle_guard_enabled() {
            return;
        }
        let handle = EngineHandle::from_addr(0xbeef_0000);
        let _outer = CycleGuard::enter(handle).unwrap();
        let other = std::thread::spawn(move || CycleGuard::enter(handle).map(|g| g.is_some()));
        assert_eq!(other.join().unwrap(), Ok(true));
    }
}
