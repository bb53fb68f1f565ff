//! 指针纪律
//!
//! 给引擎句柄附加所有权标签：
//!
//! - **Host**: 宿主最终必须让引擎销毁对象
//! - **Engine**: 引擎负责销毁，宿主绝不销毁
//! - **Shared**: 引用计数，宿主持有一个引用并负责释放
//!
//! 统一的生命周期为 `pack → get → end`。`end` 是幂等的，结束后的 `get` 返回
//! `UseAfterFree`。

pub mod guard;
pub mod live;

pub use guard::CycleGuard;
pub use live::{live_count, live_counts, LiveCounts};

use crate::abi::{self, sys::ObjectPtr};
use crate::config::runtime::leak_warnings_enabled;
use crate::core::{BindingError, BindingResult};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// 不透明的引擎地址，按地址比较
#[repr(transparent)]
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EngineHandle(usize);

impl EngineHandle {
    pub const NULL: Self = Self(0);

    pub fn from_ptr(ptr: ObjectPtr) -> Self {
        Self(ptr as usize)
    }

    pub fn from_addr(addr: usize) -> Self {
        Self(addr)
    }

    pub fn as_ptr(self) -> ObjectPtr {
        self.0 as ObjectPtr
    }

    pub fn addr(self) -> usize {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// 非空时返回自身
    pub fn non_null(self) -> Option<Self> {
        (!self.is_null()).then_some(self)
    }
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EngineHandle({:#x})", self.0)
    }
}

/// 所有权标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ownership {
    Host,
    Engine,
    Shared,
}

/// 引擎返回对象句柄时声明的转移语义
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// 所有权转移给宿主
    ToHost,
    /// 借用，引擎保留所有权
    Borrow,
}

/// 带所有权标签的受管句柄
pub struct ManagedHandle {
    handle: EngineHandle,
    ownership: Ownership,
    alive: AtomicBool,
}

impl ManagedHandle {
    /// 创建受管句柄
    ///
    /// Shared 所有权会立即增加一次引擎引用计数。
    pub fn pack(handle: EngineHandle, ownership: Ownership) -> BindingResult<Self> {
        if handle.is_null() {
            return Err(BindingError::type_mismatch("object", "null"));
        }
        if ownership == Ownership::Shared {
            let abi = abi::get()?;
            unsafe { (abi.refcounted_reference)(handle.as_ptr()) };
        }
        live::register(handle, ownership);
        tracing::trace!(target: "handle", ?handle, ?ownership, "pack");
        Ok(Self {
            handle,
            ownership,
            alive: AtomicBool::new(true),
        })
    }

    /// `pack(handle, Host)` 的快捷方式，用于引擎为我们构造的对象
    pub fn new(handle: EngineHandle) -> BindingResult<Self> {
        Self::pack(handle, Ownership::Host)
    }

    /// 按入站规则包装引擎返回的对象指针
    ///
    /// 引用计数类的对象总是 Shared；否则 `ToHost` 得到 Host，`Borrow` 得到 Engine。
    /// 空指针返回 `None`。
    pub fn from_engine(handle: EngineHandle, transfer: Transfer) -> BindingResult<Option<Self>> {
        if handle.is_null() {
            return Ok(None);
        }
        let ownership = if crate::registry::is_refcounted(handle)? {
            Ownership::Shared
        } else {
            match transfer {
                Transfer::ToHost => Ownership::Host,
                Transfer::Borrow => Ownership::Engine,
            }
        };
        Self::pack(handle, ownership).map(Some)
    }

    /// 取出原始句柄用于编组
    pub fn get(&self) -> BindingResult<EngineHandle> {
        if self.alive.load(Ordering::Acquire) {
            Ok(self.handle)
        } else {
            Err(BindingError::UseAfterFree(self.handle.addr()))
        }
    }

    /// 按所有权执行释放并标记为已结束
    ///
    /// 第二次调用是无操作。释放期间重入同一句柄返回 `RecursiveRelease`。
    pub fn end(&self) -> BindingResult<()> {
        let _scope = CycleGuard::enter(self.handle)?;
        if !self.is_alive() {
            return Ok(());
        }
        // 先取函数表，失败时句柄保持存活
        let abi = match self.ownership {
            Ownership::Engine => None,
            Ownership::Host | Ownership::Shared => Some(abi::get()?),
        };
        if !self.alive.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        live::unregister(self.handle, self.ownership);
        tracing::trace!(target: "handle", handle = ?self.handle, ownership = ?self.ownership, "end");

        let Some(abi) = abi else {
            return Ok(());
        };
        let destroy = match self.ownership {
            Ownership::Shared => unsafe { (abi.refcounted_unreference)(self.handle.as_ptr()) != 0 },
            _ => true,
        };
        if destroy {
            unsafe { (abi.object_destroy)(self.handle.as_ptr()) };
        }
        Ok(())
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// 不检查存活状态的原始地址（仅用于诊断和比较）
    pub fn raw(&self) -> EngineHandle {
        self.handle
    }

    /// 为同一对象再取一个 Shared 引用
    pub fn share(&self) -> BindingResult<Self> {
        let handle = self.get()?;
        if self.ownership != Ownership::Shared {
            return Err(BindingError::type_mismatch("Shared ownership", format!("{:?}", self.ownership)));
        }
        Self::pack(handle, Ownership::Shared)
    }

    /// 借用视图：Engine 所有权，不得比原句柄活得更久
    pub fn borrow(&self) -> BindingResult<Self> {
        Self::pack(self.get()?, Ownership::Engine)
    }

    /// 引擎实例 ID
    pub fn instance_id(&self) -> BindingResult<u64> {
        let handle = self.get()?;
        let abi = abi::get()?;
        Ok(unsafe { (abi.object_get_instance_id)(handle.as_ptr()) })
    }

    /// 创建基于实例 ID 的弱引用
    pub fn downgrade(&self) -> BindingResult<WeakHandle> {
        Ok(WeakHandle {
            instance_id: self.instance_id()?,
        })
    }
}

impl Drop for ManagedHandle {
    fn drop(&mut self) {
        if !self.is_alive() {
            return;
        }
        match self.ownership {
            Ownership::Shared => {
                if let Err(e) = self.end() {
                    tracing::warn!(target: "handle", handle = ?self.handle, "Failed to release shared handle: {}", e);
                }
            }
            Ownership::Host => {
                live::unregister(self.handle, self.ownership);
                if leak_warnings_enabled() {
                    tracing::warn!(target: "handle", handle = ?self.handle, "Host-owned handle dropped without end(); object leaked");
                }
            }
            Ownership::Engine => live::unregister(self.handle, self.ownership),
        }
    }
}

impl fmt::Debug for ManagedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedHandle")
            .field("handle", &self.handle)
            .field("ownership", &self.ownership)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl PartialEq for ManagedHandle {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

/// 弱引用：Engine 所有权加实例 ID，使用前通过引擎校验
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WeakHandle {
    instance_id: u64,
}

impl WeakHandle {
    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    /// 校验对象是否仍然存在
    pub fn is_valid(&self) -> BindingResult<bool> {
        let abi = abi::get()?;
        Ok(!unsafe { (abi.object_get_instance_from_id)(self.instance_id) }.is_null())
    }

    /// 对象仍存在时返回借用句柄（引用计数类返回 Shared）
    pub fn upgrade(&self) -> BindingResult<Option<ManagedHandle>> {
        let abi = abi::get()?;
        let ptr = unsafe { (abi.object_get_instance_from_id)(self.instance_id) };
        ManagedHandle::from_engine(EngineHandle::from_ptr(ptr), Transfer::Borrow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_ownership_lifecycle() {
        let _lock = crate::mock::test_lock();
        let handle = EngineHandle::from_addr(0x7000_1000);
        let managed = ManagedHandle::pack(handle, Ownership::Engine).unwrap();
        assert_eq!(managed.get().unwrap(), handle);
        assert_eq!(live_counts(handle).engine, 1);

        managed.end().unwrap();
        managed.end().unwrap();
        assert_eq!(
            managed.get().unwrap_err(),
            BindingError::UseAfterFree(0x7000_1000)
        );
        assert_eq!(live_count(handle), 0);
    }

    #[test]
    fn test_null_handle_rejected() {
        assert!(ManagedHandle::pack(EngineHandle::NULL, Ownership::Engine).is_err());
    }

    #[test]
    fn test_borrow_is_engine_owned() {
        let _lock = crate::mock::test_lock();
        let handle = EngineHandle::from_addr(0x7000_2000);
        let owner = ManagedHandle::pack(handle, Ownership::Engine).unwrap();
        let view = owner.borrow().unwrap();
        assert_eq!(view.ownership(), Ownership::Engine);
        assert_eq!(view, owner);
        assert!(owner.share().is_err());
    }

    #[test]
    fn test_end_without_engine_keeps_handle() {
        let _lock = crate::mock::test_lock();
        crate::abi::reset();
        let handle = EngineHandle::from_addr(0x7000_3000);
        let managed = ManagedHandle::pack(handle, Ownership::Host).unwrap();

        assert!(matches!(managed.end(), Err(BindingError::NotReady(_))));
        assert!(managed.is_alive());
        assert_eq!(managed.get().unwrap(), handle);
        assert_eq!(live_counts(handle).host, 1);
    }
}
