//! 引擎托管内建值的公共存储
//!
//! 字符串、容器、Callable、Signal 在引擎侧都是一段不透明存储，通过构造函数表
//! 创建、通过析构函数销毁。`EngineBuiltin<K>` 持有这段存储和一个所有权标志：
//! 自己构造或从返回槽接收的值是 owned，析构时调用引擎析构函数；回调参数里
//! 借来的值不是 owned，引擎在调用期间保持其存活。

use super::VariantType;
use crate::abi::{self, sys::*};
use crate::core::BindingResult;
use crate::frame::{FrameRet, ReturnSlot};
use std::ffi::c_int;
use std::fmt;
use std::marker::PhantomData;

/// 内建类型构造函数编号
pub mod ctor {
    /// 默认构造
    pub const DEFAULT: i32 = 0;
    /// 复制构造
    pub const COPY: i32 = 1;
    /// String(StringName)、StringName(String)、NodePath(String)、
    /// Callable(Object, StringName)、Signal(Object, StringName)
    pub const FROM_OTHER: i32 = 2;
    /// String(NodePath)
    pub const FROM_NODE_PATH: i32 = 3;
}

/// 代理后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// 每个操作都经过 ABI 表
    Engine,
    /// 值只存在于宿主侧
    Host,
}

/// 一种引擎托管值类型
pub trait BuiltinKind: Send + Sync + 'static {
    const TYPE: VariantType;
    type Storage: OpaqueStorage;
}

/// 引擎托管值的不透明存储
pub struct EngineBuiltin<K: BuiltinKind> {
    raw: K::Storage,
    owned: bool,
    _kind: PhantomData<fn() -> K>,
}

impl<K: BuiltinKind> EngineBuiltin<K> {
    /// 默认构造
    pub fn new_default() -> BindingResult<Self> {
        Self::construct(ctor::DEFAULT, &[])
    }

    /// 用第 `index` 个构造函数构造
    pub fn construct(index: i32, args: &[ConstTypePtr]) -> BindingResult<Self> {
        let abi = abi::get()?;
        let constructor = abi.ptr_constructor(K::TYPE, index)?;
        let mut raw = K::Storage::default();
        unsafe { constructor(raw.as_mut_ptr(), args.as_ptr()) };
        Ok(Self {
            raw,
            owned: true,
            _kind: PhantomData,
        })
    }

    /// 借用引擎内存里的值，不负责销毁
    ///
    /// # Safety
    /// `ptr` 必须指向一个有效的 `K` 值，且在本视图存活期间保持有效。
    pub unsafe fn borrowed(ptr: ConstTypePtr) -> Self {
        Self {
            raw: K::Storage::read_from(ptr),
            owned: false,
            _kind: PhantomData,
        }
    }

    /// 接管一个引擎构造好的值
    ///
    /// # Safety
    /// `raw` 必须是引擎构造的、没有其他所有者的值。
    pub unsafe fn from_raw_owned(raw: K::Storage) -> Self {
        Self {
            raw,
            owned: true,
            _kind: PhantomData,
        }
    }

    pub fn is_owned(&self) -> bool {
        self.owned
    }

    pub fn raw(&self) -> &K::Storage {
        &self.raw
    }

    pub fn as_type_ptr(&self) -> ConstTypePtr {
        self.raw.as_ptr()
    }

    pub fn as_mut_type_ptr(&mut self) -> TypePtr {
        self.raw.as_mut_ptr()
    }

    /// 复制构造出一个 owned 值（容器共享底层缓冲）
    pub fn try_clone(&self) -> BindingResult<Self> {
        Self::construct(ctor::COPY, &[self.as_type_ptr()])
    }

    /// 交出存储，不再负责销毁
    pub fn into_raw(self) -> K::Storage {
        let raw = self.raw;
        std::mem::forget(self);
        raw
    }

    /// 交出一份 owned 存储；借用视图会先复制
    pub fn into_owned_raw(self) -> BindingResult<K::Storage> {
        if self.owned {
            Ok(self.into_raw())
        } else {
            Ok(self.try_clone()?.into_raw())
        }
    }

    /// 调用内建方法（只读）
    pub fn call<R: FrameRet>(&self, method: &'static str, hash: i64, args: &[ConstTypePtr]) -> BindingResult<R> {
        let abi = abi::get()?;
        let f = abi.builtin_method(K::TYPE, method, hash)?;
        let mut ret = ReturnSlot::<R>::new();
        unsafe {
            f(
                self.raw.as_ptr() as TypePtr,
                args.as_ptr(),
                ret.as_mut_ptr(),
                args.len() as c_int,
            )
        };
        ret.read()
    }

    /// 调用会修改值的内建方法；共享缓冲会在引擎侧分叉
    pub fn call_mut<R: FrameRet>(
        &mut self,
        method: &'static str,
        hash: i64,
        args: &[ConstTypePtr],
    ) -> BindingResult<R> {
        let abi = abi::get()?;
        let f = abi.builtin_method(K::TYPE, method, hash)?;
        let mut ret = ReturnSlot::<R>::new();
        unsafe { f(self.raw.as_mut_ptr(), args.as_ptr(), ret.as_mut_ptr(), args.len() as c_int) };
        ret.read()
    }
}

impl<K: BuiltinKind> Drop for EngineBuiltin<K> {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        match abi::get() {
            Ok(abi) => {
                if let Some(destructor) = abi.ptr_destructor(K::TYPE) {
                    unsafe { destructor(self.raw.as_mut_ptr()) };
                }
            }
            Err(e) => {
                tracing::warn!(target: "values", ty = %K::TYPE, "Leaking engine value: {}", e);
            }
        }
    }
}

impl<K: BuiltinKind> Clone for EngineBuiltin<K> {
    fn clone(&self) -> Self {
        match self.try_clone() {
            Ok(copy) => copy,
            Err(e) => {
                tracing::warn!(target: "values", ty = %K::TYPE, "Copy failed, returning borrowed view: {}", e);
                Self {
                    raw: self.raw,
                    owned: false,
                    _kind: PhantomData,
                }
            }
        }
    }
}

impl<K: BuiltinKind> fmt::Debug for EngineBuiltin<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineBuiltin")
            .field("type", &K::TYPE)
            .field("raw", &self.raw)
            .field("owned", &self.owned)
            .finish()
    }
}

macro_rules! builtin_kinds {
    ($($(#[$doc:meta])* $kind:ident => $variant:ident, $storage:ty;)*) => {
        $(
            $(#[$doc])*
            #[derive(Debug)]
            pub struct $kind;

            impl BuiltinKind for $kind {
                const TYPE: VariantType = VariantType::$variant;
                type Storage = $storage;
            }
        )*
    };
}

builtin_kinds! {
    StringKind => String, Opaque8;
    StringNameKind => StringName, Opaque8;
    NodePathKind => NodePath, Opaque8;
    ArrayKind => Array, Opaque8;
    DictionaryKind => Dictionary, Opaque8;
    CallableKind => Callable, Opaque16;
    SignalKind => Signal, Opaque16;
}

/// 引擎托管值在宿主侧的公共接口
///
/// 每个值代理都能给出引擎地址（引擎后端）或物化一份 owned 引擎值（宿主后端），
/// 调用帧据此决定按地址传递还是创建临时值。
pub trait EngineValue: Sized {
    type Kind: BuiltinKind;

    fn backend(&self) -> Backend;

    /// 引擎后端时返回底层值的地址
    fn engine_ptr(&self) -> Option<ConstTypePtr>;

    /// 得到一份 owned 的引擎值
    fn to_engine(&self) -> BindingResult<EngineBuiltin<Self::Kind>>;

    /// 包装一个引擎值（owned 或借用）
    fn from_engine(value: EngineBuiltin<Self::Kind>) -> Self;
}
