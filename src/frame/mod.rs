//! 调用帧
//!
//! 一次出站 ABI 调用的参数缓冲区和类型化返回槽。
//!
//! - 参数按压入顺序排列；前 [`INLINE_SLOTS`] 个值存放在帧内（调用方栈上），
//!   更多的参数落到引擎分配器分配的区块里
//! - 基本类型按值复制进槽位；引擎值类型按“指向值的指针”传递
//! - 宿主后端的值在压入时物化成临时引擎值，由帧持有，帧释放时销毁
//! - 返回槽在调用前清零，调用后只读取一次

pub mod inbound;

pub use inbound::{read_arg, write_return, write_zero};

use crate::abi::{self, sys::*};
use crate::core::{BindingError, BindingResult, EngineErrorCode};
use crate::handle::{EngineHandle, ManagedHandle};
use crate::values::{
    EngineBuiltin, EngineValue, EngineVariant, PackedArray, PackedElement, PodValue, Variant,
    BuiltinKind,
};
use crate::values::{Array, Callable, Dictionary, GString, NodePath, Signal, StringName};
use bytemuck::Pod;
use std::any::Any;
use std::ffi::{c_int, c_void};
use std::marker::PhantomData;

/// 帧内联槽位数
pub const INLINE_SLOTS: usize = 8;

/// 单个槽位字节数，容纳最大的按值类型（Projection）
pub const SLOT_SIZE: usize = 64;

/// 一个参数槽位
#[repr(C, align(16))]
#[derive(Clone, Copy)]
pub struct ArgSlot([u8; SLOT_SIZE]);

impl ArgSlot {
    pub const ZERO: Self = Self([0; SLOT_SIZE]);

    pub fn as_ptr(&self) -> ConstTypePtr {
        self.0.as_ptr() as ConstTypePtr
    }

    pub fn as_mut_ptr(&mut self) -> TypePtr {
        self.0.as_mut_ptr() as TypePtr
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        self.0 = [0; SLOT_SIZE];
        self.0[..bytes.len()].copy_from_slice(bytes);
    }
}

impl Default for ArgSlot {
    fn default() -> Self {
        Self::ZERO
    }
}

#[derive(Debug, Clone, Copy)]
enum ArgRef {
    Inline(usize),
    Arena(usize),
    External(ConstTypePtr),
}

/// 溢出参数区块（引擎分配器）
struct Arena {
    block: *mut ArgSlot,
    capacity: usize,
    len: usize,
}

impl Arena {
    fn with_capacity(capacity: usize) -> BindingResult<Self> {
        let block = abi::alloc(capacity * SLOT_SIZE)? as *mut ArgSlot;
        if block.is_null() {
            return Err(BindingError::CallFailed("engine allocator returned null".to_string()));
        }
        Ok(Self {
            block,
            capacity,
            len: 0,
        })
    }

    fn push(&mut self, bytes: &[u8]) -> BindingResult<usize> {
        if self.len == self.capacity {
            let grown = Self::with_capacity(self.capacity * 2)?;
            unsafe {
                std::ptr::copy_nonoverlapping(self.block, grown.block, self.len);
                abi::free(self.block as *mut c_void)?;
            }
            self.block = grown.block;
            self.capacity = grown.capacity;
            std::mem::forget(grown);
        }
        let index = self.len;
        unsafe {
            let slot = &mut *self.block.add(index);
            slot.write_bytes(bytes);
        }
        self.len += 1;
        Ok(index)
    }

    fn slot_ptr(&self, index: usize) -> ConstTypePtr {
        unsafe { (*self.block.add(index)).as_ptr() }
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        if let Err(e) = unsafe { abi::free(self.block as *mut c_void) } {
            tracing::warn!(target: "values", "Leaking call frame arena: {}", e);
        }
    }
}

/// 一次出站调用的参数缓冲区
///
/// `'a` 是被按地址传递的参数的借用期：帧不能比这些值活得更久。
pub struct CallFrame<'a> {
    inline: [ArgSlot; INLINE_SLOTS],
    inline_len: usize,
    arena: Option<Arena>,
    args: Vec<ArgRef>,
    temps: Vec<Box<dyn Any>>,
    _borrow: PhantomData<&'a ()>,
}

impl<'a> CallFrame<'a> {
    pub fn new() -> Self {
        Self {
            inline: [ArgSlot::ZERO; INLINE_SLOTS],
            inline_len: 0,
            arena: None,
            args: Vec::with_capacity(INLINE_SLOTS),
            temps: Vec::new(),
            _borrow: PhantomData,
        }
    }

    /// 压入一个参数
    pub fn arg<T: FrameArg + ?Sized>(&mut self, value: &'a T) -> BindingResult<&mut Self> {
        value.push_to(self)?;
        Ok(self)
    }

    /// 按值压入原始字节
    pub fn push_bytes(&mut self, bytes: &[u8]) -> BindingResult<()> {
        if bytes.len() > SLOT_SIZE {
            return Err(BindingError::type_mismatch(
                format!("value of at most {} bytes", SLOT_SIZE),
                format!("{} bytes", bytes.len()),
            ));
        }
        if self.inline_len < INLINE_SLOTS {
            let index = self.inline_len;
            self.inline[index].write_bytes(bytes);
            self.inline_len += 1;
            self.args.push(ArgRef::Inline(index));
        } else {
            if self.arena.is_none() {
                self.arena = Some(Arena::with_capacity(INLINE_SLOTS)?);
            }
            let arena = self.arena.as_mut().ok_or(BindingError::NotReady("call frame arena"))?;
            let index = arena.push(bytes)?;
            self.args.push(ArgRef::Arena(index));
        }
        Ok(())
    }

    pub fn push_pod<T: Pod>(&mut self, value: &T) -> BindingResult<()> {
        self.push_bytes(bytemuck::bytes_of(value))
    }

    /// 按地址压入一个借用的引擎值
    pub fn push_external(&mut self, ptr: ConstTypePtr) {
        self.args.push(ArgRef::External(ptr));
    }

    /// 压入一个由帧持有的临时引擎值
    pub fn push_builtin<K: BuiltinKind>(&mut self, value: EngineBuiltin<K>) {
        let boxed = Box::new(value);
        let ptr = boxed.as_type_ptr();
        self.temps.push(boxed);
        self.args.push(ArgRef::External(ptr));
    }

    /// 压入一个由帧持有的临时 Variant
    pub fn push_variant(&mut self, value: EngineVariant) {
        let boxed = Box::new(value);
        let ptr = boxed.as_ptr();
        self.temps.push(boxed);
        self.args.push(ArgRef::External(ptr));
    }

    /// 压入一个引擎值代理：引擎后端按地址，宿主后端物化为临时值
    pub fn push_value<V: EngineValue>(&mut self, value: &'a V) -> BindingResult<()> {
        match value.engine_ptr() {
            Some(ptr) => self.push_external(ptr),
            None => self.push_builtin(value.to_engine()?),
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    fn resolve(&self, arg: ArgRef) -> ConstTypePtr {
        match arg {
            ArgRef::Inline(index) => self.inline[index].as_ptr(),
            ArgRef::Arena(index) => match &self.arena {
                Some(arena) => arena.slot_ptr(index),
                None => std::ptr::null(),
            },
            ArgRef::External(ptr) => ptr,
        }
    }

    /// 第 `i` 个参数值的地址
    pub fn array(&self, i: usize) -> BindingResult<ConstTypePtr> {
        let arg = self.args.get(i).copied().ok_or(BindingError::IndexOutOfBounds {
            index: i,
            len: self.args.len(),
        })?;
        Ok(self.resolve(arg))
    }

    /// 引擎期望的连续参数指针数组
    ///
    /// 指针指向帧内存，帧移动后失效，因此每次调用前重新计算。
    pub fn arg_ptrs(&self) -> Vec<ConstTypePtr> {
        self.args.iter().map(|arg| self.resolve(*arg)).collect()
    }

    /// 空帧传空指针，不传悬垂的空数组地址
    fn args_base(ptrs: &[ConstTypePtr]) -> *const ConstTypePtr {
        if ptrs.is_empty() {
            std::ptr::null()
        } else {
            ptrs.as_ptr()
        }
    }

    /// 分配一个类型化返回槽
    pub fn ret<T: FrameRet>(&self) -> ReturnSlot<T> {
        ReturnSlot::new()
    }

    /// 无返回值方法的返回槽
    pub fn nil(&self) -> ReturnSlot<()> {
        ReturnSlot::new()
    }

    /// 通过方法绑定调用对象方法，结果写入 `ret`
    pub fn call<R: FrameRet>(
        &self,
        bind: MethodBindPtr,
        object: EngineHandle,
        ret: &mut ReturnSlot<R>,
    ) -> BindingResult<()> {
        let abi = abi::get()?;
        let ptrs = self.arg_ptrs();
        unsafe { (abi.object_method_bind_ptrcall)(bind, object.as_ptr(), Self::args_base(&ptrs), ret.as_mut_ptr()) };
        Ok(())
    }

    /// 调用对象方法并读取返回值
    pub fn ptrcall<R: FrameRet>(&self, bind: MethodBindPtr, object: EngineHandle) -> BindingResult<R> {
        let mut ret = self.ret::<R>();
        self.call(bind, object, &mut ret)?;
        ret.read()
    }

    /// 调用内建类型方法
    ///
    /// # Safety
    /// `base` 必须指向 `f` 所属类型的有效值。
    pub unsafe fn builtin_call<R: FrameRet>(&self, f: PtrBuiltInMethod, base: TypePtr) -> BindingResult<R> {
        let ptrs = self.arg_ptrs();
        let mut ret = self.ret::<R>();
        f(base, Self::args_base(&ptrs), ret.as_mut_ptr(), ptrs.len() as c_int);
        ret.read()
    }

    /// 释放帧：销毁临时值并归还溢出区块
    pub fn free(self) {}
}

impl Default for CallFrame<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CallFrame<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallFrame")
            .field("args", &self.args.len())
            .field("inline", &self.inline_len)
            .field("temps", &self.temps.len())
            .finish()
    }
}

/// 类型化返回槽
///
/// 调用前清零；[`read`](Self::read) 消耗槽位，保证只读取一次。
pub struct ReturnSlot<T> {
    storage: ArgSlot,
    _ty: PhantomData<fn() -> T>,
}

impl<T: FrameRet> ReturnSlot<T> {
    pub fn new() -> Self {
        Self {
            storage: ArgSlot::ZERO,
            _ty: PhantomData,
        }
    }

    /// 交给引擎的写入地址；无返回值时为空指针
    pub fn as_mut_ptr(&mut self) -> TypePtr {
        if T::IS_VOID {
            std::ptr::null_mut()
        } else {
            self.storage.as_mut_ptr()
        }
    }

    pub fn read(self) -> BindingResult<T> {
        unsafe { T::read_return(self.storage.as_ptr()) }
    }
}

impl<T: FrameRet> Default for ReturnSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// 参数打包
// ============================================================================

/// 可以压入调用帧的值
pub trait FrameArg {
    fn push_to<'a>(&'a self, frame: &mut CallFrame<'a>) -> BindingResult<()>;
}

macro_rules! int_args {
    ($($ty:ty),*) => {
        $(impl FrameArg for $ty {
            fn push_to<'a>(&'a self, frame: &mut CallFrame<'a>) -> BindingResult<()> {
                frame.push_pod(&(*self as i64))
            }
        })*
    };
}

int_args!(i8, i16, i32, i64, u8, u16, u32, usize);

impl FrameArg for bool {
    fn push_to<'a>(&'a self, frame: &mut CallFrame<'a>) -> BindingResult<()> {
        frame.push_pod(&to_engine_bool(*self))
    }
}

impl FrameArg for f32 {
    fn push_to<'a>(&'a self, frame: &mut CallFrame<'a>) -> BindingResult<()> {
        frame.push_pod(&(*self as f64))
    }
}

impl FrameArg for f64 {
    fn push_to<'a>(&'a self, frame: &mut CallFrame<'a>) -> BindingResult<()> {
        frame.push_pod(self)
    }
}

macro_rules! pod_args {
    ($($ty:ty),*) => {
        $(impl FrameArg for $ty {
            fn push_to<'a>(&'a self, frame: &mut CallFrame<'a>) -> BindingResult<()> {
                frame.push_pod(self)
            }
        })*
    };
}

pod_args!(
    glam::Vec2,
    glam::IVec2,
    glam::Vec3,
    glam::IVec3,
    glam::Vec4,
    glam::IVec4,
    glam::Quat,
    crate::values::Rect2,
    crate::values::Rect2i,
    crate::values::Transform2D,
    crate::values::Plane,
    crate::values::Aabb,
    crate::values::Basis,
    crate::values::Transform3D,
    crate::values::Projection,
    crate::values::Color,
    crate::values::Rid
);

impl FrameArg for EngineHandle {
    fn push_to<'a>(&'a self, frame: &mut CallFrame<'a>) -> BindingResult<()> {
        frame.push_pod(&self.addr())
    }
}

impl FrameArg for ManagedHandle {
    fn push_to<'a>(&'a self, frame: &mut CallFrame<'a>) -> BindingResult<()> {
        frame.push_pod(&self.get()?.addr())
    }
}

impl FrameArg for Option<ManagedHandle> {
    fn push_to<'a>(&'a self, frame: &mut CallFrame<'a>) -> BindingResult<()> {
        match self {
            Some(handle) => handle.push_to(frame),
            None => frame.push_pod(&0usize),
        }
    }
}

impl FrameArg for Variant {
    fn push_to<'a>(&'a self, frame: &mut CallFrame<'a>) -> BindingResult<()> {
        frame.push_variant(EngineVariant::from_host(self)?);
        Ok(())
    }
}

impl FrameArg for EngineVariant {
    fn push_to<'a>(&'a self, frame: &mut CallFrame<'a>) -> BindingResult<()> {
        frame.push_external(self.as_ptr());
        Ok(())
    }
}

macro_rules! value_args {
    ($($ty:ty),*) => {
        $(impl FrameArg for $ty {
            fn push_to<'a>(&'a self, frame: &mut CallFrame<'a>) -> BindingResult<()> {
                frame.push_value(self)
            }
        })*
    };
}

value_args!(GString, StringName, NodePath, Array, Dictionary, Callable, Signal);

impl<T: PackedElement> FrameArg for PackedArray<T> {
    fn push_to<'a>(&'a self, frame: &mut CallFrame<'a>) -> BindingResult<()> {
        frame.push_value(self)
    }
}

// ============================================================================
// 返回值解包
// ============================================================================

/// 可以从返回槽读出的值
pub trait FrameRet: Sized {
    /// 无返回值（返回槽传空指针）
    const IS_VOID: bool = false;

    /// # Safety
    /// `slot` 必须是清零后由引擎按本类型布局写入的返回槽，且只读取一次。
    unsafe fn read_return(slot: ConstTypePtr) -> BindingResult<Self>;
}

impl FrameRet for () {
    const IS_VOID: bool = true;

    unsafe fn read_return(_slot: ConstTypePtr) -> BindingResult<Self> {
        Ok(())
    }
}

unsafe fn read_pod<T: Pod>(slot: ConstTypePtr) -> T {
    std::ptr::read_unaligned(slot as *const T)
}

impl FrameRet for bool {
    unsafe fn read_return(slot: ConstTypePtr) -> BindingResult<Self> {
        Ok(read_pod::<EngineBool>(slot) != FALSE)
    }
}

impl FrameRet for i64 {
    unsafe fn read_return(slot: ConstTypePtr) -> BindingResult<Self> {
        Ok(read_pod(slot))
    }
}

impl FrameRet for i32 {
    unsafe fn read_return(slot: ConstTypePtr) -> BindingResult<Self> {
        Ok(read_pod::<i64>(slot) as i32)
    }
}

impl FrameRet for f64 {
    unsafe fn read_return(slot: ConstTypePtr) -> BindingResult<Self> {
        Ok(read_pod(slot))
    }
}

impl FrameRet for f32 {
    unsafe fn read_return(slot: ConstTypePtr) -> BindingResult<Self> {
        Ok(read_pod::<f64>(slot) as f32)
    }
}

impl FrameRet for EngineErrorCode {
    unsafe fn read_return(slot: ConstTypePtr) -> BindingResult<Self> {
        Ok(EngineErrorCode::from_i64(read_pod(slot)))
    }
}

impl FrameRet for EngineHandle {
    unsafe fn read_return(slot: ConstTypePtr) -> BindingResult<Self> {
        Ok(EngineHandle::from_addr(read_pod::<usize>(slot)))
    }
}

macro_rules! pod_rets {
    ($($ty:ty),*) => {
        $(impl FrameRet for $ty {
            unsafe fn read_return(slot: ConstTypePtr) -> BindingResult<Self> {
                Ok(read_pod::<$ty>(slot))
            }
        })*
    };
}

pod_rets!(
    glam::Vec2,
    glam::IVec2,
    glam::Vec3,
    glam::IVec3,
    glam::Vec4,
    glam::IVec4,
    glam::Quat,
    crate::values::Rect2,
    crate::values::Rect2i,
    crate::values::Transform2D,
    crate::values::Plane,
    crate::values::Aabb,
    crate::values::Basis,
    crate::values::Transform3D,
    crate::values::Projection,
    crate::values::Color,
    crate::values::Rid
);

impl<K: BuiltinKind> FrameRet for EngineBuiltin<K> {
    unsafe fn read_return(slot: ConstTypePtr) -> BindingResult<Self> {
        Ok(EngineBuiltin::from_raw_owned(<K::Storage as OpaqueStorage>::read_from(slot)))
    }
}

macro_rules! value_rets {
    ($($ty:ty),*) => {
        $(impl FrameRet for $ty {
            unsafe fn read_return(slot: ConstTypePtr) -> BindingResult<Self> {
                Ok(<$ty as EngineValue>::from_engine(EngineBuiltin::read_return(slot)?))
            }
        })*
    };
}

value_rets!(GString, StringName, NodePath, Array, Dictionary, Callable, Signal);

impl<T: PackedElement> FrameRet for PackedArray<T> {
    unsafe fn read_return(slot: ConstTypePtr) -> BindingResult<Self> {
        Ok(PackedArray::from_engine(EngineBuiltin::read_return(slot)?))
    }
}

impl FrameRet for EngineVariant {
    unsafe fn read_return(slot: ConstTypePtr) -> BindingResult<Self> {
        Ok(EngineVariant::from_raw_owned(RawVariant::read_from(slot)))
    }
}

impl FrameRet for Variant {
    unsafe fn read_return(slot: ConstTypePtr) -> BindingResult<Self> {
        EngineVariant::read_return(slot)?.to_host()
    }
}

/// 断言 `T` 按值类型布局（测试和生成代码使用）
pub fn pod_fits<T: PodValue>() -> bool {
    std::mem::size_of::<T>() <= SLOT_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec2;

    #[test]
    fn test_inline_args_keep_push_order() {
        let a = 7i32;
        let b = true;
        let c = Vec2::new(1.5, -2.25);
        let mut frame = CallFrame::new();
        frame.arg(&a).unwrap().arg(&b).unwrap().arg(&c).unwrap();
        assert_eq!(frame.len(), 3);

        unsafe {
            assert_eq!(read_pod::<i64>(frame.array(0).unwrap()), 7);
            assert_eq!(read_pod::<u8>(frame.array(1).unwrap()), TRUE);
            let back: Vec2 = read_pod(frame.array(2).unwrap());
            assert_eq!(back.x.to_bits(), c.x.to_bits());
            assert_eq!(back.y.to_bits(), c.y.to_bits());
        }
        assert!(matches!(
            frame.array(3),
            Err(BindingError::IndexOutOfBounds { index: 3, len: 3 })
        ));
    }

    #[test]
    fn test_return_slot_starts_zeroed() {
        let frame = CallFrame::new();
        let slot = frame.ret::<i64>();
        assert_eq!(slot.read().unwrap(), 0);
        let handle = frame.ret::<EngineHandle>().read().unwrap();
        assert!(handle.is_null());
    }

    #[test]
    fn test_nil_slot_is_null_pointer() {
        let frame = CallFrame::new();
        let mut slot = frame.nil();
        assert!(slot.as_mut_ptr().is_null());
        assert!(slot.read().is_ok());
    }

    unsafe extern "C" fn count_args(_base: TypePtr, args: *const ConstTypePtr, ret: TypePtr, argc: c_int) {
        // 空调用必须拿到空指针
        let seen: i64 = if args.is_null() { -1 } else { argc as i64 };
        std::ptr::write_unaligned(ret as *mut i64, seen);
    }

    #[test]
    fn test_empty_frame_passes_null_args() {
        let frame = CallFrame::new();
        assert!(frame.arg_ptrs().is_empty());
        let seen: i64 = unsafe { frame.builtin_call(count_args, std::ptr::null_mut()) }.unwrap();
        assert_eq!(seen, -1);

        let mut frame = CallFrame::new();
        frame.arg(&3i64).unwrap().arg(&4i64).unwrap();
        let seen: i64 = unsafe { frame.builtin_call(count_args, std::ptr::null_mut()) }.unwrap();
        assert_eq!(seen, 2);
    }

    #[test]
    fn test_every_pod_type_fits_a_slot() {
        assert!(pod_fits::<crate::values::Projection>());
        assert!(pod_fits::<crate::values::Transform3D>());
    }
}
