//! 引擎 C ABI 的原始类型
//!
//! 与引擎接口头文件一一对应的指针别名、函数指针类型和 `#[repr(C)]` 结构体。
//! 引擎对象句柄一律为指针宽度（`ObjectPtr`），返回槽也使用同样的宽度。

use std::ffi::{c_char, c_int, c_void};

pub type EngineBool = u8;
pub type EngineInt = i64;
pub type EngineFloat = f64;
pub type VariantTypeRaw = u32;

pub type ObjectPtr = *mut c_void;
pub type ConstObjectPtr = *const c_void;
pub type TypePtr = *mut c_void;
pub type ConstTypePtr = *const c_void;
pub type VariantPtr = *mut c_void;
pub type ConstVariantPtr = *const c_void;
pub type StringPtr = *mut c_void;
pub type ConstStringPtr = *const c_void;
pub type StringNamePtr = *mut c_void;
pub type ConstStringNamePtr = *const c_void;
pub type MethodBindPtr = *const c_void;
pub type InstancePtr = *mut c_void;
pub type ClassLibraryPtr = *mut c_void;

pub const TRUE: EngineBool = 1;
pub const FALSE: EngineBool = 0;

pub fn to_engine_bool(value: bool) -> EngineBool {
    if value {
        TRUE
    } else {
        FALSE
    }
}

// ============================================================================
// 不透明值存储
// ============================================================================

/// 8 字节不透明值（String、StringName、NodePath、Array、Dictionary）
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Opaque8(pub [u64; 1]);

/// 16 字节不透明值（Packed*、Callable、Signal）
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Opaque16(pub [u64; 2]);

/// 24 字节不透明值（Variant）
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Opaque24(pub [u64; 3]);

pub type RawVariant = Opaque24;

/// 不透明存储的公共接口
pub trait OpaqueStorage: Copy + Default + PartialEq + Send + Sync + std::fmt::Debug + 'static {
    const SIZE: usize;

    fn as_ptr(&self) -> ConstTypePtr {
        self as *const Self as ConstTypePtr
    }

    fn as_mut_ptr(&mut self) -> TypePtr {
        self as *mut Self as TypePtr
    }

    /// 从引擎内存复制出字节（不转移所有权）
    ///
    /// # Safety
    /// `ptr` 必须指向至少 `SIZE` 字节的有效对象。
    unsafe fn read_from(ptr: ConstTypePtr) -> Self {
        std::ptr::read_unaligned(ptr as *const Self)
    }

    fn is_zeroed(&self) -> bool {
        *self == Self::default()
    }
}

impl OpaqueStorage for Opaque8 {
    const SIZE: usize = 8;
}

impl OpaqueStorage for Opaque16 {
    const SIZE: usize = 16;
}

impl OpaqueStorage for Opaque24 {
    const SIZE: usize = 24;
}

// ============================================================================
// 出站函数指针类型
// ============================================================================

pub type InterfaceFunctionPtr = unsafe extern "C" fn();

/// 引擎在加载时传入的符号查找过程
pub type InterfaceLookupFn =
    unsafe extern "C" fn(name: *const c_char) -> Option<InterfaceFunctionPtr>;

pub type PtrConstructor = unsafe extern "C" fn(base: TypePtr, args: *const ConstTypePtr);
pub type PtrDestructor = unsafe extern "C" fn(base: TypePtr);
pub type PtrBuiltInMethod =
    unsafe extern "C" fn(base: TypePtr, args: *const ConstTypePtr, ret: TypePtr, argc: c_int);
pub type VariantFromTypeFn = unsafe extern "C" fn(dst: VariantPtr, src: TypePtr);
pub type TypeFromVariantFn = unsafe extern "C" fn(dst: TypePtr, src: VariantPtr);

/// Variant 调用的错误码
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallError {
    pub error: u32,
    pub argument: i32,
    pub expected: i32,
}

impl CallError {
    pub const OK: u32 = 0;
    pub const INVALID_METHOD: u32 = 1;
    pub const INVALID_ARGUMENT: u32 = 2;
    pub const TOO_MANY_ARGUMENTS: u32 = 3;
    pub const TOO_FEW_ARGUMENTS: u32 = 4;
    pub const INSTANCE_IS_NULL: u32 = 5;

    pub fn is_ok(&self) -> bool {
        self.error == Self::OK
    }
}

// ============================================================================
// 入站回调（Dispatch Bridge 实现、引擎调用）
// ============================================================================

pub type CreateInstanceFn = unsafe extern "C" fn(class_userdata: *mut c_void) -> ObjectPtr;
pub type FreeInstanceFn = unsafe extern "C" fn(class_userdata: *mut c_void, instance: InstancePtr);
pub type GetVirtualCallDataFn =
    unsafe extern "C" fn(class_userdata: *mut c_void, name: ConstStringNamePtr) -> *mut c_void;
pub type CallVirtualWithDataFn = unsafe extern "C" fn(
    instance: InstancePtr,
    name: ConstStringNamePtr,
    virtual_data: *mut c_void,
    args: *const ConstTypePtr,
    ret: TypePtr,
);
pub type InstanceSetFn = unsafe extern "C" fn(
    instance: InstancePtr,
    name: ConstStringNamePtr,
    value: ConstVariantPtr,
) -> EngineBool;
pub type InstanceGetFn =
    unsafe extern "C" fn(instance: InstancePtr, name: ConstStringNamePtr, ret: VariantPtr) -> EngineBool;
pub type InstanceNotificationFn =
    unsafe extern "C" fn(instance: InstancePtr, what: i32, reversed: EngineBool);

/// 注册宿主类时交给引擎的蹦床表
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ClassCreationInfo {
    pub is_virtual: EngineBool,
    pub is_abstract: EngineBool,
    pub set_func: Option<InstanceSetFn>,
    pub get_func: Option<InstanceGetFn>,
    pub notification_func: Option<InstanceNotificationFn>,
    pub create_instance_func: Option<CreateInstanceFn>,
    pub free_instance_func: Option<FreeInstanceFn>,
    pub get_virtual_call_data_func: Option<GetVirtualCallDataFn>,
    pub call_virtual_with_data_func: Option<CallVirtualWithDataFn>,
    pub class_userdata: *mut c_void,
}

pub type CallableCallFn = unsafe extern "C" fn(
    userdata: *mut c_void,
    args: *const ConstVariantPtr,
    argc: EngineInt,
    ret: VariantPtr,
    error: *mut CallError,
);
pub type CallableFreeFn = unsafe extern "C" fn(userdata: *mut c_void);

/// 自定义 Callable 的创建信息
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CallableCustomInfo {
    pub callable_userdata: *mut c_void,
    pub token: *mut c_void,
    pub object_id: u64,
    pub call_func: Option<CallableCallFn>,
    pub free_func: Option<CallableFreeFn>,
}

/// 初始化层级
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InitLevel {
    Core = 0,
    Servers = 1,
    Scene = 2,
    Editor = 3,
}

impl InitLevel {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Core),
            1 => Some(Self::Servers),
            2 => Some(Self::Scene),
            3 => Some(Self::Editor),
            _ => None,
        }
    }
}

pub type InitializeFn = unsafe extern "C" fn(userdata: *mut c_void, level: u32);
pub type MainLoopStartedFn = unsafe extern "C" fn(userdata: *mut c_void);

/// 宿主模块填写、引擎读取的初始化信息
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct InitializationInfo {
    pub minimum_level: u32,
    pub userdata: *mut c_void,
    pub initialize: Option<InitializeFn>,
    pub deinitialize: Option<InitializeFn>,
    pub main_loop_started: Option<MainLoopStartedFn>,
}

impl Default for InitializationInfo {
    fn default() -> Self {
        Self {
            minimum_level: InitLevel::Scene as u32,
            userdata: std::ptr::null_mut(),
            initialize: None,
            deinitialize: None,
            main_loop_started: None,
        }
    }
}

/// 引擎调用的加载入口签名
pub type LibraryInitFn = unsafe extern "C" fn(
    lookup: Option<InterfaceLookupFn>,
    library: ClassLibraryPtr,
    r_initialization: *mut InitializationInfo,
) -> EngineBool;
