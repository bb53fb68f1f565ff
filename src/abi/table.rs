//! ABI 函数指针表
//!
//! 引擎加载宿主模块时传入一个符号查找过程，`init` 逐个查找必需符号并保存。
//! 表在进程内只初始化一次，此后只读；测试可以通过 `reset` 在场景之间清空。

use super::sys::*;
use crate::core::{BindingError, BindingResult};
use crate::values::VariantType;
use std::collections::HashMap;
use std::ffi::{c_char, c_void, CString};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

macro_rules! abi_table {
    ($( $(#[$doc:meta])* $field:ident : $ty:ty, )*) => {
        /// 引擎提供的函数指针表
        pub struct AbiTable {
            $( $(#[$doc])* pub $field: $ty, )*
            library: usize,
            constructors: Mutex<HashMap<(u32, i32), PtrConstructor>>,
            destructors: Mutex<HashMap<u32, Option<PtrDestructor>>>,
            builtin_methods: Mutex<HashMap<(u32, &'static str), PtrBuiltInMethod>>,
        }

        /// 初始化时必须解析成功的符号
        pub const REQUIRED_SYMBOLS: &[&str] = &[$( stringify!($field), )*];

        impl AbiTable {
            /// 通过查找过程解析全部符号
            ///
            /// # Safety
            /// `lookup` 返回的函数指针必须与字段声明的签名一致。
            unsafe fn load(lookup: InterfaceLookupFn, library: ClassLibraryPtr) -> BindingResult<Self> {
                $(
                    let $field: $ty = {
                        let symbol = concat!(stringify!($field), "\0");
                        match lookup(symbol.as_ptr() as *const c_char) {
                            Some(f) => std::mem::transmute::<InterfaceFunctionPtr, $ty>(f),
                            None => {
                                return Err(BindingError::Configuration(
                                    stringify!($field).to_string(),
                                ))
                            }
                        }
                    };
                )*
                Ok(Self {
                    $( $field, )*
                    library: library as usize,
                    constructors: Mutex::new(HashMap::new()),
                    destructors: Mutex::new(HashMap::new()),
                    builtin_methods: Mutex::new(HashMap::new()),
                })
            }
        }
    };
}

abi_table! {
    // 内存
    mem_alloc: unsafe extern "C" fn(size: usize) -> *mut c_void,
    mem_free: unsafe extern "C" fn(ptr: *mut c_void),

    // 诊断
    print_error: unsafe extern "C" fn(
        description: *const c_char,
        function: *const c_char,
        file: *const c_char,
        line: i32,
    ),
    print_warning: unsafe extern "C" fn(
        description: *const c_char,
        function: *const c_char,
        file: *const c_char,
        line: i32,
    ),

    // ClassDB
    classdb_construct_object: unsafe extern "C" fn(class_name: ConstStringNamePtr) -> ObjectPtr,
    classdb_get_method_bind: unsafe extern "C" fn(
        class_name: ConstStringNamePtr,
        method_name: ConstStringNamePtr,
        hash: i64,
    ) -> MethodBindPtr,
    /// 查询父类，成功时把父类名构造到 `r_parent`
    classdb_get_parent_class: unsafe extern "C" fn(
        class_name: ConstStringNamePtr,
        r_parent: StringNamePtr,
    ) -> EngineBool,
    classdb_register_extension_class: unsafe extern "C" fn(
        library: ClassLibraryPtr,
        class_name: ConstStringNamePtr,
        parent_class_name: ConstStringNamePtr,
        info: *const ClassCreationInfo,
    ),
    classdb_unregister_extension_class: unsafe extern "C" fn(
        library: ClassLibraryPtr,
        class_name: ConstStringNamePtr,
    ),

    // 对象
    object_destroy: unsafe extern "C" fn(object: ObjectPtr),
    object_get_singleton: unsafe extern "C" fn(name: ConstStringNamePtr) -> ObjectPtr,
    object_get_class_name: unsafe extern "C" fn(
        object: ConstObjectPtr,
        r_class_name: StringNamePtr,
    ) -> EngineBool,
    object_get_instance_id: unsafe extern "C" fn(object: ConstObjectPtr) -> u64,
    object_get_instance_from_id: unsafe extern "C" fn(instance_id: u64) -> ObjectPtr,
    object_set_instance: unsafe extern "C" fn(
        object: ObjectPtr,
        class_name: ConstStringNamePtr,
        instance: InstancePtr,
    ),
    object_method_bind_ptrcall: unsafe extern "C" fn(
        method_bind: MethodBindPtr,
        object: ObjectPtr,
        args: *const ConstTypePtr,
        ret: TypePtr,
    ),
    refcounted_reference: unsafe extern "C" fn(object: ObjectPtr) -> EngineBool,
    /// 返回 true 表示计数归零，调用方必须销毁对象
    refcounted_unreference: unsafe extern "C" fn(object: ObjectPtr) -> EngineBool,

    // Variant
    variant_new_copy: unsafe extern "C" fn(dst: VariantPtr, src: ConstVariantPtr),
    variant_new_nil: unsafe extern "C" fn(dst: VariantPtr),
    variant_destroy: unsafe extern "C" fn(variant: VariantPtr),
    variant_get_type: unsafe extern "C" fn(variant: ConstVariantPtr) -> VariantTypeRaw,
    get_variant_from_type_constructor:
        unsafe extern "C" fn(ty: VariantTypeRaw) -> Option<VariantFromTypeFn>,
    get_variant_to_type_constructor:
        unsafe extern "C" fn(ty: VariantTypeRaw) -> Option<TypeFromVariantFn>,
    variant_get_ptr_constructor:
        unsafe extern "C" fn(ty: VariantTypeRaw, index: i32) -> Option<PtrConstructor>,
    variant_get_ptr_destructor: unsafe extern "C" fn(ty: VariantTypeRaw) -> Option<PtrDestructor>,
    variant_get_ptr_builtin_method: unsafe extern "C" fn(
        ty: VariantTypeRaw,
        method: ConstStringNamePtr,
        hash: i64,
    ) -> Option<PtrBuiltInMethod>,

    // 字符串
    string_new_with_utf8_chars_and_len:
        unsafe extern "C" fn(dst: StringPtr, contents: *const c_char, len: EngineInt),
    /// 返回 UTF-8 字节长度；`buf` 为空时只查询长度
    string_to_utf8_chars:
        unsafe extern "C" fn(string: ConstStringPtr, buf: *mut c_char, cap: EngineInt) -> EngineInt,
    string_name_new_with_utf8_chars_and_len:
        unsafe extern "C" fn(dst: StringNamePtr, contents: *const c_char, len: EngineInt),

    // 容器
    array_operator_index: unsafe extern "C" fn(array: TypePtr, index: EngineInt) -> VariantPtr,
    array_operator_index_const:
        unsafe extern "C" fn(array: ConstTypePtr, index: EngineInt) -> ConstVariantPtr,
    array_set_typed: unsafe extern "C" fn(
        array: TypePtr,
        ty: VariantTypeRaw,
        class_name: ConstStringNamePtr,
    ),
    dictionary_operator_index: unsafe extern "C" fn(dict: TypePtr, key: ConstVariantPtr) -> VariantPtr,
    dictionary_operator_index_const:
        unsafe extern "C" fn(dict: ConstTypePtr, key: ConstVariantPtr) -> ConstVariantPtr,
    packed_array_operator_index:
        unsafe extern "C" fn(ty: VariantTypeRaw, array: TypePtr, index: EngineInt) -> TypePtr,
    packed_array_operator_index_const:
        unsafe extern "C" fn(ty: VariantTypeRaw, array: ConstTypePtr, index: EngineInt) -> ConstTypePtr,
    /// 连续存储的首地址，空数组返回空指针
    packed_array_data: unsafe extern "C" fn(ty: VariantTypeRaw, array: ConstTypePtr) -> ConstTypePtr,

    // Callable
    callable_custom_create: unsafe extern "C" fn(dst: TypePtr, info: *const CallableCustomInfo),
    callable_custom_get_userdata:
        unsafe extern "C" fn(callable: ConstTypePtr, token: *mut c_void) -> *mut c_void,
}

impl fmt::Debug for AbiTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbiTable")
            .field("symbols", &REQUIRED_SYMBOLS.len())
            .field("library", &format_args!("{:#x}", self.library))
            .finish()
    }
}

impl AbiTable {
    /// 宿主模块在引擎中的库令牌
    pub fn library(&self) -> ClassLibraryPtr {
        self.library as ClassLibraryPtr
    }

    /// 查找（并缓存）某内建类型的第 `index` 个构造函数
    pub fn ptr_constructor(&self, ty: VariantType, index: i32) -> BindingResult<PtrConstructor> {
        let key = (ty as u32, index);
        let mut cache = self.constructors.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(ctor) = cache.get(&key) {
            return Ok(*ctor);
        }
        let ctor = unsafe { (self.variant_get_ptr_constructor)(ty as u32, index) }.ok_or_else(|| {
            BindingError::MethodNotFound {
                class: ty.name().to_string(),
                method: format!("<constructor {}>", index),
                hash: 0,
            }
        })?;
        cache.insert(key, ctor);
        Ok(ctor)
    }

    /// 查找（并缓存）内建类型的析构函数；POD 类型返回 `None`
    pub fn ptr_destructor(&self, ty: VariantType) -> Option<PtrDestructor> {
        let mut cache = self.destructors.lock().unwrap_or_else(|e| e.into_inner());
        *cache
            .entry(ty as u32)
            .or_insert_with(|| unsafe { (self.variant_get_ptr_destructor)(ty as u32) })
    }

    /// 查找（并缓存）内建类型的方法
    pub fn builtin_method(
        &self,
        ty: VariantType,
        method: &'static str,
        hash: i64,
    ) -> BindingResult<PtrBuiltInMethod> {
        let key = (ty as u32, method);
        if let Some(f) = self
            .builtin_methods
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
        {
            return Ok(*f);
        }
        let found = self.with_name(method, |name| unsafe {
            (self.variant_get_ptr_builtin_method)(ty as u32, name, hash)
        })?;
        let f = found.ok_or_else(|| BindingError::MethodNotFound {
            class: ty.name().to_string(),
            method: method.to_string(),
            hash,
        })?;
        self.builtin_methods
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, f);
        Ok(f)
    }

    /// 构造临时 StringName 并在闭包返回后销毁
    pub fn with_name<R>(&self, name: &str, f: impl FnOnce(ConstStringNamePtr) -> R) -> BindingResult<R> {
        let mut raw = Opaque8::default();
        unsafe {
            (self.string_name_new_with_utf8_chars_and_len)(
                raw.as_mut_ptr(),
                name.as_ptr() as *const c_char,
                name.len() as EngineInt,
            );
        }
        let result = f(raw.as_ptr());
        if let Some(dtor) = self.ptr_destructor(VariantType::StringName) {
            unsafe { dtor(raw.as_mut_ptr()) };
        }
        Ok(result)
    }

    /// 把错误转发到引擎的错误输出
    pub fn report_error(&self, message: &str, function: &str, file: &str, line: u32) {
        let description = CString::new(message.replace('\0', " ")).unwrap_or_default();
        let function = CString::new(function.replace('\0', " ")).unwrap_or_default();
        let file = CString::new(file.replace('\0', " ")).unwrap_or_default();
        unsafe {
            (self.print_error)(
                description.as_ptr(),
                function.as_ptr(),
                file.as_ptr(),
                line as i32,
            );
        }
    }
}

static TABLE: RwLock<Option<Arc<AbiTable>>> = RwLock::new(None);

/// 初始化 ABI 表
///
/// 已初始化时为无操作；缺少任何必需符号时返回 `Configuration` 错误且表保持未初始化。
///
/// # Safety
/// `lookup` 必须是引擎提供的有效查找过程。
pub unsafe fn init(lookup: InterfaceLookupFn, library: ClassLibraryPtr) -> BindingResult<()> {
    let mut slot = TABLE.write().unwrap_or_else(|e| e.into_inner());
    if slot.is_some() {
        tracing::debug!(target: "abi", "ABI table already initialized");
        return Ok(());
    }
    let table = AbiTable::load(lookup, library)?;
    tracing::info!(
        target: "abi",
        symbols = REQUIRED_SYMBOLS.len(),
        "ABI table initialized"
    );
    *slot = Some(Arc::new(table));
    Ok(())
}

/// 获取 ABI 表
pub fn get() -> BindingResult<Arc<AbiTable>> {
    TABLE
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .clone()
        .ok_or(BindingError::NotReady("ABI table"))
}

pub fn is_initialized() -> bool {
    TABLE.read().unwrap_or_else(|e| e.into_inner()).is_some()
}

/// 清空 ABI 表（测试在场景之间使用）
pub fn reset() {
    let previous = TABLE.write().unwrap_or_else(|e| e.into_inner()).take();
    if previous.is_some() {
        tracing::debug!(target: "abi", "ABI table reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe extern "C" fn empty_lookup(_name: *const c_char) -> Option<InterfaceFunctionPtr> {
        None
    }

    #[test]
    fn test_required_symbols_are_unique() {
        let mut names: Vec<&str> = REQUIRED_SYMBOLS.to_vec();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), REQUIRED_SYMBOLS.len());
        assert!(REQUIRED_SYMBOLS.contains(&"object_method_bind_ptrcall"));
    }

    #[test]
    fn test_missing_symbol_is_configuration_error() {
        let result = unsafe { AbiTable::load(empty_lookup, std::ptr::null_mut()) };
        match result {
            Err(BindingError::Configuration(symbol)) => assert_eq!(symbol, REQUIRED_SYMBOLS[0]),
            other => panic!("expected configuration error, got {:?}", other.map(|_| ())),
        }
    }
}
