//! 模拟引擎的值存储
//!
//! 托管值类型在存储的首个字里放一个堆指针：String 与 NodePath 指向
//! `Box<String>`，容器与 Callable 指向 `Box<Arc<..>>`，修改经 `Arc::make_mut`
//! 分叉。StringName 指向进程级驻留表里的字符串，复制只复制字，空名为 0。
//!
//! Variant 是 `[类型标签, 载荷指针, 0]`，载荷是装着该类型存储的 64 字节堆块。

use crate::abi::sys::*;
use crate::values::VariantType;
use std::collections::HashMap;
use std::ffi::{c_char, c_int, c_void};
use std::sync::{Arc, Mutex, OnceLock};

type Payload = [u64; 8];

pub(crate) const T_OBJECT: u32 = VariantType::Object as u32;
pub(crate) const T_STRING_NAME: u32 = VariantType::StringName as u32;
const T_ARRAY: u32 = VariantType::Array as u32;
const T_DICTIONARY: u32 = VariantType::Dictionary as u32;
const T_PACKED_BYTE: u32 = VariantType::PackedByteArray as u32;
const T_PACKED_INT32: u32 = VariantType::PackedInt32Array as u32;
const T_PACKED_INT64: u32 = VariantType::PackedInt64Array as u32;
const T_PACKED_FLOAT32: u32 = VariantType::PackedFloat32Array as u32;
const T_PACKED_FLOAT64: u32 = VariantType::PackedFloat64Array as u32;
const T_PACKED_STRING: u32 = VariantType::PackedStringArray as u32;

/// 按类型标签单态化的函数表
macro_rules! per_type {
    ($ty:expr, $f:ident as $fn_ty:ty, [$($n:literal)*]) => {
        match $ty {
            $($n => Some($f::<$n> as $fn_ty),)*
            _ => None,
        }
    };
}

// ============================================================================
// 原始读写
// ============================================================================

/// 构造器参数；构造器没有参数个数，调用方只读取该构造器声明的参数
pub(crate) unsafe fn arg(args: *const ConstTypePtr, index: usize) -> ConstTypePtr {
    if args.is_null() {
        return std::ptr::null();
    }
    *args.add(index)
}

/// 带长度的参数数组视图；越界读取得到空指针
#[derive(Debug, Clone, Copy)]
pub(crate) struct Args {
    ptr: *const ConstTypePtr,
    len: usize,
}

impl Args {
    pub(crate) fn new(ptr: *const ConstTypePtr, len: usize) -> Self {
        let len = if ptr.is_null() { 0 } else { len };
        Self { ptr, len }
    }

    /// 内建方法调用，长度取引擎传入的 `argc`
    pub(crate) fn builtin(ptr: *const ConstTypePtr, argc: c_int) -> Self {
        Self::new(ptr, argc.max(0) as usize)
    }

    pub(crate) fn len(self) -> usize {
        self.len
    }

    pub(crate) unsafe fn get(self, index: usize) -> ConstTypePtr {
        if index >= self.len {
            return std::ptr::null();
        }
        *self.ptr.add(index)
    }
}

pub(crate) unsafe fn read_word(ptr: ConstTypePtr) -> usize {
    if ptr.is_null() {
        return 0;
    }
    std::ptr::read_unaligned(ptr as *const usize)
}

pub(crate) unsafe fn write_word(ptr: TypePtr, word: usize) {
    if !ptr.is_null() {
        std::ptr::write_unaligned(ptr as *mut usize, word);
    }
}

unsafe fn write_pair(ptr: TypePtr, first: usize, second: usize) {
    if !ptr.is_null() {
        std::ptr::write_unaligned(ptr as *mut Opaque16, Opaque16([first as u64, second as u64]));
    }
}

pub(crate) unsafe fn read_i64(ptr: ConstTypePtr) -> i64 {
    if ptr.is_null() {
        return 0;
    }
    std::ptr::read_unaligned(ptr as *const i64)
}

pub(crate) unsafe fn read_f64(ptr: ConstTypePtr) -> f64 {
    if ptr.is_null() {
        return 0.0;
    }
    std::ptr::read_unaligned(ptr as *const f64)
}

pub(crate) unsafe fn read_bool(ptr: ConstTypePtr) -> bool {
    !ptr.is_null() && std::ptr::read_unaligned(ptr as *const u8) != 0
}

pub(crate) unsafe fn write_i64(ptr: TypePtr, value: i64) {
    if !ptr.is_null() {
        std::ptr::write_unaligned(ptr as *mut i64, value);
    }
}

pub(crate) unsafe fn write_f64(ptr: TypePtr, value: f64) {
    if !ptr.is_null() {
        std::ptr::write_unaligned(ptr as *mut f64, value);
    }
}

pub(crate) unsafe fn write_bool(ptr: TypePtr, value: bool) {
    if !ptr.is_null() {
        std::ptr::write_unaligned(ptr as *mut u8, to_engine_bool(value));
    }
}

pub(crate) unsafe fn read_variant(ptr: ConstVariantPtr) -> RawVariant {
    if ptr.is_null() {
        return RawVariant::default();
    }
    RawVariant::read_from(ptr)
}

/// 写入返回槽；没有返回槽时销毁值
pub(crate) unsafe fn write_variant(ptr: VariantPtr, raw: RawVariant) {
    if ptr.is_null() {
        destroy_variant(raw);
    } else {
        std::ptr::write_unaligned(ptr as *mut RawVariant, raw);
    }
}

fn utf8(contents: *const c_char, len: EngineInt) -> String {
    if contents.is_null() || len <= 0 {
        return String::new();
    }
    let bytes = unsafe { std::slice::from_raw_parts(contents as *const u8, len as usize) };
    String::from_utf8_lossy(bytes).into_owned()
}

// ============================================================================
// String 与 StringName
// ============================================================================

fn names() -> &'static Mutex<HashMap<String, usize>> {
    static NAMES: OnceLock<Mutex<HashMap<String, usize>>> = OnceLock::new();
    NAMES.get_or_init(|| Mutex::new(HashMap::new()))
}

/// 驻留名字；驻留表跨引擎重置保留
pub(crate) fn intern(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    let mut names = names().lock().unwrap_or_else(|e| e.into_inner());
    if let Some(&word) = names.get(text) {
        return word;
    }
    let leaked: &'static String = Box::leak(Box::new(text.to_string()));
    let word = leaked as *const String as usize;
    names.insert(text.to_string(), word);
    word
}

pub(crate) unsafe fn name_text(word: usize) -> String {
    if word == 0 {
        return String::new();
    }
    (*(word as *const String)).clone()
}

pub(crate) unsafe fn read_name(ptr: ConstTypePtr) -> String {
    name_text(read_word(ptr))
}

pub(crate) fn new_string(text: &str) -> usize {
    Box::into_raw(Box::new(text.to_string())) as usize
}

unsafe fn string_text(word: usize) -> String {
    if word == 0 {
        return String::new();
    }
    (*(word as *const String)).clone()
}

pub(crate) unsafe fn read_string(ptr: ConstTypePtr) -> String {
    string_text(read_word(ptr))
}

unsafe fn free_string(word: usize) {
    if word != 0 {
        drop(Box::from_raw(word as *mut String));
    }
}

// ============================================================================
// 共享缓冲
// ============================================================================

unsafe fn shared<'a, T>(ptr: ConstTypePtr) -> Option<&'a Arc<T>> {
    let word = read_word(ptr);
    (word != 0).then(|| &*(word as *const Arc<T>))
}

/// 可写访问；缓冲被共享时先分叉
unsafe fn shared_mut<'a, T: Clone>(ptr: TypePtr) -> Option<&'a mut T> {
    let word = read_word(ptr);
    if word == 0 {
        return None;
    }
    Some(Arc::make_mut(&mut *(word as *mut Arc<T>)))
}

fn box_shared<T>(value: Arc<T>) -> usize {
    Box::into_raw(Box::new(value)) as usize
}

unsafe fn copy_shared<T>(dst: TypePtr, src: ConstTypePtr) {
    let word = shared::<T>(src).map_or(0, |value| box_shared(value.clone()));
    write_word(dst, word);
}

unsafe fn free_shared<T>(ptr: TypePtr) {
    let word = read_word(ptr);
    if word != 0 {
        drop(Box::from_raw(word as *mut Arc<T>));
    }
    write_word(ptr, 0);
}

unsafe fn shared_identity<T>(ptr: ConstTypePtr) -> usize {
    shared::<T>(ptr).map_or(0, |value| Arc::as_ptr(value) as *const () as usize)
}

#[derive(Default)]
pub(crate) struct ArrayData {
    items: Vec<RawVariant>,
    typed: u32,
}

impl Clone for ArrayData {
    fn clone(&self) -> Self {
        Self {
            items: self.items.iter().map(|item| unsafe { copy_variant(item) }).collect(),
            typed: self.typed,
        }
    }
}

impl Drop for ArrayData {
    fn drop(&mut self) {
        for item in self.items.drain(..) {
            unsafe { destroy_variant(item) };
        }
    }
}

impl ArrayData {
    fn deep_copy(&self) -> Self {
        Self {
            items: self.items.iter().map(|item| unsafe { deep_copy_variant(item) }).collect(),
            typed: self.typed,
        }
    }
}

/// 新数组缓冲，接管 `items`
pub(crate) fn new_array(items: Vec<RawVariant>, typed: u32) -> usize {
    box_shared(Arc::new(ArrayData { items, typed }))
}

#[derive(Default)]
pub(crate) struct DictData {
    entries: Vec<(RawVariant, RawVariant)>,
}

impl Clone for DictData {
    fn clone(&self) -> Self {
        let entries = self
            .entries
            .iter()
            .map(|(key, value)| unsafe { (copy_variant(key), copy_variant(value)) })
            .collect();
        Self { entries }
    }
}

impl Drop for DictData {
    fn drop(&mut self) {
        for (key, value) in self.entries.drain(..) {
            unsafe {
                destroy_variant(key);
                destroy_variant(value);
            }
        }
    }
}

impl DictData {
    fn find(&self, key: &RawVariant) -> Option<usize> {
        self.entries.iter().position(|(k, _)| unsafe { variant_eq(k, key) })
    }

    fn deep_copy(&self) -> Self {
        let entries = self
            .entries
            .iter()
            .map(|(key, value)| unsafe { (copy_variant(key), deep_copy_variant(value)) })
            .collect();
        Self { entries }
    }
}

fn packed_element_size(ty: u32) -> usize {
    match VariantType::from_raw(ty) {
        Some(VariantType::PackedByteArray) => 1,
        Some(VariantType::PackedInt32Array | VariantType::PackedFloat32Array) => 4,
        Some(
            VariantType::PackedInt64Array
            | VariantType::PackedFloat64Array
            | VariantType::PackedStringArray
            | VariantType::PackedVector2Array,
        ) => 8,
        Some(VariantType::PackedVector3Array) => 12,
        Some(VariantType::PackedColorArray | VariantType::PackedVector4Array) => 16,
        _ => 1,
    }
}

pub(crate) struct PackedData {
    ty: u32,
    bytes: Vec<u8>,
}

impl PackedData {
    fn new(ty: u32) -> Self {
        Self { ty, bytes: Vec::new() }
    }

    fn element_size(&self) -> usize {
        packed_element_size(self.ty)
    }

    fn len(&self) -> usize {
        self.bytes.len() / self.element_size()
    }

    /// PackedStringArray 的每个元素是一个 `Box<String>` 字
    fn string_words(&self) -> Vec<usize> {
        if self.ty != T_PACKED_STRING {
            return Vec::new();
        }
        self.bytes
            .chunks_exact(8)
            .map(|chunk| {
                let mut word = [0u8; 8];
                word.copy_from_slice(chunk);
                u64::from_ne_bytes(word) as usize
            })
            .collect()
    }
}

impl Clone for PackedData {
    fn clone(&self) -> Self {
        if self.ty != T_PACKED_STRING {
            return Self { ty: self.ty, bytes: self.bytes.clone() };
        }
        let bytes = self
            .string_words()
            .into_iter()
            .flat_map(|word| (new_string(&unsafe { string_text(word) }) as u64).to_ne_bytes())
            .collect();
        Self { ty: self.ty, bytes }
    }
}

impl Drop for PackedData {
    fn drop(&mut self) {
        for word in self.string_words() {
            unsafe { free_string(word) };
        }
    }
}

pub(crate) enum CallableData {
    Custom {
        userdata: usize,
        token: usize,
        call: Option<CallableCallFn>,
        free: Option<CallableFreeFn>,
    },
    Method {
        object: usize,
        method: usize,
    },
}

impl Drop for CallableData {
    fn drop(&mut self) {
        if let Self::Custom { userdata, free: Some(free), .. } = self {
            unsafe { free(*userdata as *mut c_void) };
        }
    }
}

// ============================================================================
// 按类型复制与销毁
// ============================================================================

/// 把 `src` 处类型为 `ty` 的值复制构造到 `dst`
pub(crate) unsafe fn copy_value(ty: u32, dst: TypePtr, src: ConstTypePtr) {
    let Some(kind) = VariantType::from_raw(ty) else {
        return;
    };
    if let Some(size) = kind.pod_size() {
        std::ptr::copy_nonoverlapping(src as *const u8, dst as *mut u8, size);
        return;
    }
    match kind {
        VariantType::String | VariantType::NodePath => write_word(dst, new_string(&read_string(src))),
        VariantType::StringName => write_word(dst, read_word(src)),
        VariantType::Array => copy_shared::<ArrayData>(dst, src),
        VariantType::Dictionary => copy_shared::<DictData>(dst, src),
        VariantType::Callable => {
            let word = shared::<CallableData>(src).map_or(0, |value| box_shared(value.clone()));
            write_pair(dst, word, 0);
        }
        VariantType::Signal => write_pair(dst, read_word(src), read_word((src as *const u8).add(8) as ConstTypePtr)),
        k if k.is_packed_array() => {
            let word = shared::<PackedData>(src).map_or(0, |value| box_shared(value.clone()));
            write_pair(dst, word, 0);
        }
        _ => {}
    }
}

pub(crate) unsafe fn destroy_value(ty: u32, ptr: TypePtr) {
    match VariantType::from_raw(ty) {
        Some(VariantType::String | VariantType::NodePath) => {
            free_string(read_word(ptr));
            write_word(ptr, 0);
        }
        Some(VariantType::Array) => free_shared::<ArrayData>(ptr),
        Some(VariantType::Dictionary) => free_shared::<DictData>(ptr),
        Some(VariantType::Callable) => free_shared::<CallableData>(ptr),
        Some(k) if k.is_packed_array() => free_shared::<PackedData>(ptr),
        _ => {}
    }
}

// ============================================================================
// Variant
// ============================================================================

fn tag(raw: &RawVariant) -> u32 {
    raw.0[0] as u32
}

fn payload(raw: &RawVariant) -> *mut Payload {
    raw.0[1] as usize as *mut Payload
}

/// 复制构造一个装着 `src` 的 Variant
pub(crate) unsafe fn make_variant(ty: u32, src: ConstTypePtr) -> RawVariant {
    if ty == 0 || src.is_null() {
        return RawVariant::default();
    }
    let mut body: Box<Payload> = Box::new([0; 8]);
    copy_value(ty, body.as_mut_ptr() as TypePtr, src);
    Opaque24([ty as u64, Box::into_raw(body) as usize as u64, 0])
}

/// 直接接管存储字构造 Variant，不做复制
pub(crate) fn adopt_variant(ty: u32, words: &[u64]) -> RawVariant {
    let mut body: Box<Payload> = Box::new([0; 8]);
    for (slot, word) in body.iter_mut().zip(words) {
        *slot = *word;
    }
    Opaque24([ty as u64, Box::into_raw(body) as usize as u64, 0])
}

pub(crate) unsafe fn copy_variant(raw: &RawVariant) -> RawVariant {
    let body = payload(raw);
    if tag(raw) == 0 || body.is_null() {
        return RawVariant::default();
    }
    make_variant(tag(raw), body as ConstTypePtr)
}

pub(crate) unsafe fn destroy_variant(raw: RawVariant) {
    let body = payload(&raw);
    if tag(&raw) == 0 || body.is_null() {
        return;
    }
    destroy_value(tag(&raw), body as TypePtr);
    drop(Box::from_raw(body));
}

unsafe fn deep_copy_variant(raw: &RawVariant) -> RawVariant {
    let body = payload(raw) as ConstTypePtr;
    match tag(raw) {
        T_ARRAY => match shared::<ArrayData>(body) {
            Some(data) => adopt_variant(T_ARRAY, &[new_array_from(data.deep_copy()) as u64]),
            None => copy_variant(raw),
        },
        T_DICTIONARY => match shared::<DictData>(body) {
            Some(data) => adopt_variant(T_DICTIONARY, &[box_shared(Arc::new(data.deep_copy())) as u64]),
            None => copy_variant(raw),
        },
        _ => copy_variant(raw),
    }
}

fn new_array_from(data: ArrayData) -> usize {
    box_shared(Arc::new(data))
}

/// 字典键的相等：按值比较字符串与 POD，其余按身份
unsafe fn variant_eq(a: &RawVariant, b: &RawVariant) -> bool {
    if tag(a) != tag(b) {
        return false;
    }
    let Some(kind) = VariantType::from_raw(tag(a)) else {
        return false;
    };
    if kind == VariantType::Nil {
        return true;
    }
    let (pa, pb) = (payload(a) as ConstTypePtr, payload(b) as ConstTypePtr);
    if pa.is_null() || pb.is_null() {
        return pa == pb;
    }
    if let Some(size) = kind.pod_size() {
        let left = std::slice::from_raw_parts(pa as *const u8, size);
        let right = std::slice::from_raw_parts(pb as *const u8, size);
        return left == right;
    }
    match kind {
        VariantType::String | VariantType::NodePath => read_string(pa) == read_string(pb),
        VariantType::Array => shared_identity::<ArrayData>(pa) == shared_identity::<ArrayData>(pb),
        VariantType::Dictionary => shared_identity::<DictData>(pa) == shared_identity::<DictData>(pb),
        VariantType::Callable => callables_equal(pa, pb),
        k if k.is_packed_array() => shared_identity::<PackedData>(pa) == shared_identity::<PackedData>(pb),
        _ => std::ptr::read_unaligned(pa as *const Opaque16) == std::ptr::read_unaligned(pb as *const Opaque16),
    }
}

unsafe extern "C" fn variant_from_type<const TY: u32>(dst: VariantPtr, src: TypePtr) {
    write_variant(dst, make_variant(TY, src));
}

unsafe extern "C" fn type_from_variant<const TY: u32>(dst: TypePtr, src: VariantPtr) {
    let raw = read_variant(src);
    let body = payload(&raw);
    if tag(&raw) == TY && !body.is_null() {
        copy_value(TY, dst, body as ConstTypePtr);
    }
}

pub(super) unsafe extern "C" fn variant_new_copy(dst: VariantPtr, src: ConstVariantPtr) {
    write_variant(dst, copy_variant(&read_variant(src)));
}

pub(super) unsafe extern "C" fn variant_new_nil(dst: VariantPtr) {
    write_variant(dst, RawVariant::default());
}

pub(super) unsafe extern "C" fn variant_destroy(variant: VariantPtr) {
    if variant.is_null() {
        return;
    }
    destroy_variant(read_variant(variant));
    std::ptr::write_unaligned(variant as *mut RawVariant, RawVariant::default());
}

pub(super) unsafe extern "C" fn variant_get_type(variant: ConstVariantPtr) -> VariantTypeRaw {
    tag(&read_variant(variant))
}

pub(super) unsafe extern "C" fn get_variant_from_type_constructor(ty: VariantTypeRaw) -> Option<VariantFromTypeFn> {
    per_type!(ty, variant_from_type as VariantFromTypeFn, [
        1 2 3 4 5 6 7 8 9 10 11 12 13 14 15 16 17 18 19 20
        21 22 23 24 25 26 27 28 29 30 31 32 33 34 35 36 37 38
    ])
}

pub(super) unsafe extern "C" fn get_variant_to_type_constructor(ty: VariantTypeRaw) -> Option<TypeFromVariantFn> {
    per_type!(ty, type_from_variant as TypeFromVariantFn, [
        1 2 3 4 5 6 7 8 9 10 11 12 13 14 15 16 17 18 19 20
        21 22 23 24 25 26 27 28 29 30 31 32 33 34 35 36 37 38
    ])
}

// ============================================================================
// 构造与析构
// ============================================================================

unsafe extern "C" fn string_new(base: TypePtr, _args: *const ConstTypePtr) {
    write_word(base, 0);
}

unsafe extern "C" fn string_copy(base: TypePtr, args: *const ConstTypePtr) {
    write_word(base, new_string(&read_string(arg(args, 0))));
}

unsafe extern "C" fn string_from_name(base: TypePtr, args: *const ConstTypePtr) {
    write_word(base, new_string(&read_name(arg(args, 0))));
}

unsafe extern "C" fn name_new(base: TypePtr, _args: *const ConstTypePtr) {
    write_word(base, 0);
}

unsafe extern "C" fn name_copy(base: TypePtr, args: *const ConstTypePtr) {
    write_word(base, read_word(arg(args, 0)));
}

unsafe extern "C" fn name_from_string(base: TypePtr, args: *const ConstTypePtr) {
    write_word(base, intern(&read_string(arg(args, 0))));
}

unsafe extern "C" fn array_new(base: TypePtr, _args: *const ConstTypePtr) {
    write_word(base, new_array(Vec::new(), 0));
}

unsafe extern "C" fn array_copy(base: TypePtr, args: *const ConstTypePtr) {
    copy_shared::<ArrayData>(base, arg(args, 0));
}

unsafe extern "C" fn dictionary_new(base: TypePtr, _args: *const ConstTypePtr) {
    write_word(base, box_shared(Arc::new(DictData::default())));
}

unsafe extern "C" fn dictionary_copy(base: TypePtr, args: *const ConstTypePtr) {
    copy_shared::<DictData>(base, arg(args, 0));
}

unsafe extern "C" fn packed_new<const TY: u32>(base: TypePtr, _args: *const ConstTypePtr) {
    write_pair(base, box_shared(Arc::new(PackedData::new(TY))), 0);
}

unsafe extern "C" fn packed_copy(base: TypePtr, args: *const ConstTypePtr) {
    copy_value(T_PACKED_BYTE, base, arg(args, 0));
}

unsafe extern "C" fn callable_new(base: TypePtr, _args: *const ConstTypePtr) {
    write_pair(base, 0, 0);
}

unsafe extern "C" fn callable_copy(base: TypePtr, args: *const ConstTypePtr) {
    copy_value(VariantType::Callable as u32, base, arg(args, 0));
}

/// `Callable(object, method)`：参数是对象地址和 StringName
unsafe extern "C" fn callable_from_method(base: TypePtr, args: *const ConstTypePtr) {
    let object = read_word(arg(args, 0));
    let method = read_word(arg(args, 1));
    write_pair(base, box_shared(Arc::new(CallableData::Method { object, method })), 0);
}

unsafe extern "C" fn signal_new(base: TypePtr, _args: *const ConstTypePtr) {
    write_pair(base, 0, 0);
}

unsafe extern "C" fn signal_copy(base: TypePtr, args: *const ConstTypePtr) {
    copy_value(VariantType::Signal as u32, base, arg(args, 0));
}

unsafe extern "C" fn signal_from_object(base: TypePtr, args: *const ConstTypePtr) {
    write_pair(base, read_word(arg(args, 0)), read_word(arg(args, 1)));
}

unsafe extern "C" fn string_destroy(base: TypePtr) {
    destroy_value(VariantType::String as u32, base);
}

unsafe extern "C" fn noop_destroy(_base: TypePtr) {}

unsafe extern "C" fn array_destroy(base: TypePtr) {
    free_shared::<ArrayData>(base);
}

unsafe extern "C" fn dictionary_destroy(base: TypePtr) {
    free_shared::<DictData>(base);
}

unsafe extern "C" fn packed_destroy(base: TypePtr) {
    free_shared::<PackedData>(base);
}

unsafe extern "C" fn callable_destroy(base: TypePtr) {
    free_shared::<CallableData>(base);
}

pub(super) unsafe extern "C" fn variant_get_ptr_constructor(ty: VariantTypeRaw, index: i32) -> Option<PtrConstructor> {
    let kind = VariantType::from_raw(ty)?;
    if kind.is_packed_array() {
        return match index {
            0 => per_type!(ty, packed_new as PtrConstructor, [29 30 31 32 33 34 35 36 37 38]),
            1 => Some(packed_copy as PtrConstructor),
            _ => None,
        };
    }
    let ctor: PtrConstructor = match (kind, index) {
        (VariantType::String, 0) => string_new,
        (VariantType::String, 1) => string_copy,
        (VariantType::String, 2) => string_from_name,
        // NodePath 与 String 同样存成 Box<String>
        (VariantType::String, 3) => string_copy,
        (VariantType::StringName, 0) => name_new,
        (VariantType::StringName, 1) => name_copy,
        (VariantType::StringName, 2) => name_from_string,
        (VariantType::NodePath, 0) => string_new,
        (VariantType::NodePath, 1 | 2) => string_copy,
        (VariantType::Array, 0) => array_new,
        (VariantType::Array, 1) => array_copy,
        (VariantType::Dictionary, 0) => dictionary_new,
        (VariantType::Dictionary, 1) => dictionary_copy,
        (VariantType::Callable, 0) => callable_new,
        (VariantType::Callable, 1) => callable_copy,
        (VariantType::Callable, 2) => callable_from_method,
        (VariantType::Signal, 0) => signal_new,
        (VariantType::Signal, 1) => signal_copy,
        (VariantType::Signal, 2) => signal_from_object,
        _ => return None,
    };
    Some(ctor)
}

pub(super) unsafe extern "C" fn variant_get_ptr_destructor(ty: VariantTypeRaw) -> Option<PtrDestructor> {
    let dtor: PtrDestructor = match VariantType::from_raw(ty)? {
        VariantType::String | VariantType::NodePath => string_destroy,
        VariantType::StringName | VariantType::Signal => noop_destroy,
        VariantType::Array => array_destroy,
        VariantType::Dictionary => dictionary_destroy,
        VariantType::Callable => callable_destroy,
        k if k.is_packed_array() => packed_destroy,
        _ => return None,
    };
    Some(dtor)
}

// ============================================================================
// 内建方法
// ============================================================================

unsafe extern "C" fn array_size(base: TypePtr, _args: *const ConstTypePtr, ret: TypePtr, _argc: c_int) {
    let len = shared::<ArrayData>(base).map_or(0, |data| data.items.len());
    write_i64(ret, len as i64);
}

unsafe extern "C" fn array_push_back(base: TypePtr, args: *const ConstTypePtr, _ret: TypePtr, argc: c_int) {
    let value = copy_variant(&read_variant(Args::builtin(args, argc).get(0)));
    match shared_mut::<ArrayData>(base) {
        Some(data) => data.items.push(value),
        None => destroy_variant(value),
    }
}

unsafe extern "C" fn array_remove_at(base: TypePtr, args: *const ConstTypePtr, _ret: TypePtr, argc: c_int) {
    let index = read_i64(Args::builtin(args, argc).get(0));
    if let Some(data) = shared_mut::<ArrayData>(base) {
        if index >= 0 && (index as usize) < data.items.len() {
            destroy_variant(data.items.remove(index as usize));
        }
    }
}

unsafe extern "C" fn array_clear(base: TypePtr, _args: *const ConstTypePtr, _ret: TypePtr, _argc: c_int) {
    if let Some(data) = shared_mut::<ArrayData>(base) {
        for item in data.items.drain(..) {
            destroy_variant(item);
        }
    }
}

unsafe extern "C" fn array_get_typed_builtin(base: TypePtr, _args: *const ConstTypePtr, ret: TypePtr, _argc: c_int) {
    let typed = shared::<ArrayData>(base).map_or(0, |data| data.typed);
    write_i64(ret, typed as i64);
}

unsafe extern "C" fn array_duplicate(base: TypePtr, args: *const ConstTypePtr, ret: TypePtr, argc: c_int) {
    let deep = read_bool(Args::builtin(args, argc).get(0));
    let copy = match shared::<ArrayData>(base) {
        Some(data) if deep => data.deep_copy(),
        Some(data) => ArrayData::clone(data),
        None => ArrayData::default(),
    };
    write_word(ret, new_array_from(copy));
}

unsafe extern "C" fn dictionary_size(base: TypePtr, _args: *const ConstTypePtr, ret: TypePtr, _argc: c_int) {
    let len = shared::<DictData>(base).map_or(0, |data| data.entries.len());
    write_i64(ret, len as i64);
}

unsafe extern "C" fn dictionary_has(base: TypePtr, args: *const ConstTypePtr, ret: TypePtr, argc: c_int) {
    let key = read_variant(Args::builtin(args, argc).get(0));
    let found = shared::<DictData>(base).is_some_and(|data| data.find(&key).is_some());
    write_bool(ret, found);
}

unsafe extern "C" fn dictionary_erase(base: TypePtr, args: *const ConstTypePtr, ret: TypePtr, argc: c_int) {
    let key = read_variant(Args::builtin(args, argc).get(0));
    let mut erased = false;
    if let Some(data) = shared_mut::<DictData>(base) {
        if let Some(position) = data.find(&key) {
            let (k, v) = data.entries.remove(position);
            destroy_variant(k);
            destroy_variant(v);
            erased = true;
        }
    }
    write_bool(ret, erased);
}

unsafe extern "C" fn dictionary_clear(base: TypePtr, _args: *const ConstTypePtr, _ret: TypePtr, _argc: c_int) {
    if let Some(data) = shared_mut::<DictData>(base) {
        for (key, value) in data.entries.drain(..) {
            destroy_variant(key);
            destroy_variant(value);
        }
    }
}

unsafe extern "C" fn dictionary_keys(base: TypePtr, _args: *const ConstTypePtr, ret: TypePtr, _argc: c_int) {
    let keys = shared::<DictData>(base)
        .map(|data| data.entries.iter().map(|(key, _)| copy_variant(key)).collect())
        .unwrap_or_default();
    write_word(ret, new_array(keys, 0));
}

unsafe extern "C" fn dictionary_duplicate(base: TypePtr, args: *const ConstTypePtr, ret: TypePtr, argc: c_int) {
    let deep = read_bool(Args::builtin(args, argc).get(0));
    let copy = match shared::<DictData>(base) {
        Some(data) if deep => data.deep_copy(),
        Some(data) => DictData::clone(data),
        None => DictData::default(),
    };
    write_word(ret, box_shared(Arc::new(copy)));
}

unsafe extern "C" fn packed_size(base: TypePtr, _args: *const ConstTypePtr, ret: TypePtr, _argc: c_int) {
    let len = shared::<PackedData>(base).map_or(0, |data| data.len());
    write_i64(ret, len as i64);
}

/// 追加元素；整数按 int、浮点按 float 传入，其余按元素布局
unsafe extern "C" fn packed_push_back(base: TypePtr, args: *const ConstTypePtr, _ret: TypePtr, argc: c_int) {
    let Some(data) = shared_mut::<PackedData>(base) else {
        return;
    };
    let src = Args::builtin(args, argc).get(0);
    match data.ty {
        T_PACKED_BYTE => data.bytes.push(read_i64(src) as u8),
        T_PACKED_INT32 => data.bytes.extend_from_slice(&(read_i64(src) as i32).to_ne_bytes()),
        T_PACKED_INT64 => data.bytes.extend_from_slice(&read_i64(src).to_ne_bytes()),
        T_PACKED_FLOAT32 => data.bytes.extend_from_slice(&(read_f64(src) as f32).to_ne_bytes()),
        T_PACKED_FLOAT64 => data.bytes.extend_from_slice(&read_f64(src).to_ne_bytes()),
        T_PACKED_STRING => data
            .bytes
            .extend_from_slice(&(new_string(&read_string(src)) as u64).to_ne_bytes()),
        _ => {
            if !src.is_null() {
                let size = data.element_size();
                data.bytes
                    .extend_from_slice(std::slice::from_raw_parts(src as *const u8, size));
            }
        }
    }
}

unsafe extern "C" fn packed_remove_at(base: TypePtr, args: *const ConstTypePtr, _ret: TypePtr, argc: c_int) {
    let index = read_i64(Args::builtin(args, argc).get(0));
    let Some(data) = shared_mut::<PackedData>(base) else {
        return;
    };
    if index < 0 || index as usize >= data.len() {
        return;
    }
    let index = index as usize;
    if let Some(word) = data.string_words().get(index) {
        free_string(*word);
    }
    let size = data.element_size();
    data.bytes.drain(index * size..(index + 1) * size);
}

unsafe extern "C" fn packed_clear(base: TypePtr, _args: *const ConstTypePtr, _ret: TypePtr, _argc: c_int) {
    if let Some(data) = shared_mut::<PackedData>(base) {
        for word in data.string_words() {
            free_string(word);
        }
        data.bytes.clear();
    }
}

unsafe extern "C" fn packed_duplicate(base: TypePtr, _args: *const ConstTypePtr, ret: TypePtr, _argc: c_int) {
    let word = shared::<PackedData>(base).map_or(0, |data| box_shared(Arc::new(PackedData::clone(data))));
    write_pair(ret, word, 0);
}

unsafe extern "C" fn callable_callv(base: TypePtr, args: *const ConstTypePtr, ret: TypePtr, argc: c_int) {
    let arguments = shared::<ArrayData>(Args::builtin(args, argc).get(0)).cloned();
    let ptrs: Vec<ConstVariantPtr> = arguments
        .as_ref()
        .map(|data| {
            data.items
                .iter()
                .map(|item| item as *const RawVariant as ConstVariantPtr)
                .collect()
        })
        .unwrap_or_default();
    let result = invoke_callable(base, &ptrs);
    write_variant(ret, result);
}

unsafe extern "C" fn callable_is_valid(base: TypePtr, _args: *const ConstTypePtr, ret: TypePtr, _argc: c_int) {
    write_bool(ret, shared::<CallableData>(base).is_some());
}

unsafe extern "C" fn callable_get_object(base: TypePtr, _args: *const ConstTypePtr, ret: TypePtr, _argc: c_int) {
    let object = match shared::<CallableData>(base).map(|data| &**data) {
        Some(CallableData::Method { object, .. }) => *object,
        _ => 0,
    };
    write_word(ret, object);
}

unsafe extern "C" fn callable_get_method(base: TypePtr, _args: *const ConstTypePtr, ret: TypePtr, _argc: c_int) {
    let method = match shared::<CallableData>(base).map(|data| &**data) {
        Some(CallableData::Method { method, .. }) => *method,
        _ => 0,
    };
    write_word(ret, method);
}

pub(super) unsafe extern "C" fn variant_get_ptr_builtin_method(
    ty: VariantTypeRaw,
    method: ConstStringNamePtr,
    _hash: i64,
) -> Option<PtrBuiltInMethod> {
    use super::objects;

    let kind = VariantType::from_raw(ty)?;
    let name = read_name(method);
    let f: PtrBuiltInMethod = match (kind, name.as_str()) {
        (VariantType::Array, "size") => array_size,
        (VariantType::Array, "push_back") => array_push_back,
        (VariantType::Array, "remove_at") => array_remove_at,
        (VariantType::Array, "clear") => array_clear,
        (VariantType::Array, "get_typed_builtin") => array_get_typed_builtin,
        (VariantType::Array, "duplicate") => array_duplicate,
        (VariantType::Dictionary, "size") => dictionary_size,
        (VariantType::Dictionary, "has") => dictionary_has,
        (VariantType::Dictionary, "erase") => dictionary_erase,
        (VariantType::Dictionary, "clear") => dictionary_clear,
        (VariantType::Dictionary, "keys") => dictionary_keys,
        (VariantType::Dictionary, "duplicate") => dictionary_duplicate,
        (VariantType::Callable, "callv") => callable_callv,
        (VariantType::Callable, "is_valid") => callable_is_valid,
        (VariantType::Callable, "get_object") => callable_get_object,
        (VariantType::Callable, "get_method") => callable_get_method,
        (VariantType::Signal, "connect") => objects::signal_connect,
        (VariantType::Signal, "disconnect") => objects::signal_disconnect,
        (VariantType::Signal, "is_connected") => objects::signal_is_connected,
        (VariantType::Signal, "emit") => objects::signal_emit,
        (VariantType::Signal, "get_object") => objects::signal_get_object,
        (VariantType::Signal, "get_name") => objects::signal_get_name,
        (k, "size") if k.is_packed_array() => packed_size,
        (k, "push_back") if k.is_packed_array() => packed_push_back,
        (k, "remove_at") if k.is_packed_array() => packed_remove_at,
        (k, "clear") if k.is_packed_array() => packed_clear,
        (k, "duplicate") if k.is_packed_array() => packed_duplicate,
        _ => return None,
    };
    Some(f)
}

// ============================================================================
// Callable
// ============================================================================

pub(crate) unsafe fn callable_is_set(ptr: ConstTypePtr) -> bool {
    shared::<CallableData>(ptr).is_some()
}

/// 两个 Callable 是否指向同一目标
pub(crate) unsafe fn callables_equal(a: ConstTypePtr, b: ConstTypePtr) -> bool {
    match (shared::<CallableData>(a), shared::<CallableData>(b)) {
        (Some(a), Some(b)) => {
            Arc::ptr_eq(a, b)
                || match (&**a, &**b) {
                    (
                        CallableData::Custom { userdata: x, .. },
                        CallableData::Custom { userdata: y, .. },
                    ) => x == y,
                    (
                        CallableData::Method { object: o1, method: m1 },
                        CallableData::Method { object: o2, method: m2 },
                    ) => o1 == o2 && m1 == m2,
                    _ => false,
                }
        }
        (None, None) => true,
        _ => false,
    }
}

pub(crate) unsafe fn copy_callable(src: ConstTypePtr) -> Opaque16 {
    let mut copy = Opaque16::default();
    copy_value(VariantType::Callable as u32, copy.as_mut_ptr(), src);
    copy
}

pub(crate) unsafe fn destroy_callable(mut callable: Opaque16) {
    free_shared::<CallableData>(callable.as_mut_ptr());
}

/// 调用 Callable；宿主回调失败时返回 Nil 并记录错误
pub(crate) unsafe fn invoke_callable(callable: ConstTypePtr, args: &[ConstVariantPtr]) -> RawVariant {
    let Some(data) = shared::<CallableData>(callable).cloned() else {
        super::objects::record_error("Attempt to call an invalid Callable");
        return RawVariant::default();
    };
    match &*data {
        CallableData::Custom { userdata, call: Some(call), .. } => {
            let mut ret = RawVariant::default();
            let mut error = CallError::default();
            call(
                *userdata as *mut c_void,
                args.as_ptr(),
                args.len() as EngineInt,
                ret.as_mut_ptr(),
                &mut error,
            );
            if !error.is_ok() {
                super::objects::record_error(format!("Callable returned call error {}", error.error));
            }
            ret
        }
        CallableData::Custom { call: None, .. } => {
            super::objects::record_error("Custom Callable without call function");
            RawVariant::default()
        }
        CallableData::Method { object, method } => {
            super::objects::record_error(format!(
                "Method Callable {:#x}::{} is not dispatched by the mock engine",
                object,
                name_text(*method)
            ));
            RawVariant::default()
        }
    }
}

pub(super) unsafe extern "C" fn callable_custom_create(dst: TypePtr, info: *const CallableCustomInfo) {
    let Some(info) = info.as_ref() else {
        write_pair(dst, 0, 0);
        return;
    };
    let data = CallableData::Custom {
        userdata: info.callable_userdata as usize,
        token: info.token as usize,
        call: info.call_func,
        free: info.free_func,
    };
    write_pair(dst, box_shared(Arc::new(data)), 0);
}

pub(super) unsafe extern "C" fn callable_custom_get_userdata(callable: ConstTypePtr, token: *mut c_void) -> *mut c_void {
    match shared::<CallableData>(callable).map(|data| &**data) {
        Some(CallableData::Custom { userdata, token: owner, .. }) if *owner == token as usize => {
            *userdata as *mut c_void
        }
        _ => std::ptr::null_mut(),
    }
}

// ============================================================================
// 字符串与容器访问
// ============================================================================

pub(super) unsafe extern "C" fn string_new_with_utf8_chars_and_len(
    dst: StringPtr,
    contents: *const c_char,
    len: EngineInt,
) {
    write_word(dst, new_string(&utf8(contents, len)));
}

pub(super) unsafe extern "C" fn string_to_utf8_chars(
    string: ConstStringPtr,
    buf: *mut c_char,
    cap: EngineInt,
) -> EngineInt {
    let text = read_string(string);
    if !buf.is_null() {
        let count = text.len().min(cap.max(0) as usize);
        std::ptr::copy_nonoverlapping(text.as_ptr(), buf as *mut u8, count);
    }
    text.len() as EngineInt
}

pub(super) unsafe extern "C" fn string_name_new_with_utf8_chars_and_len(
    dst: StringNamePtr,
    contents: *const c_char,
    len: EngineInt,
) {
    write_word(dst, intern(&utf8(contents, len)));
}

pub(super) unsafe extern "C" fn array_operator_index(array: TypePtr, index: EngineInt) -> VariantPtr {
    match shared_mut::<ArrayData>(array) {
        Some(data) if index >= 0 && (index as usize) < data.items.len() => {
            &mut data.items[index as usize] as *mut RawVariant as VariantPtr
        }
        _ => std::ptr::null_mut(),
    }
}

pub(super) unsafe extern "C" fn array_operator_index_const(array: ConstTypePtr, index: EngineInt) -> ConstVariantPtr {
    if index < 0 {
        return std::ptr::null();
    }
    shared::<ArrayData>(array)
        .and_then(|data| data.items.get(index as usize))
        .map_or(std::ptr::null(), |item| item as *const RawVariant as ConstVariantPtr)
}

pub(super) unsafe extern "C" fn array_set_typed(array: TypePtr, ty: VariantTypeRaw, _class_name: ConstStringNamePtr) {
    if let Some(data) = shared_mut::<ArrayData>(array) {
        data.typed = ty;
    }
}

/// 可写索引；键不存在时插入 Nil
pub(super) unsafe extern "C" fn dictionary_operator_index(dict: TypePtr, key: ConstVariantPtr) -> VariantPtr {
    let Some(data) = shared_mut::<DictData>(dict) else {
        return std::ptr::null_mut();
    };
    let key = read_variant(key);
    let position = match data.find(&key) {
        Some(position) => position,
        None => {
            data.entries.push((copy_variant(&key), RawVariant::default()));
            data.entries.len() - 1
        }
    };
    &mut data.entries[position].1 as *mut RawVariant as VariantPtr
}

pub(super) unsafe extern "C" fn dictionary_operator_index_const(dict: ConstTypePtr, key: ConstVariantPtr) -> ConstVariantPtr {
    let key = read_variant(key);
    shared::<DictData>(dict)
        .and_then(|data| data.find(&key).map(|position| &data.entries[position].1))
        .map_or(std::ptr::null(), |value| value as *const RawVariant as ConstVariantPtr)
}

pub(super) unsafe extern "C" fn packed_array_operator_index(_ty: VariantTypeRaw, array: TypePtr, index: EngineInt) -> TypePtr {
    match shared_mut::<PackedData>(array) {
        Some(data) if index >= 0 && (index as usize) < data.len() => {
            let offset = index as usize * data.element_size();
            data.bytes.as_mut_ptr().add(offset) as TypePtr
        }
        _ => std::ptr::null_mut(),
    }
}

pub(super) unsafe extern "C" fn packed_array_operator_index_const(
    _ty: VariantTypeRaw,
    array: ConstTypePtr,
    index: EngineInt,
) -> ConstTypePtr {
    match shared::<PackedData>(array) {
        Some(data) if index >= 0 && (index as usize) < data.len() => {
            let offset = index as usize * data.element_size();
            data.bytes.as_ptr().add(offset) as ConstTypePtr
        }
        _ => std::ptr::null(),
    }
}

pub(super) unsafe extern "C" fn packed_array_data(_ty: VariantTypeRaw, array: ConstTypePtr) -> ConstTypePtr {
    match shared::<PackedData>(array) {
        Some(data) if !data.bytes.is_empty() => data.bytes.as_ptr() as ConstTypePtr,
        _ => std::ptr::null(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_stable() {
        let first = intern("walk");
        assert_eq!(first, intern("walk"));
        assert_ne!(first, intern("run"));
        assert_eq!(intern(""), 0);
        assert_eq!(unsafe { name_text(first) }, "walk");
    }

    #[test]
    fn test_array_copy_forks_on_write() {
        unsafe {
            let mut a = Opaque8::default();
            array_new(a.as_mut_ptr(), std::ptr::null());
            let mut b = Opaque8::default();
            let source = [a.as_ptr()];
            array_copy(b.as_mut_ptr(), source.as_ptr());

            let value = 7i64;
            let item = make_variant(VariantType::Int as u32, &value as *const i64 as ConstTypePtr);
            let push_args = [&item as *const RawVariant as ConstTypePtr];
            array_push_back(b.as_mut_ptr(), push_args.as_ptr(), std::ptr::null_mut(), 1);

            let mut len = 0i64;
            array_size(a.as_mut_ptr(), std::ptr::null(), &mut len as *mut i64 as TypePtr, 0);
            assert_eq!(len, 0);
            array_size(b.as_mut_ptr(), std::ptr::null(), &mut len as *mut i64 as TypePtr, 0);
            assert_eq!(len, 1);

            destroy_variant(item);
            array_destroy(a.as_mut_ptr());
            array_destroy(b.as_mut_ptr());
        }
    }

    #[test]
    fn test_string_keys_compare_by_content() {
        unsafe {
            let first = new_string("key");
            let second = new_string("key");
            let a = make_variant(VariantType::String as u32, &first as *const usize as ConstTypePtr);
            let b = make_variant(VariantType::String as u32, &second as *const usize as ConstTypePtr);
            assert!(variant_eq(&a, &b));
            destroy_variant(a);
            destroy_variant(b);
            free_string(first);
            free_string(second);
        }
    }

    #[test]
    fn test_packed_string_elements_are_owned() {
        unsafe {
            let mut packed = Opaque16::default();
            packed_new::<T_PACKED_STRING>(packed.as_mut_ptr(), std::ptr::null());
            let text = new_string("frame");
            let push_args = [&text as *const usize as ConstTypePtr];
            packed_push_back(packed.as_mut_ptr(), push_args.as_ptr(), std::ptr::null_mut(), 1);
            free_string(text);

            let element = packed_array_operator_index_const(T_PACKED_STRING, packed.as_ptr(), 0);
            assert_eq!(read_string(element), "frame");
            assert!(packed_array_operator_index_const(T_PACKED_STRING, packed.as_ptr(), 1).is_null());
            packed_destroy(packed.as_mut_ptr());
        }
    }
}
