//! 模拟引擎的对象模型
//!
//! 对象只是登记在全局表里的一条记录，地址由计数器分配，绑定层从不解引用。
//! 方法绑定按随库清单查找并校验哈希，ptrcall 按 (声明类, 方法) 分派。
//! 回调宿主（扩展类蹦床、Callable）之前一律先释放状态锁。

use super::values::{self, Args, T_OBJECT, T_STRING_NAME};
use crate::abi::sys::*;
use crate::core::EngineErrorCode;
use crate::manifest::Manifest;
use glam::Vec2;
use std::alloc::Layout;
use std::collections::HashMap;
use std::ffi::{c_char, c_int, c_void, CStr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

const FIRST_ADDRESS: usize = 0x1000_0000;
const ADDRESS_STRIDE: usize = 0x40;
const ALLOC_HEADER: usize = 16;
const TOGGLE: &str = "_toggle";

fn ok() -> i64 {
    EngineErrorCode::Ok.to_i64()
}

fn invalid_parameter() -> i64 {
    EngineErrorCode::InvalidParameter.to_i64()
}

fn already_exists() -> i64 {
    EngineErrorCode::AlreadyExists.to_i64()
}

// ============================================================================
// 状态
// ============================================================================

/// 信号连接持有 Callable 的一份引擎副本
struct Connection {
    signal: String,
    callable: Opaque16,
}

impl Drop for Connection {
    fn drop(&mut self) {
        unsafe { values::destroy_callable(self.callable) };
    }
}

struct Profiler {
    name: String,
    object: usize,
    active: bool,
}

#[derive(Default)]
struct ObjectRecord {
    class: String,
    extension: Option<String>,
    refcount: i64,
    instance_id: u64,
    instance: usize,
    resource_name: String,
    node_name: usize,
    position: Vec2,
    length: f64,
    animations: Vec<(String, usize)>,
    profilers: Vec<Profiler>,
    connections: Vec<Connection>,
}

struct ExtensionClass {
    parent: String,
    userdata: usize,
    create: Option<CreateInstanceFn>,
    free: Option<FreeInstanceFn>,
    get_virtual: Option<GetVirtualCallDataFn>,
    call_virtual: Option<CallVirtualWithDataFn>,
}

#[derive(Default)]
struct MockState {
    objects: HashMap<usize, ObjectRecord>,
    by_id: HashMap<u64, usize>,
    next_address: usize,
    next_id: u64,
    classes: HashMap<String, ExtensionClass>,
    singletons: HashMap<String, usize>,
    singleton_lookups: usize,
    destroy_count: usize,
    errors: Vec<String>,
    warnings: Vec<String>,
}

fn state() -> MutexGuard<'static, MockState> {
    static STATE: OnceLock<Mutex<MockState>> = OnceLock::new();
    STATE
        .get_or_init(|| Mutex::new(MockState::default()))
        .lock()
        .unwrap_or_else(|e| e.into_inner())
}

fn manifest() -> Option<Arc<Manifest>> {
    Manifest::embedded().ok()
}

impl MockState {
    fn create(&mut self, class: &str) -> usize {
        self.next_address = self.next_address.max(FIRST_ADDRESS) + ADDRESS_STRIDE;
        self.next_id += 1;
        let address = self.next_address;
        self.objects.insert(
            address,
            ObjectRecord {
                class: class.to_string(),
                instance_id: self.next_id,
                ..Default::default()
            },
        );
        self.by_id.insert(self.next_id, address);
        address
    }

    fn parent_of(&self, class: &str) -> Option<String> {
        if let Some(extension) = self.classes.get(class) {
            return Some(extension.parent.clone());
        }
        manifest()?.class(class)?.inherits.clone()
    }

    fn inherits(&self, class: &str, ancestor: &str) -> bool {
        let mut current = Some(class.to_string());
        let mut depth = 0;
        while let Some(name) = current {
            if name == ancestor {
                return true;
            }
            depth += 1;
            if depth > 64 {
                break;
            }
            current = self.parent_of(&name);
        }
        false
    }

    fn class_exists(&self, class: &str) -> bool {
        self.classes.contains_key(class) || manifest().is_some_and(|m| m.class(class).is_some())
    }

    fn unreference(&mut self, object: usize) -> bool {
        match self.objects.get_mut(&object) {
            Some(record) => {
                record.refcount -= 1;
                record.refcount <= 0
            }
            None => false,
        }
    }
}

pub(crate) fn reset() {
    let previous = std::mem::take(&mut *state());
    drop(previous);
}

pub(crate) fn record_error(message: impl Into<String>) {
    let message = message.into();
    tracing::debug!(target: "mock", "{}", message);
    state().errors.push(message);
}

// ============================================================================
// 计数器
// ============================================================================

pub(crate) fn singleton_lookups() -> usize {
    state().singleton_lookups
}

pub(crate) fn destroy_count() -> usize {
    state().destroy_count
}

pub(crate) fn reference_count(object: usize) -> Option<i64> {
    state().objects.get(&object).map(|record| record.refcount)
}

pub(crate) fn is_alive(object: usize) -> bool {
    state().objects.contains_key(&object)
}

pub(crate) fn object_count() -> usize {
    state().objects.len()
}

pub(crate) fn connection_count(object: usize, signal: &str) -> usize {
    state()
        .objects
        .get(&object)
        .map_or(0, |record| record.connections.iter().filter(|c| c.signal == signal).count())
}

pub(crate) fn errors() -> Vec<String> {
    state().errors.clone()
}

pub(crate) fn warnings() -> Vec<String> {
    state().warnings.clone()
}

static LIVE_ALLOCATIONS: AtomicUsize = AtomicUsize::new(0);

pub(crate) fn live_allocations() -> usize {
    LIVE_ALLOCATIONS.load(Ordering::Relaxed)
}

// ============================================================================
// 生命周期
// ============================================================================

fn construct(class: &str) -> usize {
    let extension = state().classes.get(class).map(|c| (c.create, c.userdata));
    match extension {
        Some((Some(create), userdata)) => unsafe { create(userdata as *mut c_void) as usize },
        Some((None, _)) => {
            record_error(format!("Class '{}' is abstract", class));
            0
        }
        None => {
            let instantiable = manifest()
                .and_then(|m| m.class(class).map(|decl| decl.is_instantiable))
                .unwrap_or(false);
            if instantiable {
                state().create(class)
            } else {
                record_error(format!("Class '{}' cannot be instantiated", class));
                0
            }
        }
    }
}

fn destroy(object: usize) {
    let (record, free) = {
        let mut s = state();
        let Some(record) = s.objects.remove(&object) else {
            s.errors.push(format!("Destroy of unknown object {:#x}", object));
            return;
        };
        s.by_id.remove(&record.instance_id);
        s.destroy_count += 1;
        let free = record
            .extension
            .as_deref()
            .and_then(|class| s.classes.get(class))
            .and_then(|class| class.free.map(|f| (f, class.userdata)));
        (record, free)
    };
    if let (Some((free, userdata)), true) = (free, record.instance != 0) {
        unsafe { free(userdata as *mut c_void, record.instance as InstancePtr) };
    }
    let held: Vec<usize> = record
        .animations
        .iter()
        .map(|(_, animation)| *animation)
        .chain(record.profilers.iter().map(|p| p.object))
        .collect();
    drop(record);
    for object in held {
        release(object);
    }
}

/// 归还一个引用，计数归零时销毁
fn release(object: usize) {
    let last = state().unreference(object);
    if last {
        destroy(object);
    }
}

fn add_reference(s: &mut MockState, object: usize) {
    if let Some(record) = s.objects.get_mut(&object) {
        record.refcount += 1;
    }
}

pub(super) unsafe extern "C" fn object_destroy(object: ObjectPtr) {
    destroy(object as usize);
}

pub(super) unsafe extern "C" fn refcounted_reference(object: ObjectPtr) -> EngineBool {
    match state().objects.get_mut(&(object as usize)) {
        Some(record) => {
            record.refcount += 1;
            TRUE
        }
        None => FALSE,
    }
}

pub(super) unsafe extern "C" fn refcounted_unreference(object: ObjectPtr) -> EngineBool {
    to_engine_bool(state().unreference(object as usize))
}

pub(super) unsafe extern "C" fn object_get_class_name(object: ConstObjectPtr, r_class_name: StringNamePtr) -> EngineBool {
    let class = state().objects.get(&(object as usize)).map(|record| record.class.clone());
    match class {
        Some(class) => {
            values::write_word(r_class_name, values::intern(&class));
            TRUE
        }
        None => FALSE,
    }
}

pub(super) unsafe extern "C" fn object_get_instance_id(object: ConstObjectPtr) -> u64 {
    state().objects.get(&(object as usize)).map_or(0, |record| record.instance_id)
}

pub(super) unsafe extern "C" fn object_get_instance_from_id(instance_id: u64) -> ObjectPtr {
    state().by_id.get(&instance_id).map_or(std::ptr::null_mut(), |&address| address as ObjectPtr)
}

pub(super) unsafe extern "C" fn object_set_instance(object: ObjectPtr, class_name: ConstStringNamePtr, instance: InstancePtr) {
    let class = values::read_name(class_name);
    let mut s = state();
    match s.objects.get_mut(&(object as usize)) {
        Some(record) => {
            record.class = class.clone();
            record.extension = Some(class);
            record.instance = instance as usize;
        }
        None => s.errors.push(format!("set_instance on unknown object {:#x}", object as usize)),
    }
}

pub(super) unsafe extern "C" fn object_get_singleton(name: ConstStringNamePtr) -> ObjectPtr {
    let name = values::read_name(name);
    let ty = manifest().and_then(|m| m.singletons.iter().find(|s| s.name == name).map(|s| s.ty.clone()));
    let mut s = state();
    s.singleton_lookups += 1;
    if let Some(&address) = s.singletons.get(&name) {
        return address as ObjectPtr;
    }
    let Some(ty) = ty else {
        return std::ptr::null_mut();
    };
    let address = s.create(&ty);
    s.singletons.insert(name, address);
    address as ObjectPtr
}

// ============================================================================
// ClassDB
// ============================================================================

pub(super) unsafe extern "C" fn classdb_construct_object(class_name: ConstStringNamePtr) -> ObjectPtr {
    construct(&values::read_name(class_name)) as ObjectPtr
}

pub(super) unsafe extern "C" fn classdb_get_parent_class(class_name: ConstStringNamePtr, r_parent: StringNamePtr) -> EngineBool {
    let parent = state().parent_of(&values::read_name(class_name));
    match parent {
        Some(parent) if !parent.is_empty() => {
            values::write_word(r_parent, values::intern(&parent));
            TRUE
        }
        _ => FALSE,
    }
}

pub(super) unsafe extern "C" fn classdb_register_extension_class(
    _library: ClassLibraryPtr,
    class_name: ConstStringNamePtr,
    parent_class_name: ConstStringNamePtr,
    info: *const ClassCreationInfo,
) {
    let name = values::read_name(class_name);
    let parent = values::read_name(parent_class_name);
    let Some(info) = info.as_ref() else {
        record_error(format!("Registering '{}' without creation info", name));
        return;
    };
    let mut s = state();
    if s.class_exists(&name) {
        s.errors.push(format!("Class '{}' is already registered", name));
        return;
    }
    if !s.class_exists(&parent) {
        s.errors.push(format!("Parent class '{}' of '{}' does not exist", parent, name));
        return;
    }
    s.classes.insert(
        name,
        ExtensionClass {
            parent,
            userdata: info.class_userdata as usize,
            create: info.create_instance_func,
            free: info.free_instance_func,
            get_virtual: info.get_virtual_call_data_func,
            call_virtual: info.call_virtual_with_data_func,
        },
    );
}

pub(super) unsafe extern "C" fn classdb_unregister_extension_class(_library: ClassLibraryPtr, class_name: ConstStringNamePtr) {
    let name = values::read_name(class_name);
    let mut s = state();
    if s.classes.remove(&name).is_none() {
        s.errors.push(format!("Unregistering unknown class '{}'", name));
    }
}

/// 方法绑定：声明该方法的类、方法名与清单声明的参数个数
struct BindRecord {
    class: String,
    method: String,
    arity: usize,
}

fn bind_for(class: &str, method: &str, arity: usize) -> MethodBindPtr {
    static BINDS: OnceLock<Mutex<HashMap<(String, String), usize>>> = OnceLock::new();
    let mut binds = BINDS
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(|e| e.into_inner());
    let key = (class.to_string(), method.to_string());
    if let Some(&bind) = binds.get(&key) {
        return bind as MethodBindPtr;
    }
    let record: &'static BindRecord = Box::leak(Box::new(BindRecord {
        class: class.to_string(),
        method: method.to_string(),
        arity,
    }));
    let bind = record as *const BindRecord as usize;
    binds.insert(key, bind);
    bind as MethodBindPtr
}

pub(super) unsafe extern "C" fn classdb_get_method_bind(
    class_name: ConstStringNamePtr,
    method_name: ConstStringNamePtr,
    hash: i64,
) -> MethodBindPtr {
    let class = values::read_name(class_name);
    let method = values::read_name(method_name);
    let Some(manifest) = manifest() else {
        return std::ptr::null();
    };
    match manifest.find_method(&class, &method) {
        Some((owner, decl)) if decl.hash == hash => bind_for(&owner.name, &method, decl.arguments.len()),
        Some((_, decl)) => {
            record_error(format!(
                "Hash mismatch for {}::{}: got {}, expected {}",
                class, method, hash, decl.hash
            ));
            std::ptr::null()
        }
        None => {
            record_error(format!("Method {}::{} not found", class, method));
            std::ptr::null()
        }
    }
}

// ============================================================================
// 方法调用
// ============================================================================

pub(super) unsafe extern "C" fn object_method_bind_ptrcall(
    method_bind: MethodBindPtr,
    object: ObjectPtr,
    args: *const ConstTypePtr,
    ret: TypePtr,
) {
    let Some(bind) = (method_bind as *const BindRecord).as_ref() else {
        record_error("ptrcall with null method bind");
        return;
    };
    let object = object as usize;
    let alive = state().objects.contains_key(&object);
    if !alive {
        record_error(format!("{}::{} called on dead object {:#x}", bind.class, bind.method, object));
        return;
    }
    // ptrcall 不带参数个数，按清单声明的个数读取
    call_method(&bind.class, &bind.method, object, Args::new(args, bind.arity), ret);
}

unsafe fn call_method(class: &str, method: &str, object: usize, args: Args, ret: TypePtr) {
    match (class, method) {
        ("Object", "get_class") => {
            let class = state().objects.get(&object).map(|r| r.class.clone()).unwrap_or_default();
            values::write_word(ret, values::new_string(&class));
        }
        ("Object", "get_instance_id") => {
            let id = state().objects.get(&object).map_or(0, |r| r.instance_id);
            values::write_i64(ret, id as i64);
        }
        ("Object", "connect") => {
            let code = connect(object, &values::read_name(args.get(0)), args.get(1));
            values::write_i64(ret, code);
        }
        ("Object", "disconnect") => {
            disconnect(object, &values::read_name(args.get(0)), args.get(1));
        }
        ("Object", "is_connected") => {
            let connected = is_connected(object, &values::read_name(args.get(0)), args.get(1));
            values::write_bool(ret, connected);
        }
        ("RefCounted", "get_reference_count") => {
            let count = state().objects.get(&object).map_or(0, |r| r.refcount);
            values::write_i64(ret, count);
        }
        ("Resource", "set_name") => {
            let name = values::read_string(args.get(0));
            if let Some(record) = state().objects.get_mut(&object) {
                record.resource_name = name;
            }
        }
        ("Resource", "get_name") => {
            let name = state().objects.get(&object).map(|r| r.resource_name.clone()).unwrap_or_default();
            values::write_word(ret, values::new_string(&name));
        }
        ("Node", "set_name") => {
            let name = values::read_word(args.get(0));
            if let Some(record) = state().objects.get_mut(&object) {
                record.node_name = name;
            }
        }
        ("Node", "get_name") => {
            let name = state().objects.get(&object).map_or(0, |r| r.node_name);
            values::write_word(ret, name);
        }
        ("Node2D", "set_position") => {
            let source = args.get(0);
            if source.is_null() {
                record_error("Node2D::set_position without a position");
                return;
            }
            let position = std::ptr::read_unaligned(source as *const Vec2);
            if let Some(record) = state().objects.get_mut(&object) {
                record.position = position;
            }
        }
        ("Node2D", "get_position") => {
            let position = state().objects.get(&object).map_or(Vec2::ZERO, |r| r.position);
            if !ret.is_null() {
                std::ptr::write_unaligned(ret as *mut Vec2, position);
            }
        }
        ("Animation", "set_length") => {
            let length = values::read_f64(args.get(0));
            if let Some(record) = state().objects.get_mut(&object) {
                record.length = length;
            }
        }
        ("Animation", "get_length") => {
            let length = state().objects.get(&object).map_or(0.0, |r| r.length);
            values::write_f64(ret, length);
        }
        ("AnimationLibrary", _) => animation_library(method, object, args, ret),
        ("ClassDB", _) => class_db(method, args, ret),
        ("EngineDebugger", _) => engine_debugger(method, object, args, ret),
        _ => record_error(format!("{}::{} is not implemented by the mock engine", class, method)),
    }
}

unsafe fn animation_library(method: &str, library: usize, args: Args, ret: TypePtr) {
    let name = || values::read_name(args.get(0));
    match method {
        "add_animation" => {
            let name = name();
            let animation = values::read_word(args.get(1));
            let code = {
                let mut s = state();
                if !s.objects.contains_key(&animation) {
                    invalid_parameter()
                } else {
                    match s.objects.get_mut(&library) {
                        Some(record) if record.animations.iter().any(|(n, _)| *n == name) => already_exists(),
                        Some(record) => {
                            record.animations.push((name.clone(), animation));
                            add_reference(&mut s, animation);
                            ok()
                        }
                        None => invalid_parameter(),
                    }
                }
            };
            values::write_i64(ret, code);
            if code == ok() {
                emit_name(library, "animation_added", &name);
            }
        }
        "remove_animation" => {
            let name = name();
            let removed = state().objects.get_mut(&library).and_then(|record| {
                let position = record.animations.iter().position(|(n, _)| *n == name)?;
                Some(record.animations.remove(position).1)
            });
            if let Some(animation) = removed {
                release(animation);
                emit_name(library, "animation_removed", &name);
            }
        }
        "has_animation" => {
            let name = name();
            let found = state()
                .objects
                .get(&library)
                .is_some_and(|record| record.animations.iter().any(|(n, _)| *n == name));
            values::write_bool(ret, found);
        }
        "get_animation" => {
            let name = name();
            let animation = state()
                .objects
                .get(&library)
                .and_then(|record| record.animations.iter().find(|(n, _)| *n == name).map(|(_, a)| *a))
                .unwrap_or(0);
            values::write_word(ret, animation);
        }
        "get_animation_list" => {
            let names: Vec<String> = state()
                .objects
                .get(&library)
                .map(|record| record.animations.iter().map(|(n, _)| n.clone()).collect())
                .unwrap_or_default();
            let items = names
                .iter()
                .map(|n| values::adopt_variant(T_STRING_NAME, &[values::intern(n) as u64]))
                .collect();
            values::write_word(ret, values::new_array(items, T_STRING_NAME));
        }
        _ => record_error(format!("AnimationLibrary::{} is not implemented by the mock engine", method)),
    }
}

unsafe fn class_db(method: &str, args: Args, ret: TypePtr) {
    let class = values::read_name(args.get(0));
    match method {
        "instantiate" => {
            let object = construct(&class);
            let raw = if object == 0 {
                RawVariant::default()
            } else {
                values::adopt_variant(T_OBJECT, &[object as u64])
            };
            values::write_variant(ret, raw);
        }
        "class_exists" => {
            let exists = state().class_exists(&class);
            values::write_bool(ret, exists);
        }
        "get_parent_class" => {
            let parent = state().parent_of(&class).unwrap_or_default();
            values::write_word(ret, values::intern(&parent));
        }
        "is_parent_class" => {
            let ancestor = values::read_name(args.get(1));
            let inherits = state().inherits(&class, &ancestor);
            values::write_bool(ret, inherits);
        }
        _ => record_error(format!("ClassDB::{} is not implemented by the mock engine", method)),
    }
}

unsafe fn engine_debugger(method: &str, debugger: usize, args: Args, ret: TypePtr) {
    let name = values::read_name(args.get(0));
    match method {
        "register_profiler" => {
            let profiler = values::read_word(args.get(1));
            let replaced = {
                let mut s = state();
                let replaced = match s.objects.get_mut(&debugger) {
                    Some(record) => {
                        let old = record
                            .profilers
                            .iter()
                            .position(|p| p.name == name)
                            .map(|i| record.profilers.remove(i).object);
                        record.profilers.push(Profiler {
                            name: name.clone(),
                            object: profiler,
                            active: false,
                        });
                        old
                    }
                    None => None,
                };
                add_reference(&mut s, profiler);
                replaced
            };
            if let Some(old) = replaced {
                release(old);
            }
        }
        "unregister_profiler" => {
            let removed = state().objects.get_mut(&debugger).and_then(|record| {
                let position = record.profilers.iter().position(|p| p.name == name)?;
                Some(record.profilers.remove(position).object)
            });
            if let Some(profiler) = removed {
                release(profiler);
            }
        }
        "profiler_enable" => {
            let enable = values::read_bool(args.get(1));
            let target = {
                let mut s = state();
                let profiler = s.objects.get_mut(&debugger).and_then(|record| {
                    let entry = record.profilers.iter_mut().find(|p| p.name == name)?;
                    entry.active = enable;
                    Some(entry.object)
                });
                profiler.and_then(|profiler| {
                    let record = s.objects.get(&profiler)?;
                    let class = s.classes.get(record.extension.as_deref()?)?;
                    Some((record.instance, class.userdata, class.get_virtual?, class.call_virtual?))
                })
            };
            if let Some((instance, userdata, get_virtual, call_virtual)) = target {
                let toggle = values::intern(TOGGLE);
                let method_name = &toggle as *const usize as ConstStringNamePtr;
                let data = get_virtual(userdata as *mut c_void, method_name);
                if !data.is_null() {
                    let call_args = [args.get(1), args.get(2)];
                    call_virtual(
                        instance as InstancePtr,
                        method_name,
                        data,
                        call_args.as_ptr(),
                        std::ptr::null_mut(),
                    );
                }
            }
        }
        "has_profiler" | "is_profiling" => {
            let found = state().objects.get(&debugger).and_then(|record| {
                record.profilers.iter().find(|p| p.name == name).map(|p| p.active)
            });
            let answer = match method {
                "has_profiler" => found.is_some(),
                _ => found.unwrap_or(false),
            };
            values::write_bool(ret, answer);
        }
        _ => record_error(format!("EngineDebugger::{} is not implemented by the mock engine", method)),
    }
}

// ============================================================================
// 信号
// ============================================================================

unsafe fn connect(object: usize, signal: &str, callable: ConstTypePtr) -> i64 {
    if !values::callable_is_set(callable) {
        return invalid_parameter();
    }
    let mut s = state();
    let Some(record) = s.objects.get_mut(&object) else {
        return invalid_parameter();
    };
    let duplicate = record
        .connections
        .iter()
        .any(|c| c.signal == signal && values::callables_equal(c.callable.as_ptr(), callable));
    if duplicate {
        return invalid_parameter();
    }
    record.connections.push(Connection {
        signal: signal.to_string(),
        callable: values::copy_callable(callable),
    });
    ok()
}

unsafe fn disconnect(object: usize, signal: &str, callable: ConstTypePtr) -> bool {
    let removed: Vec<Connection> = {
        let mut s = state();
        match s.objects.get_mut(&object) {
            Some(record) => {
                let (removed, kept): (Vec<Connection>, Vec<Connection>) = std::mem::take(&mut record.connections)
                    .into_iter()
                    .partition(|c| c.signal == signal && values::callables_equal(c.callable.as_ptr(), callable));
                record.connections = kept;
                removed
            }
            None => Vec::new(),
        }
    };
    !removed.is_empty()
}

unsafe fn is_connected(object: usize, signal: &str, callable: ConstTypePtr) -> bool {
    state().objects.get(&object).is_some_and(|record| {
        record
            .connections
            .iter()
            .any(|c| c.signal == signal && values::callables_equal(c.callable.as_ptr(), callable))
    })
}

/// 依次调用信号上的连接；调用期间不持有状态锁
unsafe fn emit(object: usize, signal: &str, args: &[ConstVariantPtr]) {
    let callables: Vec<Opaque16> = state()
        .objects
        .get(&object)
        .map(|record| {
            record
                .connections
                .iter()
                .filter(|c| c.signal == signal)
                .map(|c| values::copy_callable(c.callable.as_ptr()))
                .collect()
        })
        .unwrap_or_default();
    for callable in callables {
        let result = values::invoke_callable(callable.as_ptr(), args);
        values::destroy_variant(result);
        values::destroy_callable(callable);
    }
}

unsafe fn emit_name(object: usize, signal: &str, name: &str) {
    let argument = values::adopt_variant(T_STRING_NAME, &[values::intern(name) as u64]);
    emit(object, signal, &[argument.as_ptr()]);
    values::destroy_variant(argument);
}

unsafe fn signal_parts(base: ConstTypePtr) -> (usize, String) {
    let raw = Opaque16::read_from(base);
    (raw.0[0] as usize, values::name_text(raw.0[1] as usize))
}

pub(super) unsafe extern "C" fn signal_connect(base: TypePtr, args: *const ConstTypePtr, ret: TypePtr, argc: c_int) {
    let (object, signal) = signal_parts(base);
    values::write_i64(ret, connect(object, &signal, Args::builtin(args, argc).get(0)));
}

pub(super) unsafe extern "C" fn signal_disconnect(base: TypePtr, args: *const ConstTypePtr, _ret: TypePtr, argc: c_int) {
    let (object, signal) = signal_parts(base);
    disconnect(object, &signal, Args::builtin(args, argc).get(0));
}

pub(super) unsafe extern "C" fn signal_is_connected(base: TypePtr, args: *const ConstTypePtr, ret: TypePtr, argc: c_int) {
    let (object, signal) = signal_parts(base);
    values::write_bool(ret, is_connected(object, &signal, Args::builtin(args, argc).get(0)));
}

pub(super) unsafe extern "C" fn signal_emit(base: TypePtr, args: *const ConstTypePtr, _ret: TypePtr, argc: c_int) {
    let (object, signal) = signal_parts(base);
    let args = Args::builtin(args, argc);
    let arguments: Vec<ConstVariantPtr> = (0..args.len()).map(|i| args.get(i)).collect();
    emit(object, &signal, &arguments);
}

pub(super) unsafe extern "C" fn signal_get_object(base: TypePtr, _args: *const ConstTypePtr, ret: TypePtr, _argc: c_int) {
    values::write_word(ret, signal_parts(base).0);
}

pub(super) unsafe extern "C" fn signal_get_name(base: TypePtr, _args: *const ConstTypePtr, ret: TypePtr, _argc: c_int) {
    values::write_word(ret, Opaque16::read_from(base).0[1] as usize);
}

// ============================================================================
// 内存与诊断
// ============================================================================

pub(super) unsafe extern "C" fn mem_alloc(size: usize) -> *mut c_void {
    let Ok(layout) = Layout::from_size_align(size + ALLOC_HEADER, ALLOC_HEADER) else {
        return std::ptr::null_mut();
    };
    let base = std::alloc::alloc(layout);
    if base.is_null() {
        return std::ptr::null_mut();
    }
    std::ptr::write(base as *mut usize, size);
    LIVE_ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
    base.add(ALLOC_HEADER) as *mut c_void
}

pub(super) unsafe extern "C" fn mem_free(ptr: *mut c_void) {
    if ptr.is_null() {
        return;
    }
    let base = (ptr as *mut u8).sub(ALLOC_HEADER);
    let size = std::ptr::read(base as *const usize);
    std::alloc::dealloc(base, Layout::from_size_align_unchecked(size + ALLOC_HEADER, ALLOC_HEADER));
    LIVE_ALLOCATIONS.fetch_sub(1, Ordering::Relaxed);
}

unsafe fn c_text(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    CStr::from_ptr(ptr).to_string_lossy().into_owned()
}

pub(super) unsafe extern "C" fn print_error(
    description: *const c_char,
    function: *const c_char,
    file: *const c_char,
    line: i32,
) {
    let message = format!("{} ({}:{} in {})", c_text(description), c_text(file), line, c_text(function));
    tracing::debug!(target: "mock", "Engine error: {}", message);
    state().errors.push(message);
}

pub(super) unsafe extern "C" fn print_warning(
    description: *const c_char,
    function: *const c_char,
    file: *const c_char,
    line: i32,
) {
    let message = format!("{} ({}:{} in {})", c_text(description), c_text(file), line, c_text(function));
    state().warnings.push(message);
}
