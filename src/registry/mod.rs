//! 类注册表
//!
//! 进程级的类名到 [`ClassEntry`] 映射。引擎原生类在 Scene 初始化时从清单发现，
//! 宿主扩展类通过 [`ClassBuilder`] 注册。引擎进入主循环后注册表冻结，
//! 之后的注册返回 `RegistryFrozen`。

pub mod builder;
pub mod cast;
pub mod dispatch;
pub mod entry;

pub use builder::ClassBuilder;
pub use cast::{upcast, EngineClass, Inherits};
pub use dispatch::with_instance;
pub use entry::{AsAny, ClassEntry, ClassOrigin, Factory, HostInstance, VirtualHandler, VirtualMethod};

use crate::abi::{self, sys::*};
use crate::core::{BindingError, BindingResult};
use crate::handle::EngineHandle;
use crate::manifest::{Manifest, TypeMap};
use crate::values::builtin::StringNameKind;
use crate::values::{EngineBuiltin, EngineValue, StringName};
use std::collections::{HashMap, HashSet};
use std::ffi::c_void;
use std::sync::{Arc, Mutex, OnceLock, RwLock};

#[derive(Default)]
struct ClassRegistry {
    classes: HashMap<String, Arc<ClassEntry>>,
    /// 交给引擎的宿主类用户数据（`Arc::into_raw`）
    userdata: HashMap<String, usize>,
    manifest: Option<Arc<Manifest>>,
    type_map: Option<Arc<TypeMap>>,
    /// 正在向引擎注册的类名
    pending: HashSet<String>,
    frozen: bool,
}

fn registry() -> &'static RwLock<ClassRegistry> {
    static REGISTRY: OnceLock<RwLock<ClassRegistry>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(ClassRegistry::default()))
}

type BindKey = (String, String, i64);

fn method_binds() -> &'static Mutex<HashMap<BindKey, usize>> {
    static BINDS: OnceLock<Mutex<HashMap<BindKey, usize>>> = OnceLock::new();
    BINDS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// 从清单发现引擎原生类，返回新增的类数
pub fn discover(manifest: Arc<Manifest>) -> BindingResult<usize> {
    let mut reg = registry().write().unwrap_or_else(|e| e.into_inner());
    let mut added = 0;
    for decl in &manifest.classes {
        if reg.classes.contains_key(&decl.name) {
            continue;
        }
        reg.classes
            .insert(decl.name.clone(), Arc::new(ClassEntry::engine(decl.clone())));
        added += 1;
    }
    reg.type_map = Some(Arc::new(TypeMap::from_manifest(&manifest)));
    reg.manifest = Some(manifest);
    tracing::info!(target: "registry", classes = added, "Engine classes discovered");
    Ok(added)
}

/// 当前清单
pub fn manifest() -> BindingResult<Arc<Manifest>> {
    registry()
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .manifest
        .clone()
        .ok_or(BindingError::NotReady("class manifest"))
}

/// 当前类型映射表（未发现时为标准表）
pub fn type_map() -> Arc<TypeMap> {
    registry()
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .type_map
        .clone()
        .unwrap_or_else(|| Arc::new(TypeMap::standard()))
}

/// 注册一个宿主扩展类并告知引擎
///
/// 引擎调用期间不持有注册表锁；类名先记入 `pending`，并发的同名注册返回 `DuplicateClass`。
pub(crate) fn register_entry(entry: ClassEntry) -> BindingResult<()> {
    let parent = {
        let mut reg = registry().write().unwrap_or_else(|e| e.into_inner());
        if reg.frozen {
            return Err(BindingError::RegistryFrozen(entry.name));
        }
        if reg.classes.contains_key(&entry.name) || reg.pending.contains(&entry.name) {
            return Err(BindingError::DuplicateClass(entry.name));
        }
        let parent = entry
            .parent
            .clone()
            .ok_or_else(|| BindingError::ClassNotFound(format!("{} has no parent", entry.name)))?;
        if !reg.classes.contains_key(&parent) {
            return Err(BindingError::ClassNotFound(parent));
        }
        reg.pending.insert(entry.name.clone());
        parent
    };

    let name = entry.name.clone();
    let entry = Arc::new(entry);
    let userdata = Arc::into_raw(entry.clone()) as *mut c_void;
    let registered = abi::get().and_then(|abi| {
        let info = dispatch::creation_info(&entry, userdata);
        abi.with_name(&name, |class_name| {
            abi.with_name(&parent, |parent_name| unsafe {
                (abi.classdb_register_extension_class)(abi.library(), class_name, parent_name, &info)
            })
        })
        .and_then(|inner| inner)
    });

    let mut reg = registry().write().unwrap_or_else(|e| e.into_inner());
    reg.pending.remove(&name);
    if let Err(e) = registered {
        drop(unsafe { Arc::from_raw(userdata as *const ClassEntry) });
        return Err(e);
    }
    tracing::info!(
        target: "registry",
        class = %name,
        parent = %parent,
        virtuals = entry.vtable.len(),
        "Host class registered"
    );
    reg.userdata.insert(name.clone(), userdata as usize);
    reg.classes.insert(name, entry);
    Ok(())
}

/// 注销一个宿主扩展类
///
/// 条目先从注册表取出再通知引擎；引擎拒绝时放回。
pub fn unregister(name: &str) -> BindingResult<()> {
    let (entry, userdata) = {
        let mut reg = registry().write().unwrap_or_else(|e| e.into_inner());
        let entry = reg
            .classes
            .get(name)
            .cloned()
            .ok_or_else(|| BindingError::ClassNotFound(name.to_string()))?;
        if !entry.is_host() {
            return Err(BindingError::type_mismatch("host class", format!("engine class {}", name)));
        }
        reg.classes.remove(name);
        (entry, reg.userdata.remove(name))
    };

    let unregistered = abi::get().and_then(|abi| {
        abi.with_name(name, |class_name| unsafe {
            (abi.classdb_unregister_extension_class)(abi.library(), class_name)
        })
    });
    if let Err(e) = unregistered {
        let mut reg = registry().write().unwrap_or_else(|e| e.into_inner());
        reg.classes.insert(name.to_string(), entry);
        if let Some(userdata) = userdata {
            reg.userdata.insert(name.to_string(), userdata);
        }
        return Err(e);
    }
    if let Some(userdata) = userdata {
        drop(unsafe { Arc::from_raw(userdata as *const ClassEntry) });
    }
    tracing::info!(target: "registry", class = %name, "Host class unregistered");
    Ok(())
}

/// 注销全部宿主扩展类（子类先于父类）
pub fn unregister_all_host() -> BindingResult<usize> {
    let mut names: Vec<(usize, String)> = {
        let reg = registry().read().unwrap_or_else(|e| e.into_inner());
        reg.userdata
            .keys()
            .map(|name| (depth_of(&reg, name), name.clone()))
            .collect()
    };
    names.sort_by(|a, b| b.0.cmp(&a.0));
    let count = names.len();
    for (_, name) in names {
        unregister(&name)?;
    }
    Ok(count)
}

fn depth_of(reg: &ClassRegistry, name: &str) -> usize {
    let mut depth = 0;
    let mut current = reg.classes.get(name).and_then(|e| e.parent.clone());
    while let Some(parent) = current {
        depth += 1;
        current = reg.classes.get(&parent).and_then(|e| e.parent.clone());
    }
    depth
}

/// 冻结注册表（引擎进入主循环）
pub fn freeze() {
    let mut reg = registry().write().unwrap_or_else(|e| e.into_inner());
    if !reg.frozen {
        reg.frozen = true;
        tracing::info!(target: "registry", classes = reg.classes.len(), "Class registry frozen");
    }
}

pub fn is_frozen() -> bool {
    registry().read().unwrap_or_else(|e| e.into_inner()).frozen
}

pub fn get(name: &str) -> Option<Arc<ClassEntry>> {
    registry()
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .classes
        .get(name)
        .cloned()
}

pub fn contains(name: &str) -> bool {
    get(name).is_some()
}

pub fn class_count() -> usize {
    registry().read().unwrap_or_else(|e| e.into_inner()).classes.len()
}

/// 最近的引擎原生祖先（含自身）
pub(crate) fn native_base_of(name: &str) -> BindingResult<String> {
    let mut current = name.to_string();
    loop {
        let entry = get(&current).ok_or_else(|| BindingError::ClassNotFound(current.clone()))?;
        if !entry.is_host() {
            return Ok(current);
        }
        current = entry
            .parent
            .clone()
            .ok_or_else(|| BindingError::ClassNotFound(format!("{} has no native base", name)))?;
    }
}

/// 向引擎查询父类
fn engine_parent(class: &str) -> BindingResult<Option<String>> {
    let abi = abi::get()?;
    let mut raw = Opaque8::default();
    let found = abi.with_name(class, |name| unsafe {
        (abi.classdb_get_parent_class)(name, raw.as_mut_ptr())
    })?;
    if found == FALSE {
        return Ok(None);
    }
    let parent = StringName::from_engine(unsafe { EngineBuiltin::<StringNameKind>::from_raw_owned(raw) });
    let parent = parent.to_utf8()?;
    Ok((!parent.is_empty()).then_some(parent))
}

/// `class` 是否等于或派生自 `ancestor`
///
/// 先沿注册表的父类链查找，链断开时向引擎查询。
pub fn inherits(class: &str, ancestor: &str) -> BindingResult<bool> {
    let mut current = Some(class.to_string());
    let mut steps = 0;
    while let Some(name) = current {
        if name == ancestor {
            return Ok(true);
        }
        steps += 1;
        if steps > 64 {
            return Err(BindingError::type_mismatch("acyclic class hierarchy", class));
        }
        current = match get(&name) {
            Some(entry) => entry.parent.clone(),
            None => engine_parent(&name)?,
        };
    }
    Ok(false)
}

/// 对象的实际类名
pub fn class_name_of(handle: EngineHandle) -> BindingResult<String> {
    let abi = abi::get()?;
    let mut raw = Opaque8::default();
    let found = unsafe { (abi.object_get_class_name)(handle.as_ptr(), raw.as_mut_ptr()) };
    if found == FALSE {
        return Err(BindingError::ClassNotFound(format!("{:?}", handle)));
    }
    StringName::from_engine(unsafe { EngineBuiltin::<StringNameKind>::from_raw_owned(raw) }).to_utf8()
}

/// 对象是否是引用计数类的实例
pub fn is_refcounted(handle: EngineHandle) -> BindingResult<bool> {
    let class = class_name_of(handle)?;
    inherits(&class, "RefCounted")
}

/// 解析并缓存方法绑定
pub fn method_bind(class: &str, method: &str, hash: i64) -> BindingResult<MethodBindPtr> {
    let key = (class.to_string(), method.to_string(), hash);
    if let Some(bind) = method_binds()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .get(&key)
    {
        return Ok(*bind as MethodBindPtr);
    }
    let abi = abi::get()?;
    let bind = abi.with_name(class, |class_name| {
        abi.with_name(method, |method_name| unsafe {
            (abi.classdb_get_method_bind)(class_name, method_name, hash)
        })
    })??;
    if bind.is_null() {
        return Err(BindingError::MethodNotFound {
            class: class.to_string(),
            method: method.to_string(),
            hash,
        });
    }
    tracing::trace!(target: "registry", class, method, hash, "Method bind resolved");
    method_binds()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .insert(key, bind as usize);
    Ok(bind)
}

/// 清空注册表与方法绑定缓存（测试在场景之间使用）
///
/// 未注销的宿主类用户数据在这里回收。
pub fn reset() {
    let mut reg = registry().write().unwrap_or_else(|e| e.into_inner());
    for (_, userdata) in reg.userdata.drain() {
        drop(unsafe { Arc::from_raw(userdata as *const ClassEntry) });
    }
    *reg = ClassRegistry::default();
    method_binds()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clear();
    dispatch::clear_instances();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ClassDecl;

    fn decl(name: &str, parent: Option<&str>) -> ClassDecl {
        ClassDecl {
            name: name.to_string(),
            inherits: parent.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_registry_chain_without_engine() {
        let _lock = crate::mock::test_lock();
        reset();
        let manifest = Manifest {
            classes: vec![
                decl("Object", None),
                decl("RefCounted", Some("Object")),
                decl("Resource", Some("RefCounted")),
            ],
            singletons: Vec::new(),
        };
        assert_eq!(discover(Arc::new(manifest)).unwrap(), 3);
        assert!(inherits("Resource", "Object").unwrap());
        assert!(inherits("Resource", "Resource").unwrap());
        assert!(!inherits("RefCounted", "Resource").unwrap());
        assert_eq!(native_base_of("Resource").unwrap(), "Resource");
        reset();
        assert_eq!(class_count(), 0);
    }

    #[test]
    fn test_failed_engine_registration_releases_name() {
        struct Plain;
        impl HostInstance for Plain {}

        let _lock = crate::mock::test_lock();
        reset();
        abi::reset();
        let manifest = Manifest {
            classes: vec![decl("Object", None)],
            singletons: Vec::new(),
        };
        discover(Arc::new(manifest)).unwrap();

        for _ in 0..2 {
            let err = ClassBuilder::<Plain>::new("Plain", "Object").register().unwrap_err();
            assert!(matches!(err, BindingError::NotReady(_)), "{:?}", err);
        }
        assert!(!contains("Plain"));
        assert!(registry().read().unwrap().pending.is_empty());
        reset();
    }
}
