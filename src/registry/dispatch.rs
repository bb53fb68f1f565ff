//! 分派桥
//!
//! 引擎调用宿主扩展类时进入的蹦床：创建/释放实例、按名字查找虚方法、
//! 带数据的虚调用，以及属性读写和通知。
//!
//! 所有蹦床都在 `catch_unwind` 里执行。错误和 panic 记录日志并转发到引擎的
//! 错误输出，随后向返回槽写入声明类型的零值，绝不跨越 ABI 边界展开。

use super::entry::{ClassEntry, HostInstance, VirtualMethod};
use crate::abi::{self, sys::*};
use crate::core::{BindingError, BindingResult};
use crate::frame::{read_arg, write_return, write_zero};
use crate::handle::EngineHandle;
use crate::values::builtin::StringNameKind;
use crate::values::{EngineBuiltin, EngineValue, EngineVariant, StringName, Variant};
use std::any::Any;
use std::collections::HashMap;
use std::ffi::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, OnceLock};

/// 引擎对象上挂载的宿主实例
pub(crate) struct InstanceBox {
    class: Arc<ClassEntry>,
    object: EngineHandle,
    instance: Mutex<Box<dyn HostInstance>>,
}

impl InstanceBox {
    /// 锁住实例；实例正在被别的调用使用时返回错误而不是等待
    fn with<R>(&self, f: impl FnOnce(&mut dyn HostInstance) -> R) -> BindingResult<R> {
        let mut guard = match self.instance.try_lock() {
            Ok(guard) => guard,
            Err(std::sync::TryLockError::Poisoned(e)) => e.into_inner(),
            Err(std::sync::TryLockError::WouldBlock) => {
                return Err(BindingError::CallFailed(format!(
                    "{} instance {:?} is already in use",
                    self.class.name, self.object
                )))
            }
        };
        let instance: &mut dyn HostInstance = &mut **guard;
        Ok(f(instance))
    }
}

/// 对象地址到实例盒地址
fn instances() -> &'static Mutex<HashMap<usize, usize>> {
    static INSTANCES: OnceLock<Mutex<HashMap<usize, usize>>> = OnceLock::new();
    INSTANCES.get_or_init(|| Mutex::new(HashMap::new()))
}

pub(crate) fn clear_instances() {
    instances().lock().unwrap_or_else(|e| e.into_inner()).clear();
}

/// 当前挂载的宿主实例数
pub fn instance_count() -> usize {
    instances().lock().unwrap_or_else(|e| e.into_inner()).len()
}

/// 以具体类型访问对象上的宿主实例
pub fn with_instance<T: HostInstance + 'static, R>(object: EngineHandle, f: impl FnOnce(&mut T) -> R) -> BindingResult<R> {
    let boxed = instances()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .get(&object.addr())
        .copied()
        .ok_or_else(|| BindingError::type_mismatch("host instance", format!("{:?}", object)))?;
    let boxed = unsafe { &*(boxed as *const InstanceBox) };
    boxed.with(|instance| {
        instance
            .as_any_mut()
            .downcast_mut::<T>()
            .map(f)
            .ok_or_else(|| BindingError::type_mismatch(std::any::type_name::<T>(), &boxed.class.name))
    })?
}

/// 注册宿主类时交给引擎的蹦床表
pub(crate) fn creation_info(entry: &ClassEntry, userdata: *mut c_void) -> ClassCreationInfo {
    let has_factory = entry.factory.is_some();
    ClassCreationInfo {
        is_virtual: FALSE,
        is_abstract: to_engine_bool(!has_factory),
        set_func: Some(instance_set),
        get_func: Some(instance_get),
        notification_func: Some(instance_notification),
        create_instance_func: has_factory.then_some(create_instance as CreateInstanceFn),
        free_instance_func: Some(free_instance),
        get_virtual_call_data_func: Some(get_virtual_call_data),
        call_virtual_with_data_func: Some(call_virtual_with_data),
        class_userdata: userdata,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// 在 ABI 边界执行回调体；失败时记录并返回 `None`
fn guarded<R>(context: &str, body: impl FnOnce() -> BindingResult<R>) -> Option<R> {
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            crate::engine_error!("{}: {}", context, e);
            None
        }
        Err(payload) => {
            crate::engine_error!("{}: panicked: {}", context, panic_message(payload.as_ref()));
            None
        }
    }
}

unsafe fn read_name(name: ConstStringNamePtr) -> BindingResult<String> {
    if name.is_null() {
        return Err(BindingError::type_mismatch(crate::values::VariantType::StringName, "null pointer"));
    }
    StringName::from_engine(EngineBuiltin::<StringNameKind>::borrowed(name)).to_utf8()
}

/// 类用户数据还原为注册记录（增加一个引用）
unsafe fn class_of(userdata: *mut c_void) -> BindingResult<Arc<ClassEntry>> {
    if userdata.is_null() {
        return Err(BindingError::NotReady("class userdata"));
    }
    let ptr = userdata as *const ClassEntry;
    Arc::increment_strong_count(ptr);
    Ok(Arc::from_raw(ptr))
}

unsafe fn instance_of<'a>(instance: InstancePtr) -> BindingResult<&'a InstanceBox> {
    (instance as *const InstanceBox)
        .as_ref()
        .ok_or(BindingError::NotReady("host instance"))
}

// ============================================================================
// 实例生命周期
// ============================================================================

unsafe extern "C" fn create_instance(userdata: *mut c_void) -> ObjectPtr {
    let created = guarded("create_instance", || {
        let class = class_of(userdata)?;
        let abi = abi::get()?;
        let object = abi.with_name(&class.native_base, |base| (abi.classdb_construct_object)(base))?;
        let object = EngineHandle::from_ptr(object);
        if object.is_null() {
            return Err(BindingError::ClassNotFound(class.native_base.clone()));
        }

        let instance = match class.instantiate(object) {
            Ok(instance) => instance,
            Err(e) => {
                (abi.object_destroy)(object.as_ptr());
                return Err(e);
            }
        };
        let boxed = Box::into_raw(Box::new(InstanceBox {
            class: class.clone(),
            object,
            instance: Mutex::new(instance),
        }));
        instances()
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(object.addr(), boxed as usize);
        abi.with_name(&class.name, |name| {
            (abi.object_set_instance)(object.as_ptr(), name, boxed as InstancePtr)
        })?;
        tracing::debug!(target: "dispatch", class = %class.name, ?object, "Host instance created");
        Ok(object.as_ptr())
    });
    created.unwrap_or(std::ptr::null_mut())
}

unsafe extern "C" fn free_instance(_userdata: *mut c_void, instance: InstancePtr) {
    guarded("free_instance", || {
        if instance.is_null() {
            return Ok(());
        }
        let boxed = Box::from_raw(instance as *mut InstanceBox);
        instances()
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&boxed.object.addr());
        tracing::debug!(target: "dispatch", class = %boxed.class.name, object = ?boxed.object, "Host instance freed");
        drop(boxed);
        Ok(())
    });
}

// ============================================================================
// 虚方法
// ============================================================================

/// 在类及其宿主祖先中查找覆盖
fn resolve_virtual<'a>(class: &'a ClassEntry, name: &str) -> Option<&'a VirtualMethod> {
    class.virtual_method(name)
}

unsafe extern "C" fn get_virtual_call_data(userdata: *mut c_void, name: ConstStringNamePtr) -> *mut c_void {
    let found = guarded("get_virtual_call_data", || {
        if userdata.is_null() {
            return Err(BindingError::NotReady("class userdata"));
        }
        // 记录由注册表持有，注册期间地址稳定
        let class = &*(userdata as *const ClassEntry);
        let name = read_name(name)?;
        let method = resolve_virtual(class, &name);
        tracing::trace!(target: "dispatch", class = %class.name, method = %name, overridden = method.is_some(), "Virtual lookup");
        Ok(method.map_or(std::ptr::null_mut(), |m| m as *const VirtualMethod as *mut c_void))
    });
    found.unwrap_or(std::ptr::null_mut())
}

unsafe extern "C" fn call_virtual_with_data(
    instance: InstancePtr,
    _name: ConstStringNamePtr,
    data: *mut c_void,
    args: *const ConstTypePtr,
    ret: TypePtr,
) {
    let Some(method) = (data as *const VirtualMethod).as_ref() else {
        crate::engine_error!("call_virtual_with_data: missing virtual data");
        return;
    };
    let done = guarded(&format!("virtual {}", method.name), || {
        let boxed = instance_of(instance)?;
        let mut unpacked = Vec::with_capacity(method.params.len());
        for (i, ty) in method.params.iter().enumerate() {
            let ptr = if args.is_null() { std::ptr::null() } else { *args.add(i) };
            unpacked.push(read_arg(*ty, ptr)?);
        }
        let value = boxed.with(|host| method.invoke(host, &unpacked))??;
        write_return(method.ret, &value, ret)
    });
    if done.is_none() {
        write_zero(method.ret, ret);
    }
}

// ============================================================================
// 属性与通知
// ============================================================================

unsafe extern "C" fn instance_set(instance: InstancePtr, name: ConstStringNamePtr, value: ConstVariantPtr) -> EngineBool {
    let handled = guarded("instance_set", || {
        let boxed = instance_of(instance)?;
        let name = read_name(name)?;
        let value = if value.is_null() {
            Variant::Nil
        } else {
            EngineVariant::borrowed(value).to_host()?
        };
        boxed.with(|host| host.set_property(&name, &value))?
    });
    to_engine_bool(handled.unwrap_or(false))
}

unsafe extern "C" fn instance_get(instance: InstancePtr, name: ConstStringNamePtr, ret: VariantPtr) -> EngineBool {
    let handled = guarded("instance_get", || {
        let boxed = instance_of(instance)?;
        let name = read_name(name)?;
        match boxed.with(|host| host.get_property(&name))?? {
            Some(value) => {
                let raw = EngineVariant::from_host(&value)?.into_raw();
                if ret.is_null() {
                    drop(EngineVariant::from_raw_owned(raw));
                } else {
                    std::ptr::write_unaligned(ret as *mut RawVariant, raw);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    });
    to_engine_bool(handled.unwrap_or(false))
}

unsafe extern "C" fn instance_notification(instance: InstancePtr, what: i32, _reversed: EngineBool) {
    guarded("instance_notification", || {
        let boxed = instance_of(instance)?;
        boxed.with(|host| host.notification(what))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guarded_swallows_errors_and_panics() {
        assert_eq!(guarded("ok", || Ok(3)), Some(3));
        assert_eq!(
            guarded::<()>("err", || Err(BindingError::NotReady("test"))),
            None
        );
        assert_eq!(guarded::<()>("panic", || panic!("boom")), None);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }

    struct Scorer;

    impl HostInstance for Scorer {}

    #[test]
    fn test_missing_instance_is_error() {
        assert!(with_instance::<Scorer, ()>(EngineHandle::from_addr(0x5150_0000), |_| ()).is_err());
    }

    #[test]
    fn test_failing_virtual_writes_zero_and_reports() {
        use crate::manifest::EngineType;
        use crate::registry::ClassBuilder;
        use crate::values::VariantType;

        let engine = crate::mock::MockEngine::install_with(|| {
            ClassBuilder::<Scorer>::new("Scorer", "Object")
                .factory(|_| Scorer)
                .virtual_method_typed(
                    "_score",
                    vec![EngineType::Typed(VariantType::Int)],
                    EngineType::Typed(VariantType::Int),
                    |_: &mut Scorer, _: &[Variant]| Err(BindingError::type_mismatch("int", "string")),
                )
                .register()
        });
        let entry = crate::registry::get("Scorer").unwrap();
        let object = unsafe { create_instance(Arc::as_ptr(&entry) as *mut c_void) };
        assert!(!object.is_null());
        let instance = instances()
            .lock()
            .unwrap()
            .get(&(object as usize))
            .copied()
            .unwrap();
        let method = entry.virtual_method("_score").unwrap();

        let arg = 5i64;
        let args = [&arg as *const i64 as ConstTypePtr];
        let mut ret = 99i64;
        unsafe {
            call_virtual_with_data(
                instance as InstancePtr,
                std::ptr::null(),
                method as *const VirtualMethod as *mut c_void,
                args.as_ptr(),
                &mut ret as *mut i64 as TypePtr,
            )
        };

        assert_eq!(ret, 0);
        let errors = engine.errors();
        assert!(errors.iter().any(|e| e.contains("virtual _score")), "{:?}", errors);
        unsafe { (abi::get().unwrap().object_destroy)(object) };
    }
}
