//! 类注册表记录

use crate::core::BindingResult;
use crate::handle::EngineHandle;
use crate::manifest::{ClassDecl, EngineType};
use crate::values::Variant;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// 类的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassOrigin {
    /// 引擎原生类（从清单发现）
    Engine,
    /// 宿主实现并注册给引擎的扩展类
    Host,
}

/// 从 trait 对象取回具体类型
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// 宿主扩展类的实例
///
/// 属性与通知钩子都有默认实现：未处理的属性交还引擎处理。
pub trait HostInstance: AsAny + Send {
    /// 返回 true 表示已处理
    fn set_property(&mut self, _name: &str, _value: &Variant) -> BindingResult<bool> {
        Ok(false)
    }

    fn get_property(&self, _name: &str) -> BindingResult<Option<Variant>> {
        Ok(None)
    }

    fn notification(&mut self, _what: i32) {}
}

/// 由引擎对象构造宿主实例
pub type Factory = Box<dyn Fn(EngineHandle) -> BindingResult<Box<dyn HostInstance>> + Send + Sync>;

/// 虚方法实现
pub type VirtualHandler =
    Arc<dyn Fn(&mut dyn HostInstance, &[Variant]) -> BindingResult<Variant> + Send + Sync>;

/// vtable 中的一项
#[derive(Clone)]
pub struct VirtualMethod {
    pub name: String,
    pub params: Vec<EngineType>,
    pub ret: EngineType,
    pub(crate) handler: VirtualHandler,
}

impl VirtualMethod {
    pub fn invoke(&self, instance: &mut dyn HostInstance, args: &[Variant]) -> BindingResult<Variant> {
        (self.handler)(instance, args)
    }
}

impl fmt::Debug for VirtualMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualMethod")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("ret", &self.ret)
            .finish()
    }
}

/// 一个类的注册记录
///
/// 注册后不可变；宿主类的记录地址作为类用户数据交给引擎。
pub struct ClassEntry {
    pub name: String,
    pub parent: Option<String>,
    pub origin: ClassOrigin,
    pub decl: Option<ClassDecl>,
    /// 宿主类实例化时先构造的最近原生祖先
    pub native_base: String,
    pub(crate) factory: Option<Factory>,
    pub(crate) vtable: HashMap<String, VirtualMethod>,
}

impl ClassEntry {
    /// 引擎原生类
    pub fn engine(decl: ClassDecl) -> Self {
        Self {
            name: decl.name.clone(),
            parent: decl.inherits.clone(),
            origin: ClassOrigin::Engine,
            native_base: decl.name.clone(),
            decl: Some(decl),
            factory: None,
            vtable: HashMap::new(),
        }
    }

    /// 虚方法覆盖（含注册时从宿主父类继承的）；`None` 表示使用引擎默认实现
    pub fn virtual_method(&self, name: &str) -> Option<&VirtualMethod> {
        self.vtable.get(name)
    }

    pub fn virtual_names(&self) -> impl Iterator<Item = &str> {
        self.vtable.keys().map(String::as_str)
    }

    pub fn is_host(&self) -> bool {
        self.origin == ClassOrigin::Host
    }

    pub(crate) fn instantiate(&self, object: EngineHandle) -> BindingResult<Box<dyn HostInstance>> {
        match &self.factory {
            Some(factory) => factory(object),
            None => Err(crate::core::BindingError::ClassNotFound(format!(
                "{} has no host factory",
                self.name
            ))),
        }
    }
}

impl fmt::Debug for ClassEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassEntry")
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("origin", &self.origin)
            .field("virtuals", &self.vtable.len())
            .finish()
    }
}
