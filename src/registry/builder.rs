//! 宿主扩展类构建器
//!
//! ```ignore
//! ClassBuilder::<MyProfiler>::new("MyProfiler", "EngineProfiler")
//!     .factory(|_object| MyProfiler::default())
//!     .virtual_method("_toggle", |this, args| {
//!         this.enabled = args[0].try_to()?;
//!         Ok(Variant::Nil)
//!     })
//!     .register()?;
//! ```

use super::entry::{ClassEntry, ClassOrigin, Factory, HostInstance, VirtualHandler, VirtualMethod};
use crate::core::{BindingError, BindingResult};
use crate::handle::EngineHandle;
use crate::manifest::EngineType;
use crate::values::Variant;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

/// 签名来源：显式给出，或注册时从清单的虚方法声明解析
enum Signature {
    Manifest,
    Explicit(Vec<EngineType>, EngineType),
}

struct PendingVirtual {
    name: String,
    signature: Signature,
    handler: VirtualHandler,
}

/// 宿主扩展类构建器
pub struct ClassBuilder<T: HostInstance> {
    name: String,
    parent: String,
    factory: Option<Factory>,
    virtuals: Vec<PendingVirtual>,
    _instance: PhantomData<fn() -> T>,
}

impl<T: HostInstance + 'static> ClassBuilder<T> {
    pub fn new(name: impl Into<String>, parent: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: parent.into(),
            factory: None,
            virtuals: Vec::new(),
            _instance: PhantomData,
        }
    }

    /// 实例工厂；不设置时类按抽象类注册
    pub fn factory<F>(self, factory: F) -> Self
    where
        F: Fn(EngineHandle) -> T + Send + Sync + 'static,
    {
        self.try_factory(move |object| Ok(factory(object)))
    }

    pub fn try_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(EngineHandle) -> BindingResult<T> + Send + Sync + 'static,
    {
        self.factory = Some(Box::new(move |object| {
            factory(object).map(|instance| Box::new(instance) as Box<dyn HostInstance>)
        }));
        self
    }

    /// 安装一个虚方法覆盖，参数与返回类型取自清单
    pub fn virtual_method<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut T, &[Variant]) -> BindingResult<Variant> + Send + Sync + 'static,
    {
        self.virtuals.push(PendingVirtual {
            name: name.into(),
            signature: Signature::Manifest,
            handler: typed_handler(f),
        });
        self
    }

    /// 安装一个显式声明签名的虚方法覆盖
    pub fn virtual_method_typed<F>(
        mut self,
        name: impl Into<String>,
        params: Vec<EngineType>,
        ret: EngineType,
        f: F,
    ) -> Self
    where
        F: Fn(&mut T, &[Variant]) -> BindingResult<Variant> + Send + Sync + 'static,
    {
        self.virtuals.push(PendingVirtual {
            name: name.into(),
            signature: Signature::Explicit(params, ret),
            handler: typed_handler(f),
        });
        self
    }

    /// 构建注册记录并注册到引擎
    ///
    /// 注册表已冻结时直接返回 `RegistryFrozen`，不再解析虚方法签名。
    pub fn register(self) -> BindingResult<()> {
        if super::is_frozen() {
            return Err(BindingError::RegistryFrozen(self.name));
        }
        let entry = self.build()?;
        super::register_entry(entry)
    }

    fn build(self) -> BindingResult<ClassEntry> {
        let native_base = super::native_base_of(&self.parent)?;

        // 宿主父类的覆盖先继承，本类的同名覆盖再替换
        let mut vtable: HashMap<String, VirtualMethod> = super::get(&self.parent)
            .filter(|parent| parent.is_host())
            .map(|parent| parent.vtable.clone())
            .unwrap_or_default();

        for pending in self.virtuals {
            let (params, ret) = match pending.signature {
                Signature::Explicit(params, ret) => (params, ret),
                Signature::Manifest => manifest_signature(&native_base, &pending.name)?,
            };
            vtable.insert(
                pending.name.clone(),
                VirtualMethod {
                    name: pending.name,
                    params,
                    ret,
                    handler: pending.handler,
                },
            );
        }

        Ok(ClassEntry {
            name: self.name,
            parent: Some(self.parent),
            origin: ClassOrigin::Host,
            decl: None,
            native_base,
            factory: self.factory,
            vtable,
        })
    }
}

fn typed_handler<T, F>(f: F) -> VirtualHandler
where
    T: HostInstance + 'static,
    F: Fn(&mut T, &[Variant]) -> BindingResult<Variant> + Send + Sync + 'static,
{
    Arc::new(move |instance: &mut dyn HostInstance, args: &[Variant]| {
        let instance = instance
            .as_any_mut()
            .downcast_mut::<T>()
            .ok_or_else(|| BindingError::type_mismatch(std::any::type_name::<T>(), "other host instance"))?;
        f(instance, args)
    })
}

/// 在原生祖先链中查找虚方法声明
fn manifest_signature(native_base: &str, name: &str) -> BindingResult<(Vec<EngineType>, EngineType)> {
    let manifest = super::manifest()?;
    let types = super::type_map();
    let (owner, method) = manifest
        .find_method(native_base, name)
        .filter(|(_, method)| method.is_virtual)
        .ok_or_else(|| BindingError::MethodNotFound {
            class: native_base.to_string(),
            method: name.to_string(),
            hash: 0,
        })?;
    tracing::trace!(target: "registry", class = %owner.name, method = %name, "Virtual signature from manifest");
    let params = method
        .arguments
        .iter()
        .map(|arg| types.engine_type(&arg.ty))
        .collect();
    Ok((params, types.engine_type(method.return_type())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::VariantType;

    #[derive(Default)]
    struct Counter {
        hits: i64,
    }

    impl HostInstance for Counter {}

    #[test]
    fn test_handler_downcasts_instance() {
        let handler = typed_handler(|this: &mut Counter, args: &[Variant]| {
            this.hits += args.len() as i64;
            Ok(Variant::Int(this.hits))
        });
        let mut counter = Counter::default();
        let result = handler(&mut counter as &mut dyn HostInstance, &[Variant::Nil, Variant::Bool(true)]).unwrap();
        assert_eq!(result, Variant::Int(2));
        assert_eq!(counter.hits, 2);
    }

    #[test]
    fn test_handler_rejects_foreign_instance() {
        struct Other;
        impl HostInstance for Other {}

        let handler = typed_handler(|_: &mut Counter, _: &[Variant]| Ok(Variant::Nil));
        assert!(matches!(
            handler(&mut Other as &mut dyn HostInstance, &[]),
            Err(BindingError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_explicit_signature_kept() {
        let builder = ClassBuilder::<Counter>::new("Counter", "Object").virtual_method_typed(
            "_ping",
            vec![EngineType::Typed(VariantType::Int)],
            EngineType::Typed(VariantType::Bool),
            |_, _| Ok(Variant::Bool(true)),
        );
        assert_eq!(builder.virtuals.len(), 1);
        assert!(matches!(builder.virtuals[0].signature, Signature::Explicit(ref p, _) if p.len() == 1));
    }
}
