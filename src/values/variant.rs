//! 宿主侧 Variant
//!
//! 引擎 Variant 类型集合的带标签和类型。标签与负载由枚举保证一致；
//! 每次取值都是一次显式的标签检查，不匹配时返回 `TypeMismatch`。
//! 引擎值负载（字符串、容器等）仍是代理，可以由任一后端实现。

use super::builtin::{Backend, EngineValue};
use super::math::*;
use super::{
    Array, Callable, Dictionary, EngineBuiltin, EngineVariant, GString, NodePath, PackedArray,
    Signal, StringName, VariantType,
};
use crate::abi::sys::*;
use crate::core::{BindingError, BindingResult};
use crate::frame::ArgSlot;
use crate::handle::EngineHandle;
use glam::{IVec2, IVec3, IVec4, Quat, Vec2, Vec3, Vec4};

/// 从 Variant 显式取值
pub trait FromVariant: Sized {
    fn from_variant(variant: &Variant) -> BindingResult<Self>;
}

fn mismatch(expected: VariantType, found: &Variant) -> BindingError {
    BindingError::type_mismatch(expected, found.variant_type())
}

macro_rules! variant_arms {
    (
        pod { $($pod:ident($pod_ty:ty),)* }
        managed { $($val:ident($val_ty:ty),)* }
    ) => {
        /// 引擎 Variant 的宿主表示
        #[derive(Debug, Clone, PartialEq, Default)]
        pub enum Variant {
            #[default]
            Nil,
            Bool(bool),
            Int(i64),
            Float(f64),
            $($pod($pod_ty),)*
            Object(Option<EngineHandle>),
            $($val($val_ty),)*
        }

        impl Variant {
            /// 当前标签
            pub fn variant_type(&self) -> VariantType {
                match self {
                    Self::Nil => VariantType::Nil,
                    Self::Bool(_) => VariantType::Bool,
                    Self::Int(_) => VariantType::Int,
                    Self::Float(_) => VariantType::Float,
                    $(Self::$pod(_) => VariantType::$pod,)*
                    Self::Object(_) => VariantType::Object,
                    $(Self::$val(_) => VariantType::$val,)*
                }
            }

            /// 某类型的零值；引擎值类型得到宿主后端的空值
            pub fn default_for(ty: VariantType) -> Self {
                match ty {
                    VariantType::Nil => Self::Nil,
                    VariantType::Bool => Self::Bool(false),
                    VariantType::Int => Self::Int(0),
                    VariantType::Float => Self::Float(0.0),
                    $(VariantType::$pod => Self::$pod(<$pod_ty>::default()),)*
                    VariantType::Object => Self::Object(None),
                    $(VariantType::$val => Self::$val(<$val_ty>::default()),)*
                }
            }

            /// 按类型指针布局读取一个值
            ///
            /// `owned` 为 true 时接管引擎值，否则得到借用视图（Engine 所有权）。
            ///
            /// # Safety
            /// `ptr` 必须指向 `ty` 布局的有效值。
            pub unsafe fn read_type_ptr(ty: VariantType, ptr: ConstTypePtr, owned: bool) -> BindingResult<Self> {
                if ptr.is_null() && ty != VariantType::Nil {
                    return Err(BindingError::type_mismatch(ty, "null pointer"));
                }
                let value = match ty {
                    VariantType::Nil => Self::Nil,
                    VariantType::Bool => Self::Bool(std::ptr::read_unaligned(ptr as *const EngineBool) != FALSE),
                    VariantType::Int => Self::Int(std::ptr::read_unaligned(ptr as *const i64)),
                    VariantType::Float => Self::Float(std::ptr::read_unaligned(ptr as *const f64)),
                    $(VariantType::$pod => Self::$pod(std::ptr::read_unaligned(ptr as *const $pod_ty)),)*
                    VariantType::Object => {
                        let addr = std::ptr::read_unaligned(ptr as *const usize);
                        Self::Object(EngineHandle::from_addr(addr).non_null())
                    }
                    $(VariantType::$val => {
                        let builtin = if owned {
                            EngineBuiltin::from_raw_owned(OpaqueStorage::read_from(ptr))
                        } else {
                            EngineBuiltin::borrowed(ptr)
                        };
                        Self::$val(<$val_ty as EngineValue>::from_engine(builtin))
                    })*
                };
                Ok(value)
            }

            /// 按类型指针布局写入清零的目标存储；写入的引擎值归目标所有
            ///
            /// # Safety
            /// `dst` 必须可写且至少容纳本类型的值。
            pub unsafe fn write_type_ptr(&self, dst: TypePtr) -> BindingResult<()> {
                match self {
                    Self::Nil => {}
                    Self::Bool(v) => std::ptr::write_unaligned(dst as *mut EngineBool, to_engine_bool(*v)),
                    Self::Int(v) => std::ptr::write_unaligned(dst as *mut i64, *v),
                    Self::Float(v) => std::ptr::write_unaligned(dst as *mut f64, *v),
                    $(Self::$pod(v) => std::ptr::write_unaligned(dst as *mut $pod_ty, *v),)*
                    Self::Object(handle) => {
                        let addr = handle.map(EngineHandle::addr).unwrap_or(0);
                        std::ptr::write_unaligned(dst as *mut usize, addr)
                    }
                    $(Self::$val(v) => {
                        let raw = v.to_engine()?.into_owned_raw()?;
                        std::ptr::write_unaligned(dst as *mut _, raw)
                    })*
                }
                Ok(())
            }

            /// 把值以类型指针形式临时交给闭包
            ///
            /// 引擎后端的值直接给出地址；其余值物化在栈上或临时引擎值里。
            pub fn with_type_ptr<R>(&self, f: impl FnOnce(ConstTypePtr) -> R) -> BindingResult<R> {
                match self {
                    $(Self::$val(v) => {
                        if let Some(ptr) = v.engine_ptr() {
                            return Ok(f(ptr));
                        }
                        let temp = v.to_engine()?;
                        Ok(f(temp.as_type_ptr()))
                    })*
                    _ => {
                        let mut slot = ArgSlot::ZERO;
                        unsafe { self.write_type_ptr(slot.as_mut_ptr())? };
                        Ok(f(slot.as_ptr()))
                    }
                }
            }

            /// 负载的后端；按值类型总是宿主
            pub fn payload_backend(&self) -> Backend {
                match self {
                    $(Self::$val(v) => v.backend(),)*
                    _ => Backend::Host,
                }
            }
        }

        $(
            impl From<$pod_ty> for Variant {
                fn from(value: $pod_ty) -> Self {
                    Self::$pod(value)
                }
            }

            impl FromVariant for $pod_ty {
                fn from_variant(variant: &Variant) -> BindingResult<Self> {
                    match variant {
                        Variant::$pod(v) => Ok(*v),
                        other => Err(mismatch(VariantType::$pod, other)),
                    }
                }
            }
        )*

        $(
            impl From<$val_ty> for Variant {
                fn from(value: $val_ty) -> Self {
                    Self::$val(value)
                }
            }

            impl FromVariant for $val_ty {
                fn from_variant(variant: &Variant) -> BindingResult<Self> {
                    match variant {
                        Variant::$val(v) => Ok(v.clone()),
                        other => Err(mismatch(VariantType::$val, other)),
                    }
                }
            }
        )*
    };
}

variant_arms! {
    pod {
        Vector2(Vec2),
        Vector2i(IVec2),
        Rect2(Rect2),
        Rect2i(Rect2i),
        Vector3(Vec3),
        Vector3i(IVec3),
        Transform2D(Transform2D),
        Vector4(Vec4),
        Vector4i(IVec4),
        Plane(Plane),
        Quaternion(Quat),
        Aabb(Aabb),
        Basis(Basis),
        Transform3D(Transform3D),
        Projection(Projection),
        Color(Color),
        Rid(Rid),
    }
    managed {
        String(GString),
        StringName(StringName),
        NodePath(NodePath),
        Callable(Callable),
        Signal(Signal),
        Dictionary(Dictionary),
        Array(Array),
        PackedByteArray(PackedArray<u8>),
        PackedInt32Array(PackedArray<i32>),
        PackedInt64Array(PackedArray<i64>),
        PackedFloat32Array(PackedArray<f32>),
        PackedFloat64Array(PackedArray<f64>),
        PackedStringArray(PackedArray<GString>),
        PackedVector2Array(PackedArray<Vec2>),
        PackedVector3Array(PackedArray<Vec3>),
        PackedColorArray(PackedArray<Color>),
        PackedVector4Array(PackedArray<Vec4>),
    }
}

impl Variant {
    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// 带标签检查的取值
    pub fn try_to<T: FromVariant>(&self) -> BindingResult<T> {
        T::from_variant(self)
    }

    /// 显式复制；`deep` 时递归复制嵌套的 Array 与 Dictionary
    pub fn duplicate(&self, deep: bool) -> BindingResult<Self> {
        match self {
            Self::Array(array) => Ok(Self::Array(array.duplicate(deep)?)),
            Self::Dictionary(dict) => Ok(Self::Dictionary(dict.duplicate(deep)?)),
            other => Ok(other.clone()),
        }
    }

    /// 对象句柄（Nil 与空对象返回 `None`）
    pub fn as_object(&self) -> BindingResult<Option<EngineHandle>> {
        match self {
            Self::Nil => Ok(None),
            Self::Object(handle) => Ok(*handle),
            other => Err(mismatch(VariantType::Object, other)),
        }
    }
}

impl From<bool> for Variant {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Variant {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Variant {
    fn from(value: i32) -> Self {
        Self::Int(value as i64)
    }
}

impl From<f64> for Variant {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<f32> for Variant {
    fn from(value: f32) -> Self {
        Self::Float(value as f64)
    }
}

impl From<&str> for Variant {
    fn from(value: &str) -> Self {
        Self::String(GString::from(value))
    }
}

impl From<String> for Variant {
    fn from(value: String) -> Self {
        Self::String(GString::from(value))
    }
}

impl From<EngineHandle> for Variant {
    fn from(value: EngineHandle) -> Self {
        Self::Object(value.non_null())
    }
}

impl From<Option<EngineHandle>> for Variant {
    fn from(value: Option<EngineHandle>) -> Self {
        Self::Object(value.and_then(EngineHandle::non_null))
    }
}

impl FromVariant for Variant {
    fn from_variant(variant: &Variant) -> BindingResult<Self> {
        Ok(variant.clone())
    }
}

impl FromVariant for bool {
    fn from_variant(variant: &Variant) -> BindingResult<Self> {
        match variant {
            Variant::Bool(v) => Ok(*v),
            other => Err(mismatch(VariantType::Bool, other)),
        }
    }
}

impl FromVariant for i64 {
    fn from_variant(variant: &Variant) -> BindingResult<Self> {
        match variant {
            Variant::Int(v) => Ok(*v),
            other => Err(mismatch(VariantType::Int, other)),
        }
    }
}

impl FromVariant for i32 {
    fn from_variant(variant: &Variant) -> BindingResult<Self> {
        let value = i64::from_variant(variant)?;
        i32::try_from(value).map_err(|_| BindingError::type_mismatch("32-bit int", value))
    }
}

impl FromVariant for f64 {
    fn from_variant(variant: &Variant) -> BindingResult<Self> {
        match variant {
            Variant::Float(v) => Ok(*v),
            other => Err(mismatch(VariantType::Float, other)),
        }
    }
}

impl FromVariant for f32 {
    fn from_variant(variant: &Variant) -> BindingResult<Self> {
        f64::from_variant(variant).map(|v| v as f32)
    }
}

impl FromVariant for String {
    fn from_variant(variant: &Variant) -> BindingResult<Self> {
        match variant {
            Variant::String(v) => v.to_utf8(),
            other => Err(mismatch(VariantType::String, other)),
        }
    }
}

impl FromVariant for Option<EngineHandle> {
    fn from_variant(variant: &Variant) -> BindingResult<Self> {
        variant.as_object()
    }
}

impl FromVariant for EngineHandle {
    fn from_variant(variant: &Variant) -> BindingResult<Self> {
        variant
            .as_object()?
            .ok_or_else(|| BindingError::type_mismatch(VariantType::Object, "null object"))
    }
}

/// Variant 的两种实现共享的代理接口
pub trait VariantProxy {
    fn backend(&self) -> Backend;

    fn variant_type(&self) -> BindingResult<VariantType>;

    fn to_host(&self) -> BindingResult<Variant>;

    fn to_engine(&self) -> BindingResult<EngineVariant>;
}

impl VariantProxy for Variant {
    fn backend(&self) -> Backend {
        Backend::Host
    }

    fn variant_type(&self) -> BindingResult<VariantType> {
        Ok(Variant::variant_type(self))
    }

    fn to_host(&self) -> BindingResult<Variant> {
        Ok(self.clone())
    }

    fn to_engine(&self) -> BindingResult<EngineVariant> {
        EngineVariant::from_host(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_checked_extraction() {
        let v = Variant::from(42i64);
        assert_eq!(v.variant_type(), VariantType::Int);
        assert_eq!(v.try_to::<i64>().unwrap(), 42);
        assert_eq!(v.try_to::<i32>().unwrap(), 42);
        assert!(matches!(
            v.try_to::<bool>(),
            Err(BindingError::TypeMismatch { .. })
        ));
        assert!(v.try_to::<Vec2>().is_err());
    }

    #[test]
    fn test_pod_layout_through_type_ptr() {
        let v = Variant::from(Vec3::new(1.0, 2.0, 3.0));
        let back = v
            .with_type_ptr(|ptr| unsafe { Variant::read_type_ptr(VariantType::Vector3, ptr, false) })
            .unwrap()
            .unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn test_defaults_match_tags() {
        for ty in VariantType::ALL {
            assert_eq!(Variant::default_for(*ty).variant_type(), *ty);
        }
    }

    #[test]
    fn test_object_variant() {
        let handle = EngineHandle::from_addr(0x1000);
        let v = Variant::from(handle);
        assert_eq!(v.try_to::<EngineHandle>().unwrap(), handle);
        assert_eq!(Variant::from(EngineHandle::NULL).as_object().unwrap(), None);
        assert!(Variant::from(EngineHandle::NULL).try_to::<EngineHandle>().is_err());
    }

    #[test]
    fn test_host_string_is_host_backed() {
        let v = Variant::from("walk");
        assert_eq!(v.payload_backend(), Backend::Host);
        assert_eq!(v.try_to::<String>().unwrap(), "walk");
    }
}
