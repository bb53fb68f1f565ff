//! 类型映射表
//!
//! 对每个引擎类型给出：宿主表示、调用帧打包规则、解包规则，以及返回该类型
//! 对象句柄时是否转移所有权。清单里的类型名经过这里解析成 [`EngineType`]。

use super::Manifest;
use crate::values::VariantType;
use std::collections::HashMap;
use std::fmt;

/// 参数或返回值在 ABI 上的形态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineType {
    /// 无返回值
    Void,
    /// 完整的 Variant
    Variant,
    /// 按类型指针布局的具体类型
    Typed(VariantType),
}

impl EngineType {
    pub fn variant_type(self) -> Option<VariantType> {
        match self {
            Self::Typed(t) => Some(t),
            _ => None,
        }
    }
}

impl fmt::Display for EngineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => f.write_str("void"),
            Self::Variant => f.write_str("Variant"),
            Self::Typed(t) => write!(f, "{}", t),
        }
    }
}

/// 调用帧打包规则
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackRule {
    /// 按值复制进帧槽
    ByValue { size: usize },
    /// 引擎后端按地址，宿主后端物化临时值
    ByPointer,
    /// 物化为帧持有的临时 Variant
    Variant,
    /// 指针宽度的对象地址
    ObjectHandle,
    /// 不占参数位
    None,
}

/// 返回槽解包规则
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnpackRule {
    /// 按位读取
    ReadValue,
    /// 接管返回槽里构造的引擎值
    TakeProxy,
    /// 接管返回的 Variant 并转换
    Variant,
    /// 读取对象地址并按所有权规则封装
    Handle,
    None,
}

/// 一种引擎类型的映射
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeMapping {
    pub engine_name: String,
    pub engine_type: EngineType,
    pub host: &'static str,
    pub pack: PackRule,
    pub unpack: UnpackRule,
    /// 返回该类型句柄时宿主是否获得一个引用
    pub transfers_ownership: bool,
}

/// 引擎类型名到映射的表
#[derive(Debug, Clone, Default)]
pub struct TypeMap {
    entries: HashMap<String, TypeMapping>,
}

fn host_name(ty: VariantType) -> &'static str {
    match ty {
        VariantType::Nil => "()",
        VariantType::Bool => "bool",
        VariantType::Int => "i64",
        VariantType::Float => "f64",
        VariantType::String => "GString",
        VariantType::Vector2 => "Vec2",
        VariantType::Vector2i => "IVec2",
        VariantType::Vector3 => "Vec3",
        VariantType::Vector3i => "IVec3",
        VariantType::Vector4 => "Vec4",
        VariantType::Vector4i => "IVec4",
        VariantType::Quaternion => "Quat",
        VariantType::Object => "Option<ManagedHandle>",
        VariantType::PackedByteArray => "PackedArray<u8>",
        VariantType::PackedInt32Array => "PackedArray<i32>",
        VariantType::PackedInt64Array => "PackedArray<i64>",
        VariantType::PackedFloat32Array => "PackedArray<f32>",
        VariantType::PackedFloat64Array => "PackedArray<f64>",
        VariantType::PackedStringArray => "PackedArray<GString>",
        VariantType::PackedVector2Array => "PackedArray<Vec2>",
        VariantType::PackedVector3Array => "PackedArray<Vec3>",
        VariantType::PackedColorArray => "PackedArray<Color>",
        VariantType::PackedVector4Array => "PackedArray<Vec4>",
        other => other.name(),
    }
}

fn builtin_mapping(ty: VariantType) -> TypeMapping {
    let (pack, unpack) = match ty {
        VariantType::Nil => (PackRule::None, UnpackRule::None),
        VariantType::Object => (PackRule::ObjectHandle, UnpackRule::Handle),
        t if t.is_engine_managed() => (PackRule::ByPointer, UnpackRule::TakeProxy),
        t => (
            PackRule::ByValue {
                size: t.value_size(),
            },
            UnpackRule::ReadValue,
        ),
    };
    TypeMapping {
        engine_name: ty.name().to_string(),
        engine_type: EngineType::Typed(ty),
        host: host_name(ty),
        pack,
        unpack,
        transfers_ownership: false,
    }
}

fn object_mapping(class: &str, transfers_ownership: bool) -> TypeMapping {
    TypeMapping {
        engine_name: class.to_string(),
        engine_type: EngineType::Typed(VariantType::Object),
        host: "Option<ManagedHandle>",
        pack: PackRule::ObjectHandle,
        unpack: UnpackRule::Handle,
        transfers_ownership,
    }
}

impl TypeMap {
    /// 内建类型、`void` 与 `Variant`
    pub fn standard() -> Self {
        let mut entries: HashMap<String, TypeMapping> = VariantType::ALL
            .iter()
            .filter(|t| **t != VariantType::Nil)
            .map(|t| (t.name().to_string(), builtin_mapping(*t)))
            .collect();
        entries.insert(
            "void".to_string(),
            TypeMapping {
                engine_name: "void".to_string(),
                engine_type: EngineType::Void,
                host: "()",
                pack: PackRule::None,
                unpack: UnpackRule::None,
                transfers_ownership: false,
            },
        );
        entries.insert(
            "Variant".to_string(),
            TypeMapping {
                engine_name: "Variant".to_string(),
                engine_type: EngineType::Variant,
                host: "Variant",
                pack: PackRule::Variant,
                unpack: UnpackRule::Variant,
                transfers_ownership: false,
            },
        );
        Self { entries }
    }

    /// 标准表加上清单里的类；引用计数类的返回值交给宿主一个引用
    pub fn from_manifest(manifest: &Manifest) -> Self {
        let mut map = Self::standard();
        for class in &manifest.classes {
            map.entries
                .insert(class.name.clone(), object_mapping(&class.name, class.is_refcounted));
        }
        map
    }

    pub fn get(&self, name: &str) -> Option<&TypeMapping> {
        self.entries.get(name)
    }

    /// 解析清单里的类型名
    ///
    /// `enum::`/`bitfield::` 按 int 传递，`typedarray::` 按 Array 传递，
    /// 其余未知名字视为对象类。
    pub fn resolve(&self, name: &str) -> TypeMapping {
        if let Some(mapping) = self.entries.get(name) {
            return mapping.clone();
        }
        if name.starts_with("enum::") || name.starts_with("bitfield::") {
            return TypeMapping {
                engine_name: name.to_string(),
                ..builtin_mapping(VariantType::Int)
            };
        }
        if name.starts_with("typedarray::") {
            return TypeMapping {
                engine_name: name.to_string(),
                ..builtin_mapping(VariantType::Array)
            };
        }
        object_mapping(name, false)
    }

    pub fn engine_type(&self, name: &str) -> EngineType {
        self.resolve(name).engine_type
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_rules() {
        let map = TypeMap::standard();
        let v2 = map.resolve("Vector2");
        assert_eq!(v2.pack, PackRule::ByValue { size: 8 });
        assert_eq!(v2.unpack, UnpackRule::ReadValue);
        assert_eq!(map.resolve("String").pack, PackRule::ByPointer);
        assert_eq!(map.engine_type("void"), EngineType::Void);
        assert_eq!(map.engine_type("Variant"), EngineType::Variant);
    }

    #[test]
    fn test_prefixed_and_class_names() {
        let map = TypeMap::standard();
        assert_eq!(map.engine_type("enum::Error"), EngineType::Typed(VariantType::Int));
        assert_eq!(map.engine_type("bitfield::MethodFlags"), EngineType::Typed(VariantType::Int));
        assert_eq!(
            map.engine_type("typedarray::StringName"),
            EngineType::Typed(VariantType::Array)
        );
        let node = map.resolve("Node");
        assert_eq!(node.unpack, UnpackRule::Handle);
        assert!(!node.transfers_ownership);
    }

    #[test]
    fn test_manifest_refcounted_transfers() {
        let manifest = Manifest::embedded().unwrap();
        let map = TypeMap::from_manifest(&manifest);
        assert!(map.resolve("Animation").transfers_ownership);
        assert!(!map.resolve("Node").transfers_ownership);
    }
}
