//! Variant 类型标签
//!
//! 与引擎的 Variant 类型集合逐一对应，数值即 ABI 上传递的 `u32`。

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! variant_types {
    ($($variant:ident = $value:literal => $name:literal,)*) => {
        /// 引擎 Variant 类型标签
        #[repr(u32)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum VariantType {
            $($variant = $value,)*
        }

        impl VariantType {
            pub const ALL: &'static [VariantType] = &[$(Self::$variant,)*];

            pub fn from_raw(raw: u32) -> Option<Self> {
                match raw {
                    $($value => Some(Self::$variant),)*
                    _ => None,
                }
            }

            /// 引擎类描述清单里使用的类型名
            pub fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)*
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(Self::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

variant_types! {
    Nil = 0 => "Nil",
    Bool = 1 => "bool",
    Int = 2 => "int",
    Float = 3 => "float",
    String = 4 => "String",
    Vector2 = 5 => "Vector2",
    Vector2i = 6 => "Vector2i",
    Rect2 = 7 => "Rect2",
    Rect2i = 8 => "Rect2i",
    Vector3 = 9 => "Vector3",
    Vector3i = 10 => "Vector3i",
    Transform2D = 11 => "Transform2D",
    Vector4 = 12 => "Vector4",
    Vector4i = 13 => "Vector4i",
    Plane = 14 => "Plane",
    Quaternion = 15 => "Quaternion",
    Aabb = 16 => "AABB",
    Basis = 17 => "Basis",
    Transform3D = 18 => "Transform3D",
    Projection = 19 => "Projection",
    Color = 20 => "Color",
    StringName = 21 => "StringName",
    NodePath = 22 => "NodePath",
    Rid = 23 => "RID",
    Object = 24 => "Object",
    Callable = 25 => "Callable",
    Signal = 26 => "Signal",
    Dictionary = 27 => "Dictionary",
    Array = 28 => "Array",
    PackedByteArray = 29 => "PackedByteArray",
    PackedInt32Array = 30 => "PackedInt32Array",
    PackedInt64Array = 31 => "PackedInt64Array",
    PackedFloat32Array = 32 => "PackedFloat32Array",
    PackedFloat64Array = 33 => "PackedFloat64Array",
    PackedStringArray = 34 => "PackedStringArray",
    PackedVector2Array = 35 => "PackedVector2Array",
    PackedVector3Array = 36 => "PackedVector3Array",
    PackedColorArray = 37 => "PackedColorArray",
    PackedVector4Array = 38 => "PackedVector4Array",
}

impl VariantType {
    /// 按值传递的类型在调用帧中的字节大小
    ///
    /// `Nil` 和引擎托管的值类型返回 `None`。
    pub fn pod_size(self) -> Option<usize> {
        let size = match self {
            Self::Bool => 1,
            Self::Int | Self::Float | Self::Rid | Self::Object => 8,
            Self::Vector2 | Self::Vector2i => 8,
            Self::Vector3 | Self::Vector3i => 12,
            Self::Rect2 | Self::Rect2i => 16,
            Self::Vector4 | Self::Vector4i | Self::Plane | Self::Quaternion | Self::Color => 16,
            Self::Transform2D | Self::Aabb => 24,
            Self::Basis => 36,
            Self::Transform3D => 48,
            Self::Projection => 64,
            _ => return None,
        };
        Some(size)
    }

    /// 引擎托管值类型的不透明存储大小
    pub fn opaque_size(self) -> Option<usize> {
        match self {
            Self::String
            | Self::StringName
            | Self::NodePath
            | Self::Array
            | Self::Dictionary => Some(8),
            Self::Callable | Self::Signal => Some(16),
            ty if ty.is_packed_array() => Some(16),
            _ => None,
        }
    }

    /// 值在类型指针布局下的大小
    pub fn value_size(self) -> usize {
        self.pod_size().or_else(|| self.opaque_size()).unwrap_or(0)
    }

    pub fn is_pod(self) -> bool {
        self.pod_size().is_some()
    }

    /// 是否由引擎托管（需要构造/析构）
    pub fn is_engine_managed(self) -> bool {
        self.opaque_size().is_some()
    }

    pub fn is_packed_array(self) -> bool {
        (Self::PackedByteArray as u32..=Self::PackedVector4Array as u32).contains(&(self as u32))
    }

    /// 是否是写时复制的容器
    pub fn is_container(self) -> bool {
        matches!(self, Self::Array | Self::Dictionary) || self.is_packed_array()
    }
}

impl fmt::Display for VariantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_roundtrip() {
        for ty in VariantType::ALL {
            assert_eq!(VariantType::from_raw(*ty as u32), Some(*ty));
            assert_eq!(VariantType::from_name(ty.name()), Some(*ty));
        }
        assert_eq!(VariantType::from_raw(39), None);
    }

    #[test]
    fn test_storage_classes_are_disjoint() {
        for ty in VariantType::ALL {
            assert!(!(ty.is_pod() && ty.is_engine_managed()), "{} is both", ty);
        }
        assert_eq!(VariantType::Nil.value_size(), 0);
        assert_eq!(VariantType::PackedColorArray.value_size(), 16);
        assert!(VariantType::PackedVector4Array.is_container());
        assert!(!VariantType::Callable.is_container());
    }
}
