//! 按值传递的数学类型
//!
//! 向量与四元数直接使用 `glam`，其余类型按引擎布局定义为 `#[repr(C)]` POD。
//! 这些值在调用帧中按位复制，没有生命周期。

use super::VariantType;
use bytemuck::{Pod, Zeroable};
use glam::{IVec2, IVec3, IVec4, Quat, Vec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};

pub type Vector2 = Vec2;
pub type Vector2i = IVec2;
pub type Vector3 = Vec3;
pub type Vector3i = IVec3;
pub type Vector4 = Vec4;
pub type Vector4i = IVec4;
pub type Quaternion = Quat;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Rect2 {
    pub position: Vec2,
    pub size: Vec2,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Pod, Zeroable, Serialize, Deserialize)]
pub struct Rect2i {
    pub position: IVec2,
    pub size: IVec2,
}

/// 2D 仿射变换（两列基向量加原点）
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Transform2D {
    pub x: Vec2,
    pub y: Vec2,
    pub origin: Vec2,
}

impl Default for Transform2D {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform2D {
    pub const IDENTITY: Self = Self {
        x: Vec2::X,
        y: Vec2::Y,
        origin: Vec2::ZERO,
    };
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Plane {
    pub normal: Vec3,
    pub d: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Aabb {
    pub position: Vec3,
    pub size: Vec3,
}

/// 3x3 基矩阵（行优先）
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Basis {
    pub rows: [Vec3; 3],
}

impl Default for Basis {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Basis {
    pub const IDENTITY: Self = Self {
        rows: [Vec3::X, Vec3::Y, Vec3::Z],
    };
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Transform3D {
    pub basis: Basis,
    pub origin: Vec3,
}

/// 4x4 投影矩阵（列优先）
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Projection {
    pub columns: [Vec4; 4],
}

impl Default for Projection {
    fn default() -> Self {
        Self {
            columns: [Vec4::X, Vec4::Y, Vec4::Z, Vec4::W],
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Default for Color {
    fn default() -> Self {
        Self::BLACK
    }
}

impl Color {
    pub const BLACK: Self = Self::rgba(0.0, 0.0, 0.0, 1.0);
    pub const WHITE: Self = Self::rgba(1.0, 1.0, 1.0, 1.0);

    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }
}

/// 引擎子系统（渲染、物理、音频）的 64 位服务端句柄
///
/// 按值复制，这一层不附带生命周期，由子系统自行释放。
#[repr(transparent)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Pod, Zeroable, Serialize, Deserialize)]
pub struct Rid(pub u64);

impl Rid {
    pub const INVALID: Self = Self(0);

    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(self) -> u64 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

/// 以类型指针布局按位传递的值
pub trait PodValue: Pod + PartialEq + std::fmt::Debug + Send + Sync + 'static {
    const TYPE: VariantType;
}

macro_rules! pod_values {
    ($($ty:ty => $variant:ident,)*) => {
        $(impl PodValue for $ty {
            const TYPE: VariantType = VariantType::$variant;
        })*
    };
}

pod_values! {
    Vec2 => Vector2,
    IVec2 => Vector2i,
    Rect2 => Rect2,
    Rect2i => Rect2i,
    Vec3 => Vector3,
    IVec3 => Vector3i,
    Transform2D => Transform2D,
    Vec4 => Vector4,
    IVec4 => Vector4i,
    Plane => Plane,
    Quat => Quaternion,
    Aabb => Aabb,
    Basis => Basis,
    Transform3D => Transform3D,
    Projection => Projection,
    Color => Color,
    Rid => Rid,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_layout<T: PodValue>() {
        assert_eq!(
            Some(std::mem::size_of::<T>()),
            T::TYPE.pod_size(),
            "{} layout",
            T::TYPE
        );
    }

    #[test]
    fn test_layouts_match_variant_sizes() {
        assert_layout::<Vec2>();
        assert_layout::<IVec2>();
        assert_layout::<Rect2>();
        assert_layout::<Rect2i>();
        assert_layout::<Vec3>();
        assert_layout::<IVec3>();
        assert_layout::<Transform2D>();
        assert_layout::<Vec4>();
        assert_layout::<IVec4>();
        assert_layout::<Plane>();
        assert_layout::<Quat>();
        assert_layout::<Aabb>();
        assert_layout::<Basis>();
        assert_layout::<Transform3D>();
        assert_layout::<Projection>();
        assert_layout::<Color>();
        assert_layout::<Rid>();
    }

    #[test]
    fn test_rid_validity() {
        assert!(!Rid::INVALID.is_valid());
        assert!(Rid::new(42).is_valid());
        assert_eq!(Rid::new(42).id(), 42);
    }
}
