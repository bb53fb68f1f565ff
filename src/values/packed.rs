//! 紧凑数组 Packed*Array
//!
//! 元素类型固定、连续存储的数组。按值元素可以通过 `as_slice` 直接借出底层缓冲，
//! 任何修改都会让之前借出的切片失效，所以修改方法都要求 `&mut self`。

use super::builtin::{Backend, BuiltinKind, EngineBuiltin, EngineValue, StringKind};
use super::math::Color;
use super::{GString, VariantType};
use crate::abi::{self, sys::*};
use crate::core::{BindingError, BindingResult};
use bytemuck::Pod;
use glam::{Vec2, Vec3, Vec4};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

pub(crate) mod hash {
    pub const SIZE: i64 = 3173160232;
    pub const PUSH_BACK: i64 = 694024632;
    pub const REMOVE_AT: i64 = 2823966027;
    pub const CLEAR: i64 = 3218959716;
    pub const DUPLICATE: i64 = 851781288;
}

/// 某元素类型对应的紧凑数组存储
pub struct PackedKind<T>(PhantomData<fn() -> T>);

impl<T: PackedElement> BuiltinKind for PackedKind<T> {
    const TYPE: VariantType = T::ARRAY_TYPE;
    type Storage = Opaque16;
}

/// 可以放进紧凑数组的元素
pub trait PackedElement: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    const ARRAY_TYPE: VariantType;

    /// 按元素布局读出一份 owned 值
    ///
    /// # Safety
    /// `ptr` 指向一个有效元素。
    unsafe fn read_element(ptr: ConstTypePtr) -> BindingResult<Self>;

    /// 覆盖一个已存在的元素
    ///
    /// # Safety
    /// `ptr` 指向一个有效、可写的元素。
    unsafe fn write_element(&self, ptr: TypePtr) -> BindingResult<()>;

    /// 以内建方法参数的形式交给闭包
    fn with_arg<R>(&self, f: impl FnOnce(ConstTypePtr) -> R) -> BindingResult<R>;
}

macro_rules! pod_elements {
    ($($ty:ty => $array:ident as $wire:ty,)*) => {
        $(impl PackedElement for $ty {
            const ARRAY_TYPE: VariantType = VariantType::$array;

            unsafe fn read_element(ptr: ConstTypePtr) -> BindingResult<Self> {
                Ok(std::ptr::read_unaligned(ptr as *const $ty))
            }

            unsafe fn write_element(&self, ptr: TypePtr) -> BindingResult<()> {
                std::ptr::write_unaligned(ptr as *mut $ty, *self);
                Ok(())
            }

            fn with_arg<R>(&self, f: impl FnOnce(ConstTypePtr) -> R) -> BindingResult<R> {
                let wire = <$wire>::from(*self);
                Ok(f(&wire as *const $wire as ConstTypePtr))
            }
        })*
    };
}

pod_elements! {
    u8 => PackedByteArray as i64,
    i32 => PackedInt32Array as i64,
    i64 => PackedInt64Array as i64,
    f32 => PackedFloat32Array as f64,
    f64 => PackedFloat64Array as f64,
    Vec2 => PackedVector2Array as Vec2,
    Vec3 => PackedVector3Array as Vec3,
    Vec4 => PackedVector4Array as Vec4,
    Color => PackedColorArray as Color,
}

impl PackedElement for GString {
    const ARRAY_TYPE: VariantType = VariantType::PackedStringArray;

    unsafe fn read_element(ptr: ConstTypePtr) -> BindingResult<Self> {
        let view = EngineBuiltin::<StringKind>::borrowed(ptr);
        Ok(GString::from_engine(view.try_clone()?))
    }

    unsafe fn write_element(&self, ptr: TypePtr) -> BindingResult<()> {
        let raw = self.to_engine()?.into_owned_raw()?;
        let abi = abi::get()?;
        if let Some(destructor) = abi.ptr_destructor(VariantType::String) {
            destructor(ptr);
        }
        std::ptr::write_unaligned(ptr as *mut Opaque8, raw);
        Ok(())
    }

    fn with_arg<R>(&self, f: impl FnOnce(ConstTypePtr) -> R) -> BindingResult<R> {
        if let Some(ptr) = self.engine_ptr() {
            return Ok(f(ptr));
        }
        let temp = self.to_engine()?;
        Ok(f(temp.as_type_ptr()))
    }
}

/// 紧凑数组的代理接口
pub trait PackedProxy<T: PackedElement>: Send + Sync + fmt::Debug {
    fn backend(&self) -> Backend;

    fn len(&self) -> BindingResult<usize>;

    fn get(&self, index: usize) -> BindingResult<T>;

    fn set(&mut self, index: usize, value: T) -> BindingResult<()>;

    fn push(&mut self, value: T) -> BindingResult<()>;

    fn remove(&mut self, index: usize) -> BindingResult<T>;

    fn clear(&mut self) -> BindingResult<()>;

    /// 连续存储首地址；空数组可以为空指针
    fn data_ptr(&self) -> BindingResult<ConstTypePtr>;

    fn duplicate(&self) -> BindingResult<Box<dyn PackedProxy<T>>>;

    fn share(&self) -> Box<dyn PackedProxy<T>>;

    fn engine_ptr(&self) -> Option<ConstTypePtr>;

    fn to_engine(&self) -> BindingResult<EngineBuiltin<PackedKind<T>>>;

    fn to_vec(&self) -> BindingResult<Vec<T>> {
        (0..self.len()?).map(|i| self.get(i)).collect()
    }
}

fn check_index(index: usize, len: usize) -> BindingResult<()> {
    if index < len {
        Ok(())
    } else {
        Err(BindingError::IndexOutOfBounds { index, len })
    }
}

// ============================================================================
// 引擎实现
// ============================================================================

pub struct EnginePacked<T: PackedElement>(EngineBuiltin<PackedKind<T>>);

impl<T: PackedElement> Clone for EnginePacked<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: PackedElement> fmt::Debug for EnginePacked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EnginePacked").field(&self.0).finish()
    }
}

impl<T: PackedElement> PackedProxy<T> for EnginePacked<T> {
    fn backend(&self) -> Backend {
        Backend::Engine
    }

    fn len(&self) -> BindingResult<usize> {
        let size: i64 = self.0.call("size", hash::SIZE, &[])?;
        Ok(size.max(0) as usize)
    }

    fn get(&self, index: usize) -> BindingResult<T> {
        check_index(index, self.len()?)?;
        let abi = abi::get()?;
        let ptr = unsafe {
            (abi.packed_array_operator_index_const)(T::ARRAY_TYPE as u32, self.0.as_type_ptr(), index as EngineInt)
        };
        if ptr.is_null() {
            return Err(BindingError::IndexOutOfBounds { index, len: 0 });
        }
        unsafe { T::read_element(ptr) }
    }

    fn set(&mut self, index: usize, value: T) -> BindingResult<()> {
        check_index(index, self.len()?)?;
        let abi = abi::get()?;
        let ptr = unsafe {
            (abi.packed_array_operator_index)(T::ARRAY_TYPE as u32, self.0.as_mut_type_ptr(), index as EngineInt)
        };
        if ptr.is_null() {
            return Err(BindingError::IndexOutOfBounds { index, len: 0 });
        }
        unsafe { value.write_element(ptr) }
    }

    fn push(&mut self, value: T) -> BindingResult<()> {
        let array = &mut self.0;
        value.with_arg(|arg| array.call_mut::<()>("push_back", hash::PUSH_BACK, &[arg]))?
    }

    fn remove(&mut self, index: usize) -> BindingResult<T> {
        let removed = self.get(index)?;
        let position = index as i64;
        self.0.call_mut::<()>(
            "remove_at",
            hash::REMOVE_AT,
            &[&position as *const i64 as ConstTypePtr],
        )?;
        Ok(removed)
    }

    fn clear(&mut self) -> BindingResult<()> {
        self.0.call_mut("clear", hash::CLEAR, &[])
    }

    fn data_ptr(&self) -> BindingResult<ConstTypePtr> {
        let abi = abi::get()?;
        Ok(unsafe { (abi.packed_array_data)(T::ARRAY_TYPE as u32, self.0.as_type_ptr()) })
    }

    fn duplicate(&self) -> BindingResult<Box<dyn PackedProxy<T>>> {
        let copy: EngineBuiltin<PackedKind<T>> = self.0.call("duplicate", hash::DUPLICATE, &[])?;
        Ok(Box::new(EnginePacked(copy)))
    }

    fn share(&self) -> Box<dyn PackedProxy<T>> {
        Box::new(self.clone())
    }

    fn engine_ptr(&self) -> Option<ConstTypePtr> {
        Some(self.0.as_type_ptr())
    }

    fn to_engine(&self) -> BindingResult<EngineBuiltin<PackedKind<T>>> {
        self.0.try_clone()
    }
}

// ============================================================================
// 宿主实现
// ============================================================================

pub struct HostPacked<T> {
    items: Arc<Vec<T>>,
}

impl<T> Clone for HostPacked<T> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for HostPacked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.items.iter()).finish()
    }
}

impl<T: PackedElement> PackedProxy<T> for HostPacked<T> {
    fn backend(&self) -> Backend {
        Backend::Host
    }

    fn len(&self) -> BindingResult<usize> {
        Ok(self.items.len())
    }

    fn get(&self, index: usize) -> BindingResult<T> {
        self.items
            .get(index)
            .cloned()
            .ok_or(BindingError::IndexOutOfBounds {
                index,
                len: self.items.len(),
            })
    }

    fn set(&mut self, index: usize, value: T) -> BindingResult<()> {
        check_index(index, self.items.len())?;
        Arc::make_mut(&mut self.items)[index] = value;
        Ok(())
    }

    fn push(&mut self, value: T) -> BindingResult<()> {
        Arc::make_mut(&mut self.items).push(value);
        Ok(())
    }

    fn remove(&mut self, index: usize) -> BindingResult<T> {
        check_index(index, self.items.len())?;
        Ok(Arc::make_mut(&mut self.items).remove(index))
    }

    fn clear(&mut self) -> BindingResult<()> {
        Arc::make_mut(&mut self.items).clear();
        Ok(())
    }

    fn data_ptr(&self) -> BindingResult<ConstTypePtr> {
        Ok(self.items.as_ptr() as ConstTypePtr)
    }

    fn duplicate(&self) -> BindingResult<Box<dyn PackedProxy<T>>> {
        Ok(Box::new(HostPacked {
            items: Arc::new(self.items.as_ref().clone()),
        }))
    }

    fn share(&self) -> Box<dyn PackedProxy<T>> {
        Box::new(self.clone())
    }

    fn engine_ptr(&self) -> Option<ConstTypePtr> {
        None
    }

    fn to_engine(&self) -> BindingResult<EngineBuiltin<PackedKind<T>>> {
        let mut array = EnginePacked(EngineBuiltin::new_default()?);
        for item in self.items.iter() {
            array.push(item.clone())?;
        }
        Ok(array.0)
    }

    fn to_vec(&self) -> BindingResult<Vec<T>> {
        Ok(self.items.as_ref().clone())
    }
}

// ============================================================================
// 包装
// ============================================================================

/// 引擎紧凑数组值
pub struct PackedArray<T: PackedElement> {
    proxy: Box<dyn PackedProxy<T>>,
}

pub type PackedByteArray = PackedArray<u8>;
pub type PackedInt32Array = PackedArray<i32>;
pub type PackedInt64Array = PackedArray<i64>;
pub type PackedFloat32Array = PackedArray<f32>;
pub type PackedFloat64Array = PackedArray<f64>;
pub type PackedStringArray = PackedArray<GString>;
pub type PackedVector2Array = PackedArray<Vec2>;
pub type PackedVector3Array = PackedArray<Vec3>;
pub type PackedVector4Array = PackedArray<Vec4>;
pub type PackedColorArray = PackedArray<Color>;

impl<T: PackedElement> PackedArray<T> {
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    pub fn from_vec(items: Vec<T>) -> Self {
        Self::from_proxy(Box::new(HostPacked {
            items: Arc::new(items),
        }))
    }

    pub fn new_engine() -> BindingResult<Self> {
        Ok(Self::from_engine(EngineBuiltin::new_default()?))
    }

    pub fn from_proxy(proxy: Box<dyn PackedProxy<T>>) -> Self {
        Self { proxy }
    }

    pub fn len(&self) -> BindingResult<usize> {
        self.proxy.len()
    }

    pub fn is_empty(&self) -> BindingResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn get(&self, index: usize) -> BindingResult<T> {
        self.proxy.get(index)
    }

    pub fn set(&mut self, index: usize, value: T) -> BindingResult<()> {
        self.proxy.set(index, value)
    }

    pub fn push(&mut self, value: T) -> BindingResult<()> {
        self.proxy.push(value)
    }

    pub fn remove(&mut self, index: usize) -> BindingResult<T> {
        self.proxy.remove(index)
    }

    pub fn clear(&mut self) -> BindingResult<()> {
        self.proxy.clear()
    }

    pub fn duplicate(&self) -> BindingResult<Self> {
        Ok(Self::from_proxy(self.proxy.duplicate()?))
    }

    pub fn to_vec(&self) -> BindingResult<Vec<T>> {
        self.proxy.to_vec()
    }

    pub fn to_engine_backed(&self) -> BindingResult<Self> {
        Ok(Self::from_engine(self.proxy.to_engine()?))
    }
}

impl<T: PackedElement + Pod> PackedArray<T> {
    /// 借出连续存储
    pub fn as_slice(&self) -> BindingResult<&[T]> {
        let len = self.len()?;
        let data = self.proxy.data_ptr()?;
        if len == 0 || data.is_null() {
            return Ok(&[]);
        }
        Ok(unsafe { std::slice::from_raw_parts(data as *const T, len) })
    }
}

impl<T: PackedElement> EngineValue for PackedArray<T> {
    type Kind = PackedKind<T>;

    fn backend(&self) -> Backend {
        self.proxy.backend()
    }

    fn engine_ptr(&self) -> Option<ConstTypePtr> {
        self.proxy.engine_ptr()
    }

    fn to_engine(&self) -> BindingResult<EngineBuiltin<PackedKind<T>>> {
        self.proxy.to_engine()
    }

    fn from_engine(value: EngineBuiltin<PackedKind<T>>) -> Self {
        Self::from_proxy(Box::new(EnginePacked(value)))
    }
}

impl<T: PackedElement> Default for PackedArray<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: PackedElement> Clone for PackedArray<T> {
    fn clone(&self) -> Self {
        Self {
            proxy: self.proxy.share(),
        }
    }
}

impl<T: PackedElement> PartialEq for PackedArray<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self.to_vec(), other.to_vec()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

impl<T: PackedElement> fmt::Debug for PackedArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_vec() {
            Ok(items) => write!(f, "{}{:?}", T::ARRAY_TYPE, items),
            Err(e) => write!(f, "{}(<{}>)", T::ARRAY_TYPE, e),
        }
    }
}

impl<T: PackedElement> From<Vec<T>> for PackedArray<T> {
    fn from(items: Vec<T>) -> Self {
        Self::from_vec(items)
    }
}

impl<T: PackedElement> FromIterator<T> for PackedArray<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_slice_view() {
        let mut bytes = PackedByteArray::from_vec(vec![1, 2, 3]);
        assert_eq!(bytes.as_slice().unwrap(), &[1, 2, 3]);
        bytes.push(4).unwrap();
        assert_eq!(bytes.remove(0).unwrap(), 1);
        assert_eq!(bytes.as_slice().unwrap(), &[2, 3, 4]);
        assert!(PackedFloat32Array::new().as_slice().unwrap().is_empty());
    }

    #[test]
    fn test_clone_shares_duplicate_copies() {
        let mut a: PackedVector2Array = vec![Vec2::ONE].into();
        let b = a.clone();
        let c = a.duplicate().unwrap();
        a.set(0, Vec2::ZERO).unwrap();
        assert_eq!(b.get(0).unwrap(), Vec2::ONE);
        assert_eq!(c.get(0).unwrap(), Vec2::ONE);
        assert!(a.set(5, Vec2::ZERO).is_err());
    }

    #[test]
    fn test_string_elements() {
        let names: PackedStringArray = vec![GString::from("idle"), GString::from("run")].into();
        assert_eq!(names.len().unwrap(), 2);
        assert_eq!(names.get(1).unwrap(), "run");
    }
}
