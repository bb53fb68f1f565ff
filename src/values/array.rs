//! 数组 Array
//!
//! Variant 的有序序列，可以带元素类型约束。两种实现都是写时复制：
//! 普通赋值（`clone`）共享底层缓冲，修改时分叉；`duplicate` 显式复制。
//! 任何修改之后底层句柄都可能指向新缓冲，调用方不要跨修改缓存原始地址。

use super::builtin::{Backend, ArrayKind, EngineBuiltin, EngineValue};
use super::{EngineVariant, Variant, VariantType};
use crate::abi::{self, sys::*};
use crate::core::{BindingError, BindingResult};
use std::fmt;
use std::sync::Arc;

/// 内建方法哈希
pub(crate) mod hash {
    pub const SIZE: i64 = 3173160232;
    pub const PUSH_BACK: i64 = 3316032543;
    pub const REMOVE_AT: i64 = 2823966027;
    pub const CLEAR: i64 = 3218959716;
    pub const DUPLICATE: i64 = 636440122;
    pub const GET_TYPED_BUILTIN: i64 = 3173160232;
}

/// Array 的代理接口
pub trait ArrayProxy: Send + Sync + fmt::Debug {
    fn backend(&self) -> Backend;

    fn len(&self) -> BindingResult<usize>;

    fn get(&self, index: usize) -> BindingResult<Variant>;

    fn set(&mut self, index: usize, value: Variant) -> BindingResult<()>;

    fn push(&mut self, value: Variant) -> BindingResult<()>;

    fn remove(&mut self, index: usize) -> BindingResult<Variant>;

    fn clear(&mut self) -> BindingResult<()>;

    /// 元素类型约束；未约束时为 `None`
    fn element_type(&self) -> BindingResult<Option<VariantType>>;

    fn duplicate(&self, deep: bool) -> BindingResult<Box<dyn ArrayProxy>>;

    /// 共享同一缓冲的新代理
    fn share(&self) -> Box<dyn ArrayProxy>;

    fn engine_ptr(&self) -> Option<ConstTypePtr>;

    fn to_engine(&self) -> BindingResult<EngineBuiltin<ArrayKind>>;
}

fn check_element(expected: Option<VariantType>, value: &Variant) -> BindingResult<()> {
    match expected {
        Some(ty) if value.variant_type() != ty && !(ty == VariantType::Object && value.is_nil()) => {
            Err(BindingError::type_mismatch(ty, value.variant_type()))
        }
        _ => Ok(()),
    }
}

fn check_index(index: usize, len: usize) -> BindingResult<()> {
    if index < len {
        Ok(())
    } else {
        Err(BindingError::IndexOutOfBounds { index, len })
    }
}

/// 给引擎数组加元素类型约束
pub(crate) fn set_typed(array: &mut EngineBuiltin<ArrayKind>, ty: VariantType) -> BindingResult<()> {
    let abi = abi::get()?;
    abi.with_name("", |class_name| unsafe {
        (abi.array_set_typed)(array.as_mut_type_ptr(), ty as u32, class_name)
    })
}

// ============================================================================
// 引擎实现
// ============================================================================

#[derive(Debug, Clone)]
pub struct EngineArray(EngineBuiltin<ArrayKind>);

impl ArrayProxy for EngineArray {
    fn backend(&self) -> Backend {
        Backend::Engine
    }

    fn len(&self) -> BindingResult<usize> {
        let size: i64 = self.0.call("size", hash::SIZE, &[])?;
        Ok(size.max(0) as usize)
    }

    fn get(&self, index: usize) -> BindingResult<Variant> {
        check_index(index, self.len()?)?;
        let abi = abi::get()?;
        let ptr = unsafe { (abi.array_operator_index_const)(self.0.as_type_ptr(), index as EngineInt) };
        if ptr.is_null() {
            return Err(BindingError::IndexOutOfBounds {
                index,
                len: self.len()?,
            });
        }
        unsafe { EngineVariant::borrowed(ptr) }.to_host()
    }

    fn set(&mut self, index: usize, value: Variant) -> BindingResult<()> {
        check_element(self.element_type()?, &value)?;
        check_index(index, self.len()?)?;
        let new = EngineVariant::from_host(&value)?.into_owned_raw()?;
        let abi = abi::get()?;
        unsafe {
            let slot = (abi.array_operator_index)(self.0.as_mut_type_ptr(), index as EngineInt);
            if slot.is_null() {
                drop(EngineVariant::from_raw_owned(new));
                return Err(BindingError::IndexOutOfBounds { index, len: 0 });
            }
            (abi.variant_destroy)(slot);
            std::ptr::write_unaligned(slot as *mut RawVariant, new);
        }
        Ok(())
    }

    fn push(&mut self, value: Variant) -> BindingResult<()> {
        check_element(self.element_type()?, &value)?;
        let value = EngineVariant::from_host(&value)?;
        self.0.call_mut("push_back", hash::PUSH_BACK, &[value.as_ptr()])
    }

    fn remove(&mut self, index: usize) -> BindingResult<Variant> {
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

    fn element_type(&self) -> BindingResult<Option<VariantType>> {
        let raw: i64 = self.0.call("get_typed_builtin", hash::GET_TYPED_BUILTIN, &[])?;
        Ok(VariantType::from_raw(raw as u32).filter(|ty| *ty != VariantType::Nil))
    }

    fn duplicate(&self, deep: bool) -> BindingResult<Box<dyn ArrayProxy>> {
        let flag = to_engine_bool(deep);
        let copy: EngineBuiltin<ArrayKind> =
            self.0
                .call("duplicate", hash::DUPLICATE, &[&flag as *const EngineBool as ConstTypePtr])?;
        Ok(Box::new(EngineArray(copy)))
    }

    fn share(&self) -> Box<dyn ArrayProxy> {
        Box::new(self.clone())
    }

    fn engine_ptr(&self) -> Option<ConstTypePtr> {
        Some(self.0.as_type_ptr())
    }

    fn to_engine(&self) -> BindingResult<EngineBuiltin<ArrayKind>> {
        self.0.try_clone()
    }
}

// ============================================================================
// 宿主实现
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct HostArray {
    items: Arc<Vec<Variant>>,
    element_type: Option<VariantType>,
}

impl ArrayProxy for HostArray {
    fn backend(&self) -> Backend {
        Backend::Host
    }

    fn len(&self) -> BindingResult<usize> {
        Ok(self.items.len())
    }

    fn get(&self, index: usize) -> BindingResult<Variant> {
        self.items
            .get(index)
            .cloned()
            .ok_or(BindingError::IndexOutOfBounds {
                index,
                len: self.items.len(),
            })
    }

    fn set(&mut self, index: usize, value: Variant) -> BindingResult<()> {
        check_element(self.element_type, &value)?;
        check_index(index, self.items.len())?;
        Arc::make_mut(&mut self.items)[index] = value;
        Ok(())
    }

    fn push(&mut self, value: Variant) -> BindingResult<()> {
        check_element(self.element_type, &value)?;
        Arc::make_mut(&mut self.items).push(value);
        Ok(())
    }

    fn remove(&mut self, index: usize) -> BindingResult<Variant> {
        check_index(index, self.items.len())?;
        Ok(Arc::make_mut(&mut self.items).remove(index))
    }

    fn clear(&mut self) -> BindingResult<()> {
        Arc::make_mut(&mut self.items).clear();
        Ok(())
    }

    fn element_type(&self) -> BindingResult<Option<VariantType>> {
        Ok(self.element_type)
    }

    fn duplicate(&self, deep: bool) -> BindingResult<Box<dyn ArrayProxy>> {
        let items = if deep {
            self.items
                .iter()
                .map(|item| item.duplicate(true))
                .collect::<BindingResult<Vec<_>>>()?
        } else {
            self.items.as_ref().clone()
        };
        Ok(Box::new(HostArray {
            items: Arc::new(items),
            element_type: self.element_type,
        }))
    }

    fn share(&self) -> Box<dyn ArrayProxy> {
        Box::new(self.clone())
    }

    fn engine_ptr(&self) -> Option<ConstTypePtr> {
        None
    }

    fn to_engine(&self) -> BindingResult<EngineBuiltin<ArrayKind>> {
        let mut array = EngineArray(EngineBuiltin::new_default()?);
        if let Some(ty) = self.element_type {
            set_typed(&mut array.0, ty)?;
        }
        for item in self.items.iter() {
            array.push(item.clone())?;
        }
        Ok(array.0)
    }
}

// ============================================================================
// 包装
// ============================================================================

/// 引擎 Array 值
pub struct Array {
    proxy: Box<dyn ArrayProxy>,
}

impl Array {
    /// 空的宿主数组
    pub fn new() -> Self {
        Self::from_proxy(Box::new(HostArray::default()))
    }

    /// 带元素类型约束的宿主数组
    pub fn typed(ty: VariantType) -> Self {
        Self::from_proxy(Box::new(HostArray {
            items: Arc::default(),
            element_type: Some(ty),
        }))
    }

    /// 空的引擎数组
    pub fn new_engine() -> BindingResult<Self> {
        Ok(Self::from_engine(EngineBuiltin::new_default()?))
    }

    /// 带元素类型约束的引擎数组
    pub fn typed_engine(ty: VariantType) -> BindingResult<Self> {
        let mut array = EngineBuiltin::new_default()?;
        set_typed(&mut array, ty)?;
        Ok(Self::from_engine(array))
    }

    pub fn from_proxy(proxy: Box<dyn ArrayProxy>) -> Self {
        Self { proxy }
    }

    pub fn len(&self) -> BindingResult<usize> {
        self.proxy.len()
    }

    pub fn is_empty(&self) -> BindingResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn get(&self, index: usize) -> BindingResult<Variant> {
        self.proxy.get(index)
    }

    pub fn set(&mut self, index: usize, value: impl Into<Variant>) -> BindingResult<()> {
        self.proxy.set(index, value.into())
    }

    pub fn push(&mut self, value: impl Into<Variant>) -> BindingResult<()> {
        self.proxy.push(value.into())
    }

    pub fn remove(&mut self, index: usize) -> BindingResult<Variant> {
        self.proxy.remove(index)
    }

    pub fn clear(&mut self) -> BindingResult<()> {
        self.proxy.clear()
    }

    pub fn element_type(&self) -> BindingResult<Option<VariantType>> {
        self.proxy.element_type()
    }

    pub fn duplicate(&self, deep: bool) -> BindingResult<Self> {
        Ok(Self::from_proxy(self.proxy.duplicate(deep)?))
    }

    pub fn iter(&self) -> BindingResult<ArrayIter<'_>> {
        Ok(ArrayIter {
            array: self,
            index: 0,
            len: self.len()?,
        })
    }

    pub fn to_vec(&self) -> BindingResult<Vec<Variant>> {
        self.iter()?.collect()
    }

    /// 换成引擎后端
    pub fn to_engine_backed(&self) -> BindingResult<Self> {
        Ok(Self::from_engine(self.proxy.to_engine()?))
    }
}

impl EngineValue for Array {
    type Kind = ArrayKind;

    fn backend(&self) -> Backend {
        self.proxy.backend()
    }

    fn engine_ptr(&self) -> Option<ConstTypePtr> {
        self.proxy.engine_ptr()
    }

    fn to_engine(&self) -> BindingResult<EngineBuiltin<ArrayKind>> {
        self.proxy.to_engine()
    }

    fn from_engine(value: EngineBuiltin<ArrayKind>) -> Self {
        Self::from_proxy(Box::new(EngineArray(value)))
    }
}

impl Default for Array {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Array {
    fn clone(&self) -> Self {
        Self {
            proxy: self.proxy.share(),
        }
    }
}

impl PartialEq for Array {
    fn eq(&self, other: &Self) -> bool {
        match (self.to_vec(), other.to_vec()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_vec() {
            Ok(items) => f.debug_list().entries(items).finish(),
            Err(e) => write!(f, "Array(<{}>)", e),
        }
    }
}

impl FromIterator<Variant> for Array {
    fn from_iter<I: IntoIterator<Item = Variant>>(iter: I) -> Self {
        Self::from_proxy(Box::new(HostArray {
            items: Arc::new(iter.into_iter().collect()),
            element_type: None,
        }))
    }
}

/// 按下标遍历；产生的元素个数等于 `len`
pub struct ArrayIter<'a> {
    array: &'a Array,
    index: usize,
    len: usize,
}

impl Iterator for ArrayIter<'_> {
    type Item = BindingResult<Variant>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.len {
            return None;
        }
        let item = self.array.get(self.index);
        self.index += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.len - self.index;
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignment_shares_until_mutation() {
        let mut a: Array = vec![Variant::from(1i64), Variant::from(2i64)].into_iter().collect();
        let b = a.clone();
        a.push(3i64).unwrap();
        assert_eq!(a.len().unwrap(), 3);
        assert_eq!(b.len().unwrap(), 2);
    }

    #[test]
    fn test_typed_array_rejects_other_types() {
        let mut a = Array::typed(VariantType::Int);
        a.push(5i64).unwrap();
        assert!(matches!(
            a.push("five"),
            Err(BindingError::TypeMismatch { .. })
        ));
        assert_eq!(a.element_type().unwrap(), Some(VariantType::Int));
    }

    #[test]
    fn test_deep_duplicate_detaches_nested() {
        let inner: Array = vec![Variant::from(1i64)].into_iter().collect();
        let outer: Array = vec![Variant::from(inner)].into_iter().collect();
        let copy = outer.duplicate(true).unwrap();
        assert_eq!(copy, outer);
        assert_eq!(copy.iter().unwrap().count(), copy.len().unwrap());
    }

    #[test]
    fn test_index_errors() {
        let mut a = Array::new();
        assert!(matches!(
            a.get(0),
            Err(BindingError::IndexOutOfBounds { index: 0, len: 0 })
        ));
        assert!(a.remove(1).is_err());
    }
}
