//! 入站调用帧
//!
//! 引擎调用宿主回调时，参数是按声明类型布局的指针，返回槽由宿主写入。
//! 入站参数一律是借用视图（Engine 所有权）；写入返回槽的值归引擎所有。

use crate::abi::{self, sys::*};
use crate::core::{BindingError, BindingResult};
use crate::manifest::EngineType;
use crate::values::{EngineVariant, Variant, VariantType};

/// 按声明类型读取一个入站参数
///
/// # Safety
/// `ptr` 必须指向 `ty` 布局的有效值，且在回调期间保持有效。
pub unsafe fn read_arg(ty: EngineType, ptr: ConstTypePtr) -> BindingResult<Variant> {
    match ty {
        EngineType::Void => Ok(Variant::Nil),
        EngineType::Variant => {
            if ptr.is_null() {
                return Ok(Variant::Nil);
            }
            EngineVariant::borrowed(ptr).to_host()
        }
        EngineType::Typed(t) => Variant::read_type_ptr(t, ptr, false),
    }
}

/// 把返回值写入返回槽
///
/// 声明为具体类型时先检查标签；Object 返回槽接受 Nil。
///
/// # Safety
/// `ret` 为空或指向按 `ty` 布局、已清零的可写存储。
pub unsafe fn write_return(ty: EngineType, value: &Variant, ret: TypePtr) -> BindingResult<()> {
    if ret.is_null() {
        return Ok(());
    }
    match ty {
        EngineType::Void => Ok(()),
        EngineType::Variant => {
            let raw = EngineVariant::from_host(value)?.into_raw();
            std::ptr::write_unaligned(ret as *mut RawVariant, raw);
            Ok(())
        }
        EngineType::Typed(VariantType::Object) if value.is_nil() => {
            std::ptr::write_unaligned(ret as *mut usize, 0);
            Ok(())
        }
        EngineType::Typed(t) => {
            if value.variant_type() != t {
                return Err(BindingError::type_mismatch(t, value.variant_type()));
            }
            value.write_type_ptr(ret)
        }
    }
}

/// 写入零值（回调失败时使用）
///
/// # Safety
/// 同 [`write_return`]。
pub unsafe fn write_zero(ty: EngineType, ret: TypePtr) {
    if ret.is_null() {
        return;
    }
    let result = match ty {
        EngineType::Void => Ok(()),
        EngineType::Variant => abi::get().map(|abi| (abi.variant_new_nil)(ret)),
        EngineType::Typed(t) => Variant::default_for(t).write_type_ptr(ret),
    };
    if let Err(e) = result {
        tracing::warn!(target: "frame", "Failed to write zero return value: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ArgSlot;
    use glam::Vec2;

    #[test]
    fn test_typed_round_trip_through_slot() {
        let mut slot = ArgSlot::ZERO;
        let ty = EngineType::Typed(VariantType::Vector2);
        unsafe {
            write_return(ty, &Variant::from(Vec2::new(3.0, 4.0)), slot.as_mut_ptr()).unwrap();
            assert_eq!(
                read_arg(ty, slot.as_ptr()).unwrap(),
                Variant::from(Vec2::new(3.0, 4.0))
            );
        }
    }

    #[test]
    fn test_tag_mismatch_is_rejected() {
        let mut slot = ArgSlot::ZERO;
        let result = unsafe {
            write_return(EngineType::Typed(VariantType::Int), &Variant::from(true), slot.as_mut_ptr())
        };
        assert!(matches!(result, Err(BindingError::TypeMismatch { .. })));
    }

    #[test]
    fn test_zero_for_pod_and_null_slot() {
        let mut slot = ArgSlot::ZERO;
        unsafe {
            std::ptr::write_unaligned(slot.as_mut_ptr() as *mut i64, 99);
            write_zero(EngineType::Typed(VariantType::Int), slot.as_mut_ptr());
            assert_eq!(std::ptr::read_unaligned(slot.as_ptr() as *const i64), 0);
            write_zero(EngineType::Variant, std::ptr::null_mut());
        }
    }
}
