//! 值代理
//!
//! 引擎值类型在宿主侧的表示：
//! - `math` - 按值传递的 POD 类型
//! - `variant` / `engine_variant` - 带标签的动态值及其引擎存储
//! - `string` / `string_name` / `node_path` - 字符串族
//! - `array` / `dictionary` / `packed` - 容器
//! - `callable` / `signal` - 可调用对象与信号
//!
//! 引擎托管的值都有两种实现：引擎后端把每个操作转发到 ABI 表，宿主后端只在
//! 宿主内存中工作，不需要引擎即可使用。两种实现都能编组进调用帧。

pub mod array;
pub mod builtin;
pub mod callable;
pub mod dictionary;
pub mod engine_variant;
pub mod math;
pub mod node_path;
pub mod packed;
pub mod signal;
pub mod string;
pub mod string_name;
pub mod variant;
pub mod variant_type;

#[cfg(test)]
mod property_tests;

pub use array::{Array, ArrayProxy};
pub use builtin::{Backend, BuiltinKind, EngineBuiltin, EngineValue};
pub use callable::{Callable, CallableIdentity, CallableProxy};
pub use dictionary::{Dictionary, DictionaryProxy};
pub use engine_variant::EngineVariant;
pub use math::*;
pub use node_path::{NodePath, NodePathProxy, ParsedPath};
pub use packed::{
    PackedArray, PackedByteArray, PackedColorArray, PackedElement, PackedFloat32Array,
    PackedFloat64Array, PackedInt32Array, PackedInt64Array, PackedKind, PackedProxy,
    PackedStringArray, PackedVector2Array, PackedVector3Array, PackedVector4Array,
};
pub use signal::{Signal, SignalProxy};
pub use string::{GString, StringProxy};
pub use string_name::{host_intern_count, StringName, StringNameProxy};
pub use variant::{FromVariant, Variant, VariantProxy};
pub use variant_type::VariantType;
