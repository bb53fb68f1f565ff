//! # Game Engine Bindings
//!
//! Host-side runtime that lets Rust code drive an engine exposing a C ABI of
//! opaque handles and function pointers.
//!
//! ## Features
//!
//! - **ABI Table**: function pointers resolved once at load time through the engine's lookup procedure
//! - **Pointer Discipline**: Host / Engine / Shared ownership with a uniform pack / end lifecycle
//! - **Call Frame**: marshalling of arguments and return slots for pointer-call method binds
//! - **Value Proxies**: engine-backed and host-backed strings, containers, callables and signals
//! - **Class Registry**: engine class discovery, host extension classes and the dispatch bridge
//! - **Singleton Cache**: lazily resolved engine singletons
//!
//! ## Architecture Design
//!
//! 全局状态（ABI 表、类注册表、单例缓存）只在加载和 Scene 层初始化时写入，
//! 主循环开始后冻结。值类型一律经代理访问，代理背后是引擎存储或宿主存储。
//!
//! ### Example
//!
//! ```ignore
//! use game_engine_bindings::classes::{Animation, AnimationLibrary};
//!
//! let library = AnimationLibrary::new()?;
//! library.add_animation("walk", &Animation::new()?)?;
//! assert!(library.has_animation("walk")?);
//! ```
//!
//! ## Modules
//!
//! - [`abi`]: C ABI types and the function pointer table
//! - [`handle`]: Ownership-tracked engine object handles
//! - [`frame`]: Call frame marshalling
//! - [`values`]: Variant and engine value proxies
//! - [`registry`]: Class registry and dispatch bridge
//! - [`singleton`]: Singleton cache
//! - [`classes`]: Engine class wrappers

/// C ABI types, function pointer table and engine library loading
pub mod abi;
/// Engine class wrappers generated from the class manifest
pub mod classes;
/// Configuration system
pub mod config;
/// Error types shared by every module
pub mod core;
/// Engine-facing load entry point
pub mod entry;
/// Call frame marshalling for pointer calls
pub mod frame;
/// Ownership-tracked engine object handles
pub mod handle;
/// Class description manifest and type map
pub mod manifest;
/// Class registry and dispatch bridge
pub mod registry;
/// Engine singleton cache
pub mod singleton;
/// Variant and engine value proxies
pub mod values;

/// In-process mock engine for tests and benchmarks
#[cfg(any(test, feature = "mock-engine"))]
pub mod mock;

pub use crate::core::{BindingError, BindingResult, EngineErrorCode};
pub use handle::{EngineHandle, ManagedHandle, Ownership, Transfer, WeakHandle};
pub use registry::{ClassBuilder, EngineClass, HostInstance, Inherits};
pub use values::{Array, Callable, Dictionary, GString, NodePath, Signal, StringName, Variant, VariantType};
