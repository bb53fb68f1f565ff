//! 引擎加载入口
//!
//! 引擎加载宿主模块时调用 [`binding_library_init`]：初始化 ABI 表，并填写
//! 按层级回调的初始化信息。Scene 层初始化时从清单发现引擎类，然后执行宿主
//! 注册的层级钩子（通常在这里注册扩展类）；引擎进入主循环时冻结注册表。

use crate::abi::{self, sys::*};
use crate::config::{self, BindingConfig};
use crate::core::BindingResult;
use crate::manifest::Manifest;
use crate::{handle, registry, singleton};
use std::ffi::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

type LevelHook = Arc<dyn Fn(InitLevel) -> BindingResult<()> + Send + Sync>;

#[derive(Default)]
struct EntryState {
    manifest_path: Option<PathBuf>,
    hooks: Vec<(InitLevel, LevelHook)>,
}

fn state() -> &'static Mutex<EntryState> {
    static STATE: OnceLock<Mutex<EntryState>> = OnceLock::new();
    STATE.get_or_init(|| Mutex::new(EntryState::default()))
}

/// 注册某个初始化层级的钩子
pub fn on_initialize<F>(level: InitLevel, hook: F)
where
    F: Fn(InitLevel) -> BindingResult<()> + Send + Sync + 'static,
{
    state()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .hooks
        .push((level, Arc::new(hook)));
}

/// 引擎调用的加载入口
///
/// 缺少必需符号属于配置错误，记录后终止进程。
///
/// # Safety
/// 由引擎按加载协议调用；`r_initialization` 必须可写。
#[no_mangle]
pub unsafe extern "C" fn binding_library_init(
    lookup: Option<InterfaceLookupFn>,
    library: ClassLibraryPtr,
    r_initialization: *mut InitializationInfo,
) -> EngineBool {
    let (Some(lookup), false) = (lookup, r_initialization.is_null()) else {
        return FALSE;
    };

    let config = BindingConfig::load_or_default();
    if let Err(e) = config.validate() {
        tracing::warn!(target: "config", "Invalid configuration, using defaults: {}", e);
    }
    config::apply(&config);
    state().lock().unwrap_or_else(|e| e.into_inner()).manifest_path = config.runtime.manifest_path.clone();

    if let Err(e) = abi::init(lookup, library) {
        tracing::error!(target: "abi", "Fatal error during ABI initialization: {}", e);
        if e.is_fatal() {
            std::process::abort();
        }
        return FALSE;
    }

    *r_initialization = InitializationInfo {
        minimum_level: InitLevel::Scene as u32,
        userdata: std::ptr::null_mut(),
        initialize: Some(initialize),
        deinitialize: Some(deinitialize),
        main_loop_started: Some(main_loop_started),
    };
    TRUE
}

fn initialize_level(level: InitLevel) -> BindingResult<()> {
    tracing::debug!(target: "abi", ?level, "Initialize level");
    if level == InitLevel::Scene {
        let path = state().lock().unwrap_or_else(|e| e.into_inner()).manifest_path.clone();
        let manifest = Manifest::load(path.as_deref())?;
        registry::discover(manifest)?;
    }
    // 钩子可能再注册钩子，调用前释放状态锁
    let hooks: Vec<LevelHook> = state()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .hooks
        .iter()
        .filter(|(at, _)| *at == level)
        .map(|(_, hook)| hook.clone())
        .collect();
    for hook in hooks {
        hook(level)?;
    }
    Ok(())
}

fn deinitialize_level(level: InitLevel) -> BindingResult<()> {
    tracing::debug!(target: "abi", ?level, "Deinitialize level");
    if level == InitLevel::Scene {
        let removed = registry::unregister_all_host()?;
        singleton::reset();
        tracing::info!(target: "registry", classes = removed, "Host classes unregistered");
    }
    Ok(())
}

unsafe extern "C" fn initialize(_userdata: *mut c_void, level: u32) {
    let Some(level) = InitLevel::from_raw(level) else {
        return;
    };
    match catch_unwind(AssertUnwindSafe(|| initialize_level(level))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => crate::engine_error!("initialize {:?}: {}", level, e),
        Err(_) => crate::engine_error!("initialize {:?}: panicked", level),
    }
}

unsafe extern "C" fn deinitialize(_userdata: *mut c_void, level: u32) {
    let Some(level) = InitLevel::from_raw(level) else {
        return;
    };
    match catch_unwind(AssertUnwindSafe(|| deinitialize_level(level))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => crate::engine_error!("deinitialize {:?}: {}", level, e),
        Err(_) => crate::engine_error!("deinitialize {:?}: panicked", level),
    }
}

unsafe extern "C" fn main_loop_started(_userdata: *mut c_void) {
    registry::freeze();
}

/// 拆除全部进程级状态（测试在场景之间使用）
pub fn reset() {
    singleton::reset();
    registry::reset();
    handle::live::reset();
    abi::reset();
    *state().lock().unwrap_or_else(|e| e.into_inner()) = EntryState::default();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_arguments_rejected() {
        let _lock = crate::mock::test_lock();
        let mut info = InitializationInfo::default();
        let accepted = unsafe { binding_library_init(None, std::ptr::null_mut(), &mut info) };
        assert_eq!(accepted, FALSE);
        assert!(info.initialize.is_none());
    }

    #[test]
    fn test_unknown_level_ignored() {
        let _lock = crate::mock::test_lock();
        reset();
        unsafe { initialize(std::ptr::null_mut(), 17) };
        assert_eq!(registry::class_count(), 0);
    }

    #[test]
    fn test_hook_may_register_hooks() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let _lock = crate::mock::test_lock();
        reset();
        let inner_runs = Arc::new(AtomicUsize::new(0));
        let counter = inner_runs.clone();
        on_initialize(InitLevel::Core, move |_| {
            let counter = counter.clone();
            on_initialize(InitLevel::Core, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            Ok(())
        });

        initialize_level(InitLevel::Core).unwrap();
        assert_eq!(inner_runs.load(Ordering::SeqCst), 0);
        initialize_level(InitLevel::Core).unwrap();
        assert_eq!(inner_runs.load(Ordering::SeqCst), 1);
        reset();
    }
}
