//! 引擎动态库加载
//!
//! 以嵌入方式运行时，宿主进程自己加载引擎动态库，并从中取出
//! `engine_get_proc_address` 查找过程来初始化 ABI 表。

use super::sys::{ClassLibraryPtr, InterfaceLookupFn};
use crate::core::{BindingError, BindingResult};
use libloading::{Library, Symbol};
use std::path::{Path, PathBuf};

/// 引擎导出的查找过程符号名
pub const LOOKUP_SYMBOL: &[u8] = b"engine_get_proc_address\0";

/// 已加载的引擎动态库
///
/// 必须比 ABI 表活得更久：表中的函数指针指向库内代码。
pub struct EngineLibrary {
    library: Library,
    path: PathBuf,
    lookup: InterfaceLookupFn,
}

impl EngineLibrary {
    /// 打开引擎动态库并解析查找过程
    pub fn open(path: impl AsRef<Path>) -> BindingResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(BindingError::Library(format!(
                "Engine library not found: {}",
                path.display()
            )));
        }

        let library = unsafe { Library::new(path) }
            .map_err(|e| BindingError::Library(format!("{}: {}", path.display(), e)))?;
        let lookup = unsafe {
            let symbol: Symbol<InterfaceLookupFn> = library
                .get(LOOKUP_SYMBOL)
                .map_err(|e| BindingError::Library(e.to_string()))?;
            *symbol
        };

        tracing::info!(target: "abi", path = %path.display(), "Engine library loaded");
        Ok(Self {
            library,
            path: path.to_path_buf(),
            lookup,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lookup(&self) -> InterfaceLookupFn {
        self.lookup
    }

    /// 用库中的查找过程初始化 ABI 表
    pub fn init_table(&self, library_token: ClassLibraryPtr) -> BindingResult<()> {
        unsafe { super::table::init(self.lookup, library_token) }
    }

    /// 卸载前清空 ABI 表，避免悬垂函数指针
    pub fn close(self) {
        super::table::reset();
        drop(self.library);
    }
}

impl std::fmt::Debug for EngineLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineLibrary").field("path", &self.path).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_library() {
        let err = EngineLibrary::open("/nonexistent/libengine.so").unwrap_err();
        assert!(matches!(err, BindingError::Library(_)));
    }

    #[test]
    fn test_not_a_library() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = EngineLibrary::open(file.path()).unwrap_err();
        assert!(matches!(err, BindingError::Library(_)));
    }
}
