//! 统一错误处理模块
//!
//! 提供绑定层范围内的统一错误类型定义
//!
//! ## 错误传播策略
//!
//! - **出站调用**: 错误以 `BindingResult<T>` 返回给宿主调用点
//! - **入站回调**: 错误在 ABI 边界被吞掉（记录日志并写入零值），绝不跨越到引擎代码
//! - **配置错误**: ABI 初始化缺少必需符号时是致命错误，入口点会中止进程

use thiserror::Error;

/// 绑定层错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BindingError {
    #[error("Configuration error: missing required ABI symbol `{0}`")]
    Configuration(String),

    #[error("{0} is not initialized")]
    NotReady(&'static str),

    #[error("Use after free: handle {0:#x} was already released")]
    UseAfterFree(usize),

    #[error("Recursive release of handle {0:#x}")]
    RecursiveRelease(usize),

    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("Class registry is frozen, cannot register `{0}`")]
    RegistryFrozen(String),

    #[error("Engine error: {0}")]
    Engine(EngineErrorCode),

    #[error("Class not found: {0}")]
    ClassNotFound(String),

    #[error("Method bind not found: {class}::{method} (hash {hash})")]
    MethodNotFound {
        class: String,
        method: String,
        hash: i64,
    },

    #[error("Singleton not found: {0}")]
    SingletonNotFound(String),

    #[error("Class already registered: {0}")]
    DuplicateClass(String),

    #[error("Index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("Call failed: {0}")]
    CallFailed(String),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Library error: {0}")]
    Library(String),
}

impl BindingError {
    /// 构造类型不匹配错误
    pub fn type_mismatch(expected: impl ToString, found: impl ToString) -> Self {
        Self::TypeMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    /// 是否为致命错误（模块无法继续工作）
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

/// 绑定层结果类型别名
pub type BindingResult<T> = Result<T, BindingError>;

macro_rules! engine_error_codes {
    ($($variant:ident = $value:literal => $text:literal,)*) => {
        /// 引擎自身的错误枚举
        ///
        /// 码值由引擎固定，绑定层原样透传。未知码值保存在 `Unknown` 中，
        /// `to_i64` 总是返回原始码值。
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum EngineErrorCode {
            $($variant,)*
            Unknown(i64),
        }

        impl EngineErrorCode {
            pub fn from_i64(code: i64) -> Self {
                match code {
                    $($value => Self::$variant,)*
                    other => Self::Unknown(other),
                }
            }

            pub fn to_i64(self) -> i64 {
                match self {
                    $(Self::$variant => $value,)*
                    Self::Unknown(other) => other,
                }
            }

            pub fn description(self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)*
                    Self::Unknown(_) => "unknown error",
                }
            }
        }
    };
}

engine_error_codes! {
    Ok = 0 => "ok",
    Failed = 1 => "failed",
    Unavailable = 2 => "unavailable",
    Unconfigured = 3 => "unconfigured",
    Unauthorized = 4 => "unauthorized",
    ParameterRangeError = 5 => "parameter range error",
    OutOfMemory = 6 => "out of memory",
    FileNotFound = 7 => "file not found",
    FileBadDrive = 8 => "file bad drive",
    FileBadPath = 9 => "file bad path",
    FileNoPermission = 10 => "file no permission",
    FileAlreadyInUse = 11 => "file already in use",
    FileCantOpen = 12 => "file can't open",
    FileCantWrite = 13 => "file can't write",
    FileCantRead = 14 => "file can't read",
    FileUnrecognized = 15 => "file unrecognized",
    FileCorrupt = 16 => "file corrupt",
    FileMissingDependencies = 17 => "file missing dependencies",
    FileEof = 18 => "end of file",
    CantOpen = 19 => "can't open",
    CantCreate = 20 => "can't create",
    QueryFailed = 21 => "query failed",
    AlreadyInUse = 22 => "already in use",
    Locked = 23 => "locked",
    Timeout = 24 => "timeout",
    CantConnect = 25 => "can't connect",
    CantResolve = 26 => "can't resolve",
    ConnectionError = 27 => "connection error",
    CantAcquireResource = 28 => "can't acquire resource",
    CantFork = 29 => "can't fork",
    InvalidData = 30 => "invalid data",
    InvalidParameter = 31 => "invalid parameter",
    AlreadyExists = 32 => "already exists",
    DoesNotExist = 33 => "does not exist",
    DatabaseCantRead = 34 => "database can't read",
    DatabaseCantWrite = 35 => "database can't write",
    CompilationFailed = 36 => "compilation failed",
    MethodNotFound = 37 => "method not found",
    LinkFailed = 38 => "link failed",
    ScriptFailed = 39 => "script failed",
    CyclicLink = 40 => "cyclic link",
    InvalidDeclaration = 41 => "invalid declaration",
    DuplicateSymbol = 42 => "duplicate symbol",
    ParseError = 43 => "parse error",
    Busy = 44 => "busy",
    Skip = 45 => "skip",
    Help = 46 => "help",
    Bug = 47 => "bug",
    PrinterOnFire = 48 => "printer on fire",
}

impl EngineErrorCode {
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }

    /// 将引擎返回的状态码转换为结果，非 OK 码值原样包装
    pub fn into_result(self) -> BindingResult<()> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(BindingError::Engine(self))
        }
    }
}

impl std::fmt::Display for EngineErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.description(), self.to_i64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_code_passthrough() {
        for code in -3..60 {
            assert_eq!(EngineErrorCode::from_i64(code).to_i64(), code);
        }
        assert_eq!(EngineErrorCode::from_i64(44), EngineErrorCode::Busy);
        assert_eq!(EngineErrorCode::from_i64(99), EngineErrorCode::Unknown(99));
    }

    #[test]
    fn test_into_result() {
        assert!(EngineErrorCode::Ok.into_result().is_ok());
        assert_eq!(
            EngineErrorCode::AlreadyExists.into_result(),
            Err(BindingError::Engine(EngineErrorCode::AlreadyExists))
        );
    }

    #[test]
    fn test_error_display() {
        let err = BindingError::UseAfterFree(0x1000);
        assert_eq!(
            err.to_string(),
            "Use after free: handle 0x1000 was already released"
        );
        assert!(BindingError::Configuration("mem_alloc".into()).is_fatal());
        assert!(!BindingError::NotReady("ABI table").is_fatal());
    }
}
