//! 引擎类描述清单
//!
//! 引擎导出的结构化清单：类、方法、属性、信号、枚举与常量。包装层与类注册表
//! 都从这里读取方法哈希和参数类型。

pub mod type_map;

pub use type_map::{EngineType, PackRule, TypeMap, TypeMapping, UnpackRule};

use crate::core::{BindingError, BindingResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, OnceLock};

/// 随库分发的清单
const EMBEDDED_MANIFEST: &str = include_str!("../classes/extension_api.json");

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub classes: Vec<ClassDecl>,
    #[serde(default)]
    pub singletons: Vec<SingletonDecl>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassDecl {
    pub name: String,
    #[serde(default)]
    pub inherits: Option<String>,
    #[serde(default)]
    pub is_refcounted: bool,
    #[serde(default)]
    pub is_instantiable: bool,
    #[serde(default)]
    pub methods: Vec<MethodDecl>,
    #[serde(default)]
    pub properties: Vec<PropertyDecl>,
    #[serde(default)]
    pub signals: Vec<SignalDecl>,
    #[serde(default)]
    pub enums: Vec<EnumDecl>,
    #[serde(default)]
    pub constants: Vec<ConstantDecl>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MethodDecl {
    pub name: String,
    #[serde(default)]
    pub arguments: Vec<ArgumentDecl>,
    #[serde(default)]
    pub return_value: Option<ReturnDecl>,
    #[serde(default)]
    pub is_virtual: bool,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub is_vararg: bool,
    #[serde(default)]
    pub is_const: bool,
    #[serde(default)]
    pub hash: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArgumentDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub default_value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReturnDecl {
    #[serde(rename = "type")]
    pub ty: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub setter: String,
    #[serde(default)]
    pub getter: String,
    #[serde(default)]
    pub index: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalDecl {
    pub name: String,
    #[serde(default)]
    pub arguments: Vec<ArgumentDecl>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnumDecl {
    pub name: String,
    #[serde(default)]
    pub values: Vec<EnumValue>,
    #[serde(default)]
    pub is_bitfield: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnumValue {
    pub name: String,
    pub value: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstantDecl {
    pub name: String,
    pub value: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SingletonDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

impl Manifest {
    pub fn from_json_str(json: &str) -> BindingResult<Self> {
        serde_json::from_str(json).map_err(|e| BindingError::Manifest(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> BindingResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| BindingError::Manifest(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&content)
    }

    /// 随库分发的清单（解析一次）
    pub fn embedded() -> BindingResult<Arc<Manifest>> {
        static EMBEDDED: OnceLock<Arc<Manifest>> = OnceLock::new();
        if let Some(manifest) = EMBEDDED.get() {
            return Ok(manifest.clone());
        }
        let manifest = Arc::new(Self::from_json_str(EMBEDDED_MANIFEST)?);
        Ok(EMBEDDED.get_or_init(|| manifest).clone())
    }

    /// 按配置加载：指定了路径时读取文件，否则使用随库清单
    pub fn load(path: Option<&Path>) -> BindingResult<Arc<Manifest>> {
        match path {
            Some(path) => Ok(Arc::new(Self::from_file(path)?)),
            None => Self::embedded(),
        }
    }

    pub fn class(&self, name: &str) -> Option<&ClassDecl> {
        self.classes.iter().find(|c| c.name == name)
    }

    /// 祖先链（不含自身），由近及远
    pub fn ancestors(&self, name: &str) -> Vec<&str> {
        let mut chain = Vec::new();
        let mut current = self.class(name).and_then(|c| c.inherits.as_deref());
        while let Some(parent) = current {
            if chain.contains(&parent) {
                break;
            }
            chain.push(parent);
            current = self.class(parent).and_then(|c| c.inherits.as_deref());
        }
        chain
    }

    /// 在类及其祖先中查找方法
    pub fn find_method(&self, class: &str, method: &str) -> Option<(&ClassDecl, &MethodDecl)> {
        std::iter::once(class)
            .chain(self.ancestors(class))
            .filter_map(|name| self.class(name))
            .find_map(|decl| decl.method(method).map(|m| (decl, m)))
    }
}

impl ClassDecl {
    pub fn method(&self, name: &str) -> Option<&MethodDecl> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn virtual_methods(&self) -> impl Iterator<Item = &MethodDecl> {
        self.methods.iter().filter(|m| m.is_virtual)
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDecl> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn signal(&self, name: &str) -> Option<&SignalDecl> {
        self.signals.iter().find(|s| s.name == name)
    }

    pub fn constant(&self, name: &str) -> Option<i64> {
        self.constants.iter().find(|c| c.name == name).map(|c| c.value)
    }
}

impl MethodDecl {
    pub fn return_type(&self) -> &str {
        self.return_value.as_ref().map(|r| r.ty.as_str()).unwrap_or("void")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_manifest_parses() {
        let manifest = Manifest::embedded().unwrap();
        let library = manifest.class("AnimationLibrary").unwrap();
        assert_eq!(library.inherits.as_deref(), Some("Resource"));
        assert!(library.is_refcounted);
        assert!(library.method("add_animation").unwrap().hash != 0);
        assert!(library.signal("animation_added").is_some());
        assert_eq!(
            manifest.ancestors("AnimationLibrary"),
            vec!["Resource", "RefCounted", "Object"]
        );
    }

    #[test]
    fn test_find_inherited_method() {
        let manifest = Manifest::embedded().unwrap();
        let (owner, method) = manifest.find_method("Node2D", "get_instance_id").unwrap();
        assert_eq!(owner.name, "Object");
        assert_eq!(method.return_type(), "int");
    }

    #[test]
    fn test_virtuals_listed() {
        let manifest = Manifest::embedded().unwrap();
        let profiler = manifest.class("EngineProfiler").unwrap();
        let names: Vec<_> = profiler.virtual_methods().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["_toggle", "_add_frame", "_tick"]);
    }

    #[test]
    fn test_malformed_manifest_is_error() {
        assert!(matches!(
            Manifest::from_json_str("{ not json"),
            Err(BindingError::Manifest(_))
        ));
    }
}
