//! 节点路径 NodePath
//!
//! 形如 `/root/Player/Sprite:texture:size` 的已解析路径：前导 `/` 表示绝对路径，
//! `/` 分隔节点名，`:` 之后是属性子名。

use super::builtin::{ctor, Backend, EngineBuiltin, EngineValue, NodePathKind};
use super::string::{engine_string, read_engine_string, string_from_path};
use crate::abi::sys::ConstTypePtr;
use crate::core::BindingResult;
use std::fmt;
use std::sync::Arc;

/// 解析后的路径
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedPath {
    pub absolute: bool,
    pub names: Vec<String>,
    pub subnames: Vec<String>,
}

impl ParsedPath {
    pub fn parse(text: &str) -> Self {
        let absolute = text.starts_with('/');
        let mut parts = text.split(':');
        let names = parts
            .next()
            .unwrap_or_default()
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        let subnames = parts.filter(|s| !s.is_empty()).map(str::to_string).collect();
        Self {
            absolute,
            names,
            subnames,
        }
    }

    /// 规范文本形式
    pub fn to_text(&self) -> String {
        let mut text = String::new();
        if self.absolute {
            text.push('/');
        }
        text.push_str(&self.names.join("/"));
        for sub in &self.subnames {
            text.push(':');
            text.push_str(sub);
        }
        text
    }

    pub fn is_empty(&self) -> bool {
        !self.absolute && self.names.is_empty() && self.subnames.is_empty()
    }
}

/// NodePath 的代理接口
pub trait NodePathProxy: Send + Sync + fmt::Debug {
    fn backend(&self) -> Backend;

    fn to_utf8(&self) -> BindingResult<String>;

    fn parsed(&self) -> BindingResult<ParsedPath>;

    fn engine_ptr(&self) -> Option<ConstTypePtr>;

    fn to_engine(&self) -> BindingResult<EngineBuiltin<NodePathKind>>;

    fn share(&self) -> Box<dyn NodePathProxy>;
}

fn engine_node_path(text: &str) -> BindingResult<EngineBuiltin<NodePathKind>> {
    let string = engine_string(text)?;
    EngineBuiltin::construct(ctor::FROM_OTHER, &[string.as_type_ptr()])
}

#[derive(Debug, Clone)]
pub struct EngineNodePath(EngineBuiltin<NodePathKind>);

impl NodePathProxy for EngineNodePath {
    fn backend(&self) -> Backend {
        Backend::Engine
    }

    fn to_utf8(&self) -> BindingResult<String> {
        let string = string_from_path(&self.0)?;
        read_engine_string(string.as_type_ptr())
    }

    fn parsed(&self) -> BindingResult<ParsedPath> {
        Ok(ParsedPath::parse(&self.to_utf8()?))
    }

    fn engine_ptr(&self) -> Option<ConstTypePtr> {
        Some(self.0.as_type_ptr())
    }

    fn to_engine(&self) -> BindingResult<EngineBuiltin<NodePathKind>> {
        self.0.try_clone()
    }

    fn share(&self) -> Box<dyn NodePathProxy> {
        Box::new(self.clone())
    }
}

#[derive(Debug, Clone)]
pub struct HostNodePath(Arc<ParsedPath>);

impl NodePathProxy for HostNodePath {
    fn backend(&self) -> Backend {
        Backend::Host
    }

    fn to_utf8(&self) -> BindingResult<String> {
        Ok(self.0.to_text())
    }

    fn parsed(&self) -> BindingResult<ParsedPath> {
        Ok((*self.0).clone())
    }

    fn engine_ptr(&self) -> Option<ConstTypePtr> {
        None
    }

    fn to_engine(&self) -> BindingResult<EngineBuiltin<NodePathKind>> {
        engine_node_path(&self.0.to_text())
    }

    fn share(&self) -> Box<dyn NodePathProxy> {
        Box::new(self.clone())
    }
}

/// 引擎 NodePath 值
pub struct NodePath {
    proxy: Box<dyn NodePathProxy>,
}

impl NodePath {
    pub fn new(text: &str) -> Self {
        Self::from_proxy(Box::new(HostNodePath(Arc::new(ParsedPath::parse(text)))))
    }

    pub fn new_engine(text: &str) -> BindingResult<Self> {
        Ok(Self::from_engine(engine_node_path(text)?))
    }

    pub fn from_proxy(proxy: Box<dyn NodePathProxy>) -> Self {
        Self { proxy }
    }

    pub fn to_utf8(&self) -> BindingResult<String> {
        self.proxy.to_utf8()
    }

    pub fn is_absolute(&self) -> BindingResult<bool> {
        Ok(self.proxy.parsed()?.absolute)
    }

    pub fn is_empty(&self) -> BindingResult<bool> {
        Ok(self.proxy.parsed()?.is_empty())
    }

    /// 节点名
    pub fn names(&self) -> BindingResult<Vec<String>> {
        Ok(self.proxy.parsed()?.names)
    }

    /// 属性子名
    pub fn subnames(&self) -> BindingResult<Vec<String>> {
        Ok(self.proxy.parsed()?.subnames)
    }
}

impl EngineValue for NodePath {
    type Kind = NodePathKind;

    fn backend(&self) -> Backend {
        self.proxy.backend()
    }

    fn engine_ptr(&self) -> Option<ConstTypePtr> {
        self.proxy.engine_ptr()
    }

    fn to_engine(&self) -> BindingResult<EngineBuiltin<NodePathKind>> {
        self.proxy.to_engine()
    }

    fn from_engine(value: EngineBuiltin<NodePathKind>) -> Self {
        Self::from_proxy(Box::new(EngineNodePath(value)))
    }
}

impl Clone for NodePath {
    fn clone(&self) -> Self {
        Self {
            proxy: self.proxy.share(),
        }
    }
}

impl Default for NodePath {
    fn default() -> Self {
        Self::new("")
    }
}

impl PartialEq for NodePath {
    fn eq(&self, other: &Self) -> bool {
        match (self.proxy.parsed(), other.proxy.parsed()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_utf8() {
            Ok(text) => write!(f, "NodePath({:?})", text),
            Err(_) => f.write_str("NodePath(<unreadable>)"),
        }
    }
}

impl From<&str> for NodePath {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_absolute_with_subnames() {
        let path = NodePath::new("/root/Player/Sprite:texture:size");
        assert!(path.is_absolute().unwrap());
        assert_eq!(path.names().unwrap(), vec!["root", "Player", "Sprite"]);
        assert_eq!(path.subnames().unwrap(), vec!["texture", "size"]);
        assert_eq!(path.to_utf8().unwrap(), "/root/Player/Sprite:texture:size");
    }

    #[test]
    fn test_parse_relative_and_empty() {
        let path = NodePath::new("../Enemy");
        assert!(!path.is_absolute().unwrap());
        assert_eq!(path.names().unwrap(), vec!["..", "Enemy"]);
        assert!(NodePath::default().is_empty().unwrap());
        assert_eq!(NodePath::new("a//b"), NodePath::new("a/b"));
    }
}
