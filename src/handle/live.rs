//! 活跃句柄计数
//!
//! 按地址统计已 pack 尚未 end 的句柄，用于 Shared 引用的 pack/end 平衡检查和泄漏诊断。

use super::{EngineHandle, Ownership};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveCounts {
    pub host: usize,
    pub engine: usize,
    pub shared: usize,
}

impl LiveCounts {
    pub fn total(&self) -> usize {
        self.host + self.engine + self.shared
    }

    fn slot(&mut self, ownership: Ownership) -> &mut usize {
        match ownership {
            Ownership::Host => &mut self.host,
            Ownership::Engine => &mut self.engine,
            Ownership::Shared => &mut self.shared,
        }
    }
}

static LIVE: Mutex<Option<HashMap<usize, LiveCounts>>> = Mutex::new(None);

pub(crate) fn register(handle: EngineHandle, ownership: Ownership) {
    let mut guard = LIVE.lock().unwrap_or_else(|e| e.into_inner());
    let counts = guard
        .get_or_insert_with(HashMap::new)
        .entry(handle.addr())
        .or_default();
    if ownership == Ownership::Host && counts.host > 0 {
        tracing::warn!(
            target: "handle",
            addr = format_args!("{:#x}", handle.addr()),
            "Object packed with Host ownership more than once"
        );
    }
    *counts.slot(ownership) += 1;
}

pub(crate) fn unregister(handle: EngineHandle, ownership: Ownership) {
    let mut guard = LIVE.lock().unwrap_or_else(|e| e.into_inner());
    let Some(map) = guard.as_mut() else {
        return;
    };
    if let Some(counts) = map.get_mut(&handle.addr()) {
        let slot = counts.slot(ownership);
        *slot = slot.saturating_sub(1);
        if counts.total() == 0 {
            map.remove(&handle.addr());
        }
    }
}

/// 某地址上各种所有权的活跃句柄数
pub fn live_counts(handle: EngineHandle) -> LiveCounts {
    LIVE.lock()
        .unwrap_or_else(|e| e.into_inner())
        .as_ref()
        .and_then(|map| map.get(&handle.addr()).copied())
        .unwrap_or_default()
}

/// 某地址上的活跃句柄总数
pub fn live_count(handle: EngineHandle) -> usize {
    live_counts(handle).total()
}

/// 清空计数（测试在场景之间使用）
pub fn reset() {
    *LIVE.lock().unwrap_or_else(|e| e.into_inner()) = None;
}
