use std::collections::BTreeMap;

use qs_core::QsValue;

use super::queue::{Frame, ScopeRef};

/// Case-insensitive variable scope. Keys are stored lowercased; the
/// values keep whatever casing their content has.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VarScope {
    values: BTreeMap<String, QsValue>,
}

impl VarScope {
    pub fn get(&self, name: &str) -> Option<QsValue> {
        self.values.get(&name.to_ascii_lowercase()).cloned()
    }

    pub fn set(&mut self, name: &str, value: QsValue) {
        self.values.insert(name.to_ascii_lowercase(), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<QsValue> {
        self.values.remove(&name.to_ascii_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(&name.to_ascii_lowercase())
    }

    pub fn to_map(&self) -> BTreeMap<String, QsValue> {
        self.values.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Index of the frame owning the scope that `from_index` resolves to.
/// Injected frames delegate to the nearest owning frame below them.
pub(crate) fn resolve_scope_index(frames: &[Frame], from_index: usize) -> usize {
    let mut index = from_index.min(frames.len().saturating_sub(1));
    while index > 0 && matches!(frames[index].scope, ScopeRef::Caller) {
        index -= 1;
    }
    index
}

pub(crate) fn empty_scope() -> &'static VarScope {
    static EMPTY: std::sync::OnceLock<VarScope> = std::sync::OnceLock::new();
    EMPTY.get_or_init(VarScope::default)
}

pub(crate) fn scope_at(frames: &[Frame], from_index: usize) -> &VarScope {
    let index = resolve_scope_index(frames, from_index);
    match &frames[index].scope {
        ScopeRef::Own(scope) => scope,
        // The bottom frame always owns its scope; this arm only exists
        // so resolution never panics on a malformed stack.
        ScopeRef::Caller => empty_scope(),
    }
}

pub(crate) fn scope_at_mut(frames: &mut [Frame], from_index: usize) -> &mut VarScope {
    let index = resolve_scope_index(frames, from_index);
    if matches!(frames[index].scope, ScopeRef::Caller) {
        frames[index].scope = ScopeRef::Own(VarScope::default());
    }
    match &mut frames[index].scope {
        ScopeRef::Own(scope) => scope,
        ScopeRef::Caller => unreachable!("caller scope was just replaced"),
    }
}

/// Loop variables the body sees, rebound on every iteration.
pub(crate) fn bind_repeat_vars(scope: &mut VarScope, index: usize, total: usize) {
    scope.set("repeat_index", QsValue::Number(index as f64));
    scope.set("repeat_total", QsValue::Number(total as f64));
}

pub(crate) fn bind_while_vars(scope: &mut VarScope, index: usize) {
    scope.set("while_index", QsValue::Number(index as f64));
}

pub(crate) fn bind_foreach_vars(
    scope: &mut VarScope,
    index: usize,
    total: usize,
    item: &QsValue,
) {
    scope.set("foreach_index", QsValue::Number(index as f64));
    scope.set("foreach_total", QsValue::Number(total as f64));
    scope.set("foreach_item", item.clone());
}
