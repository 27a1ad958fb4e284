use std::collections::HashMap;
use std::sync::Arc;

use crate::types::CommandDescriptor;

/// Process-wide command contract table. Lookup is case-insensitive;
/// descriptors are immutable once registered.
#[derive(Debug, Default, Clone)]
pub struct CommandRegistry {
    by_name: HashMap<String, Arc<CommandDescriptor>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a descriptor. Returns `false` (and leaves the existing
    /// descriptor untouched) when the name is already taken; the caller
    /// is expected to surface that as a warning.
    pub fn register(&mut self, descriptor: CommandDescriptor) -> bool {
        let key = descriptor.name.to_ascii_lowercase();
        if self.by_name.contains_key(&key) {
            return false;
        }
        self.by_name.insert(key, Arc::new(descriptor));
        true
    }

    /// Removing an unknown name is a silent no-op.
    pub fn unregister(&mut self, name: &str) {
        self.by_name.remove(&name.to_ascii_lowercase());
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<CommandDescriptor>> {
        self.by_name.get(&name.to_ascii_lowercase()).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(&name.to_ascii_lowercase())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names = self
            .by_name
            .values()
            .map(|descriptor| descriptor.name.clone())
            .collect::<Vec<_>>();
        names.sort();
        names
    }
}
