use crate::codegen::GlobalRef;
use crate::error::{FlowError, FlowResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Opaque handle of one installed module
///
/// Keys are allocated from a counter and never reused by an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleKey(u64);

impl ModuleKey {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ModuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module#{}", self.0)
    }
}

/// Runtime address of a resolved symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolAddress(usize);

impl SymbolAddress {
    pub fn from_ptr(ptr: *const u8) -> Self {
        Self(ptr as usize)
    }

    pub fn raw(&self) -> usize {
        self.0
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.0 as *const u8
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Reinterpret the address as a function pointer type.
    ///
    /// # Safety
    /// The address must point to code whose calling convention and signature
    /// match `F`, and the owning module must stay installed while the result
    /// is called.
    pub unsafe fn as_fn<F: Copy>(&self) -> F {
        debug_assert_eq!(std::mem::size_of::<F>(), std::mem::size_of::<usize>());
        std::mem::transmute_copy::<usize, F>(&self.0)
    }
}

impl fmt::Display for SymbolAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// What an exported symbol points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Function,
    Data,
}

/// One published export
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolEntry {
    pub key: ModuleKey,
    pub address: SymbolAddress,
    pub kind: SymbolKind,
}

/// Shared view of every symbol exported by installed modules.
///
/// This is the only state the execution role touches. Cloning is cheap and
/// clones can be sent to other threads; all of them observe installs and
/// removals as soon as the engine publishes them.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    inner: Arc<RwLock<HashMap<String, SymbolEntry>>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve an exported (mangled) name
    pub fn find_symbol(&self, name: &str) -> Option<SymbolAddress> {
        self.inner.read().get(name).map(|entry| entry.address)
    }

    /// Resolve a reference to a compiled global
    pub fn find_global(&self, global: &GlobalRef) -> Option<SymbolAddress> {
        self.find_symbol(&global.mangled())
    }

    /// Resolve a name that is expected to be installed
    pub fn get_symbol_address(&self, name: &str) -> FlowResult<SymbolAddress> {
        self.find_symbol(name)
            .ok_or_else(|| FlowError::UnresolvedAddress(name.to_string()))
    }

    /// Resolve a global that is expected to be installed
    pub fn get_global_address(&self, global: &GlobalRef) -> FlowResult<SymbolAddress> {
        self.get_symbol_address(&global.mangled())
    }

    pub fn entry(&self, name: &str) -> Option<SymbolEntry> {
        self.inner.read().get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Fail if any of `names` is exported by a module other than `except`
    pub(crate) fn check_collisions<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
        except: Option<ModuleKey>,
    ) -> FlowResult<()> {
        let table = self.inner.read();
        for name in names {
            if let Some(entry) = table.get(name) {
                if Some(entry.key) != except {
                    return Err(FlowError::DuplicateSymbol(name.to_string()));
                }
            }
        }
        Ok(())
    }

    /// Unpublish `retire` (if any) and publish `exports` under one write lock
    pub(crate) fn swap(&self, retire: Option<ModuleKey>, exports: &[(String, SymbolEntry)]) {
        let mut table = self.inner.write();
        if let Some(old) = retire {
            table.retain(|_, entry| entry.key != old);
        }
        for (name, entry) in exports {
            table.insert(name.clone(), *entry);
        }
    }

    pub(crate) fn unpublish(&self, key: ModuleKey) {
        self.inner.write().retain(|_, entry| entry.key != key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: u64, address: usize) -> SymbolEntry {
        SymbolEntry {
            key: ModuleKey::new(key),
            address: SymbolAddress(address),
            kind: SymbolKind::Function,
        }
    }

    #[test]
    fn test_swap_is_all_or_nothing() {
        let table = SymbolTable::new();
        table.swap(None, &[("n1.process".into(), entry(1, 0x1000))]);
        assert_eq!(table.find_symbol("n1.process"), Some(SymbolAddress(0x1000)));

        table.swap(
            Some(ModuleKey::new(1)),
            &[("n1.process".into(), entry(2, 0x2000))],
        );
        assert_eq!(table.find_symbol("n1.process"), Some(SymbolAddress(0x2000)));
        assert_eq!(table.len(), 1);

        table.unpublish(ModuleKey::new(2));
        assert!(table.is_empty());
        assert!(table.get_symbol_address("n1.process").unwrap_err().is_fatal());
    }

    #[test]
    fn test_collisions_ignore_replaced_module() {
        let table = SymbolTable::new();
        table.swap(None, &[("n1.gain".into(), entry(1, 0x10))]);

        assert!(table
            .check_collisions(["n1.gain"], Some(ModuleKey::new(1)))
            .is_ok());
        assert!(matches!(
            table.check_collisions(["n1.gain"], None),
            Err(FlowError::DuplicateSymbol(_))
        ));
    }

    #[test]
    fn test_global_lookup_uses_mangled_name() {
        let table = SymbolTable::new();
        table.swap(None, &[("n4.gain".into(), entry(3, 0x40))]);
        let global = GlobalRef::new("n4", "gain");
        assert_eq!(table.find_global(&global), Some(SymbolAddress(0x40)));
        assert!(table.find_global(&GlobalRef::new("n4", "other")).is_none());
    }
}
