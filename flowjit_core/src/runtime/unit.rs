use crate::error::{FlowError, FlowResult};
use crate::jit::{JitEngine, ModuleKey, ModulePlan, SymbolAddress};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Clone, Copy)]
struct StateHandle {
    address: SymbolAddress,
    words: usize,
}

/// The installed module of one compiled unit.
///
/// Two update paths: [`rebuild`](Self::rebuild) swaps in newly compiled code,
/// [`push_state`](Self::push_state) rewrites live state words of the installed
/// module without compiling anything.
#[derive(Debug)]
pub struct RuntimeUnit {
    name: String,
    key: Option<ModuleKey>,
    state: BTreeMap<String, StateHandle>,
}

impl RuntimeUnit {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: None,
            state: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> Option<ModuleKey> {
        self.key
    }

    pub fn is_installed(&self) -> bool {
        self.key.is_some()
    }

    /// Install `plan`, atomically replacing the current module if there is one.
    /// On failure the current module stays installed.
    pub fn rebuild(&mut self, engine: &mut JitEngine, plan: ModulePlan) -> FlowResult<ModuleKey> {
        if plan.unit() != self.name {
            return Err(FlowError::codegen(
                plan.unit(),
                format!("description compiled for unit '{}'", self.name),
            ));
        }
        let blocks: Vec<(String, String, usize)> = plan
            .description()
            .state
            .iter()
            .map(|def| (def.name.clone(), plan.description().mangled(&def.name), def.words()))
            .collect();

        let key = match self.key {
            Some(old) => engine.replace_module(old, plan)?,
            None => engine.add_module(plan)?,
        };
        self.key = Some(key);

        self.state.clear();
        for (local, mangled, words) in blocks {
            let address = engine.get_symbol_address(&mangled)?;
            self.state.insert(local, StateHandle { address, words });
        }
        Ok(key)
    }

    /// Remove the installed module, if any
    pub fn uninstall(&mut self, engine: &mut JitEngine) -> FlowResult<()> {
        self.state.clear();
        match self.key.take() {
            Some(key) => engine.remove_module(key),
            None => Ok(()),
        }
    }

    pub fn has_state(&self, name: &str) -> bool {
        self.state.contains_key(name)
    }

    pub fn state_names(&self) -> impl Iterator<Item = &str> {
        self.state.keys().map(String::as_str)
    }

    pub fn state_address(&self, name: &str) -> Option<SymbolAddress> {
        self.state.get(name).map(|handle| handle.address)
    }

    /// Write live state into the installed module. Each word is one atomic
    /// store, so running code sees either the old or the new word.
    pub fn push_state(&self, name: &str, words: &[u32]) -> FlowResult<()> {
        let handle = self.handle(name)?;
        if words.len() > handle.words {
            return Err(FlowError::invalid_input(format!(
                "{}.{} holds {} words, got {}",
                self.name,
                name,
                handle.words,
                words.len()
            )));
        }
        for (index, word) in words.iter().enumerate() {
            // Safety: the block is 8-byte aligned, `handle.words` long and
            // stays mapped while `self.key` is set
            unsafe { word_at(handle.address, index) }.store(*word, Ordering::Release);
        }
        log::trace!("{}.{} <- {:?}", self.name, name, words);
        Ok(())
    }

    pub fn read_state(&self, name: &str) -> Option<Vec<u32>> {
        let handle = self.handle(name).ok()?;
        Some(
            (0..handle.words)
                .map(|index| unsafe { word_at(handle.address, index) }.load(Ordering::Acquire))
                .collect(),
        )
    }

    fn handle(&self, name: &str) -> FlowResult<StateHandle> {
        self.state
            .get(name)
            .copied()
            .ok_or_else(|| FlowError::not_found(format!("state block {}.{}", self.name, name)))
    }
}

/// # Safety
/// `base` must point to at least `index + 1` live, aligned u32 words
unsafe fn word_at<'a>(base: SymbolAddress, index: usize) -> &'a AtomicU32 {
    &*(base.as_ptr() as *const AtomicU32).add(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::{Expr, StateDef, UnitDescription};
    use crate::config::RuntimeConfig;
    use crate::jit::{plan, FallbackSymbols, InstalledSymbols, LayeredResolver};

    fn engine() -> JitEngine {
        JitEngine::with_resolver(&RuntimeConfig::default(), |table| {
            Ok(LayeredResolver::new()
                .with_layer(InstalledSymbols::new(table))
                .with_layer(FallbackSymbols))
        })
        .unwrap()
    }

    fn counting_unit(initial: u32) -> ModulePlan {
        let mut desc = UnitDescription::builder("n1")
            .function("count", 0, Expr::active_count("g2"))
            .build();
        desc.ensure_state(StateDef::with_initial("g2", vec![initial]));
        plan(desc).unwrap()
    }

    fn count(engine: &JitEngine) -> f32 {
        let f = unsafe {
            engine
                .get_symbol_address("n1.count")
                .unwrap()
                .as_fn::<extern "C" fn() -> f32>()
        };
        f()
    }

    #[test]
    fn test_push_state_without_recompile() {
        let mut engine = engine();
        let mut unit = RuntimeUnit::new("n1");
        let key = unit.rebuild(&mut engine, counting_unit(0b1)).unwrap();
        assert_eq!(count(&engine), 1.0);

        unit.push_state("g2", &[0b1110]).unwrap();
        assert_eq!(unit.key(), Some(key));
        assert_eq!(unit.read_state("g2"), Some(vec![0b1110]));
        assert_eq!(count(&engine), 3.0);

        assert!(unit.push_state("g9", &[1]).unwrap_err().is_not_found());
        assert!(unit.push_state("g2", &[1, 2]).is_err());
    }

    #[test]
    fn test_rebuild_replaces_and_refreshes_handles() {
        let mut engine = engine();
        let mut unit = RuntimeUnit::new("n1");
        let first = unit.rebuild(&mut engine, counting_unit(0)).unwrap();
        let old_address = unit.state_address("g2").unwrap();

        let second = unit.rebuild(&mut engine, counting_unit(0b11)).unwrap();
        assert_ne!(first, second);
        assert!(!engine.is_installed(first));
        assert_ne!(unit.state_address("g2"), Some(old_address));
        assert_eq!(count(&engine), 2.0);

        unit.uninstall(&mut engine).unwrap();
        assert!(!unit.is_installed());
        assert!(unit.read_state("g2").is_none());
        assert_eq!(engine.module_count(), 0);
    }

    #[test]
    fn test_rebuild_rejects_foreign_unit() {
        let mut engine = engine();
        let mut unit = RuntimeUnit::new("n5");
        let err = unit.rebuild(&mut engine, counting_unit(0)).unwrap_err();
        assert!(err.is_retryable());
        assert!(!unit.is_installed());
    }
}
