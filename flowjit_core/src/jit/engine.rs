use super::intrinsics;
use super::lower::{self, Defined};
use super::plan::ModulePlan;
use super::resolver::LayeredResolver;
use super::symbol::{ModuleKey, SymbolAddress, SymbolEntry, SymbolTable};
use crate::codegen::GlobalRef;
use crate::config::RuntimeConfig;
use crate::error::{FlowError, FlowResult};
use cranelift::prelude::*;
use cranelift_jit::{JITBuilder, JITModule};
use std::collections::{BTreeMap, BTreeSet};

/// One installed module and the exports it published
pub struct InstalledModule {
    key: ModuleKey,
    unit: String,
    module: Option<JITModule>,
    exports: Vec<(String, SymbolEntry)>,
    /// Installed modules whose addresses were linked into this one
    providers: BTreeSet<ModuleKey>,
}

impl InstalledModule {
    pub fn key(&self) -> ModuleKey {
        self.key
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn exports(&self) -> &[(String, SymbolEntry)] {
        &self.exports
    }

    pub fn providers(&self) -> &BTreeSet<ModuleKey> {
        &self.providers
    }
}

impl Drop for InstalledModule {
    fn drop(&mut self) {
        if let Some(module) = self.module.take() {
            // Safety: the engine unpublishes every export before a module is
            // dropped, so no lookup can hand out these addresses any more.
            unsafe { module.free_memory() };
        }
    }
}

/// JIT engine: installs compiled units and resolves their symbols
///
/// Each installed unit lives in its own backend module so it can be freed on
/// its own. Linking resolves imports through a [`LayeredResolver`]; lookups
/// after installation only see installed exports.
///
/// Calls into sibling modules are linked against absolute addresses. A module
/// that is removed or replaced is unpublished at once, but its memory is kept
/// in `retired` until no live module links against it any more.
pub struct JitEngine {
    isa: isa::OwnedTargetIsa,
    resolver: LayeredResolver,
    symbols: SymbolTable,
    modules: BTreeMap<ModuleKey, InstalledModule>,
    retired: BTreeMap<ModuleKey, InstalledModule>,
    next_key: u64,
}

impl JitEngine {
    /// Create an engine for the host CPU with the standard resolver layers
    pub fn new(config: &RuntimeConfig) -> FlowResult<Self> {
        let process_symbols = config.process_symbols;
        Self::with_resolver(config, |table| {
            LayeredResolver::standard(table, process_symbols)
        })
    }

    /// Create an engine with a custom resolver built over the engine's symbol table
    pub fn with_resolver<F>(config: &RuntimeConfig, build: F) -> FlowResult<Self>
    where
        F: FnOnce(SymbolTable) -> FlowResult<LayeredResolver>,
    {
        let mut flag_builder = settings::builder();
        let flags = [
            ("opt_level", config.opt_level.as_setting()),
            ("enable_verifier", if config.verify_ir { "true" } else { "false" }),
            ("use_colocated_libcalls", "false"),
            ("is_pic", "false"),
        ];
        for (name, value) in flags {
            flag_builder
                .set(name, value)
                .map_err(|e| FlowError::backend(format!("Failed to set {}: {}", name, e)))?;
        }

        let isa = cranelift_native::builder()
            .map_err(|e| FlowError::backend(format!("Failed to create ISA builder: {}", e)))?
            .finish(settings::Flags::new(flag_builder))
            .map_err(|e| FlowError::backend(format!("Failed to create ISA: {}", e)))?;

        let symbols = SymbolTable::new();
        let resolver = build(symbols.clone())?;
        log::debug!(
            "JIT engine for {} (opt_level={}, resolver layers {:?})",
            isa.triple(),
            config.opt_level.as_setting(),
            resolver.layers()
        );

        Ok(Self {
            isa,
            resolver,
            symbols,
            modules: BTreeMap::new(),
            retired: BTreeMap::new(),
            next_key: 1,
        })
    }

    /// Link and install a module. Its exports become resolvable once this returns.
    pub fn add_module(&mut self, plan: ModulePlan) -> FlowResult<ModuleKey> {
        let installed = self.link(&plan, None)?;
        Ok(self.commit(installed, None))
    }

    /// Uninstall a module; none of its exports resolve afterwards.
    pub fn remove_module(&mut self, key: ModuleKey) -> FlowResult<()> {
        let module = self
            .modules
            .remove(&key)
            .ok_or_else(|| FlowError::not_found(key.to_string()))?;
        self.symbols.unpublish(key);
        log::debug!("removed {} ({})", key, module.unit);
        self.retire(module);
        Ok(())
    }

    /// Hot swap: link `plan`, then retire `old` and publish the new exports in
    /// one step. If linking fails, `old` stays installed untouched.
    pub fn replace_module(&mut self, old: ModuleKey, plan: ModulePlan) -> FlowResult<ModuleKey> {
        if !self.modules.contains_key(&old) {
            return Err(FlowError::not_found(old.to_string()));
        }
        let installed = self.link(&plan, Some(old))?;
        Ok(self.commit(installed, Some(old)))
    }

    /// Resolve a (mangled) name among installed modules
    pub fn find_symbol(&self, name: &str) -> Option<SymbolAddress> {
        self.symbols.find_symbol(name)
    }

    /// Resolve a compiled global among installed modules
    pub fn find_global(&self, global: &GlobalRef) -> Option<SymbolAddress> {
        self.symbols.find_global(global)
    }

    /// Resolve a name that must be installed
    pub fn get_symbol_address(&self, name: &str) -> FlowResult<SymbolAddress> {
        self.symbols.get_symbol_address(name)
    }

    /// Resolve a global that must be installed
    pub fn get_global_address(&self, global: &GlobalRef) -> FlowResult<SymbolAddress> {
        self.symbols.get_global_address(global)
    }

    /// Read handle for the execution role
    pub fn symbols(&self) -> SymbolTable {
        self.symbols.clone()
    }

    pub fn resolver(&self) -> &LayeredResolver {
        &self.resolver
    }

    pub fn is_installed(&self, key: ModuleKey) -> bool {
        self.modules.contains_key(&key)
    }

    pub fn module(&self, key: ModuleKey) -> Option<&InstalledModule> {
        self.modules.get(&key)
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Unpublished modules still kept alive for their dependents
    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }

    /// Installed modules that were linked against `key`
    pub fn dependents(&self, key: ModuleKey) -> Vec<ModuleKey> {
        self.modules
            .values()
            .filter(|m| m.providers.contains(&key))
            .map(|m| m.key)
            .collect()
    }

    /// Exported names of an installed module
    pub fn exports(&self, key: ModuleKey) -> Option<Vec<String>> {
        self.modules
            .get(&key)
            .map(|m| m.exports.iter().map(|(name, _)| name.clone()).collect())
    }

    fn allocate_key(&mut self) -> ModuleKey {
        let key = ModuleKey::new(self.next_key);
        self.next_key += 1;
        key
    }

    /// Resolve, compile and finalize a module without publishing anything
    fn link(
        &mut self,
        plan: &ModulePlan,
        replacing: Option<ModuleKey>,
    ) -> FlowResult<InstalledModule> {
        let unit = plan.unit().to_string();
        self.symbols
            .check_collisions(plan.export_names(), replacing)?;

        let resolved = self
            .resolver
            .resolve_all(&unit, plan.imports().keys().map(String::as_str))?;

        let providers = resolved
            .iter()
            .filter_map(|(name, address)| {
                self.symbols
                    .entry(name)
                    .filter(|entry| entry.address == *address)
                    .map(|entry| entry.key)
            })
            .collect();

        let mut builder =
            JITBuilder::with_isa(self.isa.clone(), cranelift_module::default_libcall_names());
        builder.symbols(intrinsics::libcall_symbols());
        builder.symbols(
            resolved
                .iter()
                .map(|(name, address)| (name.clone(), address.as_ptr())),
        );
        let mut module = JITModule::new(builder);

        let defined = match lower::define(&mut module, plan) {
            Ok(defined) => defined,
            Err(e) => {
                // Safety: nothing from this module has been handed out
                unsafe { module.free_memory() };
                return Err(e);
            }
        };
        if let Err(e) = module.finalize_definitions() {
            unsafe { module.free_memory() };
            return Err(FlowError::link(&unit, format!("Failed to finalize: {}", e)));
        }

        let key = self.allocate_key();
        let exports = defined
            .into_iter()
            .map(|(export, id)| {
                let address = match id {
                    Defined::Function(func_id) => module.get_finalized_function(func_id),
                    Defined::Data(data_id) => module.get_finalized_data(data_id).0 as *const u8,
                };
                let entry = SymbolEntry {
                    key,
                    address: SymbolAddress::from_ptr(address),
                    kind: export.kind,
                };
                (export.name, entry)
            })
            .collect();

        Ok(InstalledModule {
            key,
            unit,
            module: Some(module),
            exports,
            providers,
        })
    }

    fn commit(&mut self, installed: InstalledModule, replaced: Option<ModuleKey>) -> ModuleKey {
        let key = installed.key;
        self.symbols.swap(replaced, &installed.exports);
        log::debug!(
            "installed {} as {} ({} exports)",
            installed.unit,
            key,
            installed.exports.len()
        );
        self.modules.insert(key, installed);

        if let Some(old) = replaced {
            if let Some(module) = self.modules.remove(&old) {
                log::debug!("replaced {} ({})", old, module.unit);
                self.retire(module);
            }
        }
        key
    }

    /// Park an unpublished module, then free every parked module that no
    /// live module can reach through its links
    fn retire(&mut self, module: InstalledModule) {
        self.retired.insert(module.key, module);

        let mut live: BTreeSet<ModuleKey> = BTreeSet::new();
        let mut stack: Vec<ModuleKey> = self.modules.keys().copied().collect();
        while let Some(key) = stack.pop() {
            if !live.insert(key) {
                continue;
            }
            let providers = self
                .modules
                .get(&key)
                .or_else(|| self.retired.get(&key))
                .map(|m| &m.providers);
            if let Some(providers) = providers {
                stack.extend(providers.iter().copied());
            }
        }

        let dead: Vec<ModuleKey> = self
            .retired
            .keys()
            .filter(|key| !live.contains(key))
            .copied()
            .collect();
        for key in dead {
            if let Some(module) = self.retired.remove(&key) {
                log::trace!("freed {} ({})", key, module.unit);
            }
        }
        if !self.retired.is_empty() {
            log::debug!("{} retired module(s) kept for linked dependents", self.retired.len());
        }
    }
}

impl Drop for JitEngine {
    fn drop(&mut self) {
        // Symbol table handles may outlive the engine
        for key in self.modules.keys() {
            self.symbols.unpublish(*key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::{Expr, Intrinsic, UnitDescription};
    use crate::jit::plan::plan;
    use crate::jit::resolver::{FallbackSymbols, InstalledSymbols};
    use approx::assert_relative_eq;

    type Process = extern "C" fn(*mut f32);
    type Unary = extern "C" fn(f32) -> f32;

    fn engine() -> JitEngine {
        JitEngine::with_resolver(&RuntimeConfig::default(), |table| {
            Ok(LayeredResolver::new()
                .with_layer(InstalledSymbols::new(table))
                .with_layer(FallbackSymbols))
        })
        .unwrap()
    }

    fn scale_unit(unit: &str, factor: f32) -> ModulePlan {
        plan(
            UnitDescription::builder(unit)
                .function("scale", 1, Expr::mul(Expr::arg(0), Expr::constant(factor)))
                .build(),
        )
        .unwrap()
    }

    fn call_unary(engine: &JitEngine, name: &str, x: f32) -> f32 {
        let f = unsafe { engine.get_symbol_address(name).unwrap().as_fn::<Unary>() };
        f(x)
    }

    #[test]
    fn test_process_entry_writes_outputs() {
        let mut engine = engine();
        let desc = UnitDescription::builder("n1")
            .controls(2)
            .output(
                1,
                Expr::add(
                    Expr::mul(Expr::control(0), Expr::constant(2.0)),
                    Expr::intrinsic(Intrinsic::Sin, vec![Expr::control(0)]),
                ),
            )
            .build();
        let key = engine.add_module(plan(desc).unwrap()).unwrap();
        assert!(engine.is_installed(key));
        assert_eq!(engine.exports(key).unwrap(), vec!["n1.process".to_string()]);

        let process = unsafe { engine.get_symbol_address("n1.process").unwrap().as_fn::<Process>() };
        let mut slots = [0.5f32, 0.0];
        process(slots.as_mut_ptr());
        assert_relative_eq!(slots[1], 1.0 + 0.5f32.sin(), epsilon = 1e-6);
        assert_eq!(slots[0], 0.5);
    }

    #[test]
    fn test_lookup_is_stable_until_removed() {
        let mut engine = engine();
        let key = engine.add_module(scale_unit("n1", 2.0)).unwrap();

        let first = engine.find_symbol("n1.scale").unwrap();
        for _ in 0..5 {
            assert_eq!(engine.find_symbol("n1.scale"), Some(first));
        }
        assert_eq!(call_unary(&engine, "n1.scale", 4.0), 8.0);

        engine.remove_module(key).unwrap();
        assert!(engine.find_symbol("n1.scale").is_none());
        assert!(engine.get_symbol_address("n1.scale").unwrap_err().is_fatal());
        assert!(engine.remove_module(key).unwrap_err().is_not_found());
        assert_eq!(engine.module_count(), 0);
        assert_eq!(engine.retired_count(), 0);
    }

    #[test]
    fn test_fallback_is_not_a_lookup_layer() {
        let engine = engine();
        assert!(engine.find_symbol("sinf").is_none());
    }

    #[test]
    fn test_replace_swaps_address_and_key() {
        let mut engine = engine();
        let old = engine.add_module(scale_unit("n1", 2.0)).unwrap();
        let old_address = engine.find_symbol("n1.scale").unwrap();

        let new = engine.replace_module(old, scale_unit("n1", 5.0)).unwrap();
        assert_ne!(old, new);
        assert!(!engine.is_installed(old));
        assert!(engine.is_installed(new));
        assert_ne!(engine.find_symbol("n1.scale"), Some(old_address));
        assert_eq!(call_unary(&engine, "n1.scale", 2.0), 10.0);
        assert_eq!(engine.module_count(), 1);
    }

    #[test]
    fn test_failed_replace_keeps_old_module() {
        let mut engine = engine();
        let old = engine.add_module(scale_unit("n1", 2.0)).unwrap();
        let address = engine.find_symbol("n1.scale").unwrap();

        let broken = plan(
            UnitDescription::builder("n1")
                .function(
                    "scale",
                    1,
                    Expr::call(GlobalRef::new("n9", "missing"), vec![Expr::arg(0)]),
                )
                .build(),
        )
        .unwrap();
        let err = engine.replace_module(old, broken).unwrap_err();
        assert!(err.is_unresolved_symbol());
        assert!(engine.is_installed(old));
        assert_eq!(engine.find_symbol("n1.scale"), Some(address));
        assert_eq!(call_unary(&engine, "n1.scale", 1.5), 3.0);
    }

    #[test]
    fn test_duplicate_exports_are_rejected() {
        let mut engine = engine();
        engine.add_module(scale_unit("n1", 2.0)).unwrap();
        let err = engine.add_module(scale_unit("n1", 3.0)).unwrap_err();
        assert!(matches!(err, FlowError::DuplicateSymbol(ref name) if name == "n1.scale"));
        assert_eq!(engine.module_count(), 1);
    }

    #[test]
    fn test_replaced_provider_stays_alive_for_dependents() {
        let mut engine = engine();
        let provider = engine.add_module(scale_unit("n2", 3.0)).unwrap();
        let caller_plan = || {
            plan(
                UnitDescription::builder("n1")
                    .function(
                        "run",
                        1,
                        Expr::call(GlobalRef::new("n2", "scale"), vec![Expr::arg(0)]),
                    )
                    .build(),
            )
            .unwrap()
        };
        let caller = engine.add_module(caller_plan()).unwrap();
        assert!(engine.module(caller).unwrap().providers().contains(&provider));
        assert_eq!(engine.dependents(provider), vec![caller]);
        assert_eq!(call_unary(&engine, "n1.run", 2.0), 6.0);

        let provider = engine.replace_module(provider, scale_unit("n2", 4.0)).unwrap();
        assert_eq!(engine.retired_count(), 1);
        assert_eq!(call_unary(&engine, "n1.run", 2.0), 6.0);

        let caller = engine.replace_module(caller, caller_plan()).unwrap();
        assert_eq!(engine.retired_count(), 0);
        assert_eq!(engine.dependents(provider), vec![caller]);
        assert_eq!(call_unary(&engine, "n1.run", 2.0), 8.0);
    }

    #[test]
    fn test_state_data_is_exported() {
        let mut engine = engine();
        let mut desc = UnitDescription::builder("n1")
            .function("f", 0, Expr::active_count("g1"))
            .build();
        desc.ensure_state(crate::codegen::StateDef::with_initial("g1", vec![0b1011]));
        engine.add_module(plan(desc).unwrap()).unwrap();

        let address = engine.get_symbol_address("n1.g1").unwrap();
        assert_eq!(address.raw() % 8, 0);
        let word = unsafe { *(address.as_ptr() as *const u32) };
        assert_eq!(word, 0b1011);

        let f = unsafe {
            engine
                .get_symbol_address("n1.f")
                .unwrap()
                .as_fn::<extern "C" fn() -> f32>()
        };
        assert_eq!(f(), 3.0);
    }
}
