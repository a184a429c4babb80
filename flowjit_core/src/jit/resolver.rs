use super::intrinsics;
use super::symbol::{SymbolAddress, SymbolTable};
use crate::error::{FlowError, FlowResult};
use std::collections::BTreeMap;

#[cfg(unix)]
use libloading::os::unix::Library as ProcessLibrary;
#[cfg(windows)]
use libloading::os::windows::Library as ProcessLibrary;

/// One strategy for turning a symbol name into an address while linking
pub trait SymbolResolver: Send + Sync {
    /// Short name used in logs
    fn layer(&self) -> &'static str;

    fn resolve(&self, name: &str) -> Option<SymbolAddress>;
}

/// Exports of modules already installed in the engine.
///
/// Lets a freshly compiled unit call into sibling units.
pub struct InstalledSymbols {
    table: SymbolTable,
}

impl InstalledSymbols {
    pub fn new(table: SymbolTable) -> Self {
        Self { table }
    }
}

impl SymbolResolver for InstalledSymbols {
    fn layer(&self) -> &'static str {
        "installed"
    }

    fn resolve(&self, name: &str) -> Option<SymbolAddress> {
        self.table.find_symbol(name)
    }
}

/// The dynamic symbol table of the running process
pub struct ProcessSymbols {
    library: ProcessLibrary,
}

impl ProcessSymbols {
    pub fn open() -> FlowResult<Self> {
        #[cfg(unix)]
        let library = ProcessLibrary::this();
        #[cfg(windows)]
        let library = ProcessLibrary::this()
            .map_err(|e| FlowError::backend(format!("Failed to open process symbols: {}", e)))?;
        Ok(Self { library })
    }
}

impl SymbolResolver for ProcessSymbols {
    fn layer(&self) -> &'static str {
        "process"
    }

    fn resolve(&self, name: &str) -> Option<SymbolAddress> {
        // Safety: the symbol is only read as an address, never called here
        let symbol = unsafe { self.library.get::<*const u8>(name.as_bytes()) }.ok()?;
        let address = SymbolAddress::from_ptr(*symbol);
        (!address.is_null()).then_some(address)
    }
}

/// Fixed table of numeric intrinsics
#[derive(Debug, Default, Clone, Copy)]
pub struct FallbackSymbols;

impl SymbolResolver for FallbackSymbols {
    fn layer(&self) -> &'static str {
        "fallback"
    }

    fn resolve(&self, name: &str) -> Option<SymbolAddress> {
        intrinsics::lookup(name)
    }
}

/// Where a name was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub address: SymbolAddress,
    pub layer: &'static str,
}

/// Ordered list of resolvers; the first layer that knows a name wins.
#[derive(Default)]
pub struct LayeredResolver {
    layers: Vec<Box<dyn SymbolResolver>>,
}

impl LayeredResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installed modules, then (optionally) the process, then the fallback table
    pub fn standard(table: SymbolTable, process_symbols: bool) -> FlowResult<Self> {
        let mut resolver = Self::new().with_layer(InstalledSymbols::new(table));
        if process_symbols {
            resolver.push(ProcessSymbols::open()?);
        }
        resolver.push(FallbackSymbols);
        Ok(resolver)
    }

    pub fn with_layer(mut self, layer: impl SymbolResolver + 'static) -> Self {
        self.push(layer);
        self
    }

    pub fn push(&mut self, layer: impl SymbolResolver + 'static) {
        self.layers.push(Box::new(layer));
    }

    pub fn layers(&self) -> Vec<&'static str> {
        self.layers.iter().map(|l| l.layer()).collect()
    }

    pub fn resolve(&self, name: &str) -> Option<Resolution> {
        self.layers.iter().find_map(|layer| {
            layer.resolve(name).map(|address| Resolution {
                address,
                layer: layer.layer(),
            })
        })
    }

    /// Resolve every name or report all the missing ones at once
    pub fn resolve_all<'a>(
        &self,
        unit: &str,
        names: impl IntoIterator<Item = &'a str>,
    ) -> FlowResult<BTreeMap<String, SymbolAddress>> {
        let mut resolved = BTreeMap::new();
        let mut missing = Vec::new();
        for name in names {
            match self.resolve(name) {
                Some(resolution) => {
                    log::trace!(
                        "{}: '{}' resolved by {} layer at {}",
                        unit,
                        name,
                        resolution.layer,
                        resolution.address
                    );
                    resolved.insert(name.to_string(), resolution.address);
                }
                None => missing.push(name.to_string()),
            }
        }
        if missing.is_empty() {
            Ok(resolved)
        } else {
            Err(FlowError::UnresolvedSymbol {
                unit: unit.to_string(),
                symbols: missing,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jit::symbol::{ModuleKey, SymbolEntry, SymbolKind};

    struct Fixed(&'static str, usize);

    impl SymbolResolver for Fixed {
        fn layer(&self) -> &'static str {
            "fixed"
        }

        fn resolve(&self, name: &str) -> Option<SymbolAddress> {
            (name == self.0).then(|| SymbolAddress::from_ptr(self.1 as *const u8))
        }
    }

    #[test]
    fn test_first_layer_wins() {
        let resolver = LayeredResolver::new()
            .with_layer(Fixed("sinf", 0x10))
            .with_layer(FallbackSymbols);

        let hit = resolver.resolve("sinf").unwrap();
        assert_eq!(hit.layer, "fixed");
        assert_eq!(hit.address.raw(), 0x10);

        let hit = resolver.resolve("cosf").unwrap();
        assert_eq!(hit.layer, "fallback");
        assert_eq!(hit.address, intrinsics::lookup("cosf").unwrap());
    }

    #[test]
    fn test_installed_layer_sees_published_exports() {
        let table = SymbolTable::new();
        let resolver = LayeredResolver::new()
            .with_layer(InstalledSymbols::new(table.clone()))
            .with_layer(FallbackSymbols);
        assert!(resolver.resolve("n2.gain").is_none());

        let entry = SymbolEntry {
            key: ModuleKey::new(9),
            address: SymbolAddress::from_ptr(0x99 as *const u8),
            kind: SymbolKind::Function,
        };
        table.swap(None, &[("n2.gain".to_string(), entry)]);
        assert_eq!(resolver.resolve("n2.gain").unwrap().layer, "installed");
    }

    #[test]
    fn test_resolve_all_lists_every_missing_name() {
        let resolver = LayeredResolver::new().with_layer(FallbackSymbols);
        let err = resolver
            .resolve_all("n1", ["powf", "n9.gain", "frobf"])
            .unwrap_err();
        match err {
            FlowError::UnresolvedSymbol { unit, symbols } => {
                assert_eq!(unit, "n1");
                assert_eq!(symbols, vec!["n9.gain".to_string(), "frobf".to_string()]);
            }
            other => panic!("unexpected error: {}", other),
        }

        let ok = resolver.resolve_all("n1", ["powf", "rand"]).unwrap();
        assert_eq!(ok.len(), 2);
    }

    #[test]
    fn test_standard_layer_order() {
        let resolver = LayeredResolver::standard(SymbolTable::new(), true).unwrap();
        assert_eq!(resolver.layers(), vec!["installed", "process", "fallback"]);

        let resolver = LayeredResolver::standard(SymbolTable::new(), false).unwrap();
        assert_eq!(resolver.layers(), vec!["installed", "fallback"]);
        assert!(resolver.resolve("definitely_not_a_symbol_7f3a").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_process_layer_precedes_fallback() {
        let resolver = LayeredResolver::standard(SymbolTable::new(), true).unwrap();
        for name in ["sinf", "powf", "rand"] {
            let hit = resolver.resolve(name).unwrap();
            assert_eq!(hit.layer, "process", "{}", name);
        }
    }
}
