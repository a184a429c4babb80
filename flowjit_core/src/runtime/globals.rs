use super::unit::RuntimeUnit;
use crate::codegen::{HostGlobal, StateDef, UnitDescription, HOST_UNIT};
use crate::error::{FlowError, FlowResult};
use crate::jit::{plan, JitEngine, SymbolAddress};

/// Host-wide values compiled code reads by reference (sample rate, tempo).
///
/// Installed once as the `rt` unit; updates are state pushes, so no node
/// needs recompiling when they change.
#[derive(Debug)]
pub struct HostGlobals {
    unit: RuntimeUnit,
}

impl HostGlobals {
    pub fn install(engine: &mut JitEngine, sample_rate: f32, bpm: f32) -> FlowResult<Self> {
        let mut desc = UnitDescription::new(HOST_UNIT);
        for global in HostGlobal::ALL {
            let initial = match global {
                HostGlobal::SampleRate => sample_rate,
                HostGlobal::Bpm => bpm,
            };
            desc.ensure_state(StateDef::with_initial(
                global.local_name(),
                vec![initial.to_bits()],
            ));
        }

        let mut unit = RuntimeUnit::new(HOST_UNIT);
        let key = unit.rebuild(engine, plan(desc)?)?;
        log::debug!(
            "host globals installed as {} (sample_rate={}, bpm={})",
            key,
            sample_rate,
            bpm
        );
        Ok(Self { unit })
    }

    pub fn set(&self, global: HostGlobal, value: f32) -> FlowResult<()> {
        if !value.is_finite() || value <= 0.0 {
            return Err(FlowError::invalid_input(format!(
                "{} must be positive, got {}",
                global.local_name(),
                value
            )));
        }
        self.unit.push_state(global.local_name(), &[value.to_bits()])
    }

    pub fn get(&self, global: HostGlobal) -> Option<f32> {
        self.unit
            .read_state(global.local_name())
            .and_then(|words| words.first().copied())
            .map(f32::from_bits)
    }

    pub fn address(&self, global: HostGlobal) -> Option<SymbolAddress> {
        self.unit.state_address(global.local_name())
    }
}
