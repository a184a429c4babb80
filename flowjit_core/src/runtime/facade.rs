use super::events::{EventBus, GraphEvent};
use super::globals::HostGlobals;
use crate::codegen::{mangle, HostGlobal, PROCESS_ENTRY};
use crate::config::RuntimeConfig;
use crate::error::{FlowError, FlowResult};
use crate::graph::{
    Control, ControlGroup, ControlId, ControlSpec, GroupId, IdAllocator, Node, NodeId,
    NodeLogic, NodeMetadata, Surface, SurfaceId, ValueType,
};
use crate::jit::{JitEngine, ModuleKey, SymbolAddress, SymbolTable};
use crossbeam::channel::Receiver;
use std::collections::BTreeMap;

/// Live compilation runtime for a set of surfaces.
///
/// Owns the JIT engine, every surface and the host globals. All graph edits
/// go through here; structural edits queue the affected node and
/// [`compile_pending`](Runtime::compile_pending) drains the queues. Wiring
/// edits only push active slots into already compiled code.
///
/// The execution side only needs [`symbols`](Runtime::symbols).
pub struct Runtime {
    pub(super) config: RuntimeConfig,
    pub(super) engine: JitEngine,
    pub(super) globals: HostGlobals,
    pub(super) surfaces: BTreeMap<SurfaceId, Surface>,
    pub(super) ids: IdAllocator,
    pub(super) events: EventBus,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> FlowResult<Self> {
        config.validate()?;
        let engine = JitEngine::new(&config)?;
        Self::with_engine(config, engine)
    }

    /// Use a preconfigured engine (custom resolver layers)
    pub fn with_engine(config: RuntimeConfig, mut engine: JitEngine) -> FlowResult<Self> {
        config.validate()?;
        let globals = HostGlobals::install(&mut engine, config.sample_rate, config.bpm)?;
        log::info!(
            "flowjit runtime ready (opt_level={}, resolver layers {:?})",
            config.opt_level.as_setting(),
            engine.resolver().layers()
        );
        Ok(Self {
            config,
            engine,
            globals,
            surfaces: BTreeMap::new(),
            ids: IdAllocator::default(),
            events: EventBus::new(),
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn engine(&self) -> &JitEngine {
        &self.engine
    }

    /// Read handle over installed symbols, for the execution side
    pub fn symbols(&self) -> SymbolTable {
        self.engine.symbols()
    }

    pub fn subscribe(&mut self) -> Receiver<GraphEvent> {
        self.events.subscribe()
    }

    // ---- lookups ----

    pub fn surface(&self, id: SurfaceId) -> Option<&Surface> {
        self.surfaces.get(&id)
    }

    pub fn surfaces(&self) -> impl Iterator<Item = &Surface> {
        self.surfaces.values()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.surfaces.values().find_map(|s| s.node(id))
    }

    pub fn control(&self, id: ControlId) -> Option<&Control> {
        self.surfaces.values().find_map(|s| s.control(id))
    }

    pub fn group(&self, id: GroupId) -> Option<&ControlGroup> {
        self.surfaces.values().find_map(|s| s.group(id))
    }

    pub fn is_wired(&self, control: ControlId) -> bool {
        self.surface_of_control(control)
            .ok()
            .and_then(|sid| self.surfaces.get(&sid))
            .map(|s| s.is_wired(control))
            .unwrap_or(false)
    }

    pub(super) fn surface_mut(&mut self, id: SurfaceId) -> FlowResult<&mut Surface> {
        self.surfaces
            .get_mut(&id)
            .ok_or_else(|| FlowError::not_found(format!("surface {}", id)))
    }

    pub(super) fn surface_of_node(&self, node: NodeId) -> FlowResult<SurfaceId> {
        self.surfaces
            .values()
            .find(|s| s.node(node).is_some())
            .map(|s| s.id())
            .ok_or_else(|| FlowError::not_found(format!("node {}", node)))
    }

    fn surface_of_control(&self, control: ControlId) -> FlowResult<SurfaceId> {
        self.surfaces
            .values()
            .find(|s| s.control(control).is_some())
            .map(|s| s.id())
            .ok_or_else(|| FlowError::not_found(format!("control {}", control)))
    }

    fn surface_of_group(&self, group: GroupId) -> FlowResult<SurfaceId> {
        self.surfaces
            .values()
            .find(|s| s.group(group).is_some())
            .map(|s| s.id())
            .ok_or_else(|| FlowError::not_found(format!("group {}", group)))
    }

    // ---- surfaces ----

    pub fn create_surface(&mut self, name: &str) -> SurfaceId {
        let id = self.ids.surface();
        self.surfaces.insert(id, Surface::new(id, name));
        log::debug!("created surface {} '{}'", id, name);
        id
    }

    /// Remove a surface and every node on it
    pub fn remove_surface(&mut self, id: SurfaceId) -> FlowResult<()> {
        let nodes = self
            .surfaces
            .get(&id)
            .ok_or_else(|| FlowError::not_found(format!("surface {}", id)))?
            .node_ids();
        for node in nodes {
            self.detach_node(id, node)?;
        }
        self.surfaces.remove(&id);
        log::debug!("removed surface {}", id);
        self.events.emit(GraphEvent::SurfaceRemoved { surface: id });
        Ok(())
    }

    // ---- nodes ----

    /// Add a node and queue its first compile
    pub fn create_node(
        &mut self,
        surface: SurfaceId,
        name: &str,
        logic: impl NodeLogic + 'static,
    ) -> FlowResult<NodeId> {
        let id = self.ids.node();
        let surface_ref = self.surface_mut(surface)?;
        surface_ref.add_node(Node::new(id, surface, name, Box::new(logic)));
        surface_ref.schedule(id)?;
        log::debug!("created node {} '{}' on {}", id, name, surface);
        Ok(id)
    }

    /// Detach a node, uninstall its module and cancel its pending compile
    pub fn remove_node(&mut self, node: NodeId) -> FlowResult<()> {
        let surface = self.surface_of_node(node)?;
        self.detach_node(surface, node)
    }

    fn detach_node(&mut self, surface: SurfaceId, node: NodeId) -> FlowResult<()> {
        let (mut removed, changed) = self.surface_mut(surface)?.remove_node(node)?;

        if let Some(key) = removed.module_key() {
            let dependents = self.engine.dependents(key);
            if let Err(e) = removed.unit_mut().uninstall(&mut self.engine) {
                log::warn!("uninstalling {} failed: {}", node, e);
            }
            self.requeue_dependents(&dependents);
        }

        self.publish_groups(surface, &changed);
        log::debug!("removed node {}", node);
        self.events.emit(GraphEvent::NodeRemoved { node });
        Ok(())
    }

    /// Swap a node's behavior; recompiles it
    pub fn set_node_logic(&mut self, node: NodeId, logic: impl NodeLogic + 'static) -> FlowResult<()> {
        let surface = self.surface_of_node(node)?;
        let surface_ref = self.surface_mut(surface)?;
        surface_ref.node_mut(node)?.set_logic(Box::new(logic));
        surface_ref.schedule(node)?;
        Ok(())
    }

    /// Editor placement; never triggers a compile
    pub fn set_node_metadata(&mut self, node: NodeId, metadata: NodeMetadata) -> FlowResult<()> {
        let surface = self.surface_of_node(node)?;
        self.surface_mut(surface)?
            .node_mut(node)?
            .set_metadata(metadata);
        self.events
            .emit(GraphEvent::MetadataChanged { node, metadata });
        Ok(())
    }

    /// Ask for a recompile; coalesces with a pending request
    pub fn schedule_compile(&mut self, node: NodeId) -> FlowResult<()> {
        let surface = self.surface_of_node(node)?;
        if !self.surface_mut(surface)?.schedule(node)? {
            log::trace!("compile of {} already pending", node);
        }
        Ok(())
    }

    // ---- controls ----

    pub fn create_control(&mut self, node: NodeId, spec: ControlSpec) -> FlowResult<ControlId> {
        let surface = self.surface_of_node(node)?;
        let id = self.ids.control();
        self.surface_mut(surface)?.add_control(id, node, spec)?;
        Ok(id)
    }

    pub fn remove_control(&mut self, control: ControlId) -> FlowResult<()> {
        let surface = self.surface_of_control(control)?;
        let changed = self.surface_mut(surface)?.remove_control(control)?;
        self.publish_groups(surface, &changed);
        Ok(())
    }

    /// Wire two controls of the same surface and type
    pub fn connect(&mut self, a: ControlId, b: ControlId) -> FlowResult<()> {
        let surface = self.surface_of_control(a)?;
        if self.surface_of_control(b)? != surface {
            return Err(FlowError::invalid_input(format!(
                "controls {} and {} are on different surfaces",
                a, b
            )));
        }
        let changed = self.surface_mut(surface)?.connect(a, b)?;
        self.publish_groups(surface, &changed);
        Ok(())
    }

    pub fn disconnect(&mut self, a: ControlId, b: ControlId) -> FlowResult<()> {
        let surface = self.surface_of_control(a)?;
        let changed = self.surface_mut(surface)?.disconnect(a, b)?;
        self.publish_groups(surface, &changed);
        Ok(())
    }

    // ---- groups ----

    /// New group whose active slots `owner` reads; recompiles the owner
    pub fn create_group(
        &mut self,
        owner: NodeId,
        value_type: ValueType,
        lanes: u32,
    ) -> FlowResult<GroupId> {
        let surface = self.surface_of_node(owner)?;
        let id = self.ids.group();
        let group = ControlGroup::new(id, owner, value_type, lanes)?;
        self.surface_mut(surface)?.add_group(group)?;
        Ok(id)
    }

    pub fn remove_group(&mut self, group: GroupId) -> FlowResult<()> {
        let surface = self.surface_of_group(group)?;
        self.surface_mut(surface)?.remove_group(group)
    }

    pub fn add_to_group(&mut self, group: GroupId, control: ControlId) -> FlowResult<()> {
        let surface = self.surface_of_group(group)?;
        if self.surface_of_control(control)? != surface {
            return Err(FlowError::invalid_input(format!(
                "control {} is not on the surface of group {}",
                control, group
            )));
        }
        let changed = self.surface_mut(surface)?.add_to_group(group, control)?;
        self.publish_groups(surface, &changed);
        Ok(())
    }

    pub fn remove_from_group(&mut self, group: GroupId, control: ControlId) -> FlowResult<()> {
        let surface = self.surface_of_group(group)?;
        let changed = self.surface_mut(surface)?.remove_from_group(group, control)?;
        self.publish_groups(surface, &changed);
        Ok(())
    }

    /// Resize a group's bus; a changed lane count recompiles the owner
    pub fn set_group_lanes(&mut self, group: GroupId, lanes: u32) -> FlowResult<()> {
        let surface = self.surface_of_group(group)?;
        self.surface_mut(surface)?.set_group_lanes(group, lanes)?;
        Ok(())
    }

    /// Push changed active slots into the owners' compiled code, then notify
    fn publish_groups(&mut self, surface: SurfaceId, groups: &[GroupId]) {
        let Some(surface_ref) = self.surfaces.get(&surface) else {
            return;
        };
        let mut events = Vec::with_capacity(groups.len());
        for group_id in groups {
            let Some(group) = surface_ref.group(*group_id) else {
                continue;
            };
            if let Some(owner) = surface_ref.node(group.owner()) {
                let unit = owner.unit();
                let state = group.state_name();
                if unit.has_state(&state) {
                    if let Err(e) = unit.push_state(&state, &[group.active().bits()]) {
                        log::warn!("pushing active slots of {} failed: {}", group_id, e);
                    }
                }
            }
            events.push(GraphEvent::ActiveSlotsChanged {
                group: *group_id,
                active: group.active(),
            });
        }
        for event in events {
            self.events.emit(event);
        }
    }

    /// Nodes whose installed modules are `keys`
    pub(super) fn owners_of(&self, keys: &[ModuleKey]) -> Vec<(SurfaceId, NodeId)> {
        keys.iter()
            .filter_map(|key| {
                self.surfaces.values().find_map(|s| {
                    let node = s.nodes().find(|n| n.module_key() == Some(*key))?;
                    Some((s.id(), node.id()))
                })
            })
            .collect()
    }

    /// Queue the nodes whose modules were linked against a module that went away
    pub(super) fn requeue_dependents(&mut self, dependents: &[ModuleKey]) {
        for (surface, node) in self.owners_of(dependents) {
            self.requeue(surface, node);
        }
    }

    pub(super) fn requeue(&mut self, surface: SurfaceId, node: NodeId) {
        log::debug!("{} links against a replaced module; recompiling", node);
        if let Err(e) = self.surface_mut(surface).and_then(|s| s.schedule(node)) {
            log::warn!("could not requeue {}: {}", node, e);
        }
    }

    // ---- host globals ----

    pub fn set_sample_rate(&mut self, value: f32) -> FlowResult<()> {
        self.globals.set(HostGlobal::SampleRate, value)
    }

    pub fn set_bpm(&mut self, value: f32) -> FlowResult<()> {
        self.globals.set(HostGlobal::Bpm, value)
    }

    pub fn sample_rate(&self) -> f32 {
        self.globals
            .get(HostGlobal::SampleRate)
            .unwrap_or(self.config.sample_rate)
    }

    pub fn bpm(&self) -> f32 {
        self.globals.get(HostGlobal::Bpm).unwrap_or(self.config.bpm)
    }

    pub fn global_address(&self, global: HostGlobal) -> FlowResult<SymbolAddress> {
        self.globals
            .address(global)
            .ok_or_else(|| FlowError::UnresolvedAddress(global.global_ref().mangled()))
    }

    // ---- execution host helpers ----

    /// Address of a node's `extern "C" fn(*mut f32)` process entry
    pub fn process_symbol(&self, node: NodeId) -> FlowResult<SymbolAddress> {
        self.function_symbol(node, PROCESS_ENTRY)
    }

    /// Address of a function a node exports
    pub fn function_symbol(&self, node: NodeId, name: &str) -> FlowResult<SymbolAddress> {
        self.engine
            .get_symbol_address(&mangle(&node.unit_name(), name))
    }

    /// Address of the word the owner's code reads a group's active slots from
    pub fn active_slots_address(&self, group: GroupId) -> FlowResult<SymbolAddress> {
        let owner = self
            .group(group)
            .ok_or_else(|| FlowError::not_found(format!("group {}", group)))?
            .owner();
        self.node(owner)
            .and_then(|n| n.unit().state_address(&group.state_name()))
            .ok_or_else(|| {
                FlowError::UnresolvedAddress(mangle(
                    &owner.unit_name(),
                    &group.state_name(),
                ))
            })
    }
}
