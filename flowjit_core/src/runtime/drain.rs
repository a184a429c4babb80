use super::events::GraphEvent;
use super::facade::Runtime;
use crate::error::{FlowError, FlowResult};
use crate::graph::{NodeId, SurfaceId};
use crate::jit::{plan, ModuleKey};
use std::collections::{HashSet, VecDeque};

/// Outcome of one [`Runtime::compile_pending`] drain.
///
/// Every node taken from the queues appears exactly once, either in
/// `compiled` or in `failed`.
#[derive(Debug, Default)]
pub struct CompileReport {
    pub compiled: Vec<NodeId>,
    pub failed: Vec<(NodeId, FlowError)>,
}

impl CompileReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_nodes(&self) -> Vec<NodeId> {
        self.failed.iter().map(|(node, _)| *node).collect()
    }

    pub fn total(&self) -> usize {
        self.compiled.len() + self.failed.len()
    }
}

impl Runtime {
    /// Whether any surface has queued compile requests
    pub fn has_pending(&self) -> bool {
        self.surfaces.values().any(|s| !s.pending().is_empty())
    }

    /// Compile and install every queued node.
    ///
    /// Nodes run in request order. A node whose link fails only because a
    /// symbol is not installed yet is retried after the others, for as long
    /// as each pass installs something, so nodes calling each other compile
    /// in any order. A failed node keeps its previous module, stays dirty and
    /// is not requeued; schedule it again once the graph is corrected.
    ///
    /// When a recompiled node had callers, callers still waiting in this
    /// drain link against the new module anyway; callers already compiled in
    /// this drain are relinked in a later pass. Callers outside the drain are
    /// queued for the next one.
    pub fn compile_pending(&mut self) -> CompileReport {
        let mut pending: VecDeque<(SurfaceId, NodeId)> = self
            .surfaces
            .values_mut()
            .flat_map(|s| {
                let id = s.id();
                s.drain_queue().into_iter().map(move |node| (id, node))
            })
            .collect();

        let mut report = CompileReport::default();
        if pending.is_empty() {
            return report;
        }
        log::debug!("compiling {} pending node(s)", pending.len());

        // Relinked at most once per drain, so callers in a cycle cannot spin
        let mut relinked = HashSet::new();
        loop {
            let mut retry: Vec<(SurfaceId, NodeId, FlowError)> = Vec::new();
            let mut relink: Vec<(SurfaceId, NodeId)> = Vec::new();
            let mut progressed = false;

            while let Some((surface, node)) = pending.pop_front() {
                match self.compile_node(surface, node) {
                    Ok((key, dependents)) => {
                        progressed = true;
                        log::info!("compiled {} as {}", node, key);
                        if !report.compiled.contains(&node) {
                            report.compiled.push(node);
                        }
                        self.events.emit(GraphEvent::NodeCompiled { node, key });

                        for (dep_surface, dependent) in dependents {
                            let waiting = pending.iter().any(|(_, n)| *n == dependent)
                                || retry.iter().any(|(_, n, _)| *n == dependent)
                                || relink.iter().any(|(_, n)| *n == dependent);
                            if waiting {
                                continue;
                            }
                            let compiled = report.compiled.contains(&dependent);
                            if compiled && relinked.insert(dependent) {
                                log::debug!("relinking {} against {}", dependent, key);
                                relink.push((dep_surface, dependent));
                            } else {
                                self.requeue(dep_surface, dependent);
                            }
                        }
                    }
                    Err(e) if e.is_unresolved_symbol() => retry.push((surface, node, e)),
                    Err(e) => self.record_failure(surface, node, e, &mut report),
                }
            }

            if retry.is_empty() && relink.is_empty() {
                break;
            }
            if !progressed {
                for (surface, node, e) in retry {
                    self.record_failure(surface, node, e, &mut report);
                }
                break;
            }
            if !retry.is_empty() {
                log::debug!("retrying {} node(s) with unresolved symbols", retry.len());
            }
            pending = relink
                .into_iter()
                .chain(retry.into_iter().map(|(surface, node, _)| (surface, node)))
                .collect();
        }
        report
    }

    /// Install one node; returns its key and the nodes linked against its previous module
    fn compile_node(
        &mut self,
        surface: SurfaceId,
        node: NodeId,
    ) -> FlowResult<(ModuleKey, Vec<(SurfaceId, NodeId)>)> {
        let surface_ref = self.surface_mut(surface)?;
        surface_ref.node_mut(node)?.begin_compile();
        let desc = surface_ref.describe(node)?;
        let plan = plan(desc)?;

        let node_ref = self
            .surfaces
            .get_mut(&surface)
            .ok_or_else(|| FlowError::not_found(format!("surface {}", surface)))?
            .node_mut(node)?;
        let previous = node_ref.module_key();
        let key = node_ref.unit_mut().rebuild(&mut self.engine, plan)?;
        node_ref.compile_succeeded();

        let dependents = match previous {
            Some(previous) => self.owners_of(&self.engine.dependents(previous)),
            None => Vec::new(),
        };
        Ok((key, dependents))
    }

    fn record_failure(
        &mut self,
        surface: SurfaceId,
        node: NodeId,
        error: FlowError,
        report: &mut CompileReport,
    ) {
        let message = error.to_string();
        if error.is_fatal() {
            log::error!("compiling {} failed: {}", node, message);
        } else {
            log::warn!("compiling {} failed: {}", node, message);
        }
        if let Ok(node_ref) = self.surface_mut(surface).and_then(|s| s.node_mut(node)) {
            node_ref.compile_failed(message.clone());
        }
        self.events.emit(GraphEvent::CompileFailed {
            node,
            message,
            retryable: error.is_retryable(),
        });
        report.compiled.retain(|n| *n != node);
        report.failed.push((node, error));
    }
}
