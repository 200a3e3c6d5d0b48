//! Declaration checks, dependency edges and cycle detection.

use framegraph_core::profile_scope;

use crate::error::{GraphError, GraphResult};
use crate::graph::pass::{PassNode, VisitState};
use crate::graph::resource::ResourceNode;
use crate::graph::GraphNodes;

/// Pass dependency edges derived from resource versions.
///
/// Edge `a -> b` means `a` must run before `b`:
/// - the writer of a version precedes its readers,
/// - readers of a version precede the writer of the next one,
/// - the writer of a version precedes the writer of the next one.
#[derive(Debug, Clone, Default)]
pub(crate) struct DependencyGraph {
    successors: Vec<Vec<usize>>,
    predecessors: Vec<Vec<usize>>,
    topo_order: Vec<usize>,
}

impl DependencyGraph {
    pub(crate) fn build(passes: &[PassNode], resources: &[ResourceNode]) -> Self {
        let mut successors = vec![Vec::new(); passes.len()];

        for resource in resources {
            for (index, version) in resource.versions.iter().enumerate() {
                if let Some(writer) = version.writer {
                    for reader in &version.readers {
                        successors[writer.index()].push(reader.index());
                    }
                }

                let Some(next_writer) = resource.versions.get(index + 1).and_then(|v| v.writer)
                else {
                    continue;
                };
                for reader in &version.readers {
                    if *reader != next_writer {
                        successors[reader.index()].push(next_writer.index());
                    }
                }
                if let Some(writer) = version.writer {
                    successors[writer.index()].push(next_writer.index());
                }
            }
        }

        let mut predecessors = vec![Vec::new(); passes.len()];
        for (from, list) in successors.iter_mut().enumerate() {
            list.sort_unstable();
            list.dedup();
            for &to in list.iter() {
                predecessors[to].push(from);
            }
        }

        Self {
            successors,
            predecessors,
            topo_order: Vec::new(),
        }
    }

    /// Passes that must run after `pass`.
    pub(crate) fn successors(&self, pass: usize) -> &[usize] {
        &self.successors[pass]
    }

    /// Passes that must run before `pass`.
    pub(crate) fn predecessors(&self, pass: usize) -> &[usize] {
        &self.predecessors[pass]
    }

    /// All passes, dependencies first.
    pub(crate) fn topo_order(&self) -> &[usize] {
        &self.topo_order
    }

    pub(crate) fn edge_count(&self) -> usize {
        self.successors.iter().map(Vec::len).sum()
    }
}

/// Check declarations and build the acyclic dependency graph.
pub(crate) fn validate(nodes: &mut GraphNodes) -> GraphResult<DependencyGraph> {
    profile_scope!("framegraph: validate");

    check_dangling_reads(&nodes.passes, &nodes.resources)?;

    let mut deps = DependencyGraph::build(&nodes.passes, &nodes.resources);
    deps.topo_order = detect_cycles(&mut nodes.passes, &deps.successors)?;

    log::trace!(
        "validated {} passes, {} dependency edges",
        nodes.passes.len(),
        deps.edge_count()
    );
    Ok(deps)
}

/// Reading version 0 of a transient means reading memory nobody wrote.
fn check_dangling_reads(passes: &[PassNode], resources: &[ResourceNode]) -> GraphResult<()> {
    for pass in passes {
        for input in &pass.inputs {
            let resource = &resources[input.usage.resource.index()];
            if input.usage.version == 0 && resource.is_transient() {
                return Err(GraphError::DanglingUsage {
                    pass: pass.name.clone(),
                    name: input.name.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Iterative three-color DFS. Returns passes in topological order.
fn detect_cycles(passes: &mut [PassNode], successors: &[Vec<usize>]) -> GraphResult<Vec<usize>> {
    for pass in passes.iter_mut() {
        pass.visit = VisitState::Unvisited;
    }

    let mut post_order = Vec::with_capacity(passes.len());
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for root in 0..passes.len() {
        if passes[root].visit != VisitState::Unvisited {
            continue;
        }
        passes[root].visit = VisitState::Visiting;
        stack.push((root, 0));

        while let Some(top) = stack.last_mut() {
            let (node, next) = *top;
            match successors[node].get(next) {
                Some(&succ) => {
                    top.1 += 1;
                    match passes[succ].visit {
                        VisitState::Unvisited => {
                            passes[succ].visit = VisitState::Visiting;
                            stack.push((succ, 0));
                        }
                        VisitState::Visiting => {
                            return Err(GraphError::CyclicDependency {
                                pass: passes[succ].name.clone(),
                            });
                        }
                        VisitState::Visited => {}
                    }
                }
                None => {
                    passes[node].visit = VisitState::Visited;
                    post_order.push(node);
                    stack.pop();
                }
            }
        }
    }

    post_order.reverse();
    Ok(post_order)
}
