use crate::CoordinatorError;
use flowidx_primitives::{ServiceId, WorkerKind};
use std::collections::HashMap;

/// The worker dependency DAG, declared as data at startup.
///
/// Every worker kind maps to the services whose checkpoints bound it. The
/// raw ingester is the implicit root and has no upstreams of its own.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    upstreams: HashMap<WorkerKind, Vec<ServiceId>>,
}

impl DependencyGraph {
    /// Builds a graph from `(worker, upstreams)` declarations.
    pub fn from_edges(
        edges: impl IntoIterator<Item = (WorkerKind, Vec<ServiceId>)>,
    ) -> Result<Self, CoordinatorError> {
        let graph = Self { upstreams: edges.into_iter().collect() };
        graph.validate()?;
        Ok(graph)
    }

    /// The declared upstreams of a worker kind.
    pub fn upstreams(&self, kind: WorkerKind) -> Result<&[ServiceId], CoordinatorError> {
        self.upstreams
            .get(&kind)
            .map(Vec::as_slice)
            .ok_or(CoordinatorError::UnknownWorker(kind))
    }

    /// Rejects graphs with cycles among worker kinds. Run once at startup.
    pub fn validate(&self) -> Result<(), CoordinatorError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit(
            graph: &HashMap<WorkerKind, Vec<ServiceId>>,
            marks: &mut HashMap<WorkerKind, Mark>,
            kind: WorkerKind,
        ) -> Result<(), CoordinatorError> {
            match marks.get(&kind) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => return Err(CoordinatorError::CyclicDependency(kind)),
                None => {}
            }
            marks.insert(kind, Mark::Visiting);
            if let Some(upstreams) = graph.get(&kind) {
                for upstream in upstreams {
                    if let ServiceId::Worker(upstream) = upstream {
                        visit(graph, marks, *upstream)?;
                    }
                }
            }
            marks.insert(kind, Mark::Done);
            Ok(())
        }

        let mut marks = HashMap::new();
        for kind in self.upstreams.keys() {
            visit(&self.upstreams, &mut marks, *kind)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn accepts_the_standard_dag() {
        let graph = DependencyGraph::from_edges([
            (WorkerKind::Token, vec![ServiceId::RawIngester]),
            (WorkerKind::Meta, vec![ServiceId::RawIngester]),
            (WorkerKind::FtHoldings, vec![ServiceId::Worker(WorkerKind::Token)]),
            (WorkerKind::NftOwnership, vec![ServiceId::Worker(WorkerKind::Token)]),
            (WorkerKind::TxContracts, vec![ServiceId::Worker(WorkerKind::Meta)]),
        ]);
        assert!(graph.is_ok());
    }

    #[test]
    fn rejects_cycles() {
        let graph = DependencyGraph::from_edges([
            (WorkerKind::Token, vec![ServiceId::Worker(WorkerKind::FtHoldings)]),
            (WorkerKind::FtHoldings, vec![ServiceId::Worker(WorkerKind::Token)]),
        ]);
        assert_matches!(graph, Err(CoordinatorError::CyclicDependency(_)));
    }

    #[test]
    fn self_edges_are_cycles() {
        let graph = DependencyGraph::from_edges([(
            WorkerKind::Evm,
            vec![ServiceId::Worker(WorkerKind::Evm)],
        )]);
        assert_matches!(graph, Err(CoordinatorError::CyclicDependency(WorkerKind::Evm)));
    }
}
