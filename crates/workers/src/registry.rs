use crate::{
    processors::{
        AccountsProcessor, EvmProcessor, FtHoldingsProcessor, MetaProcessor,
        NftOwnershipProcessor, TokenMetadataProcessor, TokenProcessor, TxContractsProcessor,
        TxMetricsProcessor,
    },
    Processor,
};
use flowidx_access::AccessApi;
use flowidx_config::WorkersConfig;
use flowidx_primitives::{ServiceId, WorkerKind};
use flowidx_store::Store;
use std::sync::Arc;

/// Builds the enabled processor set. Registration is a plain slice; the
/// dependency DAG is read off the processors' own upstream declarations.
pub fn registry<S, A>(config: &WorkersConfig) -> Vec<Arc<dyn Processor<S, A>>>
where
    S: Store,
    A: AccessApi,
{
    let all: Vec<Arc<dyn Processor<S, A>>> = vec![
        Arc::new(TokenProcessor),
        Arc::new(MetaProcessor),
        Arc::new(AccountsProcessor),
        Arc::new(FtHoldingsProcessor),
        Arc::new(NftOwnershipProcessor),
        Arc::new(TokenMetadataProcessor),
        Arc::new(TxContractsProcessor),
        Arc::new(TxMetricsProcessor),
        Arc::new(EvmProcessor),
    ];
    all.into_iter().filter(|p| config.for_kind(p.kind()).enabled).collect()
}

/// The `(worker, upstreams)` edges of a processor set, for graph
/// construction and validation at startup.
pub fn dependency_edges<S, A>(
    processors: &[Arc<dyn Processor<S, A>>],
) -> Vec<(WorkerKind, Vec<ServiceId>)>
where
    S: Store,
    A: AccessApi,
{
    processors.iter().map(|p| (p.kind(), p.upstreams())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowidx_access::MockAccessApi;
    use flowidx_coordinator::DependencyGraph;
    use flowidx_store::MemoryStore;

    #[test]
    fn full_registry_builds_a_valid_dag() {
        let config = WorkersConfig::default();
        let processors = registry::<MemoryStore, MockAccessApi>(&config);
        assert_eq!(processors.len(), 9);
        let graph = DependencyGraph::from_edges(dependency_edges(&processors));
        assert!(graph.is_ok());
    }

    #[test]
    fn disabled_kinds_are_excluded() {
        let mut config = WorkersConfig::default();
        config.evm.enabled = false;
        config.token_metadata.enabled = false;
        let processors = registry::<MemoryStore, MockAccessApi>(&config);
        assert_eq!(processors.len(), 7);
        assert!(processors.iter().all(|p| p.kind() != WorkerKind::Evm));
    }
}
