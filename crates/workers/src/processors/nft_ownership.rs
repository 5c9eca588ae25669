use crate::{Processor, ProcessorContext, WorkerError};
use async_trait::async_trait;
use flowidx_access::AccessApi;
use flowidx_primitives::{HeightRange, ServiceId, WorkerKind};
use flowidx_store::{NftOwnership, Store};

/// Tracks the current owner of every NFT from `nft_transfers`.
///
/// Writes are height-guarded in the store: an out-of-order transfer below
/// the stored `last_height` never mutates the owner. A withdraw with no
/// following deposit leaves the owner null (burn).
#[derive(Debug, Default)]
pub struct NftOwnershipProcessor;

#[async_trait]
impl<S, A> Processor<S, A> for NftOwnershipProcessor
where
    S: Store,
    A: AccessApi,
{
    fn kind(&self) -> WorkerKind {
        WorkerKind::NftOwnership
    }

    fn upstreams(&self) -> Vec<ServiceId> {
        vec![ServiceId::Worker(WorkerKind::Token)]
    }

    /// Ownership rows fold across ranges; the height guard makes retries
    /// converge without clearing rows first.
    async fn delete_by_height(
        &self,
        _store: &S,
        _range: HeightRange,
    ) -> Result<(), WorkerError> {
        Ok(())
    }

    async fn process(
        &self,
        ctx: &ProcessorContext<S, A>,
        range: HeightRange,
    ) -> Result<(), WorkerError> {
        let mut transfers = ctx.store.nft_transfers_in_range(range).await?;
        // Chronological application within the range; the height guard
        // handles ordering across ranges.
        transfers.sort_by_key(|t| (t.block_height, t.event_index));

        let rows: Vec<NftOwnership> = transfers
            .iter()
            .map(|transfer| NftOwnership {
                contract_address: transfer.contract_address,
                contract_name: transfer.contract_name.clone(),
                nft_id: transfer.nft_id,
                owner: transfer.recipient,
                last_height: transfer.block_height,
            })
            .collect();
        ctx.store.write_nft_ownerships(&rows).await?;
        Ok(())
    }
}
