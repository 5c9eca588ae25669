//! The per-kind processors.

mod accounts;
mod evm;
mod ft_holdings;
mod meta;
mod nft_ownership;
mod token;
mod token_events;
mod token_metadata;
mod tx_contracts;
mod tx_metrics;

pub use accounts::AccountsProcessor;
pub use evm::EvmProcessor;
pub use ft_holdings::FtHoldingsProcessor;
pub use meta::MetaProcessor;
pub use nft_ownership::NftOwnershipProcessor;
pub use token::TokenProcessor;
pub use token_metadata::TokenMetadataProcessor;
pub use tx_contracts::TxContractsProcessor;
pub use tx_metrics::TxMetricsProcessor;

pub(crate) use token_events::{match_token_event, TokenEvent};
