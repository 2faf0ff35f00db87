//! On-chain activity of a single Ethereum address.

mod connection;
mod entry;
mod etherscan;
mod reconstruct;

pub use connection::EthereumLedger;
pub use entry::{group_by_hash, LedgerEntry, NATIVE_DECIMALS};
pub use etherscan::{EtherscanClient, LedgerSource};
pub use reconstruct::LedgerReconstructor;
