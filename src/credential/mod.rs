//! 凭证池：账本（消耗与启停）+ 选择器（预留通道与轮询）。

pub mod ledger;
mod selector;
pub mod types;

pub use ledger::{Ledger, LedgerLimits};
pub use types::{ApiKey, LedgerStatus, Purpose};
