//! 配额池（Quota Pool）模块。
//!
//! 按调用意图（播放、搜索、推荐……）划分每日配额，防止后台预取类请求耗尽共享凭证池，
//! 与单把凭证的每日上限相互独立、叠加生效。

mod allocator;
mod types;

pub use allocator::{QuotaAllocator, QuotaTicket};
pub use types::{AllocatorStatus, ClassPolicy, ClassStatus, PriorityClass, default_policies};
