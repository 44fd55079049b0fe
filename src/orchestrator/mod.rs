//! 请求编排：把缓存、分类配额与凭证池串成一次带重试的上游调用。

mod executor;
mod work;

pub use executor::{Orchestrator, PoolStatus};
pub use work::{ExecuteRequest, WorkError};
