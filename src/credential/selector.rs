//! 凭证选择：预留用途优先，其余按注册顺序轮询。
//!
//! 轮询从上次返回位置之后开始，跳过禁用凭证；默认跳过预留凭证，避免通用流量挤占播放通道。

use crate::credential::ledger::State;
use crate::credential::types::ApiKey;
use std::collections::HashSet;

/// 跳过 exclude 内的凭证（同一次请求里已失败过的）。
pub(crate) fn pick(
    state: &mut State,
    for_reserved: bool,
    exclude: &HashSet<ApiKey>,
) -> Option<ApiKey> {
    if for_reserved {
        if let Some(i) = state.reserved_index
            && let Some(c) = state.credentials.get(i)
            && c.enabled
            && !exclude.contains(&c.key)
        {
            return Some(c.key.clone());
        }
        // 预留凭证已禁用或已排除，允许轮询到它不会改变结果；退化告警在禁用时记录一次。
        return next_general(state, true, exclude);
    }
    next_general(state, false, exclude)
}

fn next_general(
    state: &mut State,
    allow_reserved: bool,
    exclude: &HashSet<ApiKey>,
) -> Option<ApiKey> {
    let len = state.credentials.len();
    if len == 0 {
        return None;
    }

    let start = state.next_index % len;
    for offset in 0..len {
        let idx = (start + offset) % len;
        let c = &state.credentials[idx];
        let is_reserved = state.reserved_index == Some(idx);
        if !c.enabled || (is_reserved && !allow_reserved) || exclude.contains(&c.key) {
            continue;
        }
        state.next_index = (idx + 1) % len;
        return Some(c.key.clone());
    }
    None
}
