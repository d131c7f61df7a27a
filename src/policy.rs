//! 音源尝试顺序的决策。

use crate::model::download::ProviderId;

/// 根据首选音源和地区曲库是否启用，计算本次调用的音源尝试顺序。
///
/// 纯函数，每次调用重新计算，不做缓存。
pub fn provider_order(preferred: Option<ProviderId>, secondary_enabled: bool) -> Vec<ProviderId> {
    match preferred {
        Some(ProviderId::Kugou) if secondary_enabled => {
            vec![ProviderId::Kugou, ProviderId::YouTube]
        }
        // 首选 YouTube、未指定首选，或首选了未启用的酷狗
        _ => {
            let mut order = vec![ProviderId::YouTube];
            if secondary_enabled {
                order.push(ProviderId::Kugou);
            }
            order
        }
    }
}
