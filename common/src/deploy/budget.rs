use crate::deploy::mode::EngineSlot;
use std::collections::BTreeMap;

pub const SHARED_CHAT_FRACTION: f64 = 0.70;
pub const SHARED_TOOL_FRACTION: f64 = 0.20;
pub const SOLO_FRACTION: f64 = 0.90;

/// per-slot gpu memory fraction.
///
/// explicit values always win. no sum-to-one check is made: two explicit
/// fractions that together exceed 1.0 are passed through untouched.
pub fn allocate(
    active: &[EngineSlot],
    explicit: &BTreeMap<EngineSlot, f64>,
) -> BTreeMap<EngineSlot, f64> {
    let shared = active.len() > 1;

    active
        .iter()
        .map(|&slot| {
            let default = match (shared, slot) {
                (true, EngineSlot::Chat) => SHARED_CHAT_FRACTION,
                (true, EngineSlot::Tool) => SHARED_TOOL_FRACTION,
                (false, _) => SOLO_FRACTION,
            };
            let fraction = explicit.get(&slot).copied().unwrap_or(default);
            (slot, fraction)
        })
        .collect()
}
