//! Partial ordering between ledger events and between witnesses (§4.D).
//!
//! Within a single shard, ledger order is a total order (events are
//! lexicographically ordered by `(block, index)`). Across shards there
//! is no global clock, so two events from different shards are
//! `Unknown` unless a causal link between them has been established by
//! other means (the transaction engine, not this module). Witnesses
//! that each dominate the other on some shared shard are `Concurrent`;
//! witnesses covering disjoint shard sets are `Unknown`.

use crate::ledger::event::EventId;
use crate::ledger::witness::Witness;

/// The result of comparing two events (or two witnesses) for causal
/// order.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum OrderResult {
    /// The first happened strictly before the second.
    Before,
    /// The first happened strictly after the second.
    After,
    /// Both are observable and neither happened before the other (two
    /// witnesses that each dominate the other on some shared shard).
    Concurrent,
    /// The two refer to the same event.
    Equal,
    /// Order cannot be determined from the information available (e.g.
    /// comparing witnesses that cover disjoint, unrelated shards).
    Unknown,
}

/// Orders two events from the same shard by their position in that
/// shard's ledger. Events from different shards have no causal link
/// visible here — the safe default is `Unknown`, not `Concurrent` —
/// unless the caller has established one by other means (e.g. one
/// transaction's read set includes the other's write), which is tracked
/// by the transaction engine, not here.
pub fn order(a: EventId, b: EventId) -> OrderResult {
    if a == b {
        return OrderResult::Equal;
    }
    if a.shard != b.shard {
        return OrderResult::Unknown;
    }
    if a < b {
        OrderResult::Before
    } else {
        OrderResult::After
    }
}

/// Orders two witnesses by comparing the highest event id each covers
/// per shard. If the witnesses cover an overlapping set of shards and
/// one dominates the other on every shared shard, that witness is
/// `Before`/`After`; if they cover disjoint shard sets, the order is
/// `Unknown`.
pub fn order_witnesses(a: &Witness, b: &Witness) -> OrderResult {
    let shared: Vec<u32> = a
        .shard_high_water_marks()
        .keys()
        .filter(|s| b.shard_high_water_marks().contains_key(s))
        .copied()
        .collect();
    if shared.is_empty() {
        return OrderResult::Unknown;
    }

    let a_marks = a.shard_high_water_marks();
    let b_marks = b.shard_high_water_marks();
    let mut a_ahead = false;
    let mut b_ahead = false;
    for shard in &shared {
        let av = a_marks[shard];
        let bv = b_marks[shard];
        match av.cmp(&bv) {
            std::cmp::Ordering::Greater => a_ahead = true,
            std::cmp::Ordering::Less => b_ahead = true,
            std::cmp::Ordering::Equal => {}
        }
    }
    match (a_ahead, b_ahead) {
        (true, false) => OrderResult::After,
        (false, true) => OrderResult::Before,
        (false, false) => OrderResult::Equal,
        (true, true) => OrderResult::Concurrent,
    }
}
