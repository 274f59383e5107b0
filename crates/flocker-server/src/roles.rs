use std::collections::BTreeSet;

use rand::Rng;
use rand::seq::SliceRandom;

use flocker_core::participant::SessionId;

/// Number of informed participants for `total` eligible participants:
/// `floor(total * fraction)`, at least one when anyone is eligible.
pub fn informed_count(total: usize, fraction: f64) -> usize {
    if total == 0 {
        return 0;
    }
    let raw = (total as f64 * fraction.clamp(0.0, 1.0)).floor() as usize;
    raw.clamp(1, total)
}

/// Pick which participants are informed this round. Uniform sampling without
/// replacement via a partial Fisher-Yates shuffle over the candidates.
pub fn assign_roles<R: Rng + ?Sized>(
    rng: &mut R,
    fraction: f64,
    candidates: &[SessionId],
) -> BTreeSet<SessionId> {
    let count = informed_count(candidates.len(), fraction);
    let mut pool: Vec<&SessionId> = candidates.iter().collect();
    let (chosen, _) = pool.partial_shuffle(rng, count);
    chosen.iter().map(|id| (*id).clone()).collect()
}
