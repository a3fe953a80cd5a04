//! Schedule Planner (spec §4.1).
//!
//! Pure function turning `(servers, retry_times, retry_delay, base_time)`
//! into a set of absolute fire times paired with `(server, attempt)`. No
//! I/O, no mutation, deterministic given its inputs (P3) and never produces
//! two entries with the same fire time (P4).

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::PlannerError;
use crate::ids::TransportId;

/// `plan(servers, R, D, base)`.
///
/// Round 0 spreads the first pass across servers within one nominal retry
/// delay: server `i` fires at `base + i * (D / n)`.
///
/// Round `k >= 1` backs off exponentially: `d_k = D * 2^k`, and server `i`
/// fires at `base + d_k + i * (D / n)`.
pub fn plan(
    servers: &[TransportId],
    retry_times: u32,
    retry_delay: Duration,
    base: Instant,
) -> Result<BTreeMap<Instant, (TransportId, u32)>, PlannerError> {
    let n = servers.len();

    if n == 0 {
        return Err(PlannerError::NoServers);
    }

    let stagger = retry_delay / n as u32;
    let mut schedule = BTreeMap::new();

    for round in 0..retry_times {
        let round_delay = if round == 0 {
            Duration::ZERO
        } else {
            retry_delay * 2u32.pow(round)
        };

        for (i, &server) in servers.iter().enumerate() {
            let fire_at = base + round_delay + stagger * i as u32;
            let entry = (server, round);

            if let Some(existing) = schedule.insert(fire_at, entry) {
                return Err(PlannerError::DuplicateFireTime {
                    first: existing,
                    second: entry,
                    server_count: n,
                });
            }
        }
    }

    Ok(schedule)
}
