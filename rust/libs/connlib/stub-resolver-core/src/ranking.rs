//! Server Ranking (spec §4.5).
//!
//! An ordered list of upstream transport handles with promote/demote/sink
//! operations. Ordering changes persist across client queries -- this is
//! learned behavior, not per-query state -- which is why it lives in its
//! own long-lived structure rather than inside the Query Table.
//!
//! Grounded on `circuit-breaker::CircuitBreaker`'s style of explicit,
//! separately named state-transition methods, each logged at `debug`.

use std::sync::Arc;

use crate::ids::TransportId;
use crate::transport::SingleTransport;

struct RankedServer {
    id: TransportId,
    transport: Arc<dyn SingleTransport>,
}

/// The live, mutable ordering of upstream servers. Index 0 is tried first
/// in a fresh schedule (spec §4.1 assigns servers to rounds by their
/// current position in this list).
pub struct ServerRanking {
    servers: Vec<RankedServer>,
}

impl ServerRanking {
    pub fn new(transports: Vec<Arc<dyn SingleTransport>>) -> Self {
        let servers = transports
            .into_iter()
            .enumerate()
            .map(|(i, transport)| RankedServer {
                id: TransportId(i as u32),
                transport,
            })
            .collect();

        Self { servers }
    }

    /// The current ordering, used by the Schedule Planner.
    pub fn ids(&self) -> Vec<TransportId> {
        self.servers.iter().map(|s| s.id).collect()
    }

    pub fn transport(&self, id: TransportId) -> Option<Arc<dyn SingleTransport>> {
        self.servers
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.transport.clone())
    }

    fn position(&self, id: TransportId) -> Option<usize> {
        self.servers.iter().position(|s| s.id == id)
    }

    /// Moves `id` one position toward the front. Called on a clean
    /// `RECEIVED` success.
    pub fn promote(&mut self, id: TransportId) {
        let Some(pos) = self.position(id) else {
            return;
        };

        if pos > 0 {
            self.servers.swap(pos, pos - 1);
            tracing::debug!(%id, new_pos = pos - 1, "Promoted server");
        }
    }

    /// Moves `id` one position toward the back. Called on a timeout.
    pub fn demote(&mut self, id: TransportId) {
        let Some(pos) = self.position(id) else {
            return;
        };

        let last = self.servers.len().saturating_sub(1);
        if pos < last {
            self.servers.swap(pos, pos + 1);
            tracing::debug!(%id, new_pos = pos + 1, "Demoted server");
        }
    }

    /// Moves `id` to the very back of the list. Called on any non-timeout,
    /// non-resource-exhausted error.
    pub fn sink_to_bottom(&mut self, id: TransportId) {
        let Some(pos) = self.position(id) else {
            return;
        };

        let server = self.servers.remove(pos);
        tracing::debug!(%id, "Sunk server to bottom of ranking");
        self.servers.push(server);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::test_support::EchoTransport;

    fn ranking(n: u32) -> ServerRanking {
        let transports = (0..n)
            .map(|i| Arc::new(EchoTransport::new(format!("server-{i}"))) as Arc<dyn SingleTransport>)
            .collect();

        ServerRanking::new(transports)
    }

    #[test]
    fn repeated_success_moves_server_to_front() {
        let mut ranking = ranking(4);
        let target = TransportId(3);

        for _ in 0..3 {
            ranking.promote(target);
        }

        assert_eq!(ranking.ids()[0], target);
    }

    #[test]
    fn repeated_timeouts_move_server_toward_tail() {
        let mut ranking = ranking(4);
        let target = TransportId(0);

        ranking.demote(target);
        ranking.demote(target);

        assert_eq!(ranking.ids()[2], target);
    }

    #[test]
    fn hard_error_sinks_to_bottom_in_one_step() {
        let mut ranking = ranking(4);
        let target = TransportId(1);

        ranking.sink_to_bottom(target);

        assert_eq!(*ranking.ids().last().unwrap(), target);
    }
}
