//! Host election and migration planning.
//!
//! When a host's channel drops unexpectedly, every surviving client
//! runs the same deterministic election over the ids it knows about.
//! Exactly one of them concludes it is the winner and promotes itself;
//! the rest wait for the winner's `migrate` announcement in the old
//! session's relay room. No coordination traffic is needed for the
//! election itself, because identical inputs give identical answers.

use std::time::Duration;

use craftnet_protocol::EndpointId;
use rand::Rng;

/// Knobs for the migration flow.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// How long a non-winner waits for the winner's announcement
    /// before giving up and going idle.
    pub signal_wait: Duration,
    /// Upper bound on the winner's random pause before it promotes
    /// itself. If a competing `migrate` announcement arrives during
    /// the pause, the promotion is abandoned and the announcement is
    /// followed instead, so two peers with inconsistent rosters cannot
    /// both end up hosting.
    pub max_promote_backoff: Duration,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            signal_wait: Duration::from_secs(10),
            max_promote_backoff: Duration::from_millis(500),
        }
    }
}

/// What this endpoint should do about the lost host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationPlan {
    /// We won the election: pause for `backoff`, then take over.
    Promote { backoff: Duration },
    /// Someone else won: wait up to `wait` for their announcement.
    AwaitSignal { wait: Duration },
}

/// Deterministic election: the lexicographically smallest id across
/// the local endpoint and every known peer wins.
///
/// Every participant must feed in the same id set to agree on the
/// winner; the id ordering is plain byte-wise string comparison.
pub fn elect_host<'a>(
    local: &'a EndpointId,
    peers: impl IntoIterator<Item = &'a EndpointId>,
) -> &'a EndpointId {
    peers.into_iter().fold(local, |best, candidate| {
        if candidate < best { candidate } else { best }
    })
}

/// Runs the election and turns the outcome into a plan.
pub fn plan_migration<'a>(
    local: &'a EndpointId,
    peers: impl IntoIterator<Item = &'a EndpointId>,
    config: &MigrationConfig,
) -> MigrationPlan {
    let winner = elect_host(local, peers);
    if winner == local {
        let max = config.max_promote_backoff.as_millis().max(1) as u64;
        let backoff = Duration::from_millis(rand::rng().random_range(0..max));
        tracing::info!(?backoff, "won host election, promoting after backoff");
        MigrationPlan::Promote { backoff }
    } else {
        tracing::info!(winner = %winner, "lost host election, awaiting migration signal");
        MigrationPlan::AwaitSignal {
            wait: config.signal_wait,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> EndpointId {
        EndpointId::from(s)
    }

    #[test]
    fn test_elect_host_picks_lexicographic_minimum() {
        let local = id("peer-m");
        let peers = [id("peer-z"), id("peer-a"), id("peer-q")];
        assert_eq!(elect_host(&local, &peers), &id("peer-a"));
    }

    #[test]
    fn test_elect_host_can_pick_local() {
        let local = id("peer-a");
        let peers = [id("peer-b"), id("peer-c")];
        assert_eq!(elect_host(&local, &peers), &id("peer-a"));
    }

    #[test]
    fn test_elect_host_with_no_peers_picks_local() {
        let local = id("peer-x");
        assert_eq!(elect_host(&local, []), &id("peer-x"));
    }

    #[test]
    fn test_election_agrees_across_all_orderings() {
        // Every participant sees the same set from its own vantage
        // point; all must name the same winner.
        let ids = [id("a"), id("host"), id("zz")];
        for local_idx in 0..ids.len() {
            let local = &ids[local_idx];
            let peers: Vec<&EndpointId> = ids
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != local_idx)
                .map(|(_, p)| p)
                .collect();
            assert_eq!(elect_host(local, peers.into_iter().rev().collect::<Vec<_>>()), &id("a"));
        }
    }

    #[test]
    fn test_plan_promotes_winner_with_bounded_backoff() {
        let config = MigrationConfig::default();
        let local = id("peer-a");
        let peers = [id("peer-b")];
        match plan_migration(&local, &peers, &config) {
            MigrationPlan::Promote { backoff } => {
                assert!(backoff < config.max_promote_backoff);
            }
            other => panic!("expected promotion, got {other:?}"),
        }
    }

    #[test]
    fn test_plan_tells_loser_to_wait() {
        let config = MigrationConfig::default();
        let local = id("peer-b");
        let peers = [id("peer-a")];
        assert_eq!(
            plan_migration(&local, &peers, &config),
            MigrationPlan::AwaitSignal {
                wait: Duration::from_secs(10)
            }
        );
    }
}
