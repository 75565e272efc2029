//! The placement engine: scores candidate nodes for a group under domain
//! rules and exclusivity.
//!
//! A pure, side-effect-free module: every input (membership, domain,
//! exclusivity, current per-node service count) is passed in by the
//! caller, which reads them under the forest lock and the distributed
//! lock.

use rgm_core::NodeId;
use rgm_forest::Domain;

/// A node that is a legal, live placement candidate for this evaluation.
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    /// The candidate node.
    pub node: NodeId,
    /// Whether the candidate currently has zero resource groups running on
    /// it. Only consulted when the group being scored is `exclusive` — see
    /// `DESIGN.md` for why this counts services under the forest read lock
    /// rather than leaving exclusivity as a domain-only declaration.
    pub runs_no_services: bool,
}

/// Scores `candidate` for a group with the given `domain` and
/// `exclusive` flag.
///
/// Returns `0` for an illegal placement. Otherwise returns a positive
/// score; higher is better. The caller is responsible for only passing
/// live members — this function does not itself know which nodes are
/// live.
#[must_use]
pub fn score(candidate: Candidate, domain: Option<&Domain>, exclusive: bool) -> u32 {
    if let Some(domain) = domain {
        if domain.restricted && !domain.contains(candidate.node) {
            return 0;
        }
    }

    let mut total: u32 = 1;

    if let Some(domain) = domain {
        if domain.ordered {
            if let Some((_, priority)) = domain.members.iter().find(|(node, _)| *node == candidate.node) {
                let max_priority = domain.members.iter().map(|(_, p)| p.0).max().unwrap_or(priority.0);
                total += (max_priority - priority.0) + 2;
            }
        }
    }

    if exclusive {
        if candidate.runs_no_services {
            total += 2;
        } else {
            return 0;
        }
    }

    total
}

/// Finds the best live target node for a group, excluding `exclude_owner`
/// (typically the node currently relocating away).
///
/// Ties are broken by lowest node id, so the result is always a single
/// deterministic node when any candidate scores above `0`: a node is
/// "uniquely best" precisely when it is what this function returns.
#[must_use]
pub fn best_target_node(candidates: &[Candidate], exclude_owner: Option<NodeId>, domain: Option<&Domain>, exclusive: bool) -> Option<NodeId> {
    candidates
        .iter()
        .filter(|candidate| Some(candidate.node) != exclude_owner)
        .map(|candidate| (candidate.node, score(*candidate, domain, exclusive)))
        .filter(|(_, score)| *score > 0)
        .max_by(|(node_a, score_a), (node_b, score_b)| score_a.cmp(score_b).then(node_b.cmp(node_a)))
        .map(|(node, _)| node)
}

/// Whether `node` is the evaluator's chosen best target for a group — the
/// condition `consider_start` checks before enqueueing a start: only the
/// uniquely best-scoring live candidate gets one.
#[must_use]
pub fn is_best_target(node: NodeId, candidates: &[Candidate], domain: Option<&Domain>, exclusive: bool) -> bool {
    best_target_node(candidates, None, domain, exclusive) == Some(node)
}
