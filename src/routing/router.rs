// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The pathfinding engine: a cost-based search over the channel graph which blends
//! routing fees with reliability estimates from mission control.
//!
//! The search runs backward from the destination so that each node's state holds the
//! exact amount and time-lock an HTLC arriving there must carry, which in turn is what
//! every upstream edge's fee and policy checks are computed from.

use crate::routing::gossip::{ChannelEdge, ChannelGraph, Vertex};
use crate::routing::mission_control::PruneView;
use crate::routing::route::{HopPayload, Route, RouteHop, MAX_ROUTE_HOPS};

use core::cmp::Reverse;
use core::fmt;
use std::collections::{BinaryHeap, HashMap};

/// Tuning knobs for the blended fee/reliability cost function.
#[derive(Clone, Copy, Debug)]
pub struct PathFindingConfig {
	/// The virtual cost, in millisatoshis, assigned to a failed attempt. Higher values
	/// make the search prefer reliable channels over cheap ones.
	pub attempt_cost_msat: u64,
	/// Paths whose estimated success probability falls below this are discarded
	/// outright rather than priced.
	pub min_probability: f64,
}

impl Default for PathFindingConfig {
	fn default() -> Self {
		PathFindingConfig { attempt_cost_msat: 100_000, min_probability: 0.01 }
	}
}

/// The constraints a single pathfinding request must satisfy.
#[derive(Clone, Copy, Debug)]
pub struct PathFindingParams {
	/// The node paying, where the route starts.
	pub source: Vertex,
	/// The node being paid.
	pub target: Vertex,
	/// The amount the target must receive, in millisatoshis.
	pub amt_msat: u64,
	/// The current block height, from which absolute time-locks are computed.
	pub current_height: u32,
	/// The largest total time-lock delta, in blocks, the route may require of the
	/// sender.
	pub cltv_limit: u32,
	/// The time-lock delta the target requires on the HTLC it receives.
	pub final_cltv_delta: u16,
}

/// The error returned when no usable path exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathFindError {
	/// No path satisfying the amount, time-lock and probability constraints was found.
	NoRouteFound,
}

impl fmt::Display for PathFindError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			PathFindError::NoRouteFound => f.write_str("no route to destination found"),
		}
	}
}

impl std::error::Error for PathFindError {}

#[derive(Clone)]
struct PathState {
	/// Blended cost of reaching the target from this node: downstream fees plus the
	/// expected cost of failed attempts.
	cost: u64,
	/// The amount an HTLC arriving at this node must carry, in msat.
	amt_msat: u64,
	/// The total time-lock delta an HTLC arriving at this node must carry.
	cltv_delta: u32,
	/// The estimated probability the downstream path succeeds.
	probability: f64,
	/// Downstream hop count.
	hops: usize,
	/// The edge toward the target, `None` only at the target itself.
	next_edge: Option<ChannelEdge>,
}

/// Finds the cheapest usable path from `params.source` to `params.target`.
///
/// `additional_edges` supplies channels absent from the public graph (invoice hints),
/// keyed by their destination vertex. `bandwidth_hints` caps the amount specific
/// channels can carry right now, keyed by short channel id: a channel present in the
/// map with zero bandwidth is unusable, while absent channels are limited only by
/// their advertised policy.
pub fn find_path<G: ChannelGraph + ?Sized>(
	graph: &G, params: &PathFindingParams, prune_view: &PruneView,
	additional_edges: &HashMap<Vertex, Vec<ChannelEdge>>, bandwidth_hints: &HashMap<u64, u64>,
	config: &PathFindingConfig,
) -> Result<Route, PathFindError> {
	if params.source == params.target || params.amt_msat == 0 {
		return Err(PathFindError::NoRouteFound);
	}

	let mut dist: HashMap<Vertex, PathState> = HashMap::new();
	dist.insert(
		params.target,
		PathState {
			cost: 0,
			amt_msat: params.amt_msat,
			cltv_delta: params.final_cltv_delta as u32,
			probability: 1.0,
			hops: 0,
			next_edge: None,
		},
	);

	let mut heap = BinaryHeap::new();
	heap.push(Reverse((0u64, params.target)));

	while let Some(Reverse((cost, node))) = heap.pop() {
		let state = match dist.get(&node) {
			Some(state) if state.cost == cost => state.clone(),
			// A stale entry for a node we already settled more cheaply.
			_ => continue,
		};
		if node == params.source {
			return build_route(params, &dist);
		}

		let mut relax = |edge: &ChannelEdge| {
			relax_edge(edge, &state, params, prune_view, bandwidth_hints, config, &mut dist, &mut heap)
		};
		graph.for_each_incoming_channel(&node, &mut relax);
		if let Some(edges) = additional_edges.get(&node) {
			for edge in edges.iter() {
				relax(edge);
			}
		}
	}

	Err(PathFindError::NoRouteFound)
}

#[allow(clippy::too_many_arguments)]
fn relax_edge(
	edge: &ChannelEdge, to_state: &PathState, params: &PathFindingParams,
	prune_view: &PruneView, bandwidth_hints: &HashMap<u64, u64>, config: &PathFindingConfig,
	dist: &mut HashMap<Vertex, PathState>, heap: &mut BinaryHeap<Reverse<(u64, Vertex)>>,
) {
	let from = edge.source;
	if from == edge.destination {
		return;
	}
	if to_state.hops + 1 > MAX_ROUTE_HOPS {
		return;
	}

	// The HTLC over this channel carries exactly what must arrive at its destination.
	let amt_over_edge = to_state.amt_msat;
	if amt_over_edge < edge.htlc_minimum_msat || amt_over_edge > edge.htlc_maximum_msat {
		return;
	}
	if let Some(bandwidth) = bandwidth_hints.get(&edge.short_channel_id) {
		if amt_over_edge > *bandwidth {
			return;
		}
	}

	// The source pays no fee to itself and receives no HTLC, so its own policy's fee
	// and delta never apply.
	let (fee_msat, cltv_delta) = if from == params.source {
		(0, 0)
	} else {
		(edge.fee_msat(amt_over_edge), edge.cltv_expiry_delta as u32)
	};
	let amt_from = match amt_over_edge.checked_add(fee_msat) {
		Some(amt) => amt,
		None => return,
	};
	let cltv_from = match to_state.cltv_delta.checked_add(cltv_delta) {
		Some(cltv) => cltv,
		None => return,
	};
	if cltv_from > params.cltv_limit {
		return;
	}

	let hop_probability = prune_view.node_probability(&edge.destination)
		* prune_view.edge_probability(&from, edge.short_channel_id, amt_over_edge);
	let path_probability = to_state.probability * hop_probability;
	if path_probability < config.min_probability {
		return;
	}

	// The expected cost of retrying after a failure on this hop, following
	// cost = fee + attempt_cost * (1 / p - 1).
	let penalty_msat = if hop_probability >= 1.0 {
		0
	} else {
		let penalty = config.attempt_cost_msat as f64 * (1.0 / hop_probability - 1.0);
		if penalty >= u64::MAX as f64 {
			return;
		}
		penalty as u64
	};
	let edge_cost = match fee_msat.checked_add(penalty_msat) {
		Some(cost) => cost,
		None => return,
	};
	let total_cost = match to_state.cost.checked_add(edge_cost) {
		Some(cost) => cost,
		None => return,
	};

	let improved = match dist.get(&from) {
		Some(existing) => total_cost < existing.cost,
		None => true,
	};
	if improved {
		dist.insert(
			from,
			PathState {
				cost: total_cost,
				amt_msat: amt_from,
				cltv_delta: cltv_from,
				probability: path_probability,
				hops: to_state.hops + 1,
				next_edge: Some(edge.clone()),
			},
		);
		heap.push(Reverse((total_cost, from)));
	}
}

fn build_route(
	params: &PathFindingParams, dist: &HashMap<Vertex, PathState>,
) -> Result<Route, PathFindError> {
	// Walk the next-edge pointers from the source, collecting each visited node's
	// arrival state. Hop payload fields are the values for the HTLC the hop sends
	// onward, which is the next node's arrival state.
	let mut nodes: Vec<(&ChannelEdge, &PathState)> = Vec::new();
	let mut cursor = params.source;
	loop {
		let state = dist.get(&cursor).ok_or(PathFindError::NoRouteFound)?;
		match state.next_edge {
			Some(ref edge) => {
				let next_state =
					dist.get(&edge.destination).ok_or(PathFindError::NoRouteFound)?;
				nodes.push((edge, next_state));
				cursor = edge.destination;
			},
			None => break,
		}
		if nodes.len() > MAX_ROUTE_HOPS {
			return Err(PathFindError::NoRouteFound);
		}
	}

	let mut hops = Vec::with_capacity(nodes.len());
	for (idx, (edge, arrival)) in nodes.iter().enumerate() {
		// What this hop must send onward: the state of the node after it, or its own
		// arrival values when it is the destination.
		let onward = match nodes.get(idx + 1) {
			Some((_, next_arrival)) => next_arrival,
			None => arrival,
		};
		hops.push(RouteHop {
			pubkey: edge.destination,
			short_channel_id: edge.short_channel_id,
			outgoing_cltv: params.current_height + onward.cltv_delta,
			amt_to_forward_msat: onward.amt_msat,
			payload: HopPayload::Tlv(Vec::new()),
		});
	}

	let first = nodes.first().ok_or(PathFindError::NoRouteFound)?;
	Route::new(
		params.current_height + first.1.cltv_delta,
		first.1.amt_msat,
		params.source,
		hops,
	)
	.map_err(|_| PathFindError::NoRouteFound)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::routing::mission_control::PruneView;
	use crate::routing::test_utils::{four_node_graph, vertex};

	fn params(amt_msat: u64) -> PathFindingParams {
		PathFindingParams {
			source: vertex(0),
			target: vertex(3),
			amt_msat,
			current_height: 100,
			cltv_limit: 1000,
			final_cltv_delta: 40,
		}
	}

	fn find(
		graph: &crate::routing::gossip::NetworkGraph, params: &PathFindingParams,
		view: &PruneView, bandwidth_hints: &HashMap<u64, u64>,
	) -> Result<Route, PathFindError> {
		find_path(
			graph,
			params,
			view,
			&HashMap::new(),
			bandwidth_hints,
			&PathFindingConfig::default(),
		)
	}

	#[test]
	fn prefers_cheaper_path() {
		let graph = four_node_graph();
		let view = PruneView::empty(0.6);
		let route = find(&graph, &params(1_000_000), &view, &HashMap::new()).unwrap();

		// Both paths are two hops with equal reliability, so the fee decides: via
		// vertex(1) (scid 1 then 3, fee base 100) beats vertex(2) (fee base 1000).
		assert_eq!(route.hops.len(), 2);
		assert_eq!(route.hops[0].pubkey, vertex(1));
		assert_eq!(route.hops[0].short_channel_id, 1);
		assert_eq!(route.hops[1].pubkey, vertex(3));
		assert_eq!(route.hops[1].short_channel_id, 3);
	}

	#[test]
	fn fee_and_time_lock_accumulate_toward_sender() {
		let graph = four_node_graph();
		let view = PruneView::empty(0.6);
		let route = find(&graph, &params(1_000_000), &view, &HashMap::new()).unwrap();

		// The destination receives exactly the requested amount.
		assert_eq!(route.received_amt_msat(), 1_000_000);
		// vertex(1) charges 100 base + 1000 ppm of 1_000_000 = 1100 msat. The source's
		// own channel charges nothing.
		assert_eq!(route.total_amt_msat, 1_001_100);
		assert_eq!(route.total_fees_msat(), 1100);
		// Final delta 40 for the destination plus vertex(1)'s delta of 40; the
		// source's own delta does not apply.
		assert_eq!(route.hops[1].outgoing_cltv, 100 + 40);
		assert_eq!(route.hops[0].outgoing_cltv, 100 + 40);
		assert_eq!(route.total_time_lock, 100 + 40 + 40);
		// The first hop forwards what the destination receives.
		assert_eq!(route.hops[0].amt_to_forward_msat, 1_000_000);
	}

	#[test]
	fn routes_around_unreliable_channel() {
		let graph = four_node_graph();
		let mut view_edges = HashMap::new();
		// The cheap path's second channel recently failed this amount.
		view_edges.insert((vertex(1), 3u64), (0.0, Some(500_000u64)));
		let view = view_with(0.6, &[], &view_edges);
		let route = find(&graph, &params(1_000_000), &view, &HashMap::new()).unwrap();

		assert_eq!(route.hops[0].pubkey, vertex(2));
		assert_eq!(route.hops[1].short_channel_id, 4);
	}

	#[test]
	fn failed_amount_does_not_block_smaller_payments() {
		let graph = four_node_graph();
		let mut view_edges = HashMap::new();
		view_edges.insert((vertex(1), 3u64), (0.0, Some(500_000u64)));
		let view = view_with(0.6, &[], &view_edges);
		// Below the failed amount the cheap path is judged a priori and wins again.
		let route = find(&graph, &params(400_000), &view, &HashMap::new()).unwrap();
		assert_eq!(route.hops[0].pubkey, vertex(1));
	}

	#[test]
	fn routes_around_failed_node() {
		let graph = four_node_graph();
		let view = view_with(0.6, &[(vertex(1), 0.0)], &HashMap::new());
		let route = find(&graph, &params(1_000_000), &view, &HashMap::new()).unwrap();
		assert_eq!(route.hops[0].pubkey, vertex(2));
	}

	#[test]
	fn no_route_when_all_paths_pruned() {
		let graph = four_node_graph();
		let view =
			view_with(0.6, &[(vertex(1), 0.0), (vertex(2), 0.0)], &HashMap::new());
		assert_eq!(
			find(&graph, &params(1_000_000), &view, &HashMap::new()),
			Err(PathFindError::NoRouteFound)
		);
	}

	#[test]
	fn bandwidth_hint_excludes_drained_channel() {
		let graph = four_node_graph();
		let view = PruneView::empty(0.6);
		let mut hints = HashMap::new();
		hints.insert(1u64, 0u64);
		let route = find(&graph, &params(1_000_000), &view, &hints).unwrap();
		assert_eq!(route.hops[0].pubkey, vertex(2));

		hints.insert(2u64, 0u64);
		assert_eq!(
			find(&graph, &params(1_000_000), &view, &hints),
			Err(PathFindError::NoRouteFound)
		);
	}

	#[test]
	fn htlc_maximum_respected() {
		let graph = four_node_graph();
		let view = PruneView::empty(0.6);
		// Above every channel's htlc_maximum_msat of 100_000_000.
		assert_eq!(
			find(&graph, &params(200_000_000), &view, &HashMap::new()),
			Err(PathFindError::NoRouteFound)
		);
	}

	#[test]
	fn cltv_limit_prunes_long_paths() {
		let graph = four_node_graph();
		let view = PruneView::empty(0.6);
		let mut p = params(1_000_000);
		// Needs final 40 plus one intermediate delta of 40.
		p.cltv_limit = 79;
		assert_eq!(find(&graph, &p, &view, &HashMap::new()), Err(PathFindError::NoRouteFound));
		p.cltv_limit = 80;
		assert!(find(&graph, &p, &view, &HashMap::new()).is_ok());
	}

	#[test]
	fn hint_edges_reach_unannounced_destination() {
		let graph = four_node_graph();
		let view = PruneView::empty(0.6);
		// vertex(4) is not in the graph, reachable only via a hint from vertex(3).
		let hint = crate::routing::gossip::RouteHintHop {
			src_node_id: vertex(3),
			short_channel_id: 99,
			fees: crate::routing::gossip::RoutingFees {
				base_msat: 10,
				proportional_millionths: 0,
			},
			cltv_expiry_delta: 9,
			htlc_minimum_msat: None,
			htlc_maximum_msat: None,
		};
		let mut additional = HashMap::new();
		additional.insert(vertex(4), vec![hint.to_edge(vertex(4))]);

		let mut p = params(1_000_000);
		p.target = vertex(4);
		let route = find_path(
			&graph,
			&p,
			&view,
			&additional,
			&HashMap::new(),
			&PathFindingConfig::default(),
		)
		.unwrap();
		assert_eq!(route.hops.len(), 3);
		assert_eq!(route.hops[2].pubkey, vertex(4));
		assert_eq!(route.hops[2].short_channel_id, 99);
		assert_eq!(route.received_amt_msat(), 1_000_000);
		// vertex(3) charges the hint's 10 msat base fee, so 1_000_010 msat must
		// arrive at it.
		assert_eq!(route.hops[0].amt_to_forward_msat, 1_000_010);
		assert_eq!(route.hops[1].amt_to_forward_msat, 1_000_000);
	}

	#[test]
	fn zero_amount_is_rejected() {
		let graph = four_node_graph();
		let view = PruneView::empty(0.6);
		assert_eq!(
			find(&graph, &params(0), &view, &HashMap::new()),
			Err(PathFindError::NoRouteFound)
		);
	}

	/// Builds a view with explicit node and edge estimates, everything else a priori.
	fn view_with(
		a_priori: f64, nodes: &[(Vertex, f64)],
		edges: &HashMap<(Vertex, u64), (f64, Option<u64>)>,
	) -> PruneView {
		use crate::routing::mission_control::{
			AttemptFailure, MissionControl, MissionControlParameters,
		};
		use crate::routing::route::{HopPayload, Route, RouteHop};
		use crate::util::test_utils::TestLogger;
		use core::time::Duration;

		// Drive the real model rather than poking internals: report failures which
		// produce exactly the requested estimates.
		let mc = MissionControl::new(
			MissionControlParameters {
				half_life: Duration::from_secs(3600),
				a_priori_probability: a_priori,
				unidentified_penalty: 0.25,
			},
			Box::new(TestLogger::new()),
		);
		let now = Duration::from_secs(1_000_000);
		for (node, prob) in nodes {
			assert_eq!(*prob, 0.0, "only hard node failures can be synthesized");
			let route = Route::new(
				1000,
				1000,
				vertex(0),
				vec![RouteHop {
					pubkey: *node,
					short_channel_id: 0,
					outgoing_cltv: 0,
					amt_to_forward_msat: 0,
					payload: HopPayload::Tlv(Vec::new()),
				}],
			)
			.unwrap();
			mc.report_attempt_failure(&route, Some(0), AttemptFailure::NodeFailure, now);
		}
		for ((source, scid), (prob, min_failed)) in edges {
			assert_eq!(*prob, 0.0, "only hard edge failures can be synthesized");
			let amt = min_failed.unwrap_or(1000);
			let route = Route::new(
				1000,
				amt,
				*source,
				vec![RouteHop {
					pubkey: vertex(19),
					short_channel_id: *scid,
					outgoing_cltv: 0,
					amt_to_forward_msat: amt,
					payload: HopPayload::Tlv(Vec::new()),
				}],
			)
			.unwrap();
			let reason = if min_failed.is_some() {
				AttemptFailure::InsufficientCapacity
			} else {
				AttemptFailure::IncorrectTimeLock
			};
			mc.report_attempt_failure(&route, Some(0), reason, now);
		}
		mc.get_prune_view(now)
	}
}
