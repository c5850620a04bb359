// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Payment sessions: the per-payment source of candidate routes.
//!
//! A [`SessionSource`] holds everything shared across payments (the graph, mission
//! control, local bandwidth queries) and mints one [`PaymentSession`] per payment.
//! Each call to [`PaymentSession::request_route`] produces the next candidate route
//! against a fresh mission-control snapshot, so outcomes reported for one attempt
//! influence the route proposed for the next.

use crate::routing::gossip::{ChannelEdge, ChannelGraph, RouteHintHop, Vertex};
use crate::routing::mission_control::MissionControl;
use crate::routing::route::Route;
use crate::routing::router::{
	find_path, PathFindError, PathFindingConfig, PathFindingParams,
};
use crate::util::logger::Logger;

use core::ops::Deref;
use core::time::Duration;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// A callback reporting how many millisatoshis one of our own channels can currently
/// carry. Zero marks the channel unusable.
pub type BandwidthQuery = Box<dyn Fn(&ChannelEdge) -> u64 + Send + Sync>;

/// Mints [`PaymentSession`]s, one per payment.
pub struct SessionSource<G: Deref, L: Deref>
where
	G::Target: ChannelGraph,
	L::Target: Logger,
{
	graph: G,
	source_node: Vertex,
	mission_control: Arc<MissionControl<L>>,
	query_bandwidth: BandwidthQuery,
	config: PathFindingConfig,
	logger: L,
}

impl<G: Deref, L: Deref> SessionSource<G, L>
where
	G::Target: ChannelGraph,
	L::Target: Logger,
{
	/// Creates a new source of payment sessions for the node `source_node`.
	pub fn new(
		graph: G, source_node: Vertex, mission_control: Arc<MissionControl<L>>,
		query_bandwidth: BandwidthQuery, config: PathFindingConfig, logger: L,
	) -> Self {
		SessionSource { graph, source_node, mission_control, query_bandwidth, config, logger }
	}

	/// Creates a session which searches the graph for routes to `target`, using
	/// `route_hints` to reach it over channels the public graph does not carry.
	///
	/// Each hint is a chain of hops ending at the target, as carried in an invoice.
	pub fn new_payment_session(
		&self, target: Vertex, route_hints: &[Vec<RouteHintHop>],
	) -> PaymentSession<'_, G, L> {
		let mut additional_edges: HashMap<Vertex, Vec<ChannelEdge>> = HashMap::new();
		for chain in route_hints.iter() {
			// Hops run toward the target: the destination of each is the source of the
			// next, and the last hop's destination is the target itself.
			let mut destination = target;
			for hint in chain.iter().rev() {
				let edge = hint.to_edge(destination);
				destination = hint.src_node_id;
				additional_edges.entry(edge.destination).or_default().push(edge);
			}
		}
		log_trace!(
			self.logger,
			"Starting payment session to {} with {} hint chains",
			target,
			route_hints.len()
		);
		PaymentSession {
			source: self,
			target,
			additional_edges,
			pre_built_route: None,
			exhausted: false,
		}
	}

	/// Creates a session which yields `route` exactly once and nothing afterwards,
	/// for callers which computed or received a route out of band.
	pub fn new_payment_session_for_route(&self, route: Route) -> PaymentSession<'_, G, L> {
		PaymentSession {
			source: self,
			target: route.destination(),
			additional_edges: HashMap::new(),
			pre_built_route: Some(route),
			exhausted: false,
		}
	}

	/// Creates a session which never yields a route, used when resuming a payment
	/// whose session state (such as invoice hints) is no longer available.
	pub fn new_payment_session_empty(&self, target: Vertex) -> PaymentSession<'_, G, L> {
		PaymentSession {
			source: self,
			target,
			additional_edges: HashMap::new(),
			pre_built_route: None,
			exhausted: true,
		}
	}

	fn bandwidth_hints(&self) -> HashMap<u64, u64> {
		let mut hints = HashMap::new();
		self.graph.for_each_outgoing_channel(&self.source_node, &mut |edge| {
			hints.insert(edge.short_channel_id, (self.query_bandwidth)(edge));
		});
		hints
	}
}

/// A source of candidate routes for one payment.
pub struct PaymentSession<'a, G: Deref, L: Deref>
where
	G::Target: ChannelGraph,
	L::Target: Logger,
{
	source: &'a SessionSource<G, L>,
	target: Vertex,
	additional_edges: HashMap<Vertex, Vec<ChannelEdge>>,
	pre_built_route: Option<Route>,
	exhausted: bool,
}

impl<'a, G: Deref, L: Deref> PaymentSession<'a, G, L>
where
	G::Target: ChannelGraph,
	L::Target: Logger,
{
	/// The destination this session routes toward.
	pub fn target(&self) -> Vertex {
		self.target
	}

	/// Produces the next candidate route delivering `amt_msat` to the target.
	///
	/// Every call snapshots mission control anew, so failures reported since the last
	/// call steer this one. Returns [`PathFindError::NoRouteFound`] once no acceptable
	/// route remains (immediately, for an exhausted or empty session).
	pub fn request_route(
		&mut self, amt_msat: u64, current_height: u32, cltv_limit: u32, final_cltv_delta: u16,
	) -> Result<Route, PathFindError> {
		if self.exhausted {
			return Err(PathFindError::NoRouteFound);
		}
		if let Some(route) = self.pre_built_route.take() {
			self.exhausted = true;
			return Ok(route);
		}

		let now = SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.unwrap_or(Duration::ZERO);
		let prune_view = self.source.mission_control.get_prune_view(now);
		let bandwidth_hints = self.source.bandwidth_hints();
		let params = PathFindingParams {
			source: self.source.source_node,
			target: self.target,
			amt_msat,
			current_height,
			cltv_limit,
			final_cltv_delta,
		};
		let result = find_path(
			&*self.source.graph,
			&params,
			&prune_view,
			&self.additional_edges,
			&bandwidth_hints,
			&self.source.config,
		);
		match result {
			Ok(ref route) => {
				log_debug!(
					self.source.logger,
					"Found {}-hop route to {} sending {} msat with {} msat fees",
					route.hops.len(),
					self.target,
					route.total_amt_msat,
					route.total_fees_msat()
				);
			},
			Err(ref e) => {
				log_debug!(
					self.source.logger,
					"No route to {} for {} msat: {}",
					self.target,
					amt_msat,
					e
				);
			},
		}
		result
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::routing::mission_control::{
		AttemptFailure, MissionControl, MissionControlParameters,
	};
	use crate::routing::route::{HopPayload, RouteHop};
	use crate::routing::test_utils::{four_node_graph, vertex};
	use crate::util::test_utils::TestLogger;

	type TestSessionSource =
		SessionSource<Box<crate::routing::gossip::NetworkGraph>, Arc<TestLogger>>;

	fn session_source() -> TestSessionSource {
		let logger = Arc::new(TestLogger::new());
		let mission_control = Arc::new(MissionControl::new(
			MissionControlParameters::default(),
			Arc::clone(&logger),
		));
		SessionSource::new(
			Box::new(four_node_graph()),
			vertex(0),
			mission_control,
			Box::new(|_| u64::MAX),
			PathFindingConfig::default(),
			logger,
		)
	}

	fn now() -> Duration {
		SystemTime::now().duration_since(UNIX_EPOCH).unwrap()
	}

	#[test]
	fn session_reroutes_after_reported_failure() {
		let source = session_source();
		let mut session = source.new_payment_session(vertex(3), &[]);

		let first = session.request_route(1_000_000, 100, 1000, 40).unwrap();
		assert_eq!(first.hops[0].pubkey, vertex(1));

		// The second channel of the proposed route failed on capacity. A fresh
		// request must avoid it.
		source.mission_control.report_attempt_failure(
			&first,
			Some(1),
			AttemptFailure::InsufficientCapacity,
			now(),
		);
		let second = session.request_route(1_000_000, 100, 1000, 40).unwrap();
		assert_eq!(second.hops[0].pubkey, vertex(2));
	}

	#[test]
	fn for_route_session_yields_route_once() {
		let source = session_source();
		let route = Route::new(
			180,
			1_000_100,
			vertex(0),
			vec![RouteHop {
				pubkey: vertex(1),
				short_channel_id: 1,
				outgoing_cltv: 140,
				amt_to_forward_msat: 1_000_000,
				payload: HopPayload::Tlv(Vec::new()),
			}],
		)
		.unwrap();
		let mut session = source.new_payment_session_for_route(route.clone());
		assert_eq!(session.target(), vertex(1));

		assert_eq!(session.request_route(1_000_000, 100, 1000, 40), Ok(route));
		assert_eq!(
			session.request_route(1_000_000, 100, 1000, 40),
			Err(PathFindError::NoRouteFound)
		);
	}

	#[test]
	fn empty_session_never_yields() {
		let source = session_source();
		let mut session = source.new_payment_session_empty(vertex(3));
		assert_eq!(
			session.request_route(1_000_000, 100, 1000, 40),
			Err(PathFindError::NoRouteFound)
		);
	}

	#[test]
	fn no_route_when_amount_exceeds_channel_limits() {
		let source = session_source();
		let mut session = source.new_payment_session(vertex(3), &[]);
		// Far above every channel's htlc_maximum_msat.
		assert_eq!(
			session.request_route(200_000_000, 100, 1000, 40),
			Err(PathFindError::NoRouteFound)
		);
	}

	#[test]
	fn hint_chain_expands_toward_target() {
		let source = session_source();
		// vertex(4) hangs off vertex(3) via a private channel.
		let hints = vec![vec![crate::routing::gossip::RouteHintHop {
			src_node_id: vertex(3),
			short_channel_id: 99,
			fees: crate::routing::gossip::RoutingFees {
				base_msat: 0,
				proportional_millionths: 0,
			},
			cltv_expiry_delta: 9,
			htlc_minimum_msat: None,
			htlc_maximum_msat: None,
		}]];
		let mut session = source.new_payment_session(vertex(4), &hints);
		let route = session.request_route(1_000_000, 100, 1000, 40).unwrap();
		assert_eq!(route.destination(), vertex(4));
		assert_eq!(route.hops.last().unwrap().short_channel_id, 99);
	}

	#[test]
	fn bandwidth_query_limits_local_channels() {
		let logger = Arc::new(TestLogger::new());
		let mission_control = Arc::new(MissionControl::new(
			MissionControlParameters::default(),
			Arc::clone(&logger),
		));
		// Our channel 1 is drained; channel 2 has plenty.
		let source = SessionSource::new(
			Box::new(four_node_graph()),
			vertex(0),
			mission_control,
			Box::new(|edge| if edge.short_channel_id == 1 { 0 } else { u64::MAX }),
			PathFindingConfig::default(),
			logger,
		);
		let mut session = source.new_payment_session(vertex(3), &[]);
		let route = session.request_route(1_000_000, 100, 1000, 40).unwrap();
		assert_eq!(route.hops[0].short_channel_id, 2);
	}
}
