// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Mission control: the shared reliability model which payment attempt outcomes feed
//! into and which pathfinding consults to steer around recently-failed channels and
//! nodes.
//!
//! Every observation carries a timestamp, and estimates decay exponentially back toward
//! the a-priori success probability so that a channel which failed an hour ago is
//! penalized far less than one which failed a second ago. Pathfinding never reads the
//! live state directly: it takes an immutable [`PruneView`] snapshot so that a single
//! search sees a consistent picture regardless of concurrent outcome reports.

use crate::routing::gossip::Vertex;
use crate::routing::route::Route;
use crate::util::logger::Logger;
use crate::util::ser::{DecodeError, Readable, Writeable, Writer};

use core::ops::Deref;
use core::time::Duration;
use std::collections::HashMap;
use std::io::{self, Read};
use std::sync::RwLock;

/// Parameters tuning how aggressively past failures influence future pathfinding.
#[derive(Clone, Copy, Debug)]
pub struct MissionControlParameters {
	/// The time for a failure penalty to decay halfway back to the a-priori
	/// probability.
	pub half_life: Duration,
	/// The success probability assumed for a channel or node we have no recent
	/// information about.
	pub a_priori_probability: f64,
	/// The probability mass taken from each intermediate node when an attempt fails
	/// without an identifiable failure source.
	pub unidentified_penalty: f64,
}

impl Default for MissionControlParameters {
	fn default() -> Self {
		MissionControlParameters {
			half_life: Duration::from_secs(60 * 60),
			a_priori_probability: 0.6,
			unidentified_penalty: 0.25,
		}
	}
}

/// The reason a payment attempt failed, as reported by the failing node or inferred by
/// the caller from the error it received.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttemptFailure {
	/// The attempt timed out without a conclusive error, leaving the failing hop
	/// unknown.
	Timeout,
	/// A hop could not forward because the channel lacked balance for the amount.
	InsufficientCapacity,
	/// A hop rejected the HTLC's time-lock values.
	IncorrectTimeLock,
	/// A hop was unreachable or misbehaved in a way implicating the node itself rather
	/// than a single channel.
	NodeFailure,
	/// The destination rejected the payment as unrecognized or mismatched. Terminal for
	/// the payment and not a reliability signal about the path.
	IncorrectPaymentDetails,
}

impl AttemptFailure {
	pub(crate) fn to_code(self) -> u8 {
		match self {
			AttemptFailure::Timeout => 0,
			AttemptFailure::InsufficientCapacity => 1,
			AttemptFailure::IncorrectTimeLock => 2,
			AttemptFailure::NodeFailure => 3,
			AttemptFailure::IncorrectPaymentDetails => 4,
		}
	}

	pub(crate) fn from_code(code: u8) -> Result<Self, DecodeError> {
		match code {
			0 => Ok(AttemptFailure::Timeout),
			1 => Ok(AttemptFailure::InsufficientCapacity),
			2 => Ok(AttemptFailure::IncorrectTimeLock),
			3 => Ok(AttemptFailure::NodeFailure),
			4 => Ok(AttemptFailure::IncorrectPaymentDetails),
			_ => Err(DecodeError::InvalidValue),
		}
	}
}

impl Writeable for AttemptFailure {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		self.to_code().write(w)
	}
}

impl Readable for AttemptFailure {
	fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
		let code: u8 = Readable::read(r)?;
		AttemptFailure::from_code(code)
	}
}

#[derive(Clone, Copy, Debug)]
struct NodeResult {
	probability: f64,
	timestamp: Duration,
}

#[derive(Clone, Copy, Debug)]
struct EdgeResult {
	probability: f64,
	/// The smallest amount known to have failed on this edge. Attempts below it are
	/// not implicated by the failure.
	min_failed_amt_msat: Option<u64>,
	timestamp: Duration,
}

/// The number of half-lives after which a recorded minimum failed amount is considered
/// stale and dropped entirely.
const FAILED_AMT_MEMORY_HALF_LIVES: u32 = 4;

struct MissionControlState {
	nodes: HashMap<Vertex, NodeResult>,
	edges: HashMap<(Vertex, u64), EdgeResult>,
}

/// The shared reliability model. Outcome reports update it, pathfinding snapshots it.
pub struct MissionControl<L: Deref>
where
	L::Target: Logger,
{
	params: MissionControlParameters,
	state: RwLock<MissionControlState>,
	logger: L,
}

impl<L: Deref> MissionControl<L>
where
	L::Target: Logger,
{
	/// Creates a new model with no recorded history.
	pub fn new(params: MissionControlParameters, logger: L) -> Self {
		MissionControl {
			params,
			state: RwLock::new(MissionControlState {
				nodes: HashMap::new(),
				edges: HashMap::new(),
			}),
			logger,
		}
	}

	fn decayed_probability(&self, probability: f64, timestamp: Duration, now: Duration) -> f64 {
		let elapsed = now.saturating_sub(timestamp);
		let half_lives = elapsed.as_secs_f64() / self.params.half_life.as_secs_f64();
		let a_priori = self.params.a_priori_probability;
		a_priori + (probability - a_priori) * (-half_lives).exp2()
	}

	/// The vertex sending into hop `idx`: the previous hop's node, or the route source
	/// for the first hop.
	fn edge_source(route: &Route, idx: usize) -> Vertex {
		if idx == 0 {
			route.source_pubkey
		} else {
			route.hops[idx - 1].pubkey
		}
	}

	/// The amount, in msat, carried over the channel into hop `idx`.
	fn incoming_amt_msat(route: &Route, idx: usize) -> u64 {
		if idx == 0 {
			route.total_amt_msat
		} else {
			route.hops[idx - 1].amt_to_forward_msat
		}
	}

	/// Records a failed attempt over `route`.
	///
	/// `failure_source` is the index into `route.hops` of the hop which reported the
	/// failure, or `None` when the failing hop could not be determined. A capacity
	/// failure blames exactly the channel into the failing hop, remembering the amount
	/// that did not fit; an unattributable failure spreads a light penalty across every
	/// node on the path instead.
	pub fn report_attempt_failure(
		&self, route: &Route, failure_source: Option<usize>, reason: AttemptFailure,
		now: Duration,
	) {
		let mut state = self.state.write().unwrap();
		match (failure_source, reason) {
			(_, AttemptFailure::IncorrectPaymentDetails) => {
				// The path worked end to end; the payment itself was bad.
				log_debug!(
					self.logger,
					"Destination {} rejected payment details, not penalizing path",
					route.destination()
				);
			},
			(Some(idx), AttemptFailure::InsufficientCapacity) if idx < route.hops.len() => {
				let source = Self::edge_source(route, idx);
				let scid = route.hops[idx].short_channel_id;
				let amt = Self::incoming_amt_msat(route, idx);
				let entry = state.edges.entry((source, scid)).or_insert(EdgeResult {
					probability: 0.0,
					min_failed_amt_msat: None,
					timestamp: now,
				});
				entry.probability = 0.0;
				entry.timestamp = now;
				entry.min_failed_amt_msat = Some(match entry.min_failed_amt_msat {
					Some(prev) => prev.min(amt),
					None => amt,
				});
				log_debug!(
					self.logger,
					"Recording capacity failure of {} msat on channel {} from {}",
					amt,
					scid,
					source
				);
			},
			(Some(idx), AttemptFailure::IncorrectTimeLock) if idx < route.hops.len() => {
				let source = Self::edge_source(route, idx);
				let scid = route.hops[idx].short_channel_id;
				state.edges.insert(
					(source, scid),
					EdgeResult { probability: 0.0, min_failed_amt_msat: None, timestamp: now },
				);
				log_debug!(
					self.logger,
					"Recording time-lock failure on channel {} from {}",
					scid,
					source
				);
			},
			(Some(idx), AttemptFailure::NodeFailure) if idx < route.hops.len() => {
				let node = route.hops[idx].pubkey;
				state.nodes.insert(node, NodeResult { probability: 0.0, timestamp: now });
				log_debug!(self.logger, "Recording node-level failure of {}", node);
			},
			_ => {
				// Timeout, an out-of-range index, or no failure source at all: any hop
				// may be at fault, so dilute a light penalty over the whole path.
				let penalty = 1.0 - self.params.unidentified_penalty;
				for hop in route.hops.iter() {
					let current = match state.nodes.get(&hop.pubkey) {
						Some(res) => self.decayed_probability(res.probability, res.timestamp, now),
						None => self.params.a_priori_probability,
					};
					state.nodes.insert(
						hop.pubkey,
						NodeResult { probability: current * penalty, timestamp: now },
					);
				}
				log_debug!(
					self.logger,
					"Recording unattributed failure across {} hops toward {}",
					route.hops.len(),
					route.destination()
				);
			},
		}
	}

	/// Records a fully successful attempt over `route`, clearing any penalties recorded
	/// against its channels and nodes.
	pub fn report_attempt_success(&self, route: &Route, _now: Duration) {
		let mut state = self.state.write().unwrap();
		for (idx, hop) in route.hops.iter().enumerate() {
			let source = Self::edge_source(route, idx);
			state.edges.remove(&(source, hop.short_channel_id));
			state.nodes.remove(&hop.pubkey);
		}
		log_debug!(
			self.logger,
			"Clearing penalties along successful {}-hop route to {}",
			route.hops.len(),
			route.destination()
		);
	}

	/// Takes an immutable snapshot of the model, with all decay applied as of `now`.
	pub fn get_prune_view(&self, now: Duration) -> PruneView {
		let state = self.state.read().unwrap();
		let mut nodes = HashMap::with_capacity(state.nodes.len());
		for (vertex, res) in state.nodes.iter() {
			nodes.insert(*vertex, self.decayed_probability(res.probability, res.timestamp, now));
		}
		let failed_amt_expiry = self.params.half_life * FAILED_AMT_MEMORY_HALF_LIVES;
		let mut edges = HashMap::with_capacity(state.edges.len());
		for (key, res) in state.edges.iter() {
			let min_failed_amt_msat = match res.min_failed_amt_msat {
				Some(amt) if now.saturating_sub(res.timestamp) < failed_amt_expiry => Some(amt),
				_ => None,
			};
			edges.insert(
				*key,
				EdgeReliability {
					probability: self.decayed_probability(res.probability, res.timestamp, now),
					min_failed_amt_msat,
				},
			);
		}
		PruneView { a_priori_probability: self.params.a_priori_probability, nodes, edges }
	}
}

/// The reliability estimate for one directed edge inside a [`PruneView`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EdgeReliability {
	/// The decayed success probability of the edge.
	pub probability: f64,
	/// The smallest amount recently seen to fail on the edge, if any. Smaller amounts
	/// are judged by the a-priori probability instead.
	pub min_failed_amt_msat: Option<u64>,
}

/// An immutable snapshot of [`MissionControl`], consistent for the duration of one
/// pathfinding search.
#[derive(Clone, Debug)]
pub struct PruneView {
	/// The probability assumed for nodes and edges absent from the snapshot.
	pub a_priori_probability: f64,
	nodes: HashMap<Vertex, f64>,
	edges: HashMap<(Vertex, u64), EdgeReliability>,
}

impl PruneView {
	/// A snapshot with no history, judging everything by `a_priori_probability`.
	pub fn empty(a_priori_probability: f64) -> Self {
		PruneView { a_priori_probability, nodes: HashMap::new(), edges: HashMap::new() }
	}

	/// The estimated probability that `node` successfully forwards an HTLC.
	pub fn node_probability(&self, node: &Vertex) -> f64 {
		match self.nodes.get(node) {
			Some(p) => *p,
			None => self.a_priori_probability,
		}
	}

	/// The estimated probability that the channel `short_channel_id`, sending from
	/// `source`, successfully forwards `amt_msat`.
	pub fn edge_probability(&self, source: &Vertex, short_channel_id: u64, amt_msat: u64) -> f64 {
		match self.edges.get(&(*source, short_channel_id)) {
			Some(rel) => match rel.min_failed_amt_msat {
				// An amount below the smallest known failure is not implicated by it.
				Some(min_failed) if amt_msat < min_failed => self.a_priori_probability,
				_ => rel.probability,
			},
			None => self.a_priori_probability,
		}
	}
}
