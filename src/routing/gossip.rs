// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The channel graph interface which pathfinding runs against, plus an in-memory
//! implementation and the hop-hint types invoices use to advertise unannounced
//! channels.

use crate::util::ser::{DecodeError, Readable, Writeable, Writer};

use bitcoin::secp256k1::PublicKey;

use core::fmt;
use std::collections::HashMap;
use std::io::{self, Read};

/// A node identifier in the channel graph: a compressed secp256k1 public key.
///
/// Stored as raw bytes rather than a validated key since graph traversal never needs
/// the curve point, only equality and hashing.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Vertex([u8; 33]);

impl Vertex {
	/// Wraps a 33-byte serialized compressed public key.
	pub fn from_slice(bytes: &[u8]) -> Result<Self, DecodeError> {
		match bytes.try_into() {
			Ok(arr) => Ok(Vertex(arr)),
			Err(_) => Err(DecodeError::InvalidValue),
		}
	}

	/// Returns the raw key bytes.
	pub fn as_array(&self) -> &[u8; 33] {
		&self.0
	}

	/// Converts to a validated [`PublicKey`], failing if the bytes do not lie on the
	/// curve.
	pub fn as_pubkey(&self) -> Result<PublicKey, DecodeError> {
		PublicKey::from_slice(&self.0).map_err(|_| DecodeError::InvalidValue)
	}
}

impl From<PublicKey> for Vertex {
	fn from(pubkey: PublicKey) -> Self {
		Vertex(pubkey.serialize())
	}
}

impl fmt::Display for Vertex {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		for byte in self.0.iter() {
			write!(f, "{:02x}", byte)?;
		}
		Ok(())
	}
}

impl fmt::Debug for Vertex {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "Vertex({})", self)
	}
}

impl Writeable for Vertex {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		self.0.write(w)
	}
}

impl Readable for Vertex {
	fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
		let buf: [u8; 33] = Readable::read(r)?;
		Ok(Vertex(buf))
	}
}

/// One directed channel edge: the forwarding policy `source` advertises for HTLCs it
/// sends toward `destination` over this channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelEdge {
	/// The node this policy belongs to.
	pub source: Vertex,
	/// The node HTLCs are forwarded toward.
	pub destination: Vertex,
	/// The channel's short id, unique network-wide.
	pub short_channel_id: u64,
	/// The flat fee charged per forwarded HTLC, in millisatoshis.
	pub fee_base_msat: u32,
	/// The proportional fee charged per forwarded HTLC, in millionths of the amount.
	pub fee_proportional_millionths: u32,
	/// The number of blocks `source` requires between the incoming and outgoing HTLC
	/// expiries.
	pub cltv_expiry_delta: u16,
	/// The smallest HTLC the channel will forward, in millisatoshis.
	pub htlc_minimum_msat: u64,
	/// The largest HTLC the channel will forward, in millisatoshis.
	pub htlc_maximum_msat: u64,
}

impl ChannelEdge {
	/// The fee charged for forwarding `amt_msat` over this edge, in millisatoshis.
	///
	/// Saturates rather than wrapping: a policy whose fee overflows u64 simply prices
	/// itself out of every route.
	pub fn fee_msat(&self, amt_msat: u64) -> u64 {
		let proportional =
			(amt_msat as u128 * self.fee_proportional_millionths as u128) / 1_000_000;
		(self.fee_base_msat as u128 + proportional).try_into().unwrap_or(u64::MAX)
	}
}

/// A read-only view of the channel topology.
///
/// Pathfinding only needs to enumerate the edges adjacent to a node; how the graph is
/// stored and synchronized with the network is the implementor's concern.
pub trait ChannelGraph {
	/// Calls `f` once per channel over which `node` can send, with `node` as the edge's
	/// source.
	fn for_each_outgoing_channel(&self, node: &Vertex, f: &mut dyn FnMut(&ChannelEdge));

	/// Calls `f` once per channel over which `node` can receive, with `node` as the
	/// edge's destination.
	fn for_each_incoming_channel(&self, node: &Vertex, f: &mut dyn FnMut(&ChannelEdge));
}

/// A [`ChannelGraph`] backed by in-memory adjacency maps.
#[derive(Default)]
pub struct NetworkGraph {
	outgoing: HashMap<Vertex, Vec<ChannelEdge>>,
	incoming: HashMap<Vertex, Vec<ChannelEdge>>,
}

impl NetworkGraph {
	/// Creates an empty graph.
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds a directed edge. The reverse direction of a channel is a separate edge with
	/// its own policy.
	pub fn add_edge(&mut self, edge: ChannelEdge) {
		self.incoming.entry(edge.destination).or_default().push(edge.clone());
		self.outgoing.entry(edge.source).or_default().push(edge);
	}
}

impl ChannelGraph for NetworkGraph {
	fn for_each_outgoing_channel(&self, node: &Vertex, f: &mut dyn FnMut(&ChannelEdge)) {
		if let Some(edges) = self.outgoing.get(node) {
			for edge in edges.iter() {
				f(edge);
			}
		}
	}

	fn for_each_incoming_channel(&self, node: &Vertex, f: &mut dyn FnMut(&ChannelEdge)) {
		if let Some(edges) = self.incoming.get(node) {
			for edge in edges.iter() {
				f(edge);
			}
		}
	}
}

/// Fees for routing via a given channel or a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoutingFees {
	/// Flat amount charged per forwarded HTLC, in millisatoshis.
	pub base_msat: u32,
	/// Amount charged per forwarded HTLC, in millionths of the transferred amount.
	pub proportional_millionths: u32,
}

/// A channel descriptor for a hop along a payment path, typically taken from an invoice
/// to reach a destination over channels the public graph does not carry.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteHintHop {
	/// The node id of the non-target end of the route.
	pub src_node_id: Vertex,
	/// The short channel id of this channel.
	pub short_channel_id: u64,
	/// The fees which must be paid to use this channel.
	pub fees: RoutingFees,
	/// The difference in CLTV values between this node and the next node.
	pub cltv_expiry_delta: u16,
	/// The minimum value, in msat, which must be relayed to the next hop.
	pub htlc_minimum_msat: Option<u64>,
	/// The maximum value in msat available for routing with a single HTLC.
	pub htlc_maximum_msat: Option<u64>,
}

impl RouteHintHop {
	/// Expands this hint into a full edge toward `destination`, filling unspecified
	/// limits with the widest values.
	pub fn to_edge(&self, destination: Vertex) -> ChannelEdge {
		ChannelEdge {
			source: self.src_node_id,
			destination,
			short_channel_id: self.short_channel_id,
			fee_base_msat: self.fees.base_msat,
			fee_proportional_millionths: self.fees.proportional_millionths,
			cltv_expiry_delta: self.cltv_expiry_delta,
			htlc_minimum_msat: self.htlc_minimum_msat.unwrap_or(0),
			htlc_maximum_msat: self.htlc_maximum_msat.unwrap_or(u64::MAX),
		}
	}
}
