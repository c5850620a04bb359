// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The [`Route`] object, describing a fully-specified multi-hop path through the channel
//! graph, and its wire serialization.

use crate::routing::gossip::Vertex;
use crate::util::ser::{BigSize, DecodeError, Readable, TlvRecord, Writeable, Writer};

use core::fmt;
use std::io::{self, Read};

/// The maximum number of hops a route may traverse, bounding both pathfinding work and
/// the size of the onion the sender must construct.
pub const MAX_ROUTE_HOPS: usize = 20;

/// The per-hop payload format, determining how forwarding instructions are delivered to
/// the hop inside the onion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HopPayload {
	/// The fixed-size legacy payload carrying only the forwarding amount, time-lock and
	/// channel id.
	Legacy,
	/// A stream of TLV records, sorted strictly ascending by type. Records this node
	/// does not understand are preserved opaquely across serialization.
	Tlv(Vec<TlvRecord>),
}

/// One hop in a [`Route`].
///
/// The amount and time-lock are those the hop must forward onward, i.e. the values of
/// the outgoing HTLC on `short_channel_id`'s downstream side. The hop's own fee and
/// time-lock delta are the differences from the incoming HTLC, which the previous hop's
/// fields (or the route totals, for the first hop) determine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteHop {
	/// The node id of this hop.
	pub pubkey: Vertex,
	/// The channel over which the HTLC reaches this hop.
	pub short_channel_id: u64,
	/// The absolute block height the outgoing HTLC is locked until.
	pub outgoing_cltv: u32,
	/// The amount this hop forwards onward, in millisatoshis.
	pub amt_to_forward_msat: u64,
	/// The payload format for this hop's onion instructions.
	pub payload: HopPayload,
}

/// Errors returned when constructing or validating a [`Route`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteError {
	/// A route must have at least one hop.
	NoHops,
	/// A route may have at most [`MAX_ROUTE_HOPS`] hops.
	TooManyHops,
	/// Amounts must be non-increasing and time-locks non-decreasing toward the
	/// destination. A hop violating this cannot cover its own fee or delta.
	InvalidHopOrdering,
}

impl fmt::Display for RouteError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			RouteError::NoHops => f.write_str("route has no hops"),
			RouteError::TooManyHops => f.write_str("route exceeds the maximum hop count"),
			RouteError::InvalidHopOrdering =>
				f.write_str("route hop amounts or time-locks are inconsistent"),
		}
	}
}

impl std::error::Error for RouteError {}

/// A fully-specified path from a source node to a destination, along with the total
/// amount and time-lock the first HTLC must carry.
///
/// The totals cover all downstream fees and time-lock deltas: `total_amt_msat` is what
/// the source sends, while `hops.last().amt_to_forward_msat` is what the destination
/// receives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
	/// The absolute block height the first HTLC is locked until.
	pub total_time_lock: u32,
	/// The amount the source sends into the first channel, in millisatoshis.
	pub total_amt_msat: u64,
	/// The node the route starts from.
	pub source_pubkey: Vertex,
	/// The hops of the route, ordered from the first forwarding node to the
	/// destination.
	pub hops: Vec<RouteHop>,
}

impl Route {
	/// Constructs a route after validating the hop sequence.
	///
	/// Amounts must be non-increasing and time-locks non-decreasing along `hops`, with
	/// the totals at least as large as the first hop's values.
	pub fn new(
		total_time_lock: u32, total_amt_msat: u64, source_pubkey: Vertex, hops: Vec<RouteHop>,
	) -> Result<Route, RouteError> {
		let route = Route { total_time_lock, total_amt_msat, source_pubkey, hops };
		route.validate()?;
		Ok(route)
	}

	fn validate(&self) -> Result<(), RouteError> {
		if self.hops.is_empty() {
			return Err(RouteError::NoHops);
		}
		if self.hops.len() > MAX_ROUTE_HOPS {
			return Err(RouteError::TooManyHops);
		}
		let mut prev_amt = self.total_amt_msat;
		let mut prev_cltv = self.total_time_lock;
		for hop in self.hops.iter() {
			if hop.amt_to_forward_msat > prev_amt || hop.outgoing_cltv > prev_cltv {
				return Err(RouteError::InvalidHopOrdering);
			}
			prev_amt = hop.amt_to_forward_msat;
			prev_cltv = hop.outgoing_cltv;
		}
		Ok(())
	}

	/// The destination node of the route.
	pub fn destination(&self) -> Vertex {
		// validate() guarantees at least one hop.
		self.hops.last().map(|hop| hop.pubkey).unwrap_or(self.source_pubkey)
	}

	/// The amount the destination receives, in millisatoshis.
	pub fn received_amt_msat(&self) -> u64 {
		self.hops.last().map(|hop| hop.amt_to_forward_msat).unwrap_or(self.total_amt_msat)
	}

	/// The total fee paid to forwarding nodes, in millisatoshis.
	pub fn total_fees_msat(&self) -> u64 {
		self.total_amt_msat - self.received_amt_msat()
	}
}

const HOP_FLAG_LEGACY: u8 = 0;
const HOP_FLAG_TLV: u8 = 1;

impl Writeable for RouteHop {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		self.pubkey.write(w)?;
		self.short_channel_id.write(w)?;
		self.outgoing_cltv.write(w)?;
		self.amt_to_forward_msat.write(w)?;
		match self.payload {
			HopPayload::Legacy => HOP_FLAG_LEGACY.write(w),
			HopPayload::Tlv(ref records) => {
				HOP_FLAG_TLV.write(w)?;
				let mut stream = crate::util::ser::VecWriter(Vec::new());
				crate::util::ser::write_tlv_stream(&mut stream, records)?;
				BigSize(stream.0.len() as u64).write(w)?;
				w.write_all(&stream.0)
			},
		}
	}
}

impl Readable for RouteHop {
	fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
		let pubkey: Vertex = Readable::read(r)?;
		let short_channel_id: u64 = Readable::read(r)?;
		let outgoing_cltv: u32 = Readable::read(r)?;
		let amt_to_forward_msat: u64 = Readable::read(r)?;
		let flag: u8 = Readable::read(r)?;
		let payload = match flag {
			HOP_FLAG_LEGACY => HopPayload::Legacy,
			HOP_FLAG_TLV => {
				let len: BigSize = Readable::read(r)?;
				if len.0 > crate::util::ser::MAX_BUF_SIZE as u64 {
					return Err(DecodeError::BadLengthDescriptor);
				}
				let mut stream = crate::util::ser::FixedLengthReader::new(&mut *r, len.0);
				let records = crate::util::ser::read_tlv_stream(&mut stream)?;
				if stream.bytes_remain() {
					return Err(DecodeError::InvalidValue);
				}
				HopPayload::Tlv(records)
			},
			_ => return Err(DecodeError::InvalidValue),
		};
		Ok(RouteHop { pubkey, short_channel_id, outgoing_cltv, amt_to_forward_msat, payload })
	}
}

impl Writeable for Route {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		self.total_time_lock.write(w)?;
		self.total_amt_msat.write(w)?;
		self.source_pubkey.write(w)?;
		BigSize(self.hops.len() as u64).write(w)?;
		for hop in self.hops.iter() {
			hop.write(w)?;
		}
		Ok(())
	}
}

impl Readable for Route {
	fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
		let total_time_lock: u32 = Readable::read(r)?;
		let total_amt_msat: u64 = Readable::read(r)?;
		let source_pubkey: Vertex = Readable::read(r)?;
		let hop_count: BigSize = Readable::read(r)?;
		if hop_count.0 == 0 || hop_count.0 > MAX_ROUTE_HOPS as u64 {
			return Err(DecodeError::InvalidValue);
		}
		let mut hops = Vec::with_capacity(hop_count.0 as usize);
		for _ in 0..hop_count.0 {
			hops.push(Readable::read(r)?);
		}
		Route::new(total_time_lock, total_amt_msat, source_pubkey, hops)
			.map_err(|_| DecodeError::InvalidValue)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::routing::test_utils::vertex;
	use crate::util::ser::TlvRecord;

	fn hop(pubkey: Vertex, scid: u64, cltv: u32, amt: u64) -> RouteHop {
		RouteHop {
			pubkey,
			short_channel_id: scid,
			outgoing_cltv: cltv,
			amt_to_forward_msat: amt,
			payload: HopPayload::Tlv(Vec::new()),
		}
	}

	#[test]
	fn route_requires_hops() {
		assert_eq!(
			Route::new(100, 1000, vertex(0), Vec::new()),
			Err(RouteError::NoHops)
		);
	}

	#[test]
	fn route_rejects_fee_inversion() {
		// The second hop claims to forward more than it received.
		let hops = vec![hop(vertex(1), 1, 140, 1000), hop(vertex(2), 2, 100, 1100)];
		assert_eq!(
			Route::new(180, 1010, vertex(0), hops),
			Err(RouteError::InvalidHopOrdering)
		);
	}

	#[test]
	fn route_rejects_time_lock_inversion() {
		let hops = vec![hop(vertex(1), 1, 140, 1000), hop(vertex(2), 2, 150, 900)];
		assert_eq!(
			Route::new(180, 1010, vertex(0), hops),
			Err(RouteError::InvalidHopOrdering)
		);
	}

	#[test]
	fn route_accessors() {
		let hops = vec![hop(vertex(1), 1, 140, 1000), hop(vertex(2), 2, 100, 900)];
		let route = Route::new(180, 1010, vertex(0), hops).unwrap();
		assert_eq!(route.destination(), vertex(2));
		assert_eq!(route.received_amt_msat(), 900);
		assert_eq!(route.total_fees_msat(), 110);
	}

	#[test]
	fn route_round_trips_with_unknown_tlv_records() {
		let hops = vec![
			RouteHop {
				pubkey: vertex(1),
				short_channel_id: 42,
				outgoing_cltv: 140,
				amt_to_forward_msat: 1000,
				payload: HopPayload::Tlv(vec![
					TlvRecord::new(2, vec![1, 2, 3]),
					TlvRecord::new(65537, vec![0xaa]),
				]),
			},
			RouteHop {
				pubkey: vertex(2),
				short_channel_id: 43,
				outgoing_cltv: 100,
				amt_to_forward_msat: 900,
				payload: HopPayload::Legacy,
			},
		];
		let route = Route::new(180, 1010, vertex(0), hops).unwrap();
		let encoded = route.encode();
		let decoded: Route = Readable::read(&mut &encoded[..]).unwrap();
		assert_eq!(decoded, route);
		assert_eq!(decoded.encode(), encoded);
	}

	#[test]
	fn route_decode_rejects_zero_hops() {
		let route = Route::new(
			180,
			1010,
			vertex(0),
			vec![hop(vertex(1), 1, 140, 1000)],
		)
		.unwrap();
		let mut encoded = route.encode();
		// Patch the hop count varint (offset 4 + 8 + 33) to zero and truncate the hop.
		encoded[45] = 0;
		encoded.truncate(46);
		assert_eq!(
			<Route as Readable>::read(&mut &encoded[..]),
			Err(DecodeError::InvalidValue)
		);
	}
}
