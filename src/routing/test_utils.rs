// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use crate::routing::gossip::{ChannelEdge, NetworkGraph, Vertex};

use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};

/// A deterministic vertex derived from the index, stable across test runs.
pub fn vertex(i: u8) -> Vertex {
	let secp = Secp256k1::new();
	let secret = SecretKey::from_slice(&[i + 1; 32]).unwrap();
	Vertex::from(PublicKey::from_secret_key(&secp, &secret))
}

pub fn edge(
	source: Vertex, destination: Vertex, short_channel_id: u64, fee_base_msat: u32,
	fee_proportional_millionths: u32,
) -> ChannelEdge {
	ChannelEdge {
		source,
		destination,
		short_channel_id,
		fee_base_msat,
		fee_proportional_millionths,
		cltv_expiry_delta: 40,
		htlc_minimum_msat: 1,
		htlc_maximum_msat: 100_000_000,
	}
}

/// A diamond topology: the source vertex(0) can reach vertex(3) either via vertex(1)
/// over channels 1 and 3 (cheap) or via vertex(2) over channels 2 and 4 (expensive).
///
/// ```text
///        (1)        (3)
///   v0 ------> v1 ------> v3
///    \                   ^
///     \   (2)       (4) /
///      `-----> v2 -----'
/// ```
pub fn four_node_graph() -> NetworkGraph {
	let mut graph = NetworkGraph::new();
	graph.add_edge(edge(vertex(0), vertex(1), 1, 0, 0));
	graph.add_edge(edge(vertex(0), vertex(2), 2, 0, 0));
	graph.add_edge(edge(vertex(1), vertex(3), 3, 100, 1000));
	graph.add_edge(edge(vertex(2), vertex(3), 4, 1000, 1000));
	graph
}
