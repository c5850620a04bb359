// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The payment routing and attempt tracking core of a Lightning-style payment channel
//! network node.
//!
//! Given a destination and an amount, this crate repeatedly proposes candidate multi-hop
//! routes over a channel graph, durably records each payment attempt before it is
//! dispatched, and feeds attempt outcomes back into a shared reliability model ("mission
//! control") so that later attempts steer around channels and nodes which recently
//! failed.
//!
//! The crate deliberately does not know how bytes reach peers, how onion payloads are
//! built, or how channels are funded and closed. Instead it is generic over a handful of
//! collaborator interfaces:
//!
//!  * [`routing::gossip::ChannelGraph`] — a read-only view of the channel topology,
//!  * [`util::persist::KVStore`] — an ordered key/value store with atomic transactions,
//!  * [`util::logger::Logger`] — the host's logging sink.
//!
//! The main entry points are [`routing::payment_session::SessionSource`] for producing
//! routes, [`ln::payment_store::PaymentStore`] for the durable payment lifecycle, and
//! [`routing::mission_control::MissionControl`] for outcome reporting.

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(missing_docs)]

#[macro_use]
pub mod util;
pub mod ln;
pub mod routing;
pub mod types;
