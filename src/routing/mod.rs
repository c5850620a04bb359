// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Structs and impls for finding routes through the channel graph and learning from
//! the attempts made over them.

pub mod gossip;
pub mod mission_control;
pub mod payment_session;
pub mod route;
pub mod router;

#[cfg(test)]
pub(crate) mod test_utils;
