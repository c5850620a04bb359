// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Low-level infrastructure shared across the crate: serialization, logging and the
//! abstract persistent store.

#[macro_use]
pub mod logger;
pub mod persist;
pub mod ser;

#[cfg(test)]
pub(crate) mod test_utils;
