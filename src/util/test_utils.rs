// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use crate::util::logger::{Logger, Record};

use std::collections::HashMap;
use std::sync::Mutex;

pub struct TestLogger {
	pub(crate) id: String,
	/// (module, message) -> count
	pub lines: Mutex<HashMap<(String, String), usize>>,
}

impl TestLogger {
	pub fn new() -> TestLogger {
		Self::with_id("".to_owned())
	}

	pub fn with_id(id: String) -> TestLogger {
		TestLogger { id, lines: Mutex::new(HashMap::new()) }
	}

	pub fn assert_log(&self, module: &str, line: String, count: usize) {
		let log_entries = self.lines.lock().unwrap();
		assert_eq!(log_entries.get(&(module.to_string(), line)), Some(&count));
	}

	/// Search for the number of occurrences of a partially-matching message in a
	/// specified module. Useful for log messages containing non-deterministic content.
	pub fn assert_log_contains(&self, module: &str, line: &str, count: usize) {
		let log_entries = self.lines.lock().unwrap();
		let l: usize = log_entries
			.iter()
			.filter(|&(&(ref m, ref l), _c)| m == module && l.contains(line))
			.map(|(_, c)| c)
			.sum();
		assert_eq!(l, count);
	}
}

impl Logger for TestLogger {
	fn log(&self, record: Record) {
		let context = match record.payment_hash {
			Some(hash) => format!(" [{}]", hash),
			None => "".to_owned(),
		};
		let s = format!(
			"{:<5} {} [{} : {}]{} {}",
			record.level, self.id, record.module_path, record.line, context, record.args
		);
		*self
			.lines
			.lock()
			.unwrap()
			.entry((record.module_path.to_string(), format!("{}", record.args)))
			.or_insert(0) += 1;
		println!("{}", s);
	}
}
