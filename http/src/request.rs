// Copyright 2022 The TinyHttpd Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The HTTP request parser.

use crate::types::{decode_url_str, Method, Params, NEW_LINE, VERSION};
use lazy_static::lazy_static;
use regex::Regex;
use tinyhttpd_util::buffer::Buffer;
use tinyhttpd_util::{Error, ErrorKind};

lazy_static! {
	static ref STATUS_LINE: Regex = Regex::new("^([^ ]*) ([^ ]*) HTTP/([^ ]*)$").unwrap();
	static ref HEADER_LINE: Regex = Regex::new("^([^:]*): ?(.*)$").unwrap();
}

const URL_ENCODED_FORM: &str = "application/x-www-form-urlencoded";

/// The parsing state. The request is parsed line by line: the status line
/// first, then headers until an empty line, then the body.
#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
	NotStarted,
	Headers,
	Body,
	Finished,
}

/// The HTTP request parser.
///
/// The parser is single-shot: [`Request::parse`] clears any previous state
/// and drives the state machine until the buffer is empty or a line is
/// rejected.
pub struct Request {
	state: State,
	method: Method,
	version: String,
	path: String,
	headers: Vec<(String, String)>,
	post: Params,
}

impl Default for Request {
	fn default() -> Self {
		Request {
			state: State::NotStarted,
			method: Method::Get,
			version: String::new(),
			path: String::new(),
			headers: vec![],
			post: Params::new(),
		}
	}
}

impl Request {
	pub fn new() -> Self {
		Default::default()
	}

	/// Parse an HTTP request, consuming the buffer's readable bytes line by
	/// line (each line's CRLF included).
	pub fn parse(&mut self, buf: &mut Buffer) -> Result<(), Error> {
		self.clear();
		if buf.is_empty() {
			return Err(ErrorKind::InvalidInput("The buffer is empty".to_string()).into());
		}

		let content = buf.readable_string();
		let mut rest = content.as_str();
		while !rest.is_empty() {
			let (line, consumed) = match rest.find(NEW_LINE) {
				Some(pos) => (&rest[..pos], pos + NEW_LINE.len()),
				None => (rest, rest.len()),
			};

			self.parse_line(line)?;
			buf.retrieve(consumed);
			rest = &rest[consumed..];
		}

		Ok(())
	}

	fn parse_line(&mut self, line: &str) -> Result<(), Error> {
		match self.state {
			State::NotStarted => self.parse_status_line(line),
			State::Headers => self.parse_header(line),
			State::Body => self.parse_body(line),
			State::Finished => {
				Err(ErrorKind::InvalidInput("The parsing should have finished".to_string()).into())
			}
		}
	}

	fn parse_status_line(&mut self, line: &str) -> Result<(), Error> {
		match STATUS_LINE.captures(line) {
			Some(caps) => {
				self.method = caps[1].parse()?;
				self.path = caps[2].to_string();
				self.version = caps[3].to_string();
				self.state = State::Headers;
				Ok(())
			}
			None => {
				Err(ErrorKind::InvalidInput(format!("Invalid HTTP status line: '{}'", line)).into())
			}
		}
	}

	fn parse_header(&mut self, line: &str) -> Result<(), Error> {
		if line.is_empty() {
			self.state = State::Body;
			return Ok(());
		}
		match HEADER_LINE.captures(line) {
			Some(caps) => {
				self.headers.push((caps[1].to_string(), caps[2].to_string()));
				Ok(())
			}
			None => Err(ErrorKind::InvalidInput(
				"There must be an empty line between HTTP headers and the body".to_string(),
			)
			.into()),
		}
	}

	fn parse_body(&mut self, body: &str) -> Result<(), Error> {
		match self.method {
			Method::Post => self.parse_post(body)?,
			method => {
				return Err(ErrorKind::InvalidInput(format!(
					"Unsupported HTTP method: '{}'",
					method
				))
				.into());
			}
		}

		self.state = State::Finished;
		Ok(())
	}

	fn parse_post(&mut self, body: &str) -> Result<(), Error> {
		let content_type = self.header("Content-Type").unwrap_or("");
		if content_type == URL_ENCODED_FORM {
			self.parse_url_encoded_post(body)
		} else {
			Err(ErrorKind::InvalidInput(format!(
				"Unsupported HTTP content type: '{}'",
				content_type
			))
			.into())
		}
	}

	/// Parse `k=v(&k=v)*`. `+` decodes to a space and `%HH` to the byte
	/// with that hexadecimal value. Empty keys, empty values and duplicate
	/// keys are rejected.
	fn parse_url_encoded_post(&mut self, body: &str) -> Result<(), Error> {
		for pair in body.split('&') {
			let (key, val) = match pair.find('=') {
				Some(pos) => (&pair[..pos], &pair[pos + 1..]),
				None => {
					return Err(ErrorKind::InvalidInput(format!(
						"Invalid HTTP POST data: '{}'",
						body
					))
					.into());
				}
			};

			let key = decode_form_component(key)?;
			let val = decode_form_component(val)?;
			if key.is_empty() || val.is_empty() || self.post.contains_key(&key) {
				return Err(
					ErrorKind::InvalidInput(format!("Invalid HTTP POST data: '{}'", body)).into(),
				);
			}
			self.post.insert(key, val);
		}
		Ok(())
	}

	fn clear(&mut self) {
		self.state = State::NotStarted;
		self.method = Method::Get;
		self.version.clear();
		self.path.clear();
		self.headers.clear();
		self.post.clear();
	}

	/// Get an HTTP header by its key. The query is case-sensitive.
	pub fn header(&self, key: &str) -> Option<&str> {
		self.headers
			.iter()
			.find(|(k, _)| k == key)
			.map(|(_, v)| v.as_str())
	}

	/// Get an HTTP POST variable by its key. The query is case-sensitive.
	pub fn post(&self, key: &str) -> Option<&str> {
		self.post.get(key).map(|v| v.as_str())
	}

	pub fn post_size(&self) -> usize {
		self.post.len()
	}

	pub fn header_size(&self) -> usize {
		self.headers.len()
	}

	pub fn method(&self) -> Method {
		self.method
	}

	pub fn path(&self) -> &str {
		&self.path
	}

	pub fn version(&self) -> &str {
		&self.version
	}

	/// Whether the request keeps the connection alive: HTTP/1.1 with a
	/// `Connection: keep-alive` header.
	pub fn keep_alive(&self) -> bool {
		match self.header("Connection") {
			Some(conn) => self.version == VERSION && conn == "keep-alive",
			None => false,
		}
	}
}

fn decode_form_component(s: &str) -> Result<String, Error> {
	decode_url_str(&s.replace('+', " "))
}

#[test]
fn test_parse_post_without_form() -> Result<(), Error> {
	let mut buf = Buffer::from_str(
		"POST /path/to/file HTTP/1.1\r\n\
		Host: server.id\r\n\
		Content-Type: application/x-www-form-urlencoded\r\n\
		Content-Length: 0\r\n\
		\r\n",
	);

	let mut request = Request::new();
	request.parse(&mut buf)?;
	assert!(buf.is_empty());
	assert_eq!(request.method(), Method::Post);
	assert_eq!(request.path(), "/path/to/file");
	assert_eq!(request.header_size(), 3);
	assert_eq!(request.header("Content-Length"), Some("0"));
	assert_eq!(request.post_size(), 0);
	assert!(!request.keep_alive());
	Ok(())
}

#[test]
fn test_parse_post_with_single_field() -> Result<(), Error> {
	let mut buf = Buffer::from_str(
		"POST /file HTTP/1.1\r\n\
		Host: server.id\r\n\
		Content-Type: application/x-www-form-urlencoded\r\n\
		Content-Length: 4\r\n\
		\r\n\
		id=1",
	);

	let mut request = Request::new();
	request.parse(&mut buf)?;
	assert!(!request.keep_alive());
	assert_eq!(request.version(), "1.1");
	assert_eq!(request.path(), "/file");
	assert_eq!(request.method(), Method::Post);

	assert_eq!(request.header("Content-Length"), Some("4"));
	assert_eq!(
		request.header("Content-Type"),
		Some("application/x-www-form-urlencoded")
	);
	assert_eq!(request.header("Host"), Some("server.id"));
	assert_eq!(request.header("Connection"), None);

	assert_eq!(request.post("id"), Some("1"));
	assert_eq!(request.post("name"), None);

	// queries are case-sensitive
	assert_eq!(request.post("ID"), None);
	assert_eq!(request.header("host"), None);
	assert_eq!(request.header("HOST"), None);

	assert_eq!(request.post_size(), 1);
	Ok(())
}

#[test]
fn test_parse_post_with_encoded_form() -> Result<(), Error> {
	let mut buf = Buffer::from_str(
		"POST /path/to/file HTTP/1.1\r\n\
		Host: server.id\r\n\
		Connection: keep-alive\r\n\
		Content-Type: application/x-www-form-urlencoded\r\n\
		Content-Length: 32\r\n\
		\r\n\
		id=1&name=mike+chen&msg=hello%21",
	);

	let mut request = Request::new();
	request.parse(&mut buf)?;
	assert!(request.keep_alive());
	assert_eq!(request.post("id"), Some("1"));
	assert_eq!(request.post("name"), Some("mike chen"));
	assert_eq!(request.post("msg"), Some("hello!"));
	assert_eq!(request.post_size(), 3);
	Ok(())
}

#[test]
fn test_keep_alive_detection() -> Result<(), Error> {
	// any other version or header value means no keep-alive
	let mut buf = Buffer::from_str(
		"POST /file HTTP/1.0\r\n\
		Connection: keep-alive\r\n\
		Content-Type: application/x-www-form-urlencoded\r\n\
		\r\n",
	);
	let mut request = Request::new();
	request.parse(&mut buf)?;
	assert!(!request.keep_alive());

	let mut buf = Buffer::from_str(
		"POST /file HTTP/1.1\r\n\
		Connection: close\r\n\
		Content-Type: application/x-www-form-urlencoded\r\n\
		\r\n",
	);
	request.parse(&mut buf)?;
	assert!(!request.keep_alive());
	Ok(())
}

#[test]
fn test_parse_rejects_malformed_requests() -> Result<(), Error> {
	// missing empty line between headers and body
	let mut buf = Buffer::from_str(
		"POST /path/to/file HTTP/1.1\r\n\
		Host: server.id\r\n\
		Content-Type: application/x-www-form-urlencoded\r\n\
		Content-Length: 4\r\n\
		invalid body without an empty line",
	);
	let mut request = Request::new();
	assert!(request.parse(&mut buf).is_err());

	// unknown method
	let mut buf = Buffer::from_str("FETCH /file HTTP/1.1\r\n\r\n");
	assert!(request.parse(&mut buf).is_err());

	// malformed status line
	let mut buf = Buffer::from_str("POST HTTP/1.1\r\n\r\n");
	assert!(request.parse(&mut buf).is_err());

	// empty buffer
	let mut buf = Buffer::new();
	assert!(request.parse(&mut buf).is_err());
	Ok(())
}

#[test]
fn test_parse_rejects_bad_form_data() -> Result<(), Error> {
	let request_for = |body: &str| {
		format!(
			"POST /file HTTP/1.1\r\n\
			Content-Type: application/x-www-form-urlencoded\r\n\
			\r\n\
			{}",
			body
		)
	};

	let mut request = Request::new();
	for body in &["=1", "id=", "id=1&id=2", "id", "id=1&", "a=%2"] {
		let mut buf = Buffer::from_str(&request_for(body));
		assert!(request.parse(&mut buf).is_err(), "body '{}' must fail", body);
	}

	// unsupported content type
	let mut buf = Buffer::from_str(
		"POST /file HTTP/1.1\r\n\
		Content-Type: application/json\r\n\
		\r\n\
		{}",
	);
	assert!(request.parse(&mut buf).is_err());
	Ok(())
}

#[test]
fn test_parse_rejects_input_after_body() -> Result<(), Error> {
	let mut buf = Buffer::from_str(
		"POST /file HTTP/1.1\r\n\
		Content-Type: application/x-www-form-urlencoded\r\n\
		\r\n\
		id=1\r\n\
		more",
	);
	let mut request = Request::new();
	assert!(request.parse(&mut buf).is_err());
	Ok(())
}
