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

//! The HTTP response builder.
//!
//! A response is serialized into a buffer as a status line, `Connection`
//! headers, content headers and a body. The body comes from one of three
//! sources: a memory-mapped static file (whose bytes are sent by the
//! caller after the header buffer drains), an HTML template with `<$key$>`
//! placeholders, or a small inline error page.

use crate::types::{content_type_by_name, put_params_into_html, Params, StatusCode, NEW_LINE, VERSION};
use std::path::{Path, PathBuf};
use tinyhttpd_util::buffer::{Buffer, NewLine};
use tinyhttpd_util::mapped::MappedFile;
use tinyhttpd_util::{Error, ErrorKind};

/// The HTML template used for status responses.
const HTTP_STATUS_PAGE: &str = "/http-status.html";

const STATUS_CODE_TAG: &str = "status-code";
const STATUS_TAG: &str = "status";
const MSG_TAG: &str = "msg";

pub struct Response {
	root_dir: PathBuf,
	keep_alive: bool,
}

impl Response {
	/// Create a response builder. Requested paths are resolved relative to
	/// `root_dir` unless it is empty.
	pub fn new<P: AsRef<Path>>(root_dir: P) -> Self {
		Response {
			root_dir: root_dir.as_ref().to_path_buf(),
			keep_alive: false,
		}
	}

	/// Whether the connection should keep alive.
	pub fn set_keep_alive(&mut self, set: bool) -> &mut Self {
		self.keep_alive = set;
		self
	}

	/// Build a response from a file request.
	///
	/// On success the headers land in `buf` and the mapped file is
	/// returned; the caller sends its bytes after the buffer drains. On
	/// failure the buffer holds a complete error-page response whose status
	/// reflects the failure: missing file 404, unreadable 403, anything
	/// else 400.
	pub fn build_file(&self, buf: &mut Buffer, file: &str) -> (StatusCode, Option<MappedFile>) {
		match MappedFile::map(self.resolve(file)) {
			Ok(mapped) => {
				let status = StatusCode::Ok;
				self.add_status_line(buf, status);
				self.add_headers(buf);
				buf.append_str(
					&format!("Content-type: {}", content_type_by_name(file)),
					Some(NewLine::CrLf),
				);
				buf.append_str(
					&format!("Content-length: {}", mapped.size()),
					Some(NewLine::CrLf),
				);
				buf.append_str("", Some(NewLine::CrLf));
				(status, Some(mapped))
			}
			Err(e) => {
				let status = status_for_error(&e);
				self.add_status_line(buf, status);
				self.add_headers(buf);
				self.add_error_content(buf, status, &error_message(&e));
				(status, None)
			}
		}
	}

	/// Build a response from an HTML template and parameters.
	///
	/// Placeholders without a parameter are left intact. Line endings are
	/// normalized to CRLF and `Content-length` reflects the replaced,
	/// normalized byte count.
	pub fn build_template(&self, buf: &mut Buffer, html: &str, params: &Params) -> StatusCode {
		match MappedFile::map(self.resolve(html)) {
			Ok(mapped) => {
				let status = StatusCode::Ok;
				self.add_status_line(buf, status);
				self.add_headers(buf);
				self.add_param_content(buf, html, &mapped, params);
				status
			}
			Err(e) => {
				let status = status_for_error(&e);
				self.add_status_line(buf, status);
				self.add_headers(buf);
				self.add_error_content(buf, status, &error_message(&e));
				status
			}
		}
	}

	/// Build a response from an HTTP status and an optional message.
	///
	/// The status page template is used when it can be mapped under the
	/// root directory; otherwise the inline error page is emitted with the
	/// same status code.
	pub fn build_status(&self, buf: &mut Buffer, code: StatusCode, msg: &str) -> StatusCode {
		let mut params = Params::new();
		params.insert(STATUS_CODE_TAG.to_string(), code.code().to_string());
		params.insert(STATUS_TAG.to_string(), code.reason().to_string());
		params.insert(MSG_TAG.to_string(), msg.to_string());

		self.add_status_line(buf, code);
		self.add_headers(buf);
		match MappedFile::map(self.resolve(HTTP_STATUS_PAGE)) {
			Ok(mapped) => self.add_param_content(buf, HTTP_STATUS_PAGE, &mapped, &params),
			Err(_) => self.add_error_content(buf, code, msg),
		}
		code
	}

	/// Resolve a requested path against the root directory. An HTTP path
	/// has the form `/path/to/file`; stripping the leading slash makes it
	/// relative to the root.
	fn resolve(&self, file: &str) -> PathBuf {
		if self.root_dir.as_os_str().is_empty() {
			PathBuf::from(file)
		} else {
			self.root_dir.join(file.trim_start_matches('/'))
		}
	}

	fn add_status_line(&self, buf: &mut Buffer, status: StatusCode) {
		buf.append_str(
			&format!("HTTP/{} {} {}", VERSION, status.code(), status.reason()),
			Some(NewLine::CrLf),
		);
	}

	fn add_headers(&self, buf: &mut Buffer) {
		buf.append_str("Connection: ", None);
		if self.keep_alive {
			buf.append_str("keep-alive", Some(NewLine::CrLf));
			buf.append_str("keep-alive: max=6, timeout=120", Some(NewLine::CrLf));
		} else {
			buf.append_str("close", Some(NewLine::CrLf));
		}
	}

	fn add_param_content(&self, buf: &mut Buffer, name: &str, mapped: &MappedFile, params: &Params) {
		buf.append_str(
			&format!("Content-type: {}", content_type_by_name(name)),
			Some(NewLine::CrLf),
		);

		let content = String::from_utf8_lossy(mapped.data()).into_owned();
		let content = put_params_into_html(&content, params);

		// Normalize line endings to CRLF: the length counts the joined
		// lines, not the bytes on disk.
		let lines = split_to_lines(&content);
		let length: usize = lines.iter().map(|l| l.len()).sum::<usize>()
			+ NEW_LINE.len() * (lines.len() - 1);

		buf.append_str(&format!("Content-length: {}", length), Some(NewLine::CrLf));
		buf.append_str("", Some(NewLine::CrLf));

		for (i, line) in lines.iter().enumerate() {
			if i != lines.len() - 1 {
				buf.append_str(line, Some(NewLine::CrLf));
			} else {
				buf.append_str(line, None);
			}
		}
	}

	fn add_error_content(&self, buf: &mut Buffer, status: StatusCode, msg: &str) {
		buf.append_str("Content-type: text/html", Some(NewLine::CrLf));

		let mut body = String::new();
		body.push_str(&format!("<html>{}", NEW_LINE));
		body.push_str(&format!("<title>ERROR</title>{}", NEW_LINE));
		body.push_str(&format!("<body>{}", NEW_LINE));
		body.push_str(&format!(
			"<p>{} : {}</p>{}",
			status.code(),
			status.reason(),
			NEW_LINE
		));
		if !msg.is_empty() {
			body.push_str(&format!("<p>{}</p>{}", msg, NEW_LINE));
		}
		body.push_str(&format!("</body>{}", NEW_LINE));
		body.push_str("</html>");

		buf.append_str(&format!("Content-length: {}", body.len()), Some(NewLine::CrLf));
		buf.append_str("", Some(NewLine::CrLf));
		buf.append_str(&body, None);
	}
}

/// Split text into lines regardless of LF or CRLF endings.
fn split_to_lines(content: &str) -> Vec<&str> {
	content
		.split('\n')
		.map(|line| line.strip_suffix('\r').unwrap_or(line))
		.collect()
}

fn status_for_error(e: &Error) -> StatusCode {
	match e.kind() {
		ErrorKind::NotFound(_) => StatusCode::NotFound,
		ErrorKind::Forbidden(_) => StatusCode::Forbidden,
		_ => StatusCode::BadRequest,
	}
}

/// The human-readable part of an error, used on error pages.
pub(crate) fn error_message(e: &Error) -> String {
	match e.kind() {
		ErrorKind::NotFound(msg)
		| ErrorKind::Forbidden(msg)
		| ErrorKind::InvalidInput(msg)
		| ErrorKind::SystemError(msg)
		| ErrorKind::IOError(msg) => msg,
		kind => format!("{}", kind),
	}
}

#[test]
fn test_build_by_file() -> Result<(), Error> {
	use tinyhttpd_util::testutil::write_temp_file;

	let path = write_temp_file("response-file", b"hello")?;
	let path_str = path.to_str().unwrap();

	let mut buf = Buffer::new();
	let mut response = Response::new("");
	response.set_keep_alive(true);
	let (status, mapped) = response.build_file(&mut buf, path_str);
	assert_eq!(status, StatusCode::Ok);
	let mapped = mapped.expect("the file must be mapped");
	assert_eq!(mapped.data(), b"hello");

	let content = "HTTP/1.1 200 OK\r\n\
		Connection: keep-alive\r\n\
		keep-alive: max=6, timeout=120\r\n\
		Content-type: application/octet-stream\r\n\
		Content-length: 5\r\n\
		\r\n";
	assert_eq!(buf.retrieve_all_to_string(), content);

	std::fs::remove_file(&path)?;
	Ok(())
}

#[test]
fn test_build_by_missing_file() -> Result<(), Error> {
	let mut buf = Buffer::new();
	let response = Response::new(std::env::current_dir()?);
	let (status, mapped) = response.build_file(&mut buf, "/non_existing_file");
	assert_eq!(status, StatusCode::NotFound);
	assert!(mapped.is_none());

	let content = buf.retrieve_all_to_string();
	assert!(content.starts_with("HTTP/1.1 404 Not Found\r\nConnection: close\r\n"));
	assert!(content.contains("Content-type: text/html\r\n"));
	assert!(content.contains("<p>404 : Not Found</p>\r\n"));

	// the declared length matches the literal body byte count
	let body = content.split("\r\n\r\n").nth(1).unwrap();
	let length: usize = content
		.lines()
		.find(|l| l.starts_with("Content-length: "))
		.and_then(|l| l["Content-length: ".len()..].parse().ok())
		.unwrap();
	assert_eq!(length, body.len());
	Ok(())
}

#[test]
fn test_build_by_directory() -> Result<(), Error> {
	let mut buf = Buffer::new();
	let response = Response::new("");
	let (status, mapped) = response.build_file(&mut buf, std::env::temp_dir().to_str().unwrap());
	assert_eq!(status, StatusCode::BadRequest);
	assert!(mapped.is_none());
	assert!(buf
		.retrieve_all_to_string()
		.contains("<p>400 : Bad Request</p>"));
	Ok(())
}

#[test]
fn test_build_by_template() -> Result<(), Error> {
	use tinyhttpd_util::testutil::write_temp_file;

	// LF endings on disk must be served as CRLF, and the length must count
	// the normalized bytes.
	let path = write_temp_file("response-template", b"<p><$name$> said <$msg$></p>\nbye")?;

	let mut params = Params::new();
	params.insert("name".to_string(), "mike".to_string());
	params.insert("msg".to_string(), "hello".to_string());
	params.insert("unused".to_string(), "x".to_string());

	let mut buf = Buffer::new();
	let response = Response::new("");
	let status = response.build_template(&mut buf, path.to_str().unwrap(), &params);
	assert_eq!(status, StatusCode::Ok);

	let content = buf.retrieve_all_to_string();
	let body = "<p>mike said hello</p>\r\nbye";
	assert!(content.ends_with(&format!("\r\n\r\n{}", body)));
	assert!(content.contains(&format!("Content-length: {}\r\n", body.len())));

	std::fs::remove_file(&path)?;
	Ok(())
}

#[test]
fn test_build_by_status_without_template() -> Result<(), Error> {
	// No root directory, so the status page template cannot be mapped and
	// the inline error page is used, keeping the requested status.
	let mut buf = Buffer::new();
	let response = Response::new("");
	let status = response.build_status(&mut buf, StatusCode::NotFound, "gone");
	assert_eq!(status, StatusCode::NotFound);

	let content = buf.retrieve_all_to_string();
	assert!(content.starts_with("HTTP/1.1 404 Not Found\r\n"));
	assert!(content.contains("<p>404 : Not Found</p>\r\n"));
	assert!(content.contains("<p>gone</p>\r\n"));
	Ok(())
}

#[test]
fn test_build_by_status_with_template() -> Result<(), Error> {
	use tinyhttpd_util::testutil::temp_file_path;

	let root = temp_file_path("response-root");
	std::fs::create_dir_all(&root)?;
	std::fs::write(
		root.join("http-status.html"),
		b"<p><$status-code$> <$status$>: <$msg$></p>",
	)?;

	let mut buf = Buffer::new();
	let response = Response::new(&root);
	let status = response.build_status(&mut buf, StatusCode::BadRequest, "oops");
	assert_eq!(status, StatusCode::BadRequest);

	let content = buf.retrieve_all_to_string();
	assert!(content.starts_with("HTTP/1.1 400 Bad Request\r\n"));
	assert!(content.ends_with("<p>400 Bad Request: oops</p>"));

	std::fs::remove_dir_all(&root)?;
	Ok(())
}
