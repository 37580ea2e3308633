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

use lazy_static::lazy_static;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use tinyhttpd_util::{Error, ErrorKind};

/// HTTP version: 1.1
pub const VERSION: &str = "1.1";

/// HTTP uses CRLF as the line separator.
pub const NEW_LINE: &str = "\r\n";

/// HTTP parameters consisting of key-value pairs.
pub type Params = HashMap<String, String>;

/// HTTP status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
	Ok,
	BadRequest,
	Forbidden,
	NotFound,
}

impl StatusCode {
	pub fn code(&self) -> u32 {
		match self {
			StatusCode::Ok => 200,
			StatusCode::BadRequest => 400,
			StatusCode::Forbidden => 403,
			StatusCode::NotFound => 404,
		}
	}

	pub fn reason(&self) -> &'static str {
		match self {
			StatusCode::Ok => "OK",
			StatusCode::BadRequest => "Bad Request",
			StatusCode::Forbidden => "Forbidden",
			StatusCode::NotFound => "Not Found",
		}
	}
}

impl std::fmt::Display for StatusCode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.reason())
	}
}

/// HTTP methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
	Get,
	Post,
	Put,
	Patch,
	Delete,
}

impl Method {
	pub fn as_str(&self) -> &'static str {
		match self {
			Method::Get => "GET",
			Method::Post => "POST",
			Method::Put => "PUT",
			Method::Patch => "PATCH",
			Method::Delete => "DELETE",
		}
	}
}

impl std::fmt::Display for Method {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.as_str())
	}
}

impl FromStr for Method {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self, Error> {
		match s.to_uppercase().as_str() {
			"GET" => Ok(Method::Get),
			"POST" => Ok(Method::Post),
			"PUT" => Ok(Method::Put),
			"PATCH" => Ok(Method::Patch),
			"DELETE" => Ok(Method::Delete),
			_ => Err(ErrorKind::InvalidInput(format!("Invalid HTTP method: '{}'", s)).into()),
		}
	}
}

lazy_static! {
	static ref CONTENT_TYPES: HashMap<&'static str, &'static str> = {
		let mut types = HashMap::new();
		types.insert(".html", "text/html");
		types.insert(".xml", "text/xml");
		types.insert(".xhtml", "application/xhtml+xml");
		types.insert(".txt", "text/plain");
		types.insert(".rtf", "application/rtf");
		types.insert(".pdf", "application/pdf");
		types.insert(".word", "application/nsword");
		types.insert(".png", "image/png");
		types.insert(".gif", "image/gif");
		types.insert(".jpg", "image/jpeg");
		types.insert(".jpeg", "image/jpeg");
		types.insert(".au", "audio/basic");
		types.insert(".mpeg", "video/mpeg");
		types.insert(".mpg", "video/mpeg");
		types.insert(".avi", "video/x-msvideo");
		types.insert(".gz", "application/x-gzip");
		types.insert(".tar", "application/x-tar");
		types.insert(".css", "text/css");
		types.insert(".js", "text/javascript");
		types
	};
}

/// Get a file's content type by its extension, case-insensitively.
/// `application/octet-stream` indicates arbitrary binary data.
pub fn content_type_by_name(name: &str) -> &'static str {
	let extension = Path::new(name)
		.extension()
		.map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
		.unwrap_or_default();
	CONTENT_TYPES
		.get(extension.as_str())
		.copied()
		.unwrap_or("application/octet-stream")
}

/// Decode one URL-encoded character: a `%` followed by a pair of
/// hexadecimal digits.
pub fn decode_url_char(s: &str) -> Result<char, Error> {
	const ENCODED_LENGTH: usize = 3;
	if s.len() == ENCODED_LENGTH && s.starts_with('%') {
		let ascii = u8::from_str_radix(&s[1..], 16).map_err(|_| {
			let error: Error =
				ErrorKind::InvalidInput(format!("Invalid URL-encoded character: '{}'", s)).into();
			error
		})?;
		Ok(ascii as char)
	} else {
		Err(ErrorKind::InvalidInput(format!("Invalid URL-encoded character: '{}'", s)).into())
	}
}

/// Decode an URL-encoded string. Fails on truncated or malformed `%HH`
/// sequences, and on decoded bytes that do not form valid UTF-8.
pub fn decode_url_str(s: &str) -> Result<String, Error> {
	const ENCODED_LENGTH: usize = 3;
	let bytes = s.as_bytes();
	let mut out = vec![];
	let mut i = 0;
	while i < bytes.len() {
		if bytes[i] == b'%' {
			if i + ENCODED_LENGTH > bytes.len() {
				return Err(
					ErrorKind::InvalidInput(format!("Invalid URL-encoded string: '{}'", s)).into(),
				);
			}
			let val = std::str::from_utf8(&bytes[i + 1..i + ENCODED_LENGTH])
				.ok()
				.and_then(|hex| u8::from_str_radix(hex, 16).ok())
				.ok_or_else(|| -> Error {
					ErrorKind::InvalidInput(format!("Invalid URL-encoded string: '{}'", s)).into()
				})?;
			out.push(val);
			i += ENCODED_LENGTH;
		} else {
			out.push(bytes[i]);
			i += 1;
		}
	}

	String::from_utf8(out).map_err(|_| -> Error {
		ErrorKind::InvalidInput(format!("URL-decoding '{}' is not valid UTF-8", s)).into()
	})
}

/// The HTML placeholder for a parameter: `<$key$>`.
pub fn html_placeholder(key: &str) -> String {
	format!("<${}$>", key)
}

/// Replace every placeholder in an HTML template with the corresponding
/// parameter value. Parameters without a placeholder are ignored, and
/// placeholders without a parameter are left intact.
pub fn put_params_into_html(html: &str, params: &Params) -> String {
	let mut html = html.to_string();
	for (key, val) in params {
		html = html.replace(&html_placeholder(key), val);
	}
	html
}

#[test]
fn test_status_code_conversion() -> Result<(), Error> {
	assert_eq!(StatusCode::Ok.reason(), "OK");
	assert_eq!(StatusCode::Forbidden.reason(), "Forbidden");
	assert_eq!(StatusCode::Ok.code(), 200);
	assert_eq!(StatusCode::Forbidden.code(), 403);
	Ok(())
}

#[test]
fn test_method_conversion() -> Result<(), Error> {
	assert_eq!(Method::Post.as_str(), "POST");
	assert_eq!(Method::Get.as_str(), "GET");
	assert_eq!("GET".parse::<Method>()?, Method::Get);
	assert_eq!("get".parse::<Method>()?, Method::Get);
	assert!("Unknown".parse::<Method>().is_err());
	Ok(())
}

#[test]
fn test_content_type() -> Result<(), Error> {
	assert_eq!(content_type_by_name("x.PNG"), "image/png");
	assert_eq!(content_type_by_name("x.jpg"), "image/jpeg");
	assert_eq!(content_type_by_name("unknown"), "application/octet-stream");
	assert_eq!(content_type_by_name("x.unknown"), "application/octet-stream");
	assert_eq!(content_type_by_name("path/to/x.txt"), "text/plain");
	assert_eq!(
		content_type_by_name("path/to/unknown"),
		"application/octet-stream"
	);
	Ok(())
}

#[test]
fn test_url_decoding() -> Result<(), Error> {
	assert_eq!(decode_url_char("%20")?, ' ');
	assert_eq!(decode_url_char("%21")?, '!');
	assert_eq!(decode_url_char("%25")?, '%');
	assert!(decode_url_char("").is_err());
	assert!(decode_url_char("20").is_err());
	assert!(decode_url_char("%123").is_err());

	assert_eq!(decode_url_str("")?, "");
	assert_eq!(decode_url_str("hello")?, "hello");
	assert_eq!(decode_url_str("hello%20world")?, "hello world");
	assert_eq!(decode_url_str("go%21")?, "go!");
	assert_eq!(decode_url_str("%25")?, "%");
	assert!(decode_url_str("hello%2").is_err());
	Ok(())
}

#[test]
fn test_html_placeholder() -> Result<(), Error> {
	assert_eq!(html_placeholder("name"), "<$name$>");
	assert_eq!(html_placeholder("id"), "<$id$>");
	Ok(())
}

#[test]
fn test_put_params_into_html() -> Result<(), Error> {
	// parameters without a matching placeholder are ignored
	let mut params = Params::new();
	params.insert("name".to_string(), "mike".to_string());
	assert_eq!(put_params_into_html("", &params), "");

	let template = "<html>\r\n<body>\r\n<p><$name$> said <$msg$>, <$msg$></p>\r\n</body>\r\n</html>";

	// partial replacement leaves the other placeholders intact
	assert_eq!(
		put_params_into_html(template, &params),
		"<html>\r\n<body>\r\n<p>mike said <$msg$>, <$msg$></p>\r\n</body>\r\n</html>"
	);

	params.insert("msg".to_string(), "hello".to_string());
	assert_eq!(
		put_params_into_html(template, &params),
		"<html>\r\n<body>\r\n<p>mike said hello, hello</p>\r\n</body>\r\n</html>"
	);
	Ok(())
}
