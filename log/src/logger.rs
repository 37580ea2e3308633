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

use chrono::{DateTime, Local};
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tinyhttpd_util::deque::BlockDeque;
use tinyhttpd_util::lock;
use tinyhttpd_util::{Error, ErrorKind};

/// The default format pattern.
///
/// Supported tags:
/// - `%m`: the event message
/// - `%p`: the event level
/// - `%t`: the thread id
/// - `%c`: the logger name
/// - `%d{..}`: the event time, formatted with the strftime string in braces
/// - `%f`: the file name
/// - `%l`: the line number
/// - `%n`: a new line
/// - `%T`: a tab character
const DEFAULT_PATTERN: &str = "%d{%Y-%m-%d %H:%M:%S}%T%t%T[%p]%T[%c]%T<%f:%l>%T%m%n";

const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const ROOT_LOGGER: &str = "root";

lazy_static! {
	static ref ROOT_MANAGER: Arc<Manager> = Arc::new(Manager::new("root"));
}

/// Get the global logger manager.
pub fn root_manager() -> Arc<Manager> {
	ROOT_MANAGER.clone()
}

/// Get the global root logger. It is created on first use with a single
/// stdout appender.
pub fn root_logger() -> Arc<Logger> {
	let manager = root_manager();
	let (logger, created) = manager.find_or_create(ROOT_LOGGER, Level::Info, None);
	if created {
		logger.add_appender(Arc::new(StdOutAppender::new(None)));
	}
	logger
}

/// Event levels, ordered from the most verbose to the most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
	Debug = 0,
	Info = 1,
	Warn = 2,
	Error = 3,
	Fatal = 4,
}

impl Level {
	pub fn as_str(&self) -> &'static str {
		match self {
			Level::Debug => "Debug",
			Level::Info => "Info",
			Level::Warn => "Warn",
			Level::Error => "Error",
			Level::Fatal => "Fatal",
		}
	}
}

impl std::fmt::Display for Level {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.as_str())
	}
}

impl FromStr for Level {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self, Error> {
		match s.to_uppercase().as_str() {
			"DEBUG" => Ok(Level::Debug),
			"INFO" => Ok(Level::Info),
			"WARN" => Ok(Level::Warn),
			"ERROR" => Ok(Level::Error),
			"FATAL" => Ok(Level::Fatal),
			_ => Err(ErrorKind::InvalidInput(format!("Invalid log level: '{}'", s)).into()),
		}
	}
}

/// A log event: the message plus where and when it happened.
pub struct Event {
	pub level: Level,
	pub file: &'static str,
	pub line: u32,
	pub thread_id: i32,
	pub time: DateTime<Local>,
	pub msg: String,
}

impl Event {
	pub fn new(level: Level, file: &'static str, line: u32, msg: String) -> Self {
		Event {
			level,
			file,
			line,
			thread_id: nix::unistd::gettid().as_raw(),
			time: Local::now(),
			msg,
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
enum FormatField {
	Message,
	Level,
	ThreadId,
	LoggerName,
	DateTime(String),
	FileName,
	LineNum,
	NewLine,
	Tab,
	Literal(String),
}

fn parse_pattern(pattern: &str) -> Result<Vec<FormatField>, Error> {
	let mut fields = vec![];
	let mut literal = String::new();
	let mut chars = pattern.chars().peekable();

	while let Some(c) = chars.next() {
		if c != '%' {
			literal.push(c);
			continue;
		}

		if !literal.is_empty() {
			fields.push(FormatField::Literal(literal.clone()));
			literal.clear();
		}

		let tag = chars.next().ok_or_else(|| {
			let error: Error =
				ErrorKind::InvalidInput(format!("Pattern ends with '%': '{}'", pattern)).into();
			error
		})?;

		match tag {
			'm' => fields.push(FormatField::Message),
			'p' => fields.push(FormatField::Level),
			't' => fields.push(FormatField::ThreadId),
			'c' => fields.push(FormatField::LoggerName),
			'f' => fields.push(FormatField::FileName),
			'l' => fields.push(FormatField::LineNum),
			'n' => fields.push(FormatField::NewLine),
			'T' => fields.push(FormatField::Tab),
			'd' => {
				let mut format = String::new();
				if chars.peek() == Some(&'{') {
					chars.next();
					loop {
						match chars.next() {
							Some('}') => break,
							Some(c) => format.push(c),
							None => {
								return Err(ErrorKind::InvalidInput(format!(
									"Unclosed date format in pattern: '{}'",
									pattern
								))
								.into());
							}
						}
					}
				}
				if format.is_empty() {
					format = DEFAULT_DATE_FORMAT.to_string();
				}
				fields.push(FormatField::DateTime(format));
			}
			_ => {
				return Err(ErrorKind::InvalidInput(format!(
					"Unknown tag '%{}' in pattern: '{}'",
					tag, pattern
				))
				.into());
			}
		}
	}

	if !literal.is_empty() {
		fields.push(FormatField::Literal(literal));
	}

	Ok(fields)
}

/// The event formatter. It renders an event into a line according to a
/// `%`-tag pattern.
pub struct Formatter {
	pattern: String,
	fields: Vec<FormatField>,
}

impl Formatter {
	pub fn new(pattern: &str) -> Result<Self, Error> {
		Ok(Formatter {
			pattern: pattern.to_string(),
			fields: parse_pattern(pattern)?,
		})
	}

	pub fn default_formatter() -> Self {
		// The default pattern is known-valid.
		match Formatter::new(DEFAULT_PATTERN) {
			Ok(formatter) => formatter,
			Err(_) => Formatter {
				pattern: "%m%n".to_string(),
				fields: vec![FormatField::Message, FormatField::NewLine],
			},
		}
	}

	pub fn pattern(&self) -> &str {
		&self.pattern
	}

	pub fn format(&self, logger_name: &str, event: &Event) -> String {
		let mut out = String::new();
		for field in &self.fields {
			match field {
				FormatField::Message => out.push_str(&event.msg),
				FormatField::Level => out.push_str(event.level.as_str()),
				FormatField::ThreadId => out.push_str(&event.thread_id.to_string()),
				FormatField::LoggerName => out.push_str(logger_name),
				FormatField::DateTime(format) => {
					out.push_str(&event.time.format(format).to_string())
				}
				FormatField::FileName => out.push_str(event.file),
				FormatField::LineNum => out.push_str(&event.line.to_string()),
				FormatField::NewLine => out.push('\n'),
				FormatField::Tab => out.push('\t'),
				FormatField::Literal(s) => out.push_str(s),
			}
		}
		out
	}
}

/// An appender writes formatted events to one place. An appender without
/// its own formatter uses the owning logger's default formatter.
pub trait Appender: Send + Sync {
	fn write(&self, line: &str);
	fn formatter(&self) -> Option<&Formatter>;
}

/// Writes events to standard output.
pub struct StdOutAppender {
	formatter: Option<Formatter>,
}

impl StdOutAppender {
	pub fn new(formatter: Option<Formatter>) -> Self {
		StdOutAppender { formatter }
	}
}

impl Appender for StdOutAppender {
	fn write(&self, line: &str) {
		print!("{}", line);
	}

	fn formatter(&self) -> Option<&Formatter> {
		self.formatter.as_ref()
	}
}

/// Appends events to a file.
pub struct FileAppender {
	file: Mutex<File>,
	formatter: Option<Formatter>,
}

impl FileAppender {
	pub fn new(path: &str, formatter: Option<Formatter>) -> Result<Self, Error> {
		let file = OpenOptions::new().append(true).create(true).open(path)?;
		Ok(FileAppender {
			file: Mutex::new(file),
			formatter,
		})
	}
}

impl Appender for FileAppender {
	fn write(&self, line: &str) {
		let file = self.file.lock();
		match file {
			Ok(mut file) => {
				if let Err(e) = file.write_all(line.as_bytes()) {
					eprintln!("Logging to file failed: {}", e);
				}
			}
			Err(e) => eprintln!("Logging to file failed: {}", e),
		}
	}

	fn formatter(&self) -> Option<&Formatter> {
		self.formatter.as_ref()
	}
}

/// The shared core of a logger. The asynchronous writer thread holds a
/// second reference so the logger handle itself can be dropped and joined.
struct LoggerCore {
	name: String,
	level: Mutex<Level>,
	formatter: Mutex<Arc<Formatter>>,
	appenders: Mutex<Vec<Arc<dyn Appender>>>,
}

impl LoggerCore {
	fn write_event(&self, event: &Event) {
		let default_formatter = match self.formatter.lock() {
			Ok(formatter) => formatter.clone(),
			Err(_) => return,
		};
		let appenders = match self.appenders.lock() {
			Ok(appenders) => appenders.clone(),
			Err(_) => return,
		};
		for appender in appenders {
			let line = match appender.formatter() {
				Some(formatter) => formatter.format(&self.name, event),
				None => default_formatter.format(&self.name, event),
			};
			appender.write(&line);
		}
	}
}

/// A named logger holding a list of appenders. A logger created with a
/// queue capacity is asynchronous: `log` pushes the event onto a bounded
/// deque that a writer thread drains. Events raised below the logger's
/// level are discarded.
pub struct Logger {
	core: Arc<LoggerCore>,
	capacity: usize,
	queue: Option<Arc<BlockDeque<Event>>>,
	writer: Mutex<Option<JoinHandle<()>>>,
}

impl Logger {
	pub fn new(name: &str, level: Level, capacity: Option<usize>) -> Self {
		let core = Arc::new(LoggerCore {
			name: name.to_string(),
			level: Mutex::new(level),
			formatter: Mutex::new(Arc::new(Formatter::default_formatter())),
			appenders: Mutex::new(vec![]),
		});

		let capacity = capacity.unwrap_or(0);
		let (queue, writer) = if capacity > 0 {
			let queue = Arc::new(BlockDeque::new(capacity));
			let thread_queue = queue.clone();
			let thread_core = core.clone();
			let writer = std::thread::spawn(move || loop {
				match thread_queue.pop(None) {
					Ok(Some(event)) => thread_core.write_event(&event),
					Ok(None) => break,
					Err(e) => {
						eprintln!("Async logger writer failed: {}", e);
						break;
					}
				}
			});
			(Some(queue), Some(writer))
		} else {
			(None, None)
		};

		Logger {
			core,
			capacity,
			queue,
			writer: Mutex::new(writer),
		}
	}

	pub fn name(&self) -> &str {
		&self.core.name
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}

	pub fn level(&self) -> Level {
		match self.core.level.lock() {
			Ok(level) => *level,
			Err(e) => *e.into_inner(),
		}
	}

	pub fn set_level(&self, level: Level) {
		if let Ok(mut current) = self.core.level.lock() {
			*current = level;
		}
	}

	pub fn formatter_pattern(&self) -> String {
		match self.core.formatter.lock() {
			Ok(formatter) => formatter.pattern().to_string(),
			Err(e) => e.into_inner().pattern().to_string(),
		}
	}

	/// Set the default formatter, used by appenders that do not carry one.
	pub fn set_formatter(&self, pattern: &str) -> Result<(), Error> {
		let formatter = Arc::new(Formatter::new(pattern)?);
		let mut current = lock!(self.core.formatter);
		*current = formatter;
		Ok(())
	}

	pub fn add_appender(&self, appender: Arc<dyn Appender>) {
		if let Ok(mut appenders) = self.core.appenders.lock() {
			appenders.push(appender);
		}
	}

	/// Remove every appender that is the same object as `appender`.
	pub fn remove_appender(&self, appender: &Arc<dyn Appender>) {
		if let Ok(mut appenders) = self.core.appenders.lock() {
			appenders.retain(|a| !Arc::ptr_eq(a, appender));
		}
	}

	pub fn clear_appenders(&self) {
		if let Ok(mut appenders) = self.core.appenders.lock() {
			appenders.clear();
		}
	}

	pub fn appender_count(&self) -> usize {
		match self.core.appenders.lock() {
			Ok(appenders) => appenders.len(),
			Err(e) => e.into_inner().len(),
		}
	}

	/// Log an event. Asynchronous loggers enqueue it; the queue blocks the
	/// caller while full.
	pub fn log(&self, event: Event) {
		if event.level < self.level() {
			return;
		}
		match &self.queue {
			Some(queue) => {
				// A closed queue means the logger is shutting down; the
				// event is dropped.
				let _ = queue.push_back(event);
			}
			None => self.core.write_event(&event),
		}
	}

	/// Stop the writer thread, draining nothing further. Safe to call more
	/// than once; also called on drop.
	pub fn close(&self) {
		if let Some(queue) = &self.queue {
			let _ = queue.close();
		}
		if let Ok(mut writer) = self.writer.lock() {
			if let Some(handle) = writer.take() {
				let _ = handle.join();
			}
		}
	}
}

impl Drop for Logger {
	fn drop(&mut self) {
		self.close();
	}
}

/// The logger manager, maintaining a collection of loggers by name.
pub struct Manager {
	name: String,
	loggers: Mutex<HashMap<String, Arc<Logger>>>,
}

impl Manager {
	pub fn new(name: &str) -> Self {
		Manager {
			name: name.to_string(),
			loggers: Mutex::new(HashMap::new()),
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// Get a logger by its name, creating it with the given settings if it
	/// does not exist.
	pub fn find_logger(&self, name: &str, level: Level, capacity: Option<usize>) -> Arc<Logger> {
		self.find_or_create(name, level, capacity).0
	}

	/// Get an existing logger by its name.
	pub fn get_logger(&self, name: &str) -> Option<Arc<Logger>> {
		match self.loggers.lock() {
			Ok(loggers) => loggers.get(name).cloned(),
			Err(e) => e.into_inner().get(name).cloned(),
		}
	}

	pub fn remove_logger(&self, name: &str) {
		if let Ok(mut loggers) = self.loggers.lock() {
			loggers.remove(name);
		}
	}

	fn find_or_create(
		&self,
		name: &str,
		level: Level,
		capacity: Option<usize>,
	) -> (Arc<Logger>, bool) {
		let mut loggers = match self.loggers.lock() {
			Ok(loggers) => loggers,
			Err(e) => e.into_inner(),
		};
		match loggers.get(name) {
			Some(logger) => (logger.clone(), false),
			None => {
				let logger = Arc::new(Logger::new(name, level, capacity));
				loggers.insert(name.to_string(), logger.clone());
				(logger, true)
			}
		}
	}
}

/// Log an event through a logger. Used exactly like the print/format
/// macros, with the logger and the level first:
///
/// ```ignore
/// info!(logger, "a new client {} has connected", addr);
/// ```
#[macro_export]
macro_rules! log_event {
	($logger:expr, $level:expr, $($arg:tt)*) => {
		$logger.log($crate::Event::new($level, file!(), line!(), format!($($arg)*)))
	};
}

#[macro_export]
macro_rules! debug {
	($logger:expr, $($arg:tt)*) => {
		$crate::log_event!($logger, $crate::Level::Debug, $($arg)*)
	};
}

#[macro_export]
macro_rules! info {
	($logger:expr, $($arg:tt)*) => {
		$crate::log_event!($logger, $crate::Level::Info, $($arg)*)
	};
}

#[macro_export]
macro_rules! warn {
	($logger:expr, $($arg:tt)*) => {
		$crate::log_event!($logger, $crate::Level::Warn, $($arg)*)
	};
}

#[macro_export]
macro_rules! error {
	($logger:expr, $($arg:tt)*) => {
		$crate::log_event!($logger, $crate::Level::Error, $($arg)*)
	};
}

#[macro_export]
macro_rules! fatal {
	($logger:expr, $($arg:tt)*) => {
		$crate::log_event!($logger, $crate::Level::Fatal, $($arg)*)
	};
}

#[test]
fn test_level_conversion() -> Result<(), Error> {
	assert_eq!(Level::Debug.as_str(), "Debug");
	assert_eq!(Level::Fatal.as_str(), "Fatal");
	assert_eq!("info".parse::<Level>()?, Level::Info);
	assert_eq!("WARN".parse::<Level>()?, Level::Warn);
	assert!("unknown".parse::<Level>().is_err());
	assert!(Level::Debug < Level::Info && Level::Error < Level::Fatal);
	Ok(())
}

#[test]
fn test_pattern_parsing() -> Result<(), Error> {
	let fields = parse_pattern("%m%n")?;
	assert_eq!(fields, vec![FormatField::Message, FormatField::NewLine]);

	let fields = parse_pattern("%d{%H:%M}|%p")?;
	assert_eq!(
		fields,
		vec![
			FormatField::DateTime("%H:%M".to_string()),
			FormatField::Literal("|".to_string()),
			FormatField::Level,
		]
	);

	assert!(parse_pattern("%x").is_err());
	assert!(parse_pattern("%d{%H").is_err());
	assert!(parse_pattern("trailing %").is_err());
	Ok(())
}

#[test]
fn test_formatter_output() -> Result<(), Error> {
	let formatter = Formatter::new("[%p]%T%c: %m (%f:%l)%n")?;
	let event = Event::new(Level::Warn, "server.rs", 42, "disk full".to_string());
	assert_eq!(
		formatter.format("system", &event),
		"[Warn]\tsystem: disk full (server.rs:42)\n"
	);
	Ok(())
}

#[test]
fn test_logger_level_filter_and_appenders() -> Result<(), Error> {
	use tinyhttpd_util::testutil::temp_file_path;

	let path = temp_file_path("logger");
	let path_str = path.to_str().unwrap().to_string();

	let logger = Logger::new("test", Level::Warn, None);
	logger.set_formatter("%p %m%n")?;
	let appender: Arc<dyn Appender> = Arc::new(FileAppender::new(&path_str, None)?);
	logger.add_appender(appender.clone());
	assert_eq!(logger.appender_count(), 1);

	info!(logger, "filtered out");
	warn!(logger, "kept {}", 1);
	error!(logger, "kept {}", 2);

	let contents = std::fs::read_to_string(&path)?;
	assert_eq!(contents, "Warn kept 1\nError kept 2\n");

	// removing the appender really removes it
	logger.remove_appender(&appender);
	assert_eq!(logger.appender_count(), 0);
	error!(logger, "dropped");
	let contents = std::fs::read_to_string(&path)?;
	assert_eq!(contents, "Warn kept 1\nError kept 2\n");

	std::fs::remove_file(&path)?;
	Ok(())
}

#[test]
fn test_async_logger_writes_in_background() -> Result<(), Error> {
	use tinyhttpd_util::testutil::temp_file_path;

	let path = temp_file_path("async-logger");
	let path_str = path.to_str().unwrap().to_string();

	let logger = Logger::new("async", Level::Info, Some(100));
	logger.set_formatter("%m%n")?;
	logger.add_appender(Arc::new(FileAppender::new(&path_str, None)?));

	for i in 0..10 {
		info!(logger, "line {}", i);
	}

	// give the writer thread a moment to drain the queue
	std::thread::sleep(std::time::Duration::from_millis(200));
	logger.close();
	logger.close();

	let contents = std::fs::read_to_string(&path)?;
	assert_eq!(contents.lines().count(), 10);
	assert!(contents.starts_with("line 0\n"));

	std::fs::remove_file(&path)?;
	Ok(())
}

#[test]
fn test_manager() -> Result<(), Error> {
	let manager = Manager::new("test");
	let a = manager.find_logger("a", Level::Debug, None);
	let a2 = manager.find_logger("a", Level::Error, None);
	assert!(Arc::ptr_eq(&a, &a2));
	assert_eq!(a2.level(), Level::Debug);

	assert!(manager.get_logger("b").is_none());
	manager.remove_logger("a");
	assert!(manager.get_logger("a").is_none());
	Ok(())
}
