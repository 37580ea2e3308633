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

//! The YAML configuration.
//!
//! `config.yaml` in the working directory is merged over built-in
//! defaults. The `loggers` sequence replaces loggers in the global
//! manager wholesale: name, level, optional queue capacity (asynchronous
//! when positive), optional formatter pattern and an appender list.

use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tinyhttpd_log::{root_manager, Appender, FileAppender, Level, StdOutAppender};
use tinyhttpd_util::{Error, ErrorKind};

/// The local configuration file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "config.yaml";

const STDOUT_APPENDER: &str = "stdout";
const FILE_APPENDER: &str = "file";

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
	pub server: ServerSection,
	pub loggers: Vec<LoggerSection>,
}

impl Default for Config {
	fn default() -> Self {
		Config {
			server: Default::default(),
			loggers: vec![],
		}
	}
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSection {
	/// The host to bind to, which selects the address family.
	pub host: String,
	/// The listening TCP port; must be at least 1024.
	pub port: u16,
	/// The idle timeout per connection, in seconds.
	pub alive_time: u64,
	/// The asset directory, relative to the working directory.
	pub asset_folder: String,
}

impl Default for ServerSection {
	fn default() -> Self {
		ServerSection {
			host: "0.0.0.0".to_string(),
			port: 10000,
			alive_time: 60,
			asset_folder: "assets".to_string(),
		}
	}
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct LoggerSection {
	pub name: String,
	#[serde(default = "default_level")]
	pub level: String,
	#[serde(default)]
	pub capacity: Option<usize>,
	#[serde(default)]
	pub formatter: Option<String>,
	#[serde(default)]
	pub appenders: Vec<AppenderSection>,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct AppenderSection {
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(default)]
	pub file: Option<String>,
	#[serde(default)]
	pub formatter: Option<String>,
}

fn default_level() -> String {
	"info".to_string()
}

impl Config {
	/// Load a configuration file, merging its keys over the defaults.
	pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
		let contents = std::fs::read_to_string(path)?;
		let config: Config = serde_yaml::from_str(&contents).map_err(|e| {
			let error: Error =
				ErrorKind::InvalidInput(format!("Invalid configuration: {}", e)).into();
			error
		})?;
		config.validate()?;
		Ok(config)
	}

	/// Load `config.yaml` from the working directory if it exists,
	/// the defaults otherwise.
	pub fn load_local() -> Result<Self, Error> {
		if Path::new(LOCAL_CONFIG_FILE).exists() {
			Self::load(LOCAL_CONFIG_FILE)
		} else {
			Ok(Default::default())
		}
	}

	fn validate(&self) -> Result<(), Error> {
		if self.server.port < 1024 {
			return Err(ErrorKind::InvalidInput(format!(
				"server.port must be at least 1024, got {}",
				self.server.port
			))
			.into());
		}

		for logger in &self.loggers {
			logger.level.parse::<Level>()?;
			for appender in &logger.appenders {
				match appender.kind.as_str() {
					STDOUT_APPENDER => {}
					FILE_APPENDER => {
						if appender.file.is_none() {
							return Err(ErrorKind::InvalidInput(format!(
								"a file appender of logger '{}' has no file",
								logger.name
							))
							.into());
						}
					}
					kind => {
						return Err(ErrorKind::InvalidInput(format!(
							"Invalid appender type: '{}'",
							kind
						))
						.into());
					}
				}
			}
		}
		Ok(())
	}

	pub fn alive_time(&self) -> Duration {
		Duration::from_secs(self.server.alive_time)
	}

	/// Rebuild the configured loggers in the global manager. An existing
	/// logger with the same name is replaced wholesale.
	pub fn apply_loggers(&self) -> Result<(), Error> {
		let manager = root_manager();
		for section in &self.loggers {
			let level: Level = section.level.parse()?;
			manager.remove_logger(&section.name);
			let logger = manager.find_logger(&section.name, level, section.capacity);

			if let Some(pattern) = &section.formatter {
				logger.set_formatter(pattern)?;
			}

			logger.clear_appenders();
			for appender in &section.appenders {
				let formatter = match &appender.formatter {
					Some(pattern) => Some(tinyhttpd_log::Formatter::new(pattern)?),
					None => None,
				};
				let appender: Arc<dyn Appender> = match appender.kind.as_str() {
					STDOUT_APPENDER => Arc::new(StdOutAppender::new(formatter)),
					_ => match &appender.file {
						Some(file) => Arc::new(FileAppender::new(file, formatter)?),
						None => {
							return Err(ErrorKind::InvalidInput(format!(
								"a file appender of logger '{}' has no file",
								section.name
							))
							.into());
						}
					},
				};
				logger.add_appender(appender);
			}
		}
		Ok(())
	}
}

#[test]
fn test_config_defaults() -> Result<(), Error> {
	let config = Config::default();
	assert_eq!(config.server.host, "0.0.0.0");
	assert_eq!(config.server.port, 10000);
	assert_eq!(config.server.alive_time, 60);
	assert_eq!(config.server.asset_folder, "assets");
	assert_eq!(config.alive_time(), Duration::from_secs(60));
	assert!(config.loggers.is_empty());
	Ok(())
}

#[test]
fn test_config_from_yaml() -> Result<(), Error> {
	use tinyhttpd_util::testutil::write_temp_file;

	let yaml = r#"
server:
  port: 9000
  alive_time: 10
  asset_folder: "www"

loggers:
  - name: root
    level: info
    capacity: 50
    appenders:
      - type: stdout
  - name: system
    level: debug
    formatter: "%m%n"
    appenders:
      - type: stdout
      - type: file
        file: "system.log"
"#;
	let path = write_temp_file("config", yaml.as_bytes())?;
	let config = Config::load(&path)?;

	// unset keys keep their defaults
	assert_eq!(config.server.host, "0.0.0.0");
	assert_eq!(config.server.port, 9000);
	assert_eq!(config.server.alive_time, 10);
	assert_eq!(config.server.asset_folder, "www");

	assert_eq!(config.loggers.len(), 2);
	let root = &config.loggers[0];
	assert_eq!(root.name, "root");
	assert_eq!(root.level, "info");
	assert_eq!(root.capacity, Some(50));
	assert_eq!(root.formatter, None);
	assert_eq!(root.appenders.len(), 1);
	assert_eq!(root.appenders[0].kind, "stdout");

	let system = &config.loggers[1];
	assert_eq!(system.name, "system");
	assert_eq!(system.level, "debug");
	assert_eq!(system.capacity, None);
	assert_eq!(system.formatter.as_deref(), Some("%m%n"));
	assert_eq!(system.appenders.len(), 2);
	assert_eq!(system.appenders[1].kind, "file");
	assert_eq!(system.appenders[1].file.as_deref(), Some("system.log"));

	std::fs::remove_file(&path)?;
	Ok(())
}

#[test]
fn test_config_rejects_invalid_values() -> Result<(), Error> {
	use tinyhttpd_util::testutil::write_temp_file;

	for yaml in &[
		"server:\n  port: 80\n",
		"loggers:\n  - name: root\n    level: loud\n",
		"loggers:\n  - name: root\n    appenders:\n      - type: syslog\n",
		"loggers:\n  - name: root\n    appenders:\n      - type: file\n",
		"server: [not, a, map]\n",
	] {
		let path = write_temp_file("bad-config", yaml.as_bytes())?;
		assert!(Config::load(&path).is_err(), "'{}' must be rejected", yaml);
		std::fs::remove_file(&path)?;
	}
	Ok(())
}

#[test]
fn test_config_applies_loggers() -> Result<(), Error> {
	use tinyhttpd_log::root_manager;
	use tinyhttpd_util::testutil::temp_file_path;

	let log_file = temp_file_path("applied-logger");
	let yaml = format!(
		"loggers:\n  - name: config-test\n    level: warn\n    formatter: \"%m%n\"\n    appenders:\n      - type: file\n        file: \"{}\"\n",
		log_file.display()
	);

	let config: Config = serde_yaml::from_str(&yaml).map_err(|e| {
		let error: Error = ErrorKind::InvalidInput(format!("{}", e)).into();
		error
	})?;
	config.apply_loggers()?;

	let logger = root_manager()
		.get_logger("config-test")
		.expect("the logger must exist");
	assert_eq!(logger.level(), tinyhttpd_log::Level::Warn);
	assert_eq!(logger.formatter_pattern(), "%m%n");
	assert_eq!(logger.appender_count(), 1);

	tinyhttpd_log::warn!(logger, "applied");
	assert_eq!(std::fs::read_to_string(&log_file)?, "applied\n");

	root_manager().remove_logger("config-test");
	std::fs::remove_file(&log_file)?;
	Ok(())
}
