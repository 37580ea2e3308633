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

mod config;

use clap::{App, Arg};
use config::Config;
use tinyhttpd_log::{error, root_logger, warn};
use tinyhttpd_server::{ServerConfig, WebServer};
use tinyhttpd_util::Error;

fn main() {
	let res = real_main();
	match res {
		Ok(_) => {}
		Err(e) => {
			error!(root_logger(), "Failed to run server: {}", e);
			std::process::exit(1);
		}
	}
}

fn real_main() -> Result<(), Error> {
	let args = App::new("tinyhttpd")
		.version(env!("CARGO_PKG_VERSION"))
		.about("A single-process, event-driven HTTP/1.1 server")
		.arg(
			Arg::with_name("config")
				.long("config")
				.takes_value(true)
				.help("Path of a configuration file, instead of ./config.yaml"),
		)
		.get_matches();

	let logger = root_logger();

	// An explicitly named configuration must load; the local one falls
	// back to the defaults with a warning.
	let config = match args.value_of("config") {
		Some(path) => Config::load(path)?,
		None => match Config::load_local() {
			Ok(config) => config,
			Err(e) => {
				warn!(logger, "Failed to load local configuration: {}", e);
				Default::default()
			}
		},
	};

	if let Err(e) = config.apply_loggers() {
		warn!(logger, "Failed to configure loggers: {}", e);
	}

	let root_dir = std::env::current_dir()?.join(&config.server.asset_folder);
	let server = WebServer::new(ServerConfig {
		host: config.server.host.clone(),
		port: config.server.port,
		alive_time: config.alive_time(),
		root_dir,
		thread_count: None,
		logger: Some(logger),
	})?;

	server.start()
}
