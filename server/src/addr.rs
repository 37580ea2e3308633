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

//! Endpoint helpers. The server binds one address family, chosen at
//! startup from the configured host.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;
use tinyhttpd_util::Error;

/// The IP address family of a listening socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpFamily {
	V4,
	V6,
}

impl IpFamily {
	/// The wildcard endpoint of this family.
	pub fn any(&self, port: u16) -> SocketAddr {
		match self {
			IpFamily::V4 => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
			IpFamily::V6 => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port),
		}
	}

	/// The loop-back endpoint of this family.
	pub fn loop_back(&self, port: u16) -> SocketAddr {
		match self {
			IpFamily::V4 => SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port),
			IpFamily::V6 => SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), port),
		}
	}
}

/// The family of an endpoint.
pub fn family_of(addr: &SocketAddr) -> IpFamily {
	match addr {
		SocketAddr::V4(_) => IpFamily::V4,
		SocketAddr::V6(_) => IpFamily::V6,
	}
}

/// Parse a host string and a port into an endpoint.
/// Fails with an invalid-input error for a malformed host.
pub fn parse_endpoint(host: &str, port: u16) -> Result<SocketAddr, Error> {
	let ip = IpAddr::from_str(host)?;
	Ok(SocketAddr::new(ip, port))
}

#[test]
fn test_family_endpoints() -> Result<(), Error> {
	assert_eq!(IpFamily::V4.any(80).to_string(), "0.0.0.0:80");
	assert_eq!(IpFamily::V4.loop_back(80).to_string(), "127.0.0.1:80");
	assert_eq!(IpFamily::V6.any(80).to_string(), "[::]:80");
	assert_eq!(IpFamily::V6.loop_back(80).to_string(), "[::1]:80");
	Ok(())
}

#[test]
fn test_parse_endpoint() -> Result<(), Error> {
	let addr = parse_endpoint("127.0.0.1", 10000)?;
	assert_eq!(addr.to_string(), "127.0.0.1:10000");
	assert_eq!(family_of(&addr), IpFamily::V4);

	let addr = parse_endpoint("::1", 10000)?;
	assert_eq!(addr.to_string(), "[::1]:10000");
	assert_eq!(family_of(&addr), IpFamily::V6);

	assert!(parse_endpoint("not-an-ip", 10000).is_err());
	Ok(())
}
