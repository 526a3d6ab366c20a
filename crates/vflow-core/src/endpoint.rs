//! Endpoints: structured peer identifiers with a canonical wire form
//! (spec §3 "Endpoint", §6 "Endpoint wire format").

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::ids::RoutingId;

/// Current canonical endpoint version tag (`@5@...`).
pub const ENDPOINT_VERSION: u32 = 5;

/// A structured peer identifier.
///
/// Invariant (spec §3): the routing id is stable over the lifetime of a
/// VIF, and two endpoints carrying the same routing id MUST refer to the
/// same logical server — [`PartialEq`]/[`Hash`] are therefore defined over
/// `(protocol, address, routing_id)`, not over the blessing set, which may
/// legitimately vary between observations of the same server.
#[derive(Clone, Debug)]
pub struct Endpoint {
    protocol: String,
    address: String,
    routing_id: RoutingId,
    min_version: u32,
    max_version: u32,
    blessings: Vec<String>,
    is_mount_table: bool,
    is_leaf: bool,
}

impl Endpoint {
    pub fn new(protocol: impl Into<String>, address: impl Into<String>, routing_id: RoutingId) -> Self {
        Self {
            protocol: protocol.into(),
            address: address.into(),
            routing_id,
            min_version: ENDPOINT_VERSION,
            max_version: ENDPOINT_VERSION,
            blessings: Vec::new(),
            is_mount_table: false,
            is_leaf: false,
        }
    }

    pub fn with_versions(mut self, min: u32, max: u32) -> Self {
        self.min_version = min;
        self.max_version = max;
        self
    }

    pub fn with_blessings(mut self, blessings: Vec<String>) -> Self {
        self.blessings = blessings;
        self
    }

    pub fn with_mount_table(mut self, is_mount_table: bool) -> Self {
        self.is_mount_table = is_mount_table;
        self
    }

    pub fn with_leaf(mut self, is_leaf: bool) -> Self {
        self.is_leaf = is_leaf;
        self
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn routing_id(&self) -> RoutingId {
        self.routing_id
    }

    pub fn version_range(&self) -> (u32, u32) {
        (self.min_version, self.max_version)
    }

    pub fn blessings(&self) -> &[String] {
        &self.blessings
    }

    pub fn is_mount_table(&self) -> bool {
        self.is_mount_table
    }

    pub fn is_leaf(&self) -> bool {
        self.is_leaf
    }

    /// Canonical string form: `@5@<protocol>@<address>@<hex-routing-id>@<m|s>@<blessings>@@`.
    pub fn format(&self) -> String {
        let kind = if self.is_mount_table { "m" } else { "s" };
        format!(
            "@{}@{}@{}@{}@{}@{}@@",
            self.max_version,
            self.protocol,
            self.address,
            self.routing_id,
            kind,
            self.blessings.join(","),
        )
    }

    /// Parses a canonical endpoint string, or falls back to the bare
    /// `host:port` form (unknown protocol, null routing id, service —
    /// spec §6).
    pub fn parse(s: &str) -> Result<Self> {
        if let Some(rest) = s.strip_prefix('@') {
            return Self::parse_versioned(rest);
        }
        if s.contains(':') && !s.contains('@') {
            return Ok(Endpoint::new("", s, RoutingId::NULL));
        }
        Err(Error::bad_arg(format!("unparsable endpoint: {s}")))
    }

    fn parse_versioned(rest: &str) -> Result<Self> {
        // `rest` is `5@proto@addr@rid@m|s@blessings@@`.
        let mut parts = rest.split('@');
        let version: u32 = parts
            .next()
            .ok_or_else(|| Error::bad_arg("endpoint missing version tag"))?
            .parse()
            .map_err(|_| Error::bad_arg("endpoint version tag is not numeric"))?;
        let protocol = parts
            .next()
            .ok_or_else(|| Error::bad_arg("endpoint missing protocol"))?;
        let address = parts
            .next()
            .ok_or_else(|| Error::bad_arg("endpoint missing address"))?;
        let rid_str = parts
            .next()
            .ok_or_else(|| Error::bad_arg("endpoint missing routing id"))?;
        let routing_id = RoutingId::from_str(rid_str)?;
        let kind = parts
            .next()
            .ok_or_else(|| Error::bad_arg("endpoint missing mount-table flag"))?;
        let blessings_field = parts.next().unwrap_or("");
        let blessings = if blessings_field.is_empty() {
            Vec::new()
        } else {
            blessings_field.split(',').map(|s| s.to_string()).collect()
        };
        Ok(Endpoint {
            protocol: protocol.to_string(),
            address: address.to_string(),
            routing_id,
            min_version: version,
            max_version: version,
            blessings,
            is_mount_table: kind == "m",
            is_leaf: false,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.protocol == other.protocol
            && self.address == other.address
            && self.routing_id == other.routing_id
    }
}
impl Eq for Endpoint {}

impl std::hash::Hash for Endpoint {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.protocol.hash(state);
        self.address.hash(state);
        self.routing_id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_canonical_form() {
        let ep = Endpoint::new("tcp", "127.0.0.1:1234", RoutingId::new_random())
            .with_blessings(vec!["dev".into(), "prod".into()])
            .with_mount_table(true);
        let parsed = Endpoint::parse(&ep.format()).unwrap();
        assert_eq!(ep, parsed);
        assert_eq!(parsed.blessings(), &["dev".to_string(), "prod".to_string()]);
        assert!(parsed.is_mount_table());
    }

    #[test]
    fn bare_host_port_parses_to_default_endpoint() {
        let ep = Endpoint::parse("example.com:80").unwrap();
        assert_eq!(ep.protocol(), "");
        assert_eq!(ep.address(), "example.com:80");
        assert!(ep.routing_id().is_null());
    }

    #[test]
    fn equal_routing_id_and_address_means_equal_endpoint_regardless_of_blessings() {
        let rid = RoutingId::new_random();
        let a = Endpoint::new("tcp", "h:1", rid).with_blessings(vec!["a".into()]);
        let b = Endpoint::new("tcp", "h:1", rid).with_blessings(vec!["b".into()]);
        assert_eq!(a, b);
    }

    proptest::proptest! {
        #[test]
        fn format_parse_is_identity(addr in "[a-z]{1,10}:[0-9]{1,5}", proto in "[a-z]{1,6}") {
            let ep = Endpoint::new(proto, addr, RoutingId::new_random());
            let parsed = Endpoint::parse(&ep.format()).unwrap();
            prop_assert_eq!(ep, parsed);
        }
    }
}
