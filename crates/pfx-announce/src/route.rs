//! Route objects handed to the routing engine.
//!
//! Every stored prefix becomes one labeled VPN-IPv4 route: the prefix, a
//! single MPLS label and a route distinguisher, plus the path attributes
//! ORIGIN, AS_PATH, EXTENDED_COMMUNITIES (route target) and MP_REACH_NLRI.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use pfx_reconcile::Prefix;
use serde::{Serialize, Serializer};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteBuildError {
    InvalidPrefix { raw: String, reason: String },
    InvalidRouteDistinguisher(String),
    InvalidRouteTarget(String),
    InvalidLabel(u32),
}

impl fmt::Display for RouteBuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteBuildError::InvalidPrefix { raw, reason } => {
                write!(f, "invalid prefix '{raw}': {reason}")
            }
            RouteBuildError::InvalidRouteDistinguisher(raw) => {
                write!(f, "invalid route distinguisher '{raw}' (expected ASN:nn or IPv4:nn)")
            }
            RouteBuildError::InvalidRouteTarget(raw) => {
                write!(f, "invalid route target '{raw}' (expected ASN:nn, ASN <= 65535)")
            }
            RouteBuildError::InvalidLabel(v) => {
                write!(f, "mpls label {v} does not fit in 20 bits")
            }
        }
    }
}

impl std::error::Error for RouteBuildError {}

// ---------------------------------------------------------------------------
// Route distinguisher
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RouteDistinguisher {
    /// Type 0: 2-byte ASN, 4-byte assigned number.
    TwoOctetAs { admin: u16, assigned: u32 },
    /// Type 1: IPv4 address, 2-byte assigned number.
    Ipv4 { admin: Ipv4Addr, assigned: u16 },
    /// Type 2: 4-byte ASN, 2-byte assigned number.
    FourOctetAs { admin: u32, assigned: u16 },
}

impl FromStr for RouteDistinguisher {
    type Err = RouteBuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || RouteBuildError::InvalidRouteDistinguisher(s.to_string());
        let (left, right) = s.trim().split_once(':').ok_or_else(bad)?;

        if let Ok(addr) = left.parse::<Ipv4Addr>() {
            let assigned = right.parse::<u16>().map_err(|_| bad())?;
            return Ok(RouteDistinguisher::Ipv4 {
                admin: addr,
                assigned,
            });
        }

        let admin = left.parse::<u32>().map_err(|_| bad())?;
        match u16::try_from(admin) {
            Ok(admin) => {
                let assigned = right.parse::<u32>().map_err(|_| bad())?;
                Ok(RouteDistinguisher::TwoOctetAs { admin, assigned })
            }
            Err(_) => {
                let assigned = right.parse::<u16>().map_err(|_| bad())?;
                Ok(RouteDistinguisher::FourOctetAs { admin, assigned })
            }
        }
    }
}

impl fmt::Display for RouteDistinguisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteDistinguisher::TwoOctetAs { admin, assigned } => write!(f, "{admin}:{assigned}"),
            RouteDistinguisher::Ipv4 { admin, assigned } => write!(f, "{admin}:{assigned}"),
            RouteDistinguisher::FourOctetAs { admin, assigned } => write!(f, "{admin}:{assigned}"),
        }
    }
}

impl Serialize for RouteDistinguisher {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

// ---------------------------------------------------------------------------
// Route target
// ---------------------------------------------------------------------------

/// Two-octet AS specific route target extended community.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RouteTarget {
    pub asn: u16,
    pub value: u32,
    pub transitive: bool,
}

impl FromStr for RouteTarget {
    type Err = RouteBuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || RouteBuildError::InvalidRouteTarget(s.to_string());
        let (left, right) = s.trim().split_once(':').ok_or_else(bad)?;
        Ok(RouteTarget {
            asn: left.parse::<u16>().map_err(|_| bad())?,
            value: right.parse::<u32>().map_err(|_| bad())?,
            transitive: true,
        })
    }
}

impl fmt::Display for RouteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.asn, self.value)
    }
}

impl Serialize for RouteTarget {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

// ---------------------------------------------------------------------------
// MPLS label
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct MplsLabel(u32);

impl MplsLabel {
    pub const MAX: u32 = (1 << 20) - 1;

    pub fn new(value: u32) -> Result<Self, RouteBuildError> {
        if value > Self::MAX {
            return Err(RouteBuildError::InvalidLabel(value));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

// ---------------------------------------------------------------------------
// NLRI
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct LabeledVpnPrefix {
    pub rd: RouteDistinguisher,
    pub prefix: Ipv4Addr,
    pub len: u8,
    pub labels: Vec<MplsLabel>,
}

impl LabeledVpnPrefix {
    /// RIB key: `rd:address/len`.
    pub fn key(&self) -> String {
        format!("{}:{}/{}", self.rd, self.prefix, self.len)
    }
}

impl fmt::Display for LabeledVpnPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Parse a stored prefix. `a.b.c.d/len` keeps `len`; a bare address gets
/// `default_len`.
pub fn parse_prefix(raw: &str, default_len: u8) -> Result<(Ipv4Addr, u8), RouteBuildError> {
    let bad = |reason: &str| RouteBuildError::InvalidPrefix {
        raw: raw.to_string(),
        reason: reason.to_string(),
    };

    let (addr, len) = match raw.trim().split_once('/') {
        Some((addr, len)) => {
            let len = len
                .parse::<u8>()
                .map_err(|_| bad("prefix length is not a number"))?;
            (addr, len)
        }
        None => (raw.trim(), default_len),
    };
    if len > 32 {
        return Err(bad("prefix length exceeds 32"));
    }
    let addr = addr
        .parse::<Ipv4Addr>()
        .map_err(|_| bad("not an ipv4 address"))?;
    Ok((addr, len))
}

// ---------------------------------------------------------------------------
// Path attributes / route
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Igp,
    Egp,
    Incomplete,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PathAttribute {
    Origin { value: Origin },
    AsPath { segments: Vec<u32> },
    ExtendedCommunities { route_targets: Vec<RouteTarget> },
    MpReachNlri {
        next_hop: Ipv4Addr,
        nlri: Vec<LabeledVpnPrefix>,
    },
}

/// One advertisement (or withdrawal) unit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Route {
    /// The store prefix this route was built from.
    pub source: Prefix,
    pub nlri: LabeledVpnPrefix,
    pub withdraw: bool,
    pub attributes: Vec<PathAttribute>,
}

impl Route {
    pub fn key(&self) -> String {
        self.nlri.key()
    }

    pub fn next_hop(&self) -> Option<Ipv4Addr> {
        self.attributes.iter().find_map(|a| match a {
            PathAttribute::MpReachNlri { next_hop, .. } => Some(*next_hop),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_distinguisher_types() {
        assert_eq!(
            "1:1".parse::<RouteDistinguisher>().unwrap(),
            RouteDistinguisher::TwoOctetAs {
                admin: 1,
                assigned: 1
            }
        );
        assert_eq!(
            "192.0.2.1:7".parse::<RouteDistinguisher>().unwrap(),
            RouteDistinguisher::Ipv4 {
                admin: Ipv4Addr::new(192, 0, 2, 1),
                assigned: 7
            }
        );
        assert_eq!(
            "4200000000:9".parse::<RouteDistinguisher>().unwrap(),
            RouteDistinguisher::FourOctetAs {
                admin: 4_200_000_000,
                assigned: 9
            }
        );
        assert!("4200000000:70000".parse::<RouteDistinguisher>().is_err());
        assert!("nonsense".parse::<RouteDistinguisher>().is_err());
        assert_eq!(
            "65000:100".parse::<RouteDistinguisher>().unwrap().to_string(),
            "65000:100"
        );
    }

    #[test]
    fn route_target_requires_two_octet_asn() {
        let rt: RouteTarget = "1:1".parse().unwrap();
        assert!(rt.transitive);
        assert_eq!(rt.to_string(), "1:1");
        assert!("70000:1".parse::<RouteTarget>().is_err());
    }

    #[test]
    fn label_is_20_bits() {
        assert!(MplsLabel::new(100).is_ok());
        assert!(MplsLabel::new(MplsLabel::MAX).is_ok());
        assert_eq!(
            MplsLabel::new(MplsLabel::MAX + 1),
            Err(RouteBuildError::InvalidLabel(MplsLabel::MAX + 1))
        );
    }

    #[test]
    fn prefix_parsing() {
        assert_eq!(
            parse_prefix("10.0.0.0/24", 32).unwrap(),
            (Ipv4Addr::new(10, 0, 0, 0), 24)
        );
        assert_eq!(
            parse_prefix("192.0.2.55", 32).unwrap(),
            (Ipv4Addr::new(192, 0, 2, 55), 32)
        );
        assert!(parse_prefix("10.0.0.0/33", 32).is_err());
        assert!(parse_prefix("2001:db8::/32", 32).is_err());
        assert!(parse_prefix("10.0.0.0/x", 32).is_err());
    }
}
