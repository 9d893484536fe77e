//! Vector session tokens.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::errors::{SessionError, SessionResult};

/// Progress marker for one partition key range.
///
/// Wire form: `version#globalLsn[#regionId=localLsn]*`. The single number
/// form `lsn` is accepted as well and reads as version 0 with no regions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VectorSessionToken {
    pub version: u64,
    pub global_lsn: u64,
    pub local_lsns: BTreeMap<u32, u64>,
}

impl VectorSessionToken {
    pub fn new(version: u64, global_lsn: u64) -> Self {
        Self {
            version,
            global_lsn,
            local_lsns: BTreeMap::new(),
        }
    }

    pub fn with_region(mut self, region_id: u32, lsn: u64) -> Self {
        self.local_lsns.insert(region_id, lsn);
        self
    }

    pub fn parse(raw: &str) -> SessionResult<Self> {
        let raw = raw.trim();
        let malformed = || SessionError::Malformed(raw.to_string());
        if raw.is_empty() {
            return Err(malformed());
        }

        if !raw.contains('#') {
            let lsn = raw.parse().map_err(|_| malformed())?;
            return Ok(Self::new(0, lsn));
        }

        let mut parts = raw.split('#');
        let version = parts.next().and_then(|v| v.parse().ok()).ok_or_else(malformed)?;
        let global_lsn = parts.next().and_then(|v| v.parse().ok()).ok_or_else(malformed)?;

        let mut local_lsns = BTreeMap::new();
        for part in parts {
            let (region, lsn) = part.split_once('=').ok_or_else(malformed)?;
            let region = region.parse().map_err(|_| malformed())?;
            let lsn = lsn.parse().map_err(|_| malformed())?;
            local_lsns.insert(region, lsn);
        }

        Ok(Self {
            version,
            global_lsn,
            local_lsns,
        })
    }

    /// Component-wise maximum of two tokens.
    ///
    /// A newer version replaces the set of regions (regions can be added or
    /// removed between versions). At equal versions the region sets are
    /// unioned. LSNs never move backwards.
    pub fn merge(&self, other: &Self) -> Self {
        let local_lsns = if self.version == other.version {
            let mut union = self.local_lsns.clone();
            for (region, lsn) in &other.local_lsns {
                let entry = union.entry(*region).or_insert(0);
                *entry = (*entry).max(*lsn);
            }
            union
        } else {
            let (newer, older) = if other.version > self.version {
                (other, self)
            } else {
                (self, other)
            };
            newer
                .local_lsns
                .iter()
                .map(|(region, lsn)| {
                    let older_lsn = older.local_lsns.get(region).copied().unwrap_or(0);
                    (*region, (*lsn).max(older_lsn))
                })
                .collect()
        };

        Self {
            version: self.version.max(other.version),
            global_lsn: self.global_lsn.max(other.global_lsn),
            local_lsns,
        }
    }
}

impl FromStr for VectorSessionToken {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for VectorSessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.version, self.global_lsn)?;
        for (region, lsn) in &self.local_lsns {
            write!(f, "#{}={}", region, lsn)?;
        }
        Ok(())
    }
}

/// Parse `range:token[,range:token]*`.
///
/// Entries without a range prefix are attributed to `default_range` when
/// given and rejected otherwise.
pub fn parse_container_token(
    raw: &str,
    default_range: Option<&str>,
) -> SessionResult<Vec<(String, VectorSessionToken)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once(':') {
            Some((range, token)) => Ok((range.to_string(), VectorSessionToken::parse(token)?)),
            None => match default_range {
                Some(range) => Ok((range.to_string(), VectorSessionToken::parse(entry)?)),
                None => Err(SessionError::MissingRange(entry.to_string())),
            },
        })
        .collect()
}

pub fn format_container_token<'a>(
    entries: impl IntoIterator<Item = (&'a String, &'a VectorSessionToken)>,
) -> String {
    entries
        .into_iter()
        .map(|(range, token)| format!("{}:{}", range, token))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vector_form() {
        let token = VectorSessionToken::parse("1#100#1=20#2=35").unwrap();
        assert_eq!(token.version, 1);
        assert_eq!(token.global_lsn, 100);
        assert_eq!(token.local_lsns.get(&2), Some(&35));
        assert_eq!(token.to_string(), "1#100#1=20#2=35");
    }

    #[test]
    fn test_parse_simple_form() {
        let token = VectorSessionToken::parse("42").unwrap();
        assert_eq!(token, VectorSessionToken::new(0, 42));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(VectorSessionToken::parse("").is_err());
        assert!(VectorSessionToken::parse("1#x").is_err());
        assert!(VectorSessionToken::parse("1#5#bad").is_err());
    }

    #[test]
    fn test_merge_takes_componentwise_max() {
        let a = VectorSessionToken::new(1, 100).with_region(1, 20).with_region(2, 40);
        let b = VectorSessionToken::new(1, 90).with_region(1, 25).with_region(2, 30);
        let merged = a.merge(&b);
        assert_eq!(merged.global_lsn, 100);
        assert_eq!(merged.local_lsns.get(&1), Some(&25));
        assert_eq!(merged.local_lsns.get(&2), Some(&40));
        assert_eq!(merged, b.merge(&a));
    }

    #[test]
    fn test_merge_unions_regions_at_equal_version() {
        let a = VectorSessionToken::new(1, 100).with_region(1, 20);
        let b = VectorSessionToken::new(1, 100).with_region(1, 25).with_region(2, 40);
        let merged = a.merge(&b);
        assert_eq!(merged.to_string(), "1#100#1=25#2=40");
        assert_eq!(merged, b.merge(&a));
    }

    #[test]
    fn test_newer_version_defines_regions() {
        let old = VectorSessionToken::new(1, 100).with_region(1, 20).with_region(2, 40);
        let new = VectorSessionToken::new(2, 50).with_region(1, 10).with_region(3, 5);
        let merged = old.merge(&new);
        assert_eq!(merged.version, 2);
        assert_eq!(merged.global_lsn, 100);
        assert_eq!(merged.local_lsns.get(&1), Some(&20));
        assert_eq!(merged.local_lsns.get(&3), Some(&5));
        assert!(!merged.local_lsns.contains_key(&2));
    }

    #[test]
    fn test_container_token_round_trip() {
        let parsed = parse_container_token("0:1#10#1=5, 1:1#20", None).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].0, "1");
        let formatted = format_container_token(parsed.iter().map(|(r, t)| (r, t)));
        assert_eq!(formatted, "0:1#10#1=5,1:1#20");
    }

    #[test]
    fn test_container_token_default_range() {
        let parsed = parse_container_token("1#10", Some("3")).unwrap();
        assert_eq!(parsed[0].0, "3");
        assert!(parse_container_token("1#10", None).is_err());
    }
}
