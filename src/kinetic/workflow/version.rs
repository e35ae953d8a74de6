// SPDX-License-Identifier: MIT

//! Published version strings

use crate::adk::error::FlowError;
use std::fmt;
use std::str::FromStr;

/// `v<major>.<minor>.<patch>`, compared numerically
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl FromStr for Version {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || FlowError::InvalidVersion(s.to_string());
        let body = s.strip_prefix('v').unwrap_or(s);
        let parts: Vec<&str> = body.split('.').collect();
        if parts.len() != 3 {
            return Err(invalid());
        }
        let mut numbers = [0u64; 3];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            *slot = part.parse().map_err(|_| invalid())?;
        }
        Ok(Self {
            major: numbers[0],
            minor: numbers[1],
            patch: numbers[2],
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Reject `requested` unless it is strictly greater than `latest`
pub fn ensure_newer(latest: &str, requested: &str) -> Result<(), FlowError> {
    let old: Version = latest.parse()?;
    let new: Version = requested.parse()?;
    if new <= old {
        return Err(FlowError::VersionOrder {
            latest: latest.to_string(),
            requested: requested.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let v: Version = "v1.2.3".parse().unwrap();
        assert_eq!((v.major, v.minor, v.patch), (1, 2, 3));
        assert_eq!("0.0.1".parse::<Version>().unwrap().to_string(), "v0.0.1");

        for bad in ["", "v1.2", "v1.2.3.4", "1.x.0", "v1..0", "v-1.0.0", "v1.0.0-beta"] {
            assert!(
                matches!(bad.parse::<Version>(), Err(FlowError::InvalidVersion(_))),
                "accepted {}",
                bad
            );
        }
    }

    #[test]
    fn test_numeric_order() {
        assert!(ensure_newer("v1.9.0", "v1.10.0").is_ok());
        assert!(ensure_newer("v0.0.1", "v0.1.0").is_ok());
        assert!(matches!(
            ensure_newer("v1.0.0", "v1.0.0"),
            Err(FlowError::VersionOrder { .. })
        ));
        assert!(matches!(
            ensure_newer("v2.0.0", "v1.99.99"),
            Err(FlowError::VersionOrder { .. })
        ));
        assert!(matches!(
            ensure_newer("v1.0.0", "latest"),
            Err(FlowError::InvalidVersion(_))
        ));
    }
}
