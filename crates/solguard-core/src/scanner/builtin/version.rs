//! Compiler-version constraints from `pragma solidity`.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SolidityVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl SolidityVersion {
    pub const CHECKED_ARITHMETIC: SolidityVersion = SolidityVersion::new(0, 8, 0);

    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    pub fn has_checked_arithmetic(&self) -> bool {
        *self >= Self::CHECKED_ARITHMETIC
    }

    /// Lowest version a constraint such as `>=0.6.0 <0.9.0` or `^0.7.6 || ^0.8.0` admits.
    ///
    /// Returns `None` when no comparator could be read. Upper bounds alone admit `0.0.0`.
    pub fn lowest_admitted(constraint: &str) -> Option<Self> {
        let mut lowest: Option<Self> = None;
        let mut saw_comparator = false;
        for comparator in constraint
            .split("||")
            .flat_map(str::split_whitespace)
            .filter(|part| !part.is_empty())
        {
            saw_comparator = true;
            if comparator.starts_with('<') {
                continue;
            }
            let raw = comparator.trim_start_matches(['^', '~', '>', '=', 'v']);
            if let Some(version) = Self::parse(raw) {
                lowest = Some(lowest.map_or(version, |current| current.min(version)));
            }
        }
        match lowest {
            Some(version) => Some(version),
            None if saw_comparator && constraint.contains('<') => Some(Self::new(0, 0, 0)),
            None => None,
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split('.');
        let major = parts.next()?.trim().parse().ok()?;
        let mut component = || {
            parts
                .next()
                .and_then(|part| part.trim_end_matches(['x', '*']).parse().ok())
                .unwrap_or(0)
        };
        let minor = component();
        let patch = component();
        Some(Self::new(major, minor, patch))
    }
}

impl fmt::Display for SolidityVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
