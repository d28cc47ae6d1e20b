use std::fmt;
use std::str::FromStr;

/// Platform family of a target framework.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FrameworkFamily {
    /// `netX.Y` (X >= 5) and `netcoreappX.Y`
    NetCore,
    /// Dot-less `net4NN` monikers
    NetFramework,
    /// `netstandardX.Y`, the legacy cross-platform family
    Standard,
    /// Platform-agnostic (`any`, or items directly under `lib/`)
    Any,
    /// Any other moniker prefix, compatible only with itself
    Other(String),
}

/// Numeric framework version, compared component-wise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FrameworkVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl FrameworkVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a dotted version such as `8.0` or `2.1.3`.
    fn parse_dotted(s: &str) -> Option<Self> {
        let mut parts = s.split('.').map(|p| p.parse::<u32>().ok());
        let major = parts.next()??;
        let minor = parts.next().unwrap_or(Some(0))?;
        let patch = parts.next().unwrap_or(Some(0))?;
        Some(Self::new(major, minor, patch))
    }

    /// Parse a compact version where every digit is a component (`472` -> 4.7.2).
    fn parse_compact(s: &str) -> Option<Self> {
        let digits: Vec<u32> = s.chars().map(|c| c.to_digit(10)).collect::<Option<_>>()?;
        match digits.as_slice() {
            [major] => Some(Self::new(*major, 0, 0)),
            [major, minor] => Some(Self::new(*major, *minor, 0)),
            [major, minor, patch] => Some(Self::new(*major, *minor, *patch)),
            _ => None,
        }
    }
}

impl fmt::Display for FrameworkVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.patch == 0 {
            write!(f, "{}.{}", self.major, self.minor)
        } else {
            write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
        }
    }
}

/// A parsed target framework moniker such as `net8.0` or `netstandard2.0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetFramework {
    pub family: FrameworkFamily,
    pub version: FrameworkVersion,
}

impl TargetFramework {
    pub fn new(family: FrameworkFamily, version: FrameworkVersion) -> Self {
        Self { family, version }
    }

    pub fn any() -> Self {
        Self::new(FrameworkFamily::Any, FrameworkVersion::default())
    }

    pub fn is_any(&self) -> bool {
        self.family == FrameworkFamily::Any
    }

    pub fn is_standard(&self) -> bool {
        self.family == FrameworkFamily::Standard
    }

    /// Parse a moniker. Never fails: unknown shapes become their own family.
    pub fn parse(moniker: &str) -> Self {
        let lower = moniker.trim().to_lowercase();
        // Platform suffixes (`net8.0-windows`) do not affect compatibility here
        let lower = lower.split('-').next().unwrap_or_default();

        if lower.is_empty() || lower == "any" {
            return Self::any();
        }

        if let Some(rest) = lower.strip_prefix("netcoreapp")
            && let Some(version) = FrameworkVersion::parse_dotted(rest)
        {
            return Self::new(FrameworkFamily::NetCore, version);
        }

        if let Some(rest) = lower.strip_prefix("netstandard")
            && let Some(version) = FrameworkVersion::parse_dotted(rest)
        {
            return Self::new(FrameworkFamily::Standard, version);
        }

        if let Some(rest) = lower.strip_prefix("net") {
            if rest.contains('.') {
                if let Some(version) = FrameworkVersion::parse_dotted(rest) {
                    let family = if version.major >= 5 {
                        FrameworkFamily::NetCore
                    } else {
                        FrameworkFamily::NetFramework
                    };
                    return Self::new(family, version);
                }
            } else if let Some(version) = FrameworkVersion::parse_compact(rest) {
                let family = if version.major >= 5 && rest.len() == 1 {
                    FrameworkFamily::NetCore
                } else {
                    FrameworkFamily::NetFramework
                };
                return Self::new(family, version);
            }
        }

        let split = lower
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(lower.len());
        let (prefix, rest) = lower.split_at(split);
        let version = FrameworkVersion::parse_dotted(rest).unwrap_or_default();
        Self::new(FrameworkFamily::Other(prefix.to_string()), version)
    }

    /// Whether a host running `host` can load items built for `self`.
    pub fn is_compatible_with(&self, host: &TargetFramework) -> bool {
        match (&host.family, &self.family) {
            (_, FrameworkFamily::Any) => true,
            (h, d) if h == d => self.version <= host.version,
            (FrameworkFamily::NetCore, FrameworkFamily::Standard) => {
                Self::max_standard_for_netcore(host.version)
                    .is_some_and(|max| self.version <= max)
            }
            (FrameworkFamily::NetFramework, FrameworkFamily::Standard) => {
                host.version >= FrameworkVersion::new(4, 6, 1)
                    && self.version <= FrameworkVersion::new(2, 0, 0)
            }
            _ => false,
        }
    }

    fn max_standard_for_netcore(host: FrameworkVersion) -> Option<FrameworkVersion> {
        if host >= FrameworkVersion::new(3, 0, 0) {
            Some(FrameworkVersion::new(2, 1, 0))
        } else if host >= FrameworkVersion::new(2, 0, 0) {
            Some(FrameworkVersion::new(2, 0, 0))
        } else if host >= FrameworkVersion::new(1, 0, 0) {
            Some(FrameworkVersion::new(1, 6, 0))
        } else {
            None
        }
    }
}

impl FromStr for TargetFramework {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl fmt::Display for TargetFramework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.version;
        match &self.family {
            FrameworkFamily::Any => write!(f, "any"),
            FrameworkFamily::NetCore if v.major >= 5 => write!(f, "net{}", v),
            FrameworkFamily::NetCore => write!(f, "netcoreapp{}", v),
            FrameworkFamily::Standard => write!(f, "netstandard{}", v),
            FrameworkFamily::NetFramework => {
                write!(f, "net{}{}", v.major, v.minor)?;
                if v.patch != 0 {
                    write!(f, "{}", v.patch)?;
                }
                Ok(())
            }
            FrameworkFamily::Other(prefix) => write!(f, "{}{}", prefix, v),
        }
    }
}
