//! Target architecture parsing.
//!
//! Targets are written `<os>-<cpu>`, e.g. `linux-x64` or `darwin-arm64`.
//! Common aliases (`macos`, `win`, `x86_64`, `amd64`, `aarch64`) are accepted
//! and normalized to the canonical spelling.

use crate::errors::ValidationError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Os {
    Linux,
    Darwin,
    Windows,
}

impl Os {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Darwin => "darwin",
            Self::Windows => "windows",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "linux" => Some(Self::Linux),
            "darwin" | "macos" => Some(Self::Darwin),
            "windows" | "win" => Some(Self::Windows),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Cpu {
    X64,
    Arm64,
}

impl Cpu {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::X64 => "x64",
            Self::Arm64 => "arm64",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "x64" | "x86_64" | "amd64" => Some(Self::X64),
            "arm64" | "aarch64" => Some(Self::Arm64),
            _ => None,
        }
    }
}

/// A compilation target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetArch {
    pub os: Os,
    pub cpu: Cpu,
}

impl TargetArch {
    pub const fn new(os: Os, cpu: Cpu) -> Self {
        Self { os, cpu }
    }

    /// The architecture of the machine this process runs on.
    ///
    /// Returns `None` on hosts outside the supported matrix.
    pub fn host() -> Option<Self> {
        let os = Os::parse(std::env::consts::OS)?;
        let cpu = Cpu::parse(std::env::consts::ARCH)?;
        Some(Self { os, cpu })
    }

    pub fn is_windows(&self) -> bool {
        self.os == Os::Windows
    }

    /// File name for an artifact built for this target:
    /// `{base}-{target}`, plus `.exe` on Windows.
    pub fn artifact_file_name(&self, base: &str) -> String {
        if self.is_windows() {
            format!("{base}-{self}.exe")
        } else {
            format!("{base}-{self}")
        }
    }
}

/// Canonical spelling of an architecture tag.
///
/// Recognized targets are normalized (`macos-aarch64` becomes
/// `darwin-arm64`); anything else is kept as given, trimmed.
pub fn canonical_architecture(raw: &str) -> String {
    match raw.parse::<TargetArch>() {
        Ok(target) => target.to_string(),
        Err(_) => raw.trim().to_string(),
    }
}

impl fmt::Display for TargetArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os.as_str(), self.cpu.as_str())
    }
}

impl FromStr for TargetArch {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let Some((os, cpu)) = normalized.split_once('-') else {
            return Err(ValidationError::new(
                "target_arch",
                format!("'{s}' is not of the form <os>-<cpu>"),
            ));
        };
        let os = Os::parse(os)
            .ok_or_else(|| ValidationError::new("target_arch", format!("unknown os '{os}'")))?;
        let cpu = Cpu::parse(cpu)
            .ok_or_else(|| ValidationError::new("target_arch", format!("unknown cpu '{cpu}'")))?;
        Ok(Self { os, cpu })
    }
}

impl Serialize for TargetArch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TargetArch {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
