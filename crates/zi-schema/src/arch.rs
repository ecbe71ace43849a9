//! Operating system and CPU architecture compatibility.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ParseError;

/// Operating systems an implementation can target.
///
/// Declaration order matters: POSIX binaries run on every system listed before
/// [`Os::Posix`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Os {
    /// Any operating system (`*`).
    #[default]
    All,
    /// Linux.
    Linux,
    /// Solaris.
    Solaris,
    /// `FreeBSD`.
    FreeBsd,
    /// macOS with the Mac-specific frameworks.
    MacOsX,
    /// Plain Darwin.
    Darwin,
    /// Cygwin on Windows.
    Cygwin,
    /// Any POSIX system.
    Posix,
    /// Windows.
    Windows,
    /// Unrecognized name; never compatible.
    Unknown,
}

impl Os {
    /// Canonical feed spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "*",
            Self::Linux => "Linux",
            Self::Solaris => "Solaris",
            Self::FreeBsd => "FreeBSD",
            Self::MacOsX => "MacOSX",
            Self::Darwin => "Darwin",
            Self::Cygwin => "Cygwin",
            Self::Posix => "POSIX",
            Self::Windows => "Windows",
            Self::Unknown => "unknown",
        }
    }

    /// The operating system this binary was compiled for.
    pub fn current() -> Self {
        match std::env::consts::OS {
            "linux" | "android" => Self::Linux,
            "macos" => Self::MacOsX,
            "freebsd" => Self::FreeBsd,
            "solaris" | "illumos" => Self::Solaris,
            "windows" => Self::Windows,
            _ => Self::Unknown,
        }
    }

    /// Whether a binary built for `self` runs on `system`.
    pub fn runs_on(self, system: Self) -> bool {
        if self == Self::Unknown || system == Self::Unknown {
            return false;
        }
        if self == system || self == Self::All || system == Self::All {
            return true;
        }
        match (self, system) {
            (Self::Windows, Self::Cygwin) | (Self::Darwin, Self::MacOsX) => true,
            (Self::Posix, system) => system <= Self::Posix,
            _ => false,
        }
    }
}

impl FromStr for Os {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "*" | "" => Self::All,
            "Linux" => Self::Linux,
            "Solaris" => Self::Solaris,
            "FreeBSD" => Self::FreeBsd,
            "MacOSX" => Self::MacOsX,
            "Darwin" => Self::Darwin,
            "Cygwin" => Self::Cygwin,
            "POSIX" => Self::Posix,
            "Windows" => Self::Windows,
            _ => Self::Unknown,
        })
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CPU architectures an implementation can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Cpu {
    /// Any CPU (`*`).
    #[default]
    All,
    /// Intel 386.
    I386,
    /// Intel 486.
    I486,
    /// Pentium.
    I586,
    /// Pentium Pro and later 32-bit x86.
    I686,
    /// 64-bit x86.
    X86_64,
    /// 32-bit `PowerPC`.
    Ppc,
    /// 64-bit `PowerPC`.
    Ppc64,
    /// Source code that still needs compiling.
    Source,
    /// Unrecognized name; never compatible.
    Unknown,
}

impl Cpu {
    /// Canonical feed spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "*",
            Self::I386 => "i386",
            Self::I486 => "i486",
            Self::I586 => "i586",
            Self::I686 => "i686",
            Self::X86_64 => "x86_64",
            Self::Ppc => "ppc",
            Self::Ppc64 => "ppc64",
            Self::Source => "src",
            Self::Unknown => "unknown",
        }
    }

    /// The CPU this binary was compiled for.
    pub fn current() -> Self {
        match std::env::consts::ARCH {
            "x86_64" => Self::X86_64,
            "x86" => Self::I686,
            "powerpc" => Self::Ppc,
            "powerpc64" => Self::Ppc64,
            _ => Self::Unknown,
        }
    }

    /// Whether a binary built for `self` runs on `system`.
    pub fn runs_on(self, system: Self) -> bool {
        if self == Self::Unknown || system == Self::Unknown {
            return false;
        }
        if self == system || self == Self::All || system == Self::All {
            return true;
        }
        if self == Self::Ppc && system == Self::Ppc64 {
            return true;
        }
        let x86 = Self::I386..=Self::X86_64;
        x86.contains(&self) && x86.contains(&system) && system >= self
    }
}

impl FromStr for Cpu {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "*" | "" => Self::All,
            "i386" => Self::I386,
            "i486" => Self::I486,
            "i586" => Self::I586,
            "i686" => Self::I686,
            "x86_64" => Self::X86_64,
            "ppc" => Self::Ppc,
            "ppc64" => Self::Ppc64,
            "src" => Self::Source,
            _ => Self::Unknown,
        })
    }
}

impl fmt::Display for Cpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An `os-cpu` pair.
///
/// # Example
///
/// ```
/// use zi_schema::{Architecture, Cpu, Os};
///
/// let arch: Architecture = "Linux-i686".parse().unwrap();
/// assert!(arch.runs_on(Architecture::new(Os::Linux, Cpu::X86_64)));
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct Architecture {
    /// Operating system.
    pub os: Os,
    /// CPU.
    pub cpu: Cpu,
}

impl Architecture {
    /// Combine an OS and CPU.
    pub fn new(os: Os, cpu: Cpu) -> Self {
        Self { os, cpu }
    }

    /// The system this binary is running on.
    pub fn current() -> Self {
        Self::new(Os::current(), Cpu::current())
    }

    /// Whether both parts are wildcards.
    pub fn is_any(&self) -> bool {
        self.os == Os::All && self.cpu == Cpu::All
    }

    /// Whether an implementation for `self` runs on `system`.
    pub fn runs_on(&self, system: Self) -> bool {
        self.os.runs_on(system.os) && self.cpu.runs_on(system.cpu)
    }

    /// Number of non-wildcard parts, used to prefer specific builds.
    pub fn specificity(&self) -> u8 {
        u8::from(self.os != Os::All) + u8::from(self.cpu != Cpu::All)
    }
}

impl FromStr for Architecture {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (os, cpu) = s
            .split_once('-')
            .filter(|(_, cpu)| !cpu.contains('-'))
            .ok_or_else(|| ParseError::Architecture(s.to_string()))?;
        let Ok(os) = os.parse::<Os>();
        let Ok(cpu) = cpu.parse::<Cpu>();
        Ok(Self { os, cpu })
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os, self.cpu)
    }
}

impl TryFrom<String> for Architecture {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Architecture> for String {
    fn from(arch: Architecture) -> Self {
        arch.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let arch: Architecture = "Linux-x86_64".parse().unwrap();
        assert_eq!(arch, Architecture::new(Os::Linux, Cpu::X86_64));
        assert_eq!(arch.to_string(), "Linux-x86_64");
        assert_eq!("*-*".parse::<Architecture>().unwrap(), Architecture::default());
        assert_eq!("Plan9-mips".parse::<Architecture>().unwrap().os, Os::Unknown);
        assert!("Linux".parse::<Architecture>().is_err());
        assert!("Linux-x86-64".parse::<Architecture>().is_err());
    }

    #[test]
    fn os_compatibility() {
        assert!(Os::Windows.runs_on(Os::Cygwin));
        assert!(!Os::Cygwin.runs_on(Os::Windows));
        assert!(Os::Darwin.runs_on(Os::MacOsX));
        assert!(Os::Posix.runs_on(Os::Linux));
        assert!(Os::Posix.runs_on(Os::Cygwin));
        assert!(!Os::Posix.runs_on(Os::Windows));
        assert!(Os::All.runs_on(Os::Windows));
        assert!(!Os::Unknown.runs_on(Os::Unknown));
    }

    #[test]
    fn cpu_compatibility() {
        assert!(Cpu::I386.runs_on(Cpu::X86_64));
        assert!(Cpu::I686.runs_on(Cpu::X86_64));
        assert!(!Cpu::X86_64.runs_on(Cpu::I686));
        assert!(Cpu::Ppc.runs_on(Cpu::Ppc64));
        assert!(!Cpu::Ppc.runs_on(Cpu::X86_64));
        assert!(Cpu::All.runs_on(Cpu::Source));
    }

    #[test]
    fn specificity_counts_concrete_parts() {
        assert_eq!(Architecture::default().specificity(), 0);
        assert_eq!("Linux-*".parse::<Architecture>().unwrap().specificity(), 1);
        assert_eq!("Linux-x86_64".parse::<Architecture>().unwrap().specificity(), 2);
    }
}
