//! Host platform, spelled the way image manifests expect it.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Os {
    Linux,
    MacOs,
    FreeBsd,
    Windows,
    Unknown(String),
}

impl Os {
    /// Value of the `os` label.
    pub fn as_label(&self) -> &str {
        match self {
            Os::Linux => "linux",
            Os::MacOs => "darwin",
            Os::FreeBsd => "freebsd",
            Os::Windows => "windows",
            Os::Unknown(value) => value.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arch {
    X86_64,
    X86,
    Aarch64,
    Armv7,
    Unknown(String),
}

impl Arch {
    /// Value of the `arch` label.
    pub fn as_label(&self) -> &str {
        match self {
            Arch::X86_64 => "amd64",
            Arch::X86 => "i386",
            Arch::Aarch64 => "arm64",
            Arch::Armv7 => "armv7l",
            Arch::Unknown(value) => value.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: Os,
    pub arch: Arch,
}

impl Platform {
    pub fn current() -> Self {
        Self::from_consts(std::env::consts::OS, std::env::consts::ARCH)
    }

    fn from_consts(os: &str, arch: &str) -> Self {
        let os = match os {
            "linux" => Os::Linux,
            "macos" => Os::MacOs,
            "freebsd" => Os::FreeBsd,
            "windows" => Os::Windows,
            other => Os::Unknown(other.to_string()),
        };

        let arch = match arch {
            "x86_64" => Arch::X86_64,
            "x86" => Arch::X86,
            "aarch64" => Arch::Aarch64,
            "arm" | "armv7" => Arch::Armv7,
            other => Arch::Unknown(other.to_string()),
        };

        Self { os, arch }
    }
}
