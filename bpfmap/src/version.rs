use std::{ffi::CStr, fmt, mem, sync::OnceLock};

use log::debug;

/// Kernel release triple, e.g. `6.8.0` out of `6.8.0-45-generic`.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct KernelVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl KernelVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parses the leading `major.minor[.patch]` of a release string.
    pub fn parse(release: &str) -> Option<Self> {
        let numeric = release
            .split(|c: char| !(c.is_ascii_digit() || c == '.'))
            .next()?;
        let mut parts = numeric.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        Some(Self::new(major, minor, patch))
    }
}

impl fmt::Display for KernelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Clone, Debug)]
pub struct Version {
    pub library: &'static str,
    pub library_version: &'static str,
    /// Raw `uname -r`; empty if the query failed.
    pub kernel_release: String,
    pub kernel: Option<KernelVersion>,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.library, self.library_version)?;
        match self.kernel {
            Some(kernel) => write!(f, " (kernel {kernel})"),
            None => write!(f, " (kernel unknown)"),
        }
    }
}

static VERSION: OnceLock<Version> = OnceLock::new();

/// Library and running-kernel version, computed on first use.
pub fn version() -> &'static Version {
    VERSION.get_or_init(|| {
        let kernel_release = kernel_release().unwrap_or_default();
        let kernel = KernelVersion::parse(&kernel_release);
        if kernel.is_none() {
            debug!("could not parse kernel release {kernel_release:?}");
        }
        Version {
            library: env!("CARGO_PKG_NAME"),
            library_version: env!("CARGO_PKG_VERSION"),
            kernel_release,
            kernel,
        }
    })
}

fn kernel_release() -> Option<String> {
    let mut uts: libc::utsname = unsafe { mem::zeroed() };
    if unsafe { libc::uname(&mut uts) } != 0 {
        return None;
    }
    let release = unsafe { CStr::from_ptr(uts.release.as_ptr()) };
    Some(release.to_string_lossy().into_owned())
}
