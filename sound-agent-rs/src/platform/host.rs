//! Host identification reported with every device.

use tracing::warn;

/// Name of this machine and its operating system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdentity {
    /// Upper-cased computer name
    pub host_name: String,

    /// e.g. "Windows 11 Professional 23H2 Build 22631.4037"
    pub os_name: String,
}

impl HostIdentity {
    pub fn new(host_name: impl Into<String>, os_name: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
            os_name: os_name.into(),
        }
    }

    /// Identify the machine the agent runs on.
    pub fn detect() -> Self {
        Self::new(detect_host_name(), detect_os_name())
    }
}

/// Fallback when the OS version cannot be read.
pub const NO_VERSION_INFO: &str = "Windows, no version info";

/// Raw values from `HKLM\SOFTWARE\Microsoft\Windows NT\CurrentVersion`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowsVersionInfo {
    pub product_name: String,
    pub edition_id: String,
    pub display_version: String,
    pub build_number: u32,
    pub revision: u32,
}

impl WindowsVersionInfo {
    /// Descriptive OS name.
    ///
    /// Windows 11 still reports "Windows 10" as product name, so build
    /// 22000 and later is named from the edition instead.
    pub fn describe(&self) -> String {
        let mut name = if self.build_number >= 22000 || self.product_name.contains("Windows 11") {
            format!("Windows 11 {}", self.edition_id)
        } else {
            self.product_name.clone()
        };

        if !self.display_version.is_empty() {
            name.push(' ');
            name.push_str(&self.display_version);
        }
        name.push_str(&format!(" Build {}.{}", self.build_number, self.revision));
        name
    }
}

#[cfg(windows)]
fn detect_host_name() -> String {
    use super::registry::MachineKey;

    const KEY: &str = r"SYSTEM\CurrentControlSet\Control\ComputerName\ActiveComputerName";
    match MachineKey::open(KEY).and_then(|key| key.read_string("ComputerName")) {
        Ok(name) => name.to_uppercase(),
        Err(e) => {
            warn!(error = %e, "Computer name not in registry, using environment");
            host_name_from_env()
        }
    }
}

#[cfg(not(windows))]
fn detect_host_name() -> String {
    host_name_from_env()
}

fn host_name_from_env() -> String {
    ["COMPUTERNAME", "HOSTNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
        .map(|name| name.to_uppercase())
        .unwrap_or_else(|| {
            warn!("Host name unknown");
            "UNKNOWN".to_string()
        })
}

#[cfg(windows)]
fn detect_os_name() -> String {
    use super::registry::MachineKey;

    const KEY: &str = r"SOFTWARE\Microsoft\Windows NT\CurrentVersion";
    let key = match MachineKey::open(KEY) {
        Ok(key) => key,
        Err(e) => {
            warn!(error = %e, "OS version not readable");
            return NO_VERSION_INFO.to_string();
        }
    };

    let build_number = key
        .read_string("CurrentBuildNumber")
        .ok()
        .and_then(|b| b.trim().parse().ok());
    let Some(build_number) = build_number else {
        return NO_VERSION_INFO.to_string();
    };

    WindowsVersionInfo {
        product_name: key.read_string("ProductName").unwrap_or_default(),
        edition_id: key.read_string("EditionID").unwrap_or_default(),
        display_version: key.read_string("DisplayVersion").unwrap_or_default(),
        build_number,
        revision: key.read_dword("UBR").unwrap_or(0),
    }
    .describe()
}

#[cfg(not(windows))]
fn detect_os_name() -> String {
    std::env::consts::OS.to_string()
}
