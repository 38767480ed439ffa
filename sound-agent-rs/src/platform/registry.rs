//! Read-only Windows Registry access.

use thiserror::Error;
use windows::core::PCWSTR;
use windows::Win32::System::Registry::{
    RegCloseKey, RegOpenKeyExW, RegQueryValueExW, HKEY, HKEY_LOCAL_MACHINE, KEY_READ, REG_DWORD,
    REG_SZ, REG_VALUE_TYPE,
};

/// Registry error types.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Failed to open registry key: {path}")]
    OpenFailed { path: String },

    #[error("Failed to read registry value: {name}")]
    ReadFailed { name: String },

    #[error("Unexpected type for registry value: {name}")]
    UnexpectedType { name: String },
}

fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Open HKLM key, closed on drop.
pub struct MachineKey {
    hkey: HKEY,
}

impl MachineKey {
    /// Open a key below HKEY_LOCAL_MACHINE for reading.
    pub fn open(path: &str) -> Result<Self, RegistryError> {
        let path_wide = to_wide(path);
        unsafe {
            let mut hkey = HKEY::default();
            let result = RegOpenKeyExW(
                HKEY_LOCAL_MACHINE,
                PCWSTR::from_raw(path_wide.as_ptr()),
                0,
                KEY_READ,
                &mut hkey,
            );

            if result.is_err() {
                return Err(RegistryError::OpenFailed {
                    path: path.to_string(),
                });
            }
            Ok(Self { hkey })
        }
    }

    /// Read a REG_SZ value.
    pub fn read_string(&self, name: &str) -> Result<String, RegistryError> {
        let name_wide = to_wide(name);
        unsafe {
            let mut value_type = REG_VALUE_TYPE::default();
            let mut data_size = 0u32;
            let result = RegQueryValueExW(
                self.hkey,
                PCWSTR::from_raw(name_wide.as_ptr()),
                None,
                Some(&mut value_type),
                None,
                Some(&mut data_size),
            );
            if result.is_err() {
                return Err(RegistryError::ReadFailed {
                    name: name.to_string(),
                });
            }
            if value_type != REG_SZ {
                return Err(RegistryError::UnexpectedType {
                    name: name.to_string(),
                });
            }

            let mut buffer = vec![0u16; (data_size as usize).div_ceil(2)];
            let result = RegQueryValueExW(
                self.hkey,
                PCWSTR::from_raw(name_wide.as_ptr()),
                None,
                None,
                Some(buffer.as_mut_ptr() as *mut u8),
                Some(&mut data_size),
            );
            if result.is_err() {
                return Err(RegistryError::ReadFailed {
                    name: name.to_string(),
                });
            }

            let len = buffer.iter().position(|&c| c == 0).unwrap_or(buffer.len());
            Ok(String::from_utf16_lossy(&buffer[..len]))
        }
    }

    /// Read a REG_DWORD value.
    pub fn read_dword(&self, name: &str) -> Result<u32, RegistryError> {
        let name_wide = to_wide(name);
        unsafe {
            let mut value_type = REG_VALUE_TYPE::default();
            let mut data: u32 = 0;
            let mut data_size = std::mem::size_of::<u32>() as u32;

            let result = RegQueryValueExW(
                self.hkey,
                PCWSTR::from_raw(name_wide.as_ptr()),
                None,
                Some(&mut value_type),
                Some(&mut data as *mut u32 as *mut u8),
                Some(&mut data_size),
            );

            if result.is_err() {
                return Err(RegistryError::ReadFailed {
                    name: name.to_string(),
                });
            }
            if value_type != REG_DWORD {
                return Err(RegistryError::UnexpectedType {
                    name: name.to_string(),
                });
            }
            Ok(data)
        }
    }
}

impl Drop for MachineKey {
    fn drop(&mut self) {
        unsafe {
            let _ = RegCloseKey(self.hkey);
        }
    }
}
