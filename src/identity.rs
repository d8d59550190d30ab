//! Client identifier discovery
//!
//! The uplink identifies the device by the hardware address of its first
//! non-loopback network interface, written as 12 lowercase hex digits.

use std::fs;
use std::path::Path;

const SYS_CLASS_NET: &str = "/sys/class/net";

/// Sent when no usable interface is found
pub const FALLBACK_ID: &str = "000000000000";

/// Hardware address of the first usable interface, or [`FALLBACK_ID`]
pub fn mac_address() -> String {
    match mac_address_in(Path::new(SYS_CLASS_NET)) {
        Some(mac) => {
            log::debug!("MAC address: {}", mac);
            mac
        }
        None => {
            log::warn!("No network interface address found, using {}", FALLBACK_ID);
            FALLBACK_ID.to_string()
        }
    }
}

/// Scan a sysfs-style `class/net` directory
///
/// Interfaces are visited in name order; `lo` and all-zero addresses are
/// skipped.
pub fn mac_address_in(dir: &Path) -> Option<String> {
    let mut names: Vec<_> = fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|entry| entry.file_name())
        .filter(|name| name != "lo")
        .collect();
    names.sort();

    names.into_iter().find_map(|name| {
        let raw = fs::read_to_string(dir.join(&name).join("address")).ok()?;
        normalize(&raw)
    })
}

/// `aa:bb:cc:dd:ee:ff` -> `aabbccddeeff`; `None` for malformed or zero
fn normalize(raw: &str) -> Option<String> {
    let hex: String = raw
        .trim()
        .split(':')
        .map(|octet| octet.to_ascii_lowercase())
        .collect();
    if hex.len() != 12 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    if hex.bytes().all(|b| b == b'0') {
        return None;
    }
    Some(hex)
}
