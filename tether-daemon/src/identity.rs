/*!
 * Device Identity
 * Canonical `aa:bb:cc:dd:ee:ff` form for Bluetooth hardware addresses
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalised device address used as the key everywhere in the daemon.
///
/// Well-formed addresses (12 hex digits once separators and prefixes are
/// stripped) become lowercase colon-separated octets. Anything else is kept
/// as a lowercased best-effort key rather than rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    pub fn normalize(raw: &str) -> Self {
        Self(normalize(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 12 hex digits without separators, upper-cased, if this identity
    /// is a well-formed address.
    pub fn compact_upper(&self) -> Option<String> {
        self.is_canonical()
            .then(|| self.0.replace(':', "").to_ascii_uppercase())
    }

    pub fn is_canonical(&self) -> bool {
        let bytes = self.0.as_bytes();
        bytes.len() == 17
            && bytes.chunks(3).all(|octet| {
                octet[0].is_ascii_hexdigit()
                    && octet[1].is_ascii_hexdigit()
                    && octet.get(2).map_or(true, |sep| *sep == b':')
            })
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceIdentity {
    fn from(raw: &str) -> Self {
        Self::normalize(raw)
    }
}

/// Pure best-effort normalisation, see [`DeviceIdentity`].
pub fn normalize(raw: &str) -> String {
    let hex: String = raw.chars().filter(char::is_ascii_hexdigit).collect();
    if hex.len() != 12 {
        return raw.to_lowercase();
    }

    let upper = hex.to_ascii_uppercase();
    let octets: Vec<&str> = (0..6).map(|i| &upper[i * 2..i * 2 + 2]).collect();
    octets.join(":").to_lowercase()
}
