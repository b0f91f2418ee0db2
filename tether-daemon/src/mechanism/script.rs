/*!
 * Script enumerator
 * Runs a listing script from a temporary file and parses `name|status|mac|numeric` rows
 */

use async_trait::async_trait;
use std::io::Write;

use super::{run_process, DeviceEnumerator, RawDeviceRow};
use crate::error::MechanismError;

/// Lists devices known to `bluetoothctl`, one `name|status|mac|` row each.
/// Exits non-zero when `bluetoothctl` is missing or cannot list.
pub const DEFAULT_LISTING_SCRIPT: &str = r#"
command -v bluetoothctl >/dev/null 2>&1 || { echo "bluetoothctl not found" >&2; exit 127; }
devices=$(bluetoothctl devices) || exit $?
printf '%s\n' "$devices" | while read -r _ mac name; do
  [ -n "$mac" ] || continue
  if bluetoothctl info "$mac" | grep -q "Connected: yes"; then
    status=OK
  else
    status=Unknown
  fi
  printf '%s|%s|%s|\n' "$name" "$status" "$mac"
done
"#;

pub struct ScriptEnumerator {
    interpreter: String,
    script: String,
}

impl ScriptEnumerator {
    pub fn new(interpreter: &str, script: Option<String>) -> Self {
        Self {
            interpreter: interpreter.to_string(),
            script: script.unwrap_or_else(|| DEFAULT_LISTING_SCRIPT.to_string()),
        }
    }
}

#[async_trait]
impl DeviceEnumerator for ScriptEnumerator {
    fn id(&self) -> String {
        format!("script:{}", self.interpreter)
    }

    async fn enumerate(&self) -> Result<Vec<RawDeviceRow>, MechanismError> {
        // Removed when dropped, whichever way this function returns.
        let mut file = tempfile::Builder::new()
            .prefix("tether-list-")
            .suffix(".sh")
            .tempfile()
            .map_err(|e| MechanismError::failed(format!("cannot create listing script: {}", e)))?;

        file.write_all(self.script.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| MechanismError::failed(format!("cannot write listing script: {}", e)))?;

        let output = run_process(&self.interpreter, [file.path()]).await?;
        Ok(parse_rows(&output.stdout))
    }
}

pub fn parse_rows(stdout: &str) -> Vec<RawDeviceRow> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let mut parts = line.split('|').map(str::trim);
            let mut next = || parts.next().unwrap_or_default().to_string();
            let reported_name = next();
            let status = next();
            let raw_address = next();
            let numeric_address = parse_numeric(&next());

            RawDeviceRow {
                reported_name,
                status,
                raw_address,
                numeric_address,
            }
        })
        .collect()
}

fn parse_numeric(field: &str) -> Option<u64> {
    if field.is_empty() {
        return None;
    }
    match field.strip_prefix("0x").or_else(|| field.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => field.parse().ok(),
    }
}
