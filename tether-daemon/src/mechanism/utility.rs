/*!
 * OS device utility
 * `bluetoothctl pair` / `bluetoothctl remove`
 */

use async_trait::async_trait;

use super::{run_process, MechanismOutput, PairingMechanism};
use crate::error::MechanismError;
use crate::identity::DeviceIdentity;

pub struct DeviceUtility {
    program: String,
}

impl DeviceUtility {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }
}

#[async_trait]
impl PairingMechanism for DeviceUtility {
    fn id(&self) -> String {
        format!("utility:{}", self.program)
    }

    async fn pair(&self, identity: &DeviceIdentity) -> Result<MechanismOutput, MechanismError> {
        let output = run_process(&self.program, ["pair", identity.as_str()]).await?;
        reject_reported_failure(output)
    }

    async fn unpair(&self, identity: &DeviceIdentity) -> Result<MechanismOutput, MechanismError> {
        let output = run_process(&self.program, ["remove", identity.as_str()]).await?;
        reject_reported_failure(output)
    }
}

// bluetoothctl exits 0 on some failures and prints "Failed to pair: ..." or
// "Device ... not available" instead.
fn reject_reported_failure(output: MechanismOutput) -> Result<MechanismOutput, MechanismError> {
    let reported = output
        .stdout
        .lines()
        .chain(output.stderr.lines())
        .map(str::trim)
        .find(|line| line.starts_with("Failed") || line.ends_with("not available"))
        .map(str::to_string);

    match reported {
        Some(message) => Err(MechanismError::Failed {
            message,
            stdout: output.stdout,
            stderr: output.stderr,
        }),
        None => Ok(output),
    }
}
