/*!
 * Pairing Orchestrator
 * Ordered fallback across pairing mechanisms with diagnostic collection
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::audit::AuditLog;
use crate::error::{MechanismError, OrchestrationFailed};
use crate::identity::DeviceIdentity;
use crate::mechanism::PairingMechanism;

/// Marker the pairing tools put in front of their most specific error.
pub const FAILURE_MARKER: &str = "Failed:";

const GENERIC_FAILURE: &str = "Operation failed - check logs for details";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Pair,
    Unpair,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Pair => f.write_str("pair"),
            Operation::Unpair => f.write_str("unpair"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    Failed,
    Unavailable,
}

/// Diagnostic entry for one candidate, kept whatever the outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempt {
    pub mechanism: String,
    pub outcome: AttemptOutcome,
    pub stdout: String,
    pub stderr: String,
    pub error: Option<String>,
}

impl Attempt {
    fn unavailable(mechanism: String, reason: String) -> Self {
        Self {
            mechanism,
            outcome: AttemptOutcome::Unavailable,
            stdout: String::new(),
            stderr: String::new(),
            error: Some(reason),
        }
    }
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.mechanism, self.outcome)?;
        if let Some(error) = &self.error {
            write!(f, " error={}", error)?;
        }
        if !self.stdout.trim().is_empty() {
            write!(f, " stdout={}", self.stdout.trim())?;
        }
        if !self.stderr.trim().is_empty() {
            write!(f, " stderr={}", self.stderr.trim())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PairingSuccess {
    pub identity: DeviceIdentity,
    pub mechanism: String,
    pub message: String,
    pub attempts: Vec<Attempt>,
}

pub struct PairingOrchestrator {
    candidates: Vec<Arc<dyn PairingMechanism>>,
    audit: Arc<AuditLog>,
}

impl PairingOrchestrator {
    pub fn new(candidates: Vec<Arc<dyn PairingMechanism>>, audit: Arc<AuditLog>) -> Self {
        Self { candidates, audit }
    }

    pub fn candidate_ids(&self) -> Vec<String> {
        self.candidates.iter().map(|c| c.id()).collect()
    }

    pub async fn pair(&self, raw_identity: &str) -> Result<PairingSuccess, OrchestrationFailed> {
        self.run(Operation::Pair, raw_identity).await
    }

    pub async fn unpair(&self, raw_identity: &str) -> Result<PairingSuccess, OrchestrationFailed> {
        self.run(Operation::Unpair, raw_identity).await
    }

    /// Tries each candidate in order and stops at the first success. Failed
    /// and unavailable candidates only add diagnostics.
    async fn run(
        &self,
        operation: Operation,
        raw_identity: &str,
    ) -> Result<PairingSuccess, OrchestrationFailed> {
        let identity = DeviceIdentity::normalize(raw_identity);
        let mut attempts = Vec::with_capacity(self.candidates.len());

        for candidate in &self.candidates {
            let mechanism = candidate.id();

            if !candidate.is_available().await {
                self.audit
                    .record(format!("{} via {} unavailable", operation, mechanism))
                    .await;
                attempts.push(Attempt::unavailable(mechanism, "not available".to_string()));
                continue;
            }

            self.audit
                .record(format!("Attempting {} via {} mac={}", operation, mechanism, identity))
                .await;

            let attempt = attempt_once(candidate.clone(), operation, identity.clone()).await;
            let attempt = match attempt {
                Ok(output) => {
                    self.audit
                        .record(format!(
                            "{} OK via {} stdout={} stderr={}",
                            operation,
                            mechanism,
                            output.stdout.trim(),
                            output.stderr.trim()
                        ))
                        .await;
                    tracing::info!("{} {} succeeded via {}", operation, identity, mechanism);

                    attempts.push(Attempt {
                        mechanism: mechanism.clone(),
                        outcome: AttemptOutcome::Succeeded,
                        stdout: output.stdout.clone(),
                        stderr: output.stderr,
                        error: None,
                    });
                    return Ok(PairingSuccess {
                        identity,
                        mechanism,
                        message: output.stdout.trim().to_string(),
                        attempts,
                    });
                }
                Err(MechanismError::Unavailable(reason)) => Attempt::unavailable(mechanism, reason),
                Err(MechanismError::Failed {
                    message,
                    stdout,
                    stderr,
                }) => Attempt {
                    mechanism,
                    outcome: AttemptOutcome::Failed,
                    stdout,
                    stderr,
                    error: Some(message),
                },
            };

            tracing::debug!("{} {}: {}", operation, identity, attempt);
            attempts.push(attempt);
        }

        let reason = extract_relevant_error(&attempts);
        let details: Vec<String> = attempts.iter().map(ToString::to_string).collect();
        self.audit
            .record(format!(
                "{} {} failed all methods. Details: {}",
                operation,
                identity,
                details.join(" | ")
            ))
            .await;
        tracing::warn!("{} {} failed: {}", operation, identity, reason);

        Err(OrchestrationFailed {
            operation,
            reason,
            attempts,
        })
    }
}

// Each attempt runs in its own task so a panicking mechanism is recorded as a
// failed candidate instead of taking the request down.
async fn attempt_once(
    candidate: Arc<dyn PairingMechanism>,
    operation: Operation,
    identity: DeviceIdentity,
) -> Result<crate::mechanism::MechanismOutput, MechanismError> {
    let task = tokio::spawn(async move {
        match operation {
            Operation::Pair => candidate.pair(&identity).await,
            Operation::Unpair => candidate.unpair(&identity).await,
        }
    });

    match task.await {
        Ok(result) => result,
        Err(join_error) => Err(MechanismError::failed(format!(
            "mechanism aborted: {}",
            join_error
        ))),
    }
}

/// Picks one user-facing line out of noisy tool output.
///
/// Precedence: the first line carrying [`FAILURE_MARKER`] (from the marker
/// on), then the first non-empty stdout line, then the first non-empty
/// stderr line, then a generic message.
pub fn extract_relevant_error(attempts: &[Attempt]) -> String {
    let marked = attempts.iter().find_map(|attempt| {
        attempt
            .stdout
            .lines()
            .chain(attempt.stderr.lines())
            .chain(attempt.error.iter().flat_map(|e| e.lines()))
            .find_map(|line| line.find(FAILURE_MARKER).map(|idx| line[idx..].trim().to_string()))
    });
    if let Some(line) = marked {
        return line;
    }

    let first_line = |text: &str| {
        text.lines()
            .map(str::trim)
            .find(|line| !line.is_empty() && !line.starts_with("(none)"))
            .map(str::to_string)
    };

    attempts
        .iter()
        .find_map(|a| first_line(a.stdout.as_str()))
        .or_else(|| attempts.iter().find_map(|a| first_line(a.stderr.as_str())))
        .unwrap_or_else(|| GENERIC_FAILURE.to_string())
}
