//! Repository consistency checking.
//!
//! `git fsck` does not always signal trouble through its exit status: dangling
//! or unreachable objects are only mentioned in its output. A repository is
//! healthy only if the check exits zero *and* its output mentions none of the
//! diagnostics listed in git-fsck(1).

use tracing::error;

use crate::error::Result;
use crate::exec::CommandOutput;
use crate::git::VersionControl;

/// From the "Extracted Diagnostics" section of git-fsck(1).
pub const CORRUPTION_KEYWORDS: &[&str] = &[
    "error",
    "lack of head",
    "missing sha",
    "unreachable",
    "missing",
    "dangling",
    "mismatch",
    "invalid",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityReport {
    pub ok: bool,
    pub message: String,
}

/// Union of the exit-status and output signals.
pub fn classify(output: &CommandOutput) -> IntegrityReport {
    let text = output.combined();
    let lowered = text.to_lowercase();
    let flagged = CORRUPTION_KEYWORDS.iter().any(|kw| lowered.contains(kw));

    if output.success && !flagged {
        IntegrityReport {
            ok: true,
            message: String::new(),
        }
    } else {
        let message = if text.trim().is_empty() {
            output.status.clone()
        } else {
            text.trim().to_string()
        };
        IntegrityReport { ok: false, message }
    }
}

pub struct RepositoryIntegrityChecker<'a> {
    vcs: &'a dyn VersionControl,
}

impl<'a> RepositoryIntegrityChecker<'a> {
    pub fn new(vcs: &'a dyn VersionControl) -> Self {
        Self { vcs }
    }

    pub fn check(&self) -> Result<IntegrityReport> {
        let report = classify(&self.vcs.check_integrity()?);
        if !report.ok {
            error!("detected issue with git repo: {}", report.message);
        }
        Ok(report)
    }
}
