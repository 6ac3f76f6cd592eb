//! Two-phase verification
//!
//! Phase one runs the offline checks. Phase two looks the anchor up on chain
//! and needs network access, so it only runs when asked for explicitly.

use std::sync::Arc;
use thiserror::Error;

use super::report::{OnChainVerification, VerificationReport, VerificationStatus};
use crate::commands::backend::{CommandError, VerificationBackend};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VerificationError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("offline verification has not run yet")]
    OfflineNotRun,

    #[error("recording has no blockchain anchor to look up")]
    NoAnchor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationPhase {
    NotRun,
    Offline,
    OnChain,
}

/// Verification of one recording
pub struct VerificationSession {
    backend: Arc<dyn VerificationBackend>,
    manifest_path: String,
    video_path: String,
    report: Option<VerificationReport>,
    /// Status of the last offline run, before any on-chain result
    offline_status: Option<VerificationStatus>,
    phase: VerificationPhase,
}

impl VerificationSession {
    pub fn new(
        backend: Arc<dyn VerificationBackend>,
        manifest_path: impl Into<String>,
        video_path: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            manifest_path: manifest_path.into(),
            video_path: video_path.into(),
            report: None,
            offline_status: None,
            phase: VerificationPhase::NotRun,
        }
    }

    pub fn phase(&self) -> VerificationPhase {
        self.phase
    }

    pub fn report(&self) -> Option<&VerificationReport> {
        self.report.as_ref()
    }

    pub fn status(&self) -> Option<VerificationStatus> {
        self.report.as_ref().map(VerificationReport::effective_status)
    }

    /// Whether [`VerificationSession::verify_on_chain`] may be offered
    pub fn can_verify_on_chain(&self) -> bool {
        self.report
            .as_ref()
            .map(|r| r.checks.has_anchor())
            .unwrap_or(false)
    }

    /// Run the offline checks. Running again replaces any earlier result.
    pub async fn verify(&mut self) -> Result<&VerificationReport, VerificationError> {
        tracing::info!("Verifying {}", self.video_path);
        let mut report = self
            .backend
            .verify_recording(&self.manifest_path, &self.video_path)
            .await?;
        // An offline report never carries an on-chain verdict.
        report.strip_on_chain();

        tracing::info!(
            "Offline verification of {}: {:?}",
            self.video_path,
            report.effective_status()
        );
        self.phase = VerificationPhase::Offline;
        self.offline_status = Some(report.status);
        Ok(&*self.report.insert(report))
    }

    /// Look the recorded anchor up on chain and fold the result into the
    /// offline report.
    pub async fn verify_on_chain(&mut self) -> Result<&VerificationReport, VerificationError> {
        let Some(current) = self.report.as_ref() else {
            return Err(VerificationError::OfflineNotRun);
        };
        if !current.checks.has_anchor() {
            return Err(VerificationError::NoAnchor);
        }

        tracing::info!("Verifying anchor of {} on chain", self.video_path);
        let deep = self
            .backend
            .verify_recording_deep(&self.manifest_path, &self.video_path)
            .await?;

        let on_chain = deep.checks.on_chain().cloned().unwrap_or_else(|| {
            tracing::warn!("Deep verification returned no on-chain result");
            OnChainVerification {
                verified: false,
                chain_name: String::new(),
                contract_address: String::new(),
                error: Some("no on-chain result returned".to_string()),
            }
        });

        let (Some(report), Some(offline_status)) = (self.report.as_mut(), self.offline_status) else {
            return Err(VerificationError::OfflineNotRun);
        };
        if let Some(anchor) = report.checks.blockchain_anchor.as_mut() {
            anchor.on_chain = Some(on_chain);
        }
        report.timestamp = deep.timestamp;
        // Each lookup replaces the previous one; only the offline verdict carries over.
        report.status = offline_status.max(report.checks.derive_status());

        tracing::info!(
            "On-chain verification of {}: {:?}",
            self.video_path,
            report.status
        );
        self.phase = VerificationPhase::OnChain;
        Ok(&*report)
    }
}
