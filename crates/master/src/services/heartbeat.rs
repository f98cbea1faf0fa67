//! The heartbeat handler: the master half of the tablet-server protocol.
//!
//! A server moves through `UNKNOWN → REGISTERED → REPORTING` purely via
//! successive heartbeats; the only per-server state is the registry
//! descriptor. A master restart wipes descriptors, so a known server can
//! find itself `UNKNOWN` again; the response's `needs_reregister` flag
//! drives it back through registration, and `needs_full_tablet_report`
//! recovers the report state. Late and duplicate heartbeats are harmless:
//! registration refreshes in place and reports are idempotent upserts.

use quarry_types::{Result, TsId};
use quarry_wire::heartbeat::{TsHeartbeatRequest, TsHeartbeatResponse};
use quarry_wire::security::{CertSignRequest, SignedCertificate};

use crate::catalog::ReportOutcome;

use super::MasterService;

impl MasterService {
    /// Processes one heartbeat from a tablet server.
    ///
    /// # Errors
    ///
    /// - Gate failures ([`quarry_types::MasterError::NotLeader`],
    ///   `NotReady`, `ServiceUnavailable`) fail the whole call before any
    ///   state is touched; the server retries against a (possibly
    ///   different) leader later.
    /// - [`quarry_types::MasterError::InvalidRegistration`] if an attached
    ///   registration fails endpoint validation.
    /// - [`quarry_types::MasterError::Storage`] if applying a report entry
    ///   fails to persist.
    pub async fn heartbeat(&self, req: TsHeartbeatRequest) -> Result<TsHeartbeatResponse> {
        let lease = self.gate.acquire()?;

        let descriptor = match req.registration {
            Some(registration) => self.registry.register(req.ts_id, registration)?,
            None => match self.registry.get(req.ts_id) {
                Some(descriptor) => {
                    self.registry.touch(req.ts_id);
                    descriptor
                },
                None => {
                    // Nothing known about this server (first contact, or a
                    // master restart wiped it): ask it to register and to
                    // send a full report, and process nothing else.
                    tracing::info!(
                        ts_id = %req.ts_id,
                        "Heartbeat from unknown tablet server; requesting registration"
                    );
                    return Ok(TsHeartbeatResponse {
                        needs_reregister: true,
                        needs_full_tablet_report: true,
                        tablets_to_create: Vec::new(),
                        signing_keys: Vec::new(),
                        signed_certificate: None,
                        master_registration: self.master_registration().clone(),
                    });
                },
            },
        };

        // Decided before applying the attached report: an incremental
        // report from a server we hold no report state for still leaves
        // gaps that only a full report closes.
        let needs_full_tablet_report = match (&req.report, descriptor.latest_report_seq()) {
            (_, Some(_)) => false,
            (Some(report), None) => report.is_incremental,
            (None, None) => true,
        };

        if let Some(report) = &req.report {
            for entry in &report.tablets {
                let outcome = self.catalog().apply_tablet_report(
                    &lease,
                    entry.tablet_id,
                    req.ts_id,
                    entry.term,
                    entry.role,
                )?;
                if outcome == ReportOutcome::UnknownTablet {
                    tracing::warn!(
                        ts_id = %req.ts_id,
                        tablet_id = %entry.tablet_id,
                        "Tablet report for tablet not in catalog"
                    );
                }
            }
            descriptor.record_report_seq(report.sequence_number);
        }

        let tablets_to_create =
            self.catalog().assign_tablets(&lease, req.ts_id, self.max_assignments_per_heartbeat);

        let signing_keys = self.security().export_signing_keys(req.latest_signing_key_seq);

        let signed_certificate = match &req.csr {
            Some(csr) => {
                let cert = self.security().sign_certificate(req.ts_id, csr)?;
                descriptor.set_has_signed_cert();
                Some(cert)
            },
            None => None,
        };

        Ok(TsHeartbeatResponse {
            needs_reregister: false,
            needs_full_tablet_report,
            tablets_to_create,
            signing_keys,
            signed_certificate,
            master_registration: self.master_registration().clone(),
        })
    }

    /// Signs a certificate outside the heartbeat exchange.
    ///
    /// Repeating the request while a valid certificate exists is not an
    /// error; the CSR is simply re-signed.
    ///
    /// # Errors
    ///
    /// Gate failures abort the call; a malformed CSR returns
    /// [`quarry_types::MasterError::InvalidRegistration`].
    pub async fn request_certificate(
        &self,
        ts_id: TsId,
        csr: &CertSignRequest,
    ) -> Result<SignedCertificate> {
        let _lease = self.gate.acquire()?;
        let cert = self.security().sign_certificate(ts_id, csr)?;
        if let Some(descriptor) = self.registry.get(ts_id) {
            descriptor.set_has_signed_cert();
        }
        Ok(cert)
    }
}
