//! Service layer for registering projects and initiating sanctions
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use tracing::info;

use crate::codec::TokenCodec;
use crate::error::{SanctionError, ValidationError};
use crate::node::{LogAction, NodeLog, Registration};
use crate::sanction::Sanction;
use crate::store::{Store, abort};
use crate::types::{Action, ApprovalMode, SanctionKind, SanctionState, TimeStamp};
use crate::utils;

pub struct SanctionService {
    store: Arc<Store>,
    codec: Arc<TokenCodec>,
}

/// Who must sign off on a new sanction and how.
#[derive(Debug, Clone)]
pub struct SanctionRequest {
    pub initiated_by: String,
    pub authorizers: Vec<String>,
    pub mode: ApprovalMode,
    pub initiation_date: TimeStamp<Utc>,
}

impl SanctionRequest {
    pub fn new(initiated_by: &str, authorizers: &[&str]) -> Self {
        Self {
            initiated_by: initiated_by.to_string(),
            authorizers: authorizers.iter().map(|a| a.to_string()).collect(),
            mode: ApprovalMode::Any,
            initiation_date: TimeStamp::new(),
        }
    }

    pub fn mode(mut self, mode: ApprovalMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn initiated_at(mut self, date: TimeStamp<Utc>) -> Self {
        self.initiation_date = date;
        self
    }
}

impl SanctionService {
    pub fn new(store: Arc<Store>, codec: Arc<TokenCodec>) -> Self {
        Self { store, codec }
    }

    /// Snapshot a project into a new, private registration.
    pub fn register_project(&self, project_id: &str) -> anyhow::Result<Registration> {
        let registration = Registration::new(
            utils::new_registration_id()?,
            project_id.to_string(),
            TimeStamp::new(),
        );
        self.store.insert_registration(&registration)?;

        info!(registration = %registration.id, project = project_id, "registration created");
        Ok(registration)
    }

    pub fn request_registration_approval(
        &self,
        registration_id: &str,
        request: SanctionRequest,
    ) -> anyhow::Result<Sanction> {
        let sanction = self.draft(SanctionKind::RegistrationApproval, &request)?;
        self.initiate(registration_id, sanction)
    }

    pub fn initiate_embargo(
        &self,
        registration_id: &str,
        end_date: TimeStamp<Utc>,
        request: SanctionRequest,
    ) -> anyhow::Result<Sanction> {
        if end_date <= request.initiation_date {
            return Err(ValidationError::InvalidEndDate.into());
        }
        let sanction = self
            .draft(SanctionKind::Embargo, &request)?
            .with_end_date(end_date);
        self.initiate(registration_id, sanction)
    }

    pub fn initiate_retraction(
        &self,
        registration_id: &str,
        justification: Option<String>,
        request: SanctionRequest,
    ) -> anyhow::Result<Sanction> {
        let mut sanction = self.draft(SanctionKind::Retraction, &request)?;
        if let Some(justification) = justification {
            sanction = sanction.with_justification(justification);
        }
        self.initiate(registration_id, sanction)
    }

    /// Mints a fresh approve/reject pair for one authorizer of a pending
    /// sanction, e.g. after the emailed links expired.
    pub fn reissue_tokens(&self, sanction_id: &str, user_id: &str) -> anyhow::Result<Sanction> {
        let kind = SanctionKind::from_id(sanction_id)
            .ok_or_else(|| SanctionError::UnsupportedHandlerKind(sanction_id.to_string()))?;
        let approval_token = self
            .codec
            .encode(kind, sanction_id, Action::Approve, user_id)
            .context("failed to mint approval token")?;
        let rejection_token = self
            .codec
            .encode(kind, sanction_id, Action::Reject, user_id)
            .context("failed to mint rejection token")?;

        let sanction = self.store.transaction(|txn| {
            let mut sanction = match txn.get_sanction(sanction_id)? {
                Some(sanction) if sanction.kind == kind => sanction,
                _ => {
                    return abort(SanctionError::SanctionNotFound {
                        kind,
                        sanction_id: sanction_id.to_string(),
                    });
                }
            };
            if let Err(err) =
                sanction.reissue_tokens(user_id, approval_token.clone(), rejection_token.clone())
            {
                return abort(err);
            }
            txn.put_sanction(&sanction)?;
            Ok(sanction)
        })?;

        info!(sanction = sanction_id, kind = %kind, user = user_id, "sanction tokens reissued");
        Ok(sanction)
    }

    /// Builds the sanction and mints one approve and one reject token per
    /// authorizer.
    fn draft(&self, kind: SanctionKind, request: &SanctionRequest) -> anyhow::Result<Sanction> {
        if request.authorizers.is_empty() {
            return Err(ValidationError::NoAuthorizers.into());
        }
        let mut sanction = Sanction::new(
            utils::new_sanction_id(kind)?,
            kind,
            request.initiated_by.clone(),
            request.initiation_date.clone(),
        )
        .with_mode(request.mode);

        for user_id in &request.authorizers {
            let approval_token = self
                .codec
                .encode(kind, &sanction.id, Action::Approve, user_id)
                .context("failed to mint approval token")?;
            let rejection_token = self
                .codec
                .encode(kind, &sanction.id, Action::Reject, user_id)
                .context("failed to mint rejection token")?;
            sanction.add_authorizer(user_id.clone(), approval_token, rejection_token);
        }
        Ok(sanction)
    }

    /// Attach the sanction to its registration, index the back-reference and
    /// log the initiation, atomically.
    fn initiate(&self, registration_id: &str, sanction: Sanction) -> anyhow::Result<Sanction> {
        let kind = sanction.kind;
        self.store
            .transaction(|txn| {
                let Some(mut registration) = txn.get_registration(registration_id)? else {
                    return abort(SanctionError::RegistrationNotFound(
                        registration_id.to_string(),
                    ));
                };
                if registration.is_deleted {
                    return abort(
                        ValidationError::RegistrationDeleted(registration_id.to_string()).into(),
                    );
                }
                if let Some(existing_id) = registration.sanction_id(kind) {
                    let existing = txn.get_sanction(existing_id)?;
                    if existing.is_some_and(|s| s.state != SanctionState::Rejected) {
                        return abort(
                            ValidationError::SanctionExists {
                                kind,
                                registration_id: registration_id.to_string(),
                            }
                            .into(),
                        );
                    }
                }

                registration.set_sanction(kind, sanction.id.clone());
                if kind == SanctionKind::Embargo {
                    registration.is_pending_embargo = true;
                }

                txn.put_sanction(&sanction)?;
                txn.put_registration(&registration)?;
                txn.set_owner(&sanction.id, registration_id)?;
                txn.append_log(&NodeLog::new(
                    &registration,
                    LogAction::initiated(kind),
                    &sanction.id,
                    Some(&sanction.initiated_by),
                ))
            })
            .with_context(|| format!("failed to initiate {kind} for {registration_id}"))?;

        info!(
            sanction = %sanction.id,
            registration = registration_id,
            kind = %kind,
            "sanction initiated"
        );
        Ok(sanction)
    }
}
