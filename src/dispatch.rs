//! Routes emailed approve/reject links to the sanction they act on.
//!
//! The router decodes the token, loads the sanction and its registration,
//! checks the preconditions and runs the transition inside one transaction,
//! then maps the outcome to a redirect and a flash message. Preconditions are
//! evaluated inside the transaction so a duplicate or concurrent submission
//! sees the committed state and fails with `AlreadyResolved`.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::codec::TokenCodec;
use crate::error::SanctionError;
use crate::handler::{HandlerRegistry, SanctionHandler};
use crate::node::{NodeLog, Registration};
use crate::sanction::Transition;
use crate::store::{Store, StoreTxn, TxResult, abort};
use crate::types::{Action, RedirectTarget, SanctionKind};

/// Body of the action endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionRequest {
    pub kind: String,
    pub action: String,
    #[serde(default)]
    pub payload: ActionPayload,
    pub token: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionPayload {
    pub sanction_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Success,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusMessage {
    pub text: &'static str,
    pub kind: MessageKind,
    pub trust: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Redirect {
    pub location: String,
    pub message: StatusMessage,
}

pub struct SanctionRouter<'a> {
    store: &'a Store,
    registry: &'a HandlerRegistry,
    codec: &'a TokenCodec,
    base_url: String,
}

impl<'a> SanctionRouter<'a> {
    pub fn new(
        store: &'a Store,
        registry: &'a HandlerRegistry,
        codec: &'a TokenCodec,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            registry,
            codec,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Entry point of the action endpoint. The token is decoded before
    /// anything is loaded, and must name the same kind, action and sanction
    /// as the request.
    pub fn handle_request(
        &self,
        request: &ActionRequest,
        user_id: &str,
    ) -> Result<Redirect, SanctionError> {
        let claims = self.codec.decode(&request.token)?;
        let kind: SanctionKind = request.kind.parse()?;
        let action: Action = request.action.parse()?;

        if claims.kind != kind
            || claims.action != action
            || request.payload.sanction_id.as_deref() != Some(claims.sanction_id.as_str())
        {
            return Err(SanctionError::InvalidToken(
                "token does not match the requested action".to_string(),
            ));
        }
        self.handle(kind, action, &request.payload, &request.token, user_id)
    }

    /// Acts on a token alone, taking kind, action and sanction from its claims.
    pub fn handle_token(&self, token: &str, user_id: &str) -> Result<Redirect, SanctionError> {
        let claims = self.codec.decode(token)?;
        let payload = ActionPayload {
            sanction_id: Some(claims.sanction_id),
        };
        self.handle(claims.kind, claims.action, &payload, token, user_id)
    }

    pub fn handle(
        &self,
        kind: SanctionKind,
        action: Action,
        payload: &ActionPayload,
        token: &str,
        user_id: &str,
    ) -> Result<Redirect, SanctionError> {
        let handler = self.registry.get(kind)?;
        let not_found = || SanctionError::SanctionNotFound {
            kind,
            sanction_id: payload.sanction_id.clone().unwrap_or_default(),
        };
        let Some(sanction_id) = payload.sanction_id.as_deref() else {
            return Err(not_found());
        };

        let result = self.store.transaction(|txn| {
            let mut sanction = match txn.get_sanction(sanction_id)? {
                Some(sanction) if sanction.kind == kind => sanction,
                _ => return abort(not_found()),
            };
            if let Err(err) = sanction.ensure_pending() {
                return abort(err);
            }
            let Some(mut registration) = txn.owner_of(sanction_id)? else {
                return abort(SanctionError::RegistrationNotFound(format!(
                    "owner of {sanction_id}"
                )));
            };

            let transition = match action {
                Action::Approve => {
                    handler.approve(&mut sanction, &mut registration, user_id, token)
                }
                Action::Reject => handler.reject(&mut sanction, &mut registration, user_id, token),
            };
            let transition = match transition {
                Ok(transition) => transition,
                Err(err) => return abort(err),
            };

            txn.put_sanction(&sanction)?;
            if transition == Transition::Approved {
                reject_superseded(txn, handler, &registration)?;
            }
            if transition.changes_state() {
                txn.put_registration(&registration)?;
                txn.append_log(&NodeLog::new(
                    &registration,
                    handler.log_action(action),
                    &sanction.id,
                    Some(user_id),
                ))?;
            }
            Ok((registration, transition))
        });

        let (registration, transition) = match result {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(
                    sanction = sanction_id,
                    kind = %kind,
                    action = %action,
                    user = user_id,
                    status = err.status_code(),
                    error = %err,
                    "sanction action refused"
                );
                return Err(err);
            }
        };

        info!(
            sanction = sanction_id,
            kind = %kind,
            action = %action,
            user = user_id,
            transition = ?transition,
            "sanction action accepted"
        );

        let node_id = match handler.redirect_target(action) {
            RedirectTarget::Registration => &registration.id,
            RedirectTarget::OriginalProject => &registration.registered_from,
        };
        Ok(Redirect {
            location: format!("{}/{}/", self.base_url, node_id),
            message: StatusMessage {
                text: handler.status_message(action),
                kind: MessageKind::Success,
                trust: false,
            },
        })
    }
}

/// Forcibly rejects the open sibling sanction that an approval cancels, such
/// as the embargo of a registration whose retraction was just approved.
fn reject_superseded(
    txn: &StoreTxn<'_>,
    handler: &dyn SanctionHandler,
    registration: &Registration,
) -> TxResult<()> {
    let Some(kind) = handler.supersedes() else {
        return Ok(());
    };
    let Some(sibling_id) = registration.sanction_id(kind) else {
        return Ok(());
    };
    let Some(mut sibling) = txn.get_sanction(sibling_id)? else {
        return Ok(());
    };
    if sibling.state.is_terminal() {
        return Ok(());
    }
    if let Err(err) = sibling.forcibly_reject() {
        return abort(err);
    }
    txn.put_sanction(&sibling)?;
    Ok(())
}
