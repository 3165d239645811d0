//! Per-kind sanction handlers and the registry the router and sweeper share
use std::collections::HashMap;

use crate::error::SanctionError;
use crate::node::{LogAction, Registration};
use crate::sanction::{Sanction, Transition};
use crate::types::{Action, RedirectTarget, SanctionKind};

pub trait SanctionHandler: Send + Sync {
    fn kind(&self) -> SanctionKind;

    /// Flash message shown after a successful action.
    fn status_message(&self, action: Action) -> &'static str;

    /// Registration side effects once the sanction is approved.
    fn on_approved(&self, registration: &mut Registration);

    /// Registration side effects once the sanction is rejected.
    fn on_rejected(&self, registration: &mut Registration);

    fn approve(
        &self,
        sanction: &mut Sanction,
        registration: &mut Registration,
        user_id: &str,
        token: &str,
    ) -> Result<Transition, SanctionError> {
        let transition = sanction.approve(user_id, token)?;
        if transition == Transition::Approved {
            self.on_approved(registration);
        }
        Ok(transition)
    }

    fn reject(
        &self,
        sanction: &mut Sanction,
        registration: &mut Registration,
        user_id: &str,
        token: &str,
    ) -> Result<Transition, SanctionError> {
        let transition = sanction.reject(user_id, token)?;
        self.on_rejected(registration);
        Ok(transition)
    }

    /// Kind of sibling sanction that an approval of this kind cancels.
    fn supersedes(&self) -> Option<SanctionKind> {
        None
    }

    fn log_action(&self, action: Action) -> LogAction {
        LogAction::resolved(self.kind(), action)
    }

    fn redirect_target(&self, action: Action) -> RedirectTarget {
        self.kind().redirect_target(action)
    }
}

pub struct RegistrationApprovalHandler;
pub struct EmbargoHandler;
pub struct RetractionHandler;

impl SanctionHandler for RegistrationApprovalHandler {
    fn kind(&self) -> SanctionKind {
        SanctionKind::RegistrationApproval
    }

    fn status_message(&self, action: Action) -> &'static str {
        match action {
            Action::Approve => "Your registration approval has been accepted.",
            Action::Reject => {
                "Your disapproval has been accepted and the registration has been cancelled."
            }
        }
    }

    fn on_approved(&self, registration: &mut Registration) {
        // an embargo keeps the registration private until it completes
        if registration.embargo.is_none() {
            registration.is_public = true;
        }
    }

    fn on_rejected(&self, registration: &mut Registration) {
        registration.is_deleted = true;
    }
}

impl SanctionHandler for EmbargoHandler {
    fn kind(&self) -> SanctionKind {
        SanctionKind::Embargo
    }

    fn status_message(&self, action: Action) -> &'static str {
        match action {
            Action::Approve => "Your embargo approval has been accepted.",
            Action::Reject => {
                "Your disapproval has been accepted and the embargo has been cancelled."
            }
        }
    }

    fn on_approved(&self, registration: &mut Registration) {
        registration.is_pending_embargo = false;
    }

    fn on_rejected(&self, registration: &mut Registration) {
        registration.is_pending_embargo = false;
        registration.is_deleted = true;
    }
}

impl SanctionHandler for RetractionHandler {
    fn kind(&self) -> SanctionKind {
        SanctionKind::Retraction
    }

    fn status_message(&self, action: Action) -> &'static str {
        match action {
            Action::Approve => "Your retraction approval has been accepted.",
            Action::Reject => {
                "Your disapproval has been accepted and the retraction has been cancelled."
            }
        }
    }

    fn on_approved(&self, registration: &mut Registration) {
        registration.is_retracted = true;
        registration.is_pending_embargo = false;
        registration.is_public = true;
    }

    fn on_rejected(&self, _registration: &mut Registration) {}

    // a withdrawn registration no longer waits on its embargo
    fn supersedes(&self) -> Option<SanctionKind> {
        Some(SanctionKind::Embargo)
    }
}

/// Kind -> handler table, built once at startup.
pub struct HandlerRegistry {
    handlers: HashMap<SanctionKind, Box<dyn SanctionHandler>>,
}

impl HandlerRegistry {
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(RegistrationApprovalHandler));
        registry.register(Box::new(EmbargoHandler));
        registry.register(Box::new(RetractionHandler));
        registry
    }

    pub fn register(&mut self, handler: Box<dyn SanctionHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    pub fn get(&self, kind: SanctionKind) -> Result<&dyn SanctionHandler, SanctionError> {
        self.handlers
            .get(&kind)
            .map(|handler| handler.as_ref())
            .ok_or_else(|| SanctionError::UnsupportedHandlerKind(kind.to_string()))
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
