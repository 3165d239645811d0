//! End-to-end scenarios: sanctions are initiated through the service, acted on
//! through the router with the emailed tokens, and swept on a schedule.

use std::sync::Arc;

use chrono::{Duration, Utc};
use sanction_workflow::{
    ActionPayload, ActionRequest, HandlerRegistry, SanctionError, SanctionRequest,
    SanctionRouter, SanctionService, Store, Sweeper, TokenCodec,
    node::{LogAction, Registration},
    sanction::Sanction,
    types::{Action, SanctionKind, SanctionState, TimeStamp},
};
use tempfile::tempdir; // Use for test db cleanup.

const BASE_URL: &str = "https://osf.test";

struct Harness {
    _dir: tempfile::TempDir,
    db: Arc<sled::Db>,
    store: Arc<Store>,
    codec: Arc<TokenCodec>,
    registry: HandlerRegistry,
    service: SanctionService,
}

impl Harness {
    // Each test gets its own database under a temp dir, sled locks the file.
    fn new() -> anyhow::Result<Self> {
        let dir = tempdir()?;
        let db = Arc::new(sled::open(dir.path().join("scenario.db"))?);
        let store = Arc::new(Store::new(db.clone())?);
        let codec = Arc::new(TokenCodec::new("scenario-secret", Duration::hours(1)));
        let service = SanctionService::new(store.clone(), codec.clone());
        Ok(Self {
            _dir: dir,
            db,
            store,
            codec,
            registry: HandlerRegistry::with_defaults(),
            service,
        })
    }

    fn router(&self) -> SanctionRouter<'_> {
        SanctionRouter::new(&self.store, &self.registry, &self.codec, BASE_URL)
    }

    fn sweeper(&self) -> Sweeper<'_> {
        Sweeper::new(&self.store, &self.registry, Duration::hours(48))
    }

    fn registration(&self, id: &str) -> Registration {
        self.store.load_registration(id).unwrap().unwrap()
    }

    fn sanction(&self, id: &str) -> Sanction {
        self.store.load_sanction(id).unwrap().unwrap()
    }

    fn log_actions(&self, project_id: &str) -> Vec<LogAction> {
        self.store
            .logs_for(project_id)
            .unwrap()
            .into_iter()
            .map(|log| log.action)
            .collect()
    }
}

fn request(sanction: &Sanction, action: Action, token: &str) -> ActionRequest {
    ActionRequest {
        kind: sanction.kind.as_str().to_string(),
        action: action.as_str().to_string(),
        payload: ActionPayload {
            sanction_id: Some(sanction.id.clone()),
        },
        token: token.to_string(),
    }
}

fn initiate(h: &Harness, kind: SanctionKind, project_id: &str) -> anyhow::Result<(Registration, Sanction)> {
    let registration = h.service.register_project(project_id)?;
    let request = SanctionRequest::new("admin", &["admin"]);
    let sanction = match kind {
        SanctionKind::RegistrationApproval => {
            h.service.request_registration_approval(&registration.id, request)?
        }
        SanctionKind::Embargo => {
            let end_date: TimeStamp<Utc> = (Utc::now() + Duration::days(30)).into();
            h.service.initiate_embargo(&registration.id, end_date, request)?
        }
        SanctionKind::Retraction => h.service.initiate_retraction(
            &registration.id,
            Some("data was fabricated".to_string()),
            request,
        )?,
    };
    Ok((registration, sanction))
}

#[test]
fn embargo_is_activated_then_completed_by_the_sweeper() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let t0 = Utc::now();
    let registration = h.service.register_project("project_a")?;
    let embargo = h.service.initiate_embargo(
        &registration.id,
        (t0 + Duration::days(30)).into(),
        SanctionRequest::new("admin", &["admin"]).initiated_at(t0.into()),
    )?;

    // still inside the pending window
    let report = h.sweeper().run(t0 + Duration::hours(47), false)?;
    assert_eq!(report.approved, 0);
    assert_eq!(h.sanction(&embargo.id).state, SanctionState::Unapproved);

    let report = h.sweeper().run(t0 + Duration::hours(49), false)?;
    assert_eq!(report.approved, 1);
    assert_eq!(h.sanction(&embargo.id).state, SanctionState::Approved);
    assert!(!h.registration(&registration.id).is_pending_embargo);
    assert!(!h.registration(&registration.id).is_public);

    // end date not yet passed
    let report = h.sweeper().run(t0 + Duration::days(30) - Duration::seconds(1), false)?;
    assert_eq!(report.completed, 0);

    let report = h.sweeper().run(t0 + Duration::days(31), false)?;
    assert_eq!(report.completed, 1);
    assert_eq!(h.sanction(&embargo.id).state, SanctionState::Completed);
    assert!(h.registration(&registration.id).is_public);

    assert_eq!(
        h.log_actions("project_a"),
        vec![
            LogAction::EmbargoInitiated,
            LogAction::EmbargoApproved,
            LogAction::EmbargoCompleted
        ]
    );
    // automated transitions carry no actor
    let logs = h.store.logs_for("project_a")?;
    assert_eq!(logs[1].user, None);
    assert_eq!(logs[2].user, None);
    assert_eq!(logs[2].registration_id, registration.id);
    assert_eq!(logs[2].sanction_id, embargo.id);
    Ok(())
}

#[test]
fn deleted_registration_forces_rejection() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let t0 = Utc::now();
    let registration = h.service.register_project("project_b")?;
    let embargo = h.service.initiate_embargo(
        &registration.id,
        (t0 + Duration::days(30)).into(),
        SanctionRequest::new("admin", &["admin"]).initiated_at(t0.into()),
    )?;

    let mut deleted = h.registration(&registration.id);
    deleted.is_deleted = true;
    h.store.insert_registration(&deleted)?;

    let report = h.sweeper().run(t0 + Duration::hours(49), false)?;
    assert_eq!(report.rejected, 1);
    assert_eq!(report.approved, 0);
    assert_eq!(h.sanction(&embargo.id).state, SanctionState::Rejected);
    assert_eq!(h.log_actions("project_b"), vec![LogAction::EmbargoInitiated]);
    Ok(())
}

#[test]
fn active_embargo_on_deleted_registration_is_rejected_not_completed() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let t0 = Utc::now();
    let registration = h.service.register_project("project_c")?;
    let embargo = h.service.initiate_embargo(
        &registration.id,
        (t0 + Duration::days(30)).into(),
        SanctionRequest::new("admin", &["admin"]).initiated_at(t0.into()),
    )?;
    h.sweeper().run(t0 + Duration::hours(49), false)?;

    let mut deleted = h.registration(&registration.id);
    deleted.is_deleted = true;
    h.store.insert_registration(&deleted)?;

    let report = h.sweeper().run(t0 + Duration::days(31), false)?;
    assert_eq!(report.rejected, 1);
    assert_eq!(report.completed, 0);
    assert_eq!(h.sanction(&embargo.id).state, SanctionState::Rejected);
    assert!(!h.registration(&registration.id).is_public);
    Ok(())
}

#[test]
fn dry_run_changes_nothing() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let t0 = Utc::now();
    let registration = h.service.register_project("project_d")?;
    let embargo = h.service.initiate_embargo(
        &registration.id,
        (t0 + Duration::days(30)).into(),
        SanctionRequest::new("admin", &["admin"]).initiated_at(t0.into()),
    )?;

    let dry = h.sweeper().run(t0 + Duration::hours(49), true)?;
    assert_eq!(dry.approved, 1);
    assert_eq!(h.sanction(&embargo.id).state, SanctionState::Unapproved);
    assert!(h.registration(&registration.id).is_pending_embargo);
    assert_eq!(h.log_actions("project_d"), vec![LogAction::EmbargoInitiated]);

    // the real run makes the same decision
    let real = h.sweeper().run(t0 + Duration::hours(49), false)?;
    assert_eq!(real, dry);
    Ok(())
}

#[test]
fn dry_run_leaves_elapsed_embargo_private() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let t0 = Utc::now();
    let registration = h.service.register_project("project_d2")?;
    let embargo = h.service.initiate_embargo(
        &registration.id,
        (t0 + Duration::days(30)).into(),
        SanctionRequest::new("admin", &["admin"]).initiated_at(t0.into()),
    )?;
    h.sweeper().run(t0 + Duration::hours(49), false)?;

    let dry = h.sweeper().run(t0 + Duration::days(31), true)?;
    assert_eq!(dry.completed, 1);
    assert_eq!(h.sanction(&embargo.id).state, SanctionState::Approved);
    assert!(!h.registration(&registration.id).is_public);
    assert_eq!(
        h.log_actions("project_d2"),
        vec![LogAction::EmbargoInitiated, LogAction::EmbargoApproved]
    );

    let real = h.sweeper().run(t0 + Duration::days(31), false)?;
    assert_eq!(real, dry);
    assert!(h.registration(&registration.id).is_public);
    Ok(())
}

#[test]
fn one_failing_item_does_not_stop_the_sweep() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let t0 = Utc::now();
    let mut embargoes = vec![];
    for project in ["project_t", "project_u"] {
        let registration = h.service.register_project(project)?;
        embargoes.push(h.service.initiate_embargo(
            &registration.id,
            (t0 + Duration::days(30)).into(),
            SanctionRequest::new("admin", &["admin"]).initiated_at(t0.into()),
        )?);
    }
    // an undecodable record and an embargo whose owner index went missing
    h.db.open_tree("sanctions")?
        .insert("zzz_corrupt", &b"\xff\xff"[..])?;
    h.db.open_tree("owners")?.remove(embargoes[1].id.as_bytes())?;

    let dry = h.sweeper().run(t0 + Duration::hours(49), true)?;
    let real = h.sweeper().run(t0 + Duration::hours(49), false)?;

    assert_eq!(real.approved, 1);
    assert_eq!(real.failed, 2);
    assert_eq!(dry, real);
    assert_eq!(h.sanction(&embargoes[0].id).state, SanctionState::Approved);
    assert_eq!(h.sanction(&embargoes[1].id).state, SanctionState::Unapproved);
    Ok(())
}

#[test]
fn expired_links_can_be_reissued() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let expired = SanctionService::new(
        h.store.clone(),
        Arc::new(TokenCodec::new("scenario-secret", Duration::hours(-2))),
    );
    let registration = h.service.register_project("project_v")?;
    let retraction = expired.initiate_retraction(
        &registration.id,
        None,
        SanctionRequest::new("admin", &["admin"]),
    )?;
    let stale = retraction.authorizers[0].approval_token.clone();

    let err = h.router().handle_token(&stale, "admin").unwrap_err();
    assert!(matches!(err, SanctionError::InvalidToken(_)));
    // the pending retraction still blocks a new one
    assert!(h
        .service
        .initiate_retraction(&registration.id, None, SanctionRequest::new("admin", &["admin"]))
        .is_err());

    let refreshed = h.service.reissue_tokens(&retraction.id, "admin")?;
    assert!(h.service.reissue_tokens(&retraction.id, "someone_else").is_err());
    let fresh = &refreshed.authorizers[0].approval_token;
    assert_ne!(fresh, &stale);

    h.router().handle_token(fresh, "admin")?;
    assert_eq!(h.sanction(&retraction.id).state, SanctionState::Approved);
    assert!(h.registration(&registration.id).is_retracted);

    // nothing to refresh once resolved
    let err = h.service.reissue_tokens(&retraction.id, "admin").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SanctionError>(),
        Some(SanctionError::AlreadyResolved { .. })
    ));
    Ok(())
}

#[test]
fn approved_retraction_rejects_pending_embargo() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let t0 = Utc::now();
    let registration = h.service.register_project("project_w")?;
    let embargo = h.service.initiate_embargo(
        &registration.id,
        (t0 + Duration::days(30)).into(),
        SanctionRequest::new("admin", &["admin"]).initiated_at(t0.into()),
    )?;
    let retraction = h.service.initiate_retraction(
        &registration.id,
        None,
        SanctionRequest::new("admin", &["admin"]).initiated_at(t0.into()),
    )?;

    h.router()
        .handle_token(&retraction.authorizers[0].approval_token, "admin")?;
    assert_eq!(h.sanction(&embargo.id).state, SanctionState::Rejected);

    let report = h.sweeper().run(t0 + Duration::hours(49), false)?;
    assert_eq!(report.approved, 0);
    assert_eq!(
        h.log_actions("project_w"),
        vec![
            LogAction::EmbargoInitiated,
            LogAction::RetractionInitiated,
            LogAction::RetractionApproved
        ]
    );
    Ok(())
}

#[test]
fn retractions_wait_for_explicit_approval() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let (_, retraction) = initiate(&h, SanctionKind::Retraction, "project_e")?;

    let report = h.sweeper().run(Utc::now() + Duration::days(10), false)?;
    assert_eq!(report.approved, 0);
    assert_eq!(h.sanction(&retraction.id).state, SanctionState::Unapproved);
    Ok(())
}

#[test]
fn approve_redirects_per_kind() -> anyhow::Result<()> {
    let h = Harness::new()?;

    for (kind, project, lands_on_registration) in [
        (SanctionKind::RegistrationApproval, "project_f", true),
        (SanctionKind::Embargo, "project_g", true),
        (SanctionKind::Retraction, "project_h", false),
    ] {
        let (registration, sanction) = initiate(&h, kind, project)?;
        let token = &sanction.authorizers[0].approval_token;

        let redirect = h.router().handle_request(&request(&sanction, Action::Approve, token), "admin")?;

        let expected = if lands_on_registration {
            format!("{BASE_URL}/{}/", registration.id)
        } else {
            format!("{BASE_URL}/{project}/")
        };
        assert_eq!(redirect.location, expected);
        assert_eq!(h.sanction(&sanction.id).state, SanctionState::Approved);
        assert_eq!(
            h.log_actions(project).last().copied(),
            Some(LogAction::resolved(kind, Action::Approve))
        );
    }
    Ok(())
}

#[test]
fn reject_redirects_per_kind() -> anyhow::Result<()> {
    let h = Harness::new()?;

    for (kind, project, lands_on_registration) in [
        (SanctionKind::RegistrationApproval, "project_i", false),
        (SanctionKind::Embargo, "project_j", false),
        (SanctionKind::Retraction, "project_k", true),
    ] {
        let (registration, sanction) = initiate(&h, kind, project)?;
        let token = &sanction.authorizers[0].rejection_token;

        let redirect = h.router().handle_token(token, "admin")?;

        let expected = if lands_on_registration {
            format!("{BASE_URL}/{}/", registration.id)
        } else {
            format!("{BASE_URL}/{project}/")
        };
        assert_eq!(redirect.location, expected);
        assert!(redirect.message.text.starts_with("Your disapproval has been accepted"));
        assert_eq!(h.sanction(&sanction.id).state, SanctionState::Rejected);
        let logs = h.store.logs_for(project)?;
        assert_eq!(logs.last().map(|l| l.action), Some(LogAction::resolved(kind, Action::Reject)));
        assert_eq!(logs.last().and_then(|l| l.user.as_deref()), Some("admin"));
    }
    Ok(())
}

#[test]
fn replayed_tokens_fail_with_the_kind_specific_status() -> anyhow::Result<()> {
    let h = Harness::new()?;

    // (kind, first action, second action, expected status)
    let cases = [
        (SanctionKind::RegistrationApproval, Action::Approve, Action::Approve, 400),
        (SanctionKind::RegistrationApproval, Action::Reject, Action::Approve, 410),
        (SanctionKind::Embargo, Action::Approve, Action::Reject, 400),
        (SanctionKind::Embargo, Action::Reject, Action::Reject, 410),
        (SanctionKind::Retraction, Action::Approve, Action::Approve, 410),
        (SanctionKind::Retraction, Action::Reject, Action::Approve, 400),
    ];

    for (i, (kind, first, second, status)) in cases.into_iter().enumerate() {
        let project = format!("project_replay_{i}");
        let (_, sanction) = initiate(&h, kind, &project)?;
        let token_for = |action: Action| match action {
            Action::Approve => sanction.authorizers[0].approval_token.clone(),
            Action::Reject => sanction.authorizers[0].rejection_token.clone(),
        };

        h.router().handle_token(&token_for(first), "admin")?;
        let state = h.sanction(&sanction.id).state;
        let logs_before = h.store.logs_for(&project)?.len();

        let err = h.router().handle_token(&token_for(second), "admin").unwrap_err();
        assert!(matches!(err, SanctionError::AlreadyResolved { .. }), "{kind} {first} {second}");
        assert_eq!(err.status_code(), status, "{kind} {first} then {second}");
        assert_eq!(h.sanction(&sanction.id).state, state);
        assert_eq!(h.store.logs_for(&project)?.len(), logs_before);
    }
    Ok(())
}

#[test]
fn garbled_token_fails_before_lookup() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let (_, sanction) = initiate(&h, SanctionKind::Embargo, "project_l")?;

    let mut garbled = sanction.authorizers[0].approval_token.clone();
    garbled.insert_str(garbled.len() / 2, "xx");
    let err = h
        .router()
        .handle_request(&request(&sanction, Action::Approve, &garbled), "admin")
        .unwrap_err();
    assert!(matches!(err, SanctionError::InvalidToken(_)));

    // a sanction that does not exist still reports the bad token, not the lookup
    let mut missing = request(&sanction, Action::Approve, "garbage");
    missing.payload.sanction_id = Some("embargo_missing".to_string());
    let err = h.router().handle_request(&missing, "admin").unwrap_err();
    assert!(matches!(err, SanctionError::InvalidToken(_)));

    assert_eq!(h.sanction(&sanction.id).state, SanctionState::Unapproved);
    Ok(())
}

#[test]
fn token_for_another_action_is_refused() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let (_, sanction) = initiate(&h, SanctionKind::Embargo, "project_m")?;

    // the request asks to approve with a rejection token
    let token = &sanction.authorizers[0].rejection_token;
    let err = h
        .router()
        .handle_request(&request(&sanction, Action::Approve, token), "admin")
        .unwrap_err();
    assert!(matches!(err, SanctionError::InvalidToken(_)));

    // bypassing the claim check, the sanction itself refuses the token
    let payload = ActionPayload {
        sanction_id: Some(sanction.id.clone()),
    };
    let err = h
        .router()
        .handle(SanctionKind::Embargo, Action::Approve, &payload, token, "admin")
        .unwrap_err();
    assert!(matches!(err, SanctionError::Token { .. }));
    assert_eq!(err.status_code(), 400);
    assert_eq!(h.sanction(&sanction.id).state, SanctionState::Unapproved);
    Ok(())
}

#[test]
fn strangers_are_unauthorized() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let (_, sanction) = initiate(&h, SanctionKind::RegistrationApproval, "project_n")?;

    let token = &sanction.authorizers[0].approval_token;
    let err = h.router().handle_token(token, "someone_else").unwrap_err();
    assert!(matches!(err, SanctionError::Permissions { .. }));
    assert_eq!(err.status_code(), 401);
    assert_eq!(h.log_actions("project_n"), vec![LogAction::RegistrationApprovalInitiated]);
    Ok(())
}

#[test]
fn missing_sanction_is_not_found() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let token = h
        .codec
        .encode(SanctionKind::Embargo, "embargo_missing", Action::Approve, "admin")?;

    let err = h.router().handle_token(&token, "admin").unwrap_err();
    assert!(matches!(err, SanctionError::SanctionNotFound { .. }));
    assert_eq!(err.status_code(), 404);

    let err = h
        .router()
        .handle(SanctionKind::Embargo, Action::Approve, &ActionPayload::default(), &token, "admin")
        .unwrap_err();
    assert!(matches!(err, SanctionError::SanctionNotFound { .. }));
    Ok(())
}

#[test]
fn unsupported_kind_is_reported() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let (_, sanction) = initiate(&h, SanctionKind::Embargo, "project_o")?;
    let token = sanction.authorizers[0].approval_token.clone();

    let mut bad = request(&sanction, Action::Approve, &token);
    bad.kind = "node".to_string();
    let err = h.router().handle_request(&bad, "admin").unwrap_err();
    assert!(matches!(err, SanctionError::UnsupportedHandlerKind(_)));

    let empty = HandlerRegistry::empty();
    let router = SanctionRouter::new(&h.store, &empty, &h.codec, BASE_URL);
    let err = router.handle_token(&token, "admin").unwrap_err();
    assert!(matches!(err, SanctionError::UnsupportedHandlerKind(_)));
    Ok(())
}

#[test]
fn concurrent_approvals_take_effect_once() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let (_, sanction) = initiate(&h, SanctionKind::Embargo, "project_p")?;
    let token = sanction.authorizers[0].approval_token.clone();

    let results: Vec<Result<_, SanctionError>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| h.router().handle_token(&token, "admin")))
            .collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|err| matches!(err, SanctionError::AlreadyResolved { .. })));
    assert_eq!(
        h.log_actions("project_p"),
        vec![LogAction::EmbargoInitiated, LogAction::EmbargoApproved]
    );
    Ok(())
}

#[test]
fn recent_public_registrations_skip_withdrawn_and_embargoed() -> anyhow::Result<()> {
    let h = Harness::new()?;

    let (public, approval) = initiate(&h, SanctionKind::RegistrationApproval, "project_q")?;
    h.router()
        .handle_token(&approval.authorizers[0].approval_token, "admin")?;

    let (retracted, retraction) = initiate(&h, SanctionKind::Retraction, "project_r")?;
    h.router()
        .handle_token(&retraction.authorizers[0].approval_token, "admin")?;

    let (embargoed, _) = initiate(&h, SanctionKind::Embargo, "project_s")?;

    let listed: Vec<String> = h
        .store
        .recent_public_registrations(10)?
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(listed, vec![public.id]);
    assert!(!listed.contains(&retracted.id));
    assert!(!listed.contains(&embargoed.id));
    Ok(())
}
