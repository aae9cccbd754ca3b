mod common;

use anyhow::Result;
use chrono::{Duration, Utc};
use common::TestApp;
use uuid::Uuid;

use signflow::authenticator::SubmittedProof;
use signflow::error::{CoreError, StateConflict, VerificationFailure};
use signflow::models::SIGNER_VERIFIED;
use signflow::verification;
use signflow::workflow;

async fn validate(app: &TestApp, signer_id: Uuid, code: &str) -> Result<Result<(), CoreError>> {
    let config = app.state.config.clone();
    let code = code.to_string();
    app.with_conn(move |conn| {
        Ok(verification::validate_code(conn, &config, signer_id, &code))
    })
    .await
}

#[tokio::test]
async fn email_code_round_trip() -> Result<()> {
    let _lock = common::acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let document_id = app
        .insert_document(Uuid::new_v4(), "parallel", "automatic", None)
        .await?;
    let signer_id = app
        .insert_signer(document_id, "Ana", "email", "signer", 0, None)
        .await?;
    workflow::send_document(&app.state, document_id).await?;

    verification::request_verification(&app.state, signer_id).await?;

    let (destination, code) = {
        let notifier = app.notifier();
        let sent = notifier.sent_codes.lock().await;
        sent.last().cloned().expect("a code was delivered")
    };
    assert_eq!(destination, "ana@example.com");
    assert_eq!(code.len(), 6);
    assert!(code.chars().all(|c| c.is_ascii_digit()));

    validate(&app, signer_id, &code).await??;

    let signer = app.load_signer(signer_id).await?;
    assert!(signer.verified_at.is_some());
    assert_eq!(signer.status, SIGNER_VERIFIED);
    // Single use: the accepted code is gone.
    assert!(signer.verification_code.is_none());
    assert!(signer.verification_expires_at.is_none());

    // Re-validation after success is a no-op, not a failure.
    validate(&app, signer_id, "000000").await??;

    Ok(())
}

#[tokio::test]
async fn wrong_guesses_exhaust_the_code() -> Result<()> {
    let _lock = common::acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let document_id = app
        .insert_document(Uuid::new_v4(), "parallel", "automatic", None)
        .await?;
    let signer_id = app
        .insert_signer(document_id, "Bia", "email", "signer", 0, None)
        .await?;
    workflow::send_document(&app.state, document_id).await?;
    verification::request_verification(&app.state, signer_id).await?;
    let code = {
        let notifier = app.notifier();
        let sent = notifier.sent_codes.lock().await;
        sent.last().cloned().expect("a code was delivered").1
    };
    let wrong = if code == "000000" { "111111" } else { "000000" };

    for attempt in 1..=5 {
        let outcome = validate(&app, signer_id, wrong).await?;
        assert!(matches!(
            outcome,
            Err(CoreError::Verification(VerificationFailure::Mismatch))
        ));
        assert_eq!(
            app.load_signer(signer_id).await?.verification_attempts,
            attempt
        );
    }

    // Even the correct code is refused once attempts are spent, and the
    // counter stops moving.
    let outcome = validate(&app, signer_id, &code).await?;
    assert!(matches!(
        outcome,
        Err(CoreError::Verification(VerificationFailure::Exhausted))
    ));
    let signer = app.load_signer(signer_id).await?;
    assert_eq!(signer.verification_attempts, 5);
    assert!(signer.verified_at.is_none());

    Ok(())
}

#[tokio::test]
async fn reissuing_resets_the_attempt_counter() -> Result<()> {
    let _lock = common::acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let document_id = app
        .insert_document(Uuid::new_v4(), "parallel", "automatic", None)
        .await?;
    let signer_id = app
        .insert_signer(document_id, "Caio", "email", "signer", 0, None)
        .await?;
    workflow::send_document(&app.state, document_id).await?;
    verification::request_verification(&app.state, signer_id).await?;

    validate(&app, signer_id, "999999").await?.ok();
    validate(&app, signer_id, "999998").await?.ok();
    assert_eq!(app.load_signer(signer_id).await?.verification_attempts, 2);

    verification::request_verification(&app.state, signer_id).await?;
    assert_eq!(app.load_signer(signer_id).await?.verification_attempts, 0);

    let code = {
        let notifier = app.notifier();
        let sent = notifier.sent_codes.lock().await;
        sent.last().cloned().expect("a code was delivered").1
    };
    validate(&app, signer_id, &code).await??;
    assert!(app.load_signer(signer_id).await?.verified_at.is_some());

    Ok(())
}

#[tokio::test]
async fn expired_codes_are_refused_without_burning_attempts() -> Result<()> {
    let _lock = common::acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let document_id = app
        .insert_document(Uuid::new_v4(), "parallel", "automatic", None)
        .await?;
    let signer_id = app
        .insert_signer(document_id, "Davi", "email", "signer", 0, None)
        .await?;
    workflow::send_document(&app.state, document_id).await?;
    verification::request_verification(&app.state, signer_id).await?;
    let code = {
        let notifier = app.notifier();
        let sent = notifier.sent_codes.lock().await;
        sent.last().cloned().expect("a code was delivered").1
    };

    app.with_conn(move |conn| {
        use diesel::prelude::*;
        diesel::update(signflow::schema::signers::table.find(signer_id))
            .set(
                signflow::schema::signers::verification_expires_at
                    .eq(Some(Utc::now().naive_utc() - Duration::minutes(1))),
            )
            .execute(conn)?;
        Ok(())
    })
    .await?;

    let outcome = validate(&app, signer_id, &code).await?;
    assert!(matches!(
        outcome,
        Err(CoreError::Verification(VerificationFailure::Expired))
    ));
    assert_eq!(app.load_signer(signer_id).await?.verification_attempts, 0);

    Ok(())
}

#[tokio::test]
async fn validating_without_a_code_is_rejected() -> Result<()> {
    let _lock = common::acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let document_id = app
        .insert_document(Uuid::new_v4(), "parallel", "automatic", None)
        .await?;
    let signer_id = app
        .insert_signer(document_id, "Elen", "email", "signer", 0, None)
        .await?;
    workflow::send_document(&app.state, document_id).await?;

    let outcome = validate(&app, signer_id, "123456").await?;
    assert!(matches!(
        outcome,
        Err(CoreError::Verification(VerificationFailure::NoActiveCode))
    ));

    Ok(())
}

#[tokio::test]
async fn expired_documents_never_gain_a_verification() -> Result<()> {
    let _lock = common::acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let document_id = app
        .insert_document(Uuid::new_v4(), "parallel", "automatic", None)
        .await?;
    let signer_id = app
        .insert_signer(document_id, "Juno", "email", "signer", 0, None)
        .await?;
    workflow::send_document(&app.state, document_id).await?;
    verification::request_verification(&app.state, signer_id).await?;
    let code = {
        let notifier = app.notifier();
        let sent = notifier.sent_codes.lock().await;
        sent.last().cloned().expect("a code was delivered").1
    };

    // Deadline passes while the signer is holding a valid code.
    app.with_conn(move |conn| {
        use diesel::prelude::*;
        diesel::update(signflow::schema::documents::table.find(document_id))
            .set(
                signflow::schema::documents::expires_at
                    .eq(Some(Utc::now().naive_utc() - Duration::minutes(1))),
            )
            .execute(conn)?;
        Ok(())
    })
    .await?;

    let config = app.state.config.clone();
    let outcome = app
        .with_conn(move |conn| {
            Ok(workflow::authenticate_signer(
                conn,
                &config,
                document_id,
                signer_id,
                &SubmittedProof::Code(code),
            ))
        })
        .await?;
    assert!(matches!(
        outcome,
        Err(CoreError::StateConflict(StateConflict::Expired))
    ));

    // The expiry transition committed; the correct code bought nothing and
    // was not even counted as an attempt.
    assert_eq!(
        app.load_document(document_id).await?.status,
        signflow::models::DOCUMENT_EXPIRED
    );
    let signer = app.load_signer(signer_id).await?;
    assert!(signer.verified_at.is_none());
    assert_eq!(signer.verification_attempts, 0);

    Ok(())
}

#[tokio::test]
async fn cpf_match_distinguishes_format_errors_from_mismatches() -> Result<()> {
    let _lock = common::acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let document_id = app
        .insert_document(Uuid::new_v4(), "parallel", "automatic", None)
        .await?;
    let signer_id = app
        .insert_signer(
            document_id,
            "Fabi",
            "cpf",
            "signer",
            0,
            Some("529.982.247-25"),
        )
        .await?;
    workflow::send_document(&app.state, document_id).await?;

    let config = app.state.config.clone();
    let attempt = |proof: SubmittedProof| {
        let config = config.clone();
        let app = &app;
        async move {
            app.with_conn(move |conn| {
                Ok(workflow::authenticate_signer(
                    conn, &config, document_id, signer_id, &proof,
                ))
            })
            .await
        }
    };

    // Malformed input is a validation error.
    let outcome = attempt(SubmittedProof::Cpf("123".into())).await?;
    assert!(matches!(outcome, Err(CoreError::Validation(_))));

    // A well-formed CPF belonging to someone else is a mismatch.
    let outcome = attempt(SubmittedProof::Cpf("168.995.350-09".into())).await?;
    assert!(matches!(
        outcome,
        Err(CoreError::Verification(VerificationFailure::Mismatch))
    ));

    // Punctuation variants of the registered CPF compare equal.
    attempt(SubmittedProof::Cpf("52998224725".into())).await??;
    assert!(app.load_signer(signer_id).await?.verified_at.is_some());

    Ok(())
}

#[tokio::test]
async fn no_auth_signers_verify_immediately() -> Result<()> {
    let _lock = common::acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let document_id = app
        .insert_document(Uuid::new_v4(), "parallel", "automatic", None)
        .await?;
    let signer_id = app
        .insert_signer(document_id, "Gui", "none", "signer", 0, None)
        .await?;
    workflow::send_document(&app.state, document_id).await?;

    let config = app.state.config.clone();
    app.with_conn(move |conn| {
        workflow::authenticate_signer(conn, &config, document_id, signer_id, &SubmittedProof::None)
            .map_err(Into::into)
    })
    .await?;
    assert!(app.load_signer(signer_id).await?.verified_at.is_some());

    Ok(())
}

#[tokio::test]
async fn sequential_mode_gates_authentication_order() -> Result<()> {
    let _lock = common::acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let document_id = app
        .insert_document(Uuid::new_v4(), "sequential", "automatic", None)
        .await?;
    app.insert_signer(document_id, "Hana", "none", "signer", 0, None)
        .await?;
    let second = app
        .insert_signer(document_id, "Ivo", "none", "signer", 1, None)
        .await?;
    workflow::send_document(&app.state, document_id).await?;

    let config = app.state.config.clone();
    let outcome = app
        .with_conn(move |conn| {
            Ok(workflow::authenticate_signer(
                conn,
                &config,
                document_id,
                second,
                &SubmittedProof::None,
            ))
        })
        .await?;
    assert!(matches!(
        outcome,
        Err(CoreError::StateConflict(StateConflict::OutOfOrder))
    ));

    Ok(())
}
