//! Account binding: capacity, idempotency, expiry, per-account blocks, runtime checks

#[path = "../common/mod.rs"]
mod common;

use common::*;

fn connected(conn: &rusqlite::Connection, license_id: &str) -> u32 {
    queries::count_active_bindings(conn, license_id).unwrap()
}

#[test]
fn test_capacity_limit_with_unbind_and_rebind() {
    let mut conn = setup_test_db();
    let owner = customer("owner-1");
    let (_, license) = setup_license(&conn, "owner-1", 3, NOW);

    for account in [111, 222, 333] {
        let outcome = bind(&mut conn, &owner, &license.id, account, NOW).unwrap();
        assert!(matches!(outcome, BindOutcome::Created(_)), "got {:?}", outcome);
    }
    assert_eq!(connected(&conn, &license.id), 3);

    let result = bind(&mut conn, &owner, &license.id, 444, NOW);
    assert!(
        matches!(result, Err(AppError::CapacityExceeded { current: 3, limit: 3 })),
        "fourth account should exceed capacity, got {:?}",
        result
    );

    engine::unbind_account(&mut conn, &owner, &license.id, 222, NOW).unwrap();
    assert_eq!(connected(&conn, &license.id), 2);

    let outcome = bind(&mut conn, &owner, &license.id, 444, NOW).unwrap();
    assert_eq!(outcome.binding().account_id, 444);
    assert_eq!(connected(&conn, &license.id), 3);
}

#[test]
fn test_expired_license_refuses_binds_until_extended() {
    let mut conn = setup_test_db();
    let owner = customer("owner-1");
    let product = create_test_product(&conn, "Grid Master", None, Some(1));
    let license = insert_license(
        &conn,
        "owner-1",
        &product,
        Some(NOW - ONE_DAY),
        Capacity::limited(3),
        NOW - ONE_MONTH,
    );

    assert_eq!(license.status, LicenseStatus::Active, "persisted status is still active");
    assert_eq!(engine::derive_status(&license, NOW), LicenseStatus::Expired);

    let result = bind(&mut conn, &owner, &license.id, 111, NOW);
    assert!(
        matches!(result, Err(AppError::LicenseNotActive { status: LicenseStatus::Expired })),
        "got {:?}",
        result
    );

    let extended =
        engine::extend_expiry(&mut conn, &admin(), &license.id, NOW + 7 * ONE_DAY, NOW).unwrap();
    assert_eq!(engine::derive_status(&extended, NOW), LicenseStatus::Active);

    bind(&mut conn, &owner, &license.id, 111, NOW).expect("bind should succeed after extension");
}

#[test]
fn test_bind_twice_returns_existing_binding() {
    let mut conn = setup_test_db();
    let owner = customer("owner-1");
    let (_, license) = setup_license(&conn, "owner-1", 1, NOW);

    let first = bind(&mut conn, &owner, &license.id, 111, NOW).unwrap();
    let second = bind(&mut conn, &owner, &license.id, 111, NOW + 60).unwrap();

    assert!(matches!(second, BindOutcome::Existing(_)), "got {:?}", second);
    assert_eq!(first.binding(), second.binding());
    assert_eq!(connected(&conn, &license.id), 1, "rebinding does not take a second slot");
}

#[test]
fn test_unlimited_capacity_accepts_many_accounts() {
    let mut conn = setup_test_db();
    let owner = customer("owner-1");
    let product = create_test_product(&conn, "Grid Master", None, None);
    let license = insert_license(&conn, "owner-1", &product, None, Capacity::Unlimited, NOW);

    for account in 1..=25 {
        bind(&mut conn, &owner, &license.id, account, NOW).unwrap();
    }
    assert_eq!(connected(&conn, &license.id), 25);
}

#[test]
fn test_unbind_absent_binding_succeeds() {
    let mut conn = setup_test_db();
    let owner = customer("owner-1");
    let (_, license) = setup_license(&conn, "owner-1", 3, NOW);

    engine::unbind_account(&mut conn, &owner, &license.id, 999, NOW).unwrap();
    bind(&mut conn, &owner, &license.id, 111, NOW).unwrap();
    engine::unbind_account(&mut conn, &owner, &license.id, 111, NOW).unwrap();
    engine::unbind_account(&mut conn, &owner, &license.id, 111, NOW).unwrap();

    assert_eq!(connected(&conn, &license.id), 0);
}

#[test]
fn test_unbind_works_on_expired_license() {
    let mut conn = setup_test_db();
    let owner = customer("owner-1");
    let (_, license) = setup_license(&conn, "owner-1", 3, NOW);
    bind(&mut conn, &owner, &license.id, 111, NOW).unwrap();

    let later = NOW + 2 * ONE_MONTH;
    engine::unbind_account(&mut conn, &owner, &license.id, 111, later).unwrap();
    assert!(queries::get_binding(&conn, &license.id, 111).unwrap().is_none());
}

#[test]
fn test_invalid_account_ids_are_rejected() {
    let mut conn = setup_test_db();
    let owner = customer("owner-1");
    let (_, license) = setup_license(&conn, "owner-1", 3, NOW);

    for account in [0, -5] {
        let result = bind(&mut conn, &owner, &license.id, account, NOW);
        assert!(
            matches!(result, Err(AppError::Validation { field: "account_id", .. })),
            "account {} should be rejected, got {:?}",
            account,
            result
        );
    }
}

#[test]
fn test_binding_metadata_is_trimmed_and_bounded() {
    let mut conn = setup_test_db();
    let owner = customer("owner-1");
    let (_, license) = setup_license(&conn, "owner-1", 3, NOW);

    let meta = BindingMeta {
        display_name: Some("  Prop challenge  ".into()),
        broker: Some("   ".into()),
    };
    let outcome = engine::bind_account(&mut conn, &owner, &license.id, 111, &meta, NOW).unwrap();
    assert_eq!(outcome.binding().display_name.as_deref(), Some("Prop challenge"));
    assert_eq!(outcome.binding().broker, None, "blank metadata is dropped");

    let too_long = BindingMeta {
        display_name: Some("x".repeat(101)),
        broker: None,
    };
    let result = engine::bind_account(&mut conn, &owner, &license.id, 222, &too_long, NOW);
    assert!(
        matches!(result, Err(AppError::Validation { field: "display_name", .. })),
        "got {:?}",
        result
    );
}

#[test]
fn test_other_owners_licenses_look_missing() {
    let mut conn = setup_test_db();
    let (_, license) = setup_license(&conn, "owner-1", 3, NOW);

    let result = bind(&mut conn, &customer("intruder"), &license.id, 111, NOW);
    assert!(matches!(result, Err(AppError::NotFound(_))), "got {:?}", result);

    let result = engine::unbind_account(&mut conn, &customer("intruder"), &license.id, 111, NOW);
    assert!(matches!(result, Err(AppError::NotFound(_))), "got {:?}", result);
}

#[test]
fn test_admin_can_bind_on_behalf_of_owner() {
    let mut conn = setup_test_db();
    let (_, license) = setup_license(&conn, "owner-1", 3, NOW);

    bind(&mut conn, &admin(), &license.id, 111, NOW).unwrap();
    assert_eq!(connected(&conn, &license.id), 1);
}

#[test]
fn test_suspended_license_refuses_binds() {
    let mut conn = setup_test_db();
    let (_, license) = setup_license(&conn, "owner-1", 3, NOW);
    engine::suspend_license(&mut conn, &admin(), &license.id, None, NOW).unwrap();

    let result = bind(&mut conn, &customer("owner-1"), &license.id, 111, NOW);
    assert!(
        matches!(result, Err(AppError::LicenseNotActive { status: LicenseStatus::Suspended })),
        "got {:?}",
        result
    );
}

// ============ Per-account blocks ============

#[test]
fn test_suspended_account_frees_slot_and_cannot_rebind() {
    let mut conn = setup_test_db();
    let owner = customer("owner-1");
    let (_, license) = setup_license(&conn, "owner-1", 2, NOW);
    bind(&mut conn, &owner, &license.id, 111, NOW).unwrap();
    bind(&mut conn, &owner, &license.id, 222, NOW).unwrap();

    let blocked = engine::suspend_binding(&mut conn, &admin(), &license.id, 111, NOW).unwrap();
    assert_eq!(blocked.status, BindingStatus::Suspended);
    assert_eq!(connected(&conn, &license.id), 1);

    let result = bind(&mut conn, &owner, &license.id, 111, NOW);
    assert!(matches!(result, Err(AppError::Forbidden(_))), "got {:?}", result);

    // The freed slot is usable by another account
    bind(&mut conn, &owner, &license.id, 333, NOW).unwrap();
    assert_eq!(connected(&conn, &license.id), 2);
}

#[test]
fn test_resumed_account_rebinds_through_capacity_check() {
    let mut conn = setup_test_db();
    let owner = customer("owner-1");
    let (_, license) = setup_license(&conn, "owner-1", 1, NOW);
    bind(&mut conn, &owner, &license.id, 111, NOW).unwrap();

    engine::suspend_binding(&mut conn, &admin(), &license.id, 111, NOW).unwrap();
    bind(&mut conn, &owner, &license.id, 222, NOW).unwrap();

    let resumed = engine::resume_binding(&mut conn, &admin(), &license.id, 111, NOW).unwrap();
    assert_eq!(resumed.status, BindingStatus::Inactive);

    let result = bind(&mut conn, &owner, &license.id, 111, NOW);
    assert!(
        matches!(result, Err(AppError::CapacityExceeded { current: 1, limit: 1 })),
        "got {:?}",
        result
    );

    engine::unbind_account(&mut conn, &owner, &license.id, 222, NOW).unwrap();
    let outcome = bind(&mut conn, &owner, &license.id, 111, NOW).unwrap();
    assert!(matches!(outcome, BindOutcome::Reactivated(_)), "got {:?}", outcome);
}

#[test]
fn test_resume_requires_suspended_account() {
    let mut conn = setup_test_db();
    let (_, license) = setup_license(&conn, "owner-1", 2, NOW);
    bind(&mut conn, &customer("owner-1"), &license.id, 111, NOW).unwrap();

    let result = engine::resume_binding(&mut conn, &admin(), &license.id, 111, NOW);
    assert!(
        matches!(result, Err(AppError::Validation { field: "status", .. })),
        "got {:?}",
        result
    );

    let result = engine::suspend_binding(&mut conn, &admin(), &license.id, 999, NOW);
    assert!(matches!(result, Err(AppError::NotFound(_))), "got {:?}", result);
}

#[test]
fn test_customers_cannot_block_accounts() {
    let mut conn = setup_test_db();
    let owner = customer("owner-1");
    let (_, license) = setup_license(&conn, "owner-1", 2, NOW);
    bind(&mut conn, &owner, &license.id, 111, NOW).unwrap();

    let result = engine::suspend_binding(&mut conn, &owner, &license.id, 111, NOW);
    assert!(matches!(result, Err(AppError::Forbidden(_))), "got {:?}", result);
}

// ============ Runtime verification ============

#[test]
fn test_verify_bound_account() {
    let mut conn = setup_test_db();
    let (_, license) = setup_license(&conn, "owner-1", 2, NOW);
    bind(&mut conn, &customer("owner-1"), &license.id, 111, NOW).unwrap();

    let verification =
        engine::verify_binding(&conn, &license.license_key, 111, Some(1_000_000), None, NOW + 60).unwrap();
    assert!(verification.valid);
    assert_eq!(verification.status, Some(LicenseStatus::Active));
    assert_eq!(verification.expires_at, license.expires_at);

    let binding = queries::get_binding(&conn, &license.id, 111).unwrap().unwrap();
    assert_eq!(binding.last_seen_at, Some(NOW + 60));
    assert_eq!(binding.balance_cents, Some(1_000_000));
}

#[test]
fn test_verify_unbound_account_is_invalid() {
    let mut conn = setup_test_db();
    let (_, license) = setup_license(&conn, "owner-1", 2, NOW);
    bind(&mut conn, &customer("owner-1"), &license.id, 111, NOW).unwrap();

    let verification = engine::verify_binding(&conn, &license.license_key, 222, None, None, NOW).unwrap();
    assert!(!verification.valid);
    assert_eq!(verification.status, Some(LicenseStatus::Active));
    assert_eq!(verification.expires_at, None);
}

#[test]
fn test_verify_unknown_key_reveals_nothing() {
    let conn = setup_test_db();
    let verification =
        engine::verify_binding(&conn, "EA-NOPE0-NOPE0-NOPE0-NOPE0-NOPE0", 111, None, None, NOW).unwrap();
    assert!(!verification.valid);
    assert_eq!(verification.status, None);
}

#[test]
fn test_verify_fails_once_license_expires() {
    let mut conn = setup_test_db();
    let (_, license) = setup_license(&conn, "owner-1", 2, NOW);
    bind(&mut conn, &customer("owner-1"), &license.id, 111, NOW).unwrap();

    let expiry = license.expires_at.unwrap();
    assert!(engine::verify_binding(&conn, &license.license_key, 111, None, None, expiry - 1).unwrap().valid);

    let verification = engine::verify_binding(&conn, &license.license_key, 111, None, None, expiry).unwrap();
    assert!(!verification.valid);
    assert_eq!(verification.status, Some(LicenseStatus::Expired));
}

#[test]
fn test_verify_suspended_account_is_invalid() {
    let mut conn = setup_test_db();
    let (_, license) = setup_license(&conn, "owner-1", 2, NOW);
    bind(&mut conn, &customer("owner-1"), &license.id, 111, NOW).unwrap();
    engine::suspend_binding(&mut conn, &admin(), &license.id, 111, NOW).unwrap();

    let verification = engine::verify_binding(&conn, &license.license_key, 111, None, None, NOW).unwrap();
    assert!(!verification.valid);
}

#[test]
fn test_every_verification_attempt_is_logged() {
    let mut conn = setup_test_db();
    let (_, license) = setup_license(&conn, "owner-1", 2, NOW);
    bind(&mut conn, &customer("owner-1"), &license.id, 111, NOW).unwrap();
    let key = license.license_key.as_str();
    let ip = Some("203.0.113.7");

    engine::verify_binding(&conn, key, 111, None, ip, NOW + 1).unwrap();
    engine::verify_binding(&conn, key, 222, None, ip, NOW + 2).unwrap();
    engine::verify_binding(&conn, key, 0, None, ip, NOW + 3).unwrap();

    let log = engine::list_validations(&conn, &admin(), &license.id, 10).unwrap();
    let results: Vec<_> = log.iter().map(|v| (v.account_id, v.result, v.suspicious)).collect();
    assert_eq!(
        results,
        vec![
            (0, ValidationResult::InvalidAccount, false),
            (222, ValidationResult::NotBound, true),
            (111, ValidationResult::Valid, false),
        ]
    );
    assert!(log.iter().all(|v| v.ip_address.as_deref() == ip));
    assert!(log.iter().all(|v| v.license_status == Some(LicenseStatus::Active)));
}

#[test]
fn test_failed_checks_on_inactive_license_are_logged() {
    let mut conn = setup_test_db();
    let (_, license) = setup_license(&conn, "owner-1", 2, NOW);
    bind(&mut conn, &customer("owner-1"), &license.id, 111, NOW).unwrap();
    let expiry = license.expires_at.unwrap();

    engine::verify_binding(&conn, &license.license_key, 111, None, None, expiry).unwrap();

    let log = queries::list_validations_for_license(&conn, &license.id, 10).unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].result, ValidationResult::LicenseNotActive);
    assert_eq!(log[0].license_status, Some(LicenseStatus::Expired));
    assert_eq!(log[0].ip_address, None);
}

#[test]
fn test_unknown_key_attempts_are_logged_without_license() {
    let conn = setup_test_db();

    engine::verify_binding(&conn, "EA-NOPE0-NOPE0-NOPE0-NOPE0-NOPE0", 111, None, Some("198.51.100.2"), NOW)
        .unwrap();

    let (license_id, result, suspicious): (Option<String>, String, bool) = conn
        .query_row(
            "SELECT license_id, result, suspicious FROM license_validations",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .unwrap();
    assert_eq!(license_id, None);
    assert_eq!(result, "unknown_key");
    assert!(suspicious);
}

#[test]
fn test_validation_history_is_admin_only_and_capped() {
    let mut conn = setup_test_db();
    let (_, license) = setup_license(&conn, "owner-1", 2, NOW);
    bind(&mut conn, &customer("owner-1"), &license.id, 111, NOW).unwrap();
    for i in 0..5 {
        engine::verify_binding(&conn, &license.license_key, 111, None, None, NOW + i).unwrap();
    }

    let latest = engine::list_validations(&conn, &admin(), &license.id, 2).unwrap();
    assert_eq!(latest.len(), 2);
    assert_eq!(latest[0].created_at, NOW + 4);

    let result = engine::list_validations(&conn, &customer("owner-1"), &license.id, 10);
    assert!(matches!(result, Err(AppError::Forbidden(_))), "got {:?}", result);

    let result = engine::list_validations(&conn, &admin(), "no-such-license", 10);
    assert!(matches!(result, Err(AppError::NotFound(_))), "got {:?}", result);
}
