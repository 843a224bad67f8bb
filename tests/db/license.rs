//! Database license operation tests

#[path = "../common/mod.rs"]
mod common;

use common::*;

// ============ License Keys ============

#[test]
fn test_generated_license_key_format() {
    let key = queries::generate_license_key();
    let groups: Vec<&str> = key.split('-').collect();

    assert_eq!(groups.len(), 6, "key should be EA plus five groups: {}", key);
    assert_eq!(groups[0], "EA");
    for group in &groups[1..] {
        assert_eq!(group.len(), 5, "each group should have 5 symbols: {}", key);
        assert!(
            group
                .chars()
                .all(|c| c.is_ascii_uppercase() || ('2'..='9').contains(&c)),
            "group should only use the unambiguous alphabet: {}",
            key
        );
        assert!(
            !group.contains(['I', 'O', '0', '1']),
            "ambiguous symbols must never appear: {}",
            key
        );
    }
}

#[test]
fn test_create_license_defaults() {
    let conn = setup_test_db();
    let product = create_test_product(&conn, "Grid Master", None, Some(12));

    let license = insert_license(
        &conn,
        "owner-1",
        &product,
        Some(NOW + ONE_MONTH),
        Capacity::limited(3),
        NOW,
    );

    assert_eq!(license.status, LicenseStatus::Active);
    assert_eq!(license.version, 1, "new licenses start at version 1");
    assert_eq!(license.product_name, "Grid Master");
    assert_eq!(license.capacity, Capacity::Limited(3));

    let stored = queries::get_license_by_key(&conn, &license.license_key)
        .unwrap()
        .expect("license should be retrievable by key");
    assert_eq!(stored.id, license.id);
    assert_eq!(stored.expires_at, Some(NOW + ONE_MONTH));
}

#[test]
fn test_unlimited_capacity_round_trips_through_zero_column() {
    let conn = setup_test_db();
    let product = create_test_product(&conn, "Grid Master", None, None);
    let license = insert_license(&conn, "owner-1", &product, None, Capacity::Unlimited, NOW);

    let raw: i64 = conn
        .query_row(
            "SELECT max_allowed_bindings FROM licenses WHERE id = ?1",
            [&license.id],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(raw, 0, "unlimited is stored as 0");

    let stored = queries::get_license_by_id(&conn, &license.id).unwrap().unwrap();
    assert_eq!(stored.capacity, Capacity::Unlimited);
    assert_eq!(stored.expires_at, None, "no expiry means perpetual");
}

#[test]
fn test_key_collision_retries_with_fresh_key() {
    let conn = setup_test_db();
    let product = create_test_product(&conn, "Grid Master", None, None);
    let first = insert_license(&conn, "owner-1", &product, None, Capacity::Unlimited, NOW);

    let taken = first.license_key.clone();
    let mut calls = 0;
    let input = NewLicense {
        owner_id: "owner-2".into(),
        product_id: product.id.clone(),
        product_name: product.name.clone(),
        tier_id: None,
        expires_at: None,
        capacity: Capacity::Unlimited,
    };

    let second = queries::create_license_with_keys(&conn, &input, NOW, || {
        calls += 1;
        if calls == 1 {
            taken.clone()
        } else {
            "EA-FRESH-KEYAA-AAAAA-AAAAA-AAAAA".to_string()
        }
    })
    .expect("second key should succeed");

    assert_eq!(calls, 2, "one collision, one retry");
    assert_eq!(second.license_key, "EA-FRESH-KEYAA-AAAAA-AAAAA-AAAAA");
    assert_eq!(count_licenses(&conn), 2);
}

#[test]
fn test_key_collisions_give_up_after_bounded_attempts() {
    let conn = setup_test_db();
    let product = create_test_product(&conn, "Grid Master", None, None);
    let first = insert_license(&conn, "owner-1", &product, None, Capacity::Unlimited, NOW);

    let mut calls = 0;
    let input = NewLicense {
        owner_id: "owner-2".into(),
        product_id: product.id.clone(),
        product_name: product.name.clone(),
        tier_id: None,
        expires_at: None,
        capacity: Capacity::Unlimited,
    };
    let result = queries::create_license_with_keys(&conn, &input, NOW, || {
        calls += 1;
        first.license_key.clone()
    });

    assert!(
        matches!(result, Err(AppError::Internal(_))),
        "exhausted retries should be an internal error, got {:?}",
        result
    );
    assert_eq!(calls, queries::LICENSE_KEY_ATTEMPTS);
    assert_eq!(count_licenses(&conn), 1);
}

// ============ Versioned Updates ============

#[test]
fn test_update_license_bumps_version() {
    let conn = setup_test_db();
    let (_, license) = setup_license(&conn, "owner-1", 3, NOW);

    let changes = LicenseChanges {
        expires_at: Some(Some(NOW + 2 * ONE_MONTH)),
        ..Default::default()
    };
    let updated = queries::update_license(&conn, &license, &changes, NOW + 10).unwrap();

    assert_eq!(updated.version, license.version + 1);
    assert_eq!(updated.expires_at, Some(NOW + 2 * ONE_MONTH));
    assert_eq!(updated.updated_at, NOW + 10);
}

#[test]
fn test_update_license_with_stale_version_conflicts() {
    let conn = setup_test_db();
    let (_, license) = setup_license(&conn, "owner-1", 3, NOW);

    // First writer wins
    let changes = LicenseChanges {
        status: Some(LicenseStatus::Suspended),
        ..Default::default()
    };
    queries::update_license(&conn, &license, &changes, NOW).unwrap();

    // Second writer still holds version 1
    let stale = LicenseChanges {
        expires_at: Some(Some(NOW + 5 * ONE_MONTH)),
        ..Default::default()
    };
    let result = queries::update_license(&conn, &license, &stale, NOW);
    assert!(
        matches!(result, Err(AppError::Conflict(_))),
        "stale version should conflict, got {:?}",
        result
    );

    let stored = queries::get_license_by_id(&conn, &license.id).unwrap().unwrap();
    assert_eq!(stored.status, LicenseStatus::Suspended);
    assert_eq!(stored.expires_at, license.expires_at, "loser's change must not land");
}

#[test]
fn test_update_license_can_make_perpetual() {
    let conn = setup_test_db();
    let (_, license) = setup_license(&conn, "owner-1", 3, NOW);

    let changes = LicenseChanges {
        expires_at: Some(None),
        ..Default::default()
    };
    let updated = queries::update_license(&conn, &license, &changes, NOW).unwrap();
    assert_eq!(updated.expires_at, None);
}

// ============ Renewal Lookup ============

#[test]
fn test_find_renewable_license_skips_revoked() {
    let conn = setup_test_db();
    let product = create_test_product(&conn, "Grid Master", None, Some(1));
    let older = insert_license(&conn, "owner-1", &product, Some(NOW), Capacity::Unlimited, NOW - 10);
    let newer = insert_license(&conn, "owner-1", &product, Some(NOW), Capacity::Unlimited, NOW);

    let found = queries::find_renewable_license(&conn, "owner-1", &product.id)
        .unwrap()
        .unwrap();
    assert_eq!(found.id, newer.id, "most recent license wins");

    let changes = LicenseChanges {
        status: Some(LicenseStatus::Revoked),
        revoked: Some((NOW, "chargeback".into())),
        ..Default::default()
    };
    queries::update_license(&conn, &newer, &changes, NOW).unwrap();

    let found = queries::find_renewable_license(&conn, "owner-1", &product.id)
        .unwrap()
        .unwrap();
    assert_eq!(found.id, older.id, "revoked licenses are never renewed");

    assert!(
        queries::find_renewable_license(&conn, "owner-2", &product.id)
            .unwrap()
            .is_none()
    );
}

#[test]
fn test_licenses_due_for_expiry() {
    let conn = setup_test_db();
    let product = create_test_product(&conn, "Grid Master", None, None);
    let due = insert_license(&conn, "a", &product, Some(NOW - ONE_DAY), Capacity::Unlimited, NOW);
    insert_license(&conn, "b", &product, Some(NOW + ONE_DAY), Capacity::Unlimited, NOW);
    insert_license(&conn, "c", &product, None, Capacity::Unlimited, NOW);

    let listed = queries::list_licenses_due_for_expiry(&conn, NOW).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, due.id);
}

// ============ Events ============

#[test]
fn test_license_events_are_recorded_in_order() {
    let conn = setup_test_db();
    let (_, license) = setup_license(&conn, "owner-1", 3, NOW);

    queries::record_license_event(&conn, &license.id, LicenseAction::Created, &Caller::System, None, NOW)
        .unwrap();
    queries::record_license_event(
        &conn,
        &license.id,
        LicenseAction::Suspended,
        &admin(),
        Some(&serde_json::json!({ "reason": "fraud review" })),
        NOW + 1,
    )
    .unwrap();

    let events = queries::list_license_events(&conn, &license.id).unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].action, LicenseAction::Created);
    assert_eq!(events[0].actor_type, "system");
    assert_eq!(events[0].actor_id, None);
    assert_eq!(events[1].action, LicenseAction::Suspended);
    assert_eq!(events[1].actor_type, "admin");
    assert_eq!(events[1].actor_id.as_deref(), Some("admin-1"));
    assert_eq!(
        events[1].details,
        Some(serde_json::json!({ "reason": "fraud review" }))
    );
}
