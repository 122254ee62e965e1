mod support;

use std::sync::Arc;

use aideon_axia_store::{
    AxiaError, AxiaResult, ChangeFeedApi, ChangeOperation, ChannelNotifier, DataType, Id,
    ReferenceApi, ReferenceDeletePolicy, ValidationCode, ValidationRules, ValueReadApi,
    ValueSlot, ValueWriteApi,
};
use serde_json::json;
use support::{fixture, fixture_with};

#[tokio::test]
async fn deleting_a_target_clears_references() -> AxiaResult<()> {
    let (notifier, mut events) = ChannelNotifier::new(16);
    let fx = fixture_with(|_| {}, Some(Arc::new(notifier))).await?;
    let manager = fx.field_with(
        "manager",
        DataType::Reference,
        ValidationRules::default(),
        ValidationRules::default(),
        true,
    );
    let mentor = fx.field("mentor", DataType::Reference, ValidationRules::default());
    let owner = fx.entity();
    let target = fx.entity();

    let managed = fx
        .store
        .create_value(fx.write(owner, &manager, json!(target.to_uuid_string())))
        .await?;
    fx.store
        .create_value(fx.write(owner, &mentor, json!(target.to_uuid_string())))
        .await?;
    while events.try_recv().is_ok() {}

    assert!(fx.catalog.delete_entity(fx.partition, target)?);
    let cleared = fx
        .store
        .on_owner_entity_deleted(fx.partition, fx.actor, target)
        .await?;
    assert_eq!(cleared.len(), 2);

    let manager_now = fx
        .store
        .get_current_value(fx.pair(owner, &manager))
        .await?
        .expect("manager row");
    assert_eq!(manager_now.slot, ValueSlot::ClearedReference);
    assert_eq!(manager_now.data_type, DataType::Reference);
    assert_eq!(manager_now.version, 2);
    assert!(!manager_now.is_valid);
    assert_eq!(
        manager_now.validation_errors[0].code,
        ValidationCode::RequiredMissing
    );

    let mentor_now = fx
        .store
        .get_current_value(fx.pair(owner, &mentor))
        .await?
        .expect("mentor row");
    assert_eq!(mentor_now.slot, ValueSlot::ClearedReference);
    assert!(mentor_now.is_valid);

    let previous = fx
        .store
        .get_value(fx.partition, managed.value.value_id)
        .await?
        .expect("history kept");
    assert!(!previous.is_current);
    assert_eq!(
        previous.value().and_then(|value| value.as_reference()),
        Some(target)
    );

    let first = events.recv().await.expect("event");
    assert_eq!(first.operation, ChangeOperation::Superseded);
    assert!(events.recv().await.is_some());

    let again = fx
        .store
        .on_owner_entity_deleted(fx.partition, fx.actor, target)
        .await?;
    assert!(again.is_empty());
    Ok(())
}

#[tokio::test]
async fn references_must_point_at_live_entities_of_the_right_class() -> AxiaResult<()> {
    let fx = fixture().await?;
    let team_class = Id::new();
    let team = fx.field(
        "team",
        DataType::Reference,
        ValidationRules {
            reference_class: Some(team_class),
            ..ValidationRules::default()
        },
    );
    let owner = fx.entity();

    let err = fx
        .store
        .create_value(fx.write(owner, &team, json!(Id::new().to_uuid_string())))
        .await
        .expect_err("dangling reference");
    assert_eq!(err.field_errors()[0].code, ValidationCode::ReferenceNotFound);

    let wrong_class = fx.entity();
    let err = fx
        .store
        .create_value(fx.write(owner, &team, json!(wrong_class.to_uuid_string())))
        .await
        .expect_err("wrong class");
    assert_eq!(
        err.field_errors()[0].code,
        ValidationCode::ConstraintViolation
    );

    let right = fx.entity_of(team_class);
    fx.store
        .create_value(fx.write(owner, &team, json!(right.to_uuid_string())))
        .await?;
    Ok(())
}

#[tokio::test]
async fn restrict_policy_refuses_referenced_deletes() -> AxiaResult<()> {
    let fx = fixture_with(
        |config| config.reference_delete_policy = Some(ReferenceDeletePolicy::Restrict),
        None,
    )
    .await?;
    let link = fx.field("link", DataType::Reference, ValidationRules::default());
    let owner = fx.entity();
    let target = fx.entity();
    fx.store
        .create_value(fx.write(owner, &link, json!(target.to_uuid_string())))
        .await?;
    let feed_before = fx
        .store
        .get_changes_since(fx.partition, None, 100)
        .await?
        .len();

    let err = fx
        .store
        .on_owner_entity_deleted(fx.partition, fx.actor, target)
        .await
        .expect_err("referenced");
    assert!(matches!(err, AxiaError::Precondition { .. }));
    let current = fx
        .store
        .get_current_value(fx.pair(owner, &link))
        .await?
        .expect("untouched");
    assert_eq!(current.version, 1);
    assert_eq!(
        fx.store
            .get_changes_since(fx.partition, None, 100)
            .await?
            .len(),
        feed_before
    );

    let unreferenced = fx
        .store
        .on_owner_entity_deleted(fx.partition, fx.actor, owner)
        .await?;
    assert!(unreferenced.is_empty());
    Ok(())
}
