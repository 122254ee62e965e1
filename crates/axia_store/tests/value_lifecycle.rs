mod support;

use aideon_axia_store::{
    AxiaError, AxiaResult, ChangeKind, DataType, DeleteValueInput, HistoryInput, Id,
    RestoreValueInput, TypedValue, ValidationCode, ValidationRules, ValueReadApi, ValueStoreApi,
    ValueWriteApi,
};
use serde_json::json;
use support::fixture;

#[tokio::test]
async fn pattern_rule_gates_writes() -> AxiaResult<()> {
    let fx = fixture().await?;
    let email = fx.field(
        "email",
        DataType::String,
        ValidationRules {
            pattern: Some("^[^@]+@[^@]+$".to_string()),
            ..ValidationRules::default()
        },
    );
    let owner = fx.entity();

    let created = fx
        .store
        .create_value(fx.write(owner, &email, json!("a@b.com")))
        .await?;
    assert_eq!(created.change, ChangeKind::InitialVersion);
    assert_eq!(created.value.version, 1);
    assert!(created.value.is_current);
    assert!(created.value.is_valid);

    let err = fx
        .store
        .update_value(fx.write(owner, &email, json!("not-an-email")))
        .await
        .expect_err("pattern violation");
    assert!(matches!(err, AxiaError::Validation { .. }));
    assert_eq!(err.field_errors()[0].field, "email");
    assert_eq!(
        err.field_errors()[0].code,
        ValidationCode::ConstraintViolation
    );

    let history = fx
        .store
        .get_value_history(HistoryInput {
            pair: fx.pair(owner, &email),
            limit: 10,
            cursor: None,
        })
        .await?;
    assert_eq!(history.items.len(), 1);
    assert_eq!(history.items[0].value_id, created.value.value_id);
    Ok(())
}

#[tokio::test]
async fn updates_supersede_and_repeats_are_no_ops() -> AxiaResult<()> {
    let fx = fixture().await?;
    let score = fx.field("score", DataType::Integer, ValidationRules::default());
    let owner = fx.entity();

    let first = fx
        .store
        .create_value(fx.write(owner, &score, json!(10)))
        .await?;
    assert_eq!(first.value.version, 1);

    let second = fx
        .store
        .update_value(fx.write(owner, &score, json!(20)))
        .await?;
    assert_eq!(second.change, ChangeKind::NewVersion);
    assert_eq!(second.value.version, 2);

    let replaced = fx
        .store
        .get_value(fx.partition, first.value.value_id)
        .await?
        .expect("first version");
    assert!(!replaced.is_current);
    assert_eq!(replaced.superseded_by, Some(second.value.value_id));
    assert_eq!(replaced.effective_to, Some(second.value.effective_from));

    let repeat = fx
        .store
        .update_value(fx.write(owner, &score, json!("20")))
        .await?;
    assert_eq!(repeat.change, ChangeKind::NoOp);
    assert_eq!(repeat.value.value_id, second.value.value_id);
    assert_eq!(repeat.value.version, 2);

    let current = fx
        .store
        .get_current_value(fx.pair(owner, &score))
        .await?
        .expect("current");
    assert_eq!(current.value(), Some(&TypedValue::Integer(20)));
    Ok(())
}

#[tokio::test]
async fn create_and_update_respect_chain_state() -> AxiaResult<()> {
    let fx = fixture().await?;
    let label = fx.field("label", DataType::String, ValidationRules::default());
    let owner = fx.entity();

    let err = fx
        .store
        .update_value(fx.write(owner, &label, json!("first")))
        .await
        .expect_err("nothing to update");
    assert!(matches!(err, AxiaError::NotFound { .. }));

    fx.store
        .create_value(fx.write(owner, &label, json!("first")))
        .await?;
    let err = fx
        .store
        .create_value(fx.write(owner, &label, json!("second")))
        .await
        .expect_err("already current");
    assert!(err.is_conflict());

    let err = fx
        .store
        .create_value(fx.write(fx.entity_of(Id::new()), &label, json!("x")))
        .await
        .expect_err("class mismatch");
    assert!(matches!(err, AxiaError::Precondition { .. }));
    Ok(())
}

#[tokio::test]
async fn soft_delete_keeps_history_and_numbering() -> AxiaResult<()> {
    let fx = fixture().await?;
    let note = fx.field("note", DataType::String, ValidationRules::default());
    let owner = fx.entity();
    let pair = fx.pair(owner, &note);

    let created = fx
        .store
        .create_value(fx.write(owner, &note, json!("draft")))
        .await?;
    let deleted = fx
        .store
        .delete_value(DeleteValueInput {
            partition: fx.partition,
            actor: fx.actor,
            owner_entity_id: owner,
            attribute_id: note.attribute.attribute_id,
        })
        .await?;
    assert_eq!(deleted.value_id, created.value.value_id);
    assert!(!deleted.is_active);
    assert!(fx.store.get_current_value(pair).await?.is_none());

    let err = fx
        .store
        .delete_value(DeleteValueInput {
            partition: fx.partition,
            actor: fx.actor,
            owner_entity_id: owner,
            attribute_id: note.attribute.attribute_id,
        })
        .await
        .expect_err("nothing left to delete");
    assert!(matches!(err, AxiaError::NotFound { .. }));

    let rewritten = fx
        .store
        .create_value(fx.write(owner, &note, json!("final")))
        .await?;
    assert_eq!(rewritten.value.version, 2);

    let kept = fx
        .store
        .get_value(fx.partition, created.value.value_id)
        .await?
        .expect("deleted row kept");
    assert!(!kept.is_active);
    assert_eq!(kept.superseded_by, None);
    Ok(())
}

#[tokio::test]
async fn restore_appends_a_new_version() -> AxiaResult<()> {
    let fx = fixture().await?;
    let status = fx.field("status", DataType::String, ValidationRules::default());
    let owner = fx.entity();

    let original = fx
        .store
        .create_value(fx.write(owner, &status, json!("open")))
        .await?;
    fx.store
        .update_value(fx.write(owner, &status, json!("closed")))
        .await?;

    let restored = fx
        .store
        .restore_value(RestoreValueInput {
            partition: fx.partition,
            actor: fx.actor,
            value_id: original.value.value_id,
        })
        .await?;
    assert_eq!(restored.change, ChangeKind::NewVersion);
    assert_eq!(restored.value.version, 3);
    assert_eq!(
        restored.value.value(),
        Some(&TypedValue::String("open".to_string()))
    );
    assert_ne!(restored.value.value_id, original.value.value_id);

    let again = fx
        .store
        .restore_value(RestoreValueInput {
            partition: fx.partition,
            actor: fx.actor,
            value_id: restored.value.value_id,
        })
        .await?;
    assert_eq!(again.change, ChangeKind::NoOp);
    Ok(())
}

#[tokio::test]
async fn history_pages_newest_first() -> AxiaResult<()> {
    let fx = fixture().await?;
    let counter = fx.field("counter", DataType::Integer, ValidationRules::default());
    let owner = fx.entity();
    fx.store
        .create_value(fx.write(owner, &counter, json!(1)))
        .await?;
    for value in 2..=5 {
        fx.store
            .update_value(fx.write(owner, &counter, json!(value)))
            .await?;
    }

    let mut versions = Vec::new();
    let mut cursor = None;
    loop {
        let page = fx
            .store
            .get_value_history(HistoryInput {
                pair: fx.pair(owner, &counter),
                limit: 2,
                cursor: cursor.clone(),
            })
            .await?;
        assert!(page.items.len() <= 2);
        versions.extend(page.items.iter().map(|item| item.version));
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    assert_eq!(versions, vec![5, 4, 3, 2, 1]);

    let err = fx
        .store
        .get_value_history(HistoryInput {
            pair: fx.pair(owner, &counter),
            limit: 2,
            cursor: Some("not a cursor".to_string()),
        })
        .await
        .expect_err("bad cursor");
    assert!(matches!(err, AxiaError::Invalid { .. }));
    Ok(())
}

#[tokio::test]
async fn every_data_type_reads_back_from_its_slot() -> AxiaResult<()> {
    let fx = fixture().await?;
    let owner = fx.entity();
    let target = fx.entity();
    let cases = [
        (DataType::String, json!("hello")),
        (DataType::Integer, json!(-42)),
        (DataType::Decimal, json!("12.50")),
        (DataType::Boolean, json!(true)),
        (DataType::Date, json!("2024-02-29")),
        (DataType::DateTime, json!("2024-02-29T10:30:00+02:00")),
        (DataType::Document, json!({"tags": ["a", "b"], "depth": {"n": 1}})),
        (DataType::Reference, json!(target.to_uuid_string())),
    ];
    for (data_type, raw) in cases {
        let field = fx.field(data_type.as_str(), data_type, ValidationRules::default());
        let written = fx.store.create_value(fx.write(owner, &field, raw)).await?;
        let read = fx
            .store
            .get_current_value(fx.pair(owner, &field))
            .await?
            .expect("current");
        assert_eq!(read.data_type, data_type);
        assert_eq!(read, written.value);
    }
    Ok(())
}

#[tokio::test]
async fn soft_delete_refuses_superseded_rows() -> AxiaResult<()> {
    let fx = fixture().await?;
    let note = fx.field("note", DataType::String, ValidationRules::default());
    let owner = fx.entity();

    let first = fx
        .store
        .create_value(fx.write(owner, &note, json!("draft")))
        .await?;
    let second = fx
        .store
        .update_value(fx.write(owner, &note, json!("final")))
        .await?;

    let err = fx
        .store
        .soft_delete(fx.partition, fx.actor, first.value.value_id)
        .await
        .expect_err("history row");
    assert!(matches!(err, AxiaError::Invalid { .. }));
    let history = fx
        .store
        .get_by_id(fx.partition, first.value.value_id)
        .await?
        .expect("first row");
    assert!(history.is_active);

    let deleted = fx
        .store
        .soft_delete(fx.partition, fx.actor, second.value.value_id)
        .await?;
    assert!(!deleted.is_active);
    let again = fx
        .store
        .soft_delete(fx.partition, fx.actor, second.value.value_id)
        .await?;
    assert!(!again.is_active);
    Ok(())
}
