mod support;

use std::time::Duration;

use aideon_axia_store::{
    AxiaError, AxiaResult, ChangeFeedApi, ChangeOperation, DataType, DeleteValueInput,
    LimitsConfig, ListValuesInput, OrderField, SortDirection, TypedValue, ValidationMode, ValidationRules,
    ValueFilter, ValueOrdering, ValuePredicate, ValueReadApi, ValueWriteApi,
};
use serde_json::json;
use support::{Fixture, fixture, fixture_with};
use tokio::time::timeout;

fn listing(fx: &Fixture, filter: ValueFilter, limit: u32, offset: u64) -> ListValuesInput {
    ListValuesInput {
        partition: fx.partition,
        filter,
        ordering: ValueOrdering {
            field: OrderField::CreatedAt,
            direction: SortDirection::Asc,
        },
        limit,
        offset,
    }
}

#[tokio::test]
async fn structural_filters_and_paging() -> AxiaResult<()> {
    let fx = fixture().await?;
    let score = fx.field("score", DataType::Integer, ValidationRules::default());
    let label = fx.field("label", DataType::String, ValidationRules::default());
    let owners = [fx.entity(), fx.entity(), fx.entity()];
    for (index, owner) in owners.iter().enumerate() {
        fx.store
            .create_value(fx.write(*owner, &score, json!(index * 10)))
            .await?;
        fx.store
            .create_value(fx.write(*owner, &label, json!(format!("item {index}"))))
            .await?;
    }
    fx.store
        .update_value(fx.write(owners[0], &score, json!(5)))
        .await?;

    let all_current = fx
        .store
        .list_values(listing(&fx, ValueFilter::default(), 100, 0))
        .await?;
    assert_eq!(all_current.total_count, 6);

    let scores = fx
        .store
        .list_values(listing(
            &fx,
            ValueFilter {
                data_type: Some(DataType::Integer),
                ..ValueFilter::default()
            },
            2,
            0,
        ))
        .await?;
    assert_eq!(scores.total_count, 3);
    assert_eq!(scores.items.len(), 2);
    let rest = fx
        .store
        .list_values(listing(
            &fx,
            ValueFilter {
                data_type: Some(DataType::Integer),
                ..ValueFilter::default()
            },
            2,
            2,
        ))
        .await?;
    assert_eq!(rest.items.len(), 1);
    assert_eq!(rest.items[0].value(), Some(&TypedValue::Integer(5)));

    let with_history = fx
        .store
        .list_values(listing(
            &fx,
            ValueFilter {
                owner_entity_id: Some(owners[0]),
                attribute_id: Some(score.attribute.attribute_id),
                current_only: false,
                ..ValueFilter::default()
            },
            10,
            0,
        ))
        .await?;
    assert_eq!(with_history.total_count, 2);

    fx.store
        .delete_value(DeleteValueInput {
            partition: fx.partition,
            actor: fx.actor,
            owner_entity_id: owners[1],
            attribute_id: label.attribute.attribute_id,
        })
        .await?;
    let labels = |include_inactive| ValueFilter {
        attribute_id: Some(label.attribute.attribute_id),
        include_inactive,
        ..ValueFilter::default()
    };
    assert_eq!(
        fx.store
            .list_values(listing(&fx, labels(false), 10, 0))
            .await?
            .total_count,
        2
    );
    assert_eq!(
        fx.store
            .list_values(listing(&fx, labels(true), 10, 0))
            .await?
            .total_count,
        3
    );

    let err = fx
        .store
        .list_values(listing(&fx, ValueFilter::default(), 0, 0))
        .await
        .expect_err("zero limit");
    assert!(matches!(err, AxiaError::Invalid { .. }));
    Ok(())
}

#[tokio::test]
async fn typed_predicates_filter_current_values() -> AxiaResult<()> {
    let fx = fixture().await?;
    let score = fx.field("score", DataType::Integer, ValidationRules::default());
    let title = fx.field("title", DataType::String, ValidationRules::default());
    let profile = fx.field("profile", DataType::Document, ValidationRules::default());
    let owners = [fx.entity(), fx.entity(), fx.entity()];
    for (owner, (points, name, city)) in owners.iter().zip([
        (10, "Quarterly Report", "Oslo"),
        (25, "Annual report", "Bergen"),
        (40, "Roadmap", "Oslo"),
    ]) {
        fx.store
            .create_value(fx.write(*owner, &score, json!(points)))
            .await?;
        fx.store
            .create_value(fx.write(*owner, &title, json!(name)))
            .await?;
        fx.store
            .create_value(fx.write(*owner, &profile, json!({"address": {"city": city}})))
            .await?;
    }
    let matching = |attribute, predicate| {
        listing(
            &fx,
            ValueFilter {
                attribute_id: Some(attribute),
                predicates: vec![predicate],
                ..ValueFilter::default()
            },
            10,
            0,
        )
    };

    let in_range = fx
        .store
        .list_values(matching(
            score.attribute.attribute_id,
            ValuePredicate::Range {
                min: Some(json!(20)),
                max: Some(json!("40")),
            },
        ))
        .await?;
    assert_eq!(in_range.total_count, 2);
    assert_eq!(in_range.items[0].owner_entity_id, owners[1]);

    let equal = fx
        .store
        .list_values(matching(
            score.attribute.attribute_id,
            ValuePredicate::Equals { value: json!("10") },
        ))
        .await?;
    assert_eq!(equal.total_count, 1);
    assert_eq!(equal.items[0].owner_entity_id, owners[0]);

    let reports = fx
        .store
        .list_values(matching(
            title.attribute.attribute_id,
            ValuePredicate::Contains {
                text: "REPORT".to_string(),
            },
        ))
        .await?;
    assert_eq!(reports.total_count, 2);

    let in_oslo = fx
        .store
        .list_values(matching(
            profile.attribute.attribute_id,
            ValuePredicate::JsonPath {
                path: "$.address.city".to_string(),
                equals: json!("Oslo"),
            },
        ))
        .await?;
    assert_eq!(in_oslo.total_count, 2);

    let err = fx
        .store
        .list_values(matching(
            score.attribute.attribute_id,
            ValuePredicate::Range {
                min: None,
                max: None,
            },
        ))
        .await
        .expect_err("unbounded range");
    assert!(matches!(err, AxiaError::Invalid { .. }));
    Ok(())
}

#[tokio::test]
async fn predicate_scan_is_capped() -> AxiaResult<()> {
    let fx = fixture_with(
        |config| {
            config.limits = Some(LimitsConfig {
                max_scan_rows: Some(2),
                ..LimitsConfig::with_defaults()
            })
        },
        None,
    )
    .await?;
    let score = fx.field("score", DataType::Integer, ValidationRules::default());
    for points in [1, 2, 3] {
        fx.store
            .create_value(fx.write(fx.entity(), &score, json!(points)))
            .await?;
    }
    let filter = |predicates| ValueFilter {
        attribute_id: Some(score.attribute.attribute_id),
        predicates,
        ..ValueFilter::default()
    };

    let err = fx
        .store
        .list_values(listing(
            &fx,
            filter(vec![ValuePredicate::Equals { value: json!(3) }]),
            10,
            0,
        ))
        .await
        .expect_err("too many rows to scan");
    assert!(matches!(err, AxiaError::Invalid { .. }));

    let structural = fx
        .store
        .list_values(listing(&fx, filter(Vec::new()), 10, 0))
        .await?;
    assert_eq!(structural.total_count, 3);
    Ok(())
}

#[tokio::test]
async fn validity_filter_finds_flagged_rows() -> AxiaResult<()> {
    let fx = fixture_with(
        |config| config.validation_mode = Some(ValidationMode::Warn),
        None,
    )
    .await?;
    let code = fx.field(
        "code",
        DataType::String,
        ValidationRules {
            max_length: Some(2),
            ..ValidationRules::default()
        },
    );
    fx.store
        .create_value(fx.write(fx.entity(), &code, json!("ok")))
        .await?;
    fx.store
        .create_value(fx.write(fx.entity(), &code, json!("too long")))
        .await?;
    let flagged = fx
        .store
        .list_values(listing(
            &fx,
            ValueFilter {
                is_valid: Some(false),
                ..ValueFilter::default()
            },
            10,
            0,
        ))
        .await?;
    assert_eq!(flagged.total_count, 1);
    assert_eq!(
        flagged.items[0].value(),
        Some(&TypedValue::String("too long".to_string()))
    );
    Ok(())
}

#[tokio::test]
async fn change_feed_is_ordered_per_partition() -> AxiaResult<()> {
    let fx = fixture().await?;
    let other = fixture().await?;
    let status = fx.field("status", DataType::String, ValidationRules::default());
    let owner = fx.entity();

    let created = fx
        .store
        .create_value(fx.write(owner, &status, json!("new")))
        .await?;
    let updated = fx
        .store
        .update_value(fx.write(owner, &status, json!("done")))
        .await?;
    fx.store
        .delete_value(DeleteValueInput {
            partition: fx.partition,
            actor: fx.actor,
            owner_entity_id: owner,
            attribute_id: status.attribute.attribute_id,
        })
        .await?;

    let feed = fx.store.get_changes_since(fx.partition, None, 10).await?;
    assert_eq!(feed.len(), 3);
    assert!(feed.windows(2).all(|pair| pair[0].sequence < pair[1].sequence));
    let operations = feed
        .iter()
        .map(|entry| entry.event.operation)
        .collect::<Vec<_>>();
    assert_eq!(
        operations,
        vec![
            ChangeOperation::Created,
            ChangeOperation::Superseded,
            ChangeOperation::Deleted
        ]
    );
    assert_eq!(feed[1].event.value_id, updated.value.value_id);
    assert_eq!(feed[1].event.previous_value_id, Some(created.value.value_id));

    let tail = fx
        .store
        .get_changes_since(fx.partition, Some(feed[0].sequence), 10)
        .await?;
    assert_eq!(tail.len(), 2);
    assert_eq!(tail[0].sequence, feed[1].sequence);
    assert!(
        other
            .store
            .get_changes_since(other.partition, None, 10)
            .await?
            .is_empty()
    );
    Ok(())
}

#[tokio::test]
async fn subscription_replays_then_follows() -> AxiaResult<()> {
    let fx = fixture().await?;
    let level = fx.field("level", DataType::Integer, ValidationRules::default());
    let owner = fx.entity();
    fx.store
        .create_value(fx.write(owner, &level, json!(1)))
        .await?;

    let mut entries = fx.store.subscribe(fx.partition, None).await?;
    let first = timeout(Duration::from_secs(5), entries.recv())
        .await
        .expect("replayed entry")
        .expect("open channel");
    assert_eq!(first.event.operation, ChangeOperation::Created);

    fx.store
        .update_value(fx.write(owner, &level, json!(2)))
        .await?;
    let second = timeout(Duration::from_secs(5), entries.recv())
        .await
        .expect("followed entry")
        .expect("open channel");
    assert!(second.sequence > first.sequence);
    assert_eq!(second.event.operation, ChangeOperation::Superseded);
    Ok(())
}
