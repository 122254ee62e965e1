#![allow(dead_code)]

use std::sync::Arc;

use aideon_axia_store::{
    ActorId, AssignmentMeta, AttributeMeta, AxiaConfig, AxiaResult, AxiaStore, ChangeNotifier,
    DataType, Id, InMemoryCatalog, PartitionId, ValidationRules, ValuePair, WriteValueInput,
};
use serde_json::Value as JsonValue;
use tempfile::{TempDir, tempdir};

/// A store on a fresh SQLite file plus the catalog that backs its metadata and entities.
pub struct Fixture {
    pub dir: TempDir,
    pub store: AxiaStore,
    pub catalog: Arc<InMemoryCatalog>,
    pub partition: PartitionId,
    pub actor: ActorId,
    pub class_id: Id,
}

/// Attribute plus the assignment binding it to the fixture's owner class.
#[derive(Clone)]
pub struct Field {
    pub attribute: AttributeMeta,
    pub assignment: AssignmentMeta,
}

pub async fn fixture() -> AxiaResult<Fixture> {
    fixture_with(|_| {}, None).await
}

pub async fn fixture_with(
    configure: impl FnOnce(&mut AxiaConfig),
    notifier: Option<Arc<dyn ChangeNotifier>>,
) -> AxiaResult<Fixture> {
    let dir = tempdir().expect("tempdir");
    let mut config = AxiaConfig::default_sqlite(dir.path().join("axia.sqlite").to_string_lossy());
    configure(&mut config);
    let catalog = Arc::new(InMemoryCatalog::new());
    let mut collaborators = catalog.collaborators();
    if let Some(notifier) = notifier {
        collaborators = collaborators.with_notifier(notifier);
    }
    let store = AxiaStore::connect(&config, dir.path(), collaborators).await?;
    Ok(Fixture {
        dir,
        store,
        catalog,
        partition: PartitionId(Id::new()),
        actor: ActorId(Id::new()),
        class_id: Id::new(),
    })
}

impl Fixture {
    pub fn field(&self, name: &str, data_type: DataType, base_rules: ValidationRules) -> Field {
        self.field_with(name, data_type, base_rules, ValidationRules::default(), false)
    }

    pub fn field_with(
        &self,
        name: &str,
        data_type: DataType,
        base_rules: ValidationRules,
        overlay_rules: ValidationRules,
        is_required: bool,
    ) -> Field {
        let attribute = AttributeMeta {
            attribute_id: Id::new(),
            name: name.to_string(),
            data_type,
            base_rules,
        };
        self.catalog
            .register_attribute(self.partition, attribute.clone())
            .expect("register attribute");
        let assignment = AssignmentMeta {
            assignment_id: Id::new(),
            owner_class_id: self.class_id,
            attribute_id: attribute.attribute_id,
            is_required,
            overlay_rules,
            default_value: None,
        };
        self.catalog
            .register_assignment(self.partition, assignment.clone())
            .expect("register assignment");
        Field {
            attribute,
            assignment,
        }
    }

    pub fn entity(&self) -> Id {
        self.entity_of(self.class_id)
    }

    pub fn entity_of(&self, class_id: Id) -> Id {
        let entity_id = Id::new();
        self.catalog
            .upsert_entity(self.partition, entity_id, class_id)
            .expect("register entity");
        entity_id
    }

    pub fn write(&self, owner: Id, field: &Field, raw: JsonValue) -> WriteValueInput {
        WriteValueInput {
            partition: self.partition,
            actor: self.actor,
            owner_entity_id: owner,
            attribute_id: field.attribute.attribute_id,
            assignment_id: field.assignment.assignment_id,
            raw,
        }
    }

    pub fn pair(&self, owner: Id, field: &Field) -> ValuePair {
        ValuePair {
            partition: self.partition,
            owner_entity_id: owner,
            attribute_id: field.attribute.attribute_id,
        }
    }
}
