use serde::{Deserialize, Serialize};

use crate::equality::{cleared_reference_hash, value_hash};
use crate::{ActorId, DataType, FieldError, Id, PartitionId, Timestamp, TypedValue};

/// The populated typed slot of a row. A reference whose target was deleted under the cascade
/// policy keeps its data type but carries no value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ValueSlot {
    Set { value: TypedValue },
    ClearedReference,
}

impl ValueSlot {
    pub fn set(value: TypedValue) -> Self {
        ValueSlot::Set { value }
    }

    pub fn value(&self) -> Option<&TypedValue> {
        match self {
            ValueSlot::Set { value } => Some(value),
            ValueSlot::ClearedReference => None,
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            ValueSlot::Set { value } => value.data_type(),
            ValueSlot::ClearedReference => DataType::Reference,
        }
    }

    pub fn content_hash(&self) -> String {
        match self {
            ValueSlot::Set { value } => value_hash(value),
            ValueSlot::ClearedReference => cleared_reference_hash(),
        }
    }
}

/// Identifies one value chain.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ValuePair {
    pub partition: PartitionId,
    pub owner_entity_id: Id,
    pub attribute_id: Id,
}

/// One version of the value stored for an (owner entity, attribute) pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValueRecord {
    pub value_id: Id,
    pub partition: PartitionId,
    pub owner_entity_id: Id,
    pub attribute_id: Id,
    pub assignment_id: Id,
    pub data_type: DataType,
    pub slot: ValueSlot,
    pub is_valid: bool,
    pub validation_errors: Vec<FieldError>,
    pub version: i64,
    pub is_current: bool,
    pub effective_from: Timestamp,
    pub effective_to: Option<Timestamp>,
    pub superseded_by: Option<Id>,
    pub value_hash: String,
    pub is_active: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub created_by: ActorId,
    pub updated_by: ActorId,
}

impl ValueRecord {
    pub fn pair(&self) -> ValuePair {
        ValuePair {
            partition: self.partition,
            owner_entity_id: self.owner_entity_id,
            attribute_id: self.attribute_id,
        }
    }

    pub fn value(&self) -> Option<&TypedValue> {
        self.slot.value()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    InitialVersion,
    NewVersion,
    NoOp,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WriteOutcome {
    pub value: ValueRecord,
    pub change: ChangeKind,
}
