use serde::{Deserialize, Serialize};

use crate::equality::values_equal;
use crate::{
    ActorId, FieldError, Id, PartitionId, Timestamp, ValuePair, ValueRecord, ValueSlot,
};

/// Snapshot of a chain as read inside the write transaction.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChainHead {
    pub current: Option<ValueRecord>,
    /// Highest version ever written for the pair; survives soft-deletes.
    pub last_version: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum WritePlan {
    Insert { version: i64 },
    Supersede { previous: ValueRecord, version: i64 },
    Unchanged(ValueRecord),
}

/// A validated value ready to become a row once the version manager assigns its version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewValue {
    pub partition: PartitionId,
    pub owner_entity_id: Id,
    pub attribute_id: Id,
    pub assignment_id: Id,
    pub slot: ValueSlot,
    pub is_valid: bool,
    pub validation_errors: Vec<FieldError>,
    pub actor: ActorId,
}

impl NewValue {
    pub fn pair(&self) -> ValuePair {
        ValuePair {
            partition: self.partition,
            owner_entity_id: self.owner_entity_id,
            attribute_id: self.attribute_id,
        }
    }

    pub fn into_record(self, version: i64, now: Timestamp) -> ValueRecord {
        let value_hash = self.slot.content_hash();
        ValueRecord {
            value_id: Id::new(),
            partition: self.partition,
            owner_entity_id: self.owner_entity_id,
            attribute_id: self.attribute_id,
            assignment_id: self.assignment_id,
            data_type: self.slot.data_type(),
            slot: self.slot,
            is_valid: self.is_valid,
            validation_errors: self.validation_errors,
            version,
            is_current: true,
            effective_from: now,
            effective_to: None,
            superseded_by: None,
            value_hash,
            is_active: true,
            created_at: now,
            updated_at: now,
            created_by: self.actor,
            updated_by: self.actor,
        }
    }
}

/// Decides between an initial insert, a successor version, or a no-op.
/// A resubmission is a no-op only when content, assignment and validity all match the
/// current row, so a re-validation under changed rules still records a version.
pub fn plan_write(head: &ChainHead, candidate: &NewValue) -> WritePlan {
    let next = head.last_version + 1;
    match &head.current {
        None => WritePlan::Insert { version: next },
        Some(current) => {
            let unchanged = slots_equal(&current.slot, &candidate.slot)
                && current.assignment_id == candidate.assignment_id
                && current.is_valid == candidate.is_valid;
            if unchanged {
                WritePlan::Unchanged(current.clone())
            } else {
                WritePlan::Supersede {
                    previous: current.clone(),
                    version: next.max(current.version + 1),
                }
            }
        }
    }
}

pub fn slots_equal(left: &ValueSlot, right: &ValueSlot) -> bool {
    match (left, right) {
        (ValueSlot::Set { value: a }, ValueSlot::Set { value: b }) => values_equal(a, b),
        (ValueSlot::ClearedReference, ValueSlot::ClearedReference) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::{ChainHead, NewValue, WritePlan, plan_write};
    use crate::{ActorId, Id, PartitionId, Timestamp, TypedValue, ValueSlot};

    fn candidate(value: i64) -> NewValue {
        NewValue {
            partition: PartitionId(Id::from_bytes([1; 16])),
            owner_entity_id: Id::from_bytes([2; 16]),
            attribute_id: Id::from_bytes([3; 16]),
            assignment_id: Id::from_bytes([4; 16]),
            slot: ValueSlot::set(TypedValue::Integer(value)),
            is_valid: true,
            validation_errors: Vec::new(),
            actor: ActorId(Id::from_bytes([5; 16])),
        }
    }

    #[test]
    fn empty_chain_starts_at_version_one() {
        let plan = plan_write(&ChainHead::default(), &candidate(10));
        assert_eq!(plan, WritePlan::Insert { version: 1 });
    }

    #[test]
    fn changed_content_supersedes_and_equal_content_is_noop() {
        let current = candidate(10).into_record(1, Timestamp(100));
        let head = ChainHead {
            current: Some(current.clone()),
            last_version: 1,
        };
        match plan_write(&head, &candidate(20)) {
            WritePlan::Supersede { previous, version } => {
                assert_eq!(previous.value_id, current.value_id);
                assert_eq!(version, 2);
            }
            other => panic!("unexpected plan {other:?}"),
        }
        assert_eq!(
            plan_write(&head, &candidate(10)),
            WritePlan::Unchanged(current)
        );
    }

    #[test]
    fn deleted_chain_continues_numbering() {
        let head = ChainHead {
            current: None,
            last_version: 4,
        };
        assert_eq!(
            plan_write(&head, &candidate(1)),
            WritePlan::Insert { version: 5 }
        );
    }

    #[test]
    fn new_record_is_current_with_open_interval() {
        let record = candidate(7).into_record(3, Timestamp(42));
        assert!(record.is_current && record.is_active);
        assert_eq!(record.effective_from, Timestamp(42));
        assert!(record.effective_to.is_none() && record.superseded_by.is_none());
        assert_eq!(record.version, 3);
        assert!(!record.value_hash.is_empty());
    }
}
