use std::fmt;
use std::marker::PhantomData;

use cubeclash_protocol::{EntityId, FieldValue, ReplicatedField, Rotation, Vec3};

/// A value type that can travel in a replicated update.
pub trait Replicate: Copy {
    fn into_value(self) -> FieldValue;
    fn from_value(value: FieldValue) -> Option<Self>;
}

impl Replicate for Vec3 {
    fn into_value(self) -> FieldValue {
        FieldValue::Vec3(self)
    }

    fn from_value(value: FieldValue) -> Option<Self> {
        match value {
            FieldValue::Vec3(v) => Some(v),
            _ => None,
        }
    }
}

impl Replicate for Rotation {
    fn into_value(self) -> FieldValue {
        FieldValue::Rotation(self)
    }

    fn from_value(value: FieldValue) -> Option<Self> {
        match value {
            FieldValue::Rotation(r) => Some(r),
            _ => None,
        }
    }
}

/// Typed handle to one declared field.
///
/// The handle holds no value; reads and writes go through the
/// [`ReplicationChannel`](crate::ReplicationChannel) that issued it.
pub struct ReplicatedVariable<T> {
    entity: EntityId,
    field: ReplicatedField,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ReplicatedVariable<T> {
    pub(crate) fn new(entity: EntityId, field: ReplicatedField) -> Self {
        Self {
            entity,
            field,
            _marker: PhantomData,
        }
    }

    pub fn entity(&self) -> EntityId {
        self.entity
    }

    pub fn field(&self) -> ReplicatedField {
        self.field
    }
}

impl<T> Clone for ReplicatedVariable<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ReplicatedVariable<T> {}

impl<T> PartialEq for ReplicatedVariable<T> {
    fn eq(&self, other: &Self) -> bool {
        self.entity == other.entity && self.field == other.field
    }
}

impl<T> Eq for ReplicatedVariable<T> {}

impl<T> fmt::Debug for ReplicatedVariable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReplicatedVariable({} {})", self.entity, self.field)
    }
}
