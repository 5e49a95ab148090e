use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Relation kinds that make up a schema's structure.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Table,
    Sequence,
    View,
    MaterializedView,
    ForeignTable,
}

impl ObjectKind {
    /// Maps `pg_class.relkind`. Indexes, composite types and toast tables are not tracked.
    pub fn from_relkind(relkind: &str) -> Option<Self> {
        match relkind {
            "r" | "p" => Some(Self::Table),
            "S" => Some(Self::Sequence),
            "v" => Some(Self::View),
            "m" => Some(Self::MaterializedView),
            "f" => Some(Self::ForeignTable),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchemaObject {
    pub kind: ObjectKind,
    pub name: String,
}

/// The structural objects present in one schema.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct SchemaObjects {
    pub objects: BTreeSet<SchemaObject>,
}

impl SchemaObjects {
    pub fn insert(&mut self, kind: ObjectKind, name: impl Into<String>) {
        self.objects.insert(SchemaObject {
            kind,
            name: name.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn count(&self, kind: ObjectKind) -> usize {
        self.objects.iter().filter(|o| o.kind == kind).count()
    }

    pub fn names(&self, kind: ObjectKind) -> Vec<&str> {
        self.objects
            .iter()
            .filter(|o| o.kind == kind)
            .map(|o| o.name.as_str())
            .collect()
    }

    /// Number of objects from `other` that are also present here.
    pub fn overlap(&self, other: &SchemaObjects) -> usize {
        other.objects.intersection(&self.objects).count()
    }

    pub fn union(&self, other: &SchemaObjects) -> SchemaObjects {
        SchemaObjects {
            objects: self.objects.union(&other.objects).cloned().collect(),
        }
    }

    /// Objects in `expected` but not here, and objects here but not in `expected`.
    pub fn diff(&self, expected: &SchemaObjects) -> (Vec<String>, Vec<String>) {
        let describe = |o: &SchemaObject| format!("{:?} {}", o.kind, o.name);
        let missing = expected
            .objects
            .difference(&self.objects)
            .map(describe)
            .collect();
        let unexpected = self
            .objects
            .difference(&expected.objects)
            .map(describe)
            .collect();
        (missing, unexpected)
    }
}
