use k8s_openapi::{
    apimachinery::pkg::apis::meta::v1::Time,
    jiff::Timestamp,
};
use std::{cmp::Ordering, fmt};

/// A property rows may expose to filtering and sorting
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Property {
    Name,
    Namespace,
    CreationTimestamp,
    Status,
    Type,
    Unused,
    NodeName,
    StorageClass,
    Phase,
    Reason,
    Chart,
    Version,
}

/// A typed property value
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    Str(String),
    Bool(bool),
    Int(i64),
    Time(Timestamp),
}

/// The properties of a single row, computed once per row
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Properties(Vec<(Property, Value)>);

/// Projects a row into its properties
pub trait Describe {
    fn describe(&self) -> Properties;
}

// === impl Property ===

impl Property {
    const ALL: [Property; 12] = [
        Self::Name,
        Self::Namespace,
        Self::CreationTimestamp,
        Self::Status,
        Self::Type,
        Self::Unused,
        Self::NodeName,
        Self::StorageClass,
        Self::Phase,
        Self::Reason,
        Self::Chart,
        Self::Version,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Namespace => "namespace",
            Self::CreationTimestamp => "creationTimestamp",
            Self::Status => "status",
            Self::Type => "type",
            Self::Unused => "unused",
            Self::NodeName => "nodeName",
            Self::StorageClass => "storageClass",
            Self::Phase => "phase",
            Self::Reason => "reason",
            Self::Chart => "chart",
            Self::Version => "version",
        }
    }

    /// Looks up a property by its wire name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == name)
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl Value ===

impl Value {
    /// Tests a filter value against this property value
    ///
    /// Strings match on case-insensitive substring; other types must be equal.
    pub(super) fn matches(&self, needle: &str) -> bool {
        match self {
            Self::Str(s) => s.to_lowercase().contains(&needle.to_lowercase()),
            Self::Bool(b) => needle.parse::<bool>().is_ok_and(|n| n == *b),
            Self::Int(i) => needle.parse::<i64>().is_ok_and(|n| n == *i),
            Self::Time(t) => needle.parse::<Timestamp>().is_ok_and(|n| n == *t),
        }
    }

    /// Orders values of the same type; values of different types compare equal
    pub(super) fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Time(a), Self::Time(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<Timestamp> for Value {
    fn from(t: Timestamp) -> Self {
        Self::Time(t)
    }
}

impl From<&Time> for Value {
    fn from(t: &Time) -> Self {
        Self::Time(t.0)
    }
}

// === impl Properties ===

impl Properties {
    /// Starts from the name, namespace and creation timestamp of a view
    pub fn of_meta(meta: &crate::meta::ObjectMeta) -> Self {
        Self::default()
            .with(Property::Name, meta.name.as_str())
            .with_opt(Property::Namespace, meta.namespace.as_deref())
            .with_opt(Property::CreationTimestamp, meta.creation_timestamp.as_ref())
    }

    pub fn with(mut self, property: Property, value: impl Into<Value>) -> Self {
        let value = value.into();
        match self.0.iter_mut().find(|(p, _)| *p == property) {
            Some((_, v)) => *v = value,
            None => self.0.push((property, value)),
        }
        self
    }

    pub fn with_opt<V: Into<Value>>(self, property: Property, value: Option<V>) -> Self {
        match value {
            Some(v) => self.with(property, v),
            None => self,
        }
    }

    pub fn get(&self, property: Property) -> Option<&Value> {
        self.0.iter().find(|(p, _)| *p == property).map(|(_, v)| v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_names_round_trip() {
        for p in Property::ALL {
            assert_eq!(Property::from_name(p.as_str()), Some(p));
        }
        assert_eq!(Property::from_name("colour"), None);
    }

    #[test]
    fn string_filters_are_case_insensitive_substrings() {
        let v = Value::from("Frontend-Web");
        assert!(v.matches("web"));
        assert!(v.matches("FRONT"));
        assert!(!v.matches("db"));
    }

    #[test]
    fn typed_filters_require_equality() {
        assert!(Value::Bool(true).matches("true"));
        assert!(!Value::Bool(true).matches("yes"));
        let t: Timestamp = "2024-05-01T10:00:00Z".parse().unwrap();
        assert!(Value::Time(t).matches("2024-05-01T10:00:00Z"));
        assert!(!Value::Time(t).matches("2024-05-01"));
    }
}
