use std::collections::HashMap;

use ordered_float::OrderedFloat;

/// A single attribute value carried by published properties, customization
/// maps, and auto-configured dependency values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PropertyValue {
    Str(String),
    Bool(bool),
    Int(i64),
    Float(OrderedFloat<f64>),
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Str(value.into())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Str(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Float(OrderedFloat(value))
    }
}

/// The attributes a component publishes along with its service.
pub type Properties = HashMap<String, PropertyValue>;

/// Dependency customization map optionally returned by an `init` callback.
///
/// Entries of the form `<name>.filter` and `<name>.required` are applied to
/// the named dependency before it is built and starts tracking, which lets a
/// component's own runtime state (loaded configuration, for example)
/// parameterize a dependency's selection filter or required-ness. Entries
/// that name no declared dependency, carry an unrecognized suffix, or carry
/// an unexpected value type are ignored with a warning and the original
/// dependency attribute is retained.
#[derive(Clone, Debug, Default)]
pub struct Customization(HashMap<String, PropertyValue>);

impl Customization {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Later entries win over identically-keyed earlier ones, matching the
    /// order composition instances are invoked in.
    pub fn merge(&mut self, other: Customization) {
        self.0.extend(other.0);
    }

    /// The `<name>.filter` override, if present and well formed.
    pub fn filter_for(&self, name: &str) -> Option<String> {
        match self.0.get(&format!("{name}.filter")) {
            None => None,
            Some(PropertyValue::Str(filter)) => Some(filter.clone()),
            Some(other) => {
                tracing::warn!(
                    "ignoring malformed filter customization for dependency '{name}': {other:?}"
                );
                None
            }
        }
    }

    /// The `<name>.required` override, if present and well formed. The string
    /// values `"true"` and `"false"` are accepted alongside booleans, for
    /// customization maps assembled from raw configuration.
    pub fn required_for(&self, name: &str) -> Option<bool> {
        match self.0.get(&format!("{name}.required")) {
            None => None,
            Some(PropertyValue::Bool(required)) => Some(*required),
            Some(PropertyValue::Str(s)) if s == "true" => Some(true),
            Some(PropertyValue::Str(s)) if s == "false" => Some(false),
            Some(other) => {
                tracing::warn!(
                    "ignoring malformed required customization for dependency '{name}': {other:?}"
                );
                None
            }
        }
    }

    /// The dependency names this map refers to, for reporting entries that
    /// match no declared dependency. Keys without a recognized suffix are
    /// logged and skipped.
    pub fn referenced_names(&self) -> Vec<String> {
        let mut names = vec![];
        for key in self.0.keys() {
            let name = key
                .strip_suffix(".filter")
                .or_else(|| key.strip_suffix(".required"));
            match name {
                Some(name) if !name.is_empty() => {
                    if !names.iter().any(|n| n == name) {
                        names.push(name.to_string());
                    }
                }
                _ => tracing::warn!("ignoring unrecognized customization key '{key}'"),
            }
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_overrides_are_returned() {
        let mut c = Customization::new();
        c.set("storage.filter", "(region=eu)");
        c.set("storage.required", false);
        assert_eq!(c.filter_for("storage"), Some("(region=eu)".into()));
        assert_eq!(c.required_for("storage"), Some(false));
        assert_eq!(c.referenced_names(), vec!["storage".to_string()]);
    }

    #[test]
    fn string_encoded_required_is_accepted() {
        let mut c = Customization::new();
        c.set("cache.required", "true");
        assert_eq!(c.required_for("cache"), Some(true));
    }

    #[test]
    fn malformed_entries_are_ignored() {
        let mut c = Customization::new();
        c.set("storage.filter", 42i64);
        c.set("storage.required", "maybe");
        assert_eq!(c.filter_for("storage"), None);
        assert_eq!(c.required_for("storage"), None);
    }

    #[test]
    fn merge_prefers_later_entries() {
        let mut base = Customization::new();
        base.set("db.required", true);
        let mut extra = Customization::new();
        extra.set("db.required", false);
        base.merge(extra);
        assert_eq!(base.required_for("db"), Some(false));
    }
}
