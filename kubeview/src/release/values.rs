//! Release values: a YAML document overlaid with `--set` style assignments

use crate::Error;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Parses `yaml` and applies each assignment in `sets` in order
///
/// Each set is a comma-separated list of `dotted.path=value` assignments. Later assignments
/// replace earlier ones, and any assignment replaces the YAML value at the same path.
pub fn merge<S: AsRef<str>>(yaml: &str, sets: &[S]) -> Result<Value, Error> {
    let mut values = parse_yaml(yaml)?;
    for set in sets {
        for assignment in split_assignments(set.as_ref()) {
            let (path, value) = parse_assignment(assignment)?;
            insert(&mut values, &path, value);
        }
    }
    Ok(values)
}

fn parse_yaml(yaml: &str) -> Result<Value, Error> {
    if yaml.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    let de = serde_yaml::Deserializer::from_str(yaml);
    let value = Value::deserialize(de)
        .map_err(|error| Error::BadRequest(format!("invalid values: {error}")))?;
    match value {
        Value::Null => Ok(Value::Object(Map::new())),
        Value::Object(_) => Ok(value),
        _ => Err(Error::BadRequest("values must be a mapping".to_string())),
    }
}

/// Splits on commas not preceded by a backslash
fn split_assignments(set: &str) -> impl Iterator<Item = &str> {
    let mut start = 0;
    let mut escaped = false;
    let mut parts = Vec::new();
    for (i, c) in set.char_indices() {
        match c {
            '\\' => escaped = !escaped,
            ',' if !escaped => {
                parts.push(&set[start..i]);
                start = i + 1;
            }
            _ => escaped = false,
        }
    }
    parts.push(&set[start..]);
    parts.into_iter().filter(|p| !p.trim().is_empty())
}

fn parse_assignment(assignment: &str) -> Result<(Vec<String>, Value), Error> {
    let (key, raw) = assignment.split_once('=').ok_or_else(|| {
        Error::BadRequest(format!("invalid set {assignment:?}: expected KEY=VALUE"))
    })?;
    let path = key
        .trim()
        .split('.')
        .map(str::to_string)
        .collect::<Vec<_>>();
    if path.iter().any(String::is_empty) {
        return Err(Error::BadRequest(format!("invalid set key {key:?}")));
    }
    Ok((path, scalar(&raw.replace("\\,", ","))))
}

/// Types a raw value the way the Helm CLI does
fn scalar(raw: &str) -> Value {
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        _ => match raw.parse::<i64>() {
            Ok(n) => Value::from(n),
            Err(_) => Value::String(raw.to_string()),
        },
    }
}

fn insert(values: &mut Value, path: &[String], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut node = values;
    for key in parents {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let Value::Object(map) = node else {
            return;
        };
        node = map
            .entry(key.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        map.insert(last.clone(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sets_override_yaml() {
        let yaml = "image:\n  tag: v1\n  pullPolicy: Always\nreplicas: 1\n";
        let values = merge(yaml, &["image.tag=v2", "replicas=3,debug=true"]).unwrap();
        assert_eq!(
            values,
            json!({
                "image": { "tag": "v2", "pullPolicy": "Always" },
                "replicas": 3,
                "debug": true,
            })
        );
    }

    #[test]
    fn last_set_wins() {
        let values = merge("", &["a.b=1", "a.b=two", "a.c=null"]).unwrap();
        assert_eq!(values, json!({ "a": { "b": "two", "c": null } }));
    }

    #[test]
    fn scalars_are_replaced_by_nested_paths() {
        let values = merge("a: 1\n", &["a.b=x"]).unwrap();
        assert_eq!(values, json!({ "a": { "b": "x" } }));
    }

    #[test]
    fn escaped_commas_stay_in_values() {
        let values = merge("", &[r"hosts=a\,b"]).unwrap();
        assert_eq!(values, json!({ "hosts": "a,b" }));
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(merge("- a\n- b\n", &[] as &[&str]).unwrap_err().kind(), "bad-request");
        assert_eq!(merge("", &["novalue"]).unwrap_err().kind(), "bad-request");
        assert_eq!(merge("", &["a..b=1"]).unwrap_err().kind(), "bad-request");
    }
}
