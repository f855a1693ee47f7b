use serde::Deserialize;
use serde_json::Value as JsonValue;

/// Declarative request-shape filter loaded from a
/// `shape-filters.<profile>.json` file.
///
/// Paths are dot-separated; a `[]` segment maps the rule over every element
/// of an array (`tools.[].function.strict`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShapeFilter {
    #[serde(default)]
    pub remove: Vec<String>,
    #[serde(default)]
    pub rename: Vec<RenameRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenameRule {
    pub from: String,
    pub to: String,
}

impl ShapeFilter {
    pub fn file_name(profile: &str) -> String {
        format!("shape-filters.{profile}.json")
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn apply(&self, body: &mut JsonValue) {
        for path in &self.remove {
            let segments: Vec<&str> = path.split('.').collect();
            remove_path(body, &segments);
        }
        for rule in &self.rename {
            let segments: Vec<&str> = rule.from.split('.').collect();
            rename_path(body, &segments, &rule.to);
        }
    }
}

fn remove_path(value: &mut JsonValue, segments: &[&str]) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    if *head == "[]" {
        if let JsonValue::Array(items) = value {
            for item in items {
                remove_path(item, rest);
            }
        }
        return;
    }
    let JsonValue::Object(map) = value else {
        return;
    };
    if rest.is_empty() {
        map.remove(*head);
    } else if let Some(child) = map.get_mut(*head) {
        remove_path(child, rest);
    }
}

fn rename_path(value: &mut JsonValue, segments: &[&str], to: &str) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    if *head == "[]" {
        if let JsonValue::Array(items) = value {
            for item in items {
                rename_path(item, rest, to);
            }
        }
        return;
    }
    let JsonValue::Object(map) = value else {
        return;
    };
    if rest.is_empty() {
        if let Some(moved) = map.remove(*head) {
            map.insert(to.to_string(), moved);
        }
    } else if let Some(child) = map.get_mut(*head) {
        rename_path(child, rest, to);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn removes_nested_and_array_paths() {
        let filter = ShapeFilter::from_json(
            r#"{"remove": ["metadata", "tools.[].function.strict"]}"#,
        )
        .unwrap();
        let mut body = json!({
            "metadata": {"x": 1},
            "tools": [
                {"function": {"name": "a", "strict": true}},
                {"function": {"name": "b", "strict": false}}
            ]
        });
        filter.apply(&mut body);
        assert!(body.get("metadata").is_none());
        assert!(body["tools"][0]["function"].get("strict").is_none());
        assert!(body["tools"][1]["function"].get("strict").is_none());
    }

    #[test]
    fn renames_top_level_fields() {
        let filter =
            ShapeFilter::from_json(r#"{"rename": [{"from": "max_tokens", "to": "max_output_tokens"}]}"#)
                .unwrap();
        let mut body = json!({"max_tokens": 10});
        filter.apply(&mut body);
        assert_eq!(body["max_output_tokens"], 10);
        assert!(body.get("max_tokens").is_none());
    }
}
