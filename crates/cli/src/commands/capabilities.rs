use feedloop_agent::capabilities::catalog;
use serde_json::Value;

pub fn run(json: bool) -> String {
    let definitions = catalog();
    if json {
        return serde_json::to_string_pretty(&definitions)
            .unwrap_or_else(|error| format!("failed to serialize capabilities: {error}"));
    }

    let mut lines = vec![format!("{} capabilities available:", definitions.len())];
    for definition in &definitions {
        lines.push(format!("- {}: {}", definition.name, definition.description));
        for (name, schema) in definition.parameters["properties"].as_object().into_iter().flatten() {
            let required = is_required(&definition.parameters, name);
            lines.push(format!(
                "    {name} ({}{})",
                type_label(schema),
                if required { ", required" } else { "" }
            ));
        }
    }
    lines.join("\n")
}

fn is_required(schema: &Value, field: &str) -> bool {
    schema["required"]
        .as_array()
        .is_some_and(|required| required.iter().any(|name| name.as_str() == Some(field)))
}

fn type_label(schema: &Value) -> String {
    match (schema["type"].as_str(), schema["enum"].as_array()) {
        (_, Some(values)) => {
            let values: Vec<&str> = values.iter().filter_map(Value::as_str).collect();
            format!("one of {}", values.join("|"))
        }
        (Some("array"), _) => match schema["items"]["type"].as_str() {
            Some("object") => "list of records".to_string(),
            Some(item) => format!("list of {item}"),
            None => "list".to_string(),
        },
        (Some(kind), _) => kind.to_string(),
        (None, _) => "any".to_string(),
    }
}
