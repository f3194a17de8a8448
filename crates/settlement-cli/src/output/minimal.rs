use serde_json::Value;

/// Print just the headline value of a command.
pub fn print_minimal(value: &Value) {
    let result = value
        .as_object()
        .and_then(|m| m.get("result"))
        .unwrap_or(value);

    let priority_keys = ["failed_steps", "packed", "interest", "value", "principal"];

    if let Value::Object(map) = result {
        for key in &priority_keys {
            if let Some(val) = map.get(*key).filter(|v| !v.is_null()) {
                println!("{}", format_minimal(val));
                return;
            }
        }
        if let Some((key, val)) = map.iter().next() {
            println!("{}: {}", key, format_minimal(val));
            return;
        }
    }

    println!("{}", format_minimal(result));
}

fn format_minimal(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}
