use serde_json::Value;
use std::io;

/// Write output as CSV to stdout.
///
/// Scenario reports become one row per step; anything else a field/value list.
pub fn print_csv(value: &Value) {
    let stdout = io::stdout();
    let mut wtr = csv::Writer::from_writer(stdout.lock());

    let result = value.get("result").unwrap_or(value);
    if let Some(Value::Array(steps)) = result.get("steps") {
        let _ = wtr.write_record(["index", "at", "action", "ok", "error_kind", "error"]);
        for step in steps {
            let cell = |pointer: &str| step.pointer(pointer).map(format_csv_value).unwrap_or_default();
            let _ = wtr.write_record([
                cell("/index"),
                cell("/at"),
                cell("/action"),
                cell("/ok"),
                cell("/error/kind"),
                cell("/error/message"),
            ]);
        }
    } else if let Value::Object(map) = result {
        let _ = wtr.write_record(["field", "value"]);
        for (key, val) in map {
            let _ = wtr.write_record([key.as_str(), &format_csv_value(val)]);
        }
    } else {
        let _ = wtr.write_record([&format_csv_value(result)]);
    }

    let _ = wtr.flush();
}

fn format_csv_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}
