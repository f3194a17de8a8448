use serde_json::{Map, Value};
use tabled::{builder::Builder, Table};

const STEP_COLUMNS: [&str; 5] = ["index", "at", "action", "ok", "error"];
const POOL_COLUMNS: [&str; 8] = [
    "pool",
    "state",
    "reserve",
    "loans_nav",
    "pool_value",
    "senior_debt",
    "senior_price",
    "junior_price",
];

/// Render calculator output as a field table, scenario reports as step and pool tables.
pub fn print_table(value: &Value) {
    let Value::Object(map) = value else {
        println!("{}", value);
        return;
    };

    match map.get("result") {
        Some(Value::Object(result)) if result.contains_key("steps") => {
            print_report(result);
            print_envelope(map);
        }
        Some(Value::Object(result)) => {
            print_fields(result);
            print_envelope(map);
        }
        _ => print_fields(map),
    }
}

fn print_report(report: &Map<String, Value>) {
    if let Some(Value::Array(steps)) = report.get("steps") {
        let rows = steps.iter().map(|step| {
            STEP_COLUMNS
                .iter()
                .map(|col| match *col {
                    "error" => step
                        .pointer("/error/message")
                        .map(format_value)
                        .unwrap_or_default(),
                    _ => step.get(*col).map(format_value).unwrap_or_default(),
                })
                .collect::<Vec<_>>()
        });
        print_rows(&STEP_COLUMNS, rows);
    }

    if let Some(Value::Array(pools)) = report.get("pools") {
        println!();
        let rows = pools.iter().map(|pool| {
            POOL_COLUMNS
                .iter()
                .map(|col| pool.get(*col).map(format_value).unwrap_or_default())
                .collect::<Vec<_>>()
        });
        print_rows(&POOL_COLUMNS, rows);
    }

    if let Some(failed) = report.get("failed_steps") {
        println!("\nFailed steps: {}", format_value(failed));
    }
}

fn print_rows(headers: &[&str], rows: impl Iterator<Item = Vec<String>>) {
    let mut builder = Builder::default();
    builder.push_record(headers.iter().copied());
    for row in rows {
        builder.push_record(row);
    }
    println!("{}", Table::from(builder));
}

fn print_fields(map: &Map<String, Value>) {
    let mut builder = Builder::default();
    builder.push_record(["Field", "Value"]);
    for (key, val) in map {
        builder.push_record([key.as_str(), &format_value(val)]);
    }
    println!("{}", Table::from(builder));
}

fn print_envelope(envelope: &Map<String, Value>) {
    if let Some(Value::Array(warnings)) = envelope.get("warnings") {
        if !warnings.is_empty() {
            println!("\nWarnings:");
            for w in warnings.iter().filter_map(Value::as_str) {
                println!("  - {}", w);
            }
        }
    }
    if let Some(Value::String(meth)) = envelope.get("methodology") {
        println!("\nMethodology: {}", meth);
    }
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        Value::Array(arr) => arr.iter().map(format_value).collect::<Vec<_>>().join(", "),
        Value::Object(_) => serde_json::to_string(value).unwrap_or_default(),
    }
}
