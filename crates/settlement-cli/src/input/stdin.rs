use serde::de::DeserializeOwned;
use std::io::{self, Read};

/// Deserialize piped stdin as JSON, or YAML when it is not valid JSON.
/// Returns None when stdin is interactive or empty.
pub fn read_stdin<T: DeserializeOwned>() -> Result<Option<T>, Box<dyn std::error::Error>> {
    if atty::is(atty::Stream::Stdin) {
        return Ok(None);
    }

    let mut buffer = String::new();
    io::stdin().read_to_string(&mut buffer)?;

    let trimmed = buffer.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    match serde_json::from_str(trimmed) {
        Ok(value) => Ok(Some(value)),
        Err(json_err) => serde_yaml::from_str(trimmed)
            .map(Some)
            .map_err(|yaml_err| format!("stdin is neither JSON ({json_err}) nor YAML ({yaml_err})").into()),
    }
}
