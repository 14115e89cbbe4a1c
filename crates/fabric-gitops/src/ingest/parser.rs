use serde::Deserialize;
use serde_json::Value;

/// Parses a multi-document YAML stream. Empty documents (a bare `---` or a
/// trailing separator) are dropped. A syntax error anywhere fails the whole
/// stream, since the document boundaries after it cannot be trusted.
pub fn parse_stream(content: &str) -> Result<Vec<Value>, String> {
    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(content) {
        let value = Value::deserialize(document).map_err(|e| e.to_string())?;
        if !value.is_null() {
            documents.push(value);
        }
    }
    Ok(documents)
}
