use serde_json::{Map, Value};

use crate::model::Document;

/// Three-way merge of JSON values. Returns `None` when both sides changed
/// the same leaf differently, or one side edited what the other removed.
///
/// Objects merge key by key; anything else (scalars, arrays) is a leaf.
/// Without a base every differing leaf is an overlap.
pub fn merge3(base: Option<&Value>, ours: &Value, theirs: &Value) -> Option<Value> {
    if ours == theirs {
        return Some(ours.clone());
    }
    if base == Some(ours) {
        return Some(theirs.clone());
    }
    if base == Some(theirs) {
        return Some(ours.clone());
    }

    let (Value::Object(ours), Value::Object(theirs)) = (ours, theirs) else {
        return None;
    };
    let base = base.and_then(Value::as_object);

    let mut keys: Vec<&String> = ours.keys().chain(theirs.keys()).collect();
    keys.sort();
    keys.dedup();

    let mut merged = Map::new();
    for key in keys {
        let b = base.and_then(|b| b.get(key));
        match (ours.get(key), theirs.get(key)) {
            (Some(o), Some(t)) => {
                merged.insert(key.clone(), merge3(b, o, t)?);
            }
            (Some(o), None) => match b {
                None => {
                    merged.insert(key.clone(), o.clone());
                }
                // removed on their side, untouched on ours
                Some(b) if b == o => {}
                Some(_) => return None,
            },
            (None, Some(t)) => match b {
                None => {
                    merged.insert(key.clone(), t.clone());
                }
                Some(b) if b == t => {}
                Some(_) => return None,
            },
            (None, None) => {}
        }
    }

    Some(Value::Object(merged))
}

/// Merges two versions of one resource against their common ancestor.
/// Provenance annotations are stripped first since every version carries
/// its own.
pub fn merge_documents(
    base: Option<&Document>,
    ours: &Document,
    theirs: &Document,
    default_namespace: &str,
) -> Option<Document> {
    let strip = |doc: &Document| doc.clone().normalized(default_namespace).to_value();
    let base = base.map(strip);
    let merged = merge3(base.as_ref(), &strip(ours), &strip(theirs))?;
    Document::from_value(merged).ok()
}
