use crate::domain::Record;
use crate::util::normalize::normalize_key;

/// Columns the backend fills in itself, compared after key folding so that
/// `CreatedAt`, `created_at` and `Created-At` are all recognized.
const AUTO_FIELDS: [&str; 7] = [
    "createdat",
    "createdat1",
    "updatedat",
    "updatedat1",
    "createdby",
    "updatedby",
    "rowid",
];

pub fn is_auto_field(key: &str) -> bool {
    AUTO_FIELDS.contains(&normalize_key(key).as_str())
}

/// Payload for a create: no key-like field and no auto-managed field.
pub fn for_create<S: AsRef<str>>(rec: &Record, key_fields: &[S]) -> Record {
    let mut out = Record::new();
    for (k, v) in rec.iter() {
        if key_fields.iter().any(|kf| kf.as_ref() == k) || is_auto_field(k) {
            continue;
        }
        out.insert(k.clone(), v.clone());
    }
    out
}

/// Payload for an update: keeps `key` (even if it folds like an auto field),
/// drops the other key aliases and every auto-managed field.
pub fn for_update<S: AsRef<str>>(rec: &Record, key: &str, key_fields: &[S]) -> Record {
    let mut out = Record::new();
    for (k, v) in rec.iter() {
        if k == key {
            out.insert(k.clone(), v.clone());
            continue;
        }
        if key_fields.iter().any(|kf| kf.as_ref() == k) || is_auto_field(k) {
            continue;
        }
        out.insert(k.clone(), v.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DEFAULT_KEY_FIELDS;
    use serde_json::json;

    #[test]
    fn create_strips_key_and_timestamps() {
        let rec = Record::from_value(json!({"Nome": "X", "CreatedAt": "now", "Id": 5})).unwrap();
        let out = for_create(&rec, &DEFAULT_KEY_FIELDS);
        assert_eq!(out, Record::from_value(json!({"Nome": "X"})).unwrap());
    }

    #[test]
    fn snake_case_auto_fields_are_recognized() {
        for k in ["created_at", "UpdatedAt1", "updated_by", "RowId"] {
            assert!(is_auto_field(k), "{k}");
        }
        assert!(!is_auto_field("CreatedFor"));
    }

    #[test]
    fn update_keeps_only_the_chosen_key() {
        let rec = Record::from_value(json!({
            "Id": 3, "id": 3, "Nome": "Y", "UpdatedAt": "x", "row_id": 9
        }))
        .unwrap();
        let out = for_update(&rec, "Id", &DEFAULT_KEY_FIELDS);
        assert_eq!(out, Record::from_value(json!({"Id": 3, "Nome": "Y"})).unwrap());

        let by_row = for_update(&rec, "row_id", &DEFAULT_KEY_FIELDS);
        assert_eq!(by_row, Record::from_value(json!({"Nome": "Y", "row_id": 9})).unwrap());
    }
}
