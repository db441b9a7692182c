use serde_json::Value;

use crate::domain::{Page, PageInfo, Record};

/// Checked in this order; the first key holding an array or a wrapper wins.
pub const WRAPPER_KEYS: [&str; 5] = ["list", "rows", "data", "items", "results"];

pub fn extract_records(body: &Value) -> Vec<Record> {
    match locate(body, 0) {
        Some(items) => collect(items),
        None => {
            if !body.is_null() {
                tracing::warn!(shape = %describe(body), "unrecognized list shape; treating as empty");
            }
            Vec::new()
        }
    }
}

pub fn extract_page(body: &Value) -> Page {
    Page {
        records: extract_records(body),
        page_info: extract_page_info(body),
    }
}

pub fn extract_page_info(body: &Value) -> Option<PageInfo> {
    let raw = body.get("pageInfo")?;
    match serde_json::from_value(raw.clone()) {
        Ok(info) => Some(info),
        Err(e) => {
            tracing::debug!(error = %e, "ignoring malformed pageInfo");
            None
        }
    }
}

fn locate(v: &Value, depth: u8) -> Option<&Vec<Value>> {
    match v {
        Value::Array(items) => Some(items),
        Value::Object(map) => {
            for key in WRAPPER_KEYS {
                match map.get(key) {
                    Some(Value::Array(items)) => return Some(items),
                    Some(inner @ Value::Object(_)) if depth == 0 => {
                        if let Some(items) = locate(inner, 1) {
                            return Some(items);
                        }
                    }
                    _ => {}
                }
            }
            None
        }
        _ => None,
    }
}

fn collect(items: &[Value]) -> Vec<Record> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match Record::from_value(item.clone()) {
            Some(r) => out.push(r),
            None => tracing::debug!(item = %describe(item), "skipping non-object list element"),
        }
    }
    out
}

fn describe(v: &Value) -> String {
    match v {
        Value::Object(map) => {
            let keys: Vec<&str> = map.keys().map(String::as_str).take(8).collect();
            format!("object{{{}}}", keys.join(","))
        }
        Value::Array(a) => format!("array[{}]", a.len()),
        Value::String(_) => "string".into(),
        Value::Number(_) => "number".into(),
        Value::Bool(_) => "bool".into(),
        Value::Null => "null".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids(records: &[Record]) -> Vec<i64> {
        records
            .iter()
            .filter_map(|r| r.get("Id").and_then(Value::as_i64))
            .collect()
    }

    #[test]
    fn every_supported_shape_yields_the_same_records() {
        let rows = json!([{"Id": 1}, {"Id": 2}]);
        let shapes = [
            rows.clone(),
            json!({"list": rows}),
            json!({"rows": rows}),
            json!({"data": rows}),
            json!({"items": rows}),
            json!({"results": rows}),
            json!({"data": {"list": rows}}),
            json!({"list": {"rows": rows}}),
        ];
        for shape in shapes {
            assert_eq!(ids(&extract_records(&shape)), vec![1, 2], "{shape}");
        }
    }

    #[test]
    fn priority_order_is_fixed() {
        let body = json!({"data": [{"Id": 9}], "list": [{"Id": 1}]});
        assert_eq!(ids(&extract_records(&body)), vec![1]);
    }

    #[test]
    fn only_one_level_of_nesting_is_followed() {
        let body = json!({"data": {"data": {"list": [{"Id": 1}]}}});
        assert!(extract_records(&body).is_empty());
    }

    #[test]
    fn unknown_shapes_degrade_to_empty() {
        for body in [json!({"msg": "ok"}), json!("text"), json!(3), Value::Null] {
            assert!(extract_records(&body).is_empty());
        }
    }

    #[test]
    fn non_object_elements_are_skipped() {
        let body = json!({"list": [{"Id": 1}, 7, null, {"Id": 2}]});
        assert_eq!(ids(&extract_records(&body)), vec![1, 2]);
    }

    #[test]
    fn page_info_is_read_when_present() {
        let body = json!({
            "list": [],
            "pageInfo": {"totalRows": 40, "page": 2, "pageSize": 25, "isLastPage": true}
        });
        let page = extract_page(&body);
        let info = page.page_info.unwrap();
        assert_eq!(info.total_rows, Some(40));
        assert_eq!(info.is_last_page, Some(true));
    }
}
