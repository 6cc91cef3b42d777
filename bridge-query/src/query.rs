use serde_json::{json, Value};

/// Request keys consumed while building the query, plus parameters the relay
/// sets itself; neither may be overridden by passthrough.
const RESERVED: &[&str] = &["q", "type", "count", "offset", "rows", "start", "wt"];

/// Build Solr `/select` parameters from one relay request, or `None` when
/// the request is missing its required shape.
///
/// The database clause `_db:<name>` is always filtered on; `type:<doctype>`
/// joins it when the request names a document type. Remaining query keys
/// pass through untouched.
pub fn build_query(request: &Value) -> Option<Vec<(String, String)>> {
    let database = request.get("db").and_then(Value::as_str)?;
    let search = request.get("query").and_then(Value::as_object)?;
    let query = search.get("q").and_then(Value::as_str)?;

    let mut params = vec![
        ("q".to_owned(), query.to_owned()),
        ("fq".to_owned(), format!("_db:{database}")),
    ];
    if let Some(doctype) = search.get("type").and_then(Value::as_str) {
        params.push(("fq".to_owned(), format!("type:{doctype}")));
    }

    let rows = search.get("count").and_then(Value::as_i64).unwrap_or(25);
    let start = search.get("offset").and_then(Value::as_i64).unwrap_or(0);
    params.push(("rows".to_owned(), rows.to_string()));
    params.push(("start".to_owned(), start.to_string()));
    params.push(("wt".to_owned(), "json".to_owned()));

    for (key, value) in search {
        if RESERVED.contains(&key.as_str()) {
            continue;
        }
        params.push((key.clone(), param_string(value)));
    }
    Some(params)
}

fn param_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Successful relay response: the engine's `response` object under code 200.
pub fn success_response(solr_response: &Value) -> Value {
    json!({
        "code": 200,
        "json": solr_response.get("response").cloned().unwrap_or(Value::Null),
    })
}

pub fn failure_response(detail: &str) -> Value {
    json!({
        "code": 500,
        "body": detail,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param<'a>(params: &'a [(String, String)], key: &str) -> Vec<&'a str> {
        params
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    #[test]
    fn builds_defaults_and_database_filter() {
        let request = serde_json::json!({
            "db": "mydb",
            "query": {"q": "hello"},
        });
        let params = build_query(&request).unwrap();

        assert_eq!(param(&params, "q"), vec!["hello"]);
        assert_eq!(param(&params, "fq"), vec!["_db:mydb"]);
        assert_eq!(param(&params, "rows"), vec!["25"]);
        assert_eq!(param(&params, "start"), vec!["0"]);
        assert_eq!(param(&params, "wt"), vec!["json"]);
    }

    #[test]
    fn doctype_adds_a_filter_clause() {
        let request = serde_json::json!({
            "db": "mydb",
            "query": {"q": "hello", "type": "Article", "count": 5, "offset": 10},
        });
        let params = build_query(&request).unwrap();

        assert_eq!(param(&params, "fq"), vec!["_db:mydb", "type:Article"]);
        assert_eq!(param(&params, "rows"), vec!["5"]);
        assert_eq!(param(&params, "start"), vec!["10"]);
    }

    #[test]
    fn extra_keys_pass_through_without_overriding() {
        let request = serde_json::json!({
            "db": "mydb",
            "query": {"q": "hello", "sort": "date desc", "rows": 9999},
        });
        let params = build_query(&request).unwrap();

        assert_eq!(param(&params, "sort"), vec!["date desc"]);
        // "rows" is reserved; the consumed "count" key governs it.
        assert_eq!(param(&params, "rows"), vec!["25"]);
    }

    #[test]
    fn malformed_requests_are_rejected() {
        assert!(build_query(&serde_json::json!({"query": {"q": "x"}})).is_none());
        assert!(build_query(&serde_json::json!({"db": "mydb"})).is_none());
        assert!(build_query(&serde_json::json!({"db": "mydb", "query": {}})).is_none());
    }

    #[test]
    fn responses_have_the_line_protocol_shape() {
        let engine = serde_json::json!({"response": {"numFound": 1, "docs": []}});
        assert_eq!(
            success_response(&engine),
            serde_json::json!({"code": 200, "json": {"numFound": 1, "docs": []}})
        );
        assert_eq!(
            failure_response("Bad query"),
            serde_json::json!({"code": 500, "body": "Bad query"})
        );
    }
}
