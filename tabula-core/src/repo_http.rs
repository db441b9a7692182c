use std::sync::Arc;

use async_trait::async_trait;
use http::header::{ACCEPT, CONTENT_TYPE, ETAG, IF_NONE_MATCH};
use http::{HeaderName, HeaderValue, Method, StatusCode};
use serde_json::Value;

use crate::config::ClientConfig;
use crate::domain::{ListFetch, ListParams, Page, Record, RecordId, TableId, TableMeta};
use crate::error::{Result, TabulaError};
use crate::repo::TableRepo;
use crate::shape::{extract_page, extract_records};
use crate::transport::{HttpRequest, HttpResponse, Transport};
use crate::util::sanitize;

/// Stateless client for the table store's v2 records API.
pub struct RecordClient {
    cfg: Arc<ClientConfig>,
    transport: Arc<dyn Transport>,
}

impl RecordClient {
    pub fn new(cfg: Arc<ClientConfig>, transport: Arc<dyn Transport>) -> Self {
        Self { cfg, transport }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.cfg
    }

    fn url(&self, segments: &[&str], query: &[(&'static str, String)]) -> Result<String> {
        let mut url = reqwest::Url::parse(&self.cfg.base_url)
            .map_err(|e| TabulaError::Config(format!("base_url {:?}: {e}", self.cfg.base_url)))?;
        {
            let mut segs = url
                .path_segments_mut()
                .map_err(|_| TabulaError::Config("base_url cannot carry a path".into()))?;
            segs.pop_if_empty();
            segs.extend(["api", "v2", "tables"]);
            segs.extend(segments);
        }
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url.to_string())
    }

    fn records_url(&self, table: &TableId, query: &[(&'static str, String)]) -> Result<String> {
        self.url(&[table.as_str(), "records"], query)
    }

    fn record_url(&self, table: &TableId, id: &RecordId) -> Result<String> {
        let id = id.to_string();
        if id.trim().is_empty() {
            return Err(TabulaError::Config("record identifier is empty".into()));
        }
        self.url(&[table.as_str(), "records", id.trim()], &[])
    }

    async fn exchange(
        &self,
        method: Method,
        url: String,
        body: Option<Value>,
        etag: Option<&str>,
    ) -> Result<HttpResponse> {
        let mut req = HttpRequest::new(method, url);
        let name = HeaderName::from_bytes(self.cfg.token_header.as_bytes())
            .map_err(|e| TabulaError::Config(format!("token header: {e}")))?;
        let value = HeaderValue::from_str(&self.cfg.token)
            .map_err(|e| TabulaError::Config(format!("token: {e}")))?;
        req.headers.insert(name, value);
        req.headers
            .insert(ACCEPT, HeaderValue::from_static("application/json"));
        if body.is_some() {
            req.headers
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        if let Some(tag) = etag {
            let v = HeaderValue::from_str(tag)
                .map_err(|e| TabulaError::Config(format!("etag: {e}")))?;
            req.headers.insert(IF_NONE_MATCH, v);
        }
        req.body = body;

        tracing::debug!(method = %req.method, url = %req.url, "table store request");
        let res = self.transport.send(req).await?;
        tracing::debug!(status = res.status.as_u16(), bytes = res.body.len(), "table store response");
        Ok(res)
    }

    fn ensure_success(&self, res: HttpResponse) -> Result<HttpResponse> {
        if res.status.is_success() {
            return Ok(res);
        }
        let body = res.text();
        let body = if body.is_empty() {
            res.status.canonical_reason().unwrap_or_default().to_string()
        } else {
            body
        };
        tracing::warn!(status = res.status.as_u16(), "table store rejected request");
        Err(TabulaError::backend(
            res.status.as_u16(),
            &body,
            self.cfg.body_preview_chars,
        ))
    }

    fn parse_json(res: &HttpResponse) -> Result<Value> {
        if res.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&res.body)?)
    }
}

/// First record of an echo body: an object, or the first element of a batch.
fn echoed_record(body: Value) -> Option<Record> {
    match body {
        Value::Object(map) => Some(Record::from_map(map)),
        Value::Array(_) => extract_records(&body).into_iter().next(),
        _ => None,
    }
}

#[async_trait]
impl TableRepo for RecordClient {
    async fn list_page(&self, table: &TableId, params: &ListParams) -> Result<Page> {
        let url = self.records_url(table, &params.query_pairs())?;
        let res = self.exchange(Method::GET, url, None, None).await?;
        let res = self.ensure_success(res)?;
        let body = Self::parse_json(&res)?;
        Ok(extract_page(&body))
    }

    async fn list_with_etag(
        &self,
        table: &TableId,
        params: &ListParams,
        etag: Option<&str>,
    ) -> Result<ListFetch> {
        let url = self.records_url(table, &params.query_pairs())?;
        let res = self.exchange(Method::GET, url, None, etag).await?;
        if res.status == StatusCode::NOT_MODIFIED {
            return Ok(ListFetch::NotModified {
                etag: etag.map(str::to_string),
            });
        }
        let res = self.ensure_success(res)?;
        let new_etag = res.header(ETAG.as_str()).map(str::to_string);
        let body = Self::parse_json(&res)?;
        Ok(ListFetch::Fresh {
            etag: new_etag,
            records: extract_records(&body),
        })
    }

    async fn read(&self, table: &TableId, id: &RecordId) -> Result<Record> {
        let url = self.record_url(table, id)?;
        let res = self.exchange(Method::GET, url, None, None).await?;
        if !res.status.is_success() {
            return Err(TabulaError::NotFound {
                table: table.to_string(),
                id: id.to_string(),
                status: res.status.as_u16(),
            });
        }
        match Self::parse_json(&res)? {
            Value::Object(map) if !map.is_empty() => Ok(Record::from_map(map)),
            _ => Err(TabulaError::NotFound {
                table: table.to_string(),
                id: id.to_string(),
                status: res.status.as_u16(),
            }),
        }
    }

    async fn create(&self, table: &TableId, record: &Record) -> Result<Record> {
        let clean = sanitize::for_create(record, &self.cfg.key_fields);
        let url = self.records_url(table, &[])?;
        let res = self
            .exchange(Method::POST, url, Some(clean.clone().into()), None)
            .await?;
        let res = self.ensure_success(res)?;
        let mut created = clean;
        if let Some(echo) = echoed_record(Self::parse_json(&res)?) {
            created.merge(&echo);
        }
        Ok(created)
    }

    async fn update(&self, table: &TableId, record: &Record) -> Result<Record> {
        let key = record
            .key_field(&self.cfg.key_fields)
            .ok_or(TabulaError::MissingKey)?;
        let clean = sanitize::for_update(record, key, &self.cfg.key_fields);
        let url = self.records_url(table, &[])?;
        let batch = Value::Array(vec![clean.clone().into()]);
        let res = self.exchange(Method::PATCH, url, Some(batch), None).await?;
        let res = self.ensure_success(res)?;
        let mut updated = clean;
        if let Some(echo) = echoed_record(Self::parse_json(&res)?) {
            updated.merge(&echo);
        }
        Ok(updated)
    }

    async fn delete(&self, table: &TableId, id: &RecordId) -> Result<()> {
        let url = self.record_url(table, id)?;
        let res = self.exchange(Method::DELETE, url, None, None).await?;
        self.ensure_success(res)?;
        Ok(())
    }

    async fn table_meta(&self, table: &TableId) -> Result<TableMeta> {
        let url = self.url(&[table.as_str()], &[])?;
        let res = self.exchange(Method::GET, url, None, None).await?;
        let res = self.ensure_success(res)?;
        Ok(serde_json::from_value(Self::parse_json(&res)?)?)
    }

    fn key_fields(&self) -> &[String] {
        &self.cfg.key_fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DEFAULT_PAGE_SIZE, Filter};
    use crate::testing::{ScriptedTransport, reply_empty, reply_json, test_config};
    use serde_json::json;

    fn client(t: &Arc<ScriptedTransport>) -> RecordClient {
        RecordClient::new(Arc::new(test_config()), t.clone())
    }

    fn table() -> TableId {
        TableId::new("m_tbl").unwrap()
    }

    #[tokio::test]
    async fn list_sends_explicit_default_page_and_credential() {
        let t = ScriptedTransport::new(vec![reply_json(200, json!({"list": [{"Id": 1}]}))]);
        let rows = client(&t).list(&table(), &ListParams::default()).await.unwrap();
        assert_eq!(rows.len(), 1);

        let req = &t.requests()[0];
        assert_eq!(req.method, Method::GET);
        assert!(req.url.starts_with("http://noco.test/api/v2/tables/m_tbl/records?"));
        assert!(req.url.contains(&format!("limit={DEFAULT_PAGE_SIZE}")));
        assert!(req.url.contains("offset=0"));
        assert_eq!(req.headers.get("xc-token").unwrap(), "secret");
    }

    #[tokio::test]
    async fn unspecified_limit_returns_only_the_default_page() {
        let all: Vec<Value> = (1..=60).map(|i| json!({"Id": i})).collect();
        let t = ScriptedTransport::paging(all);
        let rows = client(&t).list(&table(), &ListParams::default()).await.unwrap();
        assert_eq!(rows.len(), DEFAULT_PAGE_SIZE as usize);

        let everything = client(&t)
            .list_all(&table(), &ListParams::default().with_limit(25))
            .await
            .unwrap();
        assert_eq!(everything.len(), 60);
    }

    #[tokio::test]
    async fn list_encodes_filter_sort_and_projection() {
        let t = ScriptedTransport::new(vec![reply_json(200, json!([]))]);
        let params = ListParams {
            view_id: Some("vw1".into()),
            fields: vec!["Id".into(), "NOME".into()],
            filter: Some(Filter::eq("Id", 3)),
            sort: vec![crate::domain::Sort::desc("CreatedAt")],
            limit: Some(5),
            offset: Some(10),
        };
        client(&t).list(&table(), &params).await.unwrap();
        let url = reqwest::Url::parse(&t.requests()[0].url).unwrap();
        let q: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(q.contains(&("viewId".into(), "vw1".into())));
        assert!(q.contains(&("fields".into(), "Id,NOME".into())));
        assert!(q.contains(&("where".into(), "(Id,eq,3)".into())));
        assert!(q.contains(&("sort".into(), "-CreatedAt".into())));
        assert!(q.contains(&("limit".into(), "5".into())));
        assert!(q.contains(&("offset".into(), "10".into())));
    }

    #[tokio::test]
    async fn non_success_maps_to_backend_error_with_body() {
        let t = ScriptedTransport::new(vec![reply_json(422, json!({"msg": "bad"}))]);
        let err = client(&t).list(&table(), &ListParams::default()).await.unwrap_err();
        match err {
            TabulaError::Backend { status, body } => {
                assert_eq!(status, 422);
                assert!(body.contains("bad"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn transport_failure_is_a_network_error() {
        let t = ScriptedTransport::new(vec![Err(TabulaError::Network("refused".into()))]);
        let err = client(&t).list(&table(), &ListParams::default()).await.unwrap_err();
        assert!(matches!(err, TabulaError::Network(_)));
    }

    #[tokio::test]
    async fn create_strips_key_and_auto_fields() {
        let t = ScriptedTransport::new(vec![reply_json(200, json!({"Id": 77}))]);
        let input = Record::from_value(json!({"Nome": "X", "CreatedAt": "now", "Id": 5})).unwrap();
        let created = client(&t).create(&table(), &input).await.unwrap();

        let sent = t.requests()[0].body.clone().unwrap();
        assert_eq!(sent, json!({"Nome": "X"}));
        assert_eq!(t.requests()[0].method, Method::POST);
        assert_eq!(created.get("Id"), Some(&json!(77)));
        assert_eq!(created.get("Nome"), Some(&json!("X")));
    }

    #[tokio::test]
    async fn update_without_key_makes_no_request() {
        let t = ScriptedTransport::new(vec![]);
        let input = Record::from_value(json!({"Nome": "X", "Id": null})).unwrap();
        let err = client(&t).update(&table(), &input).await.unwrap_err();
        assert!(matches!(err, TabulaError::MissingKey));
        assert_eq!(t.call_count(), 0);
    }

    #[tokio::test]
    async fn update_sends_batch_of_one_with_key() {
        let t = ScriptedTransport::new(vec![reply_json(200, json!([{"Id": 4}]))]);
        let input =
            Record::from_value(json!({"Id": 4, "Nome": "Z", "UpdatedAt": "x", "CreatedBy": "u"}))
                .unwrap();
        let updated = client(&t).update(&table(), &input).await.unwrap();
        let req = &t.requests()[0];
        assert_eq!(req.method, Method::PATCH);
        assert!(req.url.ends_with("/api/v2/tables/m_tbl/records"));
        assert_eq!(req.body, Some(json!([{"Id": 4, "Nome": "Z"}])));
        assert_eq!(updated.get("Nome"), Some(&json!("Z")));
    }

    #[tokio::test]
    async fn read_non_success_is_not_found() {
        let t = ScriptedTransport::new(vec![reply_json(404, json!({"msg": "nope"}))]);
        let err = client(&t)
            .read(&table(), &RecordId::Int(9))
            .await
            .unwrap_err();
        assert!(matches!(err, TabulaError::NotFound { status: 404, .. }));
        assert!(t.requests()[0].url.ends_with("/records/9"));
    }

    #[tokio::test]
    async fn delete_accepts_no_content_and_json() {
        let t = ScriptedTransport::new(vec![reply_empty(204), reply_json(200, json!({"Id": 2}))]);
        let c = client(&t);
        c.delete(&table(), &RecordId::Int(1)).await.unwrap();
        c.delete(&table(), &RecordId::Int(2)).await.unwrap();
        assert_eq!(t.requests()[1].method, Method::DELETE);
    }

    #[tokio::test]
    async fn record_ids_are_path_encoded() {
        let t = ScriptedTransport::new(vec![reply_empty(204)]);
        client(&t)
            .delete(&table(), &RecordId::Text("a b/c".into()))
            .await
            .unwrap();
        assert!(t.requests()[0].url.ends_with("/records/a%20b%2Fc"));
    }

    #[tokio::test]
    async fn conditional_list_handles_fresh_and_not_modified() {
        let t = ScriptedTransport::new(vec![
            reply_json(200, json!({"list": [{"Id": 1}]})).map(|mut r| {
                r.headers.insert(ETAG, HeaderValue::from_static("\"v1\""));
                r
            }),
            reply_empty(304),
        ]);
        let c = client(&t);
        let first = c
            .list_with_etag(&table(), &ListParams::default(), None)
            .await
            .unwrap();
        assert_eq!(first.etag(), Some("\"v1\""));
        assert!(matches!(&first, ListFetch::Fresh { records, .. } if records.len() == 1));
        assert!(t.requests()[0].headers.get(IF_NONE_MATCH).is_none());

        let second = c
            .list_with_etag(&table(), &ListParams::default(), first.etag())
            .await
            .unwrap();
        assert_eq!(
            second,
            ListFetch::NotModified {
                etag: Some("\"v1\"".into())
            }
        );
        assert_eq!(t.requests()[1].headers.get(IF_NONE_MATCH).unwrap(), "\"v1\"");
    }

    #[tokio::test]
    async fn meta_is_fetched_from_the_table_path() {
        let t = ScriptedTransport::new(vec![reply_json(
            200,
            json!({"id": "m_tbl", "primaryKey": ["row_id"]}),
        )]);
        let meta = client(&t).table_meta(&table()).await.unwrap();
        assert_eq!(meta.primary_key_name(), Some("row_id"));
        assert!(t.requests()[0].url.ends_with("/api/v2/tables/m_tbl"));
    }

    #[tokio::test]
    async fn base_url_with_path_prefix_is_kept() {
        let t = ScriptedTransport::new(vec![reply_json(200, json!([]))]);
        let mut cfg = test_config();
        cfg.base_url = "http://proxy.test/noco/".into();
        let c = RecordClient::new(Arc::new(cfg), t.clone());
        c.list(&table(), &ListParams::default()).await.unwrap();
        assert!(t.requests()[0]
            .url
            .starts_with("http://proxy.test/noco/api/v2/tables/m_tbl/records"));
    }
}
