use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, StatusCode};
use serde_json::{Value, json};

use crate::config::ClientConfig;
use crate::domain::{ListFetch, ListParams, Page, Record, RecordId, TableId, TableMeta};
use crate::error::{Result, TabulaError};
use crate::repo::TableRepo;
use crate::transport::{HttpRequest, HttpResponse, Transport};

pub fn test_config() -> ClientConfig {
    ClientConfig::new("http://noco.test", "secret")
}

pub fn reply_json(status: u16, body: Value) -> Result<HttpResponse> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(HttpResponse {
        status: StatusCode::from_u16(status).unwrap(),
        headers,
        body: serde_json::to_vec(&body).unwrap(),
    })
}

pub fn reply_empty(status: u16) -> Result<HttpResponse> {
    Ok(HttpResponse {
        status: StatusCode::from_u16(status).unwrap(),
        headers: HeaderMap::new(),
        body: Vec::new(),
    })
}

enum Mode {
    Script(Mutex<VecDeque<Result<HttpResponse>>>),
    /// Serves `limit`/`offset` windows over a fixed row set.
    Paging(Vec<Value>),
}

pub struct ScriptedTransport {
    mode: Mode,
    log: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<Result<HttpResponse>>) -> Arc<Self> {
        Arc::new(Self {
            mode: Mode::Script(Mutex::new(replies.into())),
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn paging(rows: Vec<Value>) -> Arc<Self> {
        Arc::new(Self {
            mode: Mode::Paging(rows),
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.log.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.log.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, req: HttpRequest) -> Result<HttpResponse> {
        self.log.lock().unwrap().push(req.clone());
        match &self.mode {
            Mode::Script(q) => q
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| panic!("unexpected request {} {}", req.method, req.url)),
            Mode::Paging(rows) => {
                let url = reqwest::Url::parse(&req.url).unwrap();
                let param = |name: &str| {
                    url.query_pairs()
                        .find(|(k, _)| k == name)
                        .and_then(|(_, v)| v.parse::<usize>().ok())
                };
                let limit = param("limit").unwrap_or(rows.len());
                let offset = param("offset").unwrap_or(0);
                let window: Vec<Value> = rows.iter().skip(offset).take(limit).cloned().collect();
                reply_json(200, json!({ "list": window }))
            }
        }
    }
}

pub fn rec(v: Value) -> Record {
    Record::from_value(v).unwrap()
}

/// Table repo over a Vec, with switchable failures.
pub struct MemoryRepo {
    pub rows: Mutex<Vec<Record>>,
    pub fail_writes: Mutex<bool>,
    pub fail_reads: Mutex<bool>,
    pub etag: Mutex<Option<String>>,
    pub calls: AtomicUsize,
    key_fields: Vec<String>,
}

impl MemoryRepo {
    pub fn new(rows: Vec<Record>) -> Arc<Self> {
        Arc::new(Self {
            rows: Mutex::new(rows),
            fail_writes: Mutex::new(false),
            fail_reads: Mutex::new(false),
            etag: Mutex::new(None),
            calls: AtomicUsize::new(0),
            key_fields: test_config().key_fields,
        })
    }

    pub fn set_fail_writes(&self, on: bool) {
        *self.fail_writes.lock().unwrap() = on;
    }

    pub fn set_fail_reads(&self, on: bool) {
        *self.fail_reads.lock().unwrap() = on;
    }

    pub fn snapshot(&self) -> Vec<Record> {
        self.rows.lock().unwrap().clone()
    }

    fn write_guard(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_writes.lock().unwrap() {
            return Err(TabulaError::backend(500, "write rejected", 200));
        }
        Ok(())
    }

    fn read_guard(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_reads.lock().unwrap() {
            return Err(TabulaError::Network("unreachable".into()));
        }
        Ok(())
    }

    fn position(&self, id: &RecordId) -> Option<usize> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .position(|r| r.key_value(&self.key_fields).as_ref() == Some(id))
    }
}

#[async_trait]
impl TableRepo for MemoryRepo {
    async fn list_page(&self, _table: &TableId, params: &ListParams) -> Result<Page> {
        self.read_guard()?;
        let rows = self.rows.lock().unwrap();
        let records = rows
            .iter()
            .skip(params.effective_offset() as usize)
            .take(params.effective_limit() as usize)
            .cloned()
            .collect();
        Ok(Page {
            records,
            page_info: None,
        })
    }

    async fn list_with_etag(
        &self,
        table: &TableId,
        params: &ListParams,
        etag: Option<&str>,
    ) -> Result<ListFetch> {
        let current = self.etag.lock().unwrap().clone();
        if etag.is_some() && etag == current.as_deref() {
            self.read_guard()?;
            return Ok(ListFetch::NotModified { etag: current });
        }
        let records = self.list(table, params).await?;
        Ok(ListFetch::Fresh {
            etag: current,
            records,
        })
    }

    async fn read(&self, table: &TableId, id: &RecordId) -> Result<Record> {
        self.read_guard()?;
        let pos = self.position(id).ok_or_else(|| TabulaError::NotFound {
            table: table.to_string(),
            id: id.to_string(),
            status: 404,
        })?;
        Ok(self.rows.lock().unwrap()[pos].clone())
    }

    async fn create(&self, _table: &TableId, record: &Record) -> Result<Record> {
        self.write_guard()?;
        let mut rows = self.rows.lock().unwrap();
        let mut created = record.clone();
        created.insert("Id", rows.len() as i64 + 1000);
        rows.push(created.clone());
        Ok(created)
    }

    async fn update(&self, _table: &TableId, record: &Record) -> Result<Record> {
        let id = record
            .key_value(&self.key_fields)
            .ok_or(TabulaError::MissingKey)?;
        self.write_guard()?;
        let pos = self
            .position(&id)
            .ok_or_else(|| TabulaError::backend(404, "no such row", 200))?;
        let mut rows = self.rows.lock().unwrap();
        rows[pos].merge(record);
        Ok(rows[pos].clone())
    }

    async fn delete(&self, _table: &TableId, id: &RecordId) -> Result<()> {
        self.write_guard()?;
        let pos = self
            .position(id)
            .ok_or_else(|| TabulaError::backend(404, "no such row", 200))?;
        self.rows.lock().unwrap().remove(pos);
        Ok(())
    }

    async fn table_meta(&self, table: &TableId) -> Result<TableMeta> {
        Ok(TableMeta {
            id: table.to_string(),
            primary_key: vec!["Id".into()],
            ..TableMeta::default()
        })
    }

    fn key_fields(&self) -> &[String] {
        &self.key_fields
    }
}
