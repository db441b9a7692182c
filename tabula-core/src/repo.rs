// tabula_core/src/repo.rs
use async_trait::async_trait;

use crate::domain::{ListFetch, ListParams, Page, Record, RecordId, TableId, TableMeta};
use crate::error::Result;

/// CRUD access to the records of remote tables.
#[async_trait]
pub trait TableRepo: Send + Sync {
    async fn list_page(&self, table: &TableId, params: &ListParams) -> Result<Page>;

    async fn list(&self, table: &TableId, params: &ListParams) -> Result<Vec<Record>> {
        Ok(self.list_page(table, params).await?.records)
    }

    async fn list_with_etag(
        &self,
        table: &TableId,
        params: &ListParams,
        etag: Option<&str>,
    ) -> Result<ListFetch>;

    async fn read(&self, table: &TableId, id: &RecordId) -> Result<Record>;

    async fn create(&self, table: &TableId, record: &Record) -> Result<Record>;

    async fn update(&self, table: &TableId, record: &Record) -> Result<Record>;

    async fn delete(&self, table: &TableId, id: &RecordId) -> Result<()>;

    async fn table_meta(&self, table: &TableId) -> Result<TableMeta>;

    /// Key names tried in order when a record's key field is not known.
    fn key_fields(&self) -> &[String];

    /// Pages through the whole table using `params.limit` as page size
    /// (default 100, clamped to 1..=10000). Stops early when a page starts with
    /// the same row as the one before it, as a backend ignoring `offset` would.
    async fn list_all(&self, table: &TableId, params: &ListParams) -> Result<Vec<Record>> {
        let page_size = params.limit.unwrap_or(100).clamp(1, 10_000);
        let mut offset = params.offset.unwrap_or(0);
        let mut all = Vec::new();
        let mut prev_first: Option<Record> = None;
        loop {
            let mut p = params.clone();
            p.limit = Some(page_size);
            p.offset = Some(offset);
            let page = self.list_page(table, &p).await?;
            let first = page.records.first().cloned();
            if first.is_some() && first == prev_first {
                tracing::warn!(%table, offset, "backend repeated a page; stopping");
                break;
            }
            let n = page.records.len();
            all.extend(page.records);
            let last = page
                .page_info
                .and_then(|i| i.is_last_page)
                .unwrap_or(false);
            if n < page_size as usize || last {
                break;
            }
            prev_first = first;
            offset += page_size;
        }
        Ok(all)
    }
}
