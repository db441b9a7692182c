use crate::domain::{Filter, ListParams, Record, RecordId, TableId};
use crate::error::{Result, TabulaError};
use crate::repo::TableRepo;

/// How a delete eventually succeeded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeleteOutcome {
    Direct,
    Resolved { key_field: String, key: RecordId },
}

pub struct DeleteResolver<'a> {
    repo: &'a dyn TableRepo,
}

impl<'a> DeleteResolver<'a> {
    pub fn new(repo: &'a dyn TableRepo) -> Self {
        Self { repo }
    }

    pub async fn delete(&self, table: &TableId, id: &RecordId) -> Result<DeleteOutcome> {
        match self.repo.delete(table, id).await {
            Ok(()) => return Ok(DeleteOutcome::Direct),
            Err(e) => {
                tracing::warn!(%table, %id, error = %e, "direct delete failed; resolving primary key");
            }
        }

        let pk_name = self.primary_key_name(table).await;
        let candidates = self.candidates(&pk_name);
        let (row, field) = self.locate(table, id, &candidates).await.ok_or_else(|| {
            TabulaError::Resolution {
                id: id.to_string(),
                tried: candidates.clone(),
            }
        })?;

        let mut key_order = vec![pk_name.clone()];
        key_order.extend(self.repo.key_fields().iter().cloned());
        let key = row.key_value(&key_order).ok_or_else(|| TabulaError::Resolution {
            id: id.to_string(),
            tried: candidates.clone(),
        })?;
        let key_field = row.key_field(&key_order).unwrap_or(pk_name.as_str()).to_string();

        tracing::info!(%table, %id, matched_on = %field, %key_field, %key, "resolved primary key");
        self.repo.delete(table, &key).await?;
        Ok(DeleteOutcome::Resolved { key_field, key })
    }

    async fn primary_key_name(&self, table: &TableId) -> String {
        match self.repo.table_meta(table).await {
            Ok(meta) => meta
                .primary_key_name()
                .map(str::to_string)
                .unwrap_or_else(|| "Id".to_string()),
            Err(e) => {
                tracing::warn!(%table, error = %e, "table metadata unavailable; assuming Id");
                "Id".to_string()
            }
        }
    }

    fn candidates(&self, pk_name: &str) -> Vec<String> {
        let mut out = vec![pk_name.to_string()];
        for k in self.repo.key_fields() {
            if !out.contains(k) {
                out.push(k.clone());
            }
        }
        out
    }

    async fn locate(
        &self,
        table: &TableId,
        id: &RecordId,
        candidates: &[String],
    ) -> Option<(Record, String)> {
        for field in candidates {
            let params = ListParams::default()
                .with_filter(Filter::eq(field.clone(), id))
                .with_limit(1);
            match self.repo.list(table, &params).await {
                Ok(rows) => {
                    if let Some(row) = rows.into_iter().next() {
                        return Some((row, field.clone()));
                    }
                }
                Err(e) => {
                    tracing::warn!(%table, %field, error = %e, "lookup by candidate field failed");
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo_http::RecordClient;
    use crate::testing::{ScriptedTransport, reply_empty, reply_json, test_config};
    use http::Method;
    use serde_json::json;
    use std::sync::Arc;

    fn table() -> TableId {
        TableId::new("m_cupons").unwrap()
    }

    #[tokio::test]
    async fn direct_delete_short_circuits() {
        let t = ScriptedTransport::new(vec![reply_empty(204)]);
        let client = RecordClient::new(Arc::new(test_config()), t.clone());
        let out = DeleteResolver::new(&client)
            .delete(&table(), &RecordId::Int(3))
            .await
            .unwrap();
        assert_eq!(out, DeleteOutcome::Direct);
        assert_eq!(t.call_count(), 1);
    }

    #[tokio::test]
    async fn falls_back_to_declared_primary_key() {
        let t = ScriptedTransport::new(vec![
            reply_json(404, json!({"msg": "Record 'abc' not found"})),
            reply_json(200, json!({"id": "m_cupons", "primaryKey": ["row_id"]})),
            reply_json(200, json!({"list": [{"row_id": 42, "CUPPOM": "abc"}]})),
            reply_empty(204),
        ]);
        let client = RecordClient::new(Arc::new(test_config()), t.clone());
        let out = DeleteResolver::new(&client)
            .delete(&table(), &RecordId::from("abc"))
            .await
            .unwrap();

        assert_eq!(
            out,
            DeleteOutcome::Resolved {
                key_field: "row_id".into(),
                key: RecordId::Int(42)
            }
        );
        let reqs = t.requests();
        assert_eq!(reqs.len(), 4);
        assert!(reqs[2].url.contains("where=%28row_id%2Ceq%2Cabc%29"));
        assert_eq!(reqs[3].method, Method::DELETE);
        assert!(reqs[3].url.ends_with("/records/42"));
    }

    #[tokio::test]
    async fn tries_aliases_after_the_declared_key() {
        let t = ScriptedTransport::new(vec![
            reply_json(404, json!({})),
            reply_json(200, json!({"columns": [{"column_name": "Id", "pk": true}]})),
            reply_json(200, json!({"list": []})),
            reply_json(500, json!({"msg": "bad column"})),
            reply_json(200, json!({"list": [{"Id": 8, "ID": "X-1"}]})),
            reply_empty(204),
        ]);
        let client = RecordClient::new(Arc::new(test_config()), t.clone());
        let out = DeleteResolver::new(&client)
            .delete(&table(), &RecordId::from("X-1"))
            .await
            .unwrap();
        assert_eq!(
            out,
            DeleteOutcome::Resolved {
                key_field: "Id".into(),
                key: RecordId::Int(8)
            }
        );
        assert!(t.requests()[5].url.ends_with("/records/8"));
    }

    #[tokio::test]
    async fn exhausted_candidates_name_every_field_tried() {
        let t = ScriptedTransport::new(vec![
            reply_json(404, json!({})),
            Err(TabulaError::Network("meta down".into())),
            reply_json(200, json!({"list": []})),
            reply_json(200, json!({"list": []})),
            reply_json(200, json!({"list": []})),
            reply_json(200, json!({"list": []})),
        ]);
        let client = RecordClient::new(Arc::new(test_config()), t.clone());
        let err = DeleteResolver::new(&client)
            .delete(&table(), &RecordId::from("ghost"))
            .await
            .unwrap_err();
        match err {
            TabulaError::Resolution { id, tried } => {
                assert_eq!(id, "ghost");
                assert_eq!(tried, vec!["Id", "id", "ID", "row_id"]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(t.call_count(), 6);
    }
}
