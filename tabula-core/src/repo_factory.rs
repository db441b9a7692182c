use std::sync::Arc;

use crate::config::ClientConfig;
use crate::error::Result;
use crate::repo::TableRepo;
use crate::repo_http::RecordClient;
use crate::transport::{ReqwestTransport, Transport};

pub enum Backend {
    /// NocoDB-style REST API over reqwest.
    Http,
    /// Same protocol over a caller-supplied transport.
    Custom(Arc<dyn Transport>),
}

pub fn open_repo(backend: Backend, cfg: Arc<ClientConfig>) -> Result<Arc<dyn TableRepo>> {
    cfg.validate()?;
    let transport: Arc<dyn Transport> = match backend {
        Backend::Http => Arc::new(ReqwestTransport::new(cfg.request_timeout)?),
        Backend::Custom(t) => t,
    };
    Ok(Arc::new(RecordClient::new(cfg, transport)))
}
