use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tabula_core::config::{ClientConfig, Screen};
use tabula_core::domain::{Filter, ListParams, Record, RecordId, Sort, TableId};
use tabula_core::error::{Result, TabulaError};
use tabula_core::poll::{PollConfig, PollPhase, Poller};
use tabula_core::repo::TableRepo;
use tabula_core::repo_factory::{Backend, open_repo};
use tabula_core::resolve::{DeleteOutcome, DeleteResolver};
use tabula_core::schedule::TokioScheduler;
use tabula_core::session::{LoginFields, SessionStore, login};
use tabula_core::upload::{ImageLibrary, UploadFile, UploadQueue, UploadState};

fn load_config() -> Result<Arc<ClientConfig>> {
    Ok(Arc::new(ClientConfig::from_env()?))
}

fn repo_for(name: &str) -> Result<(Arc<dyn TableRepo>, TableId)> {
    let cfg = load_config()?;
    let table = cfg.resolve_table(name)?;
    tracing::debug!(%name, %table, "resolved table");
    let repo = open_repo(Backend::Http, cfg)?;
    Ok((repo, table))
}

fn library() -> Result<ImageLibrary> {
    let cfg = load_config()?;
    ImageLibrary::new(cfg.upload_url.clone(), cfg.request_timeout)
}

fn split_list(raw: Option<String>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

/// Inline JSON object, or `@path` to read one from a file.
fn parse_record(raw: &str) -> Result<Record> {
    let text = match raw.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)?,
        None => raw.to_string(),
    };
    let value: serde_json::Value = serde_json::from_str(&text)?;
    Record::from_value(value).ok_or_else(|| TabulaError::Config("expected a JSON object".into()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn handle_ls(
    table: String,
    limit: Option<u32>,
    offset: Option<u32>,
    filter: Option<String>,
    sort: Option<String>,
    fields: Option<String>,
    view: Option<String>,
    all: bool,
) -> Result<()> {
    let (repo, table) = repo_for(&table)?;
    let params = ListParams {
        view_id: view,
        fields: split_list(fields),
        filter: filter.map(Filter::Raw),
        sort: split_list(sort).iter().map(|s| Sort::parse(s)).collect(),
        limit,
        offset,
    };
    let rows = if all {
        repo.list_all(&table, &params).await?
    } else {
        repo.list(&table, &params).await?
    };
    print_json(&rows)?;
    eprintln!("ls: {} record(s) from {}", rows.len(), table);
    Ok(())
}

pub async fn handle_get(table: String, id: String) -> Result<()> {
    let (repo, table) = repo_for(&table)?;
    let rec = repo.read(&table, &RecordId::parse(&id)?).await?;
    print_json(&rec)
}

pub async fn handle_create(table: String, json: String) -> Result<()> {
    let (repo, table) = repo_for(&table)?;
    let created = repo.create(&table, &parse_record(&json)?).await?;
    print_json(&created)?;
    match created.key_value(repo.key_fields()) {
        Some(id) => eprintln!("create: {} in {}", id, table),
        None => eprintln!("create: ok in {} (no key echoed)", table),
    }
    Ok(())
}

pub async fn handle_update(table: String, json: String) -> Result<()> {
    let (repo, table) = repo_for(&table)?;
    let updated = repo.update(&table, &parse_record(&json)?).await?;
    print_json(&updated)?;
    eprintln!("update: ok in {}", table);
    Ok(())
}

pub async fn handle_rm(table: String, id: String) -> Result<()> {
    let (repo, table) = repo_for(&table)?;
    let id = RecordId::parse(&id)?;
    match DeleteResolver::new(repo.as_ref()).delete(&table, &id).await? {
        DeleteOutcome::Direct => eprintln!("rm: {}", id),
        DeleteOutcome::Resolved { key_field, key } => {
            eprintln!("rm: {} (resolved via {}={})", id, key_field, key)
        }
    }
    Ok(())
}

pub async fn handle_meta(table: String) -> Result<()> {
    let (repo, table) = repo_for(&table)?;
    let meta = repo.table_meta(&table).await?;
    println!("id:          {}", meta.id);
    println!("title:       {}", meta.title.as_deref().unwrap_or("-"));
    println!("primary key: {}", meta.primary_key_name().unwrap_or("-"));
    for col in &meta.columns {
        let marker = if col.pk { "*" } else { " " };
        println!("  {} {}", marker, col.label());
    }
    Ok(())
}

pub async fn handle_watch(table: String, interval: Option<u64>, limit: Option<u32>) -> Result<()> {
    let (repo, table) = repo_for(&table)?;
    let mut cfg = match interval {
        Some(secs) => PollConfig::interval(Duration::from_secs(secs.max(1))),
        None => PollConfig::default(),
    };
    cfg.params.limit = limit;

    let (poller, handle) = Poller::new(repo, table.clone(), cfg, Arc::new(TokioScheduler));
    let mut view = poller.subscribe();
    let task = tokio::spawn(poller.run());
    eprintln!("watch: {} (ctrl-c to stop)", table);

    let mut last_applied = 0;
    loop {
        tokio::select! {
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                let v = view.borrow_and_update().clone();
                if v.applied == last_applied {
                    continue;
                }
                last_applied = v.applied;
                match (v.phase, &v.last_error) {
                    (PollPhase::Backoff, Some(err)) => eprintln!("watch: fetch failed: {}", err),
                    _ => {
                        print_json(&v.records)?;
                        eprintln!("watch: {} record(s), etag {}", v.records.len(), v.etag.as_deref().unwrap_or("-"));
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                handle.stop();
                break;
            }
        }
    }
    let _ = task.await;
    Ok(())
}

pub async fn handle_login(email: String, password: String) -> Result<()> {
    let cfg = load_config()?;
    let table = cfg.table(Screen::Logins)?;
    let store = SessionStore::new(cfg.session_file.clone());
    let repo = open_repo(Backend::Http, cfg)?;
    let user = login(repo.as_ref(), &table, &email, &password, &LoginFields::default()).await?;
    let id = user
        .key_value(repo.key_fields())
        .map(|k| k.to_string())
        .unwrap_or_default();
    let session = store.create(id, email.trim())?;
    eprintln!("login: {} (session {})", session.email, store.path().display());
    Ok(())
}

pub fn handle_logout() -> Result<()> {
    let cfg = load_config()?;
    SessionStore::new(cfg.session_file.clone()).clear()?;
    eprintln!("logout: ok");
    Ok(())
}

pub fn handle_whoami() -> Result<()> {
    let cfg = load_config()?;
    match SessionStore::new(cfg.session_file.clone()).load() {
        Some(s) => {
            let since = s
                .created()
                .map(|t| t.to_string())
                .unwrap_or_else(|| s.created_at.to_string());
            println!("{} (id {}, since {})", s.email, s.id, since);
            Ok(())
        }
        None => Err(TabulaError::Auth("no session; run `tabuladev login`".into())),
    }
}

pub async fn handle_images_ls(path: Option<String>) -> Result<()> {
    let images = library()?.list_images(path.as_deref()).await?;
    for img in &images {
        println!("{:>10}  {}  {}", img.size, img.key, img.url);
    }
    Ok(())
}

pub async fn handle_images_rm(key: String) -> Result<()> {
    library()?.delete_by_key(&key).await?;
    eprintln!("rm: {}", key);
    Ok(())
}

fn collect_files(src: &Path, recursive: bool) -> Vec<UploadFile> {
    if !recursive || src.is_file() {
        return vec![UploadFile::from_path(src)];
    }
    let mut files: Vec<UploadFile> = walkdir::WalkDir::new(src)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| UploadFile::from_path(e.path()))
        .collect();
    files.sort_by(|a, b| a.path.cmp(&b.path));
    files
}

pub async fn handle_images_upload(src: PathBuf, path: Option<String>, recursive: bool) -> Result<()> {
    let lib = library()?;
    let mut queue = UploadQueue::default();
    queue.add_files(collect_files(&src, recursive));
    if !queue.can_upload() {
        return Err(TabulaError::Upload("nothing to upload".into()));
    }
    let (done, failed) = queue
        .upload_all(&lib, path.as_deref(), |_, up| eprintln!("upload: {} -> {}", up.name, up.url))
        .await;
    for item in queue.items() {
        if let UploadState::Failed(reason) = &item.state {
            eprintln!("upload: {} failed: {}", item.file.path.display(), reason);
        }
    }
    eprintln!("upload: {} done, {} failed", done, failed);
    if failed > 0 {
        return Err(TabulaError::Upload(format!("{failed} file(s) failed")));
    }
    Ok(())
}

pub async fn handle_collections() -> Result<()> {
    for c in library()?.list_collections().await {
        println!("{}", c);
    }
    Ok(())
}

pub async fn handle_mkcol(path: String) -> Result<()> {
    library()?.create_collection(&path).await?;
    eprintln!("mkcol: {}", path);
    Ok(())
}
