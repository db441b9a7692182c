pub mod handlers;

use crate::presentation::cli::{Cli, Commands, ImageCommands, RecordCommands};
use clap::Parser;
use tabula_core::error::Result;

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Records(cmd) => match cmd {
            RecordCommands::Ls {
                table,
                limit,
                offset,
                filter,
                sort,
                fields,
                view,
                all,
            } => handlers::handle_ls(table, limit, offset, filter, sort, fields, view, all).await,
            RecordCommands::Get { table, id } => handlers::handle_get(table, id).await,
            RecordCommands::Create { table, json } => handlers::handle_create(table, json).await,
            RecordCommands::Update { table, json } => handlers::handle_update(table, json).await,
            RecordCommands::Rm { table, id } => handlers::handle_rm(table, id).await,
            RecordCommands::Meta { table } => handlers::handle_meta(table).await,
            RecordCommands::Watch {
                table,
                interval,
                limit,
            } => handlers::handle_watch(table, interval, limit).await,
        },
        Commands::Login { email, password } => handlers::handle_login(email, password).await,
        Commands::Logout => handlers::handle_logout(),
        Commands::Whoami => handlers::handle_whoami(),
        Commands::Images(cmd) => match cmd {
            ImageCommands::Ls { path } => handlers::handle_images_ls(path).await,
            ImageCommands::Rm { key } => handlers::handle_images_rm(key).await,
            ImageCommands::Upload {
                src,
                path,
                recursive,
            } => handlers::handle_images_upload(src, path, recursive).await,
            ImageCommands::Collections => handlers::handle_collections().await,
            ImageCommands::Mkcol { path } => handlers::handle_mkcol(path).await,
        },
    }
}
