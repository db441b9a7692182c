use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "tabuladev: admin console for headless tables", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum RecordCommands {
    /// List records. TABLE is a screen name (coupons, wifi, ...) or a raw table id
    Ls {
        table: String,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        offset: Option<u32>,
        /// raw where clause, e.g. "(CUPPOM,eq,BLACK10)"
        #[arg(long = "where")]
        filter: Option<String>,
        /// comma separated; prefix a field with '-' for descending
        #[arg(long)]
        sort: Option<String>,
        /// comma separated list of fields to return
        #[arg(long)]
        fields: Option<String>,
        #[arg(long)]
        view: Option<String>,
        /// follow pagination until the last page
        #[arg(long)]
        all: bool,
    },

    /// Read one record
    Get { table: String, id: String },

    /// Create a record from a JSON object (inline or @file)
    Create { table: String, json: String },

    /// Patch a record; the JSON object must carry its key
    Update { table: String, json: String },

    /// Delete a record, resolving the real primary key when needed
    Rm { table: String, id: String },

    /// Show table metadata
    Meta { table: String },

    /// Keep printing the list as it changes
    Watch {
        table: String,
        /// fixed refresh interval in seconds (disables conditional requests)
        #[arg(long)]
        interval: Option<u64>,
        #[arg(long)]
        limit: Option<u32>,
    },
}

#[derive(Subcommand)]
pub enum ImageCommands {
    /// List images under a collection path
    Ls {
        #[arg(long)]
        path: Option<String>,
    },

    /// Delete an image by storage key
    Rm { key: String },

    /// Upload a file, or a directory with --recursive
    Upload {
        src: PathBuf,
        /// destination collection path
        #[arg(long)]
        path: Option<String>,
        #[arg(long)]
        recursive: bool,
    },

    /// List collections
    Collections,

    /// Create a collection
    Mkcol { path: String },
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(subcommand)]
    /// Record operations on a table
    Records(RecordCommands),

    /// Log in against the logins table and store a local session
    Login {
        email: String,
        #[arg(long)]
        password: String,
    },

    /// Remove the local session
    Logout,

    /// Print the local session
    Whoami,

    #[command(subcommand)]
    /// Image library operations
    Images(ImageCommands),
}
