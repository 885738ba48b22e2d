use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::error;

use bundlebin::cache::FsCache;
use bundlebin::groom::GroomingWorker;
use bundlebin::keygen::KeyGenerator;
use bundlebin::model::{FileBundle, FileData};
use bundlebin::server::{AppState, serve};
use bundlebin::state::{Command, StateContainer};
use bundlebin::store::ContentStore;
use bundlebin::upload::HttpUploadService;

#[derive(Parser)]
#[command(name = "bundlebin", about = "Share small sets of text files")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the paste server.
    Serve {
        #[arg(long, default_value_t = 4020, env = "PORT")]
        port: u16,
        /// Directory blobs are stored in.
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,
        /// Blobs older than this many days are groomed away.
        #[arg(long, default_value_t = 30)]
        groom_max_age_days: u64,
        /// Hours between grooming sweeps.
        #[arg(long, default_value_t = 1)]
        groom_interval_hours: u64,
    },
    /// Upload local files as a bundle and print its URL.
    Paste {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long, default_value = "http://localhost:4020")]
        server: String,
        /// Override the client cache file.
        #[arg(long)]
        cache: Option<PathBuf>,
    },
    /// Fetch a bundle by id and print its files.
    Get {
        id: String,
        #[arg(long, default_value = "http://localhost:4020")]
        server: String,
        /// Override the client cache file.
        #[arg(long)]
        cache: Option<PathBuf>,
    },
}

fn default_cache_path() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".bundlebin").join("cache.json"),
        None => PathBuf::from(".bundlebin-cache.json"),
    }
}

fn client(server: &str, cache: Option<PathBuf>) -> StateContainer<HttpUploadService, FsCache> {
    StateContainer::new(
        HttpUploadService::new(server),
        FsCache::new(cache.unwrap_or_else(default_cache_path)),
        KeyGenerator,
    )
    .non_interactive()
}

async fn run_serve(
    port: u16,
    data_dir: PathBuf,
    groom_max_age_days: u64,
    groom_interval_hours: u64,
) -> std::process::ExitCode {
    let store = Arc::new(ContentStore::new(data_dir));

    let groomer = GroomingWorker::new(store.clone())
        .with_max_age(Duration::from_secs(groom_max_age_days * 24 * 60 * 60))
        .with_sweep_interval(Duration::from_secs(groom_interval_hours * 60 * 60))
        .spawn();

    let result = serve(AppState::new(store), port).await;
    groomer.shutdown().await;

    match result {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "server exited");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run_paste(
    files: Vec<PathBuf>,
    server: String,
    cache: Option<PathBuf>,
) -> std::process::ExitCode {
    let keygen = KeyGenerator;
    let mut bundle = FileBundle {
        id: keygen.generate_id(),
        files: Vec::new(),
        last_server_id: None,
    };

    for path in &files {
        let data = match tokio::fs::read_to_string(path).await {
            Ok(data) => data,
            Err(err) => {
                eprintln!("cannot read {}: {err}", path.display());
                return std::process::ExitCode::FAILURE;
            }
        };
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        bundle
            .files
            .push(FileData::new(keygen.generate_id(), filename, data));
    }

    let mut container = client(&server, cache);
    container.dispatch(Command::Initialize).await;
    container
        .dispatch(Command::InsertUpload {
            bundle,
            set_active: true,
        })
        .await;
    container.dispatch(Command::SaveActiveUpload).await;

    if let Some(error) = container.error() {
        eprintln!("{}: {}", error.title, error.message);
        return std::process::ExitCode::FAILURE;
    }

    match container
        .active_upload()
        .and_then(|upload| upload.last_server_id.as_deref())
    {
        Some(server_id) => {
            println!("{server}/{server_id}");
            std::process::ExitCode::SUCCESS
        }
        None => {
            eprintln!("upload did not complete");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run_get(id: String, server: String, cache: Option<PathBuf>) -> std::process::ExitCode {
    let mut container = client(&server, cache);
    container.dispatch(Command::Initialize).await;
    container
        .dispatch(Command::ReadUpload { server_id: id })
        .await;

    if let Some(error) = container.error() {
        eprintln!("{}: {}", error.title, error.message);
        return std::process::ExitCode::FAILURE;
    }

    match container.active_upload() {
        Some(bundle) => {
            for file in &bundle.files {
                println!("==> {} <==", file.filename);
                println!("{}", file.data);
            }
            std::process::ExitCode::SUCCESS
        }
        None => {
            eprintln!("bundle not found");
            std::process::ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bundlebin=info".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve {
            port,
            data_dir,
            groom_max_age_days,
            groom_interval_hours,
        } => run_serve(port, data_dir, groom_max_age_days, groom_interval_hours).await,
        Commands::Paste {
            files,
            server,
            cache,
        } => run_paste(files, server, cache).await,
        Commands::Get { id, server, cache } => run_get(id, server, cache).await,
    }
}
