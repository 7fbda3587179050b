use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use shellcache::{
    AppConfig, AssetManifest, CacheController, DiskFetcher, DiskStore, server,
};

fn print_usage() {
    eprintln!("Usage: shellcache [OPTIONS]");
    eprintln!();
    eprintln!("Serves a built web app with offline-first asset caching.");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config <PATH>      Config file (TOML); missing file means defaults");
    eprintln!("  --manifest <PATH>    Asset manifest JSON emitted by the build");
    eprintln!("  --public-dir <PATH>  Built web output directory");
    eprintln!("  --port <PORT>        Bind port (default: 5173)");
    eprintln!("  --host <HOST>        Bind address (default: 127.0.0.1)");
    eprintln!("  --prefetch           Prefetch every manifest asset after activation");
    eprintln!("  -h, --help           Show this help");
}

#[tokio::main]
async fn main() -> shellcache::Result<()> {
    env_logger::init();

    let mut config_path: Option<PathBuf> = None;
    let mut manifest_path: Option<PathBuf> = None;
    let mut public_dir: Option<PathBuf> = None;
    let mut port: Option<u16> = None;
    let mut host: Option<String> = None;
    let mut prefetch = false;

    let args: Vec<String> = env::args().skip(1).collect();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                std::process::exit(0);
            }
            "--prefetch" => prefetch = true,
            "--config" | "--manifest" | "--public-dir" | "--port" | "--host" => {
                let flag = args[i].clone();
                i += 1;
                let Some(value) = args.get(i) else {
                    eprintln!("Error: {flag} requires a value");
                    std::process::exit(1);
                };
                match flag.as_str() {
                    "--config" => config_path = Some(PathBuf::from(value)),
                    "--manifest" => manifest_path = Some(PathBuf::from(value)),
                    "--public-dir" => public_dir = Some(PathBuf::from(value)),
                    "--host" => host = Some(value.clone()),
                    "--port" => match value.parse() {
                        Ok(p) => port = Some(p),
                        Err(_) => {
                            eprintln!("Error: invalid port {value:?}");
                            std::process::exit(1);
                        }
                    },
                    _ => unreachable!(),
                }
            }
            other => {
                eprintln!("Error: unknown option {other:?}");
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let mut config = match config_path {
        Some(path) => AppConfig::load(&path)?,
        None => AppConfig::default(),
    };
    if let Some(path) = manifest_path {
        config.paths.manifest_path = path;
    }
    if let Some(dir) = public_dir {
        config.paths.public_dir = dir;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(host) = host {
        config.server.host = host;
    }

    let manifest = AssetManifest::load(&config.paths.manifest_path)?;
    log::info!(
        "loaded manifest with {} asset(s), {} in the core shell",
        manifest.len(),
        manifest.core().len()
    );

    let store = Arc::new(DiskStore::new(&config.paths.cache_dir));
    let fetcher = Arc::new(DiskFetcher::new(&config.paths.public_dir));
    let controller = Arc::new(CacheController::new(
        manifest,
        config.server.origin(),
        config.worker.clone(),
        store,
        Arc::clone(&fetcher) as Arc<dyn shellcache::AssetFetcher>,
    ));

    controller.install().await?;
    if let Err(e) = controller.activate().await {
        // The partitions were discarded; one rebuild attempt from scratch.
        log::warn!("activation failed ({e}), rebuilding cache");
        controller.install().await?;
        controller.activate().await?;
    }

    if prefetch {
        let added = controller.prefetch_missing().await?;
        println!("Prefetched {added} asset(s) for offline use.");
    }

    println!(
        "Serving {} on http://{}:{}",
        config.paths.public_dir.display(),
        config.server.host,
        config.server.port
    );
    server::run_server(&config.server, controller, fetcher).await
}
