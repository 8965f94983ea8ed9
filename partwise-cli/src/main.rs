//! partwise: resumable multipart uploads into a directory-backed store

use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use partwise_client::{FileSource, UploadError, UploadInput, Uploader};
use partwise_core::{
    AccessLevel, BucketId, ContentMetadata, Key, ProgressEvent, StaticConfigResolver,
    UploadConfig,
};
use partwise_store::{DirRemote, FjallIdentityCache, StoreEngine};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    let remote_dir = Arg::new("remote-dir")
        .long("remote-dir")
        .value_name("PATH")
        .help("Directory acting as the remote object store")
        .value_parser(value_parser!(PathBuf))
        .default_value("./remote");
    let cache_dir = Arg::new("cache-dir")
        .long("cache-dir")
        .value_name("PATH")
        .help("Directory holding the upload identity cache")
        .value_parser(value_parser!(PathBuf))
        .default_value("./.partwise");

    Command::new("partwise")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Resumable, pausable multipart uploads")
        .subcommand_required(true)
        .subcommand(
            Command::new("upload")
                .about("Upload a file; interrupt to pause, re-run to resume")
                .arg(
                    Arg::new("file")
                        .required(true)
                        .value_name("FILE")
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("key")
                        .long("key")
                        .value_name("KEY")
                        .help("Object key, defaults to the file name"),
                )
                .arg(
                    Arg::new("bucket")
                        .long("bucket")
                        .value_name("NAME")
                        .default_value("default"),
                )
                .arg(remote_dir.clone())
                .arg(cache_dir.clone())
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_name("PATH")
                        .help("JSON upload configuration; flags override it")
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("part-size")
                        .long("part-size")
                        .value_name("BYTES")
                        .value_parser(value_parser!(u64)),
                )
                .arg(
                    Arg::new("concurrency")
                        .long("concurrency")
                        .value_name("N")
                        .value_parser(value_parser!(usize)),
                )
                .arg(
                    Arg::new("access-level")
                        .long("access-level")
                        .value_name("LEVEL")
                        .help("guest, protected or private")
                        .default_value("guest"),
                )
                .arg(
                    Arg::new("identity")
                        .long("identity")
                        .value_name("ID")
                        .help("Identity id for protected and private uploads"),
                )
                .arg(
                    Arg::new("content-type")
                        .long("content-type")
                        .value_name("MIME"),
                )
                .arg(
                    Arg::new("cancel-on-interrupt")
                        .long("cancel-on-interrupt")
                        .help("Cancel the upload on Ctrl-C instead of pausing it")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("pending")
                .about("List sessions that were started but never completed")
                .arg(remote_dir),
        )
        .subcommand(
            Command::new("prune")
                .about("Drop cached upload identities older than the TTL")
                .arg(cache_dir)
                .arg(
                    Arg::new("ttl-secs")
                        .long("ttl-secs")
                        .value_name("SECONDS")
                        .value_parser(value_parser!(u64))
                        .default_value("3600"),
                ),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    match cli().get_matches().subcommand() {
        Some(("upload", args)) => upload(args).await,
        Some(("pending", args)) => pending(args).await,
        Some(("prune", args)) => prune(args),
        _ => bail!("unknown command"),
    }
}

fn path_arg(args: &ArgMatches, name: &str) -> Result<PathBuf> {
    args.get_one::<PathBuf>(name)
        .cloned()
        .with_context(|| format!("missing --{}", name))
}

fn upload_config(args: &ArgMatches) -> Result<UploadConfig> {
    let mut config = match args.get_one::<PathBuf>("config") {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            UploadConfig::from_json(&json)?
        }
        None => UploadConfig::default(),
    };
    if let Some(part_size) = args.get_one::<u64>("part-size") {
        config = config.with_part_size(*part_size);
    }
    if let Some(concurrency) = args.get_one::<usize>("concurrency") {
        config = config.with_queue_size(*concurrency);
    }
    Ok(config)
}

/// Log progress every time another tenth of the file is done
fn progress_logger() -> Arc<dyn Fn(ProgressEvent) + Send + Sync> {
    let last_decile = AtomicU64::new(0);
    Arc::new(move |event: ProgressEvent| {
        let Some(total) = event.total.filter(|t| *t > 0) else {
            return;
        };
        let decile = event.loaded * 10 / total;
        if decile > last_decile.fetch_max(decile, Ordering::Relaxed) {
            info!(loaded = event.loaded, total, "{}% uploaded", decile * 10);
        }
    })
}

async fn upload(args: &ArgMatches) -> Result<()> {
    let file = path_arg(args, "file")?;
    let key = match args.get_one::<String>("key") {
        Some(key) => key.clone(),
        None => file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .context("cannot derive a key from the file name; pass --key")?,
    };
    let key = Key::new(&key)?;
    let bucket_name = args
        .get_one::<String>("bucket")
        .map(String::as_str)
        .unwrap_or("default");
    let bucket = BucketId::new(bucket_name)?;
    let access_level: AccessLevel = args
        .get_one::<String>("access-level")
        .map(String::as_str)
        .unwrap_or("guest")
        .parse()?;
    let config = upload_config(args)?;

    let remote_dir = path_arg(args, "remote-dir")?;
    let cache_dir = path_arg(args, "cache-dir")?;
    std::fs::create_dir_all(&cache_dir)
        .with_context(|| format!("creating {}", cache_dir.display()))?;

    let remote = Arc::new(DirRemote::new(&remote_dir).await?);
    let cache = Arc::new(FjallIdentityCache::open(StoreEngine::new(&cache_dir)?)?);
    let mut resolver = StaticConfigResolver::new(bucket);
    if let Some(identity) = args.get_one::<String>("identity") {
        resolver = resolver.with_identity(identity.clone());
    }

    info!(file = %file.display(), remote = %remote_dir.display(), "preparing upload");
    let source = Arc::new(FileSource::open(&file).await?);
    let mut content = ContentMetadata::default();
    if let Some(content_type) = args.get_one::<String>("content-type") {
        content = content.with_content_type(content_type.clone());
    }

    let uploader = Uploader::new(remote, cache, Arc::new(resolver), config);
    let input = UploadInput::new(key, source)
        .with_content(content)
        .with_access_level(access_level)
        .with_progress(progress_logger());
    let mut task = uploader.upload(input)?;
    let control = task.control();

    tokio::select! {
        outcome = task.result() => {
            let object = outcome?;
            info!(key = %object.key, e_tag = %object.e_tag, "upload complete");
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {}
    }

    if args.get_flag("cancel-on-interrupt") {
        control.cancel_with_reason("interrupted")?;
        match task.result().await {
            Err(err @ UploadError::Canceled { .. }) => warn!("{}", err),
            other => {
                other?;
            }
        }
        // Give the remote cleanup a moment before the runtime shuts down
        tokio::time::sleep(Duration::from_millis(200)).await;
    } else {
        control.pause()?;
        let parts = control
            .in_progress()
            .map(|u| u.completed_parts.len())
            .unwrap_or(0);
        warn!(completed_parts = parts, "upload paused; run the same command again to resume");
    }
    Ok(())
}

async fn pending(args: &ArgMatches) -> Result<()> {
    let remote = DirRemote::new(path_arg(args, "remote-dir")?).await?;
    let ids = remote.pending_uploads().await?;
    if ids.is_empty() {
        info!("no pending uploads");
    }
    for id in ids {
        println!("{}", id);
    }
    Ok(())
}

fn prune(args: &ArgMatches) -> Result<()> {
    let cache_dir = path_arg(args, "cache-dir")?;
    let ttl = args.get_one::<u64>("ttl-secs").copied().unwrap_or(3600);
    let cache = FjallIdentityCache::open(StoreEngine::new(&cache_dir)?)?;
    let pruned = cache.prune_expired(Duration::from_secs(ttl))?;
    info!(pruned, "pruned cached uploads");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        cli().debug_assert();
    }

    #[test]
    fn test_flags_override_config() {
        let matches = cli()
            .try_get_matches_from(["partwise", "upload", "a.bin", "--concurrency", "8"])
            .unwrap();
        let (_, args) = matches.subcommand().unwrap();
        let config = upload_config(args).unwrap();
        assert_eq!(config.queue_size, 8);
        assert_eq!(config.part_size, None);
        assert_eq!(path_arg(args, "remote-dir").unwrap(), PathBuf::from("./remote"));
    }

    #[test]
    fn test_config_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.json");
        std::fs::write(&path, r#"{"part_size": 8388608, "queue_size": 2}"#).unwrap();

        let matches = cli()
            .try_get_matches_from([
                "partwise",
                "upload",
                "a.bin",
                "--config",
                path.to_str().unwrap(),
            ])
            .unwrap();
        let (_, args) = matches.subcommand().unwrap();
        let config = upload_config(args).unwrap();
        assert_eq!(config.part_size, Some(8 * 1024 * 1024));
        assert_eq!(config.queue_size, 2);
    }
}
