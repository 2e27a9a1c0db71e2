//! Mount object-storage backends as a single read-only filesystem.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use fuser::MountOption;

use msfs_vfs::fuse::MsfsFuse;
use msfs_vfs::Core;

mod config;

#[derive(Parser)]
#[command(
    name = "msfs",
    version,
    about = "Mount S3-compatible and AIStore backends as a read-only filesystem."
)]
struct Args {
    /// Path to the mount configuration file.
    config_path: PathBuf,

    /// Directory to mount on.
    mountpoint: PathBuf,

    /// Comma-separated mount options, mount(8) style. Recognized:
    /// allow_other, defaults, _netdev, noauto, user.
    #[arg(short = 'o', value_delimiter = ',')]
    options: Vec<String>,
}

/// Map mount-helper options onto fuser options. Options that only matter to
/// mount(8) itself (`_netdev`, `noauto`, `user`, `defaults`) are accepted
/// and ignored.
fn mount_options(raw: &[String]) -> Vec<MountOption> {
    let mut options = MsfsFuse::default_mount_options();
    for option in raw {
        match option.as_str() {
            "allow_other" => options.push(MountOption::AllowOther),
            "defaults" | "_netdev" | "noauto" | "user" | "ro" => {}
            other => log::warn!("ignoring unrecognized mount option {other}"),
        }
    }
    options
}

/// Reload the configuration file and apply its backend set to the core.
///
/// Cache tuning fields are fixed at mount time; changes to them on reload
/// are reported and ignored.
async fn apply_config_file(core: &Arc<Core>, config_path: &PathBuf) {
    let config = match config::load(config_path) {
        Ok(config) => config,
        Err(err) => {
            log::warn!("reload skipped: {err}");
            return;
        }
    };
    if config.cache_line_size != core.options().cache_line_size
        || config.cache_lines != core.options().cache_lines
    {
        log::warn!("cache tuning changes require a remount; keeping mount-time values");
    }
    core.reload(&config.backends).await;
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let config = config::load(&args.config_path).unwrap_or_else(|err| {
        eprintln!("{err}");
        std::process::exit(1);
    });
    let cache_options = config.cache_options().unwrap_or_else(|err| {
        eprintln!("{err}");
        std::process::exit(1);
    });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|err| {
            eprintln!("Failed to start runtime: {err}");
            std::process::exit(1);
        });

    let core = Core::new(cache_options);

    // Initial backend registration is a reload against an empty registry.
    let summary = runtime.block_on(core.reload(&config.backends));
    if summary.added.is_empty() && !config.backends.is_empty() {
        eprintln!("No backend could be initialized; refusing to mount.");
        std::process::exit(1);
    }

    // SIGHUP re-reads the configuration file and applies the delta.
    {
        let core = Arc::clone(&core);
        let config_path = args.config_path.clone();
        runtime.spawn(async move {
            let mut hangup =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
                    Ok(signal) => signal,
                    Err(err) => {
                        log::warn!("SIGHUP handler unavailable, reload by signal disabled: {err}");
                        return;
                    }
                };
            while hangup.recv().await.is_some() {
                log::info!("SIGHUP received, reloading configuration");
                apply_config_file(&core, &config_path).await;
            }
        });
    }

    // Optional periodic reload, in addition to the signal.
    if let Some(seconds) = config.auto_reload_interval.filter(|s| *s > 0) {
        let core = Arc::clone(&core);
        let config_path = args.config_path.clone();
        runtime.spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(seconds));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // the first tick fires immediately
            loop {
                ticker.tick().await;
                apply_config_file(&core, &config_path).await;
            }
        });
    }

    log::info!(
        "mounting {} backend(s) on {}",
        summary.added.len(),
        args.mountpoint.display()
    );

    let fs = MsfsFuse::new(Arc::clone(&core), runtime.handle().clone());
    if let Err(err) = fuser::mount2(fs, &args.mountpoint, &mount_options(&args.options)) {
        eprintln!("Mount failed: {err}");
        std::process::exit(1);
    }
}
