use crate::log::{init_log4rs, set_level};
use ::log::{debug, error, info, warn, LevelFilter};
use clap::Parser;
use colored::Colorize;
use courier_core::{config::Config, store::Store};
use courier_pixiv::{CourierKit, Error as PixivError, FetchRequest, WebhookGateway};
use courier_utils::{Shutdown, ShutdownTrigger};
use std::path::PathBuf;

mod log;

#[derive(Parser)]
#[clap(version)]
struct Main {
    /// Directory holding config.json. Defaults to ~/.courier.
    #[clap(short, long)]
    config: Option<String>,
    /// Overrides `log_level` from the config.
    #[clap(long)]
    log_level: Option<LevelFilter>,
    #[clap(subcommand)]
    subcommand: SubcommandMain,
}

#[derive(Parser)]
enum SubcommandMain {
    /// Write a default config if there is none.
    Init,
    Migrate,
    /// Log in and cache the credentials.
    Login,
    /// Run one fetch and delivery cycle.
    Sync(RunSync),
    /// Run a cycle every check interval until interrupted.
    Watch(RunWatch),
    /// Show one delivery ledger entry.
    History(ShowHistory),
}

#[derive(Parser)]
struct RunSync {
    #[clap(short, long)]
    limit: Option<usize>,
    /// Fetch and list new sub-assets without delivering them.
    #[clap(long)]
    dry_run: bool,
}

#[derive(Parser)]
struct RunWatch {
    #[clap(short, long)]
    limit: Option<usize>,
}

#[derive(Parser)]
struct ShowHistory {
    action_id: i64,
}

fn interrupt_on_ctrl_c(trigger: ShutdownTrigger) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping after the current step");
            trigger.trigger();
        }
    });
}

/// Errors after which another cycle cannot do better.
fn is_fatal(e: &PixivError) -> bool {
    matches!(
        e,
        PixivError::LoginExhausted { .. } | PixivError::MissingSecret | PixivError::Config { .. }
    )
}

async fn watch(
    kit: &mut CourierKit,
    request: &FetchRequest,
    gateway: &WebhookGateway,
    config: &Config,
) -> anyhow::Result<()> {
    let interval = config.watcher.check_interval;
    loop {
        match kit.run_cycle(request, gateway).await {
            Ok(report) => info!(
                "cycle done: {} new, {} delivered",
                report.fetched.len(),
                report.delivery.assets.len()
            ),
            Err(PixivError::Cancelled) => break,
            Err(e) if is_fatal(&e) => return Err(e.into()),
            Err(e) => error!("cycle failed: {}", e),
        }
        debug!("next check in {:?}", interval);
        if !kit.shutdown.sleep(interval).await {
            break;
        }
    }
    info!("watcher stopped");
    Ok(())
}

async fn run_internal() -> anyhow::Result<()> {
    let opts = Main::parse();
    let log_handle = init_log4rs(opts.log_level.unwrap_or(LevelFilter::Info))?;

    let config_path = if let Some(c) = &opts.config {
        PathBuf::from(c)
    } else {
        dirs::home_dir().unwrap_or_default().join(".courier")
    }
    .join("config.json");
    let config = Config::from_file(&config_path)?;
    debug!("config loaded: {:?}", config_path);
    if opts.log_level.is_none() {
        let level: LevelFilter = config
            .log_level
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid log_level: {}", config.log_level))?;
        set_level(&log_handle, level)?;
    }

    let (trigger, shutdown) = Shutdown::channel();

    match opts.subcommand {
        SubcommandMain::Init => {
            info!("config at {}", config_path.to_string_lossy());
        }
        SubcommandMain::Migrate => {
            let store = Store::open(config.database_file()).await?;
            store.close().await;
            info!("migration finished");
        }
        SubcommandMain::Login => {
            interrupt_on_ctrl_c(trigger);
            let kit = CourierKit::new(&config, shutdown).await?;
            info!(
                "logged in as {}",
                kit.current_user_id().unwrap_or_default()
            );
        }
        SubcommandMain::Sync(c) => {
            interrupt_on_ctrl_c(trigger);
            let request = FetchRequest::from_config(&config, c.limit);
            let mut kit = CourierKit::new(&config, shutdown).await?;
            if c.dry_run {
                for asset in kit.fetch_new(&request).await? {
                    println!("{} {}", asset.key().to_string().bold(), asset.download_url);
                }
            } else {
                let gateway = WebhookGateway::new(&config.gateway)?;
                let report = kit.run_cycle(&request, &gateway).await?;
                match report.delivery.action_id {
                    Some(id) => info!(
                        "{} sub-assets delivered, action {}",
                        report.delivery.assets.len(),
                        id
                    ),
                    None if report.fetched.is_empty() => {}
                    None => warn!("{} sub-assets were not delivered", report.fetched.len()),
                }
            }
            kit.store.close().await;
        }
        SubcommandMain::Watch(c) => {
            interrupt_on_ctrl_c(trigger);
            let request = FetchRequest::from_config(&config, c.limit);
            let gateway = WebhookGateway::new(&config.gateway)?;
            let mut kit = CourierKit::new(&config, shutdown).await?;
            let result = watch(&mut kit, &request, &gateway, &config).await;
            kit.store.close().await;
            result?;
        }
        SubcommandMain::History(c) => {
            let store = Store::open(config.database_file()).await?;
            match store.lookup_delivery(c.action_id).await? {
                Some(record) => {
                    println!(
                        "{} {:?} at {}",
                        format!("#{}", record.action_id).bold(),
                        record.action_type,
                        record
                            .delivered_at
                            .with_timezone(&chrono::Local)
                            .format("%Y-%m-%d %H:%M:%S")
                    );
                    for asset in record.assets {
                        println!("  {}", asset);
                    }
                }
                None => println!("{}", format!("no action {}", c.action_id).yellow()),
            }
            store.close().await;
        }
    };

    Ok(())
}

/// Run the app and return the exit code.
pub async fn run() -> i32 {
    if let Err(e) = run_internal().await {
        error!("{}", e);
        1
    } else {
        0
    }
}
