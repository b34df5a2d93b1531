use std::{path::PathBuf, time::Duration};

use anyhow::{bail, Context};
use clap::Parser;
use inquire::error::InquireResult;

mod app;
mod bookmarks;
mod cli;
mod config;
mod eid;
mod enrichment;
mod storage;
#[cfg(test)]
mod tests;
mod watch;
mod web;

use app::{
    reconciler::DrainOutcome,
    state::{SyncStatus, UserIdentity},
    task_runner::TaskQueue,
    AppFactory,
};
use config::Config;

fn init_logging() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

/// `--bookmarks` wins over `bookmarks_file` from config.yaml.
fn bookmarks_path(arg: Option<String>, config: &Config) -> anyhow::Result<PathBuf> {
    match arg.or_else(|| config.bookmarks_file.clone()) {
        Some(path) => Ok(PathBuf::from(path)),
        None => bail!("no bookmarks file given, pass --bookmarks or set bookmarks_file in config.yaml"),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn report_drain(outcome: DrainOutcome) -> anyhow::Result<()> {
    print_json(&outcome)?;

    match outcome {
        DrainOutcome::NeedsReset { session, .. } => {
            bail!("sync status is held by session {session}, run `marksync reset` if it is gone")
        }
        DrainOutcome::Aborted {
            failed_at, reason, ..
        } => bail!("sync stopped at {}: {reason}", failed_at.url),
        _ => Ok(()),
    }
}

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();
    init_logging();

    let paths = AppFactory::get_paths()?;

    match args.command {
        #[cfg(feature = "markdown-docs")]
        cli::Command::MarkdownDocs {} => {
            clap_markdown::print_help_markdown::<cli::Args>();
            Ok(())
        }

        cli::Command::Daemon {} => {
            let ctx = AppFactory::create_context(&paths)?;
            web::start_daemon(ctx)
        }

        cli::Command::Sync { bookmarks, dry_run } => {
            let ctx = AppFactory::create_context(&paths)?;
            let tree = bookmarks::load_tree(&bookmarks_path(bookmarks, ctx.config())?)?;
            let reconciler = ctx.reconciler();

            if dry_run {
                let user = ctx.store().require_user()?;
                let remote_urls = reconciler.remote().active_urls(&user.id)?;
                let pending = reconciler.preview_diff(&tree, &remote_urls);
                print_json(&pending)?;
                println!("{} bookmarks would be synced", pending.len());
                return Ok(());
            }

            report_drain(reconciler.full_sync(&tree)?)
        }

        cli::Command::Drain {} => {
            let ctx = AppFactory::create_context(&paths)?;
            report_drain(ctx.reconciler().drain_queue()?)
        }

        cli::Command::Status {} => {
            let store = AppFactory::create_store(&paths)?;
            let user = store.user()?;
            let status = store.status()?;

            print_json(&serde_json::json!({
                "user": user.map(|u| u.id),
                "status": status,
                "pending": store.pending()?,
            }))?;

            if status.is_running() {
                println!("A sync is in progress. If its process is gone, run `marksync reset`");
            }
            Ok(())
        }

        cli::Command::Reset { yes } => {
            let store = AppFactory::create_store(&paths)?;

            let status = store.status()?;
            let SyncStatus::Running {
                session,
                started_at,
            } = &status
            else {
                println!("Sync status is already idle");
                return Ok(());
            };

            if !yes {
                match inquire::prompt_confirmation(format!(
                    "Session {session} has been syncing since {started_at}. Make sure it is not running anymore. Reset?"
                )) {
                    InquireResult::Ok(true) => {}
                    InquireResult::Ok(false) => return Ok(()),
                    InquireResult::Err(err) => bail!("An error occurred: {}", err),
                }
            }

            store.reset_status()?;
            println!("Sync status reset");
            Ok(())
        }

        cli::Command::Ask {
            question,
            threshold,
        } => {
            let ctx = AppFactory::create_context(&paths)?;
            let user = ctx.store().require_user()?;
            let threshold = threshold.unwrap_or(ctx.config().search.default_threshold);

            let response = ctx.dispatcher().ask(&user.id, &question, threshold);
            print_json(&response)?;

            if let Some(error) = response.error {
                bail!("search failed: {error}");
            }
            Ok(())
        }

        cli::Command::Login {
            user_id,
            access_token,
        } => {
            let user_id = user_id.trim().to_string();
            if user_id.is_empty() {
                bail!("user id must not be empty");
            }

            let store = AppFactory::create_store(&paths)?;
            store.set_user(&UserIdentity {
                id: user_id.clone(),
                access_token,
            })?;
            println!("Signed in as {user_id}");
            Ok(())
        }

        cli::Command::Watch {
            bookmarks,
            interval,
        } => {
            let ctx = AppFactory::create_context(&paths)?;
            let path = bookmarks_path(bookmarks, ctx.config())?;
            ctx.store().require_user()?;

            let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel();
            ctrlc::set_handler(move || {
                log::info!("Received shutdown signal");
                let _ = shutdown_tx.send(());
            })
            .context("Failed to set Ctrl+C handler")?;

            let (queue, handle) = TaskQueue::start(ctx.reconciler());
            let watched = watch::run(
                watch::SnapshotWatcher::new(path),
                &queue,
                Duration::from_secs(interval.max(1)),
                shutdown_rx,
            );

            queue.shutdown();
            log::warn!("waiting for task queue to stop");
            if handle.join().is_err() {
                log::error!("task queue thread panicked");
            }

            watched
        }
    }
}
