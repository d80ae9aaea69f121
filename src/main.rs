//! reelsync: inspect and edit user data from the command line.
//!
//! Usage: reelsync <command> [args]
//! Every command prints one JSON document to stdout; logs go to stderr.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use serde_json::{json, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reelsync::backend::Environment;
use reelsync::cache::{now_ms, CacheManager};
use reelsync::config::Config;
use reelsync::events::EventBus;
use reelsync::kv::{KvStore, RedbKv};
use reelsync::model::Favorite;
use reelsync::session::{username_from_cookie, Session};
use reelsync::storage::{self, StoreContext, UserDataStore};

const USAGE: &str = "\
Usage: reelsync <command>

  status                          backend and cache state
  records                         list play records
  favorites                       list favorites
  history [add|rm <term>|clear]   list or edit search history
  favorite <source> <id> <title>  add a favorite
  unfavorite <source> <id>        remove a favorite
  refresh                         re-fetch everything from the remote
  clear-cache                     drop the current user's cache
  sweep                           delete expired cache entries";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reelsync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{USAGE}");
        std::process::exit(1);
    };

    let config = Config::load()?;
    let kv: Arc<dyn KvStore> = Arc::new(RedbKv::create(&config.data_file_path()?)?);

    if command == "sweep" {
        let cache = CacheManager::new(kv, Duration::from_secs(config.cache.expiry_secs));
        return print(json!({ "removed": cache.clear_expired() }));
    }

    // Explicit username wins over the one carried by the auth cookie.
    let cookie = std::env::var("REELSYNC_COOKIE").ok();
    let username = config
        .user
        .username
        .clone()
        .or_else(|| cookie.as_deref().and_then(username_from_cookie));

    let ctx = StoreContext {
        kv,
        bus: EventBus::new(),
        session: Arc::new(Session::with_username(username)),
        env: Environment::default(),
    };
    let store = storage::open(&config, ctx, cookie).await?;

    let output = run(store.as_ref(), command, &args[1..]).await?;
    print(output)
}

async fn run(store: &dyn UserDataStore, command: &str, args: &[String]) -> Result<Value> {
    match (command, args) {
        ("status", _) => Ok(json!({
            "backend": store.mode().name(),
            "remote": store.mode().is_remote(),
            "cache": store.cache_status(),
        })),
        ("records", _) => Ok(serde_json::to_value(store.get_all_play_records().await)?),
        ("favorites", _) => Ok(serde_json::to_value(store.get_all_favorites().await)?),
        ("history", []) => Ok(serde_json::to_value(store.get_search_history().await)?),
        ("history", [action, term]) if action == "add" => {
            store.add_search_history(term).await?;
            Ok(serde_json::to_value(store.get_search_history().await)?)
        }
        ("history", [action, term]) if action == "rm" => {
            store.delete_search_history(term).await?;
            Ok(serde_json::to_value(store.get_search_history().await)?)
        }
        ("history", [action]) if action == "clear" => {
            store.clear_search_history().await?;
            Ok(json!([]))
        }
        ("favorite", [source, id, title]) => {
            let favorite = Favorite {
                title: title.clone(),
                source_name: source.clone(),
                year: String::new(),
                cover: String::new(),
                total_episodes: 1,
                save_time: now_ms(),
                search_title: None,
            };
            store.save_favorite(source, id, favorite).await?;
            Ok(json!({ "favorited": store.is_favorited(source, id).await }))
        }
        ("unfavorite", [source, id]) => {
            store.delete_favorite(source, id).await?;
            Ok(json!({ "favorited": store.is_favorited(source, id).await }))
        }
        ("refresh", _) => {
            store.refresh_all_cache().await;
            Ok(json!({ "cache": store.cache_status() }))
        }
        ("clear-cache", _) => {
            store.clear_user_cache();
            Ok(json!({ "cache": store.cache_status() }))
        }
        _ => bail!("unknown command: {} {}\n\n{}", command, args.join(" "), USAGE),
    }
}

fn print(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
