use crate::app::cli::DaemonArgs;
use crate::app::command_support::{build_engine, map_err, open_context};
use crate::channels::slack::{
    run_socket_mode, SlackApiClient, SlackIngest, SlackPoster, SLACK_APP_TOKEN_ENV,
    SLACK_BOT_TOKEN_ENV, SLACK_SIGNING_SECRET_ENV,
};
use crate::config::{FogConfig, SlackMode};
use crate::notify::{DesktopNotifier, NotificationRouter};
use crate::server::{serve, AppState, SlackHttp};
use crate::store::SETTING_CLOUD_URL;
use clap::error::ErrorKind as ClapErrorKind;
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlackSettings {
    pub mode: SlackMode,
    pub bot_token: String,
    pub app_token: Option<String>,
    pub signing_secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonSettings {
    pub host: String,
    pub port: u16,
    pub slack: Option<SlackSettings>,
    pub cloud_url: Option<String>,
}

fn first_set(candidates: [Option<String>; 3]) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

/// Flags win over `config.yaml`; the `SLACK_*` environment only fills
/// credentials neither of them set.
pub fn resolve_settings(
    args: &DaemonArgs,
    config: &FogConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Result<DaemonSettings, String> {
    let slack = if args.enable_slack {
        let mode = args.slack_mode.unwrap_or(config.slack.mode);
        let bot_token = first_set([
            args.slack_bot_token.clone(),
            config.slack.bot_token.clone(),
            env(SLACK_BOT_TOKEN_ENV),
        ])
        .ok_or_else(|| {
            format!("slack is enabled but no bot token is set; pass --slack-bot-token or set {SLACK_BOT_TOKEN_ENV}")
        })?;
        let app_token = first_set([
            args.slack_app_token.clone(),
            config.slack.app_token.clone(),
            env(SLACK_APP_TOKEN_ENV),
        ]);
        if mode == SlackMode::Socket && app_token.is_none() {
            return Err(format!(
                "slack socket mode needs an app token; pass --slack-app-token or set {SLACK_APP_TOKEN_ENV}"
            ));
        }
        let signing_secret = first_set([
            args.slack_secret.clone(),
            config.slack.signing_secret.clone(),
            env(SLACK_SIGNING_SECRET_ENV),
        ]);
        Some(SlackSettings {
            mode,
            bot_token,
            app_token,
            signing_secret,
        })
    } else {
        None
    };

    Ok(DaemonSettings {
        host: args.host.trim().to_string(),
        port: args.port.unwrap_or(config.http_port),
        slack,
        cloud_url: args
            .cloud_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string),
    })
}

pub fn run_daemon_cli(args: Vec<String>) -> Result<String, String> {
    let parsed = match DaemonArgs::try_parse_from(std::iter::once("fogd".to_string()).chain(args))
    {
        Ok(parsed) => parsed,
        Err(err) => {
            return match err.kind() {
                ClapErrorKind::DisplayHelp | ClapErrorKind::DisplayVersion => {
                    Ok(err.render().to_string().trim_end().to_string())
                }
                _ => Err(err.render().to_string().trim_end().to_string()),
            };
        }
    };
    run_daemon(&parsed)
}

/// Serves HTTP (and Slack, when enabled) until SIGINT/SIGTERM. Running task
/// threads are left to finish on their own.
pub fn run_daemon(args: &DaemonArgs) -> Result<String, String> {
    let ctx = open_context()?;
    let settings = resolve_settings(args, &ctx.config, |key| std::env::var(key).ok())?;

    if let Some(url) = &settings.cloud_url {
        ctx.store
            .set_setting(SETTING_CLOUD_URL, url)
            .map_err(map_err)?;
        tracing::warn!(cloud_url = %url, "cloud relay pairing is not available in this build; url stored only");
    }
    if args.cloud_poll_interval.is_some() && settings.cloud_url.is_none() {
        tracing::warn!("--cloud-poll-interval has no effect without --cloud-url");
    }

    let slack_api = settings.slack.as_ref().map(|slack| {
        Arc::new(SlackApiClient::new(
            slack.bot_token.clone(),
            slack.app_token.clone(),
        ))
    });
    let poster = slack_api
        .clone()
        .map(|api| api as Arc<dyn SlackPoster>);
    let notifier = NotificationRouter::new(poster.clone(), Arc::new(DesktopNotifier::new()));
    let engine = build_engine(&ctx, Arc::new(notifier));

    let in_flight = ctx.store.list_active_tasks().map_err(map_err)?;
    if !in_flight.is_empty() {
        tracing::warn!(count = in_flight.len(), "tasks from an earlier run are still marked in progress");
    }

    let stop = Arc::new(AtomicBool::new(false));
    let mut state = AppState::new(engine.clone());
    let mut socket_thread = None;
    if let (Some(slack), Some(api), Some(poster)) = (&settings.slack, &slack_api, &poster) {
        let ingest = Arc::new(SlackIngest::new(
            Arc::clone(&ctx.store),
            Arc::new(engine.clone()),
            Arc::clone(poster),
            ctx.config.branch_prefix.clone(),
        ));
        match slack.mode {
            SlackMode::Socket => {
                let api = Arc::clone(api);
                let stop = Arc::clone(&stop);
                socket_thread = Some(thread::spawn(move || run_socket_mode(&api, ingest, &stop)));
                tracing::info!("slack socket mode enabled");
            }
            SlackMode::Http => {
                if slack.signing_secret.is_none() {
                    tracing::warn!("slack http mode without a signing secret accepts unsigned requests");
                }
                state = state.with_slack(SlackHttp {
                    ingest,
                    signing_secret: slack.signing_secret.clone(),
                });
                tracing::info!("slack http mode enabled at /slack/commands");
            }
        }
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| format!("failed to start async runtime: {err}"))?;
    let addr = format!("{}:{}", settings.host, settings.port);
    let served = runtime.block_on(async {
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|err| format!("failed to bind {addr}: {err}"))?;
        serve(listener, state, shutdown_signal(Arc::clone(&stop)))
            .await
            .map_err(|err| format!("http server failed: {err}"))
    });

    stop.store(true, Ordering::SeqCst);
    if let Some(handle) = socket_thread {
        match handle.join() {
            Ok(Err(err)) => tracing::warn!(error = %err, "slack socket loop ended with an error"),
            Err(_) => tracing::error!("slack socket thread panicked"),
            Ok(Ok(())) => {}
        }
    }
    served?;
    Ok("fogd stopped".to_string())
}

async fn shutdown_signal(stop: Arc<AtomicBool>) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown requested");
    stop.store(true, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn args(extra: &[&str]) -> DaemonArgs {
        DaemonArgs::try_parse_from(std::iter::once("fogd").chain(extra.iter().copied()))
            .expect("parse")
    }

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn slack_disabled_ignores_credentials() {
        let settings =
            resolve_settings(&args(&[]), &FogConfig::default(), env_of(&[])).expect("resolve");
        assert_eq!(settings.port, 8080);
        assert_eq!(settings.slack, None);
    }

    #[test]
    fn flags_beat_file_and_env_fills_gaps() {
        let mut config = FogConfig::default();
        config.slack.bot_token = Some("xoxb-file".to_string());
        config.slack.mode = SlackMode::Http;
        let settings = resolve_settings(
            &args(&["--enable-slack", "--slack-bot-token", "xoxb-flag", "--port", "9000"]),
            &config,
            env_of(&[(SLACK_SIGNING_SECRET_ENV, "from-env")]),
        )
        .expect("resolve");
        let slack = settings.slack.expect("slack");
        assert_eq!(settings.port, 9000);
        assert_eq!(slack.mode, SlackMode::Http);
        assert_eq!(slack.bot_token, "xoxb-flag");
        assert_eq!(slack.signing_secret.as_deref(), Some("from-env"));
    }

    #[test]
    fn socket_mode_requires_app_token() {
        let err = resolve_settings(
            &args(&["--enable-slack", "--slack-mode", "socket"]),
            &FogConfig::default(),
            env_of(&[(SLACK_BOT_TOKEN_ENV, "xoxb")]),
        )
        .expect_err("missing app token");
        assert!(err.contains("app token"));

        let ok = resolve_settings(
            &args(&["--enable-slack"]),
            &FogConfig::default(),
            env_of(&[(SLACK_BOT_TOKEN_ENV, "xoxb"), (SLACK_APP_TOKEN_ENV, "xapp")]),
        )
        .expect("resolve");
        assert_eq!(ok.slack.expect("slack").app_token.as_deref(), Some("xapp"));
    }

    #[test]
    fn missing_bot_token_is_reported() {
        let err = resolve_settings(&args(&["--enable-slack"]), &FogConfig::default(), env_of(&[]))
            .expect_err("missing bot token");
        assert!(err.contains("bot token"));
    }
}
