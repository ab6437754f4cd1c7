//! Photo booth kiosk - camera capture, compose and upload pipeline.
//!
//! Architecture:
//! - `state` module: hardware-free capture state machine (testable)
//! - `app` module: bridges the state machine to the camera, compositor and backend
//! - `compose` module: still-frame compositor and watermark loading
//! - `video` module: camera stream ownership, GStreamer and synthetic cameras
//! - `api` module: HTTP client and admin auth session
//!
//! The front end is a line-oriented console: type `capture`, `retake`,
//! `confirm`, `mirror`, `status` or `quit`.

use std::rc::Rc;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

mod api;
mod app;
mod compose;
mod config;
mod state;
mod video;

use api::{ApiClient, ApiError, AuthSession};
use app::{AppContext, AppMessage, MessageSender};
use config::KioskConfig;
use state::CaptureEvent;

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Starting photo booth kiosk");

    let config = KioskConfig::from_env();
    log::info!("Backend at {}, camera {:?}", config.api_base, config.camera);

    // Create tokio runtime for async operations
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => Arc::new(runtime),
        Err(e) => {
            log::error!("Failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    let client = ApiClient::new(config.api_base.clone());
    let device = video::open_device(&config.camera);
    let (ctx, rx) = AppContext::new(runtime.clone(), device, Arc::new(client.clone()), config.mirror);

    if let Err(e) = ctx.mount() {
        log::error!("{}", e);
    }

    let refresher = runtime.spawn(refresh_settings(
        client,
        config.clone(),
        ctx.message_tx.clone(),
    ));

    runtime.block_on(run_console(ctx.clone(), rx));

    refresher.abort();
    ctx.teardown();

    log::info!("Photo booth kiosk shutting down");
}

/// Drive the session from stdin until `quit` or end of input
async fn run_console(ctx: Rc<AppContext>, mut rx: mpsc::UnboundedReceiver<AppMessage>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{}", ctx.status());

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        log::error!("Failed to read input: {}", e);
                        break;
                    }
                };

                match line.trim() {
                    "" => continue,
                    "capture" | "c" => {
                        if let Err(e) = ctx.capture() {
                            println!("{}", e);
                        }
                    }
                    "retake" | "r" => ctx.retake(),
                    "confirm" | "u" => ctx.confirm(),
                    "mirror" | "m" => ctx.toggle_mirror(),
                    "status" | "s" => {}
                    "quit" | "q" => break,
                    other => {
                        println!("Unknown command '{}' (capture, retake, confirm, mirror, status, quit)", other);
                        continue;
                    }
                }
                println!("{}", ctx.status());
            }

            Some(msg) = rx.recv() => {
                let before = ctx.status();
                ctx.handle_message(msg);
                let after = ctx.status();
                if after != before {
                    println!("{}", after);
                }
            }
        }
    }
}

/// Periodically pull branding settings and hand them to the session
async fn refresh_settings(client: ApiClient, config: KioskConfig, tx: MessageSender) {
    let mut session: Option<AuthSession> = None;
    let mut interval = tokio::time::interval(config.settings_refresh);

    loop {
        interval.tick().await;

        if let Some(admin) = &config.admin {
            if !session.as_ref().is_some_and(AuthSession::is_valid) {
                match client.login(&admin.username, &admin.password).await {
                    Ok(fresh) => session = Some(fresh),
                    Err(e) => {
                        log::error!("Admin login failed: {}", e);
                        continue;
                    }
                }
            }
        }

        match client.fetch_settings(session.as_ref()).await {
            Ok(settings) => {
                let logo_url = settings.logo_url(client.base());
                tx.send(AppMessage::Event(CaptureEvent::SettingsLoaded {
                    page_title: settings.page_title,
                    logo_url,
                }));
            }
            Err(ApiError::SessionExpired) => {
                log::warn!("Admin session expired, logging in again");
                if let Some(expired) = session.take() {
                    expired.logout();
                }
            }
            Err(e) => log::error!("Failed to fetch settings: {}", e),
        }
    }
}
