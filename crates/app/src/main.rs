//! Terminal harness: one tab showing a local HTML file, driven from stdin.

use anyhow::{Context, Result};
use app::surface::{RenderSurface, SharedViewport, TerminalSurface, WindowEvent};
use app::{
    BackgroundService, LocalTabHost, PopupController, ServiceFactory, StatusBanner, TabCoordinator,
    WidgetFactory, WidgetServices,
};
use providers::{ApiClient, ReqwestTransport};
use services::page::HtmlPage;
use services::{ContextExtractor, CredentialStore, JsonFileStore, KeyValueStore, UsageTracker};
use shared::page::Size;
use shared::protocol::{Request, TabId};
use shared::settings::AssistantSettings;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

const TAB: TabId = 1;
const VIEWPORT: Size = Size {
    width: 1280.0,
    height: 800.0,
};

const HELP: &str = "commands: /open  /key <api-key>  /verify  /credits  /reset  \
/select <text>  /resize <width> <height>  /help  /quit  (anything else is sent to the assistant)";

struct Args {
    page: Option<PathBuf>,
    url: String,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        page: None,
        url: "https://example.com/".to_string(),
    };
    let mut it = std::env::args().skip(1);
    while let Some(flag) = it.next() {
        match flag.as_str() {
            "--page" => args.page = Some(it.next().context("--page needs a file")?.into()),
            "--url" => args.url = it.next().context("--url needs a value")?,
            other => anyhow::bail!("unknown argument: {}\nusage: hover-assistant [--page <file.html>] [--url <url>]", other),
        }
    }
    Ok(args)
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("com.local", "Hover Assistant", "HoverAssistant")
}

fn load_settings() -> AssistantSettings {
    let Some(proj) = project_dirs() else {
        return AssistantSettings::default();
    };
    let path = proj.config_dir().join("settings.json");
    match AssistantSettings::load(&path) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable settings");
            AssistantSettings::default()
        }
    }
}

async fn open_storage() -> Result<Arc<dyn KeyValueStore>> {
    let proj = project_dirs().context("no home directory for persisted state")?;
    let store = JsonFileStore::open(proj.data_dir().join("storage.json")).await?;
    tracing::info!(path = %store.path().display(), "storage opened");
    Ok(Arc::new(store))
}

fn parse_size(raw: &str) -> Option<Size> {
    let mut parts = raw.split_whitespace().map(str::parse::<f64>);
    let width = parts.next()?.ok()?;
    let height = parts.next()?.ok()?;
    (width > 0.0 && height > 0.0).then_some(Size { width, height })
}

fn print_banner(banner: &StatusBanner) {
    println!("[{:?}] {}", banner.kind, banner.message);
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args()?;
    let settings = load_settings();
    let storage = open_storage().await?;

    let html = match &args.page {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?,
        None => "<html><head><title>Blank</title></head><body></body></html>".to_string(),
    };
    let page = Arc::new(HtmlPage::new(args.url.clone(), html));

    let credentials = Arc::new(CredentialStore::new(storage.clone()).with_fallback(".env"));
    if credentials.get().await?.is_none() {
        println!("No API key configured yet. Use /key <api-key>.");
    }
    let usage = Arc::new(UsageTracker::with_quota(storage.clone(), settings.quota));
    let transport = Arc::new(ReqwestTransport::new(Duration::from_secs(
        settings.request_timeout_secs,
    )));
    let api = Arc::new(ApiClient::new(transport, credentials.clone(), settings.clone()));

    let services = WidgetServices {
        api: api.clone(),
        context: Arc::new(ContextExtractor::new(page.clone(), &settings)),
        usage: usage.clone(),
        storage: storage.clone(),
    };
    let viewport: SharedViewport = Arc::new(parking_lot::RwLock::new(VIEWPORT));
    let surface_viewport = viewport.clone();
    let factory: Arc<dyn WidgetFactory> = Arc::new(ServiceFactory::new(services, move || {
        Box::new(TerminalSurface::new(surface_viewport.clone())) as Box<dyn RenderSurface>
    }));
    let host = Arc::new(LocalTabHost::new(factory, settings.clone()));
    host.open_tab(TAB, args.url.clone());
    let coordinator = Arc::new(TabCoordinator::new(host.clone(), &settings));
    let background = Arc::new(BackgroundService::new(
        credentials.clone(),
        api,
        coordinator.clone(),
    ));
    let popup = PopupController::new(background.clone(), credentials, usage);

    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        match command {
            "" => {}
            "/quit" | "/exit" => break,
            "/help" => println!("{}", HELP),
            "/open" => {
                if let Some(banner) = popup.open_assistant(Some(TAB)).await {
                    print_banner(&banner);
                }
            }
            "/key" => print_banner(&popup.save_credential(rest).await),
            "/verify" => {
                let resp = background
                    .handle(Request::ValidateApiKey { live: true }, None)
                    .await;
                match resp.error {
                    None => print_banner(&StatusBanner::success("API key is valid")),
                    Some(e) => print_banner(&StatusBanner::error(e)),
                }
            }
            "/credits" => {
                let view = popup.load().await;
                println!(
                    "key: {}  credits: {}",
                    view.credential.as_deref().unwrap_or("(not set)"),
                    view.credits_label()
                );
            }
            "/reset" => print_banner(&popup.reset_credits().await.0),
            "/resize" => match parse_size(rest) {
                Some(size) => {
                    *viewport.write() = size;
                    host.window_event(TAB, WindowEvent::Resize).await;
                }
                None => println!("usage: /resize <width> <height>"),
            },
            "/select" => {
                page.select(rest);
                let resp = background
                    .handle(
                        Request::ProcessSelection {
                            selected_text: rest.to_string(),
                        },
                        Some(TAB),
                    )
                    .await;
                page.clear_selection();
                if let Some(e) = resp.error {
                    print_banner(&StatusBanner::error(e));
                }
            }
            _ => {
                if host.content(TAB).is_none() {
                    if let Some(banner) = popup.open_assistant(Some(TAB)).await {
                        print_banner(&banner);
                        continue;
                    }
                }
                if let Some(content) = host.content(TAB) {
                    if let Err(e) = content.send_message(line).await {
                        print_banner(&StatusBanner::error(e.to_string()));
                    }
                }
            }
        }
    }

    host.close_tab(TAB).await;
    coordinator.on_tab_removed(TAB);
    Ok(())
}
