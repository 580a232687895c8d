//! Fakes shared by the app crate's tests.

use crate::content::WidgetFactory;
use crate::surface::{ListenerId, RenderSurface, WindowEvent};
use crate::widget::WidgetServices;
use async_trait::async_trait;
use parking_lot::Mutex;
use providers::{ApiClient, HttpTransport, OutboundRequest, TransportResponse};
use serde_json::json;
use services::page::HtmlPage;
use services::{ContextExtractor, CredentialStore, KeyValueStore, MemoryStore, UsageTracker};
use shared::agent_api::ChatTurn;
use shared::page::{Size, WidgetPosition};
use shared::settings::AssistantSettings;
use shared::usage::UsageSnapshot;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct SurfaceLog {
    pub mounted: bool,
    pub detached: usize,
    pub visible: bool,
    pub positions: Vec<WidgetPosition>,
    pub turns: Vec<ChatTurn>,
    pub input_toggles: Vec<bool>,
    pub credits: Vec<UsageSnapshot>,
    pub active_listeners: HashSet<ListenerId>,
    /// Overrides the surface's viewport, e.g. to simulate a window resize
    pub viewport: Option<Size>,
}

/// Surface that records every call into a shared log.
pub struct RecordingSurface {
    pub log: Arc<Mutex<SurfaceLog>>,
    pub viewport: Size,
    pub fail_mount: bool,
    next_listener: u64,
}

impl RecordingSurface {
    pub fn new() -> (Self, Arc<Mutex<SurfaceLog>>) {
        let log = Arc::new(Mutex::new(SurfaceLog::default()));
        (
            Self {
                log: log.clone(),
                viewport: Size {
                    width: 1280.0,
                    height: 800.0,
                },
                fail_mount: false,
                next_listener: 0,
            },
            log,
        )
    }
}

impl RenderSurface for RecordingSurface {
    fn mount(&mut self) -> anyhow::Result<()> {
        if self.fail_mount {
            anyhow::bail!("document.body is not available");
        }
        self.log.lock().mounted = true;
        Ok(())
    }
    fn viewport(&self) -> Size {
        self.log.lock().viewport.unwrap_or(self.viewport)
    }
    fn set_visible(&mut self, visible: bool) {
        self.log.lock().visible = visible;
    }
    fn set_position(&mut self, position: WidgetPosition) {
        self.log.lock().positions.push(position);
    }
    fn append_turn(&mut self, turn: &ChatTurn) {
        self.log.lock().turns.push(turn.clone());
    }
    fn set_input_enabled(&mut self, enabled: bool) {
        self.log.lock().input_toggles.push(enabled);
    }
    fn show_credits(&mut self, usage: &UsageSnapshot) {
        self.log.lock().credits.push(*usage);
    }
    fn listen(&mut self, _event: WindowEvent) -> ListenerId {
        self.next_listener += 1;
        let id = ListenerId(self.next_listener);
        self.log.lock().active_listeners.insert(id);
        id
    }
    fn unlisten(&mut self, id: ListenerId) {
        self.log.lock().active_listeners.remove(&id);
    }
    fn detach(&mut self) {
        let mut log = self.log.lock();
        log.detached += 1;
        log.mounted = false;
    }
}

/// Widget factory handing out recording surfaces and keeping their logs.
pub struct RecordingFactory {
    services: WidgetServices,
    logs: Mutex<Vec<Arc<Mutex<SurfaceLog>>>>,
    fail_mounts: AtomicUsize,
}

impl RecordingFactory {
    pub fn new(services: WidgetServices) -> Self {
        Self {
            services,
            logs: Mutex::new(Vec::new()),
            fail_mounts: AtomicUsize::new(0),
        }
    }

    /// The next surface handed out refuses to mount.
    pub fn fail_next_mount(&self) {
        self.fail_mounts.fetch_add(1, Ordering::SeqCst);
    }

    pub fn built(&self) -> usize {
        self.logs.lock().len()
    }

    pub fn logs(&self) -> Vec<Arc<Mutex<SurfaceLog>>> {
        self.logs.lock().clone()
    }
}

impl WidgetFactory for RecordingFactory {
    fn services(&self) -> WidgetServices {
        self.services.clone()
    }

    fn surface(&self) -> Box<dyn RenderSurface> {
        let (mut surface, log) = RecordingSurface::new();
        surface.fail_mount = self
            .fail_mounts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        self.logs.lock().push(log);
        Box::new(surface)
    }
}

/// Transport answering from a script, counting calls.
#[derive(Default)]
pub struct StubTransport {
    pub replies: Mutex<VecDeque<anyhow::Result<TransportResponse>>>,
    pub calls: AtomicUsize,
    pub latency: Duration,
    pub last_request: Mutex<Option<OutboundRequest>>,
}

impl StubTransport {
    pub fn replying(replies: Vec<anyhow::Result<TransportResponse>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn reply(text: &str) -> anyhow::Result<TransportResponse> {
    Ok(TransportResponse {
        status: 200,
        body: json!({"content": [{"type": "text", "text": text}]}).to_string(),
    })
}

pub fn status(code: u16, body: &str) -> anyhow::Result<TransportResponse> {
    Ok(TransportResponse {
        status: code,
        body: body.to_string(),
    })
}

#[async_trait]
impl HttpTransport for StubTransport {
    async fn post(&self, request: OutboundRequest) -> anyhow::Result<TransportResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock() = Some(request);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| reply("ok"))
    }
}

pub const ARTICLE: &str = "<html><head><title>Tide Pools</title></head><body>\
    <main><p>Tide pools are rocky pockets of seawater left behind by the ebbing tide. \
    They host anemones, sea stars, crabs and a surprising number of small fish.</p></main>\
    </body></html>";

/// Everything a widget needs, over in-memory storage and a stub transport.
pub struct Rig {
    pub storage: Arc<dyn KeyValueStore>,
    pub credentials: Arc<CredentialStore>,
    pub usage: Arc<UsageTracker>,
    pub api: Arc<ApiClient>,
    pub page: Arc<HtmlPage>,
    pub services: WidgetServices,
}

impl Rig {
    pub async fn new(transport: Arc<StubTransport>) -> Self {
        Self::with_storage(transport, Arc::new(MemoryStore::new())).await
    }

    pub async fn with_storage(
        transport: Arc<StubTransport>,
        storage: Arc<dyn KeyValueStore>,
    ) -> Self {
        let settings = AssistantSettings::default();
        let credentials = Arc::new(CredentialStore::new(storage.clone()));
        credentials.set("sk-ant-test-key").await.unwrap();
        let usage = Arc::new(UsageTracker::with_quota(storage.clone(), settings.quota));
        let api = Arc::new(ApiClient::new(transport, credentials.clone(), settings.clone()));
        let page = Arc::new(HtmlPage::new("https://example.test/tides", ARTICLE));
        let services = WidgetServices {
            api: api.clone(),
            context: Arc::new(ContextExtractor::new(page.clone(), &settings)),
            usage: usage.clone(),
            storage: storage.clone(),
        };
        Self {
            storage,
            credentials,
            usage,
            api,
            page,
            services,
        }
    }
}
