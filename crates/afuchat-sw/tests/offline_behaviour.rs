//! End-to-end behaviour of a registered worker against a scripted network.

use std::sync::Arc;
use std::time::Duration;

use afuchat_common::ManualClock;
use afuchat_net::{Destination, Request, Response, ScriptedFetcher};
use afuchat_sw::{
    CacheStorage, Client, ClientMessage, Clients, FetchOutcome, MessageEffect, OfflineWorker,
    PageController, RecordingNotificationSink, Registration, RegistrationEvent, SwConfig,
    WorkerContext, WorkerSlot,
};
use tokio::sync::mpsc::UnboundedReceiver;
use url::Url;

const SHELL: &str = "https://afuchat.com/";
const INDEX: &str = "https://afuchat.com/index.html";
const CHAT: &str = "https://afuchat.com/chats/7";
const AVATAR: &str = "https://afuchat.com/img/avatar.png";
const POSTS: &str = "https://afuchat.supabase.co/rest/v1/posts?select=*";

struct App {
    registration: Registration,
    events: UnboundedReceiver<RegistrationEvent>,
    fetcher: Arc<ScriptedFetcher>,
    sink: Arc<RecordingNotificationSink>,
    clock: ManualClock,
    context: WorkerContext,
}

impl App {
    fn new() -> Self {
        let fetcher = Arc::new(ScriptedFetcher::new());
        let sink = Arc::new(RecordingNotificationSink::new());
        let clock = ManualClock::new(1_700_000_000_000);
        let context = WorkerContext::new(
            CacheStorage::new(Arc::new(clock.clone())).shared(),
            fetcher.clone(),
            Clients::new().shared(),
            sink.clone(),
        );
        let (registration, events) = Registration::new(Url::parse(SHELL).unwrap());
        Self {
            registration,
            events,
            fetcher,
            sink,
            clock,
            context,
        }
    }

    fn worker(&self, version: &str) -> OfflineWorker {
        let config = SwConfig {
            version: version.to_string(),
            ..Default::default()
        };
        OfflineWorker::new(config, self.context.clone()).unwrap()
    }

    async fn install(&mut self, version: &str) {
        let worker = self.worker(version);
        self.registration.register(worker).await.unwrap();
    }

    async fn fetch(&self, request: Request) -> Response {
        match self.registration.handle_fetch(&request).await {
            FetchOutcome::Respond(response) => response,
            FetchOutcome::Passthrough => panic!("{} was not intercepted", request.url),
        }
    }

    async fn navigate(&self, url: &str) -> Response {
        self.fetch(Request::navigate(Url::parse(url).unwrap())).await
    }

    async fn buckets(&self) -> Vec<String> {
        self.context.storage.read().await.keys()
    }

    async fn bucket_len(&self, name: &str) -> usize {
        self.context
            .storage
            .read()
            .await
            .get(name)
            .map(|cache| cache.len())
            .unwrap_or(0)
    }

    async fn idle(&self) {
        if let Some(active) = self.registration.active() {
            active.worker().wait_until_idle().await;
        }
    }

    fn drain_events(&mut self) -> Vec<RegistrationEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

fn image(url: &str) -> Request {
    Request::parse(url).unwrap().destination(Destination::Image)
}

#[tokio::test]
async fn test_repeated_cache_first_fetch_is_idempotent() {
    let mut app = App::new();
    app.install("1.0.0").await;
    app.fetcher.respond(AVATAR, Response::new(200, "png-bytes"));

    let first = app.fetch(image(AVATAR)).await;
    let second = app.fetch(image(AVATAR)).await;
    let third = app.fetch(image(AVATAR)).await;

    assert_eq!(first.body, second.body);
    assert_eq!(second.body, third.body);
    assert_eq!(app.fetcher.call_count(AVATAR), 1);
    assert_eq!(app.bucket_len("afuchat-images-v1.0.0").await, 1);
}

#[tokio::test]
async fn test_navigation_online_uses_network() {
    let mut app = App::new();
    app.install("1.0.0").await;
    app.fetcher.respond(CHAT, Response::html("<h1>chat 7</h1>"));

    let response = app.navigate(CHAT).await;
    assert!(!response.from_cache);
    assert_eq!(response.text().unwrap(), "<h1>chat 7</h1>");
    assert_eq!(app.bucket_len("afuchat-pages-v1.0.0").await, 1);
}

#[tokio::test]
async fn test_navigation_offline_serves_cached_document() {
    let mut app = App::new();
    app.install("1.0.0").await;
    app.fetcher.respond(CHAT, Response::html("<h1>chat 7</h1>"));
    app.navigate(CHAT).await;

    app.fetcher.set_online(false);
    let response = app.navigate(CHAT).await;
    assert!(response.from_cache);
    assert_eq!(response.text().unwrap(), "<h1>chat 7</h1>");
}

#[tokio::test]
async fn test_navigation_offline_falls_back_to_app_shell() {
    let mut app = App::new();
    app.fetcher
        .respond(SHELL, Response::html("<div id=root></div>"))
        .respond(INDEX, Response::html("<div id=root></div>"));
    app.install("1.0.0").await;

    app.fetcher.set_online(false);
    let response = app.navigate(CHAT).await;
    assert!(response.from_cache);
    assert_eq!(response.text().unwrap(), "<div id=root></div>");
}

#[tokio::test]
async fn test_navigation_with_nothing_cached_serves_offline_page() {
    let mut app = App::new();
    app.fetcher.set_online(false);
    app.install("1.0.0").await;

    let response = app.navigate(CHAT).await;
    assert_eq!(response.status, 200);
    assert!(response.text().unwrap().contains("You're offline"));
    assert_eq!(response.header("cache-control"), Some("no-cache"));
    assert_eq!(response.header("content-type"), Some("text/html; charset=utf-8"));
}

#[tokio::test]
async fn test_navigation_ignores_cache_age_when_offline() {
    let mut app = App::new();
    app.install("1.0.0").await;
    app.fetcher.respond(CHAT, Response::html("old but useful"));
    app.navigate(CHAT).await;

    app.clock.advance(Duration::from_secs(60 * 24 * 60 * 60));
    app.fetcher.set_online(false);
    let response = app.navigate(CHAT).await;
    assert_eq!(response.text().unwrap(), "old but useful");
}

#[tokio::test]
async fn test_activation_removes_every_old_version_bucket() {
    let mut app = App::new();
    app.fetcher
        .respond(SHELL, Response::html("shell"))
        .respond(INDEX, Response::html("index"))
        .respond(AVATAR, Response::new(200, "png"));
    app.install("1.0.0").await;
    app.fetch(image(AVATAR)).await;
    assert!(app.buckets().await.iter().any(|b| b.ends_with("-v1.0.0")));

    app.install("1.1.0").await;

    let buckets = app.buckets().await;
    assert!(!buckets.is_empty());
    assert!(buckets.iter().all(|b| b.ends_with("-v1.1.0")), "{buckets:?}");
    assert_eq!(app.registration.active().unwrap().version(), "1.1.0");
}

#[tokio::test]
async fn test_foreign_buckets_are_collected_too() {
    let mut app = App::new();
    app.context.storage.write().await.put(
        "legacy-assets",
        "https://afuchat.com/app.js",
        &Response::new(200, "x"),
        &afuchat_sw::ExpirationPolicy::none(),
    );
    app.install("1.0.0").await;
    assert!(!app.buckets().await.contains(&"legacy-assets".to_string()));
}

#[tokio::test]
async fn test_script_from_storage_path_is_a_static_asset() {
    let mut app = App::new();
    app.install("1.0.0").await;
    let url = "https://afuchat.supabase.co/storage/v1/object/public/widgets/embed.js";
    app.fetcher.respond(url, Response::new(200, "console.log(1)"));

    app.fetch(Request::parse(url).unwrap().destination(Destination::Script))
        .await;

    assert_eq!(app.bucket_len("afuchat-static-v1.0.0").await, 1);
    assert_eq!(app.bucket_len("afuchat-images-v1.0.0").await, 0);
}

#[tokio::test]
async fn test_realtime_and_mutations_pass_through() {
    let mut app = App::new();
    app.install("1.0.0").await;

    let realtime =
        Request::parse("https://afuchat.supabase.co/rest/v1/realtime/messages").unwrap();
    assert!(matches!(
        app.registration.handle_fetch(&realtime).await,
        FetchOutcome::Passthrough
    ));

    let post = Request::parse(POSTS).unwrap().method(http::Method::POST);
    assert!(matches!(
        app.registration.handle_fetch(&post).await,
        FetchOutcome::Passthrough
    ));
}

#[tokio::test]
async fn test_error_responses_are_never_cached() {
    let mut app = App::new();
    app.install("1.0.0").await;
    app.fetcher.respond(POSTS, Response::new(404, "not found"));

    let response = app.fetch(Request::parse(POSTS).unwrap()).await;
    app.idle().await;

    assert_eq!(response.status, 404);
    assert_eq!(app.bucket_len("afuchat-api-v1.0.0").await, 0);
}

#[tokio::test]
async fn test_cached_image_is_served_offline_without_network() {
    let mut app = App::new();
    app.install("1.0.0").await;
    app.fetcher.respond(AVATAR, Response::new(200, "png"));
    app.fetch(image(AVATAR)).await;

    app.fetcher.set_online(false);
    let response = app.fetch(image(AVATAR)).await;

    assert!(response.from_cache);
    assert_eq!(app.fetcher.call_count(AVATAR), 1);
}

#[tokio::test]
async fn test_api_responses_revalidate_in_background() {
    let mut app = App::new();
    app.install("1.0.0").await;
    app.fetcher.respond(POSTS, Response::new(200, "[1]"));
    app.fetch(Request::parse(POSTS).unwrap()).await;

    app.fetcher.respond(POSTS, Response::new(200, "[1,2]"));
    let stale = app.fetch(Request::parse(POSTS).unwrap()).await;
    assert_eq!(stale.text().unwrap(), "[1]");

    app.idle().await;
    let fresh = app.fetch(Request::parse(POSTS).unwrap()).await;
    assert_eq!(fresh.text().unwrap(), "[1,2]");
}

#[tokio::test]
async fn test_non_json_push_still_notifies() {
    let mut app = App::new();
    app.install("1.0.0").await;
    let worker = app.registration.active().unwrap().worker().clone();

    let notification = worker.on_push(Some(b"<<binary junk>>".as_slice())).await;

    assert_eq!(notification.title, "AfuChat");
    assert_eq!(notification.options.body.as_deref(), Some("<<binary junk>>"));
    assert_eq!(app.sink.shown().len(), 1);
}

#[tokio::test]
async fn test_message_protocol_round_trip() {
    let mut app = App::new();
    app.install("1.0.0").await;
    app.fetcher.respond(AVATAR, Response::new(200, "png"));
    app.fetch(image(AVATAR)).await;

    let page = PageController::new("client-x");
    assert_eq!(
        page.query_version(&app.registration, Duration::from_secs(1))
            .await
            .as_deref(),
        Some("1.0.0")
    );

    let effect = app
        .registration
        .post_message(WorkerSlot::Active, ClientMessage::ClearCache, None)
        .await
        .unwrap();
    assert!(matches!(effect, MessageEffect::CachesCleared(names) if !names.is_empty()));
    assert!(app.buckets().await.is_empty());
}

#[tokio::test]
async fn test_version_query_without_worker_is_unknown() {
    let app = App::new();
    let page = PageController::new("client-x");
    assert_eq!(
        page.query_version(&app.registration, Duration::from_secs(1)).await,
        None
    );
}

#[tokio::test]
async fn test_open_page_reloads_after_forced_update() {
    let mut app = App::new();
    let client = Client::window(Url::parse(CHAT).unwrap());
    let mut page = PageController::new(client.id.clone());
    app.context.clients.write().await.add(client);

    app.install("1.0.0").await;
    app.drain_events();
    app.install("1.1.0").await;

    let events = app.drain_events();
    let actions: Vec<_> = events
        .iter()
        .map(|event| page.handle_event(event, &app.registration))
        .collect();
    assert!(actions.contains(&afuchat_sw::PageAction::Reload));
}
