use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::info;
use uuid::Uuid;

use kiln_api::{build_app, AppState};
use kiln_builder::{Builder, LocalBuilder};
use kiln_bus::{EventBus, InMemoryBus, InMemoryLogStream, LogStream, STREAM_COMPLETE};
use kiln_domain::{ImageBuild, ImageExport, ResourceList};
use kiln_engine::{Engine, EngineConfig};
use kiln_store::{InMemoryStore, PostgresStore, Store};

use crate::cli::KindArg;
use crate::output;

// ── Server ────────────────────────────────────────────────────────────────────

pub async fn serve(
    bind: String,
    database_url: Option<String>,
    token: Option<String>,
    task_timeout: u64,
    watchdog_interval: u64,
    flush_interval: u64,
) -> Result<()> {
    let store: Arc<dyn Store> = match &database_url {
        Some(url) => Arc::new(
            PostgresStore::connect(url)
                .await
                .context("connecting to postgres")?,
        ),
        None => {
            info!("no database URL configured; using the in-memory store");
            Arc::new(InMemoryStore::new())
        }
    };
    let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
    let stream: Arc<dyn LogStream> = Arc::new(InMemoryLogStream::new());
    let builder: Arc<dyn Builder> = Arc::new(LocalBuilder::new());

    let config = EngineConfig {
        task_timeout: Duration::from_secs(task_timeout),
        watchdog_interval: Duration::from_secs(watchdog_interval),
        last_seen_interval: Duration::from_secs(flush_interval),
        ..Default::default()
    };

    let engine = Engine::new(store, bus, stream, builder, config);
    let report = engine.start().await.context("starting engine")?;
    info!(requeued = report.requeued, failed = report.failed, "startup recovery done");

    let token = token.unwrap_or_else(|| {
        let generated = Uuid::new_v4().to_string();
        info!(token = %generated, "no token configured; generated one for this run");
        generated
    });
    let app = build_app(AppState {
        service: engine.service(),
        auth_token: Arc::new(token),
    });

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!(%bind, "kiln API listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    engine.stop();
    Ok(())
}

// ── Remote client ─────────────────────────────────────────────────────────────

struct Client {
    http: reqwest::Client,
    remote: String,
    token: String,
    org: Uuid,
}

impl Client {
    fn new(remote: String, token: Option<String>, org: Option<Uuid>) -> Result<Self> {
        let token = token.context("a token is required; pass --token or set KILN_TOKEN")?;
        Ok(Client {
            http: reqwest::Client::new(),
            remote: remote.trim_end_matches('/').to_string(),
            token,
            org: org.unwrap_or_else(Uuid::nil),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/orgs/{}/{}", self.remote, self.org, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.url(path))
            .bearer_auth(&self.token)
            .header("API-Version", "v1")
    }

    async fn expect_success(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let message = response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|v| v["error"].as_str().map(str::to_string))
            .unwrap_or_else(|| "unknown error".to_string());
        bail!("server returned {status}: {message}");
    }
}

pub async fn list(
    kind: KindArg,
    limit: Option<usize>,
    selector: Option<String>,
    remote: String,
    token: Option<String>,
    org: Option<Uuid>,
) -> Result<()> {
    let client = Client::new(remote, token, org)?;
    let mut request = client.request(reqwest::Method::GET, kind.collection());
    if let Some(limit) = limit {
        request = request.query(&[("limit", limit.to_string())]);
    }
    if let Some(selector) = selector {
        request = request.query(&[("fieldSelector", selector)]);
    }
    let response = Client::expect_success(request.send().await?).await?;

    match kind {
        KindArg::Imagebuild => {
            let list: ResourceList<ImageBuild> = response.json().await?;
            print!("{}", output::render_builds(&list.items));
        }
        KindArg::Imageexport => {
            let list: ResourceList<ImageExport> = response.json().await?;
            print!("{}", output::render_exports(&list.items));
        }
    }
    Ok(())
}

pub async fn get(
    kind: KindArg,
    name: String,
    with_exports: bool,
    remote: String,
    token: Option<String>,
    org: Option<Uuid>,
) -> Result<()> {
    let client = Client::new(remote, token, org)?;
    let path = format!("{}/{}", kind.collection(), name);
    let mut request = client.request(reqwest::Method::GET, &path);
    if with_exports {
        request = request.query(&[("withExports", "true")]);
    }
    let response = Client::expect_success(request.send().await?).await?;
    let value: serde_json::Value = response.json().await?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

pub async fn create(
    kind: KindArg,
    file: PathBuf,
    remote: String,
    token: Option<String>,
    org: Option<Uuid>,
) -> Result<()> {
    let client = Client::new(remote, token, org)?;
    let content = std::fs::read_to_string(&file)
        .with_context(|| format!("reading {}", file.display()))?;
    // YAML is a superset of JSON, so one parser covers both file types.
    let resource: serde_json::Value =
        serde_yaml::from_str(&content).context("parsing resource file")?;

    let response = client
        .request(reqwest::Method::POST, kind.collection())
        .json(&resource)
        .send()
        .await?;
    let response = Client::expect_success(response).await?;
    let created: serde_json::Value = response.json().await?;
    println!(
        "created {} '{}'",
        kind.collection().trim_end_matches('s'),
        created["metadata"]["name"].as_str().unwrap_or("?")
    );
    Ok(())
}

pub async fn delete(
    kind: KindArg,
    name: String,
    remote: String,
    token: Option<String>,
    org: Option<Uuid>,
) -> Result<()> {
    let client = Client::new(remote, token, org)?;
    let path = format!("{}/{}", kind.collection(), name);
    let response = client.request(reqwest::Method::DELETE, &path).send().await?;
    let response = Client::expect_success(response).await?;
    let body: serde_json::Value = response.json().await?;
    if body["deleted"].as_bool().unwrap_or(false) {
        println!("deleted '{name}'");
    } else {
        println!("'{name}' did not exist");
    }
    Ok(())
}

pub async fn logs(
    kind: KindArg,
    name: String,
    follow: bool,
    remote: String,
    token: Option<String>,
    org: Option<Uuid>,
) -> Result<()> {
    let client = Client::new(remote, token, org)?;
    let path = format!("{}/{}/logs", kind.collection(), name);
    let mut request = client.request(reqwest::Method::GET, &path);
    if follow {
        request = request.query(&[("follow", "true")]);
    }
    let mut response = Client::expect_success(request.send().await?).await?;

    while let Some(chunk) = response.chunk().await? {
        let text = String::from_utf8_lossy(&chunk);
        // The sentinel marks orderly completion; don't print it.
        match text.find(STREAM_COMPLETE) {
            Some(pos) => {
                print!("{}", &text[..pos]);
                break;
            }
            None => print!("{text}"),
        }
    }
    Ok(())
}

pub async fn status(remote: String, token: Option<String>, org: Option<Uuid>) -> Result<()> {
    let client = Client::new(remote, token, org)?;

    let builds = Client::expect_success(
        client.request(reqwest::Method::GET, "imagebuilds").send().await?,
    )
    .await?
    .json::<ResourceList<ImageBuild>>()
    .await?;
    let exports = Client::expect_success(
        client.request(reqwest::Method::GET, "imageexports").send().await?,
    )
    .await?
    .json::<ResourceList<ImageExport>>()
    .await?;

    print!("{}", output::render_status(&builds.items, &exports.items));
    Ok(())
}
