//! Subcommand handlers.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{bail, Context as _, Result};
use authrelay_core::{
    ApiClient, ClientConfig, MultipartBody, SessionEvent, SessionManager, StorageMode,
};
use clap::Args;
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

/// Everything a command needs: the configured client wrapped in a session.
pub struct Context {
    pub session: SessionManager,
}

impl Context {
    pub fn open(base_url: Option<String>, storage: Option<&str>) -> Result<Self> {
        let mut config = ClientConfig::load()?;
        if let Some(url) = base_url {
            config.base_url = url;
        }
        if let Some(mode) = storage {
            config.storage = mode.parse::<StorageMode>()?;
        }
        debug!(base_url = %config.base_url, storage = ?config.storage, "Configuration loaded");

        let store = config.open_credential_store()?;
        let client = ApiClient::new(config, store)?;
        Ok(Self {
            session: SessionManager::new(client),
        })
    }

    fn client(&self) -> &ApiClient {
        self.session.client()
    }
}

#[derive(Args)]
pub struct LoginArgs {
    /// Account email (prompted if omitted)
    pub email: Option<String>,
}

#[derive(Args)]
pub struct GetArgs {
    /// Endpoints to fetch, all in parallel
    #[arg(required = true)]
    pub endpoints: Vec<String>,

    /// Query parameter as name=value (repeatable)
    #[arg(short = 'p', long = "param", value_parser = parse_param)]
    pub params: Vec<(String, Value)>,
}

#[derive(Args)]
pub struct PostArgs {
    pub endpoint: String,

    /// JSON request body
    #[arg(long, default_value = "{}")]
    pub json: String,
}

#[derive(Args)]
pub struct UploadArgs {
    pub endpoint: String,

    /// File to send
    pub file: PathBuf,

    /// Form field name for the file
    #[arg(long, default_value = "file")]
    pub field: String,

    /// Extra text field as name=value (repeatable)
    #[arg(short = 'f', long = "form", value_parser = parse_form_field)]
    pub form: Vec<(String, String)>,
}

#[derive(Args)]
pub struct WatchArgs {
    /// Seconds before expiry to refresh (defaults to the configured buffer)
    #[arg(long)]
    pub buffer_secs: Option<i64>,
}

/// `name=value`; the value is taken as JSON when it parses, else as text.
fn parse_param(s: &str) -> std::result::Result<(String, Value), String> {
    let (name, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{}'", s))?;
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((name.to_string(), value))
}

fn parse_form_field(s: &str) -> std::result::Result<(String, String), String> {
    s.split_once('=')
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected name=value, got '{}'", s))
}

fn refresh_buffer(secs: i64) -> Result<chrono::Duration> {
    match chrono::Duration::try_seconds(secs) {
        Some(buffer) if secs >= 0 => Ok(buffer),
        _ => bail!("--buffer-secs must be between 0 and {}", i64::MAX / 1000),
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn prompt_line(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

pub async fn login(ctx: &Context, args: LoginArgs) -> Result<()> {
    let email = match args.email {
        Some(email) => email,
        None => prompt_line("Email: ")?,
    };
    if email.is_empty() {
        bail!("Email is required");
    }
    let password = rpassword::prompt_password("Password: ").context("Failed to read password")?;

    let profile = ctx.session.login(&email, &password).await?;
    println!("Logged in as {}", email);
    if let Some(profile) = profile {
        print_json(&profile)?;
    }
    Ok(())
}

pub async fn logout(ctx: &Context) -> Result<()> {
    ctx.session.logout().await?;
    println!("Logged out");
    Ok(())
}

pub async fn whoami(ctx: &Context) -> Result<()> {
    if !ctx.session.is_authenticated() && ctx.client().config().access_token.is_none() {
        bail!("Not logged in. Run `authrelay login` first.");
    }
    let profile = ctx.session.verify().await?;
    print_json(&profile)
}

pub fn status(ctx: &Context) -> Result<()> {
    let status = ctx.session.status();
    let stats = ctx.client().refresh_stats();

    println!("Base URL:      {}", ctx.client().config().base_url);
    println!("Storage:       {:?}", ctx.client().config().storage);
    println!(
        "Authenticated: {}",
        if status.authenticated { "yes" } else { "no" }
    );
    match status.expires_in_secs {
        Some(secs) if secs > 0 => println!("Expires in:    {}s", secs),
        Some(_) => println!("Expires in:    expired"),
        None if status.authenticated => println!("Expires in:    unknown"),
        None => {}
    }
    if let Some(profile) = &status.profile {
        println!("Profile:");
        print_json(profile)?;
    }
    debug!(?stats, "Refresh activity");
    Ok(())
}

pub async fn get(ctx: &Context, args: GetArgs) -> Result<()> {
    let params: Vec<(&str, Value)> = args
        .params
        .iter()
        .map(|(name, value)| (name.as_str(), value.clone()))
        .collect();

    let client = ctx.client();
    let results = join_all(
        args.endpoints
            .iter()
            .map(|endpoint| client.get::<Value>(endpoint, &params)),
    )
    .await;

    let mut failures = 0;
    for (endpoint, result) in args.endpoints.iter().zip(results) {
        match result {
            Ok(body) => {
                if args.endpoints.len() > 1 {
                    println!("# {}", endpoint);
                }
                print_json(&body)?;
            }
            Err(e) => {
                failures += 1;
                eprintln!("{}: {}", endpoint, e);
            }
        }
    }

    let stats = client.refresh_stats();
    debug!(
        cycles = stats.cycles,
        waiters = stats.waiters,
        "Requests finished"
    );

    if failures > 0 {
        bail!("{} of {} requests failed", failures, args.endpoints.len());
    }
    Ok(())
}

pub async fn post(ctx: &Context, args: PostArgs) -> Result<()> {
    let body: Value = serde_json::from_str(&args.json).context("--json is not valid JSON")?;
    let response: Value = ctx.client().post(&args.endpoint, &body).await?;
    print_json(&response)
}

pub async fn upload(ctx: &Context, args: UploadArgs) -> Result<()> {
    let bytes = std::fs::read(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let file_name = args
        .file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());

    let mut form = MultipartBody::new();
    for (name, value) in args.form {
        form = form.text(name, value);
    }
    form = form.file(args.field, file_name, bytes, None);

    let response: Value = ctx
        .client()
        .upload(&args.endpoint, form, Default::default())
        .await?;
    print_json(&response)
}

pub async fn watch(ctx: &Context, args: WatchArgs) -> Result<()> {
    if !ctx.session.is_authenticated() {
        bail!("Not logged in. Run `authrelay login` first.");
    }

    let buffer = match args.buffer_secs {
        Some(secs) => refresh_buffer(secs)?,
        None => ctx.client().config().refresh_buffer(),
    };
    let mut events = ctx.client().events().subscribe();
    let scheduler = ctx.session.spawn_refresh_scheduler(buffer);
    println!("Watching session (Ctrl-C to stop)");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => {
                    println!("{}: {}", event.name(), serde_json::to_string(&event)?);
                    if matches!(event, SessionEvent::ForcedLogout { .. }) {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => warn!(missed = n, "Session events dropped"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    scheduler.abort();
    Ok(())
}
