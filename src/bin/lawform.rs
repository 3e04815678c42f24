//! lawform terminal host
//!
//! Drives a dynamic form from stdin:
//!
//! ```text
//! set <Name>=<value>   enter a value (dates accept YYYY-MM-DD)
//! clear <Name>         clear a field
//! show                 list visible fields
//! params               dump the parameter map as JSON
//! preview              render the agreement preview
//! quit
//! ```
//!
//! Usage:
//!   cargo run --bin lawform -- --template templates/sample_agreement.txt

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use lawform::adapters::EngineIdentityResolver;
use lawform::session::connect_from_config;
use lawform::{
    DynamicForm, ExecutionBridge, FormConfig, FormOrchestrator, MarkupEngine, PreviewRenderer,
    TemplateEngine, UpdateOutcome, UserInput,
};

/// Fill in a contract template from the terminal
#[derive(Parser, Debug)]
#[command(name = "lawform")]
#[command(about = "Fill in a contract template from the terminal")]
struct Args {
    /// Template file (overrides LAWFORM_TEMPLATE)
    #[arg(long, short = 't')]
    template: Option<PathBuf>,

    /// API base URL (overrides OPENLAW_API_URL)
    #[arg(long)]
    api_url: Option<String>,

    /// Debounce before recomputing, in milliseconds
    #[arg(long)]
    debounce_ms: Option<u64>,

    /// Skip login even when credentials are configured
    #[arg(long)]
    offline: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let args = Args::parse();

    let mut config = FormConfig::from_env()?;
    if let Some(template) = args.template {
        config.template_path = template;
    }
    if let Some(url) = args.api_url {
        config.api_url = url;
    }
    if let Some(ms) = args.debounce_ms {
        config.recompute_debounce = Duration::from_millis(ms);
    }
    if args.offline {
        config.credentials = None;
    }

    let source = config.load_template()?;
    let session = Arc::new(
        connect_from_config(&config)
            .await
            .context("Failed to create API session")?,
    );

    let engine: Arc<dyn TemplateEngine> = Arc::new(MarkupEngine::new());
    let bridge = ExecutionBridge::new(engine.clone(), source);
    let orchestrator = Arc::new(
        FormOrchestrator::new(Arc::new(bridge)).with_debounce(config.recompute_debounce),
    );
    let resolver = EngineIdentityResolver::new(engine.clone()).with_session(session.clone());

    let mut form = DynamicForm::new(orchestrator, engine.clone())
        .with_resolver(Arc::new(resolver))
        .with_input_class(config.text_like_input_class.clone());
    let preview = PreviewRenderer::new(engine);

    report(&form.mount().await);
    print_fields(&form);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        form.apply_lookups();
        let line = line.trim();
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));

        match command {
            "" => continue,
            "set" => {
                let Some((name, value)) = rest.split_once('=') else {
                    println!("usage: set <Name>=<value>");
                    continue;
                };
                send(&mut form, name.trim(), value.trim()).await;
            }
            "clear" => send(&mut form, rest.trim(), "").await,
            "show" => print_fields(&form),
            "params" => {
                let params = form.orchestrator().parameters().await;
                println!("{}", serde_json::to_string_pretty(&params)?);
            }
            "preview" => match form.orchestrator().execution_result().await {
                Some(result) => match preview.render_detached(result).await? {
                    Ok(html) => println!("{html}"),
                    Err(e) => println!("preview failed: {e}"),
                },
                None => println!("nothing to preview yet"),
            },
            "quit" | "exit" => break,
            other => println!("unknown command '{other}' (set, clear, show, params, preview, quit)"),
        }
    }

    form.unmount();
    session.disconnect().await;
    Ok(())
}

async fn send(form: &mut DynamicForm, name: &str, value: &str) {
    match form.input(name, UserInput::text(value)).await {
        Ok(Some(outcome)) => report(&outcome),
        Ok(None) => println!("'{value}' is not valid for {name}"),
        Err(e) => println!("{e}"),
    }
    form.settle_lookups().await;
    print_fields(form);
}

fn report(outcome: &UpdateOutcome) {
    match outcome {
        UpdateOutcome::Applied(_) | UpdateOutcome::Superseded => {}
        UpdateOutcome::Stale { error } => println!("kept previous fields: {error}"),
        UpdateOutcome::Detached => println!("form is closed"),
    }
}

fn print_fields(form: &DynamicForm) {
    for view in form.render() {
        let marker = if view.is_error { "  (invalid)" } else { "" };
        let hint = view
            .hint
            .map(|h| format!("  [{h}]"))
            .unwrap_or_default();
        println!(
            "  {:<24} {:<15} {}{}{}",
            view.label, view.input_type, view.value, hint, marker
        );
    }
}
