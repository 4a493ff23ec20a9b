use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

use agent_host::offline::EchoStream;
use agent_host::AgentHost;
use providers::{CompletionStream, ProviderRouter};
use services::lifecycle;
use services::storage::{JsonFileStorage, KeyValueStorage, MemoryStorage};
use services::template_catalog::TemplateCatalog;
use shared::settings::AppSettings;
use shared::template::Template;

mod console;
mod popup_manager;
mod registry;
mod relay;
mod utils;

use console::TranscriptPrinter;
use popup_manager::{PointerUp, PopupManager};
use registry::SessionIndex;
use relay::{ChannelTransport, Relay, Transport};

#[derive(Parser, Debug)]
#[command(name = "quickask")]
#[command(about = "Ask an AI assistant about selected text", long_about = None)]
struct Cli {
    /// Answer with a local echo bot instead of a model provider
    #[arg(long, action = ArgAction::SetTrue)]
    offline: bool,

    /// Settings file to use instead of the one in the config directory
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Select text in a page and ask about it through a template
    Ask {
        /// Plain-text rendition of the page
        #[arg(long)]
        page: PathBuf,

        /// The selected text
        #[arg(long)]
        selection: String,

        /// Template name; defaults to the first template
        #[arg(short = 't', long)]
        template: Option<String>,

        /// Picker search text; a custom prompt when no template matches
        #[arg(short = 'q', long, conflicts_with = "template")]
        query: Option<String>,
    },

    /// Open a chat the way the toolbar icon does
    Chat {
        #[arg(long, default_value_t = 1280.0)]
        viewport_width: f32,
    },

    /// Write the settings in effect to the settings file
    Init,

    /// Manage prompt templates
    Templates {
        #[command(subcommand)]
        action: TemplatesAction,
    },
}

#[derive(Subcommand, Debug)]
enum TemplatesAction {
    /// List stored templates
    List,
    /// Restore the default templates
    Seed,
    /// Append a template
    Add { name: String, content: String },
    /// Remove the template at a position
    Remove { position: usize },
    /// Move a template to another position
    Move { from: usize, to: usize },
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

    let cli = Cli::parse();
    let (settings, found) = match cli.config.as_deref() {
        Some(path) => utils::load_settings_from(path),
        None => utils::load_settings_or_default(),
    };
    if !found {
        tracing::info!("no settings file, using defaults");
    }

    let storage = open_storage(&settings);
    run_lifecycle(storage.clone());
    let mut catalog = TemplateCatalog::load(storage).context("Failed to load templates")?;

    match cli.command {
        Command::Init => {
            match cli.config.as_deref() {
                Some(path) => utils::save_settings_to(&settings, path)?,
                None => utils::save_settings(&settings)?,
            }
            println!("Settings saved");
            Ok(())
        }
        Command::Templates { action } => manage_templates(&mut catalog, action),
        Command::Ask {
            page,
            selection,
            template,
            query,
        } => {
            let page_text = std::fs::read_to_string(&page)
                .with_context(|| format!("Failed to read {}", page.display()))?;
            let template = match template {
                Some(name) => match catalog.find(&name) {
                    Some(t) => Some(t.clone()),
                    None => bail!("No template named {:?}", name),
                },
                None => None,
            };

            let mut session = ChatSession::start(&settings, cli.offline, catalog.pickable());
            if !session.manager.on_pointer_up(&page_text, &selection, PointerUp::default()) {
                bail!("Nothing selected");
            }
            let index = match (template, query) {
                (Some(t), _) => session.manager.commit_template(&t),
                (None, Some(q)) => {
                    session.manager.set_picker_query(&q);
                    session.manager.on_picker_key(services::template_picker::PickerKey::Enter)
                }
                (None, None) => {
                    session.manager.focus_picker();
                    session.manager.on_picker_key(services::template_picker::PickerKey::Enter)
                }
            };
            let index = index.context("No template to ask with")?;
            session.converse(index).await
        }
        Command::Chat { viewport_width } => {
            let mut session = ChatSession::start(&settings, cli.offline, catalog.pickable());
            let index = session.manager.on_icon_click(viewport_width);
            session.converse(index).await
        }
    }
}

fn open_storage(settings: &AppSettings) -> Arc<dyn KeyValueStorage> {
    match utils::storage_path(settings) {
        Some(path) => Arc::new(JsonFileStorage::new(path)),
        None => {
            tracing::warn!("no config directory, templates will not be saved");
            Arc::new(MemoryStorage::new())
        }
    }
}

fn run_lifecycle(storage: Arc<dyn KeyValueStorage>) {
    let version = env!("CARGO_PKG_VERSION");
    let detected = match lifecycle::detect_reason(storage.as_ref(), version) {
        Ok(detected) => detected,
        Err(e) => {
            tracing::warn!("could not read install state: {:#}", e);
            return;
        }
    };
    if let Some((reason, previous)) = detected {
        if let Err(e) = lifecycle::on_installed(storage, reason, previous.as_deref(), version) {
            tracing::warn!("install hook failed: {:#}", e);
        }
    }
}

fn manage_templates(catalog: &mut TemplateCatalog, action: TemplatesAction) -> Result<()> {
    match action {
        TemplatesAction::List => {}
        TemplatesAction::Seed => catalog.seed_defaults()?,
        TemplatesAction::Add { name, content } => {
            catalog.add(Template::new(name, content))?;
        }
        TemplatesAction::Remove { position } => {
            let removed = catalog.remove(position)?;
            println!("Removed {:?}", removed.name);
        }
        TemplatesAction::Move { from, to } => catalog.move_to(from, to)?,
    }
    for (i, t) in catalog.templates().iter().enumerate() {
        println!("{:>2}. {}\n    {}", i, t.name, t.content.replace('\n', "\n    "));
    }
    Ok(())
}

/// A popup manager wired to an in-process backend host.
struct ChatSession<T: Transport> {
    manager: PopupManager<T>,
    events: UnboundedReceiver<String>,
    host: tokio::task::JoinHandle<()>,
}

impl ChatSession<ChannelTransport> {
    fn start(settings: &AppSettings, offline: bool, templates: Vec<Template>) -> Self {
        let source: Arc<dyn CompletionStream> = if offline {
            Arc::new(EchoStream::new(Duration::from_millis(40)))
        } else {
            Arc::new(ProviderRouter::new(settings.model.clone()))
        };
        let host = Arc::new(AgentHost::with_source(source, settings.greeting_prompt.clone()));

        let (transport, requests) = ChannelTransport::pair();
        let (events_tx, events) = unbounded_channel();
        let host = host.spawn(requests, events_tx);

        Self {
            manager: PopupManager::new(Relay::new(transport), templates, settings.clone()),
            events,
            host,
        }
    }
}

impl<T: Transport> ChatSession<T> {
    /// Stream answers for `index` and read follow-ups from stdin until EOF,
    /// `/quit`, or the backend goes away. `/regen` asks for the last answer again.
    async fn converse(mut self, index: SessionIndex) -> Result<()> {
        let mut stdout = std::io::stdout();
        let mut printer = TranscriptPrinter::new();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        if let Some(session) = self.manager.registry().get(index) {
            printer.header(session, &mut stdout)?;
            printer.print(session, &mut stdout)?;
        }

        loop {
            let accepting = self
                .manager
                .registry()
                .get(index)
                .is_some_and(|s| s.accepts_input());

            tokio::select! {
                raw = self.events.recv() => match raw {
                    Some(raw) => {
                        self.manager.on_inbound(&raw);
                    }
                    None => {
                        self.manager.on_disconnect();
                        eprintln!("\nbackend disconnected");
                        break;
                    }
                },
                line = lines.next_line(), if accepting => {
                    let Some(line) = line? else { break };
                    match line.trim() {
                        "/quit" => break,
                        "/regen" => {
                            if self.manager.regenerate(index) {
                                if let Some(session) = self.manager.registry().get(index) {
                                    printer.skip_to_end(session);
                                }
                            }
                        }
                        text => {
                            self.manager.send_message(index, text);
                        }
                    }
                }
            }

            if let Some(session) = self.manager.registry().get(index) {
                printer.print(session, &mut stdout)?;
            }
        }

        println!();
        self.manager.shutdown();
        if let Err(e) = self.host.await {
            tracing::warn!("backend host task failed: {}", e);
        }
        Ok(())
    }
}
