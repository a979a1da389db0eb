use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use marginalia_common::telemetry::{self, TelemetryConfig};
use marginalia_common::transport::MemoryHub;
use marginalia_common::{
    CollabConfig, FileStore, MarginaliaError, StaticCredentials, UserIdentity,
};
use marginalia_crdt::{
    AnnotationSession, AnnotationStore, CacheStore, Channel, ConnectionDeps, ConnectionEvent,
    ConnectionRegistry, FileCache, LoroDoc, MemoryCache, ResolveAction, SuggestionKind,
    SuggestionStates,
};
use marginalia_editor_core::{MemoryDocument, SuggestionMarkKind, TextSpan};
use miette::{IntoDiagnostic, Result, miette};
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Parser)]
#[command(version, about = "Marginalia - collaborative annotations over replicated documents", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to a collaboration config file (.toml or .json)
    #[arg(long, env = "MARGINALIA_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration
    Config,
    /// Show the annotations and suggestions cached for a replica
    Inspect {
        /// Replica name, e.g. `doc-1/comments`
        document: String,
    },
    /// Run two in-process replicas against an in-memory sync server
    Demo,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_miette()?;
    telemetry::init(TelemetryConfig::from_env("marginalia-cli"));

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref()).await?;

    match cli.command {
        Commands::Config => {
            let rendered = serde_json::to_string_pretty(&config).into_diagnostic()?;
            println!("{rendered}");
        }
        Commands::Inspect { document } => inspect(&config, &document).await?,
        Commands::Demo => demo(config).await?,
    }

    Ok(())
}

async fn load_config(path: Option<&PathBuf>) -> Result<CollabConfig, MarginaliaError> {
    let Some(path) = path else {
        return Ok(CollabConfig::default());
    };
    let config = CollabConfig::load(&FileStore::new(path)).await?;
    tracing::debug!(path = %path.display(), "loaded config");
    Ok(config)
}

async fn inspect(config: &CollabConfig, document: &str) -> Result<()> {
    let cache = FileCache::new(&config.cache_dir);
    let key = config.cache_key(document);
    let Some(bytes) = cache.load(&key).await? else {
        println!("Nothing cached for {document} at {}", cache.path_for(&key).display());
        return Ok(());
    };

    let doc = LoroDoc::new();
    doc.import(&bytes).into_diagnostic()?;
    let mut store = AnnotationStore::new();
    store.attach(&doc)?;
    let states = SuggestionStates::new(&doc);

    println!("{} ({} bytes)", cache.path_for(&key).display(), bytes.len());
    println!(
        "{}",
        serde_json::to_string_pretty(store.annotations()).into_diagnostic()?
    );
    for record in states.records() {
        println!(
            "suggestion {} {} {} by {}",
            record.id,
            record.kind.as_str(),
            record.state.as_str(),
            record.author_id
        );
    }
    Ok(())
}

const DEMO_DOCUMENT: &str = "demo";
const DEMO_TEXT: &str = "The quick brown fox jumps over the dog";
const DEMO_TIMEOUT: Duration = Duration::from_secs(5);

/// One demo participant: its connections and its editor session.
struct Participant {
    registry: ConnectionRegistry,
    session: AnnotationSession<MemoryDocument>,
    comments: UnboundedReceiver<ConnectionEvent>,
    suggestions: UnboundedReceiver<ConnectionEvent>,
}

impl Participant {
    async fn join(hub: &MemoryHub, config: &CollabConfig, name: &str) -> Result<Self> {
        let mut config = config.clone();
        config.user = UserIdentity {
            id: name.into(),
            name: name.into(),
        };
        let deps = ConnectionDeps::new(
            config.clone(),
            Arc::new(StaticCredentials::new("demo-token", config.server_url.clone())),
            Arc::new(hub.clone()),
            // Each participant gets its own cache, as on separate machines.
            Arc::new(MemoryCache::new()),
        );
        let mut registry = ConnectionRegistry::new(deps);
        let mounted = registry.mount(DEMO_DOCUMENT, None).await;

        let mut session = AnnotationSession::new(
            MemoryDocument::from_paragraphs([DEMO_TEXT]),
            config.user.clone(),
        );
        let comments = mounted
            .comments
            .as_mut()
            .ok_or_else(|| miette!("the demo needs the comments channel enabled"))?;
        session.attach_comments(comments.doc())?;
        let comment_events = comments
            .take_events()
            .ok_or_else(|| miette!("comment events already taken"))?;
        let suggestions = mounted
            .suggestions
            .as_mut()
            .ok_or_else(|| miette!("the demo needs the suggestions channel enabled"))?;
        session.attach_suggestions(suggestions.doc());
        let suggestion_events = suggestions
            .take_events()
            .ok_or_else(|| miette!("suggestion events already taken"))?;

        let mut participant = Self {
            registry,
            session,
            comments: comment_events,
            suggestions: suggestion_events,
        };
        wait_for(&mut participant.comments, Channel::Comments, |e| {
            matches!(e, ConnectionEvent::Synced)
        })
        .await?;
        wait_for(&mut participant.suggestions, Channel::Suggestions, |e| {
            matches!(e, ConnectionEvent::Synced)
        })
        .await?;
        Ok(participant)
    }

    async fn receive(&mut self, channel: Channel) -> Result<usize> {
        let events = match channel {
            Channel::Suggestions => &mut self.suggestions,
            _ => &mut self.comments,
        };
        wait_for(events, channel, |e| matches!(e, ConnectionEvent::RemoteUpdate)).await?;
        Ok(self.session.poll_remote())
    }

    fn print(&self, name: &str) {
        println!("[{name}] {}", self.session.document().render());
        for annotation in self.session.store().annotations() {
            let Some(thread) = annotation.as_thread() else {
                continue;
            };
            println!("[{name}]   thread {} on {:?}", thread.id, thread.quote);
            for comment in &thread.comments {
                println!("[{name}]     {}: {}", comment.author, comment.content);
            }
        }
    }
}

async fn wait_for(
    events: &mut UnboundedReceiver<ConnectionEvent>,
    channel: Channel,
    done: impl Fn(&ConnectionEvent) -> bool,
) -> Result<()> {
    let wait = async {
        while let Some(event) = events.recv().await {
            match &event {
                ConnectionEvent::AuthenticationFailed { reason } => {
                    return Err(miette!("{channel:?}: authentication failed: {reason}"));
                }
                e if done(e) => return Ok(()),
                other => tracing::debug!(?channel, ?other, "demo skipping event"),
            }
        }
        Err(miette!("{channel:?}: connection closed"))
    };
    tokio::time::timeout(DEMO_TIMEOUT, wait)
        .await
        .map_err(|_| miette!("{channel:?}: timed out waiting for the sync server"))?
}

async fn demo(config: CollabConfig) -> Result<()> {
    let hub = MemoryHub::new();
    let mut ada = Participant::join(&hub, &config, "ada").await?;
    let mut bo = Participant::join(&hub, &config, "bo").await?;

    let thread = ada
        .session
        .create_inline_thread(TextSpan::new(0, 4, 15), "Is this too slow?", None)?
        .ok_or_else(|| miette!("nothing to comment on"))?;
    bo.receive(Channel::Comments).await?;
    bo.session.reply(&thread.id, "Reads fine to me.")?;
    ada.receive(Channel::Comments).await?;

    ada.session.document_mut().insert_text(0, 35, "lazy ");
    ada.session.sync_document();
    let suggestion = ada.session.propose_suggestion(
        SuggestionKind::Insert,
        &[(TextSpan::new(0, 35, 40), SuggestionMarkKind::Insert)],
        "Insert \"lazy \"",
    )?;
    bo.receive(Channel::Suggestions).await?;
    bo.receive(Channel::Comments).await?;
    println!("Before resolving:");
    ada.print("ada");
    bo.print("bo");

    ada.session
        .resolve_suggestion(&suggestion.id, ResolveAction::Accept)?;
    ada.session.run_deferred();
    bo.receive(Channel::Suggestions).await?;
    println!("After accepting the suggestion:");
    ada.print("ada");
    println!(
        "[bo] suggestion {} is {}",
        suggestion.id,
        bo.session
            .suggestions()
            .state(&suggestion.id)
            .map_or("unknown", |s| s.as_str())
    );

    ada.registry.unmount_all().await;
    bo.registry.unmount_all().await;
    Ok(())
}

fn init_miette() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .with_cause_chain()
                .color(true)
                .context_lines(5)
                .tab_width(2)
                .break_words(true)
                .build(),
        )
    }))
    .into_diagnostic()?;
    miette::set_panic_hook();
    Ok(())
}
