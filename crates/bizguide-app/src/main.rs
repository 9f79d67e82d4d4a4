//! Business guide terminal application.
//!
//! Every line the user enters triggers one full run of the chat script, the
//! way a reactive page re-executes on each interaction. All state between
//! runs lives in the session.

mod cli;
mod commands;
mod terminal;

use std::io::Write;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use bizguide_chat::memory::{MemoryModel, MemoryPipeline};
use bizguide_chat::{
    ChatModel, FollowupGenerator, GenerationPipeline, ModelFactory, RunInput, RunReport,
    ScriptRun, Session, SessionStore, StreamingOrchestrator,
};
use bizguide_core::config::RemoteConfig;
use bizguide_core::{GuideConfig, GuideContext};
use bizguide_remote::{HttpPipeline, OpenAiChatModel};

use cli::CliArgs;
use commands::Command;
use terminal::{to_ansi, TerminalSurfaces};

const OFFLINE_ANSWER: &[&str] = &[
    "Offline mode answers every question the same way. ",
    "Start the guide pipeline and drop --offline for real answers, ",
    "see [Getting started].",
];
const OFFLINE_FOLLOWUPS: &str = "1. How do I register a company?\n\
                                 2. Which taxes do entrepreneurs pay?\n\
                                 3. Do I need a residence permit?";

fn build_pipeline(
    config: &GuideConfig,
    offline: bool,
) -> Result<Arc<dyn GenerationPipeline>, Box<dyn std::error::Error>> {
    if offline {
        let pipeline = MemoryPipeline::new()
            .with_chunks(OFFLINE_ANSWER)
            .answering(&OFFLINE_ANSWER.concat());
        return Ok(Arc::new(pipeline));
    }
    tracing::info!("Answer pipeline at {}", config.remote.pipeline_url);
    Ok(Arc::new(HttpPipeline::new(&config.remote)?))
}

/// Builds follow-up model clients on demand.
struct ClientFactory {
    remote: RemoteConfig,
    offline: bool,
}

impl ModelFactory for ClientFactory {
    fn build(&self, model: &str, temperature: f32) -> Arc<dyn ChatModel> {
        if self.offline {
            return Arc::new(MemoryModel::replying(model, OFFLINE_FOLLOWUPS));
        }
        match OpenAiChatModel::from_env(&self.remote, model, temperature) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                tracing::warn!("Follow-up questions disabled for {}: {}", model, e);
                Arc::new(MemoryModel::failing(model, e.into()))
            }
        }
    }
}

/// Wire the orchestrator and the follow-up generator.
fn build_script(
    config: &GuideConfig,
    pipeline: Arc<dyn GenerationPipeline>,
    offline: bool,
) -> ScriptRun {
    let factory = Arc::new(ClientFactory {
        remote: config.remote.clone(),
        offline,
    });
    let orchestrator = Arc::new(StreamingOrchestrator::new(pipeline, config.chat.clone()));
    let followups = Arc::new(
        FollowupGenerator::new(factory, config.models.clone())
            .with_suppress_marker(config.chat.apology_message.clone())
            .with_suppress_marker(config.chat.stream_error_message.clone()),
    );
    ScriptRun::new(
        orchestrator,
        followups,
        config.chat.clone(),
        config.models.clone(),
    )
}

fn prompt() {
    print!("\n> ");
    let _ = std::io::stdout().flush();
}

fn print_country_menu() {
    println!("Choose a country:");
    for (i, country) in GuideContext::ALL.iter().enumerate() {
        println!("  {}) {} {}", i + 1, country.flag(), country.name());
    }
}

fn print_report(
    session: &Session,
    report: &RunReport,
    show_history: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if report.needs_context {
        print_country_menu();
        return Ok(());
    }
    if !report.turns.is_empty() || report.validation_error.is_some() {
        println!();
    }

    if show_history {
        if report.transcript.is_empty() {
            println!("(no messages yet)");
        }
        for line in &report.transcript {
            println!("{}", to_ansi(line));
        }
    }

    if session.messages()?.is_empty() {
        if let Some(country) = session.guide_context()? {
            println!("{} Ask about starting a business in {}.", country.flag(), country);
            for (i, question) in country.sample_questions().iter().enumerate() {
                println!("  /sample {}  {}", i + 1, question);
            }
        }
    }

    if !report.followups.is_empty() {
        println!("Follow-up questions:");
        for (i, followup) in report.followups.iter().enumerate() {
            println!("  /{}  {}", i + 1, followup.label);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // === Configuration ===
    let config_path = args.resolve_config_path();
    let mut config = GuideConfig::load_or_default(&config_path);
    if args.no_timer {
        config.chat.show_timer = false;
    }
    if let Some(ref url) = args.pipeline_url {
        config.remote.pipeline_url = url.clone();
    }

    // === Logging ===
    let log_level = args.resolve_log_level(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&log_level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting bizguide v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Config: {}", config_path.display());

    // === Collaborators ===
    let pipeline = build_pipeline(&config, args.offline)?;
    let script = build_script(&config, pipeline, args.offline);

    // === Session ===
    let store = Arc::new(SessionStore::new());
    let session = store.session(uuid::Uuid::new_v4().to_string());
    if let Some(country) = args.resolve_country()? {
        session.select_context(country)?;
    }

    let surfaces = TerminalSurfaces::new(args.debug_view);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut input = RunInput::idle();
    let mut show_history = false;
    println!("Business guide. Type /help for commands.");

    // === Run loop ===
    loop {
        let report = script
            .execute(&session, std::mem::take(&mut input), &surfaces)
            .await?;
        print_report(&session, &report, show_history)?;
        show_history = false;

        prompt();
        let Some(line) = lines.next_line().await? else {
            break;
        };

        if report.needs_context {
            match commands::parse_country_choice(&line) {
                Some(country) => session.select_context(country)?,
                None if commands::parse(&line) == Command::Quit => break,
                None => println!("Enter 1 or 2."),
            }
            continue;
        }

        match commands::parse(&line) {
            Command::Ask(question) => input = RunInput::typed(question),
            Command::Followup(n) => match report.followups.get(n - 1) {
                Some(followup) => followup.choose(&session)?,
                None => println!("There is no follow-up question {}.", n),
            },
            Command::Sample(n) => {
                session.choose_sample(n - 1)?;
            }
            Command::Reset => session.reset_chat()?,
            Command::ChangeCountry => session.change_context()?,
            Command::Country(country) => {
                session.change_context()?;
                session.select_context(country)?;
            }
            Command::Timer(show) => session.set_show_timer(show)?,
            Command::Style(style) => {
                session.set_answer_style(style)?;
                println!("Answer style: {}", style);
            }
            Command::Search(mode) => {
                if session.set_search_mode(mode)? {
                    println!("Searching {}", mode.label());
                } else {
                    println!("The search mode is fixed for this country.");
                }
            }
            Command::Model(model) => {
                session.set_selected_model(&model)?;
                println!("{}", commands::model_notice(&config.models, &model));
            }
            Command::History => show_history = true,
            Command::Help => println!("{}", commands::HELP),
            Command::Quit => break,
            Command::Refresh => {}
            Command::Invalid(message) => println!("{}", message),
        }
    }

    tracing::info!("Shutting down");
    Ok(())
}
