use clap::Parser;
use colored::*;
use std::io::{self, BufRead, Write};
use std::process;
use std::sync::Arc;
use tokio::sync::mpsc;

use gemmis::api::ChatClient;
use gemmis::cli::Args;
use gemmis::config::Config;
use gemmis::error::{GemmisError, Result};
use gemmis::logging;
use gemmis::models::TurnOutcome;
use gemmis::orchestrator::{ActiveSession, Orchestrator, TurnSettings};
use gemmis::session::{JsonlSessionStore, SessionStore};
use gemmis::tools::{
    AllowAll, ConfirmationPolicy, SensitivePatterns, ToolExecutor, ToolRegistry, ToolSettings,
};
use gemmis::ui::{
    print_error, print_session_list, print_tools, render_turn, TerminalConfirm, TurnInterrupts,
};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    match run(args).await {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            print_error(e);
            process::exit(1);
        }
    }
}

/// Returns false when a one-shot prompt did not complete.
async fn run(args: Args) -> Result<bool> {
    let config = Config::from_env_and_args(&args)?;
    logging::init(config.verbose);

    let store: Arc<dyn SessionStore> = Arc::new(JsonlSessionStore::new(&config.session_dir));

    if args.list_sessions {
        print_session_list(&store.list_sessions()?);
        return Ok(true);
    }
    if let Some(id) = &args.delete_session {
        store.delete_session(id)?;
        println!("{}", format!("Deleted session {}", id).green());
        return Ok(true);
    }

    let registry = if config.tools_enabled {
        ToolRegistry::from_config(&config.tools)?
    } else {
        ToolRegistry::new(
            ToolSettings::from_config(&config.tools),
            SensitivePatterns::new(&[]).map_err(GemmisError::ToolRegistry)?,
        )
    };
    print_tools(&registry.names());

    let client = ChatClient::new(config.api.clone())?;
    if let Err(e) = client.ping().await {
        eprintln!(
            "{}",
            format!(
                "Warning: model backend at {} is not reachable ({}). Is Ollama running?",
                config.api.base_url, e
            )
            .yellow()
        );
    }

    let orchestrator = Orchestrator::new(
        Arc::new(client),
        ToolExecutor::new(Arc::new(registry)),
        Arc::clone(&store),
        TurnSettings::from_config(&config),
    );

    let policy: Box<dyn ConfirmationPolicy> = if config.auto_approve {
        Box::new(AllowAll)
    } else {
        Box::new(TerminalConfirm)
    };

    let mut session = open_session(&orchestrator, &args)?;
    let interrupts = TurnInterrupts::new();
    let _listener = interrupts.listen();

    if let Some(prompt) = args.one_shot_prompt() {
        let outcome =
            run_one_turn(&orchestrator, &mut session, &prompt, policy.as_ref(), &interrupts).await;
        return Ok(outcome == TurnOutcome::Done);
    }

    eprintln!(
        "{}",
        format!(
            "Session {} ({}, model {}). /new, /sessions, /resume <id>, /exit",
            session.meta.name, session.meta.id, config.model
        )
        .dimmed()
    );

    while let Some(line) = read_user_line().await? {
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match input.split_once(' ').unwrap_or((input, "")) {
            ("/exit", _) | ("/quit", _) => break,
            ("/new", name) => {
                let name = Some(name.trim().to_string()).filter(|n| !n.is_empty());
                session = orchestrator.start_session(name)?;
                eprintln!("{}", format!("New session {}", session.meta.id).dimmed());
            }
            ("/sessions", _) => print_session_list(&store.list_sessions()?),
            ("/resume", id) => match orchestrator.resume_session(id.trim()) {
                Ok(resumed) => {
                    eprintln!(
                        "{}",
                        format!("Resumed {} ({} messages)", resumed.meta.name, resumed.messages.len())
                            .dimmed()
                    );
                    session = resumed;
                }
                Err(e) => print_error(e),
            },
            _ => {
                run_one_turn(&orchestrator, &mut session, input, policy.as_ref(), &interrupts).await;
            }
        }
    }

    Ok(true)
}

fn open_session(orchestrator: &Orchestrator, args: &Args) -> Result<ActiveSession> {
    if let Some(id) = &args.resume {
        return Ok(orchestrator.resume_session(id)?);
    }
    if !args.new_session {
        if let Some(summary) = orchestrator.store().most_recent()? {
            return Ok(orchestrator.resume_session(&summary.meta.id)?);
        }
    }
    Ok(orchestrator.start_session(None)?)
}

async fn run_one_turn(
    orchestrator: &Orchestrator,
    session: &mut ActiveSession,
    text: &str,
    policy: &dyn ConfirmationPolicy,
    interrupts: &TurnInterrupts,
) -> TurnOutcome {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let cancel = interrupts.begin_turn();

    let (outcome, rendered) = tokio::join!(
        orchestrator.run_turn(session, text, policy, &tx, &cancel),
        render_turn(&mut rx)
    );
    interrupts.end_turn();

    if let Err(e) = rendered {
        print_error(e);
    }
    outcome
}

async fn read_user_line() -> Result<Option<String>> {
    print!("{} ", ">".green().bold());
    io::stdout().flush()?;

    let line = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line).map(|read| (read, line))
    })
    .await
    .map_err(|e| GemmisError::Other(format!("input task failed: {}", e)))??;

    Ok(match line {
        (0, _) => None,
        (_, text) => Some(text),
    })
}
