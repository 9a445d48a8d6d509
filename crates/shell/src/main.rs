mod continuity;
mod settings;

use std::io::{BufRead, Write};
use std::sync::Arc;

use snafu::{OptionExt, ResultExt, Snafu};
use tokio::sync::mpsc;
use tracing::warn;

use continuity::LaunchContinuity;
use mirror_llm::{LlmProvider, create_provider};
use mirror_session::{
    ConversationController, IdentityResolver, Role, SaveOutcome, SessionRegistry, SubmitError,
    persona,
};
use mirror_storage::{ClientId, ConversationStore, SqliteConversationStore, StorageError};
use settings::{SettingsStore, ShellSettings};

#[derive(Debug, Clone, Default)]
struct ShellArgs {
    client: Option<String>,
    session: Option<String>,
    database: Option<String>,
    new_session: bool,
    list_sessions: bool,
}

#[derive(Debug, Snafu)]
enum ShellError {
    #[snafu(display("missing value for argument '{arg}'"))]
    MissingArgumentValue { arg: &'static str },
    #[snafu(display("unknown argument '{raw}'"))]
    UnknownArgument { raw: String },
    #[snafu(display("failed to open conversation store: {source}"))]
    OpenStore { source: StorageError },
    #[snafu(display("failed to read input: {source}"))]
    ReadInput { source: std::io::Error },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    if let Err(error) = run().await {
        eprintln!("mirror: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ShellError> {
    let args = parse_args(std::env::args().skip(1))?;

    let settings_store = SettingsStore::load();
    let settings = settings_store.settings();

    let database_location = args
        .database
        .clone()
        .unwrap_or_else(|| settings.database_location().display().to_string());
    let store: Arc<dyn ConversationStore> = Arc::new(
        SqliteConversationStore::open(&database_location)
            .await
            .context(OpenStoreSnafu)?,
    );

    let provider = build_provider(&settings);

    let signals = Arc::new(LaunchContinuity::new(
        settings::default_tokens_path(),
        args.client.clone(),
        args.session.clone(),
    ));

    let mut resolver = IdentityResolver::new(signals.clone());
    let client_id = resolver.resolve();
    let mut registry = SessionRegistry::new(store.clone(), signals.clone());

    if args.list_sessions {
        print_session_listing(&registry, &client_id, None).await;
        return Ok(());
    }

    let session_id = if args.new_session {
        registry.start_new_session(&client_id)
    } else {
        registry.current_session(&client_id).await
    };

    let mut controller = ConversationController::hydrate(
        client_id.clone(),
        session_id,
        store,
        provider,
        settings.model.clone(),
        settings.temperature,
    )
    .await;

    println!("🪞 镜子 — 明镜止水。");
    if controller.restored_from_archive() {
        println!("(已从存档恢复对话历史)");
    }
    println!();
    render_history(controller.turns());

    if let Some(hint) = signals.resume_hint() {
        println!("\n(下次继续本次对话：mirror {hint})");
    }
    println!("(/new 新建会话  /sessions 查看历史  /discard 删除当前会话  /quit 退出)");

    let stdin = std::io::stdin();
    loop {
        print!("\n你: ");
        flush_stdout();

        let mut line = String::new();
        let read = stdin
            .lock()
            .read_line(&mut line)
            .context(ReadInputSnafu)?;
        if read == 0 {
            break;
        }

        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match input {
            "/quit" | "/exit" => break,
            "/new" => {
                let fresh = registry.start_new_session(&client_id);
                controller.reset_to(fresh);
                println!("(已开始新会话)\n");
                render_history(controller.turns());
            }
            "/sessions" => {
                print_session_listing(&registry, &client_id, Some(controller.session_id())).await;
            }
            "/discard" => {
                let current = controller.session_id().clone();
                if registry.discard_session(&client_id, &current).await {
                    println!("(已删除当前会话的存档)");
                } else {
                    println!("(没有可删除的存档)");
                }
                let fresh = registry.start_new_session(&client_id);
                controller.reset_to(fresh);
                render_history(controller.turns());
            }
            _ => submit_and_render(&mut controller, input).await,
        }
    }

    Ok(())
}

/// Runs one exchange, rendering reply fragments as they arrive.
///
/// Input is not read again until the exchange settles, so submission stays
/// disabled for as long as a reply is in flight.
async fn submit_and_render(controller: &mut ConversationController, input: &str) {
    print!("镜子: ");
    flush_stdout();

    let (fragment_tx, mut fragment_rx) = mpsc::unbounded_channel::<String>();
    controller.set_fragment_sink(fragment_tx);

    let printer = tokio::spawn(async move {
        while let Some(fragment) = fragment_rx.recv().await {
            print!("{fragment}");
            flush_stdout();
        }
    });

    let outcome = controller.submit_turn(input).await;

    // Closing the sink ends the printer once the last fragment is out.
    controller.clear_fragment_sink();
    let _ = printer.await;

    match outcome {
        Ok(outcome) if outcome.halted => {
            println!("{}", persona::STOP_ACKNOWLEDGEMENT);
        }
        Ok(outcome) => {
            println!();
            if let Some(SaveOutcome::Failed(reason)) = outcome.save {
                println!("(对话存档失败：{reason}。本次会话仍在内存中继续。)");
            }
        }
        Err(error @ SubmitError::ProviderUnconfigured) => {
            println!("({error})");
            println!(
                "(请在 {} 中填写 api_key，或设置 {} 环境变量)",
                SettingsStore::default_config_path().display(),
                settings::API_KEY_ENV
            );
        }
        Err(error) => {
            println!("({error})");
        }
    }
}

async fn print_session_listing(
    registry: &SessionRegistry,
    client_id: &ClientId,
    exclude: Option<&mirror_storage::SessionId>,
) {
    let listed = registry.list_sessions(client_id, exclude).await;
    if listed.is_empty() {
        println!("(暂无历史会话)");
        return;
    }

    for summary in listed {
        println!(
            "{}  [{} 条]  {}",
            summary.session_id, summary.turn_count, summary.preview
        );
    }
}

fn render_history(turns: &[mirror_session::Turn]) {
    for turn in turns {
        match turn.role {
            Role::User => println!("你: {}\n", turn.content),
            Role::Assistant => println!("镜子: {}\n", turn.content),
            // The system turn is never part of history, but render defensively.
            Role::System => {}
        }
    }
}

fn build_provider(settings: &ShellSettings) -> Option<Arc<dyn LlmProvider>> {
    let Some(config) = settings.to_provider_config() else {
        warn!("no API key configured; turn submission is disabled until one is provided");
        return None;
    };

    match create_provider(config) {
        Ok(provider) => Some(provider),
        Err(error) => {
            warn!(%error, "failed to initialize completion provider");
            None
        }
    }
}

// The parser is intentionally strict: unknown arguments fail fast instead of
// silently changing which conversation gets reattached.
fn parse_args(args: impl IntoIterator<Item = String>) -> Result<ShellArgs, ShellError> {
    let mut parsed = ShellArgs::default();
    let mut pending = args.into_iter();

    while let Some(argument) = pending.next() {
        match argument.as_str() {
            "--client" => parsed.client = Some(next_value(&mut pending, "--client")?),
            "--session" => parsed.session = Some(next_value(&mut pending, "--session")?),
            "--db" => parsed.database = Some(next_value(&mut pending, "--db")?),
            "--new" => parsed.new_session = true,
            "--list" => parsed.list_sessions = true,
            _ => {
                return UnknownArgumentSnafu { raw: argument }.fail();
            }
        }
    }

    Ok(parsed)
}

fn next_value(
    pending: &mut impl Iterator<Item = String>,
    arg: &'static str,
) -> Result<String, ShellError> {
    pending.next().context(MissingArgumentValueSnafu { arg })
}

fn flush_stdout() {
    let _ = std::io::stdout().flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|argument| argument.to_string()).collect()
    }

    #[test]
    fn parse_args_reads_continuity_tokens_and_flags() {
        let parsed = parse_args(args(&[
            "--client",
            "user-5f3a2b-9c81d4e07a12",
            "--session",
            "user-5f3a2b-9c81d4e07a12.68b1.aa04c2f1",
            "--new",
        ]))
        .unwrap();

        assert_eq!(parsed.client.as_deref(), Some("user-5f3a2b-9c81d4e07a12"));
        assert!(parsed.session.is_some());
        assert!(parsed.new_session);
        assert!(!parsed.list_sessions);
    }

    #[test]
    fn parse_args_rejects_unknown_and_dangling_arguments() {
        assert!(matches!(
            parse_args(args(&["--frobnicate"])),
            Err(ShellError::UnknownArgument { .. })
        ));
        assert!(matches!(
            parse_args(args(&["--client"])),
            Err(ShellError::MissingArgumentValue { .. })
        ));
    }
}
