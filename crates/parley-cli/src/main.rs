use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use parley_agent::{
    Attachment, ConversationRecord, MemoryConversationStore, MessageCallbacks, PermissionRequest,
    PlanApprovalRequest, SendOutcome, SessionConfig, SessionEvent, SessionPool,
    session_event_channel,
};
use parley_sdk::PermissionMode;
use parley_sdk::testing::ScriptedAgentService;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(about = "In-process host for parley agent sessions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send messages through one conversation backed by a scripted service.
    Run(RunArgs),
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// JSON array of exchange scripts replayed by the in-process service.
    #[arg(long)]
    script: PathBuf,
    #[arg(long, default_value = "main")]
    conversation: String,
    #[arg(long)]
    working_dir: Option<PathBuf>,
    #[arg(long, default_value = "default")]
    mode: PermissionMode,
    #[arg(long)]
    resume: Option<String>,
    #[arg(long)]
    fork_from: Option<String>,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long, value_enum, default_value_t = ApprovalMode::Auto)]
    approvals: ApprovalMode,
    #[arg(long = "message", required = true)]
    messages: Vec<String>,
    /// Attached to the first message.
    #[arg(long = "attach")]
    attachments: Vec<PathBuf>,
    #[arg(long = "no-stream-events", action = ArgAction::SetTrue)]
    no_stream_events: bool,
    #[arg(long, action = ArgAction::SetTrue)]
    json_events: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ApprovalMode {
    Auto,
    Console,
    Deny,
}

enum ApprovalPrompt {
    Permission(PermissionRequest),
    Plan(PlanApprovalRequest),
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run(args) => run_command(args).await,
    };

    match result {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(1)
        }
    }
}

async fn run_command(args: RunArgs) -> Result<ExitCode, String> {
    let config = load_config(args.config.as_deref(), args.model)?;
    let script = std::fs::read_to_string(&args.script)
        .map_err(|e| format!("failed reading script '{}': {e}", args.script.display()))?;
    let service = ScriptedAgentService::from_json_str(&script).map_err(|e| e.to_string())?;

    let working_dir = match args.working_dir {
        Some(path) => path,
        None => std::env::current_dir().map_err(|e| e.to_string())?,
    };
    let mut record = ConversationRecord::new(working_dir).with_permission_mode(args.mode);
    record.external_session_id = args.resume;
    record.parent_session_id = args.fork_from;
    let store = MemoryConversationStore::new();
    store.insert(args.conversation.clone(), record);

    let (emitter, mut events) = session_event_channel();
    let stream_events = !args.no_stream_events;
    let json_events = args.json_events;
    let event_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if stream_events {
                print_event(&event, json_events);
            }
        }
    });

    let pool = Arc::new(
        SessionPool::new(
            Arc::new(service),
            Arc::new(store),
            Arc::new(emitter),
            config,
        )
        .map_err(|e| e.to_string())?,
    );

    let (prompt_tx, prompt_rx) = mpsc::unbounded_channel();
    let approver = tokio::spawn(run_approver(
        pool.clone(),
        args.conversation.clone(),
        args.approvals,
        prompt_rx,
    ));

    let mut attachments: Vec<Attachment> =
        args.attachments.into_iter().map(Attachment::new).collect();
    let mut pending = Vec::new();
    for text in args.messages {
        let reply = Arc::new(Mutex::new(String::new()));
        let callbacks = message_callbacks(reply.clone(), prompt_tx.clone());
        let ticket = pool
            .enqueue(
                &args.conversation,
                text,
                std::mem::take(&mut attachments),
                callbacks,
            )
            .await
            .map_err(|e| e.to_string())?;
        pending.push((ticket, reply));
    }
    drop(prompt_tx);

    let mut exit = ExitCode::SUCCESS;
    let mut failure = None;
    for (index, (ticket, reply)) in pending.into_iter().enumerate() {
        let text = || reply.lock().expect("reply mutex poisoned").clone();
        match ticket.wait().await {
            Ok(SendOutcome::Completed) => println!("[{index}] {}", text()),
            Ok(SendOutcome::Interrupted) => {
                println!("[{index}] <interrupted>");
                exit = ExitCode::from(2);
            }
            Err(error) => {
                println!("[{index}] <error: {error}>");
                failure.get_or_insert(error.to_string());
            }
        }
    }

    if let Some(session) = pool.session(&args.conversation) {
        session.wait_until_idle().await;
        if let Some(id) = session.external_session_id() {
            println!("session_id: {id}");
        }
    }
    pool.shutdown().await;
    approver.abort();
    let _ = approver.await;
    drop(pool);
    event_task.await.map_err(|e| e.to_string())?;

    match failure {
        Some(error) => Err(error),
        None => Ok(exit),
    }
}

fn load_config(path: Option<&Path>, model: Option<String>) -> Result<SessionConfig, String> {
    let mut config = match path {
        Some(path) => SessionConfig::from_json_file(path).map_err(|e| e.to_string())?,
        None => SessionConfig::default(),
    };
    if let Some(model) = model.or_else(|| std::env::var("PARLEY_MODEL").ok()) {
        config.model = model;
    }
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn message_callbacks(
    reply: Arc<Mutex<String>>,
    prompts: mpsc::UnboundedSender<ApprovalPrompt>,
) -> MessageCallbacks {
    let plan_prompts = prompts.clone();
    MessageCallbacks::new()
        .on_token(move |text| {
            // Tokens carry the full text so far.
            *reply.lock().expect("reply mutex poisoned") = text.to_string();
        })
        .on_tool_use(|name, _input| debug!(tool = name, "tool started"))
        .on_permission_request(move |request| {
            let _ = prompts.send(ApprovalPrompt::Permission(request));
        })
        .on_plan_approval_request(move |request| {
            let _ = plan_prompts.send(ApprovalPrompt::Plan(request));
        })
}

async fn run_approver(
    pool: Arc<SessionPool>,
    conversation: String,
    mode: ApprovalMode,
    mut prompts: mpsc::UnboundedReceiver<ApprovalPrompt>,
) {
    while let Some(prompt) = prompts.recv().await {
        let (id, question) = match &prompt {
            ApprovalPrompt::Permission(request) => (
                request.id.clone(),
                format!("Allow {}? {}", request.tool, request.action),
            ),
            ApprovalPrompt::Plan(request) => (
                request.id.clone(),
                format!("Approve plan?\n{}", request.plan),
            ),
        };
        let approved = match mode {
            ApprovalMode::Auto if is_interactive_terminal() => ask_console(question).await,
            ApprovalMode::Auto => true,
            ApprovalMode::Console => ask_console(question).await,
            ApprovalMode::Deny => false,
        };
        match prompt {
            ApprovalPrompt::Permission(_) => {
                pool.respond_to_permission(&conversation, &id, approved, None);
            }
            ApprovalPrompt::Plan(_) => {
                pool.respond_to_plan_approval(&conversation, &id, approved);
            }
        }
    }
}

async fn ask_console(question: String) -> bool {
    tokio::task::spawn_blocking(move || {
        eprintln!("[?] {question}");
        let answer = read_line("[Y/N]: ").unwrap_or_default();
        matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes")
    })
    .await
    .unwrap_or(false)
}

fn read_line(prompt: &str) -> Option<String> {
    let mut stderr = io::stderr();
    write!(stderr, "{prompt}").ok()?;
    stderr.flush().ok()?;

    let mut raw = String::new();
    io::stdin().read_line(&mut raw).ok()?;
    Some(raw.trim().to_string())
}

fn print_event(event: &SessionEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(_) => print_event_text(event),
        }
    } else {
        print_event_text(event);
    }
}

fn print_event_text(event: &SessionEvent) {
    println!(
        "[event {}] {} {}",
        event.conversation_id,
        event.timestamp,
        event.event.name()
    );
}

fn is_interactive_terminal() -> bool {
    io::stdin().is_terminal() && io::stdout().is_terminal()
}
