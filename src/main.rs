// Stepwright: Workflow step-execution engine for RPA automation
// License: Apache-2.0

use clap::{Parser, Subcommand, ValueEnum};
use rustyline::error::ReadlineError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use stepwright::bus::{EventBus, ExecutionEvent, LogLevel};
use stepwright::config::Config;
use stepwright::debug::{DebugController, DebugState};
use stepwright::engine::{ExecutionController, ModePreference, RunOptions, RunReport, SessionStatus};
use stepwright::error::EngineError;
use stepwright::journal::RunJournal;
use stepwright::local::{ConsolePrompter, NonInteractivePrompter, Prompter};
use stepwright::registry::ActionRegistry;
use stepwright::validate::ValidationReport;
use stepwright::workflow::parser::load_workflow;
use stepwright::workflow::{flatten, flatten_with_depth, Workflow};
use tokio::sync::broadcast::error::RecvError;

const LOGO: &str = "⚙";

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "stepwright",
    about = "Stepwright: workflow step-execution engine for RPA automation",
    version
)]
struct Cli {
    /// Show engine debug logs on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Auto,
    Local,
    Remote,
}

impl From<ModeArg> for ModePreference {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Auto => ModePreference::Auto,
            ModeArg::Local => ModePreference::Local,
            ModeArg::Remote => ModePreference::Remote,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Workflow document (.json, .yaml, .yml)
        workflow: PathBuf,
        /// Transport selection
        #[arg(short, long, value_enum, default_value = "auto")]
        mode: ModeArg,
        /// Pause before this step id (local runs, repeatable)
        #[arg(short, long = "breakpoint")]
        breakpoints: Vec<String>,
        /// Never prompt; manual entry is unavailable and dialogs auto-dismiss
        #[arg(long)]
        non_interactive: bool,
        /// Config file path
        #[arg(short, long)]
        config: Option<String>,
    },
    /// Check a workflow's step params without running it
    Validate {
        workflow: PathBuf,
        #[arg(short, long)]
        config: Option<String>,
    },
    /// Print the flattened step order of a workflow
    Outline { workflow: PathBuf },
    /// List the action catalog
    Actions {
        /// Only custom components
        #[arg(long)]
        custom: bool,
        #[arg(short, long)]
        config: Option<String>,
    },
    /// Create (or reuse) a custom component for a label
    CreateAction {
        label: String,
        #[arg(short, long, default_value = "")]
        description: String,
        #[arg(short, long)]
        config: Option<String>,
    },
    /// Step through a workflow with breakpoints
    Debug {
        workflow: PathBuf,
        #[arg(short, long)]
        config: Option<String>,
    },
    /// Show recent runs from the journal
    History {
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
        #[arg(short, long)]
        config: Option<String>,
    },
    /// Show version information
    Version,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    stepwright::logger::init_with_default(if cli.verbose { "debug" } else { "warn" });

    match cli.command {
        Commands::Run {
            workflow,
            mode,
            breakpoints,
            non_interactive,
            config,
        } => {
            let options = RunOptions::with_mode(mode.into()).with_breakpoints(breakpoints);
            run_cmd(&workflow, options, non_interactive, config).await;
        }
        Commands::Validate { workflow, config } => validate_cmd(&workflow, config).await,
        Commands::Outline { workflow } => outline_cmd(&workflow),
        Commands::Actions { custom, config } => actions_cmd(custom, config).await,
        Commands::CreateAction {
            label,
            description,
            config,
        } => create_action_cmd(&label, &description, config).await,
        Commands::Debug { workflow, config } => debug_cmd(&workflow, config).await,
        Commands::History { limit, config } => history_cmd(limit, config),
        Commands::Version => version_cmd(),
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

async fn run_cmd(path: &Path, options: RunOptions, non_interactive: bool, config: Option<String>) {
    let cfg = load_config(config.as_deref());
    let workflow = load_or_exit(path);
    let prompter: Arc<dyn Prompter> = if non_interactive {
        Arc::new(NonInteractivePrompter)
    } else {
        Arc::new(ConsolePrompter::new())
    };
    let controller = Arc::new(build_controller(&cfg, prompter).await);

    // Ctrl+C stops the run at the next step boundary.
    {
        let controller = controller.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n{} Stopping...", LOGO);
                controller.stop().await;
            }
        });
    }

    let printer = spawn_printer(controller.bus());
    let result = controller.run(&workflow, options).await;
    finish_printer(printer, result.is_ok()).await;

    match result {
        Ok(report) => {
            print_report(&report);
            if report.status == SessionStatus::Failed {
                std::process::exit(1);
            }
        }
        Err(EngineError::Validation(report)) => {
            print_validation(&report);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("{} Error: {}", LOGO, e);
            std::process::exit(1);
        }
    }
}

fn spawn_printer(bus: &EventBus) -> tokio::task::JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ExecutionEvent::Summary(_)) => break,
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Let the printer drain up to the summary of a started run; otherwise
/// there is nothing more to print.
async fn finish_printer(printer: tokio::task::JoinHandle<()>, started: bool) {
    if started {
        let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;
    } else {
        printer.abort();
    }
}

fn print_event(event: &ExecutionEvent) {
    match event {
        ExecutionEvent::StatusChanged { status, .. } => println!("{} status: {}", LOGO, status),
        ExecutionEvent::Progress { percent, .. } => println!("  [{:>3}%]", percent),
        ExecutionEvent::StepStarted {
            index,
            total,
            action,
            label,
        } => println!("  ▶ {}/{} {} ({})", index + 1, total, label, action),
        ExecutionEvent::Log(entry) => {
            let tag = match entry.level {
                LogLevel::Info => "info",
                LogLevel::Success => " ok ",
                LogLevel::Warning => "warn",
                LogLevel::Error => "FAIL",
            };
            println!("    {} {}", tag, entry.message);
        }
        ExecutionEvent::Summary(_) => {}
    }
}

fn print_report(report: &RunReport) {
    let icon = match report.status {
        SessionStatus::Completed => "✅",
        SessionStatus::Stopped => "⏹",
        _ => "❌",
    };
    println!(
        "\n{} {} ({} mode, {}%, {:.1}s)",
        icon,
        report.status,
        report.mode,
        report.progress_percent,
        report.duration.as_secs_f64()
    );
    if let Some(error) = &report.error {
        println!("   {}", error);
    }
}

fn print_validation(report: &ValidationReport) {
    eprintln!(
        "{} Workflow is not valid: {} field error(s) in {} step(s)",
        LOGO,
        report.field_error_count(),
        report.len()
    );
    for step in &report.steps {
        eprintln!("  step {} '{}'", step.step_index + 1, step.step_label);
        for err in &step.errors {
            eprintln!("    - {}: {}", err.field, err.message);
        }
    }
}

// ---------------------------------------------------------------------------
// Validate / outline
// ---------------------------------------------------------------------------

async fn validate_cmd(path: &Path, config: Option<String>) {
    let cfg = load_config(config.as_deref());
    let workflow = load_or_exit(path);
    let controller = build_controller(&cfg, Arc::new(NonInteractivePrompter)).await;

    let report = controller.check(&workflow).await;
    if report.is_empty() {
        println!(
            "✅ '{}' is valid ({} steps)",
            workflow.display_name(),
            workflow.step_count()
        );
    } else {
        print_validation(&report);
        std::process::exit(1);
    }
}

fn outline_cmd(path: &Path) {
    let workflow = load_or_exit(path);
    println!("{} {} ({} steps)", LOGO, workflow.display_name(), workflow.step_count());
    for (index, (depth, step)) in flatten_with_depth(&workflow.steps).into_iter().enumerate() {
        println!(
            "{:>4}  {}{} [{}] #{}",
            index + 1,
            "  ".repeat(depth),
            step.display_label(),
            step.action,
            step.id
        );
    }
}

// ---------------------------------------------------------------------------
// Action catalog
// ---------------------------------------------------------------------------

async fn open_registry(cfg: &Config) -> ActionRegistry {
    let path = match cfg.registry_path() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{} Error: {}", LOGO, e);
            std::process::exit(1);
        }
    };
    match ActionRegistry::open(&path).await {
        Ok(r) => r,
        Err(e) => {
            eprintln!("{} Error: {}", LOGO, e);
            std::process::exit(1);
        }
    }
}

async fn actions_cmd(custom_only: bool, config: Option<String>) {
    let cfg = load_config(config.as_deref());
    let registry = open_registry(&cfg).await;

    if !custom_only {
        println!("Built-in actions:");
        for d in registry.builtin() {
            let kind = if d.is_container { " (container)" } else { "" };
            println!("  {:<22} {}{}", d.action, d.label, kind);
        }
    }

    let custom = registry.custom().await;
    println!("Custom components: {}", custom.len());
    for d in custom {
        let created = d
            .created_at
            .map(|t| t.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        println!("  {:<32} {:<28} {} {}", d.action, d.label, d.icon, created);
    }
}

async fn create_action_cmd(label: &str, description: &str, config: Option<String>) {
    let cfg = load_config(config.as_deref());
    let registry = open_registry(&cfg).await;

    match registry
        .request_custom_action(label, description, Vec::new())
        .await
    {
        Ok((d, true)) => println!("✅ Created {} ({}, icon {})", d.action, d.label, d.icon),
        Ok((d, false)) => println!("ℹ️  Reusing existing {} ({})", d.action, d.label),
        Err(e) => {
            eprintln!("{} Error: {}", LOGO, e);
            std::process::exit(1);
        }
    }
}

// ---------------------------------------------------------------------------
// Debug REPL
// ---------------------------------------------------------------------------

fn print_cursor(dbg: &DebugController, workflow: &Workflow) {
    let steps = flatten(&workflow.steps);
    match (dbg.state(), dbg.cursor()) {
        (DebugState::Stopped, _) => println!("  ■ end of workflow"),
        (state, Some(i)) => {
            if let Some(step) = steps.get(i) {
                let mark = if state == DebugState::PausedAtBreakpoint { "●" } else { "→" };
                println!("  {} {}/{} {} [{}]", mark, i + 1, steps.len(), step.display_label(), step.id);
            }
        }
        (state, None) => println!("  {:?}", state),
    }
}

async fn debug_cmd(path: &Path, config: Option<String>) {
    let cfg = load_config(config.as_deref());
    let workflow = load_or_exit(path);
    // The REPL owns the terminal, so runs started from it never prompt.
    let controller = Arc::new(build_controller(&cfg, Arc::new(NonInteractivePrompter)).await);

    let mut dbg = DebugController::new();
    dbg.attach(&workflow.steps);

    println!("{} Debugging '{}' ({} steps)", LOGO, workflow.display_name(), dbg.len());
    println!("Commands: b <step-id>, list, start, c, n, run, stop, exit\n");

    let mut rl = match rustyline::DefaultEditor::new() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Failed to initialize readline: {}", e);
            std::process::exit(1);
        }
    };

    let mut run_task: Option<tokio::task::JoinHandle<()>> = None;

    loop {
        match rl.readline("debug> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(trimmed);
                let mut parts = trimmed.split_whitespace();
                let command = parts.next().unwrap_or_default();
                let running = controller.is_running();

                match command {
                    "b" | "break" => match parts.next() {
                        Some(id) => {
                            if dbg.toggle_breakpoint(id) {
                                println!("  ● breakpoint set on {}", id);
                            } else {
                                println!("  ○ breakpoint cleared on {}", id);
                            }
                        }
                        None => println!("  usage: b <step-id>"),
                    },
                    "list" => {
                        let mut ids: Vec<_> = dbg.breakpoints().iter().cloned().collect();
                        ids.sort();
                        println!("  breakpoints: {}", if ids.is_empty() { "none".into() } else { ids.join(", ") });
                    }
                    "start" => {
                        dbg.attach(&workflow.steps);
                        dbg.start();
                        print_cursor(&dbg, &workflow);
                    }
                    "c" | "continue" if running => {
                        controller.resume().await;
                    }
                    "c" | "continue" => {
                        dbg.continue_to_breakpoint();
                        print_cursor(&dbg, &workflow);
                    }
                    "n" | "next" => {
                        dbg.step_over();
                        print_cursor(&dbg, &workflow);
                    }
                    "run" if running => println!("  a run is already in progress"),
                    "run" => {
                        // Local runs honour breakpoints; `c` resumes, `stop` cancels.
                        let options = RunOptions::with_mode(ModePreference::Local)
                            .with_breakpoints(dbg.breakpoints().iter().cloned());
                        let controller = controller.clone();
                        let workflow = workflow.clone();
                        run_task = Some(tokio::spawn(async move {
                            let printer = spawn_printer(controller.bus());
                            let result = controller.run(&workflow, options).await;
                            finish_printer(printer, result.is_ok()).await;
                            match result {
                                Ok(report) => print_report(&report),
                                Err(EngineError::Validation(report)) => print_validation(&report),
                                Err(e) => eprintln!("{} Error: {}", LOGO, e),
                            }
                        }));
                    }
                    "stop" if running => {
                        controller.stop().await;
                    }
                    "stop" => {
                        dbg.stop();
                        println!("  detached");
                    }
                    "exit" | "quit" => break,
                    other => println!("  unknown command: {}", other),
                }
            }
            Err(ReadlineError::Eof) => break,
            Err(ReadlineError::Interrupted) => {
                if controller.is_running() {
                    controller.stop().await;
                } else {
                    println!("Use 'exit' to quit or Ctrl+D to exit.");
                }
            }
            Err(e) => {
                eprintln!("Readline error: {}", e);
                break;
            }
        }
    }

    if let Some(task) = run_task {
        controller.stop().await;
        let _ = task.await;
    }
}

// ---------------------------------------------------------------------------
// Other commands
// ---------------------------------------------------------------------------

fn history_cmd(limit: usize, config: Option<String>) {
    let cfg = load_config(config.as_deref());
    let path = match cfg.journal_path() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{} Error: {}", LOGO, e);
            std::process::exit(1);
        }
    };
    let journal = RunJournal::new(path);
    match journal.tail(limit) {
        Ok(runs) if runs.is_empty() => println!("No runs recorded in {}", journal.path().display()),
        Ok(runs) => {
            for run in runs {
                println!(
                    "{}  {:<9} {:<6} {:>3}%  {:>7}ms  {}{}",
                    run.finished_at.format("%Y-%m-%d %H:%M:%S"),
                    run.status,
                    run.mode,
                    run.progress_percent,
                    run.duration_ms,
                    run.workflow_name,
                    run.error.map(|e| format!("  ({})", e)).unwrap_or_default()
                );
            }
        }
        Err(e) => {
            eprintln!("{} Error reading journal: {}", LOGO, e);
            std::process::exit(1);
        }
    }
}

fn version_cmd() {
    println!("{} Stepwright v{}", LOGO, stepwright::VERSION);
    println!("  Workflow step-execution engine for RPA automation");
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load_config(path: Option<&str>) -> Config {
    let config_path = if let Some(p) = path {
        PathBuf::from(p)
    } else {
        Config::default_path().unwrap_or_else(|_| PathBuf::from("config.json"))
    };

    let cfg = Config::load(&config_path).unwrap_or_else(|e| {
        tracing::warn!("Failed to load config: {}, using defaults", e);
        Config::default()
    });

    if let Err(e) = cfg.validate() {
        eprintln!("{} Configuration Error: {}", LOGO, e);
        std::process::exit(1);
    }
    cfg
}

fn load_or_exit(path: &Path) -> Workflow {
    match load_workflow(path) {
        Ok(w) => w,
        Err(e) => {
            eprintln!("{} Error: {:#}", LOGO, e);
            std::process::exit(1);
        }
    }
}

async fn build_controller(cfg: &Config, prompter: Arc<dyn Prompter>) -> ExecutionController {
    match ExecutionController::from_config(cfg, prompter).await {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{} Error: {:#}", LOGO, e);
            std::process::exit(1);
        }
    }
}
