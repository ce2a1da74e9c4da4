//! An interactive agent for the terminal, built on the `chainlet` library.

#[macro_use]
extern crate tracing;

use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use chainlet::SessionBuilder;
use chainlet::config::{CacheBackend, Config};
use chainlet::core::tool::Approval;
use chainlet::core::{AgentKind, AgentOutput, AgentStep};
use chainlet::llms::load_llm;
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tokio::io::{self, AsyncBufReadExt};
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::sleep;

/// Chat with a tool-using agent.
#[derive(Parser)]
#[command(name = "chainlet", version, about)]
struct Cli {
    /// The TOML config file.
    #[arg(short, long, env = "CHAINLET_CONFIG")]
    config: Option<PathBuf>,

    /// An LLM registry file (.json, .yaml or .toml), overriding `[llm]`.
    #[arg(long)]
    llm: Option<PathBuf>,

    /// The response cache, overriding `[cache] backend`.
    #[arg(long, value_enum)]
    cache: Option<CacheArg>,

    /// Use the zero-shot ReAct agent instead of native tool calls.
    #[arg(long)]
    react: bool,

    /// The iteration budget of each answer, `0` for unbounded.
    #[arg(long)]
    max_iterations: Option<usize>,

    /// Print every tool step.
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum CacheArg {
    None,
    Memory,
    File,
}

impl From<CacheArg> for CacheBackend {
    fn from(value: CacheArg) -> Self {
        match value {
            CacheArg::None => CacheBackend::None,
            CacheArg::Memory => CacheBackend::Memory,
            CacheArg::File => CacheBackend::File,
        }
    }
}

enum SessionEvent {
    Step(AgentStep),
    ToolRequest(Approval),
}

const BAR_CHAR: &str = "▎";

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", err.red());
            return ExitCode::FAILURE;
        }
    };

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    let mut builder = match SessionBuilder::from_config(&config) {
        Ok(builder) => builder,
        Err(err) => {
            eprintln!("{}", err.red());
            return ExitCode::FAILURE;
        }
    };
    if config.agent.system_prompt.is_none() && config.agent.kind == AgentKind::ToolCalling {
        builder = builder.with_system_prompt(
            include_str!("./system_prompt.md").replace("{{HOST_OS}}", host_os()),
        );
    }
    let session = builder
        .on_step({
            let event_tx = event_tx.clone();
            move |step| {
                event_tx.send(SessionEvent::Step(step.clone())).ok();
            }
        })
        .on_tool_call_request({
            let event_tx = event_tx.clone();
            move |approval| {
                event_tx.send(SessionEvent::ToolRequest(approval)).ok();
            }
        })
        .build();
    drop(event_tx);

    let progress_style = match ProgressStyle::with_template("{spinner} {wide_msg}") {
        Ok(style) => style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        Err(err) => {
            error!("invalid progress template: {err}");
            ProgressStyle::default_spinner()
        }
    };

    'outer: loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let Some(line) = read_line().await else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let run = session.send_message(line);
        tokio::pin!(run);
        let mut progress_bar = None;

        loop {
            // Create a new progress bar if it has been finished.
            progress_bar
                .get_or_insert_with(|| {
                    let progress_bar = ProgressBar::new_spinner();
                    progress_bar.set_style(progress_style.clone());
                    progress_bar.set_message("🤔 Thinking...");
                    progress_bar
                })
                .inc(1);

            let sleep = sleep(Duration::from_millis(100));
            let event = select! {
                result = &mut run => {
                    if let Some(progress_bar) = progress_bar.take() {
                        progress_bar.finish_and_clear();
                    }
                    // Steps queued by the last tool round come before the answer.
                    while let Ok(SessionEvent::Step(step)) = event_rx.try_recv() {
                        print_step(&step, cli.verbose);
                    }
                    match result {
                        Ok(output) => print_output(&output),
                        Err(err) => eprintln!("{}", err.red()),
                    }
                    println!();
                    break;
                },
                event = event_rx.recv() => {
                    let Some(event) = event else {
                        break 'outer;
                    };
                    event
                },
                _ = sleep => {
                    continue;
                }
            };

            // Finish the progress bar before printing anything else.
            if let Some(progress_bar) = progress_bar.take() {
                progress_bar.finish_and_clear();
            }

            match event {
                SessionEvent::ToolRequest(approval) => {
                    let bar = BAR_CHAR.bright_yellow();
                    println!("\n{bar}⚠️  {}:", approval.justification());
                    println!("{bar}{}", approval.what().bright_white().bold());
                    print!("Proceed? [Y/n]: ");
                    std::io::stdout().flush().ok();

                    let Some(answer) = read_line().await else {
                        break 'outer;
                    };
                    let answer = answer.trim();
                    if answer.is_empty() || answer.eq_ignore_ascii_case("y") {
                        approval.approve();
                    } else {
                        approval.reject(None);
                    }

                    println!();
                }
                SessionEvent::Step(step) => print_step(&step, cli.verbose),
            }
        }
    }
    ExitCode::SUCCESS
}

fn load_config(cli: &Cli) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(path) = &cli.llm {
        config.llm = Some(load_llm(path)?);
    }
    if let Some(cache) = cli.cache {
        config.cache.backend = cache.into();
    }
    if cli.react {
        config.agent.kind = AgentKind::ZeroShotReact;
    }
    if let Some(max_iterations) = cli.max_iterations {
        config.agent.max_iterations = max_iterations;
    }
    Ok(config)
}

fn print_step(step: &AgentStep, verbose: bool) {
    if !verbose {
        return;
    }
    let bar = BAR_CHAR.bright_black();
    println!(
        "{bar}🔧 {} {}",
        step.action.tool.bright_magenta(),
        step.action.tool_input.to_string().dimmed()
    );
    for line in step.observation.lines() {
        println!("{bar}   {}", line.dimmed());
    }
}

fn print_output(output: &AgentOutput) {
    println!("{}🤖 {}", BAR_CHAR.bright_cyan(), output.output.bright_white());
}

async fn read_line() -> Option<String> {
    let mut stdin = io::BufReader::new(io::stdin());
    let mut line = String::new();

    match stdin.read_line(&mut line).await {
        Ok(count) => {
            if count == 0 {
                return None;
            }
            Some(line)
        }
        Err(err) => {
            error!("error reading input: {}", err);
            None
        }
    }
}

#[inline]
fn host_os() -> &'static str {
    let os = std::env::consts::OS;
    match os {
        "linux" => "Linux",
        "macos" => "macOS",
        "windows" => "Windows",
        _ => "some other OS",
    }
}
