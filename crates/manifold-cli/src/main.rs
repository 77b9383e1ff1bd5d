//! The `manifold` command line interface.
//!
//! `manifold compile` compiles a catalog for a node and writes it as JSON;
//! `manifold repl` evaluates expressions interactively against a scratch
//! catalog. Exit codes: 0 on success, 1 on compilation failure, 2 on
//! usage errors (from the argument parser).

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use manifold_lang::environment::{Environment, Settings};
use manifold_lang::eval::{self, EvaluationContext, Evaluator, StackFrame};
use manifold_lang::logging::{Level, LogEntry, LogSink, Logger};
use manifold_lang::{Catalog, Facts, Node};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "manifold")]
#[command(about = "Compile Manifold manifests into resource catalogs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct EnvironmentOptions {
    /// The environment directory to compile in.
    #[arg(long, default_value = ".")]
    environment_dir: PathBuf,

    /// The environment name.
    #[arg(long, default_value = "production")]
    environment: String,

    /// Override the module search path (colon-separated).
    #[arg(long)]
    modulepath: Option<String>,

    /// Load node facts from a JSON file.
    #[arg(long)]
    facts: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile a catalog and print it as JSON.
    Compile {
        #[command(flatten)]
        options: EnvironmentOptions,

        /// The node name to compile for.
        #[arg(long)]
        node: Option<String>,

        /// Write the catalog to a file instead of standard output.
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Manifests to compile instead of the environment's initial
        /// manifests.
        manifests: Vec<PathBuf>,
    },
    /// Evaluate expressions interactively.
    Repl {
        #[command(flatten)]
        options: EnvironmentOptions,
    },
}

/// Sink that renders diagnostics to standard error.
struct ConsoleSink;

impl LogSink for ConsoleSink {
    fn log(&mut self, entry: LogEntry) {
        if entry.level < Level::Notice {
            // Forward low-severity diagnostics to tracing.
            tracing::debug!("{}", entry.message);
            return;
        }
        match (&entry.path, entry.line) {
            (Some(path), Some(line)) => {
                eprintln!("{}: {}:{}: {}", entry.level, path, line, entry.message);
            }
            _ => eprintln!("{}: {}", entry.level, entry.message),
        }
        if let (Some(text), Some(column)) = (&entry.text, entry.column) {
            eprintln!("    {}", text);
            eprintln!("    {}^", " ".repeat(column.saturating_sub(1)));
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "manifold=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Compile {
            options,
            node,
            output,
            manifests,
        } => compile(options, node, output, manifests),
        Command::Repl { options } => repl(options),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {:#}", error);
            ExitCode::FAILURE
        }
    }
}

fn setup(
    options: &EnvironmentOptions,
) -> anyhow::Result<(Logger, Arc<Environment>, Arc<Facts>)> {
    let logger = Logger::new(ConsoleSink);

    let mut settings = Settings {
        environment: options.environment.clone(),
        ..Settings::default()
    };
    if let Some(modulepath) = &options.modulepath {
        settings.module_path = modulepath.clone();
    }

    let environment = Environment::create(&options.environment_dir, settings, &logger, None)
        .with_context(|| {
            format!(
                "failed to load environment from '{}'",
                options.environment_dir.display()
            )
        })?;

    let facts = match &options.facts {
        Some(path) => Facts::from_json_file(path).map_err(anyhow::Error::msg)?,
        None => Facts::new(),
    };

    Ok((logger, environment, Arc::new(facts)))
}

fn compile(
    options: EnvironmentOptions,
    node_name: Option<String>,
    output: Option<PathBuf>,
    manifests: Vec<PathBuf>,
) -> anyhow::Result<()> {
    let (logger, environment, facts) = setup(&options)?;
    let node = Node::new(logger, node_name.as_deref(), environment, facts)
        .map_err(render_compilation_error)?;

    tracing::info!(node = node.name(), "compiling catalog");
    let catalog = node
        .compile(&manifests)
        .map_err(render_compilation_error)?;
    tracing::info!("compilation succeeded");

    let json = serde_json::to_string_pretty(&catalog.to_json())?;
    match output {
        Some(path) => std::fs::write(&path, json)
            .with_context(|| format!("failed to write '{}'", path.display()))?,
        None => println!("{}", json),
    }
    Ok(())
}

fn render_compilation_error(error: manifold_lang::CompilationError) -> anyhow::Error {
    anyhow::Error::msg(error.to_diagnostic().trim_end().to_string())
}

fn repl(options: EnvironmentOptions) -> anyhow::Result<()> {
    let (logger, environment, facts) = setup(&options)?;

    let mut catalog = Catalog::new("repl", environment.name());
    let mut context =
        EvaluationContext::new(environment.clone(), logger.clone(), &mut catalog, facts);
    context
        .initialize()
        .map_err(|e| anyhow::Error::msg(e.message.clone()))?;
    context
        .push_frame(StackFrame::new("<repl>", context.top_scope()))
        .map_err(|e| anyhow::Error::msg(e.message.clone()))?;

    let stdin = std::io::stdin();
    let mut line_number = 0usize;
    loop {
        print!("manifold> ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }
        line_number += 1;

        let path = format!("<repl {}>", line_number);
        let tree = match environment.import_source(&logger, line, &path) {
            Ok(tree) => tree,
            Err(error) => {
                eprintln!("{}", error.to_diagnostic().trim_end());
                continue;
            }
        };

        let mut evaluator = Evaluator::new(&mut context, tree);
        match evaluator.evaluate_tree() {
            Ok(value) => println!("=> {}", value),
            Err(error) => {
                let rendered = manifold_lang::CompilationError::from_evaluation(error);
                eprintln!("{}", rendered.to_diagnostic().trim_end());
            }
        }
    }

    // Deferred work still runs so collected resources surface mistakes.
    if let Err(error) = eval::finalize(&mut context) {
        let rendered = manifold_lang::CompilationError::from_evaluation(error);
        eprintln!("{}", rendered.to_diagnostic().trim_end());
    }
    Ok(())
}
