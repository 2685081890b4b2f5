use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser as _;
use thiserror::Error;
use tokio::task::LocalSet;
use tracing::debug;

use monkey::pretty_print::report_all;
use monkey::{Environment, Interpreter, Node, Object, init_tracing, parse, tokenize};

/// Run a Monkey program.
#[derive(clap::Parser, Debug)]
#[command(name = "monkey", version, about)]
struct Args {
    /// Source file to run
    file: PathBuf,

    /// Print the token stream instead of running
    #[arg(long)]
    tokens: bool,

    /// Print the parsed program instead of running
    #[arg(long)]
    ast: bool,
}

#[derive(Error, Debug)]
enum RunError {
    #[error("could not read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("could not start the runtime: {0}")]
    Runtime(io::Error),
}

fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();
    match run(&args) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("monkey: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<ExitCode, RunError> {
    let input = fs::read_to_string(&args.file).map_err(|source| RunError::Read {
        path: args.file.clone(),
        source,
    })?;
    let source_id = args.file.display().to_string();

    if args.tokens {
        for token in tokenize(&input) {
            println!(
                "{:>9} {:<8} {:?}",
                token.span.to_string(),
                token.kind.to_string(),
                token.literal
            );
        }
        return Ok(ExitCode::SUCCESS);
    }

    let (program, errors) = parse(&input);
    if !errors.is_empty() {
        if let Err(err) = report_all(&errors, &source_id, &input) {
            debug!(%err, "failed to render parse errors");
            for error in &errors {
                eprintln!("{}", error);
            }
        }
        return Ok(ExitCode::FAILURE);
    }

    if args.ast {
        for statement in &program.statements {
            println!("{}", statement);
        }
        return Ok(ExitCode::SUCCESS);
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(RunError::Runtime)?;
    let result = LocalSet::new().block_on(&runtime, async {
        let interpreter = Interpreter::stdio();
        let env = Environment::new();
        let result = interpreter.evaluate(Node::from(&program), &env).await;
        if !matches!(result, Object::Void) {
            interpreter.console().print_line(&result.inspect());
        }
        // Keep running while intervals are live
        interpreter.timers().wait_idle().await;
        result
    });

    Ok(if result.is_error() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
