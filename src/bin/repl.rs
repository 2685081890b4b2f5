use std::borrow::Cow;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::Parser as _;
use rustyline::error::ReadlineError;
use rustyline::highlight::{CmdKind, Highlighter};
use rustyline::history::FileHistory;
use rustyline::validate::{ValidationContext, ValidationResult, Validator};
use rustyline::{Cmd, Completer, Context, Editor, EventHandler, KeyCode, KeyEvent, Modifiers};
use rustyline::{Helper, Highlighter, Hinter, Validator};
use tokio::task::LocalSet;
use tracing::warn;

use monkey::pretty_print::report_all;
use monkey::{
    Builtin, Console, Env, Environment, Interpreter, LineReader, Node, Object, TokenKind,
    init_tracing, parse, tokenize,
};

const PROMPT: &str = ">> ";

/// Interactive Monkey session.
#[derive(clap::Parser, Debug)]
#[command(name = "repl", version, about)]
struct Args {
    /// Use emacs key bindings instead of vi
    #[arg(long)]
    emacs: bool,

    /// Where to keep the line history
    #[arg(long, default_value = "monkey_history.txt")]
    history: PathBuf,
}

/// Names offered for completion. Shared with the input thread, which owns the
/// editor.
type Names = Arc<Mutex<BTreeSet<String>>>;

struct MonkeyCompleter {
    names: Names,
}

impl rustyline::completion::Completer for MonkeyCompleter {
    type Candidate = String;
    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<String>)> {
        let Some(last) = tokenize(&line[..pos]).pop() else {
            return Ok((pos, vec![]));
        };
        if last.kind != TokenKind::Ident || last.span.end != pos {
            return Ok((pos, vec![]));
        }
        let Ok(names) = self.names.lock() else {
            return Ok((pos, vec![]));
        };
        let candidates = names
            .iter()
            .filter(|name| name.starts_with(&last.literal))
            .cloned()
            .collect();
        Ok((last.span.start, candidates))
    }
}

#[derive(Completer, Helper, Highlighter, Hinter, Validator)]
struct MonkeyHelper {
    #[rustyline(Validator)]
    validator: MonkeyValidator,
    #[rustyline(Highlighter)]
    highlighter: MonkeyHighlighter,
    #[rustyline(Completer)]
    completer: MonkeyCompleter,
}

fn closes(opening: char, closing: char) -> bool {
    matches!((opening, closing), ('(', ')') | ('[', ']') | ('{', '}'))
}

/// Keeps reading lines while brackets or a string are left open.
struct MonkeyValidator;

impl Validator for MonkeyValidator {
    fn validate(&self, ctx: &mut ValidationContext) -> rustyline::Result<ValidationResult> {
        let mut stack = Vec::new();
        let mut in_string = false;

        for (i, c) in ctx.input().char_indices() {
            if in_string {
                in_string = c != '"';
                continue;
            }
            match c {
                '"' => in_string = true,
                '(' | '[' | '{' => stack.push(c),
                ')' | ']' | '}' => match stack.pop() {
                    Some(opening) if closes(opening, c) => {}
                    _ => {
                        return Ok(ValidationResult::Invalid(Some(format!(
                            "  - Unmatched '{}' at position {}",
                            c, i
                        ))));
                    }
                },
                _ => {}
            }
        }

        if in_string || !stack.is_empty() {
            Ok(ValidationResult::Incomplete)
        } else {
            Ok(ValidationResult::Valid(None))
        }
    }
}

struct MonkeyHighlighter;

impl Highlighter for MonkeyHighlighter {
    fn highlight<'l>(&self, line: &'l str, pos: usize) -> Cow<'l, str> {
        let mut stack: Vec<(char, usize, usize)> = Vec::new();
        let mut highlighted = String::new();
        let mut in_string = false;
        // Byte offset of the character just before the cursor
        let before_cursor = pos.checked_sub(1);

        for (i, c) in line.char_indices() {
            if in_string {
                in_string = c != '"';
                highlighted.push_str(&format!("\x1b[32m{}\x1b[0m", c)); // Green for strings
                continue;
            }

            match c {
                '"' => {
                    in_string = true;
                    highlighted.push_str(&format!("\x1b[32m{}\x1b[0m", c));
                }
                '(' | '[' | '{' => {
                    stack.push((c, i, highlighted.len()));
                    highlighted.push(c);
                }
                ')' | ']' | '}' => match stack.pop() {
                    Some((opening, source_pos, out_pos)) if closes(opening, c) => {
                        if before_cursor == Some(source_pos) || before_cursor == Some(i) {
                            highlighted.push_str(&format!("\x1b[34m{}\x1b[0m", c));
                            highlighted.replace_range(
                                out_pos..=out_pos,
                                &format!("\x1b[1;34m{}\x1b[0m", opening),
                            );
                        } else {
                            highlighted.push(c);
                        }
                    }
                    Some((opening, _, out_pos)) => {
                        highlighted.push_str(&format!("\x1b[31m{}\x1b[0m", c));
                        highlighted.replace_range(
                            out_pos..=out_pos,
                            &format!("\x1b[1;31m{}\x1b[0m", opening),
                        );
                    }
                    None => highlighted.push_str(&format!("\x1b[31m{}\x1b[0m", c)),
                },
                _ => highlighted.push(c),
            }
        }

        Cow::Owned(highlighted)
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _kind: CmdKind) -> bool {
        true
    }
}

type MonkeyEditor = Editor<MonkeyHelper, FileHistory>;

fn build_editor(args: &Args, names: Names) -> rustyline::Result<MonkeyEditor> {
    let edit_mode = if args.emacs {
        rustyline::EditMode::Emacs
    } else {
        rustyline::EditMode::Vi
    };
    let config = rustyline::config::Config::builder()
        .edit_mode(edit_mode)
        .build();
    let mut rl = Editor::with_config(config)?;
    rl.set_helper(Some(MonkeyHelper {
        validator: MonkeyValidator,
        highlighter: MonkeyHighlighter,
        completer: MonkeyCompleter { names },
    }));
    rl.bind_sequence(
        KeyEvent(KeyCode::Char('s'), Modifiers::CTRL),
        EventHandler::Simple(Cmd::Newline),
    );
    if rl.load_history(&args.history).is_err() {
        println!("No previous history.");
    }
    Ok(rl)
}

/// Serves every line read, both REPL input and the `input` builtin, from the
/// editor. History is saved as lines come in so it survives a killed session.
fn editor_reader(mut rl: MonkeyEditor, history: PathBuf) -> LineReader {
    LineReader::spawn(move |prompt| {
        loop {
            match rl.readline(prompt) {
                Ok(line) => {
                    if let Err(err) = rl
                        .add_history_entry(line.as_str())
                        .and_then(|_| rl.save_history(&history))
                    {
                        warn!(%err, "failed to save history");
                    }
                    return Some(line);
                }
                Err(ReadlineError::Interrupted) => {
                    println!("Interrupted. Type 'exit' or Ctrl-D to quit.");
                }
                Err(ReadlineError::Eof) => return None,
                Err(err) => {
                    eprintln!("Readline Error: {:?}", err);
                    return None;
                }
            }
        }
    })
}

fn refresh_names(names: &Names, env: &Env) {
    if let Ok(mut names) = names.lock() {
        names.extend(env.borrow().get_identifiers());
    }
}

async fn repl(interpreter: Interpreter, env: Env, names: Names) {
    loop {
        let Some(line) = interpreter.console().read_line(PROMPT).await else {
            println!("\nExiting.");
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("exit") {
            break;
        }

        let (program, errors) = parse(input);
        if !errors.is_empty() {
            if let Err(err) = report_all(&errors, "repl", input) {
                warn!(%err, "failed to render parse errors");
            }
            continue;
        }

        let result = interpreter.evaluate(Node::from(&program), &env).await;
        if !matches!(result, Object::Void) {
            interpreter.console().print_line(&result.inspect());
        }
        refresh_names(&names, &env);
    }
    interpreter.timers().clear_all();
}

fn main() -> rustyline::Result<()> {
    init_tracing();
    let args = Args::parse();

    println!("Monkey REPL v{}", env!("CARGO_PKG_VERSION"));
    println!("Type 'exit' or press Ctrl-D to quit.");

    let mut vocabulary: BTreeSet<String> =
        TokenKind::KEYWORDS.iter().map(|k| k.to_string()).collect();
    vocabulary.extend(Builtin::ALL.iter().map(|b| b.name().to_string()));
    let names: Names = Arc::new(Mutex::new(vocabulary));

    let rl = build_editor(&args, names.clone())?;
    let console = Console::new(std::io::stdout(), editor_reader(rl, args.history.clone()));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    LocalSet::new().block_on(
        &runtime,
        repl(Interpreter::new(console), Environment::new(), names),
    );
    Ok(())
}
