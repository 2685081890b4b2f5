use std::future::Future;

use tokio::task::LocalSet;

use crate::console::{Console, LineReader};
use crate::environment::{Env, Environment};
use crate::evaluator::{Interpreter, Node};
use crate::object::Object;
use crate::parser::parse;

pub(crate) struct Session {
    pub result: Object,
    pub output: String,
    pub env: Env,
}

impl Session {
    pub fn global(&self, name: &str) -> Option<Object> {
        self.env.borrow().get(name)
    }
}

fn block_on_local<F: Future>(future: F) -> F::Output {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build runtime");
    LocalSet::new().block_on(&runtime, future)
}

/// Runs `input` to completion, including any intervals it leaves running,
/// with `lines` as the input channel.
pub(crate) fn run(input: &str, lines: &[&str]) -> Session {
    let (program, errors) = parse(input);
    let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
    assert!(
        errors.is_empty(),
        "Input: '{}' had parse errors: {:?}",
        input,
        messages
    );

    let (console, output) = Console::captured(LineReader::scripted(lines.to_vec()));
    let interpreter = Interpreter::new(console);
    let env = Environment::new();
    let result = block_on_local(async {
        let result = interpreter.evaluate(Node::from(&program), &env).await;
        interpreter.timers().wait_idle().await;
        result
    });
    Session {
        result,
        output: output.contents(),
        env,
    }
}

pub(crate) fn eval(input: &str) -> Object {
    run(input, &[]).result
}

/// Hands a fresh interpreter and global environment to `body` on a local task set.
pub(crate) fn with_interpreter<F, Fut, T>(body: F) -> T
where
    F: FnOnce(Interpreter, Env) -> Fut,
    Fut: Future<Output = T>,
{
    let (console, _output) = Console::captured(LineReader::scripted(Vec::<String>::new()));
    block_on_local(body(Interpreter::new(console), Environment::new()))
}
