pub mod ast;
pub mod builtins;
pub mod console;
pub mod environment;
pub mod evaluator;
pub mod lexer;
pub mod object;
pub mod parser;
pub mod pretty_print;
pub mod source;
pub mod timers;

#[cfg(test)]
mod test_util;

pub use builtins::Builtin;
pub use console::{Console, LineReader};
pub use environment::{Env, Environment};
pub use evaluator::{Interpreter, Node};
pub use lexer::{Lexer, Token, TokenKind, tokenize};
pub use object::Object;
pub use parser::{ParseError, Parser, parse};
pub use source::Span;

use std::sync::Once;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static TRACING_INIT: Once = Once::new();

/// Installs a stderr subscriber filtered by `RUST_LOG`. Does nothing when the
/// variable is unset, and only the first call has any effect.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let Ok(directives) = std::env::var("RUST_LOG") else {
            return;
        };
        let _ = tracing_subscriber::registry()
            .with(EnvFilter::new(directives))
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true),
            )
            .try_init();
    });
}
