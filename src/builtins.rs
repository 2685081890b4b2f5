use std::time::Duration;

use chrono::{Datelike, Local, Timelike};
use tracing::debug;

use crate::evaluator::Interpreter;
use crate::object::Object;

const DEFAULT_PROMPT: &str = "User Input: ";

/// The fixed table of native functions visible to every program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Len,
    Time,
    Str,
    Int,
    Interval,
    ClearInterval,
    Print,
    PushArr,
    PopArr,
    Each,
    Input,
}

impl Builtin {
    pub const ALL: [Builtin; 11] = [
        Builtin::Len,
        Builtin::Time,
        Builtin::Str,
        Builtin::Int,
        Builtin::Interval,
        Builtin::ClearInterval,
        Builtin::Print,
        Builtin::PushArr,
        Builtin::PopArr,
        Builtin::Each,
        Builtin::Input,
    ];

    pub fn lookup(name: &str) -> Option<Builtin> {
        Builtin::ALL.into_iter().find(|builtin| builtin.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Len => "len",
            Builtin::Time => "time",
            Builtin::Str => "str",
            Builtin::Int => "int",
            Builtin::Interval => "interval",
            Builtin::ClearInterval => "clearInterval",
            Builtin::Print => "print",
            Builtin::PushArr => "push_arr",
            Builtin::PopArr => "pop_arr",
            Builtin::Each => "each",
            Builtin::Input => "input",
        }
    }

    /// Runs the builtin. Bad arguments come back as `Object::Error`.
    pub async fn call(self, interpreter: &Interpreter, arguments: Vec<Object>) -> Object {
        match self {
            Builtin::Len => len(&arguments),
            Builtin::Time => time(&arguments),
            Builtin::Str => stringify(&arguments),
            Builtin::Int => integer(&arguments),
            Builtin::Interval => interval(interpreter, &arguments).await,
            Builtin::ClearInterval => clear_interval(interpreter, &arguments),
            Builtin::Print => print(interpreter, &arguments),
            Builtin::PushArr => push_arr(arguments),
            Builtin::PopArr => pop_arr(&arguments),
            Builtin::Each => each(interpreter, arguments).await,
            Builtin::Input => input(interpreter, &arguments).await,
        }
    }
}

fn arity_error(got: usize, want: String) -> Object {
    Object::error(format!("wrong number of arguments. got={}, want={}", got, want))
}

fn unsupported(builtin: &str, parameter: &str, got: &Object) -> Object {
    Object::error(format!(
        "argument to {}[{}] not supported, got {}",
        builtin,
        parameter,
        got.type_tag()
    ))
}

// Checks the number of arguments
macro_rules! check_arity {
    // Variant for minimum number of args
    ($args:expr, min $expected:expr) => {
        if $args.len() < $expected {
            return arity_error($args.len(), format!(">={}", $expected));
        }
    };
    ($args:expr, $expected:expr) => {
        if $args.len() != $expected {
            return arity_error($args.len(), $expected.to_string());
        }
    };
    // Variant for range of args (inclusive)
    ($args:expr, $min:expr, $max:expr) => {
        if !($min..=$max).contains(&$args.len()) {
            let allowed: Vec<String> = ($min..=$max).map(|n: usize| n.to_string()).collect();
            return arity_error($args.len(), allowed.join(" || "));
        }
    };
}

fn len(arguments: &[Object]) -> Object {
    check_arity!(arguments, 1, 2);
    let deep = match arguments.get(1) {
        None => false,
        Some(Object::Boolean(deep)) => *deep,
        Some(other) => return unsupported("len", "deep", other),
    };
    match &arguments[0] {
        Object::String(value) => Object::Integer(value.chars().count() as i64),
        Object::Array(elements) if deep => Object::Integer(deep_len(&elements.borrow())),
        Object::Array(elements) => Object::Integer(elements.borrow().len() as i64),
        other => unsupported("len", "obj", other),
    }
}

// Element count plus the deep counts of every nested array
fn deep_len(elements: &[Object]) -> i64 {
    elements
        .iter()
        .fold(elements.len() as i64, |total, element| match element {
            Object::Array(nested) => total + deep_len(&nested.borrow()),
            _ => total,
        })
}

fn time(arguments: &[Object]) -> Object {
    check_arity!(arguments, 0, 1);
    let now = Local::now();
    let Some(unit) = arguments.first() else {
        return Object::Integer(now.timestamp_millis());
    };
    let Object::String(unit) = unit else {
        return unsupported("time", "flag", unit);
    };
    let value = match unit.as_str() {
        "year" => i64::from(now.year()),
        "month" => i64::from(now.month0()),
        "day" => i64::from(now.day()),
        "week" => i64::from(now.weekday().num_days_from_sunday()),
        "hour" => i64::from(now.hour()),
        "minute" => i64::from(now.minute()),
        "second" => i64::from(now.second()),
        other => return Object::error(format!("unknown time unit: {}", other)),
    };
    Object::Integer(value)
}

fn stringify(arguments: &[Object]) -> Object {
    check_arity!(arguments, 1);
    Object::String(arguments[0].inspect())
}

fn integer(arguments: &[Object]) -> Object {
    check_arity!(arguments, 1);
    match &arguments[0] {
        Object::Integer(value) => Object::Integer(*value),
        Object::String(text) => match parse_int_prefix(text) {
            Some(value) => Object::Integer(value),
            None => Object::error("invalid int"),
        },
        other => unsupported("int", "str", other),
    }
}

// Leading whitespace, an optional sign, then as many digits as there are.
fn parse_int_prefix(text: &str) -> Option<i64> {
    let text = text.trim_start();
    let sign_len = usize::from(text.starts_with(['+', '-']));
    let digits_len = text[sign_len..]
        .bytes()
        .take_while(u8::is_ascii_digit)
        .count();
    if digits_len == 0 {
        return None;
    }
    text[..sign_len + digits_len].parse().ok()
}

// The callback runs once right away, then every period after that.
async fn interval(interpreter: &Interpreter, arguments: &[Object]) -> Object {
    check_arity!(arguments, 1, 3);
    let function = &arguments[0];
    if !function.is_callable() {
        return unsupported("interval", "func", function);
    }
    let millis = match arguments.get(1) {
        None => 0,
        Some(Object::Integer(millis)) => *millis,
        Some(other) => return unsupported("interval", "timeout", other),
    };
    let parameters = match arguments.get(2) {
        None => Vec::new(),
        Some(Object::Array(elements)) => elements.borrow().clone(),
        Some(other) => return unsupported("interval", "params", other),
    };

    let first = interpreter
        .apply_function(function.clone(), parameters.clone())
        .await;
    if first.is_error() {
        interpreter.console().print_line(&first.inspect());
    }

    // Negative periods behave like zero
    let period = Duration::from_millis(u64::try_from(millis).unwrap_or(0));
    let id = interpreter
        .timers()
        .spawn_interval(interpreter, function.clone(), period, parameters);
    Object::Integer(id)
}

fn clear_interval(interpreter: &Interpreter, arguments: &[Object]) -> Object {
    check_arity!(arguments, 1);
    match &arguments[0] {
        Object::Integer(id) => {
            interpreter.timers().clear(*id);
            Object::Void
        }
        other => unsupported("clearInterval", "id", other),
    }
}

fn print(interpreter: &Interpreter, arguments: &[Object]) -> Object {
    let line: Vec<String> = arguments.iter().map(Object::inspect).collect();
    interpreter.console().print_line(&line.join(" "));
    Object::Void
}

fn push_arr(mut arguments: Vec<Object>) -> Object {
    check_arity!(arguments, min 2);
    let pushed = arguments.split_off(1);
    let Object::Array(elements) = &arguments[0] else {
        return unsupported("push", "arr", &arguments[0]);
    };
    elements.borrow_mut().extend(pushed.iter().cloned());
    match <[Object; 1]>::try_from(pushed) {
        Ok([single]) => single,
        Err(pushed) => Object::array(pushed),
    }
}

fn pop_arr(arguments: &[Object]) -> Object {
    check_arity!(arguments, 1);
    match &arguments[0] {
        Object::Array(elements) => elements.borrow_mut().pop().unwrap_or(Object::Null),
        other => unsupported("pop", "arr", other),
    }
}

async fn each(interpreter: &Interpreter, arguments: Vec<Object>) -> Object {
    check_arity!(arguments, 2);
    let Object::Array(array) = &arguments[0] else {
        return unsupported("each", "arr", &arguments[0]);
    };
    let function = &arguments[1];
    if !function.is_callable() {
        return unsupported("each", "func", function);
    }

    // Iterates over a snapshot; the callback may mutate the array.
    let elements = array.borrow().clone();
    for (index, element) in elements.into_iter().enumerate() {
        let result = interpreter
            .apply_function(
                function.clone(),
                vec![
                    element,
                    Object::Integer(index as i64),
                    Object::Array(array.clone()),
                ],
            )
            .await;
        if result.is_error() {
            return result;
        }
    }
    Object::Void
}

async fn input(interpreter: &Interpreter, arguments: &[Object]) -> Object {
    check_arity!(arguments, 0, 1);
    let prompt = match arguments.first() {
        Some(Object::String(prompt)) if !prompt.is_empty() => prompt.clone(),
        None | Some(Object::String(_)) => DEFAULT_PROMPT.to_string(),
        Some(other) => other.inspect(),
    };
    debug!(%prompt, "waiting for input");
    match interpreter.console().read_line(&prompt).await {
        Some(line) => Object::String(line),
        None => Object::Null,
    }
}
