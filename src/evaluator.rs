use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use tracing::{debug, trace};

use crate::ast::{
    BlockStatement, Expression, Identifier, InfixOperator, PrefixOperator, Program, Statement,
};
use crate::builtins::Builtin;
use crate::console::Console;
use crate::environment::{Env, Environment};
use crate::object::{Function, Object};
use crate::parser::{ParseError, parse};
use crate::timers::Timers;

/// Boxed evaluation future. Boxing breaks the recursion between the
/// evaluation steps, which are all async.
pub type EvalFuture<'a> = Pin<Box<dyn Future<Output = Object> + 'a>>;

/// Guest calls that may be nested before a call fails with an error.
pub const MAX_CALL_DEPTH: usize = 20_000;

/// Minimum stack left before polling a nested step (100KB red zone).
const RED_ZONE: usize = 100 * 1024;

/// Stack allocated each time the red zone is reached (1MB).
const STACK_PER_RECURSION: usize = 1024 * 1024;

// Every nested poll of an evaluation step runs on the native stack, so deep
// guest recursion moves to a freshly grown segment instead of overflowing.
struct SufficientStack<'a>(EvalFuture<'a>);

impl Future for SufficientStack<'_> {
    type Output = Object;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Object> {
        let inner = self.0.as_mut();
        stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, || inner.poll(cx))
    }
}

fn ensure_sufficient_stack<'a>(future: impl Future<Output = Object> + 'a) -> EvalFuture<'a> {
    Box::pin(SufficientStack(Box::pin(future)))
}

// Holds one level of guest call depth. Released on drop, so a call
// abandoned midway (a cleared interval) gives its level back.
struct CallGuard(Rc<Cell<usize>>);

impl CallGuard {
    fn enter(depth: &Rc<Cell<usize>>) -> Option<CallGuard> {
        if depth.get() >= MAX_CALL_DEPTH {
            return None;
        }
        depth.set(depth.get() + 1);
        Some(CallGuard(depth.clone()))
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        self.0.set(self.0.get() - 1);
    }
}

/// Any node that can be evaluated on its own.
#[derive(Debug, Clone, Copy)]
pub enum Node<'a> {
    Program(&'a Program),
    Statement(&'a Statement),
    Block(&'a BlockStatement),
    Expression(&'a Expression),
}

impl<'a> From<&'a Program> for Node<'a> {
    fn from(program: &'a Program) -> Self {
        Node::Program(program)
    }
}

impl<'a> From<&'a Statement> for Node<'a> {
    fn from(statement: &'a Statement) -> Self {
        Node::Statement(statement)
    }
}

impl<'a> From<&'a BlockStatement> for Node<'a> {
    fn from(block: &'a BlockStatement) -> Self {
        Node::Block(block)
    }
}

impl<'a> From<&'a Expression> for Node<'a> {
    fn from(expression: &'a Expression) -> Self {
        Node::Expression(expression)
    }
}

// Returns early with errors and pending returns, otherwise yields the value.
macro_rules! propagate {
    ($value:expr) => {{
        let value = $value;
        if value.is_abrupt() {
            return value;
        }
        value
    }};
}

/// Tree walking evaluator.
///
/// Holds the host services builtins need: the console for `print` and
/// `input`, and the live set of intervals. Cloning is cheap and clones share
/// both, which is how interval callbacks call back into the same session.
///
/// Evaluation must be driven inside a [`tokio::task::LocalSet`] since
/// `interval` spawns local tasks. Call depth is counted across the whole
/// session, interval callbacks included.
#[derive(Clone)]
pub struct Interpreter {
    console: Rc<Console>,
    timers: Rc<Timers>,
    depth: Rc<Cell<usize>>,
}

impl Interpreter {
    pub fn new(console: Console) -> Self {
        Interpreter {
            console: Rc::new(console),
            timers: Rc::new(Timers::new()),
            depth: Rc::new(Cell::new(0)),
        }
    }

    pub fn stdio() -> Self {
        Interpreter::new(Console::stdio())
    }

    pub fn console(&self) -> &Console {
        &self.console
    }

    pub fn timers(&self) -> &Timers {
        &self.timers
    }

    /// Evaluates `node` against `env`. A pending `return` never escapes: the
    /// returned value is unwrapped here.
    pub async fn evaluate(&self, node: Node<'_>, env: &Env) -> Object {
        let result = match node {
            Node::Program(program) => self.eval_program(program, env).await,
            Node::Statement(statement) => self.eval_statement(statement, env).await,
            Node::Block(block) => self.eval_block(block, env).await,
            Node::Expression(expression) => self.eval_expression(expression, env).await,
        };
        result.unwrap_return()
    }

    /// Parses and evaluates `input`, refusing to evaluate when parsing failed.
    pub async fn eval_source(&self, input: &str, env: &Env) -> Result<Object, Vec<ParseError>> {
        let (program, errors) = parse(input);
        if !errors.is_empty() {
            return Err(errors);
        }
        Ok(self.evaluate(Node::from(&program), env).await)
    }

    async fn eval_program(&self, program: &Program, env: &Env) -> Object {
        let mut result = Object::Void;
        for statement in &program.statements {
            result = self.eval_statement(statement, env).await;
            if result.is_abrupt() {
                return result.unwrap_return();
            }
        }
        result
    }

    // Blocks yield `Void` unless a statement returns or fails.
    async fn eval_block(&self, block: &BlockStatement, env: &Env) -> Object {
        for statement in &block.statements {
            propagate!(self.eval_statement(statement, env).await);
        }
        Object::Void
    }

    // A function body additionally yields the value of a trailing expression
    // statement, so `fn(y) { x + y }` returns the sum.
    async fn eval_function_body(&self, body: &BlockStatement, env: &Env) -> Object {
        let mut tail = Object::Void;
        for statement in &body.statements {
            let result = self.eval_statement(statement, env).await;
            if result.is_abrupt() {
                return result.unwrap_return();
            }
            tail = match statement {
                Statement::Expression(_) => result,
                _ => Object::Void,
            };
        }
        tail
    }

    async fn eval_statement(&self, statement: &Statement, env: &Env) -> Object {
        match statement {
            Statement::Expression(expression) => self.eval_expression(expression, env).await,
            Statement::Return(expression) => {
                let value = propagate!(self.eval_expression(expression, env).await);
                Object::ReturnValue(Box::new(value))
            }
            Statement::Let { name, value } => {
                let value = propagate!(self.eval_expression(value, env).await);
                env.borrow_mut().set(name.as_str(), value)
            }
            Statement::Assign { name, value } => {
                let value = propagate!(self.eval_expression(value, env).await);
                assign(name, value, env)
            }
        }
    }

    fn eval_expression<'a>(&'a self, expression: &'a Expression, env: &'a Env) -> EvalFuture<'a> {
        ensure_sufficient_stack(async move {
            match expression {
                Expression::Identifier(identifier) => eval_identifier(identifier, env),
                Expression::Integer(value) => Object::Integer(*value),
                Expression::String(value) => Object::String(value.clone()),
                Expression::Boolean(value) => Object::Boolean(*value),
                Expression::Prefix { operator, right } => {
                    let right = propagate!(self.eval_expression(right, env).await);
                    eval_prefix(*operator, right)
                }
                Expression::Infix {
                    left,
                    operator,
                    right,
                } => {
                    let left = propagate!(self.eval_expression(left, env).await);
                    let right = propagate!(self.eval_expression(right, env).await);
                    eval_infix(*operator, left, right)
                }
                Expression::If {
                    condition,
                    consequence,
                    alternative,
                } => {
                    let condition = propagate!(self.eval_expression(condition, env).await);
                    if condition.is_truthy() {
                        self.eval_block(consequence, env).await
                    } else if let Some(alternative) = alternative {
                        self.eval_block(alternative, env).await
                    } else {
                        Object::Void
                    }
                }
                Expression::While { condition, body } => self.eval_while(condition, body, env).await,
                Expression::Function(literal) => {
                    Object::Function(Rc::new(Function::new(literal.clone(), env.clone())))
                }
                Expression::Call {
                    function,
                    arguments,
                } => {
                    let function = propagate!(self.eval_expression(function, env).await);
                    if !function.is_callable() {
                        return Object::error(format!("not a function: {}", function.type_tag()));
                    }
                    match self.eval_expressions(arguments, env).await {
                        Ok(arguments) => self.apply_function(function, arguments).await,
                        Err(abrupt) => abrupt,
                    }
                }
                Expression::Array(elements) => match self.eval_expressions(elements, env).await {
                    Ok(elements) => Object::array(elements),
                    Err(abrupt) => abrupt,
                },
                Expression::Index { left, index } => {
                    let left = propagate!(self.eval_expression(left, env).await);
                    let index = propagate!(self.eval_expression(index, env).await);
                    eval_index(left, index)
                }
            }
        })
    }

    // Left to right; stops at the first error.
    async fn eval_expressions(
        &self,
        expressions: &[Expression],
        env: &Env,
    ) -> Result<Vec<Object>, Object> {
        let mut values = Vec::with_capacity(expressions.len());
        for expression in expressions {
            let value = self.eval_expression(expression, env).await;
            if value.is_abrupt() {
                return Err(value);
            }
            values.push(value);
        }
        Ok(values)
    }

    async fn eval_while(&self, condition: &Expression, body: &BlockStatement, env: &Env) -> Object {
        loop {
            let test = propagate!(self.eval_expression(condition, env).await);
            if !test.is_truthy() {
                return Object::Void;
            }
            // A `return` in the body stays wrapped so it leaves the enclosing function
            propagate!(self.eval_block(body, env).await);
            // Let intervals and pending input run between iterations
            tokio::task::yield_now().await;
        }
    }

    /// Calls a guest function or builtin with already evaluated arguments.
    ///
    /// Guest functions nested deeper than [`MAX_CALL_DEPTH`] fail with
    /// `maximum call depth exceeded`.
    pub fn apply_function(&self, function: Object, arguments: Vec<Object>) -> EvalFuture<'_> {
        ensure_sufficient_stack(async move {
            match function {
                Object::Function(function) => {
                    let Some(_guard) = CallGuard::enter(&self.depth) else {
                        debug!(limit = MAX_CALL_DEPTH, "call depth exceeded");
                        return Object::error("maximum call depth exceeded");
                    };
                    trace!(arguments = arguments.len(), "applying function");
                    let env = function.enclosed_env(arguments);
                    self.eval_function_body(function.body(), &env).await
                }
                Object::Builtin(builtin) => {
                    trace!(builtin = builtin.name(), "applying builtin");
                    builtin.call(self, arguments).await
                }
                other => Object::error(format!("not a function: {}", other.type_tag())),
            }
        })
    }
}

// Unbound names fall back to the builtins, then to `undefined`.
fn eval_identifier(identifier: &Identifier, env: &Env) -> Object {
    let bound = env.borrow().get(identifier.as_str());
    bound
        .or_else(|| Builtin::lookup(identifier.as_str()).map(Object::Builtin))
        .unwrap_or(Object::Undefined)
}

fn assign(name: &Identifier, value: Object, env: &Env) -> Object {
    let rebound = env.borrow_mut().assign(name.as_str(), value.clone());
    if rebound {
        return value;
    }
    debug!(
        name = name.as_str(),
        "assignment to an undeclared name binds it globally"
    );
    Environment::global(env)
        .borrow_mut()
        .set(name.as_str(), value)
}

fn eval_prefix(operator: PrefixOperator, right: Object) -> Object {
    match operator {
        PrefixOperator::Bang => Object::Boolean(!right.is_truthy()),
        PrefixOperator::Minus => match right {
            Object::Integer(value) => Object::Integer(value.wrapping_neg()),
            other => Object::error(format!("unknown operator: -{}", other.type_tag())),
        },
    }
}

fn eval_infix(operator: InfixOperator, left: Object, right: Object) -> Object {
    match (&left, &right) {
        (Object::Integer(l), Object::Integer(r)) => eval_integer_infix(operator, *l, *r),
        (Object::String(l), Object::String(r)) => eval_string_infix(operator, l, r),
        _ if left.type_tag() != right.type_tag() => Object::error(format!(
            "type mismatch: {} {} {}",
            left.type_tag(),
            operator,
            right.type_tag()
        )),
        _ => match operator {
            InfixOperator::Eq => Object::Boolean(left == right),
            InfixOperator::NotEq => Object::Boolean(left != right),
            _ => unknown_operator(&left, operator, &right),
        },
    }
}

// Arithmetic wraps on overflow, division truncates toward zero.
fn eval_integer_infix(operator: InfixOperator, left: i64, right: i64) -> Object {
    match operator {
        InfixOperator::Plus => Object::Integer(left.wrapping_add(right)),
        InfixOperator::Minus => Object::Integer(left.wrapping_sub(right)),
        InfixOperator::Asterisk => Object::Integer(left.wrapping_mul(right)),
        InfixOperator::Slash if right == 0 => Object::error("division by zero"),
        InfixOperator::Slash => Object::Integer(left.wrapping_div(right)),
        InfixOperator::Lt => Object::Boolean(left < right),
        InfixOperator::Gt => Object::Boolean(left > right),
        InfixOperator::Eq => Object::Boolean(left == right),
        InfixOperator::NotEq => Object::Boolean(left != right),
    }
}

fn eval_string_infix(operator: InfixOperator, left: &str, right: &str) -> Object {
    match operator {
        InfixOperator::Plus => Object::String(format!("{}{}", left, right)),
        InfixOperator::Eq => Object::Boolean(left == right),
        InfixOperator::NotEq => Object::Boolean(left != right),
        _ => Object::error(format!("unknown operator: STRING {} STRING", operator)),
    }
}

fn unknown_operator(left: &Object, operator: InfixOperator, right: &Object) -> Object {
    Object::error(format!(
        "unknown operator: {} {} {}",
        left.type_tag(),
        operator,
        right.type_tag()
    ))
}

fn eval_index(left: Object, index: Object) -> Object {
    match (&left, &index) {
        (Object::Array(elements), Object::Integer(index)) => usize::try_from(*index)
            .ok()
            .and_then(|index| elements.borrow().get(index).cloned())
            .unwrap_or(Object::Null),
        _ => Object::error(format!(
            "index operator not supported: {}",
            left.type_tag()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{eval, run};
    use pretty_assertions::assert_eq;

    fn int(value: i64) -> Object {
        Object::Integer(value)
    }

    fn error(message: &str) -> Object {
        Object::error(message)
    }

    #[test]
    fn test_integer_literals() {
        for n in [0, 5, 10, 123_456_789, i64::MAX] {
            assert_eq!(eval(&n.to_string()), int(n));
        }
    }

    #[test]
    fn test_integer_arithmetic() {
        let cases = [
            ("5 + 5 + 5 + 5 - 10", 10),
            ("2 * 2 * 2 * 2 * 2", 32),
            ("-50 + 100 + -50", 0),
            ("5 * 2 + 10", 20),
            ("5 + 2 * 10", 25),
            ("50 / 2 * 2 + 10", 60),
            ("2 * (5 + 10)", 30),
            ("3 * (3 * 3) + 10", 37),
            ("(5 + 10 * 2 + 15 / 3) * 2 + -10", 50),
            ("7 / 2", 3),
            ("-7 / 2", -3),
            ("--5", 5),
        ];
        for (input, expected) in cases {
            assert_eq!(eval(input), int(expected), "Input: '{}'", input);
        }
        assert_eq!(eval("9223372036854775807 + 1"), int(i64::MIN));
        assert_eq!(eval("1 / 0"), error("division by zero"));
    }

    #[test]
    fn test_boolean_expressions() {
        let cases = [
            ("true", true),
            ("1 < 2", true),
            ("1 > 2", false),
            ("1 == 1", true),
            ("1 != 1", false),
            ("true == true", true),
            ("true != false", true),
            ("(1 < 2) == true", true),
            ("(1 > 2) == true", false),
            (r#""a" == "a""#, true),
            (r#""a" != "b""#, true),
        ];
        for (input, expected) in cases {
            assert_eq!(eval(input), Object::Boolean(expected), "Input: '{}'", input);
        }
    }

    #[test]
    fn test_bang_operator() {
        let cases = [
            ("!true", false),
            ("!false", true),
            ("!5", false),
            ("!!true", true),
            ("!!5", true),
            ("!\"\"", false),
            ("![]", false),
            ("!missing", false),
            ("!pop_arr([])", true),
        ];
        for (input, expected) in cases {
            assert_eq!(eval(input), Object::Boolean(expected), "Input: '{}'", input);
        }
    }

    #[test]
    fn test_strings() {
        assert_eq!(eval(r#""Hello" + " " + "World!""#), Object::string("Hello World!"));
        assert_eq!(
            eval(r#""a" - "b""#),
            error("unknown operator: STRING - STRING")
        );
    }

    #[test]
    fn test_identity_equality() {
        assert_eq!(eval("let a = [1]; a == a"), Object::Boolean(true));
        assert_eq!(eval("[1] == [1]"), Object::Boolean(false));
        assert_eq!(eval("let f = fn() {}; f == f"), Object::Boolean(true));
        assert_eq!(eval("fn() {} != fn() {}"), Object::Boolean(true));
        assert_eq!(eval("len == len"), Object::Boolean(true));
        assert_eq!(eval("missing == undefinedToo"), Object::Boolean(true));
    }

    #[test]
    fn test_error_messages() {
        let cases = [
            ("5 + true;", "type mismatch: INTEGER + BOOLEAN"),
            ("5 + true; 5;", "type mismatch: INTEGER + BOOLEAN"),
            (r#""5" + 5"#, "type mismatch: STRING + INTEGER"),
            ("-true", "unknown operator: -BOOLEAN"),
            ("true + false;", "unknown operator: BOOLEAN + BOOLEAN"),
            ("5; true + false; 5", "unknown operator: BOOLEAN + BOOLEAN"),
            ("[1] < [2]", "unknown operator: ARRAY < ARRAY"),
            (
                "if (10 > 1) { true + false; }",
                "unknown operator: BOOLEAN + BOOLEAN",
            ),
            (
                "if (10 > 1) { if (10 > 1) { return true + false; } return 1; }",
                "unknown operator: BOOLEAN + BOOLEAN",
            ),
            ("let f = 1; f(2)", "not a function: INTEGER"),
            ("1[0]", "index operator not supported: INTEGER"),
            (r#"[1]["0"]"#, "index operator not supported: ARRAY"),
            ("len == fn() {}", "type mismatch: BUILTIN == FUNCTION"),
        ];
        for (input, expected) in cases {
            assert_eq!(eval(input), error(expected), "Input: '{}'", input);
        }
    }

    #[test]
    fn test_errors_short_circuit() {
        // Neither the second argument nor the call happen
        let session = run(r#"let f = fn(a, b) { print("called") }; f(1 + true, print("arg"))"#, &[]);
        assert_eq!(session.result, error("type mismatch: INTEGER + BOOLEAN"));
        assert_eq!(session.output, "");

        // Arguments are not evaluated for a non-callable
        let session = run(r#"5(print("arg"))"#, &[]);
        assert_eq!(session.result, error("not a function: INTEGER"));
        assert_eq!(session.output, "");

        assert_eq!(eval("[1, -true, 3]"), error("unknown operator: -BOOLEAN"));
        assert_eq!(eval("let x = -true; 5"), error("unknown operator: -BOOLEAN"));
        assert_eq!(eval("let i = 0; while (i < -true) { }"), error("unknown operator: -BOOLEAN"));
    }

    #[test]
    fn test_evaluation_order() {
        let session = run(r#"[print("a"), print("b")]; str(print("c"))"#, &[]);
        assert_eq!(session.output, "a\nb\nc\n");
    }

    #[test]
    fn test_if_expressions() {
        assert_eq!(eval("if (true) { 10 }"), Object::Void);
        assert_eq!(eval("if (false) { 10 }"), Object::Void);
        assert_eq!(eval("let x = 0; if (1) { x = 10 }; x"), int(10));
        assert_eq!(eval("let x = 0; if (1 > 2) { x = 10 } else { x = 20 }; x"), int(20));
        assert_eq!(eval("let x = 0; if (pop_arr([])) { x = 1 } else { x = 2 }; x"), int(2));
        assert_eq!(eval("let x = 0; if (0) { x = 1 }; x"), int(1));
    }

    #[test]
    fn test_return_statements() {
        let cases = [
            ("return 10;", 10),
            ("return 10; 9;", 10),
            ("return 2 * 5; 9;", 10),
            ("9; return 2 * 5; 9;", 10),
            ("if (10 > 1) { if (10 > 1) { return 10; } return 1; }", 10),
            ("fn(a){ return a + 1; }(4)", 5),
        ];
        for (input, expected) in cases {
            assert_eq!(eval(input), int(expected), "Input: '{}'", input);
        }
    }

    #[test]
    fn test_let_and_assign() {
        assert_eq!(eval("let x = 5; x;"), int(5));
        assert_eq!(eval("let x = 5; x = 7; x;"), int(7));
        assert_eq!(eval("let a = 5; let b = a; let c = a + b + 5; c;"), int(15));
        assert_eq!(eval("let x = 1; let x = 2; x"), int(2));
        // Both statements yield the bound value
        assert_eq!(eval("let x = 5"), int(5));
        assert_eq!(eval("let x = 5; x = 6"), int(6));
    }

    #[test]
    fn test_assignment_scoping() {
        // Undeclared names leak into the global scope
        assert_eq!(eval("let f = fn(){ y = 3; }; f(); y;"), int(3));
        let session = run("let f = fn() { let g = fn() { deep = 1 }; g() }; f()", &[]);
        assert_eq!(session.global("deep"), Some(int(1)));

        // Existing bindings are rebound where they live
        assert_eq!(
            eval("let x = 1; let f = fn() { x = 2 }; f(); x"),
            int(2)
        );
        assert_eq!(
            eval("let x = 1; let f = fn() { let x = 5; x = 6; x }; [f(), x]").inspect(),
            "[6, 1]"
        );
        // Parameters are call frame bindings
        assert_eq!(eval("let x = 1; let f = fn(x) { x = 9 }; f(2); x"), int(1));
    }

    #[test]
    fn test_unbound_identifiers() {
        assert_eq!(eval("foobar"), Object::Undefined);
        assert_eq!(eval("len"), Object::Builtin(Builtin::Len));
        // Bindings shadow builtins
        assert_eq!(eval("let len = 3; len"), int(3));
    }

    #[test]
    fn test_functions() {
        let Object::Function(function) = eval("fn(x) { x + 2; };") else {
            panic!("expected a function");
        };
        assert_eq!(function.parameters().len(), 1);
        assert_eq!(function.body().to_string(), "{ (x + 2) }");

        let cases = [
            ("let identity = fn(x) { x; }; identity(5);", 5),
            ("let identity = fn(x) { return x; }; identity(5);", 5),
            ("let double = fn(x) { x * 2; }; double(5);", 10),
            ("let add = fn(x, y) { x + y; }; add(5, 5);", 10),
            ("let add = fn(x, y) { x + y; }; add(5 + 5, add(5, 5));", 20),
            ("fn(x) { x; }(5)", 5),
            (
                "let fib = fn(n) { if (n < 2) { return n } return fib(n - 1) + fib(n - 2) }; fib(15)",
                610,
            ),
        ];
        for (input, expected) in cases {
            assert_eq!(eval(input), int(expected), "Input: '{}'", input);
        }
        assert_eq!(eval("fn() { let x = 1; }()"), Object::Void);
        assert_eq!(eval("fn() { }()"), Object::Void);
        assert_eq!(eval("fn(a, b) { b }(1)"), Object::Undefined);
        assert_eq!(eval("fn(a) { a }(1, 2, 3)"), int(1));
    }

    #[test]
    fn test_deep_recursion() {
        assert_eq!(
            eval("let f = fn(n) { if (n == 0) { return 0 } return f(n - 1) }; f(1000)"),
            int(0)
        );
        assert_eq!(
            eval(
                "let count = fn(n) { if (n == 0) { return 0 } return 1 + count(n - 1) }; \
                 count(10000)"
            ),
            int(10000)
        );
    }

    #[test]
    fn test_runaway_recursion_is_an_error() {
        let (first, second) = crate::test_util::with_interpreter(|interpreter, env| async move {
            let first = interpreter
                .eval_source("let f = fn(n) { f(n + 1) }; f(0)", &env)
                .await;
            // Every level is given back once the error unwinds
            let second = interpreter
                .eval_source(
                    "let g = fn(n) { if (n == 0) { return 7 } return g(n - 1) }; g(100)",
                    &env,
                )
                .await;
            (first, second)
        });
        assert_eq!(first, Ok(error("maximum call depth exceeded")));
        assert_eq!(second, Ok(int(7)));
    }

    #[test]
    fn test_closures() {
        assert_eq!(
            eval("let make = fn(x){ fn(y){ x + y } }; let add5 = make(5); add5(3);"),
            int(8)
        );
        // The captured environment is live, not a snapshot
        assert_eq!(
            eval("let n = 1; let get = fn() { n }; n = 2; get()"),
            int(2)
        );
        assert_eq!(eval("let get = fn() { later }; let later = 4; get()"), int(4));
        assert_eq!(
            eval(
                "let counter = fn() { let c = 0; fn() { c = c + 1; c } }; \
                 let next = counter(); next(); next(); next()"
            ),
            int(3)
        );
    }

    #[test]
    fn test_while() {
        assert_eq!(
            eval("let i = 0; let sum = 0; while (i < 5) { i = i + 1; sum = sum + i; }; sum"),
            int(15)
        );
        assert_eq!(eval("while (false) { 1 }"), Object::Void);
        assert_eq!(eval("let i = 0; while (i < 3) { i = i + 1 }"), Object::Void);
        assert_eq!(
            eval("fn(){ while(true){ return 1; } return 2; }()"),
            int(1)
        );
        assert_eq!(eval("while (true) { return 7 }; 8"), int(7));
        assert_eq!(
            eval("let i = 0; while (true) { i = i + 1; if (i == 3) { return i } }"),
            int(3)
        );
    }

    #[test]
    fn test_while_yields_to_intervals() {
        let session = run(
            "let ticks = 0; \
             let id = interval(fn() { ticks = ticks + 1 }, 1); \
             while (ticks < 3) { }; \
             clearInterval(id); \
             ticks",
            &[],
        );
        assert!(matches!(session.result, Object::Integer(ticks) if ticks >= 3));
    }

    #[test]
    fn test_arrays_and_indexing() {
        assert_eq!(eval("[1, 2 * 2, 3 + 3]").inspect(), "[1, 4, 6]");
        let cases = [
            ("[1, 2, 3][0]", 1),
            ("[1, 2, 3][2]", 3),
            ("let i = 0; [1][i];", 1),
            ("[1, 2, 3][1 + 1];", 3),
            ("let a = [1, 2, 3]; a[0] + a[1] + a[2];", 6),
            ("[[1, 2], [3]][1][0]", 3),
        ];
        for (input, expected) in cases {
            assert_eq!(eval(input), int(expected), "Input: '{}'", input);
        }
        assert_eq!(eval("let a = [1, 2]; a[5];"), Object::Null);
        assert_eq!(eval("[1, 2, 3][-1]"), Object::Null);
        assert_eq!(eval("[][0]"), Object::Null);
    }

    #[test]
    fn test_arrays_are_shared() {
        assert_eq!(
            eval("let a = [1]; let b = a; push_arr(b, 2); a").inspect(),
            "[1, 2]"
        );
        assert_eq!(
            eval("let a = []; let f = fn(arr) { push_arr(arr, 1) }; f(a); f(a); len(a)"),
            int(2)
        );
    }

    #[test]
    fn test_evaluate_single_nodes() {
        let (program, errors) = parse("let x = 4; return x * 2;");
        assert!(errors.is_empty());
        let session = crate::test_util::with_interpreter(|interpreter, env| async move {
            let first = interpreter.evaluate(Node::from(&program.statements[0]), &env).await;
            let second = interpreter.evaluate(Node::from(&program.statements[1]), &env).await;
            (first, second)
        });
        // A lone return statement is unwrapped at the boundary
        assert_eq!(session, (int(4), int(8)));
    }

    #[test]
    fn test_eval_source_refuses_bad_programs() {
        let result = crate::test_util::with_interpreter(|interpreter, env| async move {
            interpreter.eval_source("let x = (1 + 2", &env).await
        });
        let errors = result.expect_err("parse should fail");
        assert_eq!(
            errors[0].to_string(),
            "expected next token to be ), got EOF instead"
        );
    }

    #[test]
    fn test_display_round_trip_evaluates_the_same() {
        let inputs = [
            "1 + 2 * 3 - -4 / 2",
            "[1, 2, 3][1] * 10",
            "if (1 < 2) { 10 } else { 20 } == if (2 < 1) { 30 }",
            "fn(a, b) { return a * b }(6, 7)",
            "len(\"four\") + len([1, [2, 3]], true)",
            "!(1 == 1) != !true",
        ];
        for input in inputs {
            let (program, errors) = parse(input);
            assert!(errors.is_empty(), "Input: '{}'", input);
            let rendered = program.to_string();
            assert_eq!(eval(&rendered), eval(input), "Input: '{}' rendered '{}'", input, rendered);
        }
    }
}
