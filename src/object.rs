use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::ast::{BlockStatement, FunctionLiteral, Identifier};
use crate::builtins::Builtin;
use crate::environment::{Env, Environment};

/// Runtime value produced and consumed by the evaluator.
///
/// Equality is explicit: scalars compare by value, the unit variants compare
/// equal to themselves, and arrays and functions compare by identity.
#[derive(Debug, Clone)]
pub enum Object {
    Integer(i64),
    String(String),
    Boolean(bool),
    Null,
    /// Result of evaluating something that yields no value.
    Void,
    /// Result of referencing an unbound name.
    Undefined,
    /// Carries an explicit `return` up to the enclosing call. Never reaches guest code.
    ReturnValue(Box<Object>),
    Function(Rc<Function>),
    Builtin(Builtin),
    Array(Rc<RefCell<Vec<Object>>>),
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Integer,
    String,
    Boolean,
    Null,
    Void,
    Undefined,
    ReturnValue,
    Function,
    Builtin,
    Array,
    Error,
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ObjectType::Integer => "INTEGER",
            ObjectType::String => "STRING",
            ObjectType::Boolean => "BOOLEAN",
            ObjectType::Null => "NULL",
            ObjectType::Void => "VOID",
            ObjectType::Undefined => "UNDEFINED",
            ObjectType::ReturnValue => "RETURN_VALUE",
            ObjectType::Function => "FUNCTION",
            ObjectType::Builtin => "BUILTIN",
            ObjectType::Array => "ARRAY",
            ObjectType::Error => "ERROR",
        })
    }
}

impl Object {
    pub fn type_tag(&self) -> ObjectType {
        match self {
            Object::Integer(_) => ObjectType::Integer,
            Object::String(_) => ObjectType::String,
            Object::Boolean(_) => ObjectType::Boolean,
            Object::Null => ObjectType::Null,
            Object::Void => ObjectType::Void,
            Object::Undefined => ObjectType::Undefined,
            Object::ReturnValue(_) => ObjectType::ReturnValue,
            Object::Function(_) => ObjectType::Function,
            Object::Builtin(_) => ObjectType::Builtin,
            Object::Array(_) => ObjectType::Array,
            Object::Error(_) => ObjectType::Error,
        }
    }

    /// Human readable rendering used by `print`, `str` and the REPL.
    pub fn inspect(&self) -> String {
        self.to_string()
    }

    pub fn error(message: impl Into<String>) -> Object {
        Object::Error(message.into())
    }

    pub fn array(elements: Vec<Object>) -> Object {
        Object::Array(Rc::new(RefCell::new(elements)))
    }

    pub fn string(value: impl Into<String>) -> Object {
        Object::String(value.into())
    }

    // Only `null` and `false` are falsy
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Object::Null | Object::Boolean(false))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Object::Error(_))
    }

    /// True for results that must stop the enclosing evaluation: errors and
    /// pending returns.
    pub fn is_abrupt(&self) -> bool {
        matches!(self, Object::Error(_) | Object::ReturnValue(_))
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Object::Function(_) | Object::Builtin(_))
    }

    pub fn unwrap_return(self) -> Object {
        match self {
            Object::ReturnValue(value) => *value,
            other => other,
        }
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Object::Integer(a), Object::Integer(b)) => a == b,
            (Object::String(a), Object::String(b)) => a == b,
            (Object::Boolean(a), Object::Boolean(b)) => a == b,
            (Object::Null, Object::Null)
            | (Object::Void, Object::Void)
            | (Object::Undefined, Object::Undefined) => true,
            (Object::ReturnValue(a), Object::ReturnValue(b)) => a == b,
            (Object::Function(a), Object::Function(b)) => Rc::ptr_eq(a, b),
            (Object::Builtin(a), Object::Builtin(b)) => a == b,
            (Object::Array(a), Object::Array(b)) => Rc::ptr_eq(a, b),
            (Object::Error(a), Object::Error(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Object::Integer(value) => write!(f, "{}", value),
            Object::String(value) => f.write_str(value),
            Object::Boolean(value) => write!(f, "{}", value),
            Object::Null => f.write_str("null"),
            Object::Void => f.write_str("void"),
            Object::Undefined => f.write_str("undefined"),
            Object::ReturnValue(value) => write!(f, "{}", value),
            Object::Function(function) => write!(f, "{}", function.literal),
            Object::Builtin(builtin) => write!(f, "#<builtin:{}>", builtin.name()),
            Object::Array(elements) => {
                f.write_str("[")?;
                for (i, element) in elements.borrow().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", element)?;
                }
                f.write_str("]")
            }
            Object::Error(message) => write!(f, "ERROR: {}", message),
        }
    }
}

/// A guest function closed over the environment its literal was evaluated in.
pub struct Function {
    pub literal: Rc<FunctionLiteral>,
    pub env: Env,
}

impl Function {
    pub fn new(literal: Rc<FunctionLiteral>, env: Env) -> Self {
        Function { literal, env }
    }

    pub fn parameters(&self) -> &[Identifier] {
        &self.literal.parameters
    }

    pub fn body(&self) -> &BlockStatement {
        &self.literal.body
    }

    /// Builds the call frame: parameters bound positionally, missing ones to
    /// `undefined`, extra arguments dropped.
    pub fn enclosed_env(&self, arguments: Vec<Object>) -> Env {
        let env = Environment::new_enclosed(self.env.clone());
        {
            let mut frame = env.borrow_mut();
            let mut arguments = arguments.into_iter();
            for parameter in self.parameters() {
                let value = arguments.next().unwrap_or(Object::Undefined);
                frame.set(parameter.as_str(), value);
            }
        }
        env
    }
}

// The captured environment can reach this function again, so it is left out.
impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("literal", &self.literal.to_string())
            .finish_non_exhaustive()
    }
}
