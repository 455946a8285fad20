//! Tree-walking evaluator.
//!
//! Walks statements and expressions depth-first, threading a current
//! environment through the scope chain.  Each interpreter owns its globals
//! (with `clock` pre-defined), consumes the resolver's binding-distance
//! table for local lookups, and writes `print` output to a caller-supplied
//! sink so tests can capture it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;
use std::sync::OnceLock;
use std::time::Instant;

use log::{debug, info};

use crate::ast::{Expr, FunctionDecl, Literal, NodeId, Stmt, Variable};
use crate::environment::Environment;
use crate::error::{LoxError, Result};
use crate::token::{Token, TokenType};
use crate::value::{LoxClass, LoxFunction, LoxInstance, NativeFunction, Value};

/// Out-of-band signal that aborts the current statement walk: either an
/// in-flight `return` looking for its function-call frame, or a runtime
/// error aborting the run.
#[derive(Debug)]
pub enum Unwind {
    Return(Value),
    Error(LoxError),
}

impl From<LoxError> for Unwind {
    fn from(e: LoxError) -> Self {
        Unwind::Error(e)
    }
}

pub struct Interpreter<'o, W: Write> {
    globals: Rc<RefCell<Environment>>,
    environment: Rc<RefCell<Environment>>,
    locals: HashMap<NodeId, usize>,
    output: &'o mut W,
}

impl<'o, W: Write> Interpreter<'o, W> {
    pub fn new(output: &'o mut W) -> Self {
        let globals = Rc::new(RefCell::new(Environment::new()));

        globals.borrow_mut().define(
            "clock",
            Value::Native(Rc::new(NativeFunction {
                name: "clock".to_string(),
                arity: 0,
                func: clock_native,
            })),
        );

        info!("Interpreter initialized, clock defined");

        Interpreter {
            environment: globals.clone(),
            globals,
            locals: HashMap::new(),
            output,
        }
    }

    /// Merge a resolver-produced binding-distance table.  Node ids are
    /// globally unique, so tables from successive REPL lines never collide.
    pub fn note_locals(&mut self, locals: HashMap<NodeId, usize>) {
        debug!("Noting {} local binding(s)", locals.len());

        self.locals.extend(locals);
    }

    /// The `print` sink, exposed so the REPL can share it for its prompt.
    pub fn output_mut(&mut self) -> &mut W {
        self.output
    }

    /// Execute a resolved program.  Stops at the first runtime error.
    pub fn interpret(&mut self, statements: &[Stmt]) -> Result<()> {
        for stmt in statements {
            match self.execute(stmt) {
                Ok(()) => {}

                // The resolver rejects top-level returns; nothing to unwind
                // into, so simply stop.
                Err(Unwind::Return(_)) => break,

                Err(Unwind::Error(e)) => return Err(e),
            }
        }

        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Statements
    // ─────────────────────────────────────────────────────────────────────

    fn execute(&mut self, stmt: &Stmt) -> std::result::Result<(), Unwind> {
        match stmt {
            Stmt::Expression(expr) => {
                self.evaluate(expr)?;

                Ok(())
            }

            Stmt::Print(expr) => {
                let value = self.evaluate(expr)?;

                writeln!(self.output, "{}", value).map_err(LoxError::from)?;

                Ok(())
            }

            Stmt::Var { name, initializer } => {
                let value: Value = match initializer {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Nil,
                };

                self.environment.borrow_mut().define(&name.lexeme, value);

                Ok(())
            }

            Stmt::Block(statements) => {
                let env = Environment::with_enclosing(self.environment.clone());

                self.execute_block(statements, Rc::new(RefCell::new(env)))
            }

            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if is_truthy(&self.evaluate(condition)?) {
                    self.execute(then_branch)?;
                } else if let Some(else_branch) = else_branch {
                    self.execute(else_branch)?;
                }

                Ok(())
            }

            Stmt::While { condition, body } => {
                while is_truthy(&self.evaluate(condition)?) {
                    self.execute(body)?;
                }

                Ok(())
            }

            Stmt::Function(declaration) => {
                let function = LoxFunction::new(
                    declaration.clone(),
                    self.environment.clone(),
                    false,
                );

                self.environment
                    .borrow_mut()
                    .define(&declaration.name.lexeme, Value::Function(Rc::new(function)));

                Ok(())
            }

            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Nil,
                };

                Err(Unwind::Return(value))
            }

            Stmt::Class {
                name,
                superclass,
                methods,
            } => self.execute_class(name, superclass.as_ref(), methods),
        }
    }

    fn execute_class(
        &mut self,
        name: &Token,
        superclass: Option<&Variable>,
        methods: &[Rc<FunctionDecl>],
    ) -> std::result::Result<(), Unwind> {
        debug!("Declaring class {}", name.lexeme);

        let superclass_value: Option<Rc<LoxClass>> = match superclass {
            Some(var) => {
                let value = self.look_up_variable(var.id, &var.name)?;

                match value {
                    Value::Class(class) => Some(class),

                    _ => {
                        return Err(LoxError::runtime(
                            var.name.line,
                            "Superclass must be a class.",
                        )
                        .into())
                    }
                }
            }

            None => None,
        };

        // Two-phase definition lets methods close over the class name.
        self.environment
            .borrow_mut()
            .define(&name.lexeme, Value::Nil);

        // Methods of a subclass capture an extra environment binding `super`.
        let method_env: Rc<RefCell<Environment>> = match &superclass_value {
            Some(superclass) => {
                let mut env = Environment::with_enclosing(self.environment.clone());

                env.define("super", Value::Class(superclass.clone()));

                Rc::new(RefCell::new(env))
            }

            None => self.environment.clone(),
        };

        let mut class_methods: HashMap<String, Rc<LoxFunction>> = HashMap::new();

        for method in methods {
            let function = LoxFunction::new(
                method.clone(),
                method_env.clone(),
                method.name.lexeme == "init",
            );

            class_methods.insert(method.name.lexeme.clone(), Rc::new(function));
        }

        let class = LoxClass {
            name: name.lexeme.clone(),
            superclass: superclass_value,
            methods: class_methods,
        };

        self.environment
            .borrow_mut()
            .assign(&name.lexeme, Value::Class(Rc::new(class)), name.line)?;

        Ok(())
    }

    /// Run `statements` with `environment` as the current scope, restoring
    /// the previous scope on every exit, including unwinds.
    fn execute_block(
        &mut self,
        statements: &[Stmt],
        environment: Rc<RefCell<Environment>>,
    ) -> std::result::Result<(), Unwind> {
        let previous = std::mem::replace(&mut self.environment, environment);

        let result = statements.iter().try_for_each(|stmt| self.execute(stmt));

        self.environment = previous;

        result
    }

    // ─────────────────────────────────────────────────────────────────────
    // Expressions
    // ─────────────────────────────────────────────────────────────────────

    fn evaluate(&mut self, expr: &Expr) -> std::result::Result<Value, Unwind> {
        match expr {
            Expr::Literal(literal) => Ok(match literal {
                Literal::Number(n) => Value::Number(*n),
                Literal::Str(s) => Value::String(s.clone()),
                Literal::True => Value::Bool(true),
                Literal::False => Value::Bool(false),
                Literal::Nil => Value::Nil,
            }),

            Expr::Grouping(inner) => self.evaluate(inner),

            Expr::Unary { operator, right } => {
                let value = self.evaluate(right)?;

                match operator.token_type {
                    TokenType::MINUS => match value {
                        Value::Number(n) => Ok(Value::Number(-n)),

                        _ => Err(LoxError::runtime(
                            operator.line,
                            "Operand must be a number.",
                        )
                        .into()),
                    },

                    _ => Ok(Value::Bool(!is_truthy(&value))),
                }
            }

            Expr::Binary {
                left,
                operator,
                right,
            } => {
                let left = self.evaluate(left)?;
                let right = self.evaluate(right)?;

                self.evaluate_binary(&left, operator, &right)
                    .map_err(Unwind::from)
            }

            Expr::Logical {
                left,
                operator,
                right,
            } => {
                let left = self.evaluate(left)?;

                // Short-circuit: hand back the deciding operand itself, not a
                // coerced boolean.
                let short_circuits = if operator.token_type == TokenType::OR {
                    is_truthy(&left)
                } else {
                    !is_truthy(&left)
                };

                if short_circuits {
                    Ok(left)
                } else {
                    self.evaluate(right)
                }
            }

            Expr::Variable(var) => Ok(self.look_up_variable(var.id, &var.name)?),

            Expr::Assign { id, name, value } => {
                let value = self.evaluate(value)?;

                match self.locals.get(id) {
                    Some(&distance) => Environment::assign_at(
                        &self.environment,
                        distance,
                        &name.lexeme,
                        value.clone(),
                        name.line,
                    )?,

                    None => self.globals.borrow_mut().assign(
                        &name.lexeme,
                        value.clone(),
                        name.line,
                    )?,
                }

                Ok(value)
            }

            Expr::Call {
                callee,
                paren,
                arguments,
            } => {
                let callee = self.evaluate(callee)?;

                let mut args: Vec<Value> = Vec::with_capacity(arguments.len());

                for arg in arguments {
                    args.push(self.evaluate(arg)?);
                }

                self.call(callee, args, paren)
            }

            Expr::Get { object, name } => {
                let object = self.evaluate(object)?;

                match object {
                    Value::Instance(instance) => Ok(LoxInstance::get(&instance, name)?),

                    _ => Err(LoxError::runtime(
                        name.line,
                        "Only instances have properties.",
                    )
                    .into()),
                }
            }

            Expr::Set {
                object,
                name,
                value,
            } => {
                let object = self.evaluate(object)?;

                match object {
                    Value::Instance(instance) => {
                        let value = self.evaluate(value)?;

                        instance.borrow_mut().set(name, value.clone());

                        Ok(value)
                    }

                    _ => Err(LoxError::runtime(name.line, "Only instances have fields.").into()),
                }
            }

            Expr::This { id, keyword } => Ok(self.look_up_variable(*id, keyword)?),

            Expr::Super {
                id,
                keyword,
                method,
            } => self.evaluate_super(*id, keyword, method),
        }
    }

    fn evaluate_binary(
        &mut self,
        left: &Value,
        operator: &Token,
        right: &Value,
    ) -> Result<Value> {
        match operator.token_type {
            TokenType::PLUS => match (left, right) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),

                (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{}{}", a, b))),

                _ => Err(LoxError::runtime(
                    operator.line,
                    "Operands must be two numbers or two strings.",
                )),
            },

            TokenType::MINUS => {
                let (a, b) = number_operands(operator, left, right)?;

                Ok(Value::Number(a - b))
            }

            TokenType::STAR => {
                let (a, b) = number_operands(operator, left, right)?;

                Ok(Value::Number(a * b))
            }

            // Division by zero follows IEEE: ±inf or NaN, never an error.
            TokenType::SLASH => {
                let (a, b) = number_operands(operator, left, right)?;

                Ok(Value::Number(a / b))
            }

            TokenType::GREATER => {
                let (a, b) = number_operands(operator, left, right)?;

                Ok(Value::Bool(a > b))
            }

            TokenType::GREATER_EQUAL => {
                let (a, b) = number_operands(operator, left, right)?;

                Ok(Value::Bool(a >= b))
            }

            TokenType::LESS => {
                let (a, b) = number_operands(operator, left, right)?;

                Ok(Value::Bool(a < b))
            }

            TokenType::LESS_EQUAL => {
                let (a, b) = number_operands(operator, left, right)?;

                Ok(Value::Bool(a <= b))
            }

            TokenType::EQUAL_EQUAL => Ok(Value::Bool(left == right)),

            TokenType::BANG_EQUAL => Ok(Value::Bool(left != right)),

            _ => Err(LoxError::runtime(
                operator.line,
                format!("Invalid binary operator '{}'.", operator.lexeme),
            )),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Calls
    // ─────────────────────────────────────────────────────────────────────

    fn call(
        &mut self,
        callee: Value,
        args: Vec<Value>,
        paren: &Token,
    ) -> std::result::Result<Value, Unwind> {
        match callee {
            Value::Function(function) => {
                self.check_arity(function.arity(), args.len(), paren)?;

                self.call_function(&function, args)
            }

            Value::Native(native) => {
                self.check_arity(native.arity, args.len(), paren)?;

                debug!("Calling native fn {}", native.name);

                Ok((native.func)(&args)?)
            }

            Value::Class(class) => {
                self.check_arity(class.arity(), args.len(), paren)?;

                debug!("Constructing instance of {}", class.name);

                let instance = Rc::new(RefCell::new(LoxInstance::new(class.clone())));

                if let Some(init) = class.find_method("init") {
                    let bound = init.bind(instance.clone());

                    self.call_function(&bound, args)?;
                }

                Ok(Value::Instance(instance))
            }

            _ => Err(LoxError::runtime(paren.line, "Can only call functions and classes.").into()),
        }
    }

    fn check_arity(
        &self,
        expected: usize,
        got: usize,
        paren: &Token,
    ) -> std::result::Result<(), Unwind> {
        if expected == got {
            Ok(())
        } else {
            Err(LoxError::runtime(
                paren.line,
                format!("Expected {} arguments but got {}.", expected, got),
            )
            .into())
        }
    }

    /// Invoke a user function: bind parameters in a fresh child of the
    /// closure environment, run the body, and turn an unwinding `return`
    /// into the call's result.  Initializers always yield their `this`.
    fn call_function(
        &mut self,
        function: &LoxFunction,
        args: Vec<Value>,
    ) -> std::result::Result<Value, Unwind> {
        debug!("Calling fn {}", function.declaration.name.lexeme);

        let mut env = Environment::with_enclosing(function.closure.clone());

        for (param, arg) in function.declaration.params.iter().zip(args) {
            env.define(&param.lexeme, arg);
        }

        let result = self.execute_block(&function.declaration.body, Rc::new(RefCell::new(env)));

        let returned = match result {
            Ok(()) => Value::Nil,
            Err(Unwind::Return(value)) => value,
            Err(e) => return Err(e),
        };

        if function.is_initializer {
            Ok(Environment::get_at(
                &function.closure,
                0,
                "this",
                function.declaration.name.line,
            )?)
        } else {
            Ok(returned)
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Variable lookup
    // ─────────────────────────────────────────────────────────────────────

    fn look_up_variable(&self, id: NodeId, name: &Token) -> Result<Value> {
        match self.locals.get(&id) {
            Some(&distance) => {
                Environment::get_at(&self.environment, distance, &name.lexeme, name.line)
            }

            None => self.globals.borrow().get(&name.lexeme, name.line),
        }
    }

    /// `super` lives at its resolved distance; the receiver sits one frame
    /// below, inside the method binding.
    fn evaluate_super(
        &mut self,
        id: NodeId,
        keyword: &Token,
        method: &Token,
    ) -> std::result::Result<Value, Unwind> {
        let distance = *self.locals.get(&id).ok_or_else(|| {
            LoxError::runtime(keyword.line, "Can't use 'super' outside of a class.")
        })?;

        let superclass = Environment::get_at(&self.environment, distance, "super", keyword.line)?;

        let receiver =
            Environment::get_at(&self.environment, distance - 1, "this", keyword.line)?;

        let (superclass, receiver) = match (superclass, receiver) {
            (Value::Class(class), Value::Instance(instance)) => (class, instance),

            _ => {
                return Err(
                    LoxError::runtime(keyword.line, "Malformed superclass binding.").into(),
                )
            }
        };

        match superclass.find_method(&method.lexeme) {
            Some(found) => Ok(Value::Function(Rc::new(found.bind(receiver)))),

            None => Err(LoxError::runtime(
                method.line,
                format!("Undefined property '{}'.", method.lexeme),
            )
            .into()),
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Nil => false,

        Value::Bool(b) => *b,

        _ => true,
    }
}

fn number_operands(operator: &Token, left: &Value, right: &Value) -> Result<(f64, f64)> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => Ok((*a, *b)),

        _ => Err(LoxError::runtime(
            operator.line,
            "Operands must be numbers.",
        )),
    }
}

static CLOCK_EPOCH: OnceLock<Instant> = OnceLock::new();

/// Monotonic milliseconds since the first call in this process.
fn clock_native(_args: &[Value]) -> Result<Value> {
    let epoch = CLOCK_EPOCH.get_or_init(Instant::now);

    Ok(Value::Number(epoch.elapsed().as_secs_f64() * 1000.0))
}
