//! Static resolution pass.
//!
//! A single pre-order walk over the AST that:
//!
//! 1. **Builds lexical scopes**: maintains a stack of `HashMap<String, bool>`
//!    tracking declared (`false`) and fully defined (`true`) names in each
//!    nested block or function.  Globals are never on the stack.
//! 2. **Enforces static rules**: duplicate declarations in one scope, reading
//!    a variable in its own initializer, `return` outside a function or with
//!    a value inside an initializer, `this`/`super` outside their classes,
//!    and a class inheriting from itself.  Diagnostics accumulate; the walk
//!    continues past each one.
//! 3. **Records binding distances**: every `Variable`, `Assign`, `This`, and
//!    `Super` occurrence found on the stack is entered into a side-table
//!    keyed by node id, mapping to the number of scopes between the use and
//!    the binding.  Unlisted nodes are globals.  The evaluator consumes the
//!    table to climb exactly the right number of environment frames.
//!
//! The resolver holds no reference to the interpreter, so the driver can keep
//! one alive across REPL lines: `push_scope` pre-opens an enduring outermost
//! scope in which prompt-level `var`s behave as locals.

use std::collections::HashMap;

use log::{debug, info};

use crate::ast::{Expr, FunctionDecl, NodeId, Stmt, Variable};
use crate::error::LoxError;
use crate::token::Token;

/// What kind of function body, if any, is being resolved.  Validates
/// `return`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum FunctionType {
    None,
    Function,
    Method,
    Initializer,
}

/// What kind of class body, if any, is being resolved.  Validates `this` and
/// `super`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum ClassType {
    None,
    Class,
    Subclass,
}

pub struct Resolver {
    scopes: Vec<HashMap<String, bool>>, // false=declared, true=defined
    locals: HashMap<NodeId, usize>,
    current_function: FunctionType,
    current_class: ClassType,
    errors: Vec<LoxError>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver {
    pub fn new() -> Self {
        info!("Resolver instantiated");

        Resolver {
            scopes: Vec::new(),
            locals: HashMap::new(),
            current_function: FunctionType::None,
            current_class: ClassType::None,
            errors: Vec::new(),
        }
    }

    /// Pre-open an enduring scope.  Used by the REPL so that prompt-level
    /// declarations outlive the line that introduced them; file mode never
    /// calls this.
    pub fn push_scope(&mut self) {
        self.begin_scope();
    }

    /// Walk all top-level statements, producing the binding-distance table or
    /// every diagnostic found.
    pub fn resolve(&mut self, statements: &[Stmt]) -> Result<HashMap<NodeId, usize>, Vec<LoxError>> {
        info!(
            "Beginning resolve pass over {} statement(s)",
            statements.len()
        );

        for stmt in statements {
            self.resolve_stmt(stmt);
        }

        if self.errors.is_empty() {
            Ok(std::mem::take(&mut self.locals))
        } else {
            self.locals.clear();

            Err(std::mem::take(&mut self.errors))
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Statement resolution
    // ─────────────────────────────────────────────────────────────────────

    fn resolve_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Block(statements) => {
                self.begin_scope();

                for s in statements {
                    self.resolve_stmt(s);
                }

                self.end_scope();
            }

            Stmt::Var { name, initializer } => {
                self.declare(name);

                if let Some(expr) = initializer {
                    self.resolve_expr(expr);
                }

                self.define(name);
            }

            Stmt::Function(declaration) => {
                // Declared and defined eagerly so the function can recurse.
                self.declare(&declaration.name);
                self.define(&declaration.name);

                self.resolve_function(declaration, FunctionType::Function);
            }

            Stmt::Expression(expr) | Stmt::Print(expr) => {
                self.resolve_expr(expr);
            }

            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.resolve_expr(condition);
                self.resolve_stmt(then_branch);

                if let Some(else_branch) = else_branch {
                    self.resolve_stmt(else_branch);
                }
            }

            Stmt::While { condition, body } => {
                self.resolve_expr(condition);
                self.resolve_stmt(body);
            }

            Stmt::Return { keyword, value } => {
                if self.current_function == FunctionType::None {
                    self.error(keyword, "Can't return from top-level code.");
                }

                if let Some(expr) = value {
                    if self.current_function == FunctionType::Initializer {
                        self.error(keyword, "Can't return a value from an initializer.");
                    }

                    self.resolve_expr(expr);
                }
            }

            Stmt::Class {
                name,
                superclass,
                methods,
            } => {
                let enclosing_class = self.current_class;
                self.current_class = ClassType::Class;

                self.declare(name);
                self.define(name);

                if let Some(superclass) = superclass {
                    if superclass.name.lexeme == name.lexeme {
                        self.error(&superclass.name, "A class can't inherit from itself.");
                    }

                    self.current_class = ClassType::Subclass;

                    self.resolve_variable(superclass);

                    // Methods of a subclass close over `super`.
                    self.begin_scope();
                    self.scope_insert("super");
                }

                // Every method closes over `this`.
                self.begin_scope();
                self.scope_insert("this");

                for method in methods {
                    let kind = if method.name.lexeme == "init" {
                        FunctionType::Initializer
                    } else {
                        FunctionType::Method
                    };

                    self.resolve_function(method, kind);
                }

                self.end_scope();

                if superclass.is_some() {
                    self.end_scope();
                }

                self.current_class = enclosing_class;
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Expression resolution
    // ─────────────────────────────────────────────────────────────────────

    fn resolve_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Literal(_) => {}

            Expr::Grouping(inner) => {
                self.resolve_expr(inner);
            }

            Expr::Unary { right, .. } => {
                self.resolve_expr(right);
            }

            Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
                self.resolve_expr(left);
                self.resolve_expr(right);
            }

            Expr::Variable(var) => {
                self.resolve_variable(var);
            }

            Expr::Assign { id, name, value } => {
                self.resolve_expr(value);
                self.resolve_local(*id, name);
            }

            Expr::Call {
                callee, arguments, ..
            } => {
                self.resolve_expr(callee);

                for arg in arguments {
                    self.resolve_expr(arg);
                }
            }

            Expr::Get { object, .. } => {
                self.resolve_expr(object);
            }

            Expr::Set { object, value, .. } => {
                self.resolve_expr(object);
                self.resolve_expr(value);
            }

            Expr::This { id, keyword } => {
                if self.current_class == ClassType::None {
                    self.error(keyword, "Can't use 'this' outside of a class.");

                    return;
                }

                self.resolve_local(*id, keyword);
            }

            Expr::Super { id, keyword, .. } => {
                match self.current_class {
                    ClassType::None => {
                        self.error(keyword, "Can't use 'super' outside of a class.");

                        return;
                    }

                    ClassType::Class => {
                        self.error(keyword, "Can't use 'super' in a class with no superclass.");

                        return;
                    }

                    ClassType::Subclass => {}
                }

                self.resolve_local(*id, keyword);
            }
        }
    }

    /// Resolve a variable read, first rejecting a read of a binding that is
    /// still mid-initialization.
    fn resolve_variable(&mut self, var: &Variable) {
        if let Some(scope) = self.scopes.last() {
            if scope.get(&var.name.lexeme) == Some(&false) {
                self.error(
                    &var.name,
                    "Can't read local variable in its own initializer.",
                );
            }
        }

        self.resolve_local(var.id, &var.name);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Function helper
    // ─────────────────────────────────────────────────────────────────────

    /// Resolve a function's parameters and body in a fresh scope, under the
    /// given context kind.
    fn resolve_function(&mut self, declaration: &FunctionDecl, kind: FunctionType) {
        let enclosing = self.current_function;
        self.current_function = kind;

        self.begin_scope();

        for param in &declaration.params {
            self.declare(param);
            self.define(param);
        }

        for stmt in &declaration.body {
            self.resolve_stmt(stmt);
        }

        self.end_scope();

        self.current_function = enclosing;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Scope management
    // ─────────────────────────────────────────────────────────────────────

    #[inline]
    fn begin_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    #[inline]
    fn end_scope(&mut self) {
        self.scopes.pop();
    }

    fn scope_insert(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), true);
        }
    }

    fn declare(&mut self, name: &Token) {
        if let Some(scope) = self.scopes.last_mut() {
            if scope.contains_key(&name.lexeme) {
                self.errors.push(LoxError::resolve(
                    name,
                    "Already a variable with this name in this scope.",
                ));

                return;
            }

            scope.insert(name.lexeme.clone(), false);
        }
    }

    fn define(&mut self, name: &Token) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.lexeme.clone(), true);
        }
    }

    fn error(&mut self, token: &Token, message: &str) {
        self.errors.push(LoxError::resolve(token, message));
    }

    // ─────────────────────────────────────────────────────────────────────
    // Binding-distance helper
    // ─────────────────────────────────────────────────────────────────────

    /// Record this occurrence as a local at the depth of the innermost scope
    /// containing `name`, or leave it unlisted (global) if no scope does.
    fn resolve_local(&mut self, id: NodeId, name: &Token) {
        for (depth, scope) in self.scopes.iter().rev().enumerate() {
            if scope.contains_key(&name.lexeme) {
                debug!("Resolved '{}' at depth {}", name.lexeme, depth);

                self.locals.insert(id, depth);

                return;
            }
        }

        debug!("Resolved '{}' as global", name.lexeme);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::NodeIdGen;
    use crate::parser::Parser;
    use crate::scanner::Scanner;

    fn resolve_source(source: &str) -> Result<HashMap<NodeId, usize>, Vec<LoxError>> {
        let tokens: Vec<Token> = Scanner::new(source.as_bytes())
            .collect::<Result<_, _>>()
            .expect("scan failed");

        let mut ids = NodeIdGen::new();
        let statements = Parser::new(tokens, &mut ids).parse().expect("parse failed");

        Resolver::new().resolve(&statements)
    }

    fn first_error(source: &str) -> String {
        resolve_source(source).expect_err("should report")[0].to_string()
    }

    #[test]
    fn globals_have_no_table_entries() {
        let locals = resolve_source("var a = 1; print a;").expect("resolve failed");

        assert!(locals.is_empty());
    }

    #[test]
    fn block_local_resolves_at_its_depth() {
        let locals = resolve_source("{ var a = 1; { print a; } }").expect("resolve failed");

        // The single resolved reference is `a` inside the inner block, one
        // scope above it.
        assert_eq!(locals.values().collect::<Vec<_>>(), vec![&1]);
    }

    #[test]
    fn closure_captures_the_binding_not_the_name() {
        // `a` inside f resolves before the block-level `a` exists, so it must
        // stay global (unlisted), not bind to the later declaration.
        let locals =
            resolve_source("var a = 1; { fun f() { print a; } var a = 2; f(); }")
                .expect("resolve failed");

        assert!(locals.values().all(|&d| d == 0), "locals: {:?}", locals);
    }

    #[test]
    fn distances_never_exceed_scope_depth() {
        let locals = resolve_source(
            "fun outer() { var a = 1; fun inner() { { print a; } } return inner; }",
        )
        .expect("resolve failed");

        // Deepest reference sits under three scopes (outer body, inner body,
        // block).
        assert!(locals.values().all(|&d| d <= 2), "locals: {:?}", locals);
    }

    #[test]
    fn self_referential_initializer() {
        let message = first_error("{ var x = x; }");

        assert!(message.contains("Can't read local variable in its own initializer."));
        assert!(message.contains("at 'x'"));
    }

    #[test]
    fn duplicate_declaration_in_same_scope() {
        assert!(first_error("{ var a = 1; var a = 2; }")
            .contains("Already a variable with this name in this scope."));
    }

    #[test]
    fn top_level_return() {
        assert!(first_error("return 1;").contains("Can't return from top-level code."));
    }

    #[test]
    fn return_value_in_initializer() {
        assert!(
            first_error("class C { init() { return 1; } }")
                .contains("Can't return a value from an initializer.")
        );
    }

    #[test]
    fn bare_return_in_initializer_is_allowed() {
        assert!(resolve_source("class C { init() { return; } }").is_ok());
    }

    #[test]
    fn class_inheriting_from_itself() {
        assert!(first_error("class C < C {}").contains("A class can't inherit from itself."));
    }

    #[test]
    fn this_outside_class() {
        assert!(first_error("print this;").contains("Can't use 'this' outside of a class."));
    }

    #[test]
    fn super_outside_class() {
        assert!(
            first_error("fun f() { super.g(); }")
                .contains("Can't use 'super' outside of a class.")
        );
    }

    #[test]
    fn super_without_superclass() {
        assert!(first_error("class C { f() { super.f(); } }")
            .contains("Can't use 'super' in a class with no superclass."));
    }

    #[test]
    fn errors_accumulate_across_statements() {
        let errors = resolve_source("return 1; print this;").expect_err("should report");

        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn repl_pre_scope_makes_prompt_vars_local() {
        let tokens: Vec<Token> = Scanner::new(b"var a = 1; print a;".as_slice())
            .collect::<Result<_, _>>()
            .expect("scan failed");

        let mut ids = NodeIdGen::new();
        let statements = Parser::new(tokens, &mut ids).parse().expect("parse failed");

        let mut resolver = Resolver::new();
        resolver.push_scope();

        let locals = resolver.resolve(&statements).expect("resolve failed");

        assert_eq!(locals.values().collect::<Vec<_>>(), vec![&0]);
    }
}
