//! Glues the pipeline stages together.
//!
//! Phases are strictly staged: scan → parse → resolve → execute, and any
//! diagnostic from a phase suppresses the next.  The driver surfaces
//! diagnostics as values rather than printing them, so the binary decides
//! what goes to stderr and tests can inspect everything.

use std::fs;
use std::io::{BufRead, Write};
use std::path::Path;

use log::{debug, info};

use crate::ast::NodeIdGen;
use crate::error::LoxError;
use crate::interpreter::Interpreter;
use crate::parser::Parser;
use crate::resolver::Resolver;
use crate::scanner::Scanner;
use crate::token::Token;

/// How a run failed: static diagnostics (scan, parse, resolve) or a runtime
/// error.  The split drives the process exit code.
#[derive(Debug)]
pub enum RunError {
    Static(Vec<LoxError>),
    Runtime(LoxError),
}

impl RunError {
    /// Write every diagnostic to `sink`, one per line.
    pub fn report(&self, sink: &mut impl Write) {
        match self {
            RunError::Static(errors) => {
                for e in errors {
                    let _ = writeln!(sink, "{}", e);
                }
            }

            RunError::Runtime(e) => {
                let _ = writeln!(sink, "{}", e);
            }
        }
    }
}

pub struct Driver<'o, W: Write> {
    interpreter: Interpreter<'o, W>,
    resolver: Resolver,
    ids: NodeIdGen,
}

impl<'o, W: Write> Driver<'o, W> {
    pub fn new(output: &'o mut W) -> Self {
        Driver {
            interpreter: Interpreter::new(output),
            resolver: Resolver::new(),
            ids: NodeIdGen::new(),
        }
    }

    /// Run one source unit (a file, or one REPL line) through all stages.
    pub fn run(&mut self, source: &str) -> Result<(), RunError> {
        let mut tokens: Vec<Token> = Vec::new();
        let mut lex_errors: Vec<LoxError> = Vec::new();

        for item in Scanner::new(source.as_bytes()) {
            match item {
                Ok(token) => tokens.push(token),
                Err(e) => lex_errors.push(e),
            }
        }

        if !lex_errors.is_empty() {
            return Err(RunError::Static(lex_errors));
        }

        debug!("Scanned {} token(s)", tokens.len());

        let statements = Parser::new(tokens, &mut self.ids)
            .parse()
            .map_err(RunError::Static)?;

        debug!("Parsed {} statement(s)", statements.len());

        let locals = self
            .resolver
            .resolve(&statements)
            .map_err(RunError::Static)?;

        self.interpreter.note_locals(locals);

        self.interpreter
            .interpret(&statements)
            .map_err(RunError::Runtime)
    }

    pub fn run_file(&mut self, path: &Path) -> Result<(), RunError> {
        info!("Running script {}", path.display());

        let source = fs::read_to_string(path)
            .map_err(|e| RunError::Static(vec![LoxError::Io(e)]))?;

        self.run(&source)
    }

    /// Line-oriented interactive loop.  State persists across lines: the
    /// interpreter keeps its environments, and the resolver keeps a
    /// pre-opened scope so prompt-level `var`s behave as locals of one
    /// enduring scope.  Errors are reported to `error_sink` and the loop
    /// continues; EOF ends it cleanly.
    pub fn run_prompt<R: BufRead>(
        &mut self,
        mut input: R,
        error_sink: &mut impl Write,
    ) -> std::io::Result<()> {
        info!("Entering REPL");

        self.resolver.push_scope();

        let mut line = String::new();

        loop {
            write!(self.interpreter.output_mut(), "> ")?;
            self.interpreter.output_mut().flush()?;

            line.clear();

            if input.read_line(&mut line)? == 0 {
                break;
            }

            if line.trim().is_empty() {
                continue;
            }

            if let Err(e) = self.run(&line) {
                e.report(error_sink);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parse_errors_suppress_execution() {
        let mut output: Vec<u8> = Vec::new();

        {
            let mut driver = Driver::new(&mut output);
            let err = driver.run("print 1; print ;").expect_err("should fail");

            match err {
                RunError::Static(errors) => {
                    assert!(errors[0].to_string().contains("Expect expression."));
                }
                other => panic!("expected static errors, got {:?}", other),
            }
        }

        // Nothing ran, including the valid first statement.
        assert_eq!(output, b"");
    }

    #[test]
    fn resolve_errors_suppress_execution() {
        let mut output: Vec<u8> = Vec::new();

        {
            let mut driver = Driver::new(&mut output);
            let err = driver.run("print 1; return 2;").expect_err("should fail");

            assert!(matches!(err, RunError::Static(_)));
        }

        assert_eq!(output, b"");
    }

    #[test]
    fn lex_errors_accumulate_and_suppress_parsing() {
        let mut output: Vec<u8> = Vec::new();
        let mut driver = Driver::new(&mut output);

        let err = driver.run("var a = @; var b = #;").expect_err("should fail");

        match err {
            RunError::Static(errors) => {
                assert_eq!(errors.len(), 2);

                for e in &errors {
                    assert!(e.to_string().contains("Unexpected character"));
                }
            }
            other => panic!("expected static errors, got {:?}", other),
        }
    }

    #[test]
    fn state_persists_across_runs() {
        let mut output: Vec<u8> = Vec::new();

        {
            let mut driver = Driver::new(&mut output);

            driver
                .run("fun greet(who) { print \"hi \" + who; }")
                .expect("definition failed");

            driver.run("greet(\"again\");").expect("call failed");
        }

        assert_eq!(String::from_utf8(output).unwrap(), "hi again\n");
    }

    #[test]
    fn errors_do_not_poison_later_runs() {
        let mut output: Vec<u8> = Vec::new();

        {
            let mut driver = Driver::new(&mut output);

            assert!(driver.run("print missing;").is_err());

            driver.run("print \"recovered\";").expect("second run failed");
        }

        assert_eq!(String::from_utf8(output).unwrap(), "recovered\n");
    }

    #[test]
    fn repl_executes_lines_and_exits_on_eof() {
        let mut output: Vec<u8> = Vec::new();
        let mut errors: Vec<u8> = Vec::new();

        {
            let input = Cursor::new("var x = 40;\nprint x + 2;\n");
            let mut driver = Driver::new(&mut output);

            driver
                .run_prompt(input, &mut errors)
                .expect("prompt I/O failed");
        }

        assert_eq!(String::from_utf8(output).unwrap(), "> > 42\n> ");
        assert!(errors.is_empty());
    }

    #[test]
    fn repl_vars_resolve_as_enduring_locals() {
        let mut output: Vec<u8> = Vec::new();
        let mut errors: Vec<u8> = Vec::new();

        {
            let input =
                Cursor::new("var n = 1;\nfun get() { return n; }\nn = 5;\nprint get();\n");
            let mut driver = Driver::new(&mut output);

            driver
                .run_prompt(input, &mut errors)
                .expect("prompt I/O failed");
        }

        assert!(errors.is_empty(), "{}", String::from_utf8_lossy(&errors));

        let output = String::from_utf8(output).unwrap();
        assert!(output.ends_with("5\n> "), "output: {:?}", output);
    }

    #[test]
    fn repl_reports_errors_and_continues() {
        let mut output: Vec<u8> = Vec::new();
        let mut errors: Vec<u8> = Vec::new();

        {
            let input = Cursor::new("print nope;\nprint \"still here\";\n");
            let mut driver = Driver::new(&mut output);

            driver
                .run_prompt(input, &mut errors)
                .expect("prompt I/O failed");
        }

        assert!(String::from_utf8(output).unwrap().contains("still here"));
        assert!(String::from_utf8_lossy(&errors).contains("Undefined variable 'nope'."));
    }

    #[test]
    fn missing_file_is_a_static_error() {
        let mut output: Vec<u8> = Vec::new();
        let mut driver = Driver::new(&mut output);

        let err = driver
            .run_file(Path::new("definitely/not/a/file.lox"))
            .expect_err("should fail");

        assert!(matches!(err, RunError::Static(_)));
    }
}
