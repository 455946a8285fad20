use treelox::error::LoxError;
use treelox::scanner::Scanner;
use treelox::token::{Token, TokenType};

fn assert_token_sequence(source: &str, expected: &[(TokenType, &str)]) {
    let scanner = Scanner::new(source.as_bytes());
    let tokens: Vec<Token> = scanner.filter_map(Result::ok).collect();

    assert_eq!(tokens.len(), expected.len());

    for (actual, (expected_type, expected_lexeme)) in tokens.iter().zip(expected.iter()) {
        assert_eq!(actual.token_type, *expected_type);
        assert_eq!(actual.lexeme, *expected_lexeme);
    }
}

#[test]
fn symbols() {
    assert_token_sequence(
        "({*.,+*})",
        &[
            (TokenType::LEFT_PAREN, "("),
            (TokenType::LEFT_BRACE, "{"),
            (TokenType::STAR, "*"),
            (TokenType::DOT, "."),
            (TokenType::COMMA, ","),
            (TokenType::PLUS, "+"),
            (TokenType::STAR, "*"),
            (TokenType::RIGHT_BRACE, "}"),
            (TokenType::RIGHT_PAREN, ")"),
            (TokenType::EOF, ""),
        ],
    );
}

#[test]
fn one_and_two_character_operators() {
    assert_token_sequence(
        "! != = == < <= > >= / -",
        &[
            (TokenType::BANG, "!"),
            (TokenType::BANG_EQUAL, "!="),
            (TokenType::EQUAL, "="),
            (TokenType::EQUAL_EQUAL, "=="),
            (TokenType::LESS, "<"),
            (TokenType::LESS_EQUAL, "<="),
            (TokenType::GREATER, ">"),
            (TokenType::GREATER_EQUAL, ">="),
            (TokenType::SLASH, "/"),
            (TokenType::MINUS, "-"),
            (TokenType::EOF, ""),
        ],
    );
}

#[test]
fn keywords_and_identifiers() {
    assert_token_sequence(
        "var varnish class classy _under score99 fun",
        &[
            (TokenType::VAR, "var"),
            (TokenType::IDENTIFIER, "varnish"),
            (TokenType::CLASS, "class"),
            (TokenType::IDENTIFIER, "classy"),
            (TokenType::IDENTIFIER, "_under"),
            (TokenType::IDENTIFIER, "score99"),
            (TokenType::FUN, "fun"),
            (TokenType::EOF, ""),
        ],
    );
}

#[test]
fn every_keyword_is_recognized() {
    assert_token_sequence(
        "and class else false for fun if nil or print return super this true var while",
        &[
            (TokenType::AND, "and"),
            (TokenType::CLASS, "class"),
            (TokenType::ELSE, "else"),
            (TokenType::FALSE, "false"),
            (TokenType::FOR, "for"),
            (TokenType::FUN, "fun"),
            (TokenType::IF, "if"),
            (TokenType::NIL, "nil"),
            (TokenType::OR, "or"),
            (TokenType::PRINT, "print"),
            (TokenType::RETURN, "return"),
            (TokenType::SUPER, "super"),
            (TokenType::THIS, "this"),
            (TokenType::TRUE, "true"),
            (TokenType::VAR, "var"),
            (TokenType::WHILE, "while"),
            (TokenType::EOF, ""),
        ],
    );
}

#[test]
fn number_literals() {
    let tokens: Vec<Token> = Scanner::new(b"12 3.5 0.25".as_slice())
        .filter_map(Result::ok)
        .collect();

    let values: Vec<f64> = tokens
        .iter()
        .filter_map(|t| match t.token_type {
            TokenType::NUMBER(n) => Some(n),
            _ => None,
        })
        .collect();

    assert_eq!(values, vec![12.0, 3.5, 0.25]);
}

#[test]
fn number_followed_by_dot_is_not_a_decimal() {
    assert_token_sequence(
        "12.abs",
        &[
            (TokenType::NUMBER(12.0), "12"),
            (TokenType::DOT, "."),
            (TokenType::IDENTIFIER, "abs"),
            (TokenType::EOF, ""),
        ],
    );
}

#[test]
fn string_literals_keep_their_contents() {
    let tokens: Vec<Token> = Scanner::new(br#""hello world""#.as_slice())
        .filter_map(Result::ok)
        .collect();

    match &tokens[0].token_type {
        TokenType::STRING(s) => assert_eq!(s, "hello world"),
        other => panic!("expected a string token, got {:?}", other),
    }

    assert_eq!(tokens[0].lexeme, "\"hello world\"");
}

#[test]
fn strings_may_span_lines() {
    let tokens: Vec<Token> = Scanner::new(b"\"a\nb\" x".as_slice())
        .filter_map(Result::ok)
        .collect();

    // The closing token is attributed to the line the string ends on, and the
    // line counter keeps advancing for what follows.
    assert_eq!(tokens[0].line, 2);
    assert_eq!(tokens[1].lexeme, "x");
    assert_eq!(tokens[1].line, 2);
}

#[test]
fn comments_and_whitespace_are_skipped() {
    assert_token_sequence(
        "1 // the rest is ignored ==\n+ 2\t",
        &[
            (TokenType::NUMBER(1.0), "1"),
            (TokenType::PLUS, "+"),
            (TokenType::NUMBER(2.0), "2"),
            (TokenType::EOF, ""),
        ],
    );
}

#[test]
fn line_numbers_advance_on_newlines() {
    let tokens: Vec<Token> = Scanner::new(b"1\n2\n\n3".as_slice())
        .filter_map(Result::ok)
        .collect();

    let lines: Vec<usize> = tokens.iter().map(|t| t.line).collect();

    assert_eq!(lines, vec![1, 2, 4, 4]);
}

#[test]
fn unexpected_characters_are_errors_but_scanning_continues() {
    let results: Vec<Result<Token, LoxError>> = Scanner::new(b",.$(#".as_slice()).collect();

    // COMMA, DOT, error for '$', LEFT_PAREN, error for '#', EOF.
    assert_eq!(results.len(), 6);

    let error_count = results.iter().filter(|r| r.is_err()).count();
    assert_eq!(error_count, 2);

    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(
            err.to_string().contains("Unexpected character"),
            "unexpected message: {}",
            err
        );
    }

    match results.last() {
        Some(Ok(token)) => assert_eq!(token.token_type, TokenType::EOF),
        other => panic!("expected trailing EOF, got {:?}", other),
    }
}

#[test]
fn unterminated_string_is_an_error() {
    let results: Vec<Result<Token, LoxError>> =
        Scanner::new(b"var x = \"oops".as_slice()).collect();

    let errors: Vec<String> = results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .map(|e| e.to_string())
        .collect();

    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("Unterminated string."));

    // The stream still terminates with EOF.
    assert!(matches!(
        results.last(),
        Some(Ok(Token {
            token_type: TokenType::EOF,
            ..
        }))
    ));
}

#[test]
fn punctuation_round_trips_through_lexemes() {
    let source = "(){};,.-+*/!!====<=>=<>";

    let rebuilt: String = Scanner::new(source.as_bytes())
        .filter_map(Result::ok)
        .map(|t| t.lexeme)
        .collect();

    assert_eq!(rebuilt, source);
}
