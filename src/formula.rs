use anyhow::bail;

/// One token of a prerequisite/exclusion expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Open,
    Close,
    And,
    Or,
    Course(String),
}

/// Tokenizes and validates a boolean course-code expression.
///
/// `(` and `)` terminate the current token and are emitted themselves;
/// whitespace terminates the current token silently; every other character
/// extends it. The connectives `,` and `a` map to AND, `alebo` maps to OR;
/// anything else is a course-code reference. Parentheses must balance and
/// the running depth must never go negative. An empty input is a valid
/// empty expression.
pub fn parse(input: &str) -> anyhow::Result<Vec<Token>> {
    let mut tokens: Vec<Token> = Vec::new();
    let mut cur = String::new();

    for ch in input.chars() {
        match ch {
            '(' => {
                flush(&mut cur, &mut tokens);
                tokens.push(Token::Open);
            }
            ')' => {
                flush(&mut cur, &mut tokens);
                tokens.push(Token::Close);
            }
            c if c.is_whitespace() => flush(&mut cur, &mut tokens),
            c => cur.push(c),
        }
    }
    flush(&mut cur, &mut tokens);

    let mut depth: i32 = 0;
    for t in &tokens {
        match t {
            Token::Open => depth += 1,
            Token::Close => {
                depth -= 1;
                if depth < 0 {
                    bail!("malformed expression {:?}: unmatched ')'", input);
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        bail!("malformed expression {:?}: {} unclosed '('", input, depth);
    }

    Ok(tokens)
}

fn flush(cur: &mut String, tokens: &mut Vec<Token>) {
    if cur.is_empty() {
        return;
    }
    let token = match cur.as_str() {
        "," | "a" => Token::And,
        "alebo" => Token::Or,
        code => Token::Course(code.to_string()),
    };
    tokens.push(token);
    cur.clear();
}
