// src/shell/parser.rs - Command line tokenizer

/// Split a command line into tokens.
///
/// Whitespace separates tokens, `"` and `'` toggle quoting (quotes are not
/// kept), and `\` takes the next character literally.
pub fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut token = String::new();
    let mut in_quotes = false;
    let mut escaped = false;

    for c in input.chars() {
        if escaped {
            token.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' | '\'' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !token.is_empty() {
                    tokens.push(std::mem::take(&mut token));
                }
            }
            c => token.push(c),
        }
    }

    if !token.is_empty() {
        tokens.push(token);
    }
    tokens
}

/// Command names start with a letter or underscore, then letters, digits,
/// `_` or `-`.
pub fn is_valid_command_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
