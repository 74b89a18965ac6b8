/// Parse a sink option string into `(key, value)` property pairs.
///
/// Tokens are whitespace separated `key=value` pairs; tokens without `=` are
/// skipped and parsing stops at the first `!` so that a trailing graph
/// fragment is never mistaken for sink properties.
pub fn parse_sink_options(options: &str) -> Vec<(String, String)> {
    let mut properties = Vec::new();

    for token in options.split_whitespace() {
        if token.starts_with('!') {
            break;
        }

        if let Some((key, value)) = token.split_once('=') {
            if key.is_empty() {
                continue;
            }
            properties.push((key.to_string(), value.to_string()));
        }
    }

    properties
}
