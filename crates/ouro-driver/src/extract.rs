//! Extraction of executable code from model replies.
//!
//! Only ```` ```repl ```` fences count. Multiple blocks in one reply are
//! concatenated in order; the model is free to split one logical program
//! across fences.

use regex::Regex;
use std::sync::OnceLock;

fn repl_fence() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```repl[ \t]*\r?\n([\s\S]*?)```").expect("valid fence regex"))
}

/// Pull every `repl` block out of a reply.
///
/// Returns the trimmed blocks joined by newlines and whether any code was
/// found at all.
pub fn extract_code(reply: &str) -> (String, bool) {
    let blocks: Vec<&str> = repl_fence()
        .captures_iter(reply)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|block| !block.is_empty())
        .collect();

    let code = blocks.join("\n");
    let success = !code.is_empty();
    (code, success)
}
