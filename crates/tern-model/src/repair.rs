// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Best-effort repair of malformed tool-call argument JSON.
//!
//! Models occasionally emit argument buffers that are almost-but-not-quite
//! JSON.  This pass targets exactly the malformations observed in the field:
//! literal control characters inside string literals, invalid backslash
//! escapes, trailing commas, unclosed strings, and unclosed object/array
//! structures.  It is deliberately not a general-purpose repairer; the
//! long-term fix is incremental JSON parsing at the stream boundary.

use serde_json::Value;
use tracing::warn;

/// Resolve an accumulated argument buffer to a JSON object.
///
/// Empty buffer ⇒ `{}`.  Unparseable buffer goes through [`repair_json`]
/// once; if the repaired text still fails, `{}` is substituted so the call
/// can proceed at the protocol level.  Never fails.
pub fn finalize_arguments(buf: &str) -> Value {
    if buf.trim().is_empty() {
        return Value::Object(Default::default());
    }
    if let Ok(v) = serde_json::from_str(buf) {
        return v;
    }
    let repaired = repair_json(buf);
    match serde_json::from_str(&repaired) {
        Ok(v) => {
            warn!("repaired malformed tool-call arguments");
            v
        }
        Err(e) => {
            warn!(error = %e, "tool-call arguments unrecoverable; substituting {{}}");
            Value::Object(Default::default())
        }
    }
}

/// Apply the targeted repair passes in order:
/// escape fixes → string closing → trailing-comma removal → bracket closing.
pub fn repair_json(input: &str) -> String {
    let (mut fixed, open_stack, in_string) = fix_strings(input);
    if in_string {
        fixed.push('"');
    }
    let mut fixed = strip_trailing_commas(&fixed);
    for bracket in open_stack.into_iter().rev() {
        fixed.push(match bracket {
            '{' => '}',
            _ => ']',
        });
    }
    fixed
}

/// Single scan that (a) escapes literal control characters inside string
/// literals (`\n`, `\t`, `\r`; other controls are dropped), (b) rewrites
/// invalid backslash escapes (`\c` → `\\c`), and (c) records the open
/// bracket stack and whether a string is still open at end of input.
/// Bracket tracking ignores everything inside strings.
fn fix_strings(input: &str) -> (String, Vec<char>, bool) {
    let mut out = String::with_capacity(input.len() + 8);
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if in_string {
            match c {
                '\\' => match chars.next() {
                    Some(next)
                        if matches!(next, '"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' | 'u') =>
                    {
                        out.push('\\');
                        out.push(next);
                    }
                    Some(next) => {
                        // Invalid escape — escape the backslash itself.
                        out.push_str("\\\\");
                        out.push(next);
                    }
                    None => out.push_str("\\\\"),
                },
                '"' => {
                    in_string = false;
                    out.push('"');
                }
                '\n' => out.push_str("\\n"),
                '\t' => out.push_str("\\t"),
                '\r' => out.push_str("\\r"),
                c if (c as u32) < 0x20 => {} // other control chars dropped
                c => out.push(c),
            }
        } else {
            match c {
                '"' => {
                    in_string = true;
                    out.push('"');
                }
                '{' | '[' => {
                    stack.push(c);
                    out.push(c);
                }
                '}' => {
                    if stack.last() == Some(&'{') {
                        stack.pop();
                    }
                    out.push(c);
                }
                ']' => {
                    if stack.last() == Some(&'[') {
                        stack.pop();
                    }
                    out.push(c);
                }
                c => out.push(c),
            }
        }
    }
    (out, stack, in_string)
}

/// Remove commas that directly precede a closing bracket or the end of
/// input (string-aware).
fn strip_trailing_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if in_string {
            out.push(c);
            if c == '\\' && i + 1 < chars.len() {
                out.push(chars[i + 1]);
                i += 2;
                continue;
            }
            if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                // Look ahead past whitespace; drop the comma when nothing
                // but a closer (or end of input) follows.
                let mut j = i + 1;
                while j < chars.len() && chars[j].is_whitespace() {
                    j += 1;
                }
                if j >= chars.len() || chars[j] == '}' || chars[j] == ']' {
                    // skip the comma
                } else {
                    out.push(',');
                }
            }
            c => out.push(c),
        }
        i += 1;
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
