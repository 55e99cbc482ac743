//! The only place where text is made safe for interpolation into a shell command.
//!
//! Every argument that reaches a remote shell (paths, inner commands, permission strings)
//! goes through [`quote`]. Nothing else in the crate builds quoted text by hand.

/// Wraps `value` in single quotes for a POSIX shell.
///
/// Inside single quotes nothing is special except the closing quote itself, so each `'` is
/// written as `'\''`: close the quote, emit a backslash-escaped literal quote, reopen. The
/// shell concatenates the pieces back into one word equal to `value`. Substitutions such as
/// `$(...)` are passed through verbatim and are only expanded by whichever shell later
/// evaluates the word as a script.
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for ch in value.chars() {
        if ch == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(ch);
        }
    }
    out.push('\'');
    out
}
