//! Ambient CLI entry points (A5): `login` and `doctor`. Both are thin, non-interactive
//! wrappers around library operations the server itself doesn't need at request time —
//! kept out of `ai_gateway`'s public API since nothing in the HTTP surface calls them.

pub mod doctor;
pub mod login;

fn prompt(label: &str) -> String {
    eprint!("{label}: ");
    use std::io::Write;
    let _ = std::io::stderr().flush();
    let mut input = String::new();
    std::io::stdin().read_line(&mut input).unwrap_or(0);
    input.trim().to_string()
}
