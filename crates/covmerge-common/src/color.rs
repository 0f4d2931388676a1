//! ANSI styling for CLI output, disabled by `--no-color`, `NO_COLOR` or a
//! non-terminal stdout.

use std::io::IsTerminal;
use std::sync::OnceLock;

static NO_COLOR: OnceLock<bool> = OnceLock::new();

pub fn init(no_color_flag: bool) {
    let _ = NO_COLOR.set(
        no_color_flag || std::env::var_os("NO_COLOR").is_some() || !std::io::stdout().is_terminal(),
    );
}

pub fn is_disabled() -> bool {
    NO_COLOR.get().copied().unwrap_or(false)
}

const RESET: &str = "\x1b[0m";

fn paint(text: &str, code: &str) -> String {
    if is_disabled() {
        return text.to_string();
    }
    let mut out = String::with_capacity(code.len() + text.len() + RESET.len());
    out.push_str(code);
    out.push_str(text);
    out.push_str(RESET);
    out
}

pub struct Colors;

impl Colors {
    pub fn success(text: &str) -> String {
        paint(text, "\x1b[32m")
    }

    pub fn error(text: &str) -> String {
        paint(text, "\x1b[31m")
    }

    pub fn warning(text: &str) -> String {
        paint(text, "\x1b[33m")
    }

    pub fn info(text: &str) -> String {
        paint(text, "\x1b[36m")
    }

    pub fn dim(text: &str) -> String {
        paint(text, "\x1b[90m")
    }

    pub fn bold(text: &str) -> String {
        paint(text, "\x1b[1m")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_colors_pass_text_through() {
        let _ = NO_COLOR.set(true);
        assert_eq!(Colors::success("ok"), "ok");
        assert_eq!(Colors::warning("careful"), "careful");
        assert_eq!(Colors::bold("title"), "title");
    }
}
