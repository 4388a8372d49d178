use strip_ansi_escapes::strip_str;

/// Strips ANSI escapes and resolves carriage-return overwrites, so progress
/// bars and colored output render as their final plain text.
pub fn clean_terminal_output(output: &str) -> String {
    let mut cleaned = String::with_capacity(output.len());
    for line in output.lines() {
        let visible = line
            .trim_end_matches('\r')
            .rsplit('\r')
            .next()
            .unwrap_or_default();
        cleaned.push_str(&strip_str(visible));
        cleaned.push('\n');
    }
    cleaned.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_colors_and_progress_overwrites() {
        let raw = "\x1b[32mok\x1b[0m\r\n10%\r50%\r100%\ndone\n\n";
        assert_eq!(clean_terminal_output(raw), "ok\n100%\ndone");
    }

    #[test]
    fn plain_text_is_untouched() {
        assert_eq!(clean_terminal_output("a\nb"), "a\nb");
    }
}
