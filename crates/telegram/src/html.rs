//! HTML rendering of bridged messages.

use etm_channels::ChatKind;

/// Telegram message size limit.
pub const TELEGRAM_MAX_MESSAGE_LEN: usize = 4096;

/// Escape text for Telegram's HTML parse mode.
#[must_use]
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Header line naming where a slave message came from.
///
/// - user chat: `🔁👤 Alice:` (or `🔁👤 Alice, Bob:` when someone else wrote)
/// - group chat: `🔁👥 Bob [Rust]:`
/// - system chat: `🔁💬 Service:`
#[must_use]
pub fn header(emoji: &str, kind: ChatKind, chat_name: &str, author: &str) -> String {
    match kind {
        ChatKind::User if author.is_empty() || author == chat_name => {
            format!("{emoji}👤 {chat_name}:")
        },
        ChatKind::User => format!("{emoji}👤 {chat_name}, {author}:"),
        ChatKind::Group => format!("{emoji}👥 {author} [{chat_name}]:"),
        ChatKind::System => format!("{emoji}💬 {chat_name}:"),
    }
}

/// Bold escaped header followed by the escaped body, cut to Telegram's limit.
#[must_use]
pub fn render(header: &str, body: &str) -> String {
    let rendered = format!("<b>{}</b>\n{}", escape_html(header), escape_html(body));
    if rendered.len() <= TELEGRAM_MAX_MESSAGE_LEN {
        return rendered;
    }
    // Cutting may split an entity like `&amp;`; back off to before it.
    let mut cut = TELEGRAM_MAX_MESSAGE_LEN - '…'.len_utf8();
    while !rendered.is_char_boundary(cut) {
        cut -= 1;
    }
    if let Some(amp) = rendered[..cut].rfind('&')
        && !rendered[amp..cut].contains(';')
    {
        cut = amp;
    }
    format!("{}…", &rendered[..cut])
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[test]
    fn escapes_markup() {
        assert_eq!(escape_html("<b>&</b>"), "&lt;b&gt;&amp;&lt;/b&gt;");
    }

    #[rstest]
    #[case(ChatKind::User, "Alice", "Alice", "🔌👤 Alice:")]
    #[case(ChatKind::User, "Alice", "", "🔌👤 Alice:")]
    #[case(ChatKind::User, "Alice", "Bob", "🔌👤 Alice, Bob:")]
    #[case(ChatKind::Group, "Rust", "Bob", "🔌👥 Bob [Rust]:")]
    #[case(ChatKind::System, "Service", "bot", "🔌💬 Service:")]
    fn header_layouts(
        #[case] kind: ChatKind,
        #[case] chat: &str,
        #[case] author: &str,
        #[case] expected: &str,
    ) {
        assert_eq!(header("🔌", kind, chat, author), expected);
    }

    #[test]
    fn render_escapes_header_and_body() {
        assert_eq!(
            render("👥 <Bob> [Rust]:", "a < b"),
            "<b>👥 &lt;Bob&gt; [Rust]:</b>\na &lt; b"
        );
    }

    #[test]
    fn render_truncates_long_bodies() {
        let body = "&".repeat(TELEGRAM_MAX_MESSAGE_LEN);
        let out = render("h", &body);
        assert!(out.len() <= TELEGRAM_MAX_MESSAGE_LEN + '…'.len_utf8());
        assert!(out.ends_with("&amp;…"));
    }
}
