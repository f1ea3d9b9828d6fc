//! Plain-text to minimal HTML.

use std::sync::LazyLock;

use regex::Regex;

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</?[a-z][\s\S]*>").unwrap());

/// Make a reply displayable as HTML.
///
/// Text that already contains a tag, or fits on one line, is returned
/// unchanged. Otherwise newlines become `<br>` and Markdown code fences are
/// dropped.
pub fn to_html(text: &str) -> String {
    if HTML_TAG.is_match(text) || !text.contains('\n') {
        return text.to_string();
    }
    text.replace('\n', "<br>").replace("```", "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line_is_unchanged() {
        assert_eq!(to_html("A cube of acidic jelly."), "A cube of acidic jelly.");
    }

    #[test]
    fn existing_html_is_unchanged() {
        let html = "<p>Ooze</p>\n<ul><li>AC 6</li></ul>";
        assert_eq!(to_html(html), html);
        assert_eq!(to_html("<B>bold</B>\nnext"), "<B>bold</B>\nnext");
    }

    #[test]
    fn newlines_and_fences_are_converted() {
        assert_eq!(
            to_html("Stats:\n```\nAC 6\nHP 84\n```"),
            "Stats:<br><br>AC 6<br>HP 84<br>"
        );
    }

    #[test]
    fn comparison_operators_are_not_tags() {
        assert_eq!(to_html("HP < 10\nflee"), "HP < 10<br>flee");
    }
}
