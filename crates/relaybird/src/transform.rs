//! Text rewriting for outbound posts.
//!
//! Link tokens become markdown links, media placeholder tokens are removed,
//! mentions link back to the source profile, and a footer points at the
//! original post.

use crate::event::StreamEvent;

/// One literal substitution.
struct Rule {
    pattern: String,
    replacement: String,
    /// Only match when not followed by a handle character (`@bob` vs `@bobby`).
    whole_handle: bool,
}

/// Build the outbound body for `event`.
///
/// `handle` is the author's handle, used for the footer link. `profile_base`
/// is the source platform's web root, e.g. `https://twitter.com`.
pub fn render(event: &StreamEvent, handle: Option<&str>, profile_base: &str) -> String {
    let profile_base = profile_base.trim_end_matches('/');
    let body = rewrite_text(event, profile_base);
    let link = canonical_url(profile_base, handle, &event.id);

    if body.is_empty() {
        link
    } else {
        format!("{body}\n\n{link}")
    }
}

/// Web link to a post.
pub fn canonical_url(profile_base: &str, handle: Option<&str>, id: &str) -> String {
    let profile_base = profile_base.trim_end_matches('/');
    match handle {
        Some(handle) if !handle.is_empty() => format!("{profile_base}/{handle}/status/{id}"),
        _ => format!("{profile_base}/i/web/status/{id}"),
    }
}

/// Entity substitution, trimming and entity unescaping, without the footer.
///
/// Links and mentions share one pass: a mention only matches a whole handle
/// and text produced by a link is never rewritten again.
pub fn rewrite_text(event: &StreamEvent, profile_base: &str) -> String {
    let (media, links): (Vec<_>, Vec<_>) = event
        .entities
        .urls
        .iter()
        .partition(|url| url.media_key.is_some());

    let strip: Vec<Rule> = media
        .into_iter()
        .map(|url| Rule {
            pattern: url.raw_token.clone(),
            replacement: String::new(),
            whole_handle: false,
        })
        .collect();
    let text = replace_all(&event.text, &strip);

    let mut rules: Vec<Rule> = links
        .into_iter()
        .map(|url| {
            let target = url.expanded_url.as_deref().unwrap_or(&url.raw_token);
            let label = url
                .display_url
                .as_deref()
                .or(url.expanded_url.as_deref())
                .unwrap_or(&url.raw_token);
            Rule {
                pattern: url.raw_token.clone(),
                replacement: format!("[{label}]({target})"),
                whole_handle: false,
            }
        })
        .collect();
    rules.extend(event.entities.mentions.iter().map(|mention| Rule {
        pattern: format!("@{}", mention.handle),
        replacement: format!("[@{0}]({profile_base}/{0})", mention.handle),
        whole_handle: true,
    }));
    let text = replace_all(&text, &rules);

    unescape(text.trim())
}

/// Unescape the three entities the source API escapes, `&amp;` first.
fn unescape(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
}

/// Replace every occurrence of every rule's pattern in one left-to-right scan.
///
/// Replacement text is never rescanned, and the longest pattern wins where
/// several match at the same position.
fn replace_all(text: &str, rules: &[Rule]) -> String {
    if rules.is_empty() {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(c) = rest.chars().next() {
        let hit = rules
            .iter()
            .filter(|rule| !rule.pattern.is_empty() && rest.starts_with(rule.pattern.as_str()))
            .filter(|rule| !rule.whole_handle || !continues_handle(&rest[rule.pattern.len()..]))
            .max_by_key(|rule| rule.pattern.len());

        match hit {
            Some(rule) => {
                out.push_str(&rule.replacement);
                rest = &rest[rule.pattern.len()..];
            }
            None => {
                out.push(c);
                rest = &rest[c.len_utf8()..];
            }
        }
    }
    out
}

fn continues_handle(rest: &str) -> bool {
    rest.chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Entities, MentionEntity, UrlEntity};

    const BASE: &str = "https://twitter.com";

    fn url(raw: &str, expanded: Option<&str>, display: Option<&str>, media: Option<&str>) -> UrlEntity {
        UrlEntity {
            raw_token: raw.to_string(),
            expanded_url: expanded.map(str::to_string),
            display_url: display.map(str::to_string),
            media_key: media.map(str::to_string),
        }
    }

    fn mention(handle: &str) -> MentionEntity {
        MentionEntity {
            account_id: None,
            handle: handle.to_string(),
        }
    }

    fn event(text: &str, urls: Vec<UrlEntity>, mentions: Vec<MentionEntity>) -> StreamEvent {
        StreamEvent {
            id: "99".to_string(),
            text: text.to_string(),
            entities: Entities { urls, mentions },
            ..Default::default()
        }
    }

    #[test]
    fn media_token_is_removed() {
        let e = event("see t.co/x now", vec![url("t.co/x", None, None, Some("m1"))], vec![]);
        let body = rewrite_text(&e, BASE);
        assert!(!body.contains("t.co/x"));
        assert_eq!(body, "see  now");
    }

    #[test]
    fn link_token_becomes_markdown_link() {
        let e = event(
            "read t.co/y and t.co/y again",
            vec![url(
                "t.co/y",
                Some("https://example.com/page"),
                Some("example.com/page"),
                None,
            )],
            vec![],
        );
        assert_eq!(
            rewrite_text(&e, BASE),
            "read [example.com/page](https://example.com/page) and \
             [example.com/page](https://example.com/page) again"
        );
    }

    #[test]
    fn link_label_and_target_fall_back() {
        let e = event(
            "a t.co/1 b t.co/2",
            vec![
                url("t.co/1", Some("https://one.example"), None, None),
                url("t.co/2", None, None, None),
            ],
            vec![],
        );
        assert_eq!(
            rewrite_text(&e, BASE),
            "a [https://one.example](https://one.example) b [t.co/2](t.co/2)"
        );
    }

    #[test]
    fn mentions_link_to_profiles() {
        let e = event("hi @bob and @bobby", vec![], vec![mention("bob")]);
        assert_eq!(
            rewrite_text(&e, BASE),
            "hi [@bob](https://twitter.com/bob) and @bobby"
        );
    }

    #[test]
    fn replacement_output_is_not_rescanned() {
        let e = event(
            "t.co/a",
            vec![url("t.co/a", Some("https://x.example/@bob"), Some("x.example/@bob"), None)],
            vec![mention("bob")],
        );
        assert_eq!(
            rewrite_text(&e, BASE),
            "[x.example/@bob](https://x.example/@bob)"
        );
    }

    #[test]
    fn trims_and_unescapes_entities() {
        let e = event("  a &amp; b &lt; c &gt; d  ", vec![], vec![]);
        assert_eq!(rewrite_text(&e, BASE), "a & b < c > d");
    }

    #[test]
    fn footer_is_always_present() {
        let e = event("hello", vec![], vec![]);
        assert_eq!(
            render(&e, Some("alice"), "https://twitter.com/"),
            "hello\n\nhttps://twitter.com/alice/status/99"
        );

        let media_only = event("t.co/m", vec![url("t.co/m", None, None, Some("k"))], vec![]);
        assert_eq!(
            render(&media_only, Some("alice"), BASE),
            "https://twitter.com/alice/status/99"
        );
    }

    #[test]
    fn canonical_url_without_handle() {
        assert_eq!(
            canonical_url(BASE, None, "5"),
            "https://twitter.com/i/web/status/5"
        );
    }

    #[test]
    fn non_ascii_text_survives() {
        let e = event("héllo @bob ✓", vec![], vec![mention("bob")]);
        assert_eq!(
            rewrite_text(&e, BASE),
            "héllo [@bob](https://twitter.com/bob) ✓"
        );
    }
}
