/// Derives the plain-text form persisted next to rich-text bodies. Tags are
/// dropped, entities are left alone, whitespace is collapsed.
pub fn strip_html(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => {
                if in_tag {
                    in_tag = false;
                    out.push(' ');
                } else {
                    out.push(ch);
                }
            }
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Collects the user ids referenced by mention nodes in a rich-text body.
/// The editor serializes a mention as a tag carrying
/// `entity_identifier="<uuid>"`; order is kept, duplicates are dropped.
pub fn extract_mention_ids(html: &str) -> Vec<uuid::Uuid> {
    const MARKER: &str = "entity_identifier=\"";
    let mut ids = Vec::new();
    let mut rest = html;
    while let Some(at) = rest.find(MARKER) {
        rest = &rest[at + MARKER.len()..];
        let Some(end) = rest.find('"') else { break };
        if let Ok(id) = uuid::Uuid::parse_str(&rest[..end]) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        rest = &rest[end..];
    }
    ids
}

/// Rich-text payloads must at least be balanced at the tag level; anything
/// else is rejected before it reaches storage.
pub fn is_parsable_html(html: &str) -> bool {
    let mut depth = 0i32;
    for ch in html.chars() {
        match ch {
            '<' => depth += 1,
            '>' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags_and_collapses_whitespace() {
        assert_eq!(strip_html("<p>Ship <b>v1</b>  now</p>"), "Ship v1 now");
        assert_eq!(strip_html("plain"), "plain");
    }

    #[test]
    fn pulls_mentioned_users_out_of_markup() {
        let a = uuid::Uuid::new_v4();
        let b = uuid::Uuid::new_v4();
        let html = format!(
            "<p>ping <mention-component entity_identifier=\"{a}\" entity_name=\"user\"/> \
             and <mention-component entity_identifier=\"{b}\"/> \
             again <mention-component entity_identifier=\"{a}\"/></p>"
        );
        assert_eq!(extract_mention_ids(&html), vec![a, b]);
    }

    #[test]
    fn malformed_mentions_are_skipped() {
        assert!(extract_mention_ids("<p>no mentions</p>").is_empty());
        assert!(extract_mention_ids("entity_identifier=\"not-a-uuid\"").is_empty());
        assert!(extract_mention_ids("entity_identifier=\"truncated").is_empty());
    }

    #[test]
    fn detects_unbalanced_markup() {
        assert!(is_parsable_html("<p>ok</p>"));
        assert!(!is_parsable_html("<p>broken"));
        assert!(!is_parsable_html("stray>"));
    }
}
