// ABOUTME: Inline style declaration parsing and filtering.
// ABOUTME: Splits on semicolons outside parentheses and quotes so url(...) values survive.

/// Splits an inline style into trimmed, non-empty declarations.
pub fn split_declarations(style: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in style.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => depth = depth.saturating_sub(1),
            (None, ';') if depth == 0 => {
                push_trimmed(&mut out, &style[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    push_trimmed(&mut out, &style[start..]);
    out
}

fn push_trimmed<'a>(out: &mut Vec<&'a str>, decl: &'a str) {
    let decl = decl.trim();
    if !decl.is_empty() {
        out.push(decl);
    }
}

/// Splits a declaration into lowercased property and raw value.
pub fn property_and_value(decl: &str) -> Option<(String, &str)> {
    let (prop, value) = decl.split_once(':')?;
    Some((prop.trim().to_ascii_lowercase(), value.trim()))
}

/// Value of a property, last declaration wins.
pub fn declaration_value<'a>(style: &'a str, property: &str) -> Option<&'a str> {
    split_declarations(style)
        .into_iter()
        .filter_map(property_and_value)
        .filter(|(p, _)| p == property)
        .map(|(_, v)| v)
        .last()
}

/// Drops declarations for which `remove` returns true.
///
/// Returns `None` when nothing was removed, otherwise the rebuilt style
/// (possibly empty).
pub fn remove_declarations<F>(style: &str, remove: F) -> Option<String>
where
    F: Fn(&str, &str) -> bool,
{
    let decls = split_declarations(style);
    let kept: Vec<&str> = decls
        .iter()
        .copied()
        .filter(|d| match property_and_value(d) {
            Some((prop, value)) => !remove(&prop, value),
            None => true,
        })
        .collect();
    if kept.len() == decls.len() {
        return None;
    }
    Some(kept.join("; "))
}

fn bare_value(value: &str) -> String {
    value
        .trim()
        .trim_end_matches("!important")
        .trim()
        .to_ascii_lowercase()
}

/// Removes `position: fixed` and `position: sticky`, keeping every other
/// position value.
pub fn strip_dangerous_positioning(style: &str) -> Option<String> {
    remove_declarations(style, |prop, value| {
        prop == "position" && matches!(bare_value(value).as_str(), "fixed" | "sticky")
    })
}

/// Removes every `cursor` declaration.
pub fn strip_cursor(style: &str) -> Option<String> {
    remove_declarations(style, |prop, _| prop == "cursor")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_respects_parentheses_and_quotes() {
        let style = r#"background: url("a;b.png"); color: red;content:'x;y'"#;
        assert_eq!(
            split_declarations(style),
            vec![r#"background: url("a;b.png")"#, "color: red", "content:'x;y'"]
        );
    }

    #[test]
    fn positioning_only_fixed_and_sticky() {
        assert_eq!(
            strip_dangerous_positioning("position: fixed; top: 0"),
            Some("top: 0".to_string())
        );
        assert_eq!(
            strip_dangerous_positioning("position:STICKY !important"),
            Some(String::new())
        );
        assert_eq!(strip_dangerous_positioning("position: relative; top: 0"), None);
    }

    #[test]
    fn cursor_removed_everywhere() {
        assert_eq!(
            strip_cursor("cursor: pointer; color: blue; cursor:default"),
            Some("color: blue".to_string())
        );
        assert_eq!(strip_cursor("color: blue"), None);
    }

    #[test]
    fn declaration_value_last_wins() {
        assert_eq!(declaration_value("width: 10px; WIDTH: 20px", "width"), Some("20px"));
        assert_eq!(declaration_value("height: 1px", "width"), None);
    }
}
