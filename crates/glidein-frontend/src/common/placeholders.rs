use std::borrow::Cow;

use nom::bytes::complete::take_until;
use nom::sequence::delimited;
use nom_supreme::tag::complete::tag;

use crate::Map;
use crate::common::parser::NomResult;

pub const GROUP_PLACEHOLDER: &str = "GROUP";
pub const WORK_DIR_PLACEHOLDER: &str = "WORK_DIR";
pub const PARENT_PID_PLACEHOLDER: &str = "PARENT_PID";

pub type PlaceholderMap<'a> = Map<&'static str, Cow<'a, str>>;

#[derive(Debug, PartialEq, Eq)]
pub enum StringPart<'a> {
    Verbatim(&'a str),
    Placeholder(&'a str),
}

/// Replaces every `%{NAME}` occurrence whose name is present in `map`.
/// Unknown placeholders are kept verbatim.
pub fn resolve(map: &PlaceholderMap, input: &str) -> String {
    let mut buffer = String::with_capacity(input.len());
    for part in parse_resolvable_string(input) {
        match part {
            StringPart::Verbatim(data) => buffer.push_str(data),
            StringPart::Placeholder(name) => match map.get(name) {
                Some(value) => buffer.push_str(value),
                None => {
                    log::warn!("Encountered an unknown placeholder `{name}` in `{input}`");
                    buffer.push_str("%{");
                    buffer.push_str(name);
                    buffer.push('}');
                }
            },
        }
    }
    buffer
}

fn parse_placeholder(data: &str) -> NomResult<&str> {
    delimited(tag("%{"), take_until("}"), tag("}"))(data)
}

/// Splits a string into verbatim text and `%{NAME}` placeholders.
/// An unterminated `%{` is verbatim text.
pub fn parse_resolvable_string(data: &str) -> Vec<StringPart<'_>> {
    let mut parts = vec![];
    let mut start = 0;
    let mut input = data;

    while start < input.len() {
        if let Ok((rest, placeholder)) = parse_placeholder(&input[start..]) {
            if start > 0 {
                parts.push(StringPart::Verbatim(&input[..start]));
            }
            parts.push(StringPart::Placeholder(placeholder));
            input = rest;
            start = 0;
        } else {
            start += input[start..].chars().next().map_or(1, char::len_utf8);
        }
    }

    if start > 0 {
        parts.push(StringPart::Verbatim(&input[..start]));
    }

    parts
}

#[cfg(test)]
mod tests {
    use super::{PlaceholderMap, StringPart, parse_resolvable_string, resolve};

    #[test]
    fn test_resolve_known() {
        let mut map = PlaceholderMap::new();
        map.insert("GROUP", "main".into());
        map.insert("PARENT_PID", "42".into());
        assert_eq!(
            resolve(&map, "run --group %{GROUP} --parent %{PARENT_PID}"),
            "run --group main --parent 42"
        );
    }

    #[test]
    fn test_resolve_unknown_kept() {
        let map = PlaceholderMap::new();
        assert_eq!(resolve(&map, "a%{FOO}b"), "a%{FOO}b");
    }

    #[test]
    fn test_resolve_unterminated() {
        let mut map = PlaceholderMap::new();
        map.insert("GROUP", "x".into());
        assert_eq!(resolve(&map, "%{GROUP}/%{GR"), "x/%{GR");
    }

    #[test]
    fn test_resolve_multibyte_text() {
        let mut map = PlaceholderMap::new();
        map.insert("WORK_DIR", "/var/žluť".into());
        assert_eq!(resolve(&map, "čas=%{WORK_DIR}/ž"), "čas=/var/žluť/ž");
    }

    #[test]
    fn test_parse_empty() {
        assert!(parse_resolvable_string("").is_empty());
    }

    #[test]
    fn test_parse_only_placeholders() {
        assert_eq!(
            parse_resolvable_string("%{GROUP}%{WORK_DIR}"),
            vec![
                StringPart::Placeholder("GROUP"),
                StringPart::Placeholder("WORK_DIR"),
            ]
        );
    }

    #[test]
    fn test_parse_mixed() {
        assert_eq!(
            parse_resolvable_string("a%{b}c%{d"),
            vec![
                StringPart::Verbatim("a"),
                StringPart::Placeholder("b"),
                StringPart::Verbatim("c%{d"),
            ]
        );
    }
}
