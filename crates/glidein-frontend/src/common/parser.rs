use nom::combinator::all_consuming;
use nom::{IResult, Parser};
use nom_supreme::error::ErrorTree;

pub type ParserError<'a> = ErrorTree<&'a str>;

pub type NomResult<'a, Ret> = IResult<&'a str, Ret, ParserError<'a>>;

pub(crate) fn format_parse_error(error: nom::Err<ParserError<'_>>) -> anyhow::Error {
    match error {
        nom::Err::Error(e) | nom::Err::Failure(e) => anyhow::anyhow!("Parse error: {e}"),
        nom::Err::Incomplete(_) => anyhow::anyhow!("Parse error: unexpected end of input"),
    }
}

/// Runs `parser` on the whole `input`, unparsed trailing characters are an error.
pub fn consume_all<'a, O, F>(parser: F, input: &'a str) -> anyhow::Result<O>
where
    F: Parser<&'a str, O, ParserError<'a>>,
{
    all_consuming(parser)(input)
        .map(|(_, output)| output)
        .map_err(format_parse_error)
}

#[cfg(test)]
mod tests {
    use super::{NomResult, consume_all};
    use nom::character::complete::{alpha1, char, digit1};
    use nom::sequence::separated_pair;

    fn p_pair(input: &str) -> NomResult<(&str, &str)> {
        separated_pair(alpha1, char('='), digit1)(input)
    }

    #[test]
    fn test_consume_all() {
        assert_eq!(consume_all(p_pair, "abc=12").unwrap(), ("abc", "12"));
    }

    #[test]
    fn test_consume_all_trailing_input() {
        assert!(consume_all(p_pair, "abc=12x").is_err());
    }

    #[test]
    fn test_consume_all_error_message() {
        let error = consume_all(p_pair, "abc:12").unwrap_err();
        assert!(error.to_string().starts_with("Parse error"));
    }
}
