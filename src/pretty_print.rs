use std::io;
use std::ops::Range;

use ariadne::{Label, Report, ReportKind, Source};

use crate::ParseError;

impl ParseError {
    // ariadne wants a non-empty range to draw the label
    fn label_range(&self, input: &str) -> Range<usize> {
        let range = self.span().to_range();
        let start = range.start.min(input.len());
        if range.end > start {
            start..range.end.min(input.len())
        } else {
            start..start + 1
        }
    }

    fn label_message(&self) -> String {
        match self {
            ParseError::UnexpectedToken { expected, .. } => format!("expected {} here", expected),
            ParseError::NoPrefixParseFn { kind, .. } => {
                format!("{} cannot start an expression", kind)
            }
            ParseError::InvalidInteger { .. } => "does not fit in a 64-bit integer".to_string(),
        }
    }

    /// Writes a source annotated report of this error to stderr.
    pub fn report(&self, source_id: &str, input: &str) -> io::Result<()> {
        let range = self.label_range(input);
        Report::build(ReportKind::Error, (source_id, range.clone()))
            .with_message(self.to_string())
            .with_label(Label::new((source_id, range)).with_message(self.label_message()))
            .finish()
            .eprint((source_id, Source::from(input)))
    }
}

/// Reports every error in order, stopping at the first write failure.
pub fn report_all(errors: &[ParseError], source_id: &str, input: &str) -> io::Result<()> {
    errors
        .iter()
        .try_for_each(|error| error.report(source_id, input))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;

    #[test]
    fn test_label_range_is_never_empty() {
        let input = "(1 + 2";
        let (_, errors) = parse(input);
        assert_eq!(errors[0].label_range(input), 6..7);

        let input = "let x = @;";
        let (_, errors) = parse(input);
        assert_eq!(errors[0].label_range(input), 8..9);
    }

    #[test]
    fn test_label_messages() {
        let (_, errors) = parse("let x 1; +; 99999999999999999999");
        let messages: Vec<String> = errors.iter().map(ParseError::label_message).collect();
        assert_eq!(
            messages,
            vec![
                "expected = here",
                "+ cannot start an expression",
                "does not fit in a 64-bit integer",
            ]
        );
    }

    #[test]
    fn test_report_writes() {
        let input = "let = 1;";
        let (_, errors) = parse(input);
        assert!(report_all(&errors, "test", input).is_ok());
    }
}
