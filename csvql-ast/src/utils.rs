use core::fmt;

/// Displays a slice of displayable items separated by the given separator.
pub(crate) fn display_separated<'a, T: fmt::Display>(
    slice: &'a [T],
    sep: &'static str,
) -> impl fmt::Display + 'a {
    struct Separated<'a, T> {
        slice: &'a [T],
        sep: &'static str,
    }

    impl<'a, T: fmt::Display> fmt::Display for Separated<'a, T> {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            let mut delim = "";
            for item in self.slice {
                write!(f, "{}{}", delim, item)?;
                delim = self.sep;
            }
            Ok(())
        }
    }

    Separated { slice, sep }
}

/// Displays a slice of displayable items separated by commas.
pub(crate) fn display_comma_separated<T: fmt::Display>(slice: &[T]) -> impl fmt::Display + '_ {
    display_separated(slice, ",")
}

/// Escapes single quotes in a string literal by doubling them.
pub(crate) fn escape_single_quote_string(s: &str) -> String {
    s.replace('\'', "''")
}
