use std::{
    fmt,
    marker::PhantomData,
    os::unix::ffi::OsStrExt,
    str::{FromStr, Utf8Error},
};

use thiserror::Error;

/// A representation of an environment variable value.
pub trait EnvRepr {
    /// Type of the value, e.g `u16`.
    type Value;
    /// Error that can occur when reading the value from the representation.
    type FromReprError;

    /// Reads a value from the given representation.
    fn from_repr(repr: &[u8]) -> Result<Self::Value, Self::FromReprError>;
}

/// Implementation of [`EnvRepr`] that uses [`FromStr`] to handle conversions.
pub struct StringRepr<T>(PhantomData<fn() -> T>);

/// Errors that can occur when reading an environment variable value with [`StringRepr`].
#[derive(Error, Debug)]
pub enum ParseEnvError<E> {
    #[error("value is not valid UTF-8: {0}")]
    Utf8Error(#[source] Utf8Error),

    #[error("failed to parse value: {0}")]
    ParseError(#[source] E),
}

impl<T> EnvRepr for StringRepr<T>
where
    T: FromStr,
{
    type Value = T;
    type FromReprError = ParseEnvError<T::Err>;

    fn from_repr(repr: &[u8]) -> Result<T, Self::FromReprError> {
        let as_str = std::str::from_utf8(repr).map_err(ParseEnvError::Utf8Error)?;
        as_str.trim().parse().map_err(ParseEnvError::ParseError)
    }
}

/// An environment variable with strict value type checking.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CheckedEnv<R: EnvRepr> {
    /// Name of the variable.
    pub name: &'static str,
    repr: PhantomData<fn() -> R>,
}

impl<R: EnvRepr> CheckedEnv<R> {
    /// Creates a new instance.
    ///
    /// All instances should be kept together in [`super::envs`].
    pub(crate) const fn new(name: &'static str) -> Self {
        Self {
            name,
            repr: PhantomData,
        }
    }

    /// Reads this variable's value from the process environment.
    ///
    /// A variable set to an empty (or whitespace only) value is treated as missing.
    pub fn try_from_env(self) -> Result<Option<R::Value>, R::FromReprError> {
        match std::env::var_os(self.name) {
            Some(repr) if repr.as_bytes().trim_ascii().is_empty() => Ok(None),
            Some(repr) => R::from_repr(repr.as_bytes()).map(Some),
            None => Ok(None),
        }
    }
}

impl<R: EnvRepr<Value = bool>> CheckedEnv<R> {
    /// Convenience method for checking whether this variable is set.
    ///
    /// Returns `true` if the variable is present and set to true.
    /// Returns `false` if the variable is missing or set to some other value.
    pub fn is_set(self) -> bool {
        self.try_from_env().ok().flatten().unwrap_or_default()
    }
}

impl<R: EnvRepr> fmt::Debug for CheckedEnv<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl<R: EnvRepr> fmt::Display for CheckedEnv<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

#[cfg(test)]
mod tests {
    use std::{net::SocketAddr, path::PathBuf};

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::path(b"/etc/liqo/tls.crt".as_slice(), PathBuf::from("/etc/liqo/tls.crt"))]
    #[case::trailing_newline(b"/etc/liqo/tls.key\n".as_slice(), PathBuf::from("/etc/liqo/tls.key"))]
    fn reads_paths(#[case] repr: &[u8], #[case] expected: PathBuf) {
        assert_eq!(StringRepr::<PathBuf>::from_repr(repr).unwrap(), expected);
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(matches!(
            StringRepr::<SocketAddr>::from_repr(b"not-an-address"),
            Err(ParseEnvError::ParseError(..))
        ));
        assert!(matches!(
            StringRepr::<bool>::from_repr(&[0xff, 0xfe]),
            Err(ParseEnvError::Utf8Error(..))
        ));
    }

    #[test]
    fn empty_variable_is_missing() {
        const EMPTY: CheckedEnv<StringRepr<PathBuf>> =
            CheckedEnv::new("LIQO_NODE_API_TEST_EMPTY_VARIABLE");

        std::env::set_var(EMPTY.name, "");
        assert!(EMPTY.try_from_env().unwrap().is_none());
    }
}
