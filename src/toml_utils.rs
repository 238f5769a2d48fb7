//! Helper functions for [`toml_span`].

use toml_span::DeserError;

/// Deserialize a TOML string into a value of the specified type.
pub fn from_toml_str<T>(toml_str: &str) -> Result<T, DeserError>
where
    T: for<'de> toml_span::Deserialize<'de>,
{
    let mut value = toml_span::parse(toml_str)?;
    T::deserialize(&mut value)
}

/// Flatten all the errors in a [`DeserError`] into one human-readable line.
pub fn render_deser_error(err: &DeserError) -> String {
    err.errors
        .iter()
        .map(|err| err.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
