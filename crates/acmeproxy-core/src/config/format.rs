use crate::error::ProxyError;

use super::Config;

pub trait Format<'a> {
    /// Set the input document
    fn set_input(&mut self, input: &'a str);

    /// Parse the provided document and return a fully parsed and validated config
    fn parse(&self) -> Result<Config, ProxyError>;

    /// Create a new instance of the format from the input string
    fn from_str(input: &'a str) -> Self
    where
        Self: Sized;

    /// Convert the config to a string representation
    fn to_format_string(&self, config: &Config) -> Result<String, ProxyError>;

    /// Get the file extension for the format
    fn extension(&self) -> &'static str;
}
