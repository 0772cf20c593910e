use std::{fmt, net::SocketAddr};

/// Defines flag options.
pub struct Options {
    pub log_level: String,
    pub http_host: SocketAddr,
    /// Replaces the built-in chain registry when set.
    pub chains_file: Option<String>,
    pub data_api_url: String,
    pub data_api_key: Option<String>,
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("log_level", &self.log_level)
            .field("http_host", &self.http_host)
            .field("chains_file", &self.chains_file)
            .field("data_api_url", &self.data_api_url)
            .field("data_api_key", &self.data_api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
