//! Input validation functions
//!
//! Reusable validators for command arguments. Hosts can use them for
//! pre-validation; the relay core uses them for enforcement before any
//! pairing or network work starts.

mod download_location;
mod encrypted_headers;
mod http_method;
mod relay_url;
mod settings;

pub use download_location::{
    DownloadLocationError, MAX_DOWNLOAD_LOCATION_LENGTH, validate_download_location,
};
pub use encrypted_headers::{
    EncryptedHeaderNames, cleartext_header_names, split_encrypted_headers,
};
pub use http_method::{HttpMethod, HttpMethodError, validate_http_method};
pub use relay_url::{RelayUrlError, relay_origin, validate_relay_url};
pub use settings::{SettingValueError, validate_pair_pool_size, validate_stream_chunk_size};
