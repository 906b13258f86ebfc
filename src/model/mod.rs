//! Request and response types exchanged with the calling layer.
//!
//! # Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Request`] | method, URL, headers and at most one body |
//! | [`Response`] | code, headers and at most one of content or stream |
//! | [`ResponseCode`] | peer status or synthetic transport failure |
//! | [`Headers`] | case-insensitive multimap |

pub mod headers;
mod request;
mod response;

pub use headers::Headers;
pub use request::{BodySource, Content, Method, Request, RequestBody, StreamContent};
pub use response::{Response, ResponseCode, ResponseStream};
