//! Image generation through the Bing Image Creator web pages.
//!
//! The service has no API. A creation request returns an HTML page that
//! references a polling endpoint, and that endpoint answers with an HTML
//! fragment once the images are done. [`BingImageCreator`] drives that
//! workflow and turns the result into image URLs or an embeddable iframe.

pub mod address;
pub mod client;
pub mod error;
pub mod extract;
pub mod html;
pub mod iframe;
pub mod inline;
pub mod options;
pub mod polling;
pub mod telemetry;
pub mod transport;

pub use address::{AddressSpec, get_valid_ipv4};
pub use client::{BingImageCreator, CreationResult};
pub use error::{CreatorError, Result};
pub use html::{decode_html_lite, remove_html_tag_lite};
pub use inline::parse_inline_generative_image;
pub use options::{Options, Signatures};
pub use polling::ProgressContext;
pub use transport::{HttpRequest, HttpResponse, Transport, TransportError};
