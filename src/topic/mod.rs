//! The topic protocol: RPC calls carried in a multipart body.
//!
//! A client posts `multipart/form-data` with the marker header set. The field
//! named `body` holds the call as JSON; any other file parts are attachments
//! that the call refers to with `{"$file": id}`:
//!
//! ```text
//! --XYZ
//! Content-Disposition: form-data; name="body"
//!
//! {"type":"router","target":"scanner","body":{"page":{"$file":"p1"}}}
//! --XYZ
//! Content-Disposition: form-data; name="p1"; filename="p1.png"
//! Content-Type: image/png
//!
//! <bytes>
//! --XYZ--
//! ```
//!
//! [`TopicFilter`] answers the call itself and never lets it reach a route.
//! Binary values in the answer travel back the same way, in a
//! `multipart/mixed` response.

pub mod bus;
pub mod envelope;
mod filter;
pub mod value;

pub use bus::{BoxedTopicHandler, IntentBus, IntentRegistry, ModuleRegistry, RouterModules, TopicHandler};
pub use envelope::{TopicKind, TopicRequest, TopicResponse, TopicState};
pub use filter::TopicFilter;
pub use value::{Blob, Value};
