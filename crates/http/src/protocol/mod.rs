//! Core HTTP protocol types shared by the codec, the connection service and
//! request handlers.
//!
//! - **Message Handling** ([`Message`], [`PayloadItem`], [`PayloadSize`]): the
//!   unit the codec produces and consumes, and how a body is framed
//! - **Request** ([`RequestHeader`]): the parsed request head
//! - **Response** ([`ResponseHead`], [`ResponseBody`]): response metadata and
//!   the handler-produced body
//! - **Body** ([`body`]): the handler-facing request body stream
//! - **Errors** ([`ParseError`], [`SendError`], [`ServiceError`])

mod message;
pub use message::Message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod request;
pub use request::RequestHeader;

mod response;
pub use response::BoxError;
pub use response::ResponseBody;
pub use response::ResponseHead;
pub use response::copy_head;
pub use response::status_forbids_body;

mod error;
pub use error::ParseError;
pub use error::SendError;
pub use error::ServiceError;

pub mod body;
