pub mod create_attachment;
pub mod list_attachments;
pub mod remove_attachment;
pub mod resolve_network;

pub use create_attachment::{
    CreateAttachmentOperation, CreateAttachmentOperationRequest, CreateAttachmentOperationResult,
};
pub use list_attachments::{
    ListAttachmentsOperation, ListAttachmentsOperationRequest, ListAttachmentsOperationResult,
};
pub use remove_attachment::{RemoveAttachmentOperation, RemoveAttachmentOperationRequest};
pub use resolve_network::{NetworkLookup, resolve_network};
