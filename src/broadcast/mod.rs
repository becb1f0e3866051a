// Broadcast core - paced WhatsApp delivery through the UltraMsg gateway
//
// The uploader hosts an image once per broadcast; the dispatcher then walks
// the recipient list one send at a time.

pub mod controls;
pub mod dispatcher;
pub mod gateway_client;
pub mod hosts;
pub mod media_upload;
pub mod progress_tracker;

pub use controls::BroadcastControls;
pub use dispatcher::MessageDispatcher;
pub use gateway_client::{MessageGateway, UltraMsgClient};
pub use hosts::HostEndpoint;
pub use media_upload::{ImageUploader, UploadRetryConfig};
