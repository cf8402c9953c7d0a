pub mod console;
pub mod mock;

use anyhow::Result;
use async_trait::async_trait;

use crate::image::ImageRef;
use crate::message::Fragment;

/// Who sees a reply. Two requesters are the same if they reach the same
/// audience.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Audience {
    Private(String),
    Group(String),
    Channel(String),
}

/// A conversation waiting on a search. The chat layer implements this.
#[async_trait]
pub trait Requester: Send + Sync {
    fn audience(&self) -> Audience;

    /// The user charged for the search.
    fn user_id(&self) -> &str;

    /// Send result fragments, interim or final.
    async fn reply(&self, fragments: &[Fragment]) -> Result<()>;

    /// Send the terminal attachment: the picture that was searched.
    async fn reply_image(&self, image: &ImageRef) -> Result<()>;
}
