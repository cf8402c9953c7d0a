use anyhow::Result;
use async_trait::async_trait;

use super::{Audience, Requester};
use crate::image::ImageRef;
use crate::message::Fragment;

/// Prints replies to stdout. Used by the CLI.
pub struct ConsoleRequester {
    user: String,
}

impl ConsoleRequester {
    pub fn new(user: impl Into<String>) -> Self {
        Self { user: user.into() }
    }
}

#[async_trait]
impl Requester for ConsoleRequester {
    fn audience(&self) -> Audience {
        Audience::Private(self.user.clone())
    }

    fn user_id(&self) -> &str {
        &self.user
    }

    async fn reply(&self, fragments: &[Fragment]) -> Result<()> {
        for fragment in fragments {
            match fragment {
                Fragment::Text(text) => println!("{text}"),
                Fragment::Image(url) => println!("[image] {url}"),
            }
        }
        Ok(())
    }

    async fn reply_image(&self, image: &ImageRef) -> Result<()> {
        println!("[searched] {}\n", image.url());
        Ok(())
    }
}
