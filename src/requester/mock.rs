use std::sync::Mutex;

use anyhow::{Result, bail};
use async_trait::async_trait;

use super::{Audience, Requester};
use crate::image::ImageRef;
use crate::message::Fragment;

/// What a [`RecordingRequester`] was sent, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Fragments(Vec<Fragment>),
    Image(ImageRef),
}

/// A requester for tests. Records every reply; can be told to fail.
pub struct RecordingRequester {
    audience: Audience,
    user: String,
    fail: bool,
    log: Mutex<Vec<Delivery>>,
}

impl RecordingRequester {
    pub fn private(user: &str) -> Self {
        Self::new(Audience::Private(user.to_string()), user)
    }

    pub fn group(group: &str, user: &str) -> Self {
        Self::new(Audience::Group(group.to_string()), user)
    }

    pub fn new(audience: Audience, user: &str) -> Self {
        Self {
            audience,
            user: user.to_string(),
            fail: false,
            log: Mutex::new(Vec::new()),
        }
    }

    /// Every reply errors.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.log.lock().unwrap().clone()
    }

    /// All fragments received, flattened across replies.
    pub fn fragments(&self) -> Vec<Fragment> {
        self.deliveries()
            .into_iter()
            .filter_map(|d| match d {
                Delivery::Fragments(f) => Some(f),
                Delivery::Image(_) => None,
            })
            .flatten()
            .collect()
    }

    pub fn images(&self) -> Vec<ImageRef> {
        self.deliveries()
            .into_iter()
            .filter_map(|d| match d {
                Delivery::Image(image) => Some(image),
                Delivery::Fragments(_) => None,
            })
            .collect()
    }
}

#[async_trait]
impl Requester for RecordingRequester {
    fn audience(&self) -> Audience {
        self.audience.clone()
    }

    fn user_id(&self) -> &str {
        &self.user
    }

    async fn reply(&self, fragments: &[Fragment]) -> Result<()> {
        if self.fail {
            bail!("chat connection closed");
        }
        self.log
            .lock()
            .unwrap()
            .push(Delivery::Fragments(fragments.to_vec()));
        Ok(())
    }

    async fn reply_image(&self, image: &ImageRef) -> Result<()> {
        if self.fail {
            bail!("chat connection closed");
        }
        self.log.lock().unwrap().push(Delivery::Image(image.clone()));
        Ok(())
    }
}
