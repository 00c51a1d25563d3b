//! Image persistence for harvested items

use crate::crawl::{ContentKind, CrawlContext, CrawlError};
use crate::fetch::Requester;
use crate::objects::ObjectStore;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Where item images are downloaded from and written to
#[derive(Clone)]
pub struct MediaSink {
    requester: Arc<dyn Requester>,
    objects: Arc<dyn ObjectStore>,
    timeout: Duration,
}

impl MediaSink {
    pub fn new(
        requester: Arc<dyn Requester>,
        objects: Arc<dyn ObjectStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            requester,
            objects,
            timeout,
        }
    }
}

/// Links to use in the item text, in image order
#[derive(Debug, Clone, PartialEq)]
pub struct MediaOutcome {
    pub links: Vec<String>,
    /// False if any image kept its remote link because the download failed
    pub complete: bool,
}

/// Object key for the `index`-th image of an item
pub fn media_key(kind: ContentKind, item_id: &str, index: usize, src: &str) -> String {
    format!("{}/{}/{}.{}", kind.as_str(), item_id, index, extension_of(src))
}

fn extension_of(src: &str) -> String {
    Url::parse(src)
        .ok()
        .and_then(|u| {
            u.path()
                .rsplit('/')
                .next()
                .and_then(|name| name.rsplit_once('.'))
                .map(|(_, ext)| ext.to_ascii_lowercase())
        })
        .filter(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "jpg".to_string())
}

async fn download(
    sink: &MediaSink,
    src: &str,
    key: &str,
    ctx: &CrawlContext,
) -> Result<u64, CrawlError> {
    let mut stream = sink.requester.stream(src, ctx).await?;
    let written = sink
        .objects
        .save_stream(key, stream.body.as_mut(), stream.size)
        .await?;
    Ok(written)
}

/// Streams every image into the object store, each bounded by the sink timeout
pub async fn persist_media(
    sink: &MediaSink,
    kind: ContentKind,
    item_id: &str,
    images: &[String],
    ctx: &CrawlContext,
) -> MediaOutcome {
    let mut links = Vec::with_capacity(images.len());
    let mut complete = true;

    for (index, src) in images.iter().enumerate() {
        let key = media_key(kind, item_id, index, src);

        match tokio::time::timeout(sink.timeout, download(sink, src, &key, ctx)).await {
            Ok(Ok(bytes)) => {
                tracing::debug!("Stored image {} as {} ({} bytes)", src, key, bytes);
                links.push(sink.objects.public_url(&key));
            }
            Ok(Err(e)) => {
                tracing::warn!("Failed to store image {} of {} {}: {}", src, kind, item_id, e);
                links.push(src.clone());
                complete = false;
            }
            Err(_) => {
                tracing::warn!(
                    "Download of {} timed out after {:?}",
                    src,
                    sink.timeout
                );
                links.push(src.clone());
                complete = false;
            }
        }
    }

    MediaOutcome { links, complete }
}
