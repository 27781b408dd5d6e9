//! Media compatibility: turning stored media parts into provider-ready
//! fragments, degrading gracefully when a model cannot consume them, and
//! uploading anything that does not yet have a stable remote URL.
//!
//! Providers differ wildly in whether they accept inline media, require
//! pre-uploaded URLs, or reject media outright; centralizing the transcoding
//! here keeps vendor quirks out of the coordinator.

use async_trait::async_trait;
use futures::future::join_all;
use tracing::warn;

use crate::conversation::message::{ContentPart, Message};
use crate::conversation::session::SessionId;
use crate::conversation::store::MessageStore;
use crate::error::EngineError;
use crate::model::CapabilityInfo;
use crate::providers::base::Fragment;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackStrategy {
    /// Substitute the stored help text, plus a lightweight proxy (a video's
    /// first frame) when the model at least accepts images.
    HelpPrompt,
    /// Drop the media from context entirely.
    Skip,
}

#[derive(Debug, Clone)]
pub struct UploadedMedia {
    pub url: String,
    pub extra_headers: Vec<(String, String)>,
}

/// Uploads on-device media to somewhere the provider can fetch it from.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, local_path: &str) -> anyhow::Result<UploadedMedia>;
}

/// Native representation of a media part for a model with the given
/// capabilities. `None` means the model cannot accept this media type and
/// the caller should fall back.
pub fn to_native_fragment(part: &ContentPart, caps: &CapabilityInfo) -> Option<Fragment> {
    match part {
        ContentPart::Image(image) if caps.supports_vision => {
            image.url.as_ref().map(|url| Fragment::ImageUrl { url: url.clone() })
        }
        ContentPart::Video(video) if caps.supports_video => {
            video.url.as_ref().map(|url| Fragment::VideoUrl { url: url.clone() })
        }
        _ => None,
    }
}

/// Degraded representation used when [`to_native_fragment`] returns `None`.
pub fn to_fallback_fragments(
    part: &ContentPart,
    caps: &CapabilityInfo,
    strategy: FallbackStrategy,
) -> Result<Vec<Fragment>, EngineError> {
    if strategy == FallbackStrategy::Skip {
        return match part {
            ContentPart::Image(_) | ContentPart::Video(_) | ContentPart::Document(_) => Ok(vec![]),
            other => Err(EngineError::UnsupportedMedia(other.kind_name())),
        };
    }
    match part {
        ContentPart::Image(image) => Ok(vec![Fragment::text(placeholder(
            "image",
            image.help_text.as_deref(),
        ))]),
        ContentPart::Video(video) => {
            let mut fragments = vec![Fragment::text(placeholder(
                "video",
                video.help_text.as_deref(),
            ))];
            if caps.supports_vision {
                if let Some(frame) = &video.first_frame_url {
                    fragments.push(Fragment::ImageUrl { url: frame.clone() });
                }
            }
            Ok(fragments)
        }
        ContentPart::Document(doc) => {
            let label = match doc.help_text.as_deref() {
                Some(help) if !help.is_empty() => format!("[file: {}] {}", doc.file_name, help),
                _ => format!("[file: {}]", doc.file_name),
            };
            Ok(vec![Fragment::text(label)])
        }
        other => Err(EngineError::UnsupportedMedia(other.kind_name())),
    }
}

fn placeholder(kind: &str, help_text: Option<&str>) -> String {
    match help_text {
        Some(help) if !help.is_empty() => help.to_string(),
        _ => format!("[{kind}]"),
    }
}

/// Make every media part of `message` available, uploading pending ones
/// through `uploader` and persisting the returned URLs.
///
/// Uploads run fully in parallel and are joined; a failed upload does not
/// cancel its siblings, but any failure fails the whole step since the
/// request cannot be built with media missing.
pub async fn ensure_available(
    store: &dyn MessageStore,
    uploader: &dyn Uploader,
    session: SessionId,
    message: &Message,
) -> Result<Message, EngineError> {
    let pending: Vec<(usize, String)> = message
        .parts
        .iter()
        .enumerate()
        .filter_map(|(idx, part)| {
            part.pending_local_path()
                .map(|path| (idx, path.to_string()))
        })
        .collect();

    if pending.is_empty() {
        return Ok(message.clone());
    }

    let uploads = pending.iter().map(|(idx, path)| async move {
        let result = uploader.upload(path).await;
        (*idx, result)
    });
    let results = join_all(uploads).await;

    let mut uploaded: Vec<(usize, UploadedMedia)> = Vec::with_capacity(results.len());
    let mut failures: Vec<String> = Vec::new();
    for (idx, result) in results {
        match result {
            Ok(media) => uploaded.push((idx, media)),
            Err(e) => {
                warn!(part = idx, "media upload failed: {e}");
                failures.push(e.to_string());
            }
        }
    }
    if !failures.is_empty() {
        return Err(EngineError::Upload(failures.join("; ")));
    }

    let updated = store
        .update(
            session,
            message.id,
            Box::new(move |msg| {
                for (idx, media) in uploaded {
                    match msg.parts.get_mut(idx) {
                        Some(ContentPart::Image(p)) => p.url = Some(media.url),
                        Some(ContentPart::Video(p)) => p.url = Some(media.url),
                        Some(ContentPart::Document(p)) => p.url = Some(media.url),
                        _ => {}
                    }
                }
            }),
        )
        .await?;
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::message::{ImagePart, VideoPart};
    use crate::conversation::store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn image(url: Option<&str>, help: Option<&str>) -> ContentPart {
        ContentPart::Image(ImagePart {
            local_path: Some("/tmp/a.png".to_string()),
            url: url.map(str::to_string),
            help_text: help.map(str::to_string),
        })
    }

    fn video(help: Option<&str>, first_frame: Option<&str>) -> ContentPart {
        ContentPart::Video(VideoPart {
            local_path: Some("/tmp/v.mp4".to_string()),
            url: Some("https://cdn.example.com/v.mp4".to_string()),
            help_text: help.map(str::to_string),
            first_frame_url: first_frame.map(str::to_string),
        })
    }

    #[test]
    fn native_fragment_requires_capability_and_url() {
        let vision = CapabilityInfo::vision(128_000);
        let blind = CapabilityInfo::text_only(128_000);
        let part = image(Some("https://cdn.example.com/a.png"), None);

        assert!(matches!(
            to_native_fragment(&part, &vision),
            Some(Fragment::ImageUrl { .. })
        ));
        assert_eq!(to_native_fragment(&part, &blind), None);
        assert_eq!(to_native_fragment(&image(None, None), &vision), None);
    }

    #[test]
    fn video_needs_video_capability_not_just_vision() {
        let vision = CapabilityInfo::vision(128_000);
        let multimodal = CapabilityInfo::multimodal(128_000);
        let part = video(None, None);
        assert_eq!(to_native_fragment(&part, &vision), None);
        assert!(to_native_fragment(&part, &multimodal).is_some());
    }

    #[test]
    fn help_prompt_substitutes_help_text() {
        let blind = CapabilityInfo::text_only(128_000);
        let part = image(None, Some("a cat on a sofa"));
        let fragments =
            to_fallback_fragments(&part, &blind, FallbackStrategy::HelpPrompt).unwrap();
        assert_eq!(fragments, vec![Fragment::text("a cat on a sofa")]);
    }

    #[test]
    fn skip_drops_media_entirely() {
        let blind = CapabilityInfo::text_only(128_000);
        let part = image(None, Some("a cat on a sofa"));
        let fragments = to_fallback_fragments(&part, &blind, FallbackStrategy::Skip).unwrap();
        assert!(fragments.is_empty());
    }

    #[test]
    fn video_fallback_adds_first_frame_proxy_on_vision_models() {
        let vision = CapabilityInfo::vision(128_000);
        let part = video(Some("a timelapse"), Some("https://cdn.example.com/f.jpg"));
        let fragments =
            to_fallback_fragments(&part, &vision, FallbackStrategy::HelpPrompt).unwrap();
        assert_eq!(fragments.len(), 2);
        assert!(fragments[1] == Fragment::ImageUrl { url: "https://cdn.example.com/f.jpg".to_string() });

        let blind = CapabilityInfo::text_only(128_000);
        let fragments =
            to_fallback_fragments(&part, &blind, FallbackStrategy::HelpPrompt).unwrap();
        assert_eq!(fragments.len(), 1);
    }

    #[test]
    fn non_media_part_has_no_handler() {
        let caps = CapabilityInfo::text_only(128_000);
        let err = to_fallback_fragments(
            &ContentPart::error("boom"),
            &caps,
            FallbackStrategy::HelpPrompt,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedMedia("error")));
    }

    struct CountingUploader {
        calls: AtomicUsize,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl Uploader for CountingUploader {
        async fn upload(&self, local_path: &str) -> anyhow::Result<UploadedMedia> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on == Some(local_path) {
                anyhow::bail!("upload refused for {local_path}");
            }
            Ok(UploadedMedia {
                url: format!("https://cdn.example.com{local_path}"),
                extra_headers: vec![],
            })
        }
    }

    #[tokio::test]
    async fn uploads_run_for_every_pending_part_and_persist_urls() {
        let store = MemoryStore::new();
        let id = store.allocate_id(1).await.unwrap();
        let message = Message::new(id, 1)
            .with_text("look")
            .with_part(image(None, None))
            .with_part(ContentPart::Image(ImagePart {
                local_path: Some("/tmp/b.png".to_string()),
                url: None,
                help_text: None,
            }));
        store.insert(1, message.clone()).await.unwrap();

        let uploader = Arc::new(CountingUploader {
            calls: AtomicUsize::new(0),
            fail_on: None,
        });
        let updated = ensure_available(&store, uploader.as_ref(), 1, &message)
            .await
            .unwrap();

        assert_eq!(uploader.calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            updated.parts[1].remote_url(),
            Some("https://cdn.example.com/tmp/a.png")
        );
        assert_eq!(
            updated.parts[2].remote_url(),
            Some("https://cdn.example.com/tmp/b.png")
        );
        // Persisted, not just returned.
        let stored = store.get(1, id).await.unwrap().unwrap();
        assert_eq!(stored, updated);
    }

    #[tokio::test]
    async fn one_failed_upload_fails_the_step_but_not_before_siblings_ran() {
        let store = MemoryStore::new();
        let id = store.allocate_id(1).await.unwrap();
        let message = Message::new(id, 1)
            .with_part(image(None, None))
            .with_part(ContentPart::Image(ImagePart {
                local_path: Some("/tmp/b.png".to_string()),
                url: None,
                help_text: None,
            }));
        store.insert(1, message.clone()).await.unwrap();

        let uploader = Arc::new(CountingUploader {
            calls: AtomicUsize::new(0),
            fail_on: Some("/tmp/a.png"),
        });
        let err = ensure_available(&store, uploader.as_ref(), 1, &message)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Upload(_)));
        assert_eq!(uploader.calls.load(Ordering::SeqCst), 2);
    }
}
