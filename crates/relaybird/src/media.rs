//! Picks the file to re-upload for each attachment.

use relaybird_protocol::truncate_caption;
use tracing::debug;

use crate::event::{MediaKind, MediaRef, MediaVariant};

/// An attachment ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedMedia {
    pub media_key: String,
    pub url: String,
    /// Caption, truncated to the downstream limit.
    pub alt_text: Option<String>,
}

/// Choose an upload source for each attachment, keeping attachment order.
///
/// Photos use their direct URL and videos their best MP4 variant. Anything
/// without a usable source is skipped.
pub fn select_media(attachments: &[MediaRef]) -> Vec<SelectedMedia> {
    attachments.iter().filter_map(select_one).collect()
}

fn select_one(media: &MediaRef) -> Option<SelectedMedia> {
    let url = match media.kind {
        MediaKind::Photo => match &media.direct_url {
            Some(url) => url.clone(),
            None => {
                debug!(media_key = %media.media_key, "Skipping photo without URL");
                return None;
            }
        },
        MediaKind::Video => match best_mp4_variant(&media.variants) {
            Some(variant) => variant.url.clone(),
            None => {
                debug!(media_key = %media.media_key, "Skipping video without MP4 variant");
                return None;
            }
        },
        MediaKind::Other => {
            debug!(media_key = %media.media_key, "Skipping unsupported media kind");
            return None;
        }
    };

    Some(SelectedMedia {
        media_key: media.media_key.clone(),
        url,
        alt_text: media.alt_text.as_deref().map(truncate_caption),
    })
}

/// Highest bit rate MP4 variant. Ties go to the earlier variant; a missing
/// bit rate counts as zero.
pub fn best_mp4_variant(variants: &[MediaVariant]) -> Option<&MediaVariant> {
    variants
        .iter()
        .filter(|v| is_mp4(&v.content_type))
        .fold(None, |best: Option<&MediaVariant>, v| match best {
            Some(b) if b.bit_rate.unwrap_or(0) >= v.bit_rate.unwrap_or(0) => Some(b),
            _ => Some(v),
        })
}

fn is_mp4(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("video/mp4"))
}
