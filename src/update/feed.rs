//! Update feed fetching and decoding.
//!
//! The server answers `204 No Content` (or an empty `2xx` body) when the
//! caller is up to date, and a JSON release description otherwise.

use crate::error::{Error, Result};
use crate::update::transport::{HttpResponse, HttpTransport};
use crate::update::{ReleaseInfo, UpdateRequest};
use bytes::Bytes;
use tracing::{debug, warn};

/// HTTP status used by the server to signal "no update available".
const NO_CONTENT: u16 = 204;

/// Outcome of fetching the feed.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedResponse<U> {
    /// The server described a release.
    Available(U),
    /// The server has nothing to offer.
    NoUpdate,
}

/// Fetch the feed described by `request` and decode it into `U`.
///
/// # Errors
///
/// - [`Error::Transport`] if no response was received
/// - [`Error::InvalidServerResponse`] for a non-`2xx` status
/// - [`Error::InvalidServerBody`] if the body is not text
/// - [`Error::InvalidJson`] if the body does not decode into `U`
pub async fn fetch_update<U: ReleaseInfo>(
    transport: &dyn HttpTransport,
    request: &UpdateRequest,
) -> Result<FeedResponse<U>> {
    let response = transport.send(request).await?;
    classify_response(response)
}

fn classify_response<U: ReleaseInfo>(response: HttpResponse) -> Result<FeedResponse<U>> {
    let HttpResponse { status, body } = response;

    if !(200..300).contains(&status) {
        warn!("Update server responded with status {status}");
        return Err(Error::InvalidServerResponse { status, body });
    }

    if status == NO_CONTENT || body.iter().all(u8::is_ascii_whitespace) {
        debug!("Update server reports no update (status {status})");
        return Ok(FeedResponse::NoUpdate);
    }

    decode_update(body).map(FeedResponse::Available)
}

/// Decode a feed body into `U`.
///
/// # Errors
///
/// Returns [`Error::InvalidServerBody`] if the body is not UTF-8, and
/// [`Error::InvalidJson`] if it is not JSON or does not match `U`. The
/// latter carries the JSON object whenever the body parsed as JSON.
pub fn decode_update<U: ReleaseInfo>(body: Bytes) -> Result<U> {
    if let Err(e) = std::str::from_utf8(&body) {
        return Err(Error::InvalidServerBody {
            body,
            reason: format!("body is not UTF-8: {e}"),
        });
    }

    let object: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(source) => {
            return Err(Error::InvalidJson {
                body,
                object: None,
                source,
            })
        }
    };

    match U::deserialize(&object) {
        Ok(update) => {
            debug!("Decoded update feed entry for version {}", update.version());
            Ok(update)
        }
        Err(source) => Err(Error::InvalidJson {
            body,
            object: Some(object),
            source,
        }),
    }
}
