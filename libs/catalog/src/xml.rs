//! XML interchange used by course export and import
//!
//! One video travels as a single element:
//!
//! ```xml
//! <edx_video client_video_id="Shallow Swordfish" duration="122.0" status="test">
//!   <encoded_videos>
//!     <encoded_video profile="mobile" url="http://example.com/fish.mp4" file_size="11" bitrate="22"/>
//!   </encoded_videos>
//! </edx_video>
//! ```
//!
//! The video id is not part of the element; the importing side supplies it.
//! Course links and subtitles are never exported.

use std::collections::HashMap;
use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::error::FieldError;
use crate::models::{EncodedVideo, EncodedVideoPayload, Video, VideoPayload};

const VIDEO_TAG: &str = "edx_video";
const VARIANTS_TAG: &str = "encoded_videos";
const VARIANT_TAG: &str = "encoded_video";

fn invalid(e: impl fmt::Display) -> FieldError {
    FieldError::InvalidXml(e.to_string())
}

/// Write `video` and its variants as an `edx_video` element
pub fn write_video(video: &Video, variants: &[EncodedVideo]) -> Result<String, FieldError> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    // `{:?}` keeps the fractional part of whole durations ("122.0").
    let duration = format!("{:?}", video.duration);
    let root = BytesStart::new(VIDEO_TAG).with_attributes([
        ("client_video_id", video.client_video_id.as_str()),
        ("duration", duration.as_str()),
        ("status", video.status.as_str()),
    ]);
    writer.write_event(Event::Start(root)).map_err(invalid)?;
    writer
        .write_event(Event::Start(BytesStart::new(VARIANTS_TAG)))
        .map_err(invalid)?;

    for variant in variants {
        let file_size = variant.file_size.to_string();
        let bitrate = variant.bitrate.to_string();
        let element = BytesStart::new(VARIANT_TAG).with_attributes([
            ("profile", variant.profile_name.as_str()),
            ("url", variant.url.as_str()),
            ("file_size", file_size.as_str()),
            ("bitrate", bitrate.as_str()),
        ]);
        writer.write_event(Event::Empty(element)).map_err(invalid)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new(VARIANTS_TAG)))
        .map_err(invalid)?;
    writer
        .write_event(Event::End(BytesEnd::new(VIDEO_TAG)))
        .map_err(invalid)?;

    String::from_utf8(writer.into_inner().into_inner()).map_err(invalid)
}

fn attributes(element: &BytesStart<'_>) -> Result<HashMap<String, String>, FieldError> {
    let mut values = HashMap::new();
    for attribute in element.attributes() {
        let attribute = attribute.map_err(invalid)?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute.unescape_value().map_err(invalid)?.into_owned();
        values.insert(key, value);
    }
    Ok(values)
}

fn number<T: FromStr>(
    values: &mut HashMap<String, String>,
    tag: &str,
    name: &str,
) -> Result<Option<T>, FieldError> {
    match values.remove(name) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
            FieldError::InvalidXml(format!("{} of <{}> is not a number: {}", name, tag, raw))
        }),
    }
}

fn video_payload(element: &BytesStart<'_>) -> Result<VideoPayload, FieldError> {
    let mut values = attributes(element)?;
    Ok(VideoPayload {
        duration: number(&mut values, VIDEO_TAG, "duration")?,
        client_video_id: values.remove("client_video_id"),
        status: values.remove("status"),
        encoded_videos: Some(Vec::new()),
        ..VideoPayload::default()
    })
}

fn variant_payload(element: &BytesStart<'_>) -> Result<EncodedVideoPayload, FieldError> {
    let mut values = attributes(element)?;
    Ok(EncodedVideoPayload {
        file_size: number(&mut values, VARIANT_TAG, "file_size")?,
        bitrate: number(&mut values, VARIANT_TAG, "bitrate")?,
        profile: values.remove("profile"),
        url: values.remove("url"),
        metadata: None,
    })
}

/// Read the first `edx_video` element of `xml`.
///
/// Returns `Ok(None)` for well-formed XML without one. Numeric attributes are
/// parsed here, so the payload only needs the usual field validation.
pub fn read_video(xml: &str) -> Result<Option<VideoPayload>, FieldError> {
    let mut reader = Reader::from_str(xml);
    let mut video: Option<VideoPayload> = None;
    let mut in_variants = false;

    loop {
        let event = reader.read_event().map_err(invalid)?;
        match event {
            Event::Start(ref element) | Event::Empty(ref element) => {
                let empty = matches!(event, Event::Empty(_));
                let name = element.name();
                let name = name.as_ref();

                if video.is_none() {
                    if name == VIDEO_TAG.as_bytes() {
                        video = Some(video_payload(element)?);
                        if empty {
                            break;
                        }
                    }
                } else if name == VARIANTS_TAG.as_bytes() {
                    in_variants = !empty;
                } else if in_variants && name == VARIANT_TAG.as_bytes() {
                    let variant = variant_payload(element)?;
                    if let Some(variants) = video.as_mut().and_then(|v| v.encoded_videos.as_mut()) {
                        variants.push(variant);
                    }
                }
            }
            Event::End(ref element) if video.is_some() => {
                let name = element.name();
                if name.as_ref() == VARIANTS_TAG.as_bytes() {
                    in_variants = false;
                } else if name.as_ref() == VIDEO_TAG.as_bytes() {
                    break;
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(video)
}
