// Streaming parser for the object storage bucket listing (ListAllMyBucketsResult)
// Single pass over the XML events, nothing is materialized beyond the names

use crate::error::{SyncError, SyncResult};
use crate::types::BucketId;
use quick_xml::events::Event;
use quick_xml::Reader;

/// Element whose text holds a bucket name
const NAME_TAG: &[u8] = b"Name";

/// Names found in a listing, plus the parse error that stopped the scan, if any.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BucketListing {
    pub names: Vec<BucketId>,
    pub error: Option<String>,
}

impl BucketListing {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    /// Strict view: a malformed document is an error even if some names were read.
    pub fn into_result(self) -> SyncResult<Vec<BucketId>> {
        match self.error {
            Some(error) => Err(SyncError::Parse(error)),
            None => Ok(self.names),
        }
    }

    /// Best-effort view: whatever was read before a parse error.
    pub fn into_partial(self) -> Vec<BucketId> {
        self.names
    }
}

/// Parse a bucket listing document.
///
/// Never fails: on malformed XML the error is logged and recorded in the
/// returned listing together with every name committed before it.
pub fn parse_bucket_list(data: &[u8]) -> BucketListing {
    let mut reader = Reader::from_reader(data);
    let mut buf = Vec::new();

    let mut in_name = false;
    let mut pending = String::new();
    let mut listing = BucketListing::default();

    loop {
        let event = match reader.read_event_into(&mut buf) {
            Ok(event) => event,
            Err(e) => {
                let message = format!(
                    "malformed bucket listing at byte {}: {}",
                    reader.buffer_position(),
                    e
                );
                log::warn!("parseErrorOccurred: {}", message);
                listing.error = Some(message);
                break;
            }
        };

        match event {
            Event::Start(e) => {
                in_name = e.local_name().as_ref() == NAME_TAG;
            }
            Event::Empty(e) => {
                if e.local_name().as_ref() == NAME_TAG {
                    listing.names.push(String::new());
                }
                in_name = false;
            }
            Event::Text(e) => {
                if in_name {
                    match std::str::from_utf8(&e) {
                        Ok(text) => pending.push_str(text),
                        Err(err) => {
                            listing.error = Some(format!("bucket name is not utf-8: {}", err));
                            break;
                        }
                    }
                }
            }
            Event::CData(e) => {
                if in_name {
                    pending.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Event::GeneralRef(e) => {
                if in_name {
                    let name = String::from_utf8_lossy(&e);
                    match resolve_reference(&name) {
                        Some(resolved) => pending.push_str(&resolved),
                        None => {
                            let message = format!("unknown entity reference &{};", name);
                            log::warn!("parseErrorOccurred: {}", message);
                            listing.error = Some(message);
                            break;
                        }
                    }
                }
            }
            Event::End(e) => {
                if e.local_name().as_ref() == NAME_TAG {
                    listing.names.push(pending.trim().to_string());
                    pending.clear();
                }
                in_name = false;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    log::debug!(
        "Parsed {} bucket name(s) from listing",
        listing.names.len()
    );
    listing
}

// Predefined XML entities and numeric character references
fn resolve_reference(name: &str) -> Option<String> {
    let predefined = match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => None,
    };
    if let Some(c) = predefined {
        return Some(c.to_string());
    }

    let numeric = name.strip_prefix('#')?;
    let code = match numeric.strip_prefix('x').or_else(|| numeric.strip_prefix('X')) {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => numeric.parse::<u32>().ok()?,
    };
    char::from_u32(code).map(|c| c.to_string())
}
