use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Layout of the storage provider's `Last-Modified` header, minus the zone.
/// `%A` also accepts the abbreviated weekday, `%b` is the abbreviated month.
const LAST_MODIFIED_FORMAT: &str = "%A, %d %b %Y %H:%M:%S";

/// Parse a `Last-Modified` header such as `Wed, 21 Oct 2015 07:28:00 GMT`.
pub fn parse_last_modified(value: &str) -> SyncResult<DateTime<Utc>> {
    let value = value.trim();
    let (stamp, zone) = value
        .rsplit_once(' ')
        .ok_or_else(|| SyncError::Parse(format!("Last-Modified '{}' has no time zone", value)))?;

    if !matches!(zone, "GMT" | "UTC") {
        return Err(SyncError::Parse(format!(
            "Last-Modified '{}' is not in GMT",
            value
        )));
    }

    let naive = NaiveDateTime::parse_from_str(stamp, LAST_MODIFIED_FORMAT)
        .map_err(|e| SyncError::Parse(format!("Last-Modified '{}': {}", value, e)))?;

    Ok(Utc.from_utc_datetime(&naive))
}

/// Calculate SHA-256 checksum of a file
pub fn calculate_sha256(file_path: &Path) -> SyncResult<String> {
    let file = File::open(file_path)
        .map_err(|e| SyncError::fs("Failed to open file for checksum", file_path, e))?;

    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .map_err(|e| SyncError::fs("Failed to read file for checksum", file_path, e))?;

        if bytes_read == 0 {
            break;
        }

        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn parses_abbreviated_weekday() {
        let date = parse_last_modified("Wed, 21 Oct 2015 07:28:00 GMT").unwrap();
        assert_eq!(date, Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap());
    }

    #[test]
    fn parses_full_weekday() {
        let date = parse_last_modified("Tuesday, 15 Nov 1994 08:12:31 GMT").unwrap();
        assert_eq!(date.year(), 1994);
        assert_eq!(date, Utc.with_ymd_and_hms(1994, 11, 15, 8, 12, 31).unwrap());
    }

    #[test]
    fn rejects_other_zones() {
        assert!(matches!(
            parse_last_modified("Wed, 21 Oct 2015 07:28:00 PST"),
            Err(SyncError::Parse(_))
        ));
    }

    #[test]
    fn rejects_iso_dates() {
        assert!(parse_last_modified("2015-10-21T07:28:00Z").is_err());
        assert!(parse_last_modified("").is_err());
    }

    #[test]
    fn rejects_wrong_weekday() {
        // 21 Oct 2015 was a Wednesday
        assert!(parse_last_modified("Fri, 21 Oct 2015 07:28:00 GMT").is_err());
    }

    #[test]
    fn checksum_of_known_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.mlmodel");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            calculate_sha256(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
