//! XML response deserialization for the Azure Blob Storage API.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::date::parse_http_date;
use crate::error::{ErrorCode, StorageError, StorageResult};
use crate::models::{BlobItem, BlobListing, BlobProperties, BlobType};

/// Parses a List Blobs `EnumerationResults` document.
pub fn parse_blob_list(xml: &str) -> StorageResult<BlobListing> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut listing = BlobListing::default();
    let mut buf = Vec::new();
    let mut path: Vec<String> = Vec::new();
    let mut current_text = String::new();

    let mut blob_name = String::new();
    let mut props = BlobProperties::new(0);
    let mut prefix_name = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match name.as_str() {
                    "Blob" => {
                        blob_name.clear();
                        props = BlobProperties::new(0);
                        props.etag.clear();
                    }
                    "BlobPrefix" => prefix_name.clear(),
                    _ => {}
                }
                path.push(name);
                current_text.clear();
            }
            Ok(Event::Text(e)) => {
                current_text = e
                    .unescape()
                    .map_err(|_| StorageError::new(ErrorCode::InvalidInput))?
                    .to_string();
            }
            Ok(Event::End(_)) => {
                let path_str: Vec<&str> = path.iter().map(|s| s.as_str()).collect();

                match path_str.as_slice() {
                    [.., "Blob", "Name"] => blob_name = current_text.clone(),
                    [.., "BlobPrefix", "Name"] => prefix_name = current_text.clone(),
                    [.., "Properties", "Creation-Time"] => {
                        if let Some(dt) = parse_http_date(&current_text) {
                            props.created_on = dt;
                        }
                    }
                    [.., "Properties", "Last-Modified"] => {
                        if let Some(dt) = parse_http_date(&current_text) {
                            props.last_modified = dt;
                        }
                    }
                    [.., "Properties", "Etag"] => props.etag = current_text.clone(),
                    [.., "Properties", "Content-Length"] => {
                        props.content_length = current_text.parse().unwrap_or(0);
                    }
                    [.., "Properties", "Content-Type"] => {
                        props.content_type = non_empty(&current_text);
                    }
                    [.., "Properties", "Content-MD5"] => {
                        props.content_md5 = non_empty(&current_text);
                    }
                    [.., "Properties", "Cache-Control"] => {
                        props.cache_control = non_empty(&current_text);
                    }
                    [.., "Properties", "BlobType"] => {
                        props.blob_type = BlobType::from_str(&current_text).unwrap_or_default();
                    }
                    [.., "Blobs", "Blob"] => listing.blobs.push(BlobItem {
                        name: std::mem::take(&mut blob_name),
                        properties: props.clone(),
                    }),
                    [.., "Blobs", "BlobPrefix"] => {
                        listing.prefixes.push(std::mem::take(&mut prefix_name));
                    }
                    ["EnumerationResults", "NextMarker"] => {
                        listing.next_marker = non_empty(&current_text);
                    }
                    _ => {}
                }

                path.pop();
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(_) => return Err(StorageError::with_message(
                ErrorCode::InvalidInput,
                "Malformed List Blobs response",
            )),
            _ => {}
        }
        buf.clear();
    }

    Ok(listing)
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<EnumerationResults ServiceEndpoint="http://127.0.0.1:10000/devstoreaccount1/" ContainerName="media">
  <Prefix>images/</Prefix>
  <MaxResults>2</MaxResults>
  <Delimiter>/</Delimiter>
  <Blobs>
    <Blob>
      <Name>images/a &amp; b.jpg</Name>
      <Properties>
        <Creation-Time>Sat, 27 Jan 2024 12:34:56 GMT</Creation-Time>
        <Last-Modified>Sun, 28 Jan 2024 08:00:00 GMT</Last-Modified>
        <Etag>"0x1"</Etag>
        <Content-Length>42</Content-Length>
        <Content-Type>image/jpeg</Content-Type>
        <Content-MD5 />
        <Cache-Control>public, max-age=86400</Cache-Control>
        <BlobType>BlockBlob</BlobType>
      </Properties>
    </Blob>
    <BlobPrefix><Name>images/2024/</Name></BlobPrefix>
  </Blobs>
  <NextMarker>images/z.jpg</NextMarker>
</EnumerationResults>"#;

    #[test]
    fn test_parse_blob_list() {
        let listing = parse_blob_list(LISTING).unwrap();
        assert_eq!(listing.blobs.len(), 1);

        let blob = &listing.blobs[0];
        assert_eq!(blob.name, "images/a & b.jpg");
        assert_eq!(blob.properties.content_length, 42);
        assert_eq!(blob.properties.content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(blob.properties.content_md5, None);
        assert_eq!(blob.properties.etag, "\"0x1\"");
        assert_eq!(
            blob.properties.created_on.to_rfc3339(),
            "2024-01-27T12:34:56+00:00"
        );
        assert_eq!(
            blob.properties.last_modified.to_rfc3339(),
            "2024-01-28T08:00:00+00:00"
        );

        assert_eq!(listing.prefixes, vec!["images/2024/".to_string()]);
        assert_eq!(listing.next_marker.as_deref(), Some("images/z.jpg"));
    }

    #[test]
    fn test_parse_empty_listing() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?><EnumerationResults><Blobs /><NextMarker /></EnumerationResults>"#;
        let listing = parse_blob_list(xml).unwrap();
        assert_eq!(listing, BlobListing::default());
    }

    #[test]
    fn test_parse_rejects_malformed_xml() {
        assert!(parse_blob_list("<EnumerationResults><Blobs></Wrong>").is_err());
    }
}
