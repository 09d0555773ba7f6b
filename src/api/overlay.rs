//! Overlay messages ("danmu") of one video part

use crate::crawler::{Endpoint, Request, Transport, TransportError};
use crate::model::{local_from_epoch, OverlayMessage};
use scraper::{Html, Selector};

/// Minimum number of comma-separated fields in a `p` attribute
const MIN_P_FIELDS: usize = 5;

pub fn overlay_request(bvid: &str, cid: u64) -> Request {
    Request::new(Endpoint::OverlayList)
        .param("oid", cid)
        .about(bvid)
}

/// Parses the overlay list document
///
/// Each message is `<d p="offset,mode,size,color,send_ts,pool,hash,id">text</d>`.
/// Entries whose `p` is too short or whose offset or send time does not
/// parse are dropped. The result keeps document order; sorting by offset is
/// left to presentation.
pub fn parse_overlay_list(content_id: &str, xml: &str) -> Vec<OverlayMessage> {
    let Ok(selector) = Selector::parse("d[p]") else {
        return Vec::new();
    };
    let document = Html::parse_fragment(xml);

    document
        .select(&selector)
        .filter_map(|element| {
            let p = element.value().attr("p")?;
            let fields: Vec<&str> = p.split(',').collect();
            if fields.len() < MIN_P_FIELDS {
                tracing::debug!("{}: dropping overlay with short p=\"{}\"", content_id, p);
                return None;
            }

            let offset_secs = fields[0].trim().parse::<f64>().ok().filter(|o| o.is_finite() && *o >= 0.0);
            let sent_at = fields[4].trim().parse::<i64>().ok().and_then(local_from_epoch);
            let (Some(offset_secs), Some(sent_at)) = (offset_secs, sent_at) else {
                tracing::debug!("{}: dropping overlay with unparsable p=\"{}\"", content_id, p);
                return None;
            };

            Some(OverlayMessage {
                content_id: content_id.to_string(),
                offset_secs,
                text: element.text().collect::<String>(),
                sent_at: Some(sent_at),
            })
        })
        .collect()
}

/// Fetches every overlay message of the part `cid`
pub async fn fetch_overlays(
    transport: &dyn Transport,
    bvid: &str,
    cid: u64,
) -> Result<Vec<OverlayMessage>, TransportError> {
    let response = transport.fetch(&overlay_request(bvid, cid)).await?;
    let body = response.text().unwrap_or_default();
    if !body.contains("<i") {
        return Err(TransportError::malformed(
            &response.url,
            "overlay list is not an <i> document",
            body,
        ));
    }
    Ok(parse_overlay_list(bvid, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::format_local;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<i><chatserver>chat.bilibili.com</chatserver><chatid>279786</chatid>
<d p="12.345,1,25,16777215,1704067200,0,abc123,1001">第一条 &amp; more</d>
<d p="12.9,1,25,16777215,1704067260,0,def456,1002">同一秒</d>
<d p="3.0,1,25,16777215">too short</d>
<d p="x,1,25,16777215,1704067200,0,a,1">bad offset</d>
<d p="1.5,5,25,16777215,1704067300,0,ghi789,1003">top</d>
</i>"#;

    #[test]
    fn test_parse_overlay_list() {
        let messages = parse_overlay_list("BV1xx411c7mD", SAMPLE);

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].offset_secs, 12.345);
        assert_eq!(messages[0].text, "第一条 & more");
        assert_eq!(
            format_local(&messages[0].sent_at.unwrap()),
            "2024-01-01 08:00:00"
        );
        assert_eq!(messages[2].offset_secs, 1.5);
        assert!(messages.iter().all(|m| m.content_id == "BV1xx411c7mD"));
    }

    #[test]
    fn test_parse_empty_list() {
        assert!(parse_overlay_list("BV1", "<i></i>").is_empty());
    }

    #[test]
    fn test_overlay_request() {
        let request = overlay_request("BV1xx411c7mD", 279786);
        assert_eq!(request.endpoint, Endpoint::OverlayList);
        assert_eq!(request.query, vec![("oid", "279786".to_string())]);
    }
}
