//! End-to-end SegmentBase resolution against a mock origin: parse the
//! manifest, then let `create_segment_index` fetch and parse the container
//! index bytes.

use hibiki::{DashConfig, DashParser, HttpClient};
use url::Url;
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, ResponseTemplate,
};

/// A version-0 sidx with `reference_count` one-second, 1000-byte references
/// at timescale 90000.
fn sidx_bytes(reference_count: u16) -> Vec<u8> {
    let size = 32 + reference_count as u32 * 12;
    let mut data = Vec::new();
    data.extend_from_slice(&size.to_be_bytes());
    data.extend_from_slice(b"sidx");
    data.extend_from_slice(&[0u8; 4]); // version + flags
    data.extend_from_slice(&1u32.to_be_bytes()); // reference id
    data.extend_from_slice(&90_000u32.to_be_bytes()); // timescale
    data.extend_from_slice(&0u32.to_be_bytes()); // earliest presentation time
    data.extend_from_slice(&0u32.to_be_bytes()); // first offset
    data.extend_from_slice(&0u16.to_be_bytes()); // reserved
    data.extend_from_slice(&reference_count.to_be_bytes());
    for _ in 0..reference_count {
        data.extend_from_slice(&1000u32.to_be_bytes()); // type 0 + size
        data.extend_from_slice(&90_000u32.to_be_bytes()); // duration
        data.extend_from_slice(&0u32.to_be_bytes()); // sap
    }
    data
}

fn ebml_element(id: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut data = id.to_vec();
    data.push(0x80 | payload.len() as u8);
    data.extend_from_slice(payload);
    data
}

fn ebml_uint(id: &[u8], value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(7);
    ebml_element(id, &bytes[start..])
}

/// Minimal WebM init segment: EBML header with a webm DocType, then a
/// Segment > Info with TimecodeScale 1ms and a 2000-unit Duration.
fn webm_init_bytes() -> Vec<u8> {
    let header = ebml_element(
        &[0x1A, 0x45, 0xDF, 0xA3],
        &ebml_element(&[0x42, 0x82], b"webm"),
    );
    let mut info_payload = ebml_uint(&[0x2A, 0xD7, 0xB1], 1_000_000);
    info_payload.extend_from_slice(&ebml_element(&[0x44, 0x89], &2000.0f32.to_be_bytes()));
    let info = ebml_element(&[0x15, 0x49, 0xA9, 0x66], &info_payload);
    let segment = ebml_element(&[0x18, 0x53, 0x80, 0x67], &info);

    let mut data = header;
    data.extend_from_slice(&segment);
    data
}

/// Cues with cue points at 0 and 1000 units, clusters at bytes 100 and 500.
fn webm_cues_bytes() -> Vec<u8> {
    let mut payload = Vec::new();
    for (time, offset) in [(0u64, 100u64), (1000, 500)] {
        let mut cue = ebml_uint(&[0xB3], time);
        let positions = ebml_uint(&[0xF1], offset);
        cue.extend_from_slice(&ebml_element(&[0xB7], &positions));
        payload.extend_from_slice(&ebml_element(&[0xBB], &cue));
    }
    ebml_element(&[0x1C, 0x53, 0xBB, 0x6B], &payload)
}

#[tokio::test]
async fn resolves_an_mp4_segment_base_over_http() {
    let server = MockServer::start().await;
    let sidx = sidx_bytes(2);
    let sidx_len = sidx.len();

    Mock::given(method("GET"))
        .and(path("/media/v1.mp4"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(sidx))
        .mount(&server)
        .await;

    let xml = format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
        <MPD type="static" mediaPresentationDuration="PT2S">
          <Period id="p0">
            <AdaptationSet contentType="video" mimeType="video/mp4">
              <Representation id="v1" bandwidth="2000000" width="1920" height="1080">
                <BaseURL>media/v1.mp4</BaseURL>
                <SegmentBase indexRange="0-{}">
                  <Initialization range="0-33"/>
                </SegmentBase>
              </Representation>
            </AdaptationSet>
          </Period>
        </MPD>"#,
        sidx_len - 1
    );
    let mpd = dash_mpd::parse(&xml).unwrap();
    let mpd_url = Url::parse(&format!("{}/manifest.mpd", server.uri())).unwrap();

    let mut parser = DashParser::new(HttpClient::default(), DashConfig::default());
    let manifest = parser.parse(&mpd, &mpd_url).await.unwrap();

    let stream = manifest.variants[0].video.as_ref().unwrap();
    assert_eq!(stream.segment_index.num_references(), 0);

    stream.create_segment_index().await.unwrap();
    let index = &stream.segment_index;
    assert_eq!(index.num_references(), 2);

    let first = index.get(0).unwrap();
    assert_eq!(first.start_time, 0.0);
    assert_eq!(first.end_time, 1.0);
    // media follows the sidx box
    assert_eq!(first.start_byte, sidx_len as u64);
    assert_eq!(first.end_byte, Some(sidx_len as u64 + 999));

    let init = first.init.as_ref().unwrap();
    assert_eq!(init.byte_range.as_ref().unwrap().to_http_range(), "bytes=0-33");
    assert_eq!(init.quality.width, Some(1920));

    // resolving again is a no-op
    stream.create_segment_index().await.unwrap();
    assert_eq!(index.num_references(), 2);
}

#[tokio::test]
async fn resolves_a_webm_segment_base_over_http() {
    let server = MockServer::start().await;
    let init = webm_init_bytes();
    let init_len = init.len();

    Mock::given(method("GET"))
        .and(path("/media/v1.webm"))
        .and(header("range", format!("bytes=0-{}", init_len - 1).as_str()))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(init))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/media/v1.webm"))
        .and(header("range", "bytes=4000-4999"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(webm_cues_bytes()))
        .mount(&server)
        .await;

    let xml = format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
        <MPD type="static" mediaPresentationDuration="PT2S">
          <Period id="p0">
            <AdaptationSet contentType="video" mimeType="video/webm">
              <Representation id="v1" bandwidth="1500000">
                <BaseURL>media/v1.webm</BaseURL>
                <SegmentBase indexRange="4000-4999">
                  <Initialization range="0-{}"/>
                </SegmentBase>
              </Representation>
            </AdaptationSet>
          </Period>
        </MPD>"#,
        init_len - 1
    );
    let mpd = dash_mpd::parse(&xml).unwrap();
    let mpd_url = Url::parse(&format!("{}/manifest.mpd", server.uri())).unwrap();

    let mut parser = DashParser::new(HttpClient::default(), DashConfig::default());
    let manifest = parser.parse(&mpd, &mpd_url).await.unwrap();

    let stream = manifest.variants[0].video.as_ref().unwrap();
    stream.create_segment_index().await.unwrap();

    let index = &stream.segment_index;
    assert_eq!(index.num_references(), 2);

    let first = index.get(0).unwrap();
    assert_eq!((first.start_time, first.end_time), (0.0, 1.0));
    assert_eq!(first.start_byte, 100);
    assert_eq!(first.end_byte, Some(499));

    let last = index.get(1).unwrap();
    assert_eq!((last.start_time, last.end_time), (1.0, 2.0));
    assert_eq!(last.end_byte, None);
}

#[tokio::test]
async fn webm_without_initialization_fails_the_representation() {
    let xml = r#"<?xml version="1.0" encoding="utf-8"?>
        <MPD type="static" mediaPresentationDuration="PT2S">
          <Period id="p0">
            <AdaptationSet contentType="video" mimeType="video/webm">
              <Representation id="v1" bandwidth="1500000">
                <BaseURL>media/v1.webm</BaseURL>
                <SegmentBase indexRange="4000-4999"/>
              </Representation>
            </AdaptationSet>
          </Period>
        </MPD>"#;
    let mpd = dash_mpd::parse(xml).unwrap();
    let mpd_url = Url::parse("https://example.com/manifest.mpd").unwrap();

    let mut parser = DashParser::new(HttpClient::default(), DashConfig::default());
    assert!(parser.parse(&mpd, &mpd_url).await.is_err());
}
