//! End-to-end harvest runs against a mocked provider

use crate::common::*;
use bili_harvest::config::Config;
use bili_harvest::credentials::StaticCredentials;
use bili_harvest::crawler::{harvest, CancelToken};
use bili_harvest::model::{
    local_from_epoch, AnnotatedOverlay, CommentRecord, CommentTier, ContentItem, PublishTime,
    TimePrecision,
};
use bili_harvest::output::{read_table, Tabular};
use bili_harvest::storage::{RunStatus, SqliteStorage, Storage};
use bili_harvest::HarvestError;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SEARCH: &str = r#"
[search]
keywords = ["robot"]
start-date = "2024-01-01"
end-date = "2024-01-31"
target-count = 25
page-size = 10
max-pages = 10
"#;

const THREAD_TARGET: &str = "BV1xx411c7mD";
const OVERLAY_ONLY_TARGET: &str = "BV1GJ411x7h7";

fn open_store(dir: &TempDir) -> SqliteStorage {
    SqliteStorage::new(&dir.path().join("store.db")).expect("store should open")
}

async fn mount_view(server: &MockServer, expected: u64) {
    Mock::given(method("GET"))
        .and(path("/x/web-interface/view"))
        .respond_with(ViewResponder)
        .expect(expected)
        .mount(server)
        .await;
}

async fn mount_overlays(server: &MockServer, bvid: &str) {
    let cid = cid_for(bvid);
    Mock::given(method("GET"))
        .and(path("/x/v1/dm/list.so"))
        .and(query_param("oid", cid.to_string().as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_string(overlay_document(cid)))
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_thread(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/x/v2/reply/main"))
        .and(header_exists("cookie"))
        .respond_with(ResponseTemplate::new(200).set_body_json(pinned_payload()))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/x/v2/reply"))
        .and(query_param("pn", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(comment_page_one()))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/x/v2/reply"))
        .and(query_param("pn", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(empty_comment_page()))
        .expect(1)
        .mount(server)
        .await;

    // the empty second page ends the thread
    Mock::given(method("GET"))
        .and(path("/x/v2/reply"))
        .and(query_param("pn", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(empty_comment_page()))
        .expect(0)
        .mount(server)
        .await;
}

fn targets_config(server: &MockServer, dir: &TempDir, sessions: &[&str]) -> Config {
    create_test_config(
        &server.uri(),
        dir.path(),
        sessions,
        &format!(
            r#"
[comments]
targets = ["{thread}"]
max-pages = 5

[overlays]
targets = ["{thread}", "{overlay}"]
"#,
            thread = THREAD_TARGET,
            overlay = OVERLAY_ONLY_TARGET
        ),
    )
}

#[tokio::test]
async fn test_search_stops_at_target_count() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let ids: Vec<String> = (0..30).map(test_bvid).collect();

    for (page, slice) in [(1, &ids[0..10]), (2, &ids[10..20]), (3, &ids[20..30])] {
        Mock::given(method("GET"))
            .and(path("/all"))
            .and(query_param("page", page.to_string().as_str()))
            .and(header_exists("cookie"))
            .respond_with(ResponseTemplate::new(200).set_body_string(search_page(slice)))
            .expect(1)
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/all"))
        .and(query_param("page", "4"))
        .respond_with(ResponseTemplate::new(200).set_body_string(search_page(&[])))
        .expect(0)
        .mount(&server)
        .await;
    // only the 25 kept cards are resolved
    mount_view(&server, 25).await;

    let config = create_test_config(&server.uri(), dir.path(), &["MAIN"], SEARCH);
    let credentials = StaticCredentials::new().with("MAIN", COOKIE);
    let summary = harvest(config, "hash", &credentials, CancelToken::new())
        .await
        .expect("harvest should succeed");

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.artifacts.content_items, 25);
    assert_eq!(summary.skipped, 0);

    let storage = open_store(&dir);
    let items = storage.load_content_items().unwrap();
    assert_eq!(items.len(), 25);
    assert!(items.iter().all(|s| s.source_run == summary.run_id));

    let first = &items[0].record;
    assert_eq!(first.bvid, ids[0]);
    assert_eq!(first.keyword, "robot");
    assert_eq!(first.title.as_deref(), Some(format!("title of {}", ids[0]).as_str()));
    assert_eq!(first.counters.views, Some(1200));
    assert_eq!(
        first.published_at.map(|p| p.precision),
        Some(TimePrecision::Second)
    );

    let run_rows: Vec<ContentItem> =
        read_table(&summary.run_dir.join(ContentItem::FILE_NAME)).unwrap();
    assert_eq!(run_rows.len(), 25);
    let final_rows: Vec<ContentItem> = read_table(
        &dir.path().join("out").join("final").join(ContentItem::FILE_NAME),
    )
    .unwrap();
    assert_eq!(final_rows.len(), 25);
}

#[tokio::test]
async fn test_video_page_fills_publish_time_missing_from_view() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let ids: Vec<String> = (0..2).map(test_bvid).collect();
    let page_pubdate = PUBDATE + 3_600;

    Mock::given(method("GET"))
        .and(path("/all"))
        .respond_with(ResponseTemplate::new(200).set_body_string(search_page(&ids)))
        .mount(&server)
        .await;

    // the first view payload has no pubdate, the card only knows the day
    Mock::given(method("GET"))
        .and(path("/x/web-interface/view"))
        .and(query_param("bvid", ids[0].as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": {
                "bvid": ids[0],
                "aid": aid_for(&ids[0]),
                "cid": cid_for(&ids[0]),
                "title": "without pubdate",
                "owner": {"name": "uploader"},
                "stat": {"view": 10}
            }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/x/web-interface/view"))
        .and(query_param("bvid", ids[1].as_str()))
        .respond_with(ViewResponder)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/video/{}", ids[0])))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<html><head><script>window.__INITIAL_STATE__={{"videoData":{{"bvid":"{id}","pubdate":{pubdate},"stat":{{"view":99,"like":4}}}}}};</script></head>
            <body><h1 class="video-title" title="page title">page title</h1></body></html>"#,
            id = ids[0],
            pubdate = page_pubdate
        )))
        .expect(1)
        .mount(&server)
        .await;
    // a complete view payload needs no page
    Mock::given(method("GET"))
        .and(path(format!("/video/{}", ids[1])))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let config = create_test_config(
        &server.uri(),
        dir.path(),
        &["MAIN"],
        r#"
[search]
keywords = ["robot"]
start-date = "2024-01-01"
end-date = "2024-01-31"
target-count = 2
page-size = 10
max-pages = 1
"#,
    );
    let credentials = StaticCredentials::new().with("MAIN", COOKIE);
    let summary = harvest(config, "hash", &credentials, CancelToken::new())
        .await
        .expect("harvest should succeed");

    assert_eq!(summary.artifacts.content_items, 2);
    let page_hits = summary
        .extraction
        .field("page.published_at")
        .map(|f| f.total_hits());
    assert_eq!(page_hits, Some(1));

    let storage = open_store(&dir);
    let items = storage.load_content_items().unwrap();
    let filled = &items.iter().find(|s| s.record.bvid == ids[0]).unwrap().record;
    assert_eq!(
        filled.published_at,
        Some(PublishTime::exact(local_from_epoch(page_pubdate).unwrap()))
    );
    // values the view already gave are kept
    assert_eq!(filled.title.as_deref(), Some("without pubdate"));
    assert_eq!(filled.counters.views, Some(10));
    assert_eq!(filled.counters.likes, Some(4));
}

#[tokio::test]
async fn test_comments_and_overlays_across_sessions() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_view(&server, 2).await;
    mount_thread(&server).await;
    mount_overlays(&server, THREAD_TARGET).await;
    mount_overlays(&server, OVERLAY_ONLY_TARGET).await;

    let config = targets_config(&server, &dir, &["FIRST", "SECOND"]);
    let credentials = StaticCredentials::new()
        .with("FIRST", COOKIE)
        .with("SECOND", COOKIE);
    let summary = harvest(config, "hash", &credentials, CancelToken::new())
        .await
        .expect("harvest should succeed");

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.artifacts.content_items, 2);
    // the pinned comment reappearing on page one is stored once
    assert_eq!(summary.artifacts.comments, 3);
    assert_eq!(summary.artifacts.overlays, 6);

    let storage = open_store(&dir);
    let tiers = storage.count_comments_by_tier().unwrap();
    assert_eq!(tiers.get(&CommentTier::Pinned), Some(&1));
    assert_eq!(tiers.get(&CommentTier::Root), Some(&1));
    assert_eq!(tiers.get(&CommentTier::Reply), Some(&1));

    let comments: Vec<CommentRecord> =
        read_table(&summary.run_dir.join(CommentRecord::FILE_NAME)).unwrap();
    let reply = comments.iter().find(|c| c.comment_id == 101).unwrap();
    assert_eq!(reply.parent_id, Some(100));
    assert_eq!(reply.body, "a reply\non two lines");
    let pinned = comments.iter().find(|c| c.comment_id == 1).unwrap();
    assert_eq!(pinned.tier, CommentTier::Pinned);

    let overlays: Vec<AnnotatedOverlay> =
        read_table(&summary.run_dir.join(AnnotatedOverlay::FILE_NAME)).unwrap();
    let thread_overlays: Vec<&AnnotatedOverlay> = overlays
        .iter()
        .filter(|o| o.message.content_id == THREAD_TARGET)
        .collect();
    let offsets: Vec<f64> = thread_overlays.iter().map(|o| o.message.offset_secs).collect();
    assert_eq!(offsets, vec![3.25, 3.75, 12.5]);
    assert_eq!(thread_overlays[0].second_count, 2);
    assert!(thread_overlays[0].first_in_second);
    assert!(!thread_overlays[1].first_in_second);
}

#[tokio::test]
async fn test_failing_item_is_skipped_after_retries() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    // mounted first so it wins over the generic view mock
    Mock::given(method("GET"))
        .and(path("/x/web-interface/view"))
        .and(query_param("bvid", OVERLAY_ONLY_TARGET))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .expect(2)
        .mount(&server)
        .await;
    mount_view(&server, 1).await;
    mount_overlays(&server, THREAD_TARGET).await;

    let config = create_test_config(
        &server.uri(),
        dir.path(),
        &["MAIN"],
        &format!(
            "[overlays]\ntargets = [\"{}\", \"{}\"]\n",
            OVERLAY_ONLY_TARGET, THREAD_TARGET
        ),
    );
    let credentials = StaticCredentials::new().with("MAIN", COOKIE);
    let summary = harvest(config, "hash", &credentials, CancelToken::new())
        .await
        .expect("a skipped item must not fail the run");

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.artifacts.content_items, 1);
    assert_eq!(summary.artifacts.overlays, 3);
}

#[tokio::test]
async fn test_anonymous_session_skips_auth_gated_listing() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/all"))
        .respond_with(ResponseTemplate::new(200).set_body_string(search_page(&[])))
        .expect(0)
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri(), dir.path(), &["MAIN"], SEARCH);
    let summary = harvest(config, "hash", &StaticCredentials::new(), CancelToken::new())
        .await
        .expect("optional auth should not fail the run");

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.artifacts.content_items, 0);
    assert!(summary.skipped >= 1);
}

#[tokio::test]
async fn test_missing_required_credential_is_fatal() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    let mut config = create_test_config(&server.uri(), dir.path(), &["MAIN"], SEARCH);
    config.session.require_auth = true;

    let result = harvest(config, "hash", &StaticCredentials::new(), CancelToken::new()).await;
    assert!(matches!(result, Err(HarvestError::AuthMissing { .. })));
}

#[tokio::test]
async fn test_cancelled_run_is_marked_interrupted() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let cancel = CancelToken::new();
    cancel.cancel();

    let config = create_test_config(&server.uri(), dir.path(), &["MAIN"], SEARCH);
    let credentials = StaticCredentials::new().with("MAIN", COOKIE);
    let summary = harvest(config, "hash", &credentials, cancel)
        .await
        .expect("an interrupted run still returns a summary");

    assert_eq!(summary.status, RunStatus::Interrupted);
    let storage = open_store(&dir);
    let run = storage.get_run(summary.run_id).unwrap();
    assert_eq!(run.status, RunStatus::Interrupted);
    assert!(run.finished_at.is_some());
}

#[tokio::test]
async fn test_rerun_replaces_records_and_provenance() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/x/web-interface/view"))
        .respond_with(ViewResponder)
        .expect(2)
        .mount(&server)
        .await;
    let cid = cid_for(THREAD_TARGET);
    Mock::given(method("GET"))
        .and(path("/x/v1/dm/list.so"))
        .respond_with(ResponseTemplate::new(200).set_body_string(overlay_document(cid)))
        .expect(2)
        .mount(&server)
        .await;

    let extra = format!("[overlays]\ntargets = [\"{}\"]\n", THREAD_TARGET);
    let credentials = StaticCredentials::new().with("MAIN", COOKIE);

    let first = harvest(
        create_test_config(&server.uri(), dir.path(), &["MAIN"], &extra),
        "hash",
        &credentials,
        CancelToken::new(),
    )
    .await
    .unwrap();
    let second = harvest(
        create_test_config(&server.uri(), dir.path(), &["MAIN"], &extra),
        "hash",
        &credentials,
        CancelToken::new(),
    )
    .await
    .unwrap();
    assert!(second.run_id > first.run_id);

    let storage = open_store(&dir);
    let counts = storage.counts().unwrap();
    assert_eq!(counts.content_items, 1);
    assert_eq!(counts.overlays, 3);

    let item = storage.get_content_item(THREAD_TARGET).unwrap().unwrap();
    assert_eq!(item.source_run, second.run_id);
    assert_eq!(storage.list_runs().unwrap().len(), 2);
}
