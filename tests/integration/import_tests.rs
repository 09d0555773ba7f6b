//! Re-importing run directories into a fresh canonical store

use crate::common::*;
use bili_harvest::credentials::StaticCredentials;
use bili_harvest::crawler::{harvest, CancelToken};
use bili_harvest::model::ContentItem;
use bili_harvest::output::{
    export_final, import_run, read_table, ArtifactLayout, CsvSink, Tabular,
};
use bili_harvest::storage::{SqliteStorage, Storage};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TARGET: &str = "BV1xx411c7mD";

#[tokio::test]
async fn test_import_run_into_fresh_store() {
    let server = MockServer::start().await;
    let harvest_dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/x/web-interface/view"))
        .respond_with(ViewResponder)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/x/v2/reply/main"))
        .respond_with(ResponseTemplate::new(200).set_body_json(pinned_payload()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/x/v2/reply"))
        .respond_with(ResponseTemplate::new(200).set_body_json(empty_comment_page()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/x/v1/dm/list.so"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(overlay_document(cid_for(TARGET))),
        )
        .mount(&server)
        .await;

    let config = create_test_config(
        &server.uri(),
        harvest_dir.path(),
        &["MAIN"],
        &format!(
            "[comments]\ntargets = [\"{t}\"]\n\n[overlays]\ntargets = [\"{t}\"]\n",
            t = TARGET
        ),
    );
    let credentials = StaticCredentials::new().with("MAIN", COOKIE);
    let summary = harvest(config, "hash", &credentials, CancelToken::new())
        .await
        .unwrap();

    let store_dir = TempDir::new().unwrap();
    let mut storage = SqliteStorage::new(&store_dir.path().join("fresh.db")).unwrap();

    let imported = import_run(&mut storage, &summary.run_dir).unwrap();
    assert_eq!(imported.run_id, summary.run_id);
    assert_eq!(imported.content_items.inserted, 1);
    assert_eq!(imported.comments.inserted, 1);
    assert_eq!(imported.overlays.inserted, 1);

    let items = storage.load_content_items().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].source_run, summary.run_id);
    assert_eq!(items[0].record.aid, Some(aid_for(TARGET)));
    assert_eq!(storage.load_overlays().unwrap().len(), 3);

    // importing the same directory again changes nothing but provenance
    let again = import_run(&mut storage, &summary.run_dir).unwrap();
    assert_eq!(again.content_items.inserted, 0);
    assert_eq!(again.content_items.replaced, 1);
    let counts = storage.counts().unwrap();
    assert_eq!(counts.comments, 1);
    assert_eq!(counts.overlays, 3);

    let layout = ArtifactLayout::new(store_dir.path().join("out"));
    let exported = export_final(&storage, &CsvSink::new(true), &layout).unwrap();
    assert_eq!(exported.content_items, 1);
    assert_eq!(exported.overlays, 3);

    let rows: Vec<ContentItem> =
        read_table(&layout.final_dir().join(ContentItem::FILE_NAME)).unwrap();
    assert_eq!(rows[0].bvid, TARGET);
}
