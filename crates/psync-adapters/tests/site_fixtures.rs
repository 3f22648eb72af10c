use std::path::{Path, PathBuf};

use psync_adapters::{site_rules, SiteExtractor};
use psync_core::DiagnosticKind;

fn fixture_path(site: &str, file: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures")
        .join(site)
        .join("sample")
        .join(file)
}

fn fixture(site: &str, file: &str) -> String {
    std::fs::read_to_string(fixture_path(site, file)).expect("fixture readable")
}

fn extractor(site: &str) -> SiteExtractor {
    SiteExtractor::new(site_rules(site).expect("known site"))
}

#[test]
fn dmm_listing_and_detail() {
    let ex = extractor("dmm");
    let listing = ex
        .extract_listing(&fixture("dmm", "listing.html"), "https://www.dmm.co.jp/live/chat/")
        .unwrap();
    assert_eq!(listing.cards_seen, 3);
    assert_eq!(listing.candidates.len(), 2);
    assert_eq!(listing.diagnostics.count(DiagnosticKind::SkippedCard), 1);

    let first = &listing.candidates[0];
    assert_eq!(
        first.identifier(),
        "https://www.dmm.co.jp/live/chat/-/character/=/character_id=1001/"
    );
    assert_eq!(first.field("name"), Some("さくら"));
    assert_eq!(first.field("image"), Some("https://pics.example.test/chat/1001.jpg"));
    assert_eq!(first.field("comment"), Some("こんばんは！"));
    assert_eq!(
        listing.candidates[1].field("image"),
        Some("https://www.dmm.co.jp/img/1002.jpg")
    );

    let detail = ex
        .extract_detail(&fixture("dmm", "detail.html"), first.clone())
        .unwrap();
    let rec = &detail.record;
    assert_eq!(rec.field("genre"), Some("人妻"));
    assert_eq!(rec.field("height"), Some("158cm"));
    assert_eq!(rec.field("three_size"), Some("B85 W58 H86"));
    assert_eq!(rec.field("blood_type"), Some("A型"));
    assert_eq!(rec.field("hobby"), Some("映画鑑賞"));
    assert_eq!(rec.field("birthday"), Some(""));
    assert_eq!(detail.matched, 5);

    let row = rec.to_row(ex.schema());
    assert_eq!(row.len(), 16);
    assert_eq!(row[2], first.identifier());
    assert_eq!(row[4], "人妻");
}

#[test]
fn jewel_live_listing_reads_background_images_and_counters() {
    let ex = extractor("jewel-live");
    assert!(!ex.has_detail());
    let listing = ex
        .extract_listing(&fixture("jewel-live", "listing.html"), "https://www.j-live.tv/")
        .unwrap();
    assert_eq!(listing.cards_seen, 2);
    let rows: Vec<_> = listing
        .candidates
        .iter()
        .map(|r| r.to_row(ex.schema()))
        .collect();
    assert_eq!(
        rows[0],
        vec![
            "あやか",
            "https://www.j-live.tv/thumb/501.jpg",
            "https://www.j-live.tv/profile/?id=501",
            "待機中です",
            "12",
            "新人"
        ]
    );
    assert_eq!(rows[1][1], "https://cdn.example.test/502.jpg");
    assert_eq!(rows[1][4], "");
}

#[test]
fn chatpia_requires_comment_and_fills_placeholders() {
    let ex = extractor("chatpia");
    let listing = ex
        .extract_listing(&fixture("chatpia", "listing.html"), "https://www.chatpia.jp/main.php")
        .unwrap();
    assert_eq!(listing.cards_seen, 3);
    assert_eq!(listing.candidates.len(), 2);
    assert_eq!(listing.diagnostics.count(DiagnosticKind::SkippedCard), 1);

    let yuki = &listing.candidates[0];
    assert_eq!(yuki.identifier(), "https://www.chatpia.jp/profile.php?id=7001");
    assert_eq!(yuki.field("name"), Some("ゆき"));
    assert_eq!(yuki.field("age"), Some("53"));
    assert_eq!(yuki.field("samune"), Some("https://picture.chatpia.jp/p/7001.jpg"));

    let detail = ex
        .extract_detail(&fixture("chatpia", "detail.html"), yuki.clone())
        .unwrap();
    let rec = &detail.record;
    assert_eq!(rec.field("height"), Some("158cm"));
    assert_eq!(rec.field("cup"), Some("Ｅカップ"));
    assert_eq!(rec.field("job"), Some("主婦"));
    assert_eq!(rec.field("time_slot"), Some("深夜"));
    assert_eq!(rec.field("hobby"), Some("-"));
    assert_eq!(rec.field("toy"), Some("-"));
    assert_eq!(rec.field("genre"), Some("Chatpia"));
    assert_eq!(rec.field("age"), Some("53"));

    let eri = ex.finalize(listing.candidates[1].clone());
    assert_eq!(eri.field("age"), Some("-"));
}

#[test]
fn angel_live_merges_pairs_tags_and_selectors() {
    let ex = extractor("angel-live");
    let listing = ex
        .extract_listing(
            &fixture("angel-live", "listing.html"),
            "https://www.angel-live.com/home/",
        )
        .unwrap();
    let ids: Vec<_> = listing.candidates.iter().map(|r| r.identifier()).collect();
    assert_eq!(
        ids,
        vec![
            "https://www.angel-live.com/profile/detail/?girl=3001",
            "https://www.angel-live.com/profile/detail/?girl=3002",
            "https://www.angel-live.com/profile/detail/?girl=3001",
        ]
    );
    assert_eq!(
        listing.candidates[0].field("samune"),
        Some("https://www.angel-live.com/img/girl/3001.jpg")
    );
    assert_eq!(listing.candidates[0].field("oneword"), Some("遊びに来てね"));

    let detail = ex
        .extract_detail(
            &fixture("angel-live", "detail.html"),
            listing.candidates[0].clone(),
        )
        .unwrap();
    let rec = &detail.record;
    assert_eq!(rec.field("age"), Some("32歳"));
    assert_eq!(rec.field("job"), Some("OL"));
    assert_eq!(rec.field("hobby"), Some("カフェ巡り"));
    assert_eq!(rec.field("erogenous_zone"), Some("ひみつ"));
    assert_eq!(rec.field("height"), Some("160cm"));
    assert_eq!(rec.field("genre"), Some("人妻, 顔出し"));
    assert_eq!(rec.field("cup"), Some(""));
    assert!(detail.missing.contains(&"cup"));

    let bare = ex
        .extract_detail("<html><body></body></html>", listing.candidates[1].clone())
        .unwrap();
    assert_eq!(bare.matched, 0);
    assert_eq!(bare.record.field("genre"), Some("Angel Live"));
}

#[test]
fn live_listing_skips_navigation_links() {
    let ex = extractor("live");
    let listing = ex
        .extract_listing(&fixture("live", "listing.html"), "https://live.example.test/top/")
        .unwrap();
    assert_eq!(listing.cards_seen, 2);
    assert_eq!(listing.candidates.len(), 1);
    let rec = &listing.candidates[0];
    assert_eq!(rec.identifier(), "https://live.example.test/girl/detail/9001");
    assert_eq!(rec.field("image"), Some("https://live.example.test/thumb/9001.png"));

    let detail = ex
        .extract_detail(&fixture("live", "detail.html"), rec.clone())
        .unwrap();
    assert_eq!(detail.record.field("age"), Some("28歳"));
    assert_eq!(detail.record.field("job"), Some("看護師"));
    assert_eq!(detail.record.field("genre"), Some("お姉さん,癒し系"));
    assert_eq!(detail.record.field("cup"), Some(""));
}
